//! `multipart/x-mixed-replace` MJPEG feed of the annotated frames.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::Stream;
use tracing::warn;

use crate::context::AppContext;
use crate::encode::encode_jpeg_blocking;

const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
const BOUNDARY: &[u8] = b"--frame\r\n";
const PART_HEADER: &[u8] = b"Content-Type: image/jpeg\r\n\r\n";

/// One multipart section carrying `jpeg`.
pub fn part(jpeg: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(BOUNDARY.len() + PART_HEADER.len() + jpeg.len() + 2);
    buf.extend_from_slice(BOUNDARY);
    buf.extend_from_slice(PART_HEADER);
    buf.extend_from_slice(jpeg);
    buf.extend_from_slice(b"\r\n");
    Bytes::from(buf)
}

/// Parts for the latest frame every `stream_interval_ms` until capture stops.
pub fn frames(ctx: Arc<AppContext>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    let interval = Duration::from_millis(ctx.config.server.stream_interval_ms);
    let quality = ctx.config.server.frame_jpeg_quality;

    futures_util::stream::unfold((ctx, true), move |(ctx, first)| async move {
        if !first {
            tokio::time::sleep(interval).await;
        }
        loop {
            if !ctx.status().active {
                return None;
            }
            let Some(frame) = ctx.latest_frame() else {
                tokio::time::sleep(interval).await;
                continue;
            };
            match encode_jpeg_blocking(frame.image, quality).await {
                Ok(jpeg) => return Some((Ok(part(&jpeg)), (ctx, false))),
                Err(e) => {
                    warn!(error = %e, "dropping stream frame");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    })
}

pub fn response(ctx: Arc<AppContext>) -> Response {
    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames(ctx)),
    )
        .into_response()
}
