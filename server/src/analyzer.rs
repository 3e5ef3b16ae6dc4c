//! On-demand identification by the remote vision model.

use tracing::{info, warn};

use crate::context::AppContext;
use crate::encode::encode_jpeg_blocking;
use crate::vision::REMOTE_ERROR_LABEL;

pub const NO_FRAME_MESSAGE: &str = "No frame available";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Success(String),
    Failed(String),
}

/// Send the current region of interest to the vision model and store its
/// answer in the remote slot. Failures land in the slot as a sentinel and
/// are returned, never raised.
pub async fn request_feedback(ctx: &AppContext) -> Feedback {
    let Some(frame) = ctx.latest_frame() else {
        return Feedback::Failed(NO_FRAME_MESSAGE.into());
    };

    let _in_flight = ctx.lock_remote().await;
    let jpeg = match encode_jpeg_blocking(frame.region_of_interest(), ctx.config.vision.jpeg_quality)
        .await
    {
        Ok(jpeg) => jpeg,
        Err(e) => {
            warn!(error = %e, "could not encode region for remote analysis");
            ctx.record_remote(REMOTE_ERROR_LABEL);
            return Feedback::Failed(e.to_string());
        }
    };

    match ctx.vision().identify(&jpeg).await {
        Ok(item) => {
            info!(client = ctx.vision().name(), item = item.as_str(), "remote analysis done");
            ctx.record_remote(item.clone());
            Feedback::Success(item)
        }
        Err(e) => {
            warn!(client = ctx.vision().name(), error = %e, "remote analysis failed");
            ctx.record_remote(REMOTE_ERROR_LABEL);
            Feedback::Failed(e.to_string())
        }
    }
}
