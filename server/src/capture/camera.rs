use std::sync::Arc;

use frame_scout_common::config::CameraConfig;
use frame_scout_common::frame::Frame;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("could not open camera {index}: {reason}")]
    Open { index: u32, reason: String },
    #[error("failed to read frame: {0}")]
    Read(String),
}

/// An opened capture device.
///
/// Devices are created, read and released on the capture thread only, so
/// implementations don't need to be `Send` (nokhwa's `Camera` isn't).
pub trait CameraDevice {
    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// `false` once the device has gone away underneath us.
    fn is_open(&self) -> bool;

    /// Stop streaming and hand the device back to the OS.
    fn release(&mut self) {}
}

/// Factory for capture devices, shared by every capture run.
pub trait CameraOpener: Send + Sync {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn CameraDevice>, CameraError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// The camera backend compiled into this binary.
pub fn default_opener() -> Arc<dyn CameraOpener> {
    #[cfg(feature = "camera")]
    {
        Arc::new(native::NokhwaOpener)
    }
    #[cfg(not(feature = "camera"))]
    {
        Arc::new(UnavailableCamera)
    }
}

/// Stand-in used when the binary is built without a camera backend.
#[cfg_attr(feature = "camera", allow(dead_code))]
pub struct UnavailableCamera;

impl CameraOpener for UnavailableCamera {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn CameraDevice>, CameraError> {
        Err(CameraError::Open {
            index: config.index,
            reason: "built without the `camera` feature".into(),
        })
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

#[cfg(feature = "camera")]
mod native {
    use image::RgbImage;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
    };
    use nokhwa::Camera;
    use tracing::{info, warn};

    use super::{CameraDevice, CameraError, CameraOpener};
    use frame_scout_common::config::CameraConfig;
    use frame_scout_common::frame::Frame;

    pub struct NokhwaOpener;

    struct NokhwaDevice {
        camera: Camera,
        seq: u64,
    }

    impl CameraOpener for NokhwaOpener {
        fn open(&self, config: &CameraConfig) -> Result<Box<dyn CameraDevice>, CameraError> {
            let open_err = |e: nokhwa::NokhwaError| CameraError::Open {
                index: config.index,
                reason: e.to_string(),
            };
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                CameraFormat::new(
                    Resolution::new(config.width, config.height),
                    FrameFormat::MJPEG,
                    config.fps,
                ),
            ));
            let mut camera =
                Camera::new(CameraIndex::Index(config.index), requested).map_err(open_err)?;
            camera.open_stream().map_err(open_err)?;

            let resolution = camera.resolution();
            info!(
                index = config.index,
                width = resolution.width(),
                height = resolution.height(),
                fps = camera.frame_rate(),
                "camera stream opened"
            );
            Ok(Box::new(NokhwaDevice { camera, seq: 0 }))
        }

        fn name(&self) -> &str {
            "nokhwa"
        }
    }

    impl CameraDevice for NokhwaDevice {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            let buffer = self
                .camera
                .frame()
                .map_err(|e| CameraError::Read(e.to_string()))?;
            let decoded = buffer
                .decode_image::<RgbFormat>()
                .map_err(|e| CameraError::Read(e.to_string()))?;
            let (width, height) = (decoded.width(), decoded.height());
            let image = RgbImage::from_raw(width, height, decoded.into_raw())
                .ok_or_else(|| CameraError::Read("decoded buffer has the wrong size".into()))?;
            self.seq += 1;
            Ok(Frame::new(image, self.seq))
        }

        fn is_open(&self) -> bool {
            self.camera.is_stream_open()
        }

        fn release(&mut self) {
            if let Err(e) = self.camera.stop_stream() {
                warn!(error = %e, "failed to stop camera stream");
            }
        }
    }
}
