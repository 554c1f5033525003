use async_trait::async_trait;
use image::RgbaImage;
use std::sync::Arc;

use crate::error::DeviceError;

/// A live video stream. `grab_frame` is blocking and is only called from
/// blocking worker threads.
pub trait VideoSource: Send + Sync {
    /// The current frame at the device's native resolution.
    fn grab_frame(&self) -> Result<RgbaImage, DeviceError>;

    /// Releases the device. Further grabs fail.
    fn stop(&self) {}
}

/// Entry point to the camera: opening it is where the user grants or
/// denies access.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn VideoSource>, DeviceError>;
}
