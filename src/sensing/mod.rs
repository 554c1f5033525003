pub mod camera;
pub mod controller;
pub mod frame_diff;
mod loop_worker;
pub mod motion;
pub mod snapshot;

pub use camera::{CaptureDevice, VideoSource};
pub use controller::FrameSampler;
pub use frame_diff::{diff_score, downscale};
pub use loop_worker::SamplerSettings;
pub use motion::MotionTracker;
pub use snapshot::{capture_snapshot, ReferenceSnapshot};
