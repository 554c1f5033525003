//! Client-side engine for a proctored, timed exam session.
//!
//! A [`SessionController`] owns one attempt: it asks for camera access through
//! the [`PermissionGate`], runs the [`DeadlineClock`] against the server's
//! deadline, samples the camera for motion with the [`FrameSampler`], keeps
//! answer drafts in an [`AnswerStore`] and submits exactly once, either on
//! request or when time runs out.

pub mod answers;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod permission;
pub mod sensing;
pub mod session;
pub mod timer;
mod utils;

pub use answers::{AnswerStore, QuotaLimits};
pub use backend::{Credentials, ExamBackend, HttpBackend, ImageFile};
pub use config::ProctorConfig;
pub use error::{
    BackendError, DeviceError, QuotaError, SessionError, SessionResult, ValidationError,
};
pub use events::SessionEvent;
pub use permission::{PermissionGate, PermissionState};
pub use sensing::{CaptureDevice, FrameSampler, ReferenceSnapshot, VideoSource};
pub use session::{
    DraftSummary, LogPrompt, SessionController, SessionDeps, SessionSnapshot, SubmitOutcome,
    UserPrompt,
};
pub use timer::{AnchoredClock, Clock, DeadlineClock};
pub use utils::init_logging;
