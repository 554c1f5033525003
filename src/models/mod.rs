mod answer;
mod motion;
mod session;

pub use answer::{AnswerDraft, ImageRef};
pub use motion::{MotionSample, MotionStatus, SamplerState};
pub use session::{ActiveSession, ExamSession, Question, SavedAnswer, SessionStatus};
