mod controller;
mod prompt;

pub use controller::{DraftSummary, SessionController, SessionDeps, SessionSnapshot, SubmitOutcome};
pub use prompt::{LogPrompt, UserPrompt};
