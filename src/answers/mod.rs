pub mod markup;
pub mod quota;
mod store;

pub use quota::{QuotaLimits, UploadQuota};
pub use store::{AnswerContext, AnswerStore};
