//! The exam server as seen by the session engine.

mod http;

pub use http::HttpBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    error::BackendError,
    models::{ActiveSession, Question},
};

/// Bearer credential for the signed-in test-taker. Handed to the session
/// controller explicitly and forwarded on every call.
#[derive(Clone)]
pub struct Credentials {
    access_token: String,
}

impl Credentials {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub questions: Vec<Question>,
    pub due_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    pub test_id: String,
    pub question_id: String,
    pub domain_id: String,
    pub section: String,
    pub answer_text: String,
    pub exam_start_time: DateTime<Utc>,
}

/// An image picked by the test-taker for embedding in an answer.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.trim().to_ascii_lowercase().starts_with("image/")
    }
}

#[async_trait]
pub trait ExamBackend: Send + Sync {
    /// The session already in progress for `test_id`, if any, with the
    /// answers saved so far.
    async fn session_status(
        &self,
        credentials: &Credentials,
        test_id: &str,
    ) -> Result<Option<ActiveSession>, BackendError>;

    async fn start_session(
        &self,
        credentials: &Credentials,
        test_id: &str,
        domain_id: &str,
        section_id: &str,
    ) -> Result<StartedSession, BackendError>;

    async fn fetch_questions(
        &self,
        credentials: &Credentials,
        domain_id: &str,
        section_id: &str,
    ) -> Result<Vec<Question>, BackendError>;

    async fn save_answer(
        &self,
        credentials: &Credentials,
        answer: &AnswerSubmission,
    ) -> Result<(), BackendError>;

    /// Stores the image and returns the URL to embed.
    async fn upload_image(
        &self,
        credentials: &Credentials,
        image: &ImageFile,
    ) -> Result<String, BackendError>;

    /// Idempotent on the server side.
    async fn submit_session(
        &self,
        credentials: &Credentials,
        test_id: &str,
    ) -> Result<(), BackendError>;
}
