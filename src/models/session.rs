use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    NotStarted,
    CapturePending,
    Active,
    Warning,
    Expired,
    Submitted,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::NotStarted
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "NotStarted",
            SessionStatus::CapturePending => "CapturePending",
            SessionStatus::Active => "Active",
            SessionStatus::Warning => "Warning",
            SessionStatus::Expired => "Expired",
            SessionStatus::Submitted => "Submitted",
        }
    }

    /// Active or its Warning sub-state.
    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Warning)
    }

    pub fn can_submit(&self) -> bool {
        matches!(
            self,
            SessionStatus::Active | SessionStatus::Warning | SessionStatus::Expired
        )
    }
}

/// One student's timed attempt. `due_time` is fixed when the server creates
/// the session and is never recomputed, including across resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSession {
    pub session_id: String,
    pub test_id: String,
    pub domain_id: String,
    pub section_id: String,
    pub start_time: DateTime<Utc>,
    due_time: DateTime<Utc>,
    pub status: SessionStatus,
}

impl ExamSession {
    pub fn new(
        session_id: String,
        test_id: String,
        domain_id: String,
        section_id: String,
        start_time: DateTime<Utc>,
        due_time: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            test_id,
            domain_id,
            section_id,
            start_time,
            due_time,
            status: SessionStatus::Active,
        }
    }

    pub fn due_time(&self) -> DateTime<Utc> {
        self.due_time
    }

    /// `max(0, due_time - now)` in milliseconds.
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.due_time - now).num_milliseconds().max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default, alias = "questionText")]
    pub text: String,
    #[serde(default)]
    pub section: Option<String>,
}

/// An answer the server already holds for the active session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedAnswer {
    pub question_id: String,
    pub answer_text: String,
}

/// What the server reports about a session already in progress for a test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub test_id: String,
    pub domain_id: String,
    pub domain_name: Option<String>,
    pub section_id: String,
    pub due_time: DateTime<Utc>,
    #[serde(default)]
    pub saved_answers: Vec<SavedAnswer>,
}
