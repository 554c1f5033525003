use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use super::{
    markup,
    quota::{QuotaLimits, UploadQuota},
};
use crate::{
    backend::{AnswerSubmission, Credentials, ExamBackend, ImageFile},
    error::{SessionError, SessionResult, ValidationError},
    models::{AnswerDraft, ImageRef, Question, SavedAnswer},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Identifies where saved answers belong on the server.
#[derive(Debug, Clone)]
pub struct AnswerContext {
    pub test_id: String,
    pub domain_id: String,
    pub section_id: String,
    pub exam_start_time: DateTime<Utc>,
}

struct StoreState {
    order: Vec<String>,
    drafts: HashMap<String, AnswerDraft>,
    quota: UploadQuota,
    /// Uploads in flight per question; they count against the image limit.
    pending_images: HashMap<String, usize>,
    /// Set once the test is submitted; drafts are frozen from then on.
    closed: bool,
}

impl StoreState {
    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn draft_mut(&mut self, question_id: &str) -> SessionResult<&mut AnswerDraft> {
        self.drafts
            .get_mut(question_id)
            .ok_or_else(|| ValidationError::UnknownQuestion(question_id.to_string()).into())
    }
}

/// Per-question drafts for the active session. Network calls never run under
/// the lock, so edits stay responsive while a save or upload is in flight.
#[derive(Clone)]
pub struct AnswerStore {
    state: Arc<Mutex<StoreState>>,
    backend: Arc<dyn ExamBackend>,
    credentials: Credentials,
    context: AnswerContext,
}

impl AnswerStore {
    pub fn new(
        questions: &[Question],
        saved: &[SavedAnswer],
        limits: QuotaLimits,
        backend: Arc<dyn ExamBackend>,
        credentials: Credentials,
        context: AnswerContext,
    ) -> Self {
        let saved_by_question: HashMap<&str, &str> = saved
            .iter()
            .map(|answer| (answer.question_id.as_str(), answer.answer_text.as_str()))
            .collect();

        let mut order = Vec::with_capacity(questions.len());
        let mut drafts = HashMap::with_capacity(questions.len());
        for question in questions {
            let draft = match saved_by_question.get(question.id.as_str()) {
                Some(text) => AnswerDraft::from_saved(question.id.clone(), *text),
                None => AnswerDraft::new(question.id.clone()),
            };
            order.push(question.id.clone());
            drafts.insert(question.id.clone(), draft);
        }

        Self {
            state: Arc::new(Mutex::new(StoreState {
                order,
                drafts,
                quota: UploadQuota::new(limits),
                pending_images: HashMap::new(),
                closed: false,
            })),
            backend,
            credentials,
            context,
        }
    }

    pub fn context(&self) -> &AnswerContext {
        &self.context
    }

    pub async fn draft(&self, question_id: &str) -> Option<AnswerDraft> {
        self.state.lock().await.drafts.get(question_id).cloned()
    }

    /// Drafts in question order.
    pub async fn drafts(&self) -> Vec<AnswerDraft> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.drafts.get(id).cloned())
            .collect()
    }

    /// Freezes every draft. Work still in flight is discarded when it returns.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    pub async fn uploaded_bytes(&self) -> u64 {
        self.state.lock().await.quota.uploaded_bytes()
    }

    pub async fn remaining_upload_bytes(&self) -> u64 {
        self.state.lock().await.quota.remaining_bytes()
    }

    /// Replaces the typed prose of a draft, keeping its embedded images.
    pub async fn set_draft_text(&self, question_id: &str, prose: &str) -> SessionResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let draft = state.draft_mut(question_id)?;

        // Images only enter a draft through an upload that the quota accounted for.
        let typed = if markup::extract_images(prose).is_empty() {
            prose.to_string()
        } else {
            markup::prose(prose)
        };
        let images = markup::extract_images(draft.text());
        let combined = markup::compose(&images, &typed);
        draft.replace_text(combined, None);
        Ok(())
    }

    /// Validates limits, uploads the file and embeds the returned URL at the
    /// end of the draft.
    pub async fn attach_image(&self, question_id: &str, file: ImageFile) -> SessionResult<ImageRef> {
        let reservation = {
            let mut state = self.state.lock().await;
            state.ensure_open()?;
            let pending = state.pending_images.get(question_id).copied().unwrap_or(0);
            let on_answer = state.draft_mut(question_id)?.image_count() + pending;

            let reservation = match state.quota.reserve(on_answer, file.size()) {
                Ok(reservation) => reservation,
                Err(err) => {
                    log_info!("image rejected for question {question_id}: {err}");
                    return Err(err.into());
                }
            };

            if !file.is_image() {
                state.quota.release(reservation);
                log_info!("rejected non-image upload ({}) for question {question_id}", file.mime_type);
                return Err(ValidationError::NotAnImage {
                    mime: file.mime_type.clone(),
                }
                .into());
            }

            *state.pending_images.entry(question_id.to_string()).or_insert(0) += 1;
            reservation
        };

        log_debug!(
            "uploading {} ({} bytes) for question {question_id}",
            file.name,
            file.size()
        );
        let uploaded = self.backend.upload_image(&self.credentials, &file).await;

        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending_images.get_mut(question_id) {
            *pending = pending.saturating_sub(1);
        }

        let url = match uploaded {
            Ok(url) => url,
            Err(err) => {
                state.quota.release(reservation);
                log_warn!("image upload failed for question {question_id}: {err}");
                return Err(err.into());
            }
        };
        if state.closed {
            state.quota.release(reservation);
            log_info!("dropping image {url} for question {question_id}: test already submitted");
            return Err(SessionError::Closed);
        }

        let size = reservation.bytes();
        state.quota.commit(reservation);
        let draft = state.draft_mut(question_id)?;
        let updated = markup::append_image(draft.text(), &url);
        draft.replace_text(updated, Some((url.as_str(), size)));

        Ok(ImageRef {
            url,
            size_bytes: Some(size),
        })
    }

    pub async fn remove_image(&self, question_id: &str, url: &str) -> SessionResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let draft = state.draft_mut(question_id)?;

        let updated = markup::remove_image(draft.text(), url);
        match updated {
            Some(updated) => {
                draft.replace_text(updated, None);
                Ok(())
            }
            None => {
                log_warn!("no image {url} to remove from question {question_id}");
                Err(ValidationError::ImageNotFound {
                    url: url.to_string(),
                }
                .into())
            }
        }
    }

    /// Sends the full combined text. The draft counts as saved only if it was
    /// not edited while the request was in flight.
    pub async fn save(&self, question_id: &str) -> SessionResult<()> {
        let text = {
            let mut state = self.state.lock().await;
            state.ensure_open()?;
            let text = state.draft_mut(question_id)?.text().to_string();
            if text.trim().is_empty() {
                return Err(ValidationError::EmptyAnswer.into());
            }
            text
        };

        let submission = AnswerSubmission {
            test_id: self.context.test_id.clone(),
            question_id: question_id.to_string(),
            domain_id: self.context.domain_id.clone(),
            section: self.context.section_id.clone(),
            answer_text: text.clone(),
            exam_start_time: self.context.exam_start_time,
        };

        if let Err(err) = self.backend.save_answer(&self.credentials, &submission).await {
            log_warn!("saving answer for question {question_id} failed: {err}");
            return Err(err.into());
        }

        let mut state = self.state.lock().await;
        if state.closed {
            log_info!("answer for question {question_id} reached the server after submission");
            return Err(SessionError::Closed);
        }
        state.draft_mut(question_id)?.mark_synced(text);
        log_info!("answer saved for question {question_id}");
        Ok(())
    }
}
