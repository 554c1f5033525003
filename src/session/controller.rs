use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::{
    sync::{broadcast, oneshot, watch, Mutex},
    task::JoinHandle,
    time,
};
use uuid::Uuid;

use super::UserPrompt;
use crate::{
    answers::{AnswerContext, AnswerStore, QuotaLimits},
    backend::{Credentials, ExamBackend, ImageFile},
    config::ProctorConfig,
    error::{DeviceError, SessionError, SessionResult, ValidationError},
    events::{self, emit, EventSender, SessionEvent},
    models::{
        ActiveSession, AnswerDraft, ExamSession, ImageRef, MotionStatus, Question, SavedAnswer,
        SessionStatus,
    },
    permission::{PermissionGate, PermissionState},
    sensing::{
        capture_snapshot, CaptureDevice, FrameSampler, ReferenceSnapshot, SamplerSettings,
        VideoSource,
    },
    timer::{format_remaining, Clock, ClockStatus, DeadlineClock},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const RESUME_NOTICE: &str =
    "Resumed your previous test session. Time continues from where you left off.";
const FINISH_CONFIRMATION: &str =
    "Are you sure you want to finish the test? You will not be able to change your answers.";
const SUBMITTED_NOTICE: &str = "Test submitted successfully!";
const AUTO_SUBMIT_FAILED_NOTICE: &str = "Time is up, but the test could not be submitted. \
     Check your connection and press Finish Test to try again.";

/// Collaborators injected into the controller.
pub struct SessionDeps {
    pub backend: Arc<dyn ExamBackend>,
    pub credentials: Credentials,
    pub device: Arc<dyn CaptureDevice>,
    pub prompt: Arc<dyn UserPrompt>,
    pub clock: Arc<dyn Clock>,
}

/// Result of a submission request. Repeats are reported, not treated as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmitOutcome {
    Submitted,
    AlreadySubmitted,
    InFlight,
    /// The test-taker cancelled the finish confirmation.
    Declined,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DraftSummary {
    pub question_id: String,
    pub saved: bool,
    pub image_count: usize,
}

impl From<&AnswerDraft> for DraftSummary {
    fn from(draft: &AnswerDraft) -> Self {
        Self {
            question_id: draft.question_id.clone(),
            saved: draft.is_saved(),
            image_count: draft.image_count(),
        }
    }
}

/// Everything the passive displays render, taken at one instant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub session: Option<ExamSession>,
    pub remaining_secs: i64,
    pub remaining_display: String,
    pub warning_visible: bool,
    pub permission: PermissionState,
    pub motion: MotionStatus,
    pub recording: bool,
    pub drafts: Vec<DraftSummary>,
    pub uploaded_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    CapturePending,
    /// Active; Warning and Expired come from the deadline clock.
    Running,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submission {
    Idle,
    InFlight,
    Done,
}

struct ControllerState {
    phase: Phase,
    source: Option<Arc<dyn VideoSource>>,
    reference: Option<ReferenceSnapshot>,
    /// Set when device access was refused; blocks every later attempt.
    device_failure: Option<DeviceError>,
    session: Option<ExamSession>,
    questions: Vec<Question>,
    store: Option<AnswerStore>,
    expiry_watch: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            phase: Phase::NotStarted,
            source: None,
            reference: None,
            device_failure: None,
            session: None,
            questions: Vec::new(),
            store: None,
            expiry_watch: None,
        }
    }
}

struct Inner {
    test_id: String,
    config: ProctorConfig,
    deps: SessionDeps,
    events: EventSender,
    gate: PermissionGate,
    clock: DeadlineClock,
    sampler: Mutex<FrameSampler>,
    state: Mutex<ControllerState>,
    /// Written only while `state` is locked, so the phase and the
    /// submission progress change together.
    submission: watch::Sender<Submission>,
}

/// Drives one test-taker's attempt at one test, from the camera check to the
/// final submission.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(test_id: impl Into<String>, config: ProctorConfig, deps: SessionDeps) -> Self {
        let events = events::channel();
        let gate = PermissionGate::new(events.clone());
        let clock = DeadlineClock::new(deps.clock.clone(), &config, events.clone());
        let sampler = FrameSampler::new(SamplerSettings::from(&config), deps.clock.clone());
        let (submission, _) = watch::channel(Submission::Idle);

        Self {
            inner: Arc::new(Inner {
                test_id: test_id.into(),
                config,
                deps,
                events,
                gate,
                clock,
                sampler: Mutex::new(sampler),
                state: Mutex::new(ControllerState::new()),
                submission,
            }),
        }
    }

    pub fn test_id(&self) -> &str {
        &self.inner.test_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn permission(&self) -> PermissionState {
        self.inner.gate.state()
    }

    pub fn watch_permission(&self) -> watch::Receiver<PermissionState> {
        self.inner.gate.subscribe()
    }

    pub async fn motion(&self) -> MotionStatus {
        self.inner.sampler.lock().await.status()
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.status().await
    }

    pub async fn session(&self) -> Option<ExamSession> {
        let status = self.inner.status().await;
        let session = self.inner.state.lock().await.session.clone();
        session.map(|mut session| {
            session.status = status;
            session
        })
    }

    pub async fn questions(&self) -> Vec<Question> {
        self.inner.state.lock().await.questions.clone()
    }

    pub async fn reference_snapshot(&self) -> Option<ReferenceSnapshot> {
        self.inner.state.lock().await.reference.clone()
    }

    pub async fn draft(&self, question_id: &str) -> Option<AnswerDraft> {
        let store = self.inner.state.lock().await.store.clone()?;
        store.draft(question_id).await
    }

    pub async fn drafts(&self) -> Vec<AnswerDraft> {
        let store = self.inner.state.lock().await.store.clone();
        match store {
            Some(store) => store.drafts().await,
            None => Vec::new(),
        }
    }

    /// Asks the server whether this test already has a session in progress.
    pub async fn check_existing(&self) -> SessionResult<Option<ActiveSession>> {
        let existing = self
            .inner
            .deps
            .backend
            .session_status(&self.inner.deps.credentials, &self.inner.test_id)
            .await?;

        if let Some(active) = &existing {
            log_info!(
                "test {} already in progress (domain {}, section {}, due {})",
                self.inner.test_id,
                active.domain_id,
                active.section_id,
                active.due_time.to_rfc3339()
            );
        }
        Ok(existing)
    }

    /// Requests camera access and moves to `CapturePending`. A refusal is
    /// final for this controller.
    pub async fn begin_capture_check(&self) -> SessionResult<()> {
        self.inner
            .require_phase(&[Phase::NotStarted, Phase::CapturePending])
            .await?;
        self.inner.acquire_device().await?;

        let entered = {
            let mut state = self.inner.state.lock().await;
            if state.phase == Phase::NotStarted {
                state.phase = Phase::CapturePending;
                true
            } else {
                false
            }
        };
        if entered {
            log_info!("camera ready, waiting for reference snapshot");
            emit(
                &self.inner.events,
                SessionEvent::StatusChanged {
                    status: SessionStatus::CapturePending,
                },
            );
        }
        Ok(())
    }

    /// Takes the full-resolution reference image required before `start`.
    pub async fn capture_reference(&self) -> SessionResult<ReferenceSnapshot> {
        self.inner.require_phase(&[Phase::CapturePending]).await?;
        if !self.inner.gate.is_granted() {
            return Err(SessionError::PermissionRequired);
        }

        let source = self
            .inner
            .state
            .lock()
            .await
            .source
            .clone()
            .ok_or(SessionError::PermissionRequired)?;
        let quality = self.inner.config.snapshot_jpeg_quality;
        let taken_at = self.inner.clock.now();

        let snapshot =
            tokio::task::spawn_blocking(move || capture_snapshot(source.as_ref(), quality, taken_at))
                .await
                .map_err(|err| DeviceError::Other(format!("snapshot worker failed: {err}")))??;

        log_info!(
            "reference snapshot captured ({}x{}, {} bytes)",
            snapshot.width,
            snapshot.height,
            snapshot.jpeg.len()
        );
        self.inner.state.lock().await.reference = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Creates a fresh session on the server for the chosen domain and
    /// section, then starts the clock and the sampler.
    pub async fn start(&self, domain_id: &str, section_id: &str) -> SessionResult<()> {
        if domain_id.trim().is_empty() || section_id.trim().is_empty() {
            return Err(ValidationError::MissingSelection.into());
        }
        if !self.inner.gate.is_granted() {
            return Err(SessionError::PermissionRequired);
        }
        self.inner.require_phase(&[Phase::CapturePending]).await?;

        let source = {
            let state = self.inner.state.lock().await;
            if state.reference.is_none() {
                return Err(ValidationError::MissingReferenceSnapshot.into());
            }
            state
                .source
                .clone()
                .ok_or(SessionError::PermissionRequired)?
        };

        let started = self
            .inner
            .deps
            .backend
            .start_session(
                &self.inner.deps.credentials,
                &self.inner.test_id,
                domain_id,
                section_id,
            )
            .await?;
        log_info!(
            "started test {} with {} questions, due {}",
            self.inner.test_id,
            started.questions.len(),
            started.due_time.to_rfc3339()
        );

        self.activate(
            source,
            domain_id,
            section_id,
            started.questions,
            Vec::new(),
            started.due_time,
        )
        .await
    }

    /// Picks up a session the server already holds. The deadline is the one
    /// the server issued originally.
    pub async fn resume(&self, existing: ActiveSession) -> SessionResult<()> {
        self.inner
            .require_phase(&[Phase::NotStarted, Phase::CapturePending])
            .await?;
        let source = self.inner.acquire_device().await?;

        let questions = self
            .inner
            .deps
            .backend
            .fetch_questions(
                &self.inner.deps.credentials,
                &existing.domain_id,
                &existing.section_id,
            )
            .await?;
        log_info!(
            "resuming test {} ({} questions, {} saved answers, due {})",
            self.inner.test_id,
            questions.len(),
            existing.saved_answers.len(),
            existing.due_time.to_rfc3339()
        );

        self.activate(
            source,
            &existing.domain_id,
            &existing.section_id,
            questions,
            existing.saved_answers,
            existing.due_time,
        )
        .await?;

        self.inner.deps.prompt.alert(RESUME_NOTICE).await;
        Ok(())
    }

    pub async fn set_draft_text(&self, question_id: &str, text: &str) -> SessionResult<()> {
        let store = self.inner.input_store().await?;
        store.set_draft_text(question_id, text).await
    }

    pub async fn attach_image(&self, question_id: &str, file: ImageFile) -> SessionResult<ImageRef> {
        let store = self.inner.input_store().await?;
        store.attach_image(question_id, file).await
    }

    pub async fn remove_image(&self, question_id: &str, url: &str) -> SessionResult<()> {
        let store = self.inner.input_store().await?;
        store.remove_image(question_id, url).await
    }

    pub async fn save(&self, question_id: &str) -> SessionResult<()> {
        let store = self.inner.input_store().await?;
        store.save(question_id).await
    }

    /// Submits the session once. Overlapping or repeated calls report
    /// `InFlight` or `AlreadySubmitted` without contacting the server.
    pub async fn submit(&self) -> SessionResult<SubmitOutcome> {
        if !self.inner.gate.is_granted() {
            log_warn!("submission blocked: camera access is not granted");
            return Err(SessionError::PermissionRequired);
        }
        self.inner.submit_once().await
    }

    /// The "Finish Test" action: confirm with the test-taker, then submit.
    pub async fn finish(&self) -> SessionResult<SubmitOutcome> {
        if !self.inner.gate.is_granted() {
            return Err(SessionError::PermissionRequired);
        }
        if !self.inner.deps.prompt.confirm(FINISH_CONFIRMATION).await {
            log_info!("finish cancelled by the test-taker");
            return Ok(SubmitOutcome::Declined);
        }
        self.submit().await
    }

    /// Stops every timer and loop and releases the camera. Unsubmitted
    /// sessions go back to `NotStarted`; the server still holds them.
    pub async fn teardown(&self) {
        let watcher = self.inner.state.lock().await.expiry_watch.take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        self.inner.release_resources().await;

        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::Submitted {
            state.phase = Phase::NotStarted;
            self.inner.submission.send_replace(Submission::Idle);
            state.session = None;
            state.store = None;
            state.questions.clear();
            state.reference = None;
        }
        log_info!("session for test {} torn down", self.inner.test_id);
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let status = self.inner.status().await;
        let clock = self.inner.clock.snapshot().await;
        let motion = self.motion().await;

        let (session, store) = {
            let state = self.inner.state.lock().await;
            (state.session.clone(), state.store.clone())
        };
        let session = session.map(|mut session| {
            session.status = status;
            session
        });

        let (drafts, uploaded_bytes) = match store {
            Some(store) => {
                let drafts: Vec<DraftSummary> =
                    store.drafts().await.iter().map(DraftSummary::from).collect();
                (drafts, store.uploaded_bytes().await)
            }
            None => (Vec::new(), 0),
        };

        let remaining_secs = session
            .as_ref()
            .map(|session| session.remaining_ms(self.inner.clock.now()) / 1_000)
            .unwrap_or(0);

        SessionSnapshot {
            status,
            session,
            remaining_secs,
            remaining_display: format_remaining(remaining_secs),
            warning_visible: clock.notice_visible,
            permission: self.inner.gate.state(),
            recording: motion.recording(),
            motion,
            drafts,
            uploaded_bytes,
        }
    }

    async fn activate(
        &self,
        source: Arc<dyn VideoSource>,
        domain_id: &str,
        section_id: &str,
        questions: Vec<Question>,
        saved: Vec<SavedAnswer>,
        due_time: DateTime<Utc>,
    ) -> SessionResult<()> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let session = ExamSession::new(
            Uuid::new_v4().to_string(),
            inner.test_id.clone(),
            domain_id.to_string(),
            section_id.to_string(),
            now,
            due_time,
        );
        let store = AnswerStore::new(
            &questions,
            &saved,
            QuotaLimits::from(&inner.config),
            inner.deps.backend.clone(),
            inner.deps.credentials.clone(),
            AnswerContext {
                test_id: inner.test_id.clone(),
                domain_id: domain_id.to_string(),
                section_id: section_id.to_string(),
                exam_start_time: now,
            },
        );

        {
            let mut state = inner.state.lock().await;
            if !matches!(state.phase, Phase::NotStarted | Phase::CapturePending) {
                drop(state);
                return Err(SessionError::InvalidState {
                    actual: inner.status().await,
                });
            }
            log_info!("session {} active for test {}", session.session_id, inner.test_id);
            state.phase = Phase::Running;
            inner.submission.send_replace(Submission::Idle);
            state.session = Some(session);
            state.questions = questions;
            state.store = Some(store);
        }

        let expired = inner.clock.start(due_time).await;

        if let Err(err) = inner
            .sampler
            .lock()
            .await
            .start(source, inner.gate.clone(), inner.events.clone())
        {
            log_error!("frame sampler did not start: {err:#}");
        }

        let watcher = tokio::spawn(watch_expiry(Arc::downgrade(inner), expired));
        if let Some(previous) = inner.state.lock().await.expiry_watch.replace(watcher) {
            previous.abort();
        }

        emit(
            &inner.events,
            SessionEvent::StatusChanged {
                status: SessionStatus::Active,
            },
        );
        Ok(())
    }
}

impl Inner {
    async fn status(&self) -> SessionStatus {
        let phase = self.state.lock().await.phase;
        match phase {
            Phase::NotStarted => SessionStatus::NotStarted,
            Phase::CapturePending => SessionStatus::CapturePending,
            Phase::Submitted => SessionStatus::Submitted,
            Phase::Running => match self.clock.status().await {
                ClockStatus::Warning => SessionStatus::Warning,
                ClockStatus::Expired => SessionStatus::Expired,
                ClockStatus::Idle | ClockStatus::Running => SessionStatus::Active,
            },
        }
    }

    async fn require_phase(&self, allowed: &[Phase]) -> SessionResult<()> {
        let phase = self.state.lock().await.phase;
        if allowed.contains(&phase) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                actual: self.status().await,
            })
        }
    }

    async fn acquire_device(&self) -> SessionResult<Arc<dyn VideoSource>> {
        {
            let state = self.state.lock().await;
            if let Some(failure) = &state.device_failure {
                return Err(failure.clone().into());
            }
            if let Some(source) = &state.source {
                if self.gate.is_granted() {
                    return Ok(source.clone());
                }
            }
        }

        match self.gate.request_access(self.deps.device.as_ref()).await {
            Ok(source) => {
                self.state.lock().await.source = Some(source.clone());
                Ok(source)
            }
            Err(err) => {
                self.state.lock().await.device_failure = Some(err.clone());
                Err(err.into())
            }
        }
    }

    /// The single gate in front of every draft mutation.
    async fn input_store(&self) -> SessionResult<AnswerStore> {
        if !self.gate.is_granted() {
            return Err(SessionError::PermissionRequired);
        }

        let (phase, store) = {
            let state = self.state.lock().await;
            (state.phase, state.store.clone())
        };
        let expired = self.clock.status().await == ClockStatus::Expired;
        match (phase, store) {
            (Phase::Submitted, _) => Err(SessionError::Closed),
            (Phase::Running, Some(store)) if !expired => Ok(store),
            _ => Err(SessionError::InvalidState {
                actual: self.status().await,
            }),
        }
    }

    async fn submit_once(&self) -> SessionResult<SubmitOutcome> {
        {
            let state = self.state.lock().await;
            let progress = *self.submission.borrow();
            match progress {
                Submission::Done => return Ok(SubmitOutcome::AlreadySubmitted),
                Submission::InFlight => return Ok(SubmitOutcome::InFlight),
                Submission::Idle => {}
            }
            if state.phase != Phase::Running {
                drop(state);
                return Err(SessionError::InvalidState {
                    actual: self.status().await,
                });
            }
            self.submission.send_replace(Submission::InFlight);
        }

        log_info!("submitting test {}", self.test_id);
        let result = self
            .deps
            .backend
            .submit_session(&self.deps.credentials, &self.test_id)
            .await;

        if let Err(err) = result {
            let _state = self.state.lock().await;
            self.submission.send_replace(Submission::Idle);
            log_warn!("submitting test {} failed: {err}", self.test_id);
            return Err(err.into());
        }

        {
            let mut state = self.state.lock().await;
            self.submission.send_replace(Submission::Done);
            state.phase = Phase::Submitted;
            if let Some(session) = state.session.as_mut() {
                session.status = SessionStatus::Submitted;
            }
            // Uploads and saves still in flight must not land on a submitted test.
            if let Some(store) = state.store.as_ref() {
                store.close().await;
            }
            // Stopping the clock below ends the watcher unless it is the caller.
            state.expiry_watch.take();
        }
        self.release_resources().await;

        log_info!("test {} submitted", self.test_id);
        emit(&self.events, SessionEvent::Submitted);
        emit(
            &self.events,
            SessionEvent::StatusChanged {
                status: SessionStatus::Submitted,
            },
        );
        self.deps.prompt.alert(SUBMITTED_NOTICE).await;
        Ok(SubmitOutcome::Submitted)
    }

    /// Waits out a submission someone else started and reports how it ended.
    async fn settled_submission(&self) -> Submission {
        let mut progress = self.submission.subscribe();
        let settled = match progress.wait_for(|state| *state != Submission::InFlight).await {
            Ok(state) => *state,
            // The sender lives as long as `self`.
            Err(_) => Submission::Idle,
        };
        settled
    }

    /// Runs when the deadline passes. Not gated on camera permission: the
    /// test-taker may no longer be able to act. A manual submission already
    /// in flight is awaited and does not use up an attempt.
    async fn auto_submit(&self) {
        let attempts = self.config.auto_submit_attempts.max(1);
        let mut made = 0;
        let mut last_error: Option<SessionError> = None;

        while made < attempts {
            if self.settled_submission().await == Submission::Done {
                return;
            }
            log_info!(
                "deadline reached, auto-submitting test {} (attempt {}/{attempts})",
                self.test_id,
                made + 1
            );
            match self.submit_once().await {
                Ok(SubmitOutcome::InFlight) => {
                    log_info!("a submission is already in flight for test {}", self.test_id);
                    continue;
                }
                Ok(_) => return,
                Err(SessionError::Closed | SessionError::InvalidState { .. }) => return,
                Err(err) => last_error = Some(err),
            }
            made += 1;
            if made < attempts {
                time::sleep(self.config.auto_submit_retry_delay()).await;
            }
        }

        if self.settled_submission().await == Submission::Done {
            return;
        }

        let reason = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "submission did not complete".to_string());
        log_error!(
            "auto-submit of test {} failed after {attempts} attempts: {reason}",
            self.test_id
        );
        emit(
            &self.events,
            SessionEvent::AutoSubmitFailed { attempts, reason },
        );
        self.deps.prompt.alert(AUTO_SUBMIT_FAILED_NOTICE).await;
    }

    async fn release_resources(&self) {
        self.clock.stop().await;
        if let Err(err) = self.sampler.lock().await.stop().await {
            log_warn!("frame sampler did not stop cleanly: {err:#}");
        }
        let source = self.state.lock().await.source.take();
        if let Some(source) = source {
            source.stop();
        }
    }
}

async fn watch_expiry(inner: Weak<Inner>, expired: oneshot::Receiver<()>) {
    if expired.await.is_err() {
        return;
    }
    let Some(inner) = inner.upgrade() else {
        return;
    };
    emit(
        &inner.events,
        SessionEvent::StatusChanged {
            status: SessionStatus::Expired,
        },
    );
    inner.auto_submit().await;
}
