//! Shared fakes for session integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use examwatch::{
    backend::{AnswerSubmission, StartedSession},
    models::{ActiveSession, Question},
    AnchoredClock, BackendError, CaptureDevice, Credentials, DeviceError, ExamBackend, ImageFile,
    ProctorConfig, SessionController, SessionDeps, SessionEvent, UserPrompt, VideoSource,
};
use image::{Rgba, RgbaImage};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::sync::broadcast;

pub const TEST_ID: &str = "test-1";
pub const KB: usize = 1024;

/// Fixed wall time the fake clock starts from.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Small frames and a slow sampler keep paused-time tests cheap.
pub fn test_config() -> ProctorConfig {
    ProctorConfig {
        sample_interval_ms: 200,
        sample_width: 8,
        sample_height: 6,
        ..ProctorConfig::default()
    }
}

pub fn questions() -> Vec<Question> {
    ["q1", "q2"]
        .iter()
        .map(|id| Question {
            id: id.to_string(),
            text: format!("Question {id}"),
            section: Some("A".into()),
        })
        .collect()
}

#[derive(Default)]
pub struct FakeBackend {
    pub due_time: Mutex<Option<DateTime<Utc>>>,
    pub active: Mutex<Option<ActiveSession>>,
    pub saves: Mutex<Vec<AnswerSubmission>>,
    pub fail_saves: AtomicBool,
    pub fail_uploads: AtomicBool,
    pub uploads: AtomicUsize,
    pub upload_delay: Mutex<Option<Duration>>,
    pub save_delay: Mutex<Option<Duration>>,
    pub submit_calls: AtomicUsize,
    /// Number of upcoming submit calls that fail.
    pub failing_submits: AtomicUsize,
    pub submit_delay: Mutex<Option<Duration>>,
    pub question_fetches: AtomicUsize,
}

impl FakeBackend {
    pub fn due_in(seconds: i64) -> Arc<Self> {
        let backend = Self::default();
        *backend.due_time.lock().unwrap() = Some(t0() + ChronoDuration::seconds(seconds));
        Arc::new(backend)
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn saved_texts(&self) -> Vec<String> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .map(|save| save.answer_text.clone())
            .collect()
    }
}

fn unavailable() -> BackendError {
    BackendError::Transport("connection refused".into())
}

#[async_trait]
impl ExamBackend for FakeBackend {
    async fn session_status(
        &self,
        _credentials: &Credentials,
        _test_id: &str,
    ) -> Result<Option<ActiveSession>, BackendError> {
        Ok(self.active.lock().unwrap().clone())
    }

    async fn start_session(
        &self,
        _credentials: &Credentials,
        _test_id: &str,
        _domain_id: &str,
        _section_id: &str,
    ) -> Result<StartedSession, BackendError> {
        let due_time = self
            .due_time
            .lock()
            .unwrap()
            .unwrap_or_else(|| t0() + ChronoDuration::hours(1));
        Ok(StartedSession {
            questions: questions(),
            due_time,
        })
    }

    async fn fetch_questions(
        &self,
        _credentials: &Credentials,
        _domain_id: &str,
        _section_id: &str,
    ) -> Result<Vec<Question>, BackendError> {
        self.question_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(questions())
    }

    async fn save_answer(
        &self,
        _credentials: &Credentials,
        answer: &AnswerSubmission,
    ) -> Result<(), BackendError> {
        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.saves.lock().unwrap().push(answer.clone());
        Ok(())
    }

    async fn upload_image(
        &self,
        _credentials: &Credentials,
        _image: &ImageFile,
    ) -> Result<String, BackendError> {
        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("https://cdn.exam.test/uploads/img-{n}.png"))
    }

    async fn submit_session(
        &self,
        _credentials: &Credentials,
        _test_id: &str,
    ) -> Result<(), BackendError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self.failing_submits.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_submits.store(failing - 1, Ordering::SeqCst);
            return Err(unavailable());
        }
        Ok(())
    }
}

/// Camera whose frames alternate between black and white when `flicker` is
/// set and stay grey otherwise.
#[derive(Default)]
pub struct FakeSource {
    pub flicker: bool,
    pub revoked: AtomicBool,
    pub stopped: AtomicBool,
    pub grabs: AtomicUsize,
}

impl FakeSource {
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl VideoSource for FakeSource {
    fn grab_frame(&self) -> Result<RgbaImage, DeviceError> {
        if self.revoked.load(Ordering::SeqCst) || self.is_stopped() {
            return Err(DeviceError::Revoked);
        }
        let n = self.grabs.fetch_add(1, Ordering::SeqCst);
        let shade = match (self.flicker, n % 2) {
            (false, _) => 128,
            (true, 0) => 0,
            (true, _) => 255,
        };
        Ok(RgbaImage::from_pixel(8, 6, Rgba([shade, shade, shade, 255])))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct FakeCamera {
    pub source: Arc<FakeSource>,
    pub refuse: Option<DeviceError>,
    pub opens: AtomicUsize,
}

impl FakeCamera {
    pub fn working(flicker: bool) -> Arc<Self> {
        Arc::new(Self {
            source: Arc::new(FakeSource {
                flicker,
                ..FakeSource::default()
            }),
            refuse: None,
            opens: AtomicUsize::new(0),
        })
    }

    pub fn refusing(err: DeviceError) -> Arc<Self> {
        Arc::new(Self {
            source: Arc::new(FakeSource::default()),
            refuse: Some(err),
            opens: AtomicUsize::new(0),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for FakeCamera {
    async fn open(&self) -> Result<Arc<dyn VideoSource>, DeviceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match &self.refuse {
            Some(err) => Err(err.clone()),
            None => Ok(self.source.clone()),
        }
    }
}

pub struct RecordingPrompt {
    pub alerts: Mutex<Vec<String>>,
    pub answer: AtomicBool,
}

impl RecordingPrompt {
    pub fn answering(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            alerts: Mutex::new(Vec::new()),
            answer: AtomicBool::new(answer),
        })
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserPrompt for RecordingPrompt {
    async fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }

    async fn confirm(&self, _message: &str) -> bool {
        self.answer.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub backend: Arc<FakeBackend>,
    pub camera: Arc<FakeCamera>,
    pub prompt: Arc<RecordingPrompt>,
}

impl Harness {
    pub fn new(backend: Arc<FakeBackend>, camera: Arc<FakeCamera>) -> Self {
        Self::with_config(backend, camera, test_config())
    }

    pub fn with_config(
        backend: Arc<FakeBackend>,
        camera: Arc<FakeCamera>,
        config: ProctorConfig,
    ) -> Self {
        let prompt = RecordingPrompt::answering(true);
        let controller = SessionController::new(
            TEST_ID,
            config,
            SessionDeps {
                backend: backend.clone(),
                credentials: Credentials::bearer("token-abc"),
                device: camera.clone(),
                prompt: prompt.clone(),
                clock: Arc::new(AnchoredClock::starting_at(t0())),
            },
        );
        Self {
            controller,
            backend,
            camera,
            prompt,
        }
    }

    /// Camera check, reference snapshot and start, as the start screen does.
    pub async fn start(&self) {
        self.controller
            .begin_capture_check()
            .await
            .expect("camera check should pass");
        self.controller
            .capture_reference()
            .await
            .expect("reference snapshot should be captured");
        self.controller
            .start("domain-1", "A")
            .await
            .expect("session should start");
    }
}

/// A started session with an hour on the clock.
pub async fn started_session() -> Harness {
    let harness = Harness::new(FakeBackend::due_in(3_600), FakeCamera::working(false));
    harness.start().await;
    harness
}

pub fn png(name: &str, size: usize) -> ImageFile {
    ImageFile::new(name, "image/png", vec![0u8; size])
}

/// Everything broadcast so far.
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
