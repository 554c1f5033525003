use anyhow::{bail, Context, Result};
use log::info;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    loop_worker::{sampling_loop, SamplerLinks, SamplerSettings},
    VideoSource,
};
use crate::{
    config::ProctorConfig,
    events::EventSender,
    models::{MotionStatus, SamplerState},
    permission::PermissionGate,
    timer::Clock,
};

impl From<&ProctorConfig> for SamplerSettings {
    fn from(config: &ProctorConfig) -> Self {
        Self {
            interval: config.sample_interval(),
            width: config.sample_width,
            height: config.sample_height,
            threshold: config.motion_threshold,
            hold: config.motion_hold(),
        }
    }
}

/// Owns the motion sampling task for the lifetime of a session.
pub struct FrameSampler {
    settings: SamplerSettings,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    status: Arc<watch::Sender<MotionStatus>>,
    /// Stamps motion samples.
    clock: Arc<dyn Clock>,
}

impl FrameSampler {
    pub fn new(settings: SamplerSettings, clock: Arc<dyn Clock>) -> Self {
        let (status, _) = watch::channel(MotionStatus::default());
        Self {
            settings,
            clock,
            handle: None,
            cancel_token: None,
            status: Arc::new(status),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MotionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> MotionStatus {
        self.status.borrow().clone()
    }

    /// True while the sampling task exists and has not failed.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
            && self.status.borrow().state != SamplerState::Failed
    }

    pub fn start(
        &mut self,
        source: Arc<dyn VideoSource>,
        gate: PermissionGate,
        events: EventSender,
    ) -> Result<()> {
        if self.handle.as_ref().is_some_and(|handle| !handle.is_finished()) {
            bail!("frame sampling already active");
        }

        let cancel_token = CancellationToken::new();
        let links = SamplerLinks {
            status: self.status.clone(),
            events,
            gate,
            clock: self.clock.clone(),
        };
        let handle = tokio::spawn(sampling_loop(
            source,
            self.settings,
            links,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("frame sampler started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let joined = match self.handle.take() {
            Some(handle) => handle
                .await
                .context("frame sampling task failed to join")
                .map(|_| ()),
            None => Ok(()),
        };

        self.status.send_modify(|status| {
            if status.state != SamplerState::Failed {
                status.state = SamplerState::Stopped;
            }
            status.motion_active = false;
        });
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::DeviceError, events::SessionEvent, timer::AnchoredClock};
    use chrono::{TimeZone, Utc};
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Flicker {
        grabs: AtomicUsize,
        fail_after: Option<usize>,
    }

    impl VideoSource for Flicker {
        fn grab_frame(&self) -> Result<RgbaImage, DeviceError> {
            let n = self.grabs.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(DeviceError::Revoked);
            }
            let shade = if n % 2 == 0 { 0 } else { 255 };
            Ok(RgbaImage::from_pixel(8, 6, Rgba([shade, shade, shade, 255])))
        }
    }

    struct Granting;

    #[async_trait]
    impl crate::sensing::CaptureDevice for Granting {
        async fn open(&self) -> Result<Arc<dyn VideoSource>, DeviceError> {
            Ok(Arc::new(Flicker {
                grabs: AtomicUsize::new(0),
                fail_after: None,
            }))
        }
    }

    fn settings() -> SamplerSettings {
        SamplerSettings {
            interval: Duration::from_millis(20),
            width: 4,
            height: 3,
            threshold: 0.10,
            hold: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn flickering_frames_raise_motion_then_stop_cleanly() {
        let events = crate::events::channel();
        let gate = PermissionGate::new(events.clone());
        let mut rx = events.subscribe();
        let started = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let clock = Arc::new(AnchoredClock::starting_at(started));
        let mut sampler = FrameSampler::new(settings(), clock);

        let source: Arc<dyn VideoSource> = Arc::new(Flicker {
            grabs: AtomicUsize::new(0),
            fail_after: None,
        });
        sampler
            .start(source.clone(), gate.clone(), events.clone())
            .unwrap();
        assert!(sampler.start(source, gate, events.clone()).is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let status = sampler.status();
        assert!(status.recording());
        assert!(status.motion_active);
        assert!(status.event_count >= 1);
        let stamped = status.last_sample.unwrap().timestamp;
        assert!(stamped >= started);
        assert!(stamped < started + chrono::Duration::seconds(5));

        sampler.stop().await.unwrap();
        let status = sampler.status();
        assert_eq!(status.state, SamplerState::Stopped);
        assert!(!status.motion_active);

        let mut detected = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::MotionDetected { .. }) {
                detected += 1;
            }
        }
        assert!(detected >= 1);
    }

    #[tokio::test]
    async fn revoked_device_fails_sampler_and_gate() {
        let events = crate::events::channel();
        let gate = PermissionGate::new(events.clone());
        let source = gate.request_access(&Granting).await.unwrap();
        drop(source);
        assert!(gate.is_granted());

        let mut sampler = FrameSampler::new(settings(), Arc::new(AnchoredClock::new()));
        let failing: Arc<dyn VideoSource> = Arc::new(Flicker {
            grabs: AtomicUsize::new(0),
            fail_after: Some(2),
        });
        sampler.start(failing, gate.clone(), events.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = sampler.status();
        assert_eq!(status.state, SamplerState::Failed);
        assert!(status.error.is_some());
        assert!(!sampler.is_running());
        assert!(!gate.is_granted());
        assert_eq!(gate.state().failure, Some(DeviceError::Revoked));

        sampler.stop().await.unwrap();
        assert_eq!(sampler.status().state, SamplerState::Failed);
    }
}
