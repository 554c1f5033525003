use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::sync::Arc;
use tokio::{
    sync::watch,
    time::{sleep_until, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{
    frame_diff::{diff_score, downscale},
    motion::MotionTracker,
    VideoSource,
};
use crate::{
    error::DeviceError,
    events::{emit, EventSender, SessionEvent},
    models::{MotionStatus, SamplerState},
    permission::PermissionGate,
    timer::Clock,
};

// The loop runs at display refresh rate; keep per-frame output at debug.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub width: u32,
    pub height: u32,
    pub threshold: f64,
    pub hold: Duration,
}

pub(crate) struct SamplerLinks {
    pub status: Arc<watch::Sender<MotionStatus>>,
    pub events: EventSender,
    pub gate: PermissionGate,
    pub clock: Arc<dyn Clock>,
}

enum Step {
    Compared(RgbaImage, Option<f64>),
    Failed(DeviceError),
}

pub(crate) async fn sampling_loop(
    source: Arc<dyn VideoSource>,
    settings: SamplerSettings,
    links: SamplerLinks,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut tracker = MotionTracker::new(settings.threshold, settings.hold);
    let mut previous: Option<RgbaImage> = None;
    let mut consecutive_failures: u32 = 0;

    links.status.send_modify(|status| {
        *status = MotionStatus {
            state: SamplerState::Running,
            ..MotionStatus::default()
        };
    });
    log_info!("frame sampler running every {:?}", settings.interval);

    loop {
        let clears_at = tracker.clears_at();

        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                log_info!("frame sampler shutting down");
                break;
            }
            _ = wait_until(clears_at) => {
                if tracker.clear_if_elapsed(Instant::now()) {
                    links.status.send_modify(|status| status.motion_active = false);
                    emit(&links.events, SessionEvent::MotionCleared);
                }
            }
            _ = ticker.tick() => {
                match compare_next_frame(&source, previous.take(), settings).await {
                    Ok(Step::Compared(frame, score)) => {
                        consecutive_failures = 0;
                        previous = Some(frame);
                        if let Some(score) = score {
                            record_score(&mut tracker, score, &links);
                        }
                    }
                    Ok(Step::Failed(err)) if is_fatal(&err) => {
                        fail(&links, err);
                        return;
                    }
                    Ok(Step::Failed(err)) => {
                        consecutive_failures += 1;
                        log_warn!("frame capture failed ({consecutive_failures} in a row): {err}");
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            fail(&links, err);
                            return;
                        }
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        log_warn!("frame sampling step failed: {err:#}");
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            fail(&links, DeviceError::Other(format!("{err:#}")));
                            return;
                        }
                    }
                }
            }
        }
    }

    links.status.send_modify(|status| {
        status.state = SamplerState::Stopped;
        status.motion_active = false;
    });
}

/// Grab, downscale and compare off the async threads so the deadline clock
/// keeps ticking however slow the camera is.
async fn compare_next_frame(
    source: &Arc<dyn VideoSource>,
    previous: Option<RgbaImage>,
    settings: SamplerSettings,
) -> Result<Step> {
    let source = Arc::clone(source);
    let work = tokio::task::spawn_blocking(move || {
        let frame = match source.grab_frame() {
            Ok(frame) => frame,
            Err(err) => return Step::Failed(err),
        };
        let current = downscale(&frame, settings.width, settings.height);
        let score = previous
            .as_ref()
            .and_then(|previous| diff_score(previous, &current));
        Step::Compared(current, score)
    });

    match tokio::time::timeout(CAPTURE_TIMEOUT, work).await {
        Ok(joined) => joined.map_err(|err| anyhow!("frame worker join failed: {err}")),
        Err(_) => Err(anyhow!("frame capture timed out after {:?}", CAPTURE_TIMEOUT)),
    }
}

fn record_score(tracker: &mut MotionTracker, score: f64, links: &SamplerLinks) {
    let fired = tracker.record(score, Instant::now(), links.clock.now());
    let sample = tracker.last_sample();
    let event_count = tracker.event_count();

    links.status.send_modify(|status| {
        status.last_sample = sample;
        status.event_count = event_count;
        if fired {
            status.motion_active = true;
        }
    });

    if fired {
        log_debug!("motion detected (score {score:.3}, {event_count} events)");
        emit(
            &links.events,
            SessionEvent::MotionDetected { score, event_count },
        );
    }
}

fn is_fatal(err: &DeviceError) -> bool {
    matches!(
        err,
        DeviceError::Revoked | DeviceError::PermissionDenied | DeviceError::NotFound
    )
}

fn fail(links: &SamplerLinks, err: DeviceError) {
    log_error!("frame sampler stopped: {err}");
    links.status.send_modify(|status| {
        status.state = SamplerState::Failed;
        status.motion_active = false;
        status.error = Some(err.to_string());
    });
    emit(
        &links.events,
        SessionEvent::SamplerFailed {
            reason: err.to_string(),
        },
    );
    links.gate.revoke(err);
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
