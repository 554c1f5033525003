use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use super::{format_remaining, Clock, ClockStatus, ClockTransition, DeadlineState};
use crate::{
    config::ProctorConfig,
    events::{emit, EventSender, SessionEvent},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClockSnapshot {
    pub status: ClockStatus,
    pub due_time: Option<DateTime<Utc>>,
    pub remaining_ms: i64,
    pub remaining_display: String,
    pub notice_visible: bool,
}

/// Counts down to a server-issued absolute deadline with a fixed tick.
#[derive(Clone)]
pub struct DeadlineClock {
    state: Arc<Mutex<DeadlineState>>,
    clock: Arc<dyn Clock>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
    warning_window: Duration,
    notice_duration: Duration,
    events: EventSender,
}

impl DeadlineClock {
    pub fn new(clock: Arc<dyn Clock>, config: &ProctorConfig, events: EventSender) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeadlineState::new())),
            clock,
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: config.tick_interval(),
            warning_window: Duration::from_secs(config.warning_window_secs),
            notice_duration: config.warning_notice(),
            events,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Starts (or restarts) ticking towards `due_time`. The deadline is taken
    /// as given, so a resumed session keeps the time already spent. The
    /// returned receiver resolves once when the deadline passes; it errors if
    /// the clock is stopped first.
    pub async fn start(&self, due_time: DateTime<Utc>) -> oneshot::Receiver<()> {
        let (expired_tx, expired_rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.begin(due_time, self.clock.now());
            log_info!(
                "deadline clock started, due {} ({} remaining)",
                due_time.to_rfc3339(),
                format_remaining(state.remaining_secs())
            );
        }

        self.spawn_ticker(expired_tx).await;
        expired_rx
    }

    pub async fn stop(&self) {
        self.cancel_ticker().await;
        let mut state = self.state.lock().await;
        if state.status != ClockStatus::Expired {
            state.stop();
        }
    }

    pub async fn status(&self) -> ClockStatus {
        self.state.lock().await.status
    }

    pub async fn snapshot(&self) -> ClockSnapshot {
        let mut state = self.state.lock().await;
        if let Some(due_time) = state.due_time {
            if state.status != ClockStatus::Idle {
                state.remaining_ms = super::state::remaining_ms(due_time, self.clock.now());
            }
        }
        ClockSnapshot {
            status: state.status,
            due_time: state.due_time,
            remaining_ms: state.remaining_ms,
            remaining_display: format_remaining(state.remaining_secs()),
            notice_visible: state.notice_visible(),
        }
    }

    async fn spawn_ticker(&self, expired_tx: oneshot::Sender<()>) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let clock = self.clock.clone();
        let events = self.events.clone();
        let tick_interval = self.tick_interval;
        let warning_window = self.warning_window;
        let notice_duration = self.notice_duration;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut expired_tx = Some(expired_tx);

            loop {
                interval.tick().await;

                let (transitions, remaining_secs) = {
                    let mut guard = state.lock().await;
                    let transitions =
                        guard.advance(clock.now(), Instant::now(), warning_window, notice_duration);
                    (transitions, guard.remaining_secs())
                };

                emit(&events, SessionEvent::Tick { remaining_secs });

                for transition in transitions {
                    match transition {
                        ClockTransition::WarningEntered { remaining_secs } => {
                            log_warn!(
                                "{} left on the exam clock",
                                format_remaining(remaining_secs)
                            );
                            emit(&events, SessionEvent::WarningShown { remaining_secs });
                        }
                        ClockTransition::NoticeDismissed => {
                            log_debug!("time warning notice dismissed");
                            emit(&events, SessionEvent::WarningDismissed);
                        }
                        ClockTransition::Expired => {
                            log_info!("exam deadline reached");
                            emit(&events, SessionEvent::Expired);
                            if let Some(tx) = expired_tx.take() {
                                let _ = tx.send(());
                            }
                        }
                    }
                }

                if expired_tx.is_none() {
                    break;
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}
