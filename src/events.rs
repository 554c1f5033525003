use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::SessionStatus;

pub type EventSender = broadcast::Sender<SessionEvent>;

const EVENT_CAPACITY: usize = 256;

/// Notifications for passive displays (timer, banners, indicators).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StatusChanged { status: SessionStatus },
    Tick { remaining_secs: i64 },
    WarningShown { remaining_secs: i64 },
    WarningDismissed,
    Expired,
    MotionDetected { score: f64, event_count: u64 },
    MotionCleared,
    SamplerFailed { reason: String },
    PermissionChanged { granted: bool },
    AutoSubmitFailed { attempts: u32, reason: String },
    Submitted,
}

pub fn channel() -> EventSender {
    broadcast::channel(EVENT_CAPACITY).0
}

/// Fire-and-forget; having no subscriber is not an error.
pub fn emit(events: &EventSender, event: SessionEvent) {
    let _ = events.send(event);
}
