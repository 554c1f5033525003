use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::{
    error::DeviceError,
    events::{emit, EventSender, SessionEvent},
    sensing::{CaptureDevice, VideoSource},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionState {
    pub granted: bool,
    /// Why access is unavailable, if an attempt failed or access was lost.
    pub failure: Option<DeviceError>,
}

/// Tracks whether the camera is authorised and usable. Not persisted; a
/// reloaded page starts ungranted and must ask again.
#[derive(Clone)]
pub struct PermissionGate {
    state: Arc<watch::Sender<PermissionState>>,
    events: EventSender,
}

impl PermissionGate {
    pub fn new(events: EventSender) -> Self {
        let (state, _) = watch::channel(PermissionState::default());
        Self {
            state: Arc::new(state),
            events,
        }
    }

    /// One attempt to open the device. No automatic retry.
    pub async fn request_access(
        &self,
        device: &dyn CaptureDevice,
    ) -> Result<Arc<dyn VideoSource>, DeviceError> {
        match device.open().await {
            Ok(source) => {
                log_info!("camera access granted");
                self.set(PermissionState {
                    granted: true,
                    failure: None,
                });
                Ok(source)
            }
            Err(err) => {
                log_warn!("camera access failed: {err}");
                self.set(PermissionState {
                    granted: false,
                    failure: Some(err.clone()),
                });
                Err(err)
            }
        }
    }

    pub fn is_granted(&self) -> bool {
        self.state.borrow().granted
    }

    pub fn state(&self) -> PermissionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PermissionState> {
        self.state.subscribe()
    }

    /// Access lost mid-session (device unplugged or permission withdrawn).
    pub fn revoke(&self, reason: DeviceError) {
        if !self.is_granted() {
            return;
        }
        log_warn!("camera access revoked: {reason}");
        self.set(PermissionState {
            granted: false,
            failure: Some(reason),
        });
    }

    fn set(&self, next: PermissionState) {
        let granted = next.granted;
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            emit(&self.events, SessionEvent::PermissionChanged { granted });
        }
    }
}
