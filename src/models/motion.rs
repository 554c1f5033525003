use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One frame comparison. Only the latest sample is retained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MotionSample {
    pub timestamp: DateTime<Utc>,
    pub diff_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SamplerState {
    Idle,
    Running,
    Stopped,
    Failed,
}

impl Default for SamplerState {
    fn default() -> Self {
        SamplerState::Idle
    }
}

/// What the motion and recording indicators render.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MotionStatus {
    pub state: SamplerState,
    pub motion_active: bool,
    pub event_count: u64,
    pub last_sample: Option<MotionSample>,
    pub error: Option<String>,
}

impl MotionStatus {
    pub fn recording(&self) -> bool {
        self.state == SamplerState::Running
    }
}
