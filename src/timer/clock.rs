use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

/// Source of wall-clock time for deadline arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall time derived from a monotonic anchor: immune to system clock jumps
/// during a session and deterministic under a paused tokio clock.
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl AnchoredClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(wall_anchor: DateTime<Utc>) -> Self {
        Self {
            wall_anchor,
            mono_anchor: Instant::now(),
        }
    }
}

impl Default for AnchoredClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.mono_anchor.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.wall_anchor + elapsed
    }
}
