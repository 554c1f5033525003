pub mod clock;
pub mod controller;
mod state;

pub use clock::{AnchoredClock, Clock};
pub use controller::{ClockSnapshot, DeadlineClock};
pub use state::{ClockStatus, ClockTransition, DeadlineState};

/// `HH:MM:SS` for the remaining-time display.
pub fn format_remaining(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}
