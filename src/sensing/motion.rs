use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::MotionSample;

/// Turns diff scores into motion events and the self-clearing "active" flag.
#[derive(Debug, Clone)]
pub struct MotionTracker {
    threshold: f64,
    hold: Duration,
    active_until: Option<Instant>,
    event_count: u64,
    last_sample: Option<MotionSample>,
}

impl MotionTracker {
    pub fn new(threshold: f64, hold: Duration) -> Self {
        Self {
            threshold,
            hold,
            active_until: None,
            event_count: 0,
            last_sample: None,
        }
    }

    /// Records one comparison. Returns true when the score raises a motion
    /// event; each event restarts the hold window.
    pub fn record(&mut self, diff_score: f64, at: Instant, timestamp: DateTime<Utc>) -> bool {
        self.last_sample = Some(MotionSample {
            timestamp,
            diff_score,
        });

        if diff_score > self.threshold {
            self.event_count += 1;
            self.active_until = Some(at + self.hold);
            true
        } else {
            false
        }
    }

    /// Clears the flag once the hold window has passed. Returns true on the
    /// transition to inactive.
    pub fn clear_if_elapsed(&mut self, now: Instant) -> bool {
        match self.active_until {
            Some(until) if now >= until => {
                self.active_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn clears_at(&self) -> Option<Instant> {
        self.active_until
    }

    pub fn is_active(&self) -> bool {
        self.active_until.is_some()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn last_sample(&self) -> Option<MotionSample> {
        self.last_sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_secs(3);

    #[test]
    fn only_scores_above_threshold_raise_events() {
        let start = Instant::now();
        let mut tracker = MotionTracker::new(0.10, HOLD);

        let scores = [0.02, 0.10, 0.11, 0.5, 0.09, 0.100001];
        let fired: Vec<bool> = scores
            .iter()
            .map(|score| tracker.record(*score, start, Utc::now()))
            .collect();

        assert_eq!(fired, vec![false, false, true, true, false, true]);
        assert_eq!(tracker.event_count(), 3);
        assert_eq!(tracker.last_sample().unwrap().diff_score, 0.100001);
    }

    #[test]
    fn flag_clears_three_seconds_after_last_event() {
        let start = Instant::now();
        let mut tracker = MotionTracker::new(0.10, HOLD);

        tracker.record(0.4, start, Utc::now());
        let second = start + Duration::from_secs(2);
        tracker.record(0.4, second, Utc::now());

        assert!(!tracker.clear_if_elapsed(start + HOLD));
        assert!(tracker.is_active());

        assert!(tracker.clear_if_elapsed(second + HOLD));
        assert!(!tracker.is_active());
        assert!(!tracker.clear_if_elapsed(second + HOLD * 2));
    }

    #[test]
    fn quiet_samples_do_not_extend_the_window() {
        let start = Instant::now();
        let mut tracker = MotionTracker::new(0.10, HOLD);
        tracker.record(0.3, start, Utc::now());
        tracker.record(0.01, start + Duration::from_secs(2), Utc::now());
        assert_eq!(tracker.clears_at(), Some(start + HOLD));
    }
}
