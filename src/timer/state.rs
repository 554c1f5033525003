use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ClockStatus {
    Idle,
    Running,
    Warning,
    Expired,
}

impl Default for ClockStatus {
    fn default() -> Self {
        ClockStatus::Idle
    }
}

/// Something a tick changed that observers need to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTransition {
    WarningEntered { remaining_secs: i64 },
    NoticeDismissed,
    Expired,
}

#[derive(Debug, Clone, Default)]
pub struct DeadlineState {
    pub status: ClockStatus,
    pub due_time: Option<DateTime<Utc>>,
    pub remaining_ms: i64,
    /// Set once the warning notice has fired for this deadline; it never fires twice.
    pub warning_shown: bool,
    pub notice_until: Option<Instant>,
}

impl DeadlineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, due_time: DateTime<Utc>, now: DateTime<Utc>) {
        *self = Self {
            status: ClockStatus::Running,
            due_time: Some(due_time),
            remaining_ms: remaining_ms(due_time, now),
            warning_shown: false,
            notice_until: None,
        };
    }

    pub fn remaining_secs(&self) -> i64 {
        self.remaining_ms / 1_000
    }

    pub fn notice_visible(&self) -> bool {
        self.notice_until.is_some()
    }

    /// Re-evaluates the deadline at `now`. Expiry is reported exactly once;
    /// once expired the state no longer changes.
    pub fn advance(
        &mut self,
        now: DateTime<Utc>,
        mono_now: Instant,
        warning_window: Duration,
        notice_duration: Duration,
    ) -> Vec<ClockTransition> {
        let mut transitions = Vec::new();
        let Some(due_time) = self.due_time else {
            return transitions;
        };
        if matches!(self.status, ClockStatus::Idle | ClockStatus::Expired) {
            return transitions;
        }

        self.remaining_ms = remaining_ms(due_time, now);

        if let Some(until) = self.notice_until {
            if mono_now >= until {
                self.notice_until = None;
                transitions.push(ClockTransition::NoticeDismissed);
            }
        }

        if self.remaining_ms <= 0 {
            self.status = ClockStatus::Expired;
            if self.notice_until.take().is_some() {
                transitions.push(ClockTransition::NoticeDismissed);
            }
            transitions.push(ClockTransition::Expired);
            return transitions;
        }

        let window_ms = warning_window.as_millis() as i64;
        if self.status == ClockStatus::Running && self.remaining_ms <= window_ms {
            self.status = ClockStatus::Warning;
            if !self.warning_shown {
                self.warning_shown = true;
                self.notice_until = Some(mono_now + notice_duration);
                transitions.push(ClockTransition::WarningEntered {
                    remaining_secs: self.remaining_secs(),
                });
            }
        }

        transitions
    }

    pub fn stop(&mut self) {
        *self = Self::default();
    }
}

/// `max(0, due_time - now)` in milliseconds.
pub fn remaining_ms(due_time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (due_time - now).num_milliseconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const WINDOW: Duration = Duration::from_secs(300);
    const NOTICE: Duration = Duration::from_secs(10);

    fn started(due_in_secs: i64) -> (DeadlineState, DateTime<Utc>) {
        let now = Utc::now();
        let mut state = DeadlineState::new();
        state.begin(now + ChronoDuration::seconds(due_in_secs), now);
        (state, now)
    }

    #[test]
    fn remaining_never_goes_negative() {
        let now = Utc::now();
        assert_eq!(remaining_ms(now - ChronoDuration::seconds(5), now), 0);
        assert_eq!(remaining_ms(now + ChronoDuration::seconds(5), now), 5_000);
    }

    #[test]
    fn warning_fires_once_then_notice_dismisses() {
        let (mut state, now) = started(301);
        let mono = Instant::now();

        assert!(state.advance(now, mono, WINDOW, NOTICE).is_empty());
        assert_eq!(state.status, ClockStatus::Running);

        let t1 = now + ChronoDuration::seconds(1);
        let transitions = state.advance(t1, mono, WINDOW, NOTICE);
        assert_eq!(
            transitions,
            vec![ClockTransition::WarningEntered { remaining_secs: 300 }]
        );
        assert!(state.notice_visible());

        let t2 = now + ChronoDuration::seconds(2);
        assert!(state.advance(t2, mono + Duration::from_secs(1), WINDOW, NOTICE).is_empty());

        let t11 = now + ChronoDuration::seconds(11);
        assert_eq!(
            state.advance(t11, mono + NOTICE, WINDOW, NOTICE),
            vec![ClockTransition::NoticeDismissed]
        );
        assert_eq!(state.status, ClockStatus::Warning);
    }

    #[test]
    fn warning_does_not_repeat_when_window_is_reentered() {
        let (mut state, now) = started(200);
        let mono = Instant::now();
        assert_eq!(state.advance(now, mono, WINDOW, NOTICE).len(), 1);

        // A clock correction that lifts remaining back above the window and
        // then below it again must not show a second notice.
        state.status = ClockStatus::Running;
        let transitions = state.advance(
            now + ChronoDuration::seconds(1),
            mono + NOTICE,
            WINDOW,
            NOTICE,
        );
        assert_eq!(transitions, vec![ClockTransition::NoticeDismissed]);
        assert_eq!(state.status, ClockStatus::Warning);
    }

    #[test]
    fn expiry_is_reported_exactly_once() {
        let (mut state, now) = started(2);
        let mono = Instant::now();
        let later = now + ChronoDuration::seconds(3);

        let first = state.advance(later, mono, WINDOW, NOTICE);
        assert!(first.contains(&ClockTransition::Expired));
        assert_eq!(state.status, ClockStatus::Expired);
        assert_eq!(state.remaining_ms, 0);

        assert!(state.advance(later, mono, WINDOW, NOTICE).is_empty());
        assert!(state
            .advance(later + ChronoDuration::seconds(1), mono, WINDOW, NOTICE)
            .is_empty());
    }

    #[test]
    fn past_due_time_expires_on_first_tick() {
        let (mut state, now) = started(-30);
        let transitions = state.advance(now, Instant::now(), WINDOW, NOTICE);
        assert_eq!(transitions, vec![ClockTransition::Expired]);
    }
}
