//! Inactivity timeout tracking.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Minutes of inactivity before the warning fires.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 30;

/// Further minutes of inactivity before the forced logout fires.
pub const DEFAULT_GRACE_MINUTES: u64 = 5;

/// Interaction kinds that count as user activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Pointer,
    Key,
    Scroll,
    Touch,
}

/// Signal raised when the idle clock crosses a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardSignal {
    /// The inactivity timeout elapsed; the grace period is running.
    TimeoutWarning,
    /// The grace period also elapsed; the session must end.
    ForcedLogout,
}

/// Timeout and grace durations.
#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    pub timeout: Duration,
    pub grace: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::minutes(DEFAULT_TIMEOUT_MINUTES as i64),
            grace: Duration::minutes(DEFAULT_GRACE_MINUTES as i64),
        }
    }
}

impl GuardConfig {
    /// Config from whole minutes.
    pub fn from_minutes(timeout_minutes: u64, grace_minutes: u64) -> Self {
        Self {
            timeout: Duration::minutes(timeout_minutes as i64),
            grace: Duration::minutes(grace_minutes as i64),
        }
    }
}

/// Rolling inactivity timer with a warning threshold and a grace period.
///
/// Pure clock arithmetic: callers feed it activity and poll it with a
/// timestamp, so the whole state machine is testable without waiting.
/// Each threshold raises its signal once per idle episode; activity
/// during the grace period cancels the pending logout. Once expired, the
/// guard stays expired until `reset`.
pub struct SessionGuard {
    config: GuardConfig,
    last_activity: DateTime<Utc>,
    warned: bool,
    expired: bool,
}

impl SessionGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            last_activity: Utc::now(),
            warned: false,
            expired: false,
        }
    }

    /// Count an interaction as activity, resetting the idle clock.
    ///
    /// Ignored once the guard has expired; only `reset` revives it.
    pub fn record_activity(&mut self, kind: ActivityKind) {
        self.record_activity_at(kind, Utc::now());
    }

    /// `record_activity` with an explicit clock, for tests and replays.
    pub fn record_activity_at(&mut self, kind: ActivityKind, now: DateTime<Utc>) {
        if self.expired {
            tracing::debug!(?kind, "Activity after expiry ignored");
            return;
        }
        self.last_activity = now;
        self.warned = false;
    }

    /// Check the idle clock against the thresholds.
    pub fn evaluate(&mut self) -> Option<GuardSignal> {
        self.evaluate_at(Utc::now())
    }

    /// `evaluate` with an explicit clock, for tests and replays.
    pub fn evaluate_at(&mut self, now: DateTime<Utc>) -> Option<GuardSignal> {
        if self.expired {
            return None;
        }
        let idle = now - self.last_activity;
        if idle >= self.config.timeout + self.config.grace {
            self.warned = true;
            self.expired = true;
            return Some(GuardSignal::ForcedLogout);
        }
        if idle >= self.config.timeout && !self.warned {
            self.warned = true;
            return Some(GuardSignal::TimeoutWarning);
        }
        None
    }

    /// Start a fresh idle episode (e.g. after the logout was handled).
    pub fn reset(&mut self) {
        self.last_activity = Utc::now();
        self.warned = false;
        self.expired = false;
    }

    /// Whether the forced logout already fired.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Whether the warning fired for the current idle episode.
    pub fn is_warned(&self) -> bool {
        self.warned
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn config(&self) -> GuardConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SessionGuard {
        SessionGuard::new(GuardConfig::default())
    }

    fn after(guard: &SessionGuard, minutes: i64) -> DateTime<Utc> {
        guard.last_activity() + Duration::minutes(minutes)
    }

    #[test]
    fn quiet_before_timeout() {
        let mut g = guard();
        let at = after(&g, 29);
        assert_eq!(g.evaluate_at(at), None);
        assert!(!g.is_warned());
    }

    #[test]
    fn warning_fires_once_at_timeout() {
        let mut g = guard();
        let at = after(&g, 30);
        assert_eq!(g.evaluate_at(at), Some(GuardSignal::TimeoutWarning));
        // Polling again inside the grace period stays quiet.
        assert_eq!(g.evaluate_at(after(&g, 32)), None);
        assert!(g.is_warned());
        assert!(!g.is_expired());
    }

    #[test]
    fn logout_fires_after_grace() {
        let mut g = guard();
        assert_eq!(
            g.evaluate_at(after(&g, 30)),
            Some(GuardSignal::TimeoutWarning)
        );
        assert_eq!(
            g.evaluate_at(after(&g, 35)),
            Some(GuardSignal::ForcedLogout)
        );
        assert!(g.is_expired());
        // Once expired, nothing more fires.
        assert_eq!(g.evaluate_at(after(&g, 60)), None);
    }

    #[test]
    fn logout_fires_directly_when_poll_skips_the_warning() {
        // A sleeping process may first poll long after both thresholds.
        let mut g = guard();
        assert_eq!(
            g.evaluate_at(after(&g, 36)),
            Some(GuardSignal::ForcedLogout)
        );
    }

    #[test]
    fn activity_resets_the_idle_clock() {
        let mut g = guard();
        let base = g.last_activity();
        g.record_activity_at(ActivityKind::Key, base + Duration::minutes(20));
        // 29 minutes after the new activity, nothing fires.
        assert_eq!(g.evaluate_at(base + Duration::minutes(49)), None);
        assert_eq!(
            g.evaluate_at(base + Duration::minutes(50)),
            Some(GuardSignal::TimeoutWarning)
        );
    }

    #[test]
    fn activity_during_grace_cancels_the_logout() {
        let mut g = guard();
        let base = g.last_activity();
        assert_eq!(
            g.evaluate_at(base + Duration::minutes(30)),
            Some(GuardSignal::TimeoutWarning)
        );
        g.record_activity_at(ActivityKind::Pointer, base + Duration::minutes(32));
        assert_eq!(g.evaluate_at(base + Duration::minutes(36)), None);
        assert!(!g.is_expired());
        // The next idle episode warns again.
        assert_eq!(
            g.evaluate_at(base + Duration::minutes(62)),
            Some(GuardSignal::TimeoutWarning)
        );
    }

    #[test]
    fn activity_after_expiry_is_ignored_until_reset() {
        let mut g = guard();
        let base = g.last_activity();
        g.evaluate_at(base + Duration::minutes(40));
        assert!(g.is_expired());

        g.record_activity_at(ActivityKind::Touch, base + Duration::minutes(41));
        assert!(g.is_expired());
        assert_eq!(g.evaluate_at(base + Duration::minutes(90)), None);

        g.reset();
        assert!(!g.is_expired());
        assert_eq!(g.evaluate_at(g.last_activity() + Duration::minutes(5)), None);
    }

    #[test]
    fn every_activity_kind_resets() {
        for kind in [
            ActivityKind::Pointer,
            ActivityKind::Key,
            ActivityKind::Scroll,
            ActivityKind::Touch,
        ] {
            let mut g = guard();
            let base = g.last_activity();
            g.record_activity_at(kind, base + Duration::minutes(29));
            assert_eq!(g.evaluate_at(base + Duration::minutes(31)), None);
        }
    }

    #[test]
    fn custom_thresholds_apply() {
        let mut g = SessionGuard::new(GuardConfig::from_minutes(10, 2));
        let base = g.last_activity();
        assert_eq!(g.evaluate_at(base + Duration::minutes(9)), None);
        assert_eq!(
            g.evaluate_at(base + Duration::minutes(10)),
            Some(GuardSignal::TimeoutWarning)
        );
        assert_eq!(
            g.evaluate_at(base + Duration::minutes(12)),
            Some(GuardSignal::ForcedLogout)
        );
    }
}
