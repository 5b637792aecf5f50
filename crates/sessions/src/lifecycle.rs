//! Idle expiry and purge timing.
//!
//! A session with no activity for `idle_timeout` is expired (its active
//! flag flips off and it is finalized). Expired sessions are physically
//! removed once `purge_grace` has passed since finalization.

use chrono::{DateTime, Duration, Utc};

use ava_domain::config::SessionsConfig;
use ava_domain::session::Session;

/// Why a session stopped accepting turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    IdleTimeout { idle_minutes: u64 },
    Explicit,
}

impl std::fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdleTimeout { idle_minutes } => write!(f, "idle timeout ({idle_minutes}m)"),
            Self::Explicit => f.write_str("explicit expiry"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleManager {
    idle_minutes: u64,
    idle_timeout: Duration,
    purge_grace: Duration,
}

impl LifecycleManager {
    pub fn new(config: &SessionsConfig) -> Self {
        Self {
            idle_minutes: config.idle_timeout_minutes,
            idle_timeout: Duration::minutes(config.idle_timeout_minutes as i64),
            purge_grace: Duration::hours(config.purge_grace_hours as i64),
        }
    }

    /// Sessions last active before this instant are idle.
    pub fn expiry_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.idle_timeout
    }

    /// Sessions finalized before this instant may be purged.
    pub fn purge_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.purge_grace
    }

    /// Evaluate whether `session` should be expired at `now`, even if the
    /// periodic sweep has not reached it yet.
    pub fn should_expire(&self, session: &Session, now: DateTime<Utc>) -> Option<ExpiryReason> {
        if !session.active {
            return None;
        }
        if session.last_activity < self.expiry_cutoff(now) {
            return Some(ExpiryReason::IdleTimeout {
                idle_minutes: self.idle_minutes,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ava_domain::session::PermissionSet;
    use chrono::TimeZone;

    fn session(last_activity: DateTime<Utc>, active: bool) -> Session {
        Session {
            id: "s1".into(),
            owner_tag: String::new(),
            created_at: last_activity - Duration::hours(1),
            last_activity,
            active,
            degraded: false,
            finalized_at: None,
            permissions: PermissionSet::default(),
            turn_count: 0,
        }
    }

    #[test]
    fn idle_timeout() {
        let mgr = LifecycleManager::new(&SessionsConfig::default());
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let stale = session(now - Duration::minutes(45), true);
        let fresh = session(now - Duration::minutes(5), true);
        assert_eq!(
            mgr.should_expire(&stale, now),
            Some(ExpiryReason::IdleTimeout { idle_minutes: 30 })
        );
        assert_eq!(mgr.should_expire(&fresh, now), None);
    }

    #[test]
    fn inactive_sessions_are_not_expired_twice() {
        let mgr = LifecycleManager::new(&SessionsConfig::default());
        let now = Utc::now();
        assert_eq!(mgr.should_expire(&session(now - Duration::days(2), false), now), None);
    }

    #[test]
    fn cutoffs_follow_config() {
        let cfg = SessionsConfig {
            idle_timeout_minutes: 10,
            purge_grace_hours: 2,
            ..Default::default()
        };
        let mgr = LifecycleManager::new(&cfg);
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(mgr.expiry_cutoff(now), now - Duration::minutes(10));
        assert_eq!(mgr.purge_cutoff(now), now - Duration::hours(2));
    }
}
