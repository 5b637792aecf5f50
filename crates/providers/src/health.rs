//! Per-provider health bookkeeping.
//!
//! Failures since the last success are kept as timestamps so the burst
//! windows can be evaluated exactly. Health only worsens on failure and is
//! restored to healthy by a single success.

use ava_domain::config::HealthThresholds;
use ava_domain::provider::ProviderHealth;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct HealthPolicy {
    degraded_failures: usize,
    degraded_window: Duration,
    unavailable_failures: usize,
    unavailable_window: Duration,
}

impl HealthPolicy {
    pub fn new(t: &HealthThresholds) -> Self {
        Self {
            degraded_failures: t.degraded_failures as usize,
            degraded_window: Duration::from_secs(t.degraded_window_secs),
            unavailable_failures: t.unavailable_failures as usize,
            unavailable_window: Duration::from_secs(t.unavailable_window_secs),
        }
    }

    fn horizon(&self) -> Duration {
        self.degraded_window.max(self.unavailable_window)
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::new(&HealthThresholds::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthState {
    pub health: ProviderHealth,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    recent_failures: VecDeque<Instant>,
}

fn severity(h: ProviderHealth) -> u8 {
    match h {
        ProviderHealth::Healthy => 0,
        ProviderHealth::Degraded => 1,
        ProviderHealth::Unavailable => 2,
    }
}

impl HealthState {
    /// Reset after a success. Returns the previous health if it changed.
    pub fn record_success(&mut self, at: DateTime<Utc>) -> Option<ProviderHealth> {
        self.consecutive_failures = 0;
        self.recent_failures.clear();
        self.last_success = Some(at);
        self.transition(ProviderHealth::Healthy)
    }

    /// Count a failure observed at `now`. Returns the previous health if it changed.
    pub fn record_failure(&mut self, policy: &HealthPolicy, now: Instant) -> Option<ProviderHealth> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.recent_failures.push_back(now);
        while let Some(&oldest) = self.recent_failures.front() {
            if now.saturating_duration_since(oldest) > policy.horizon() {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }

        let within = |window: Duration| {
            self.recent_failures
                .iter()
                .filter(|t| now.saturating_duration_since(**t) <= window)
                .count()
        };

        let target = if within(policy.unavailable_window) >= policy.unavailable_failures {
            ProviderHealth::Unavailable
        } else if within(policy.degraded_window) >= policy.degraded_failures {
            ProviderHealth::Degraded
        } else {
            self.health
        };

        if severity(target) > severity(self.health) {
            self.transition(target)
        } else {
            None
        }
    }

    fn transition(&mut self, to: ProviderHealth) -> Option<ProviderHealth> {
        if self.health == to {
            return None;
        }
        Some(std::mem::replace(&mut self.health, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_n(state: &mut HealthState, policy: &HealthPolicy, start: Instant, n: u64, gap: Duration) {
        for i in 0..n {
            state.record_failure(policy, start + gap * i as u32);
        }
    }

    #[test]
    fn three_quick_failures_degrade() {
        let policy = HealthPolicy::default();
        let mut s = HealthState::default();
        let t0 = Instant::now();
        fail_n(&mut s, &policy, t0, 2, Duration::from_secs(1));
        assert_eq!(s.health, ProviderHealth::Healthy);
        let prev = s.record_failure(&policy, t0 + Duration::from_secs(3));
        assert_eq!(prev, Some(ProviderHealth::Healthy));
        assert_eq!(s.health, ProviderHealth::Degraded);
        assert_eq!(s.consecutive_failures, 3);
    }

    #[test]
    fn spread_out_failures_stay_healthy() {
        let policy = HealthPolicy::default();
        let mut s = HealthState::default();
        fail_n(&mut s, &policy, Instant::now(), 3, Duration::from_secs(40));
        assert_eq!(s.health, ProviderHealth::Healthy);
        assert_eq!(s.consecutive_failures, 3);
    }

    #[test]
    fn eight_failures_in_five_minutes_make_unavailable() {
        let policy = HealthPolicy::default();
        let mut s = HealthState::default();
        fail_n(&mut s, &policy, Instant::now(), 8, Duration::from_secs(30));
        assert_eq!(s.health, ProviderHealth::Unavailable);
    }

    #[test]
    fn one_success_restores_healthy() {
        let policy = HealthPolicy::default();
        let mut s = HealthState::default();
        fail_n(&mut s, &policy, Instant::now(), 8, Duration::from_millis(10));
        assert_eq!(s.health, ProviderHealth::Unavailable);
        let now = Utc::now();
        assert_eq!(s.record_success(now), Some(ProviderHealth::Unavailable));
        assert_eq!(s.health, ProviderHealth::Healthy);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.last_success, Some(now));
    }
}
