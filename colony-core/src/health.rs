//! Per-worker health state machine and restart policy.
//!
//! Both halves are pure: [`HealthState::observe`] folds one liveness
//! observation into the state machine, and [`RestartPolicy::decide`]
//! maps a state to a recovery [`Action`]. Neither touches the OS, so the
//! full recovery behavior is unit-testable without spawning processes.
//!
//! State diagram:
//!
//! ```text
//! Starting ──pass──▶ Healthy ◀──pass── Unresponsive
//!    │                  │ N fails          │
//!    │                  └──────────────────┘
//!    └───exit──▶ Crashed ◀──exit── (Healthy | Unresponsive)
//!                   │ restart (budget left)
//!                   └──▶ Starting
//! any ──stop──▶ Stopped (terminal)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Discrete health states. `Stopped` is terminal for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unresponsive,
    Crashed,
    Stopped,
}

/// One result of a liveness sweep for a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// OS process alive and (if configured) heartbeat fresh.
    CheckPassed,
    /// OS process alive but the check failed (stale heartbeat).
    CheckFailed,
    /// The OS reported the process gone without a stop request.
    ProcessExited,
    /// Explicit operator/reconciler stop.
    StopRequested,
}

/// Health tracking for one worker instance.
///
/// Single-writer: only the health monitor sweep mutates this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub restart_count: u32,
    pub last_transition_at: DateTime<Utc>,
}

impl HealthState {
    /// Fresh state for a just-spawned worker.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::Starting,
            consecutive_failures: 0,
            restart_count: 0,
            last_transition_at: now,
        }
    }

    /// Fold one observation into the state machine.
    ///
    /// `failure_threshold` is the number of consecutive failed checks that
    /// debounces `Healthy` into `Unresponsive`. Returns `true` if the
    /// status changed.
    pub fn observe(
        &mut self,
        observation: Observation,
        failure_threshold: u32,
        now: DateTime<Utc>,
    ) -> bool {
        let next = match (self.status, observation) {
            (_, Observation::StopRequested) => Some(HealthStatus::Stopped),

            (HealthStatus::Stopped, _) => None,

            (HealthStatus::Starting, Observation::CheckPassed) => Some(HealthStatus::Healthy),
            (HealthStatus::Unresponsive, Observation::CheckPassed) => Some(HealthStatus::Healthy),
            (HealthStatus::Healthy, Observation::CheckPassed) => None,

            (HealthStatus::Healthy, Observation::CheckFailed)
                if self.consecutive_failures + 1 >= failure_threshold =>
            {
                Some(HealthStatus::Unresponsive)
            }
            (_, Observation::CheckFailed) => None,

            (
                HealthStatus::Starting | HealthStatus::Healthy | HealthStatus::Unresponsive,
                Observation::ProcessExited,
            ) => Some(HealthStatus::Crashed),
            (HealthStatus::Crashed, Observation::ProcessExited) => None,

            // Checks against crashed workers are no-ops; recovery is the
            // policy's job, not the probe's.
            (HealthStatus::Crashed, _) => None,
        };

        match observation {
            Observation::CheckPassed => self.consecutive_failures = 0,
            Observation::CheckFailed => self.consecutive_failures += 1,
            Observation::ProcessExited | Observation::StopRequested => {
                self.consecutive_failures = 0
            }
        }

        match next {
            Some(status) if status != self.status => {
                self.status = status;
                self.last_transition_at = now;
                true
            }
            _ => false,
        }
    }

    /// Record an automatic restart: `Crashed` → `Starting`, burning one
    /// unit of restart budget. Any other state is left untouched.
    pub fn mark_restarted(&mut self, now: DateTime<Utc>) {
        if self.status == HealthStatus::Crashed {
            self.status = HealthStatus::Starting;
            self.restart_count += 1;
            self.consecutive_failures = 0;
            self.last_transition_at = now;
        }
    }

    /// Record a restart attempt that failed to spawn: budget is burned
    /// and the backoff clock restarts, but the worker stays `Crashed`.
    pub fn mark_restart_failed(&mut self, now: DateTime<Utc>) {
        if self.status == HealthStatus::Crashed {
            self.restart_count += 1;
            self.last_transition_at = now;
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == HealthStatus::Stopped
    }
}

// ---------------------------------------------------------------------------
// Restart policy
// ---------------------------------------------------------------------------

/// Recovery decision for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Restart, but not before `after` has elapsed since the crash.
    Retry { after: Duration },
    /// Restart budget exhausted; leave in `Crashed` and report.
    GiveUp,
    /// Nothing to do (worker is not crashed).
    NoAction,
}

/// Pure restart policy: budget plus exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Maximum automatic restarts per worker instance.
    pub max_restarts: u32,
    /// Backoff before the first restart; doubles per subsequent restart.
    pub base_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Decide what to do about `state`.
    pub fn decide(&self, state: &HealthState) -> Action {
        if state.status != HealthStatus::Crashed {
            return Action::NoAction;
        }
        if state.restart_count >= self.max_restarts {
            return Action::GiveUp;
        }
        Action::Retry {
            after: self.backoff_for(state.restart_count),
        }
    }

    /// Backoff before restart number `restart_count + 1`: base × 2^count,
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, restart_count: u32) -> Duration {
        let doubled = self
            .base_backoff
            .checked_mul(1u32.checked_shl(restart_count).unwrap_or(u32::MAX))
            .unwrap_or(self.max_backoff);
        doubled.min(self.max_backoff)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: u32 = 3;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn starting_becomes_healthy_on_first_pass() {
        let mut state = HealthState::new(now());
        assert!(state.observe(Observation::CheckPassed, THRESHOLD, now()));
        assert_eq!(state.status, HealthStatus::Healthy);
    }

    #[test]
    fn healthy_debounces_into_unresponsive() {
        let mut state = HealthState::new(now());
        state.observe(Observation::CheckPassed, THRESHOLD, now());

        // Two failures: still healthy (below threshold).
        assert!(!state.observe(Observation::CheckFailed, THRESHOLD, now()));
        assert!(!state.observe(Observation::CheckFailed, THRESHOLD, now()));
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.consecutive_failures, 2);

        // Third consecutive failure trips the debounce.
        assert!(state.observe(Observation::CheckFailed, THRESHOLD, now()));
        assert_eq!(state.status, HealthStatus::Unresponsive);
    }

    #[test]
    fn flap_recovery_without_restart() {
        let mut state = HealthState::new(now());
        state.observe(Observation::CheckPassed, THRESHOLD, now());
        for _ in 0..THRESHOLD {
            state.observe(Observation::CheckFailed, THRESHOLD, now());
        }
        assert_eq!(state.status, HealthStatus::Unresponsive);

        assert!(state.observe(Observation::CheckPassed, THRESHOLD, now()));
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.restart_count, 0, "flap recovery must not restart");
    }

    #[test]
    fn pass_resets_failure_streak() {
        let mut state = HealthState::new(now());
        state.observe(Observation::CheckPassed, THRESHOLD, now());
        state.observe(Observation::CheckFailed, THRESHOLD, now());
        state.observe(Observation::CheckFailed, THRESHOLD, now());
        state.observe(Observation::CheckPassed, THRESHOLD, now());
        // Streak restarted: two more failures are still below threshold.
        state.observe(Observation::CheckFailed, THRESHOLD, now());
        state.observe(Observation::CheckFailed, THRESHOLD, now());
        assert_eq!(state.status, HealthStatus::Healthy);
    }

    #[test]
    fn exit_is_crash_from_any_live_state() {
        for prime in [
            Vec::new(),
            vec![Observation::CheckPassed],
            vec![
                Observation::CheckPassed,
                Observation::CheckFailed,
                Observation::CheckFailed,
                Observation::CheckFailed,
            ],
        ] {
            let mut state = HealthState::new(now());
            for obs in prime {
                state.observe(obs, THRESHOLD, now());
            }
            state.observe(Observation::ProcessExited, THRESHOLD, now());
            assert_eq!(state.status, HealthStatus::Crashed);
        }
    }

    #[test]
    fn stop_is_terminal() {
        let mut state = HealthState::new(now());
        state.observe(Observation::StopRequested, THRESHOLD, now());
        assert_eq!(state.status, HealthStatus::Stopped);
        assert!(state.is_terminal());

        // No observation resurrects a stopped worker.
        state.observe(Observation::CheckPassed, THRESHOLD, now());
        state.observe(Observation::ProcessExited, THRESHOLD, now());
        assert_eq!(state.status, HealthStatus::Stopped);
    }

    #[test]
    fn mark_restarted_burns_budget_and_returns_to_starting() {
        let mut state = HealthState::new(now());
        state.observe(Observation::ProcessExited, THRESHOLD, now());
        state.mark_restarted(now());
        assert_eq!(state.status, HealthStatus::Starting);
        assert_eq!(state.restart_count, 1);

        // Restarting a non-crashed worker is a no-op.
        state.mark_restarted(now());
        assert_eq!(state.restart_count, 1);
    }

    #[test]
    fn failed_restart_attempt_burns_budget_without_leaving_crashed() {
        let mut state = HealthState::new(now());
        state.observe(Observation::ProcessExited, THRESHOLD, now());
        state.mark_restart_failed(now());
        assert_eq!(state.status, HealthStatus::Crashed);
        assert_eq!(state.restart_count, 1);
    }

    #[test]
    fn policy_gives_up_after_budget() {
        let policy = RestartPolicy::default();
        let mut state = HealthState::new(now());

        for expected_count in 0..policy.max_restarts {
            state.observe(Observation::ProcessExited, THRESHOLD, now());
            match policy.decide(&state) {
                Action::Retry { .. } => {}
                other => panic!("expected Retry at count {expected_count}, got {other:?}"),
            }
            state.mark_restarted(now());
        }

        state.observe(Observation::ProcessExited, THRESHOLD, now());
        assert_eq!(policy.decide(&state), Action::GiveUp);
        assert_eq!(state.restart_count, policy.max_restarts);

        // Still GiveUp on every later sweep; never a max+1-th retry.
        assert_eq!(policy.decide(&state), Action::GiveUp);
    }

    #[test]
    fn policy_noop_for_live_worker() {
        let policy = RestartPolicy::default();
        let mut state = HealthState::new(now());
        assert_eq!(policy.decide(&state), Action::NoAction);
        state.observe(Observation::CheckPassed, THRESHOLD, now());
        assert_eq!(policy.decide(&state), Action::NoAction);
    }

    #[rstest::rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(6, 8)] // capped
    #[case(40, 8)] // shift overflow capped
    fn backoff_doubles_and_caps(#[case] restart_count: u32, #[case] expected_secs: u64) {
        let policy = RestartPolicy {
            max_restarts: 10,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        };
        assert_eq!(
            policy.backoff_for(restart_count),
            Duration::from_secs(expected_secs)
        );
    }
}
