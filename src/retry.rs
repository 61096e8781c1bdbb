// src/retry.rs

use std::time::Duration;

use crate::models::Job;

/// Thresholds for absorbing transient poll failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated as soft warnings.
    pub error_threshold: u32,
    pub max_retries: u32,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            max_retries: 3,
            cooldown: Duration::from_secs(5),
        }
    }
}

/// What the monitor should do after a failed poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Below the threshold: show a warning and keep polling.
    Warn { consecutive: u32 },
    /// Threshold hit with budget left: cool down, then keep polling.
    Retry {
        attempt: u32,
        max: u32,
        cooldown: Duration,
    },
    /// Budget exhausted: the job must fail.
    GiveUp { attempts: u32 },
}

impl RetryDecision {
    pub fn notice(&self, error: &str) -> String {
        match self {
            Self::Warn { .. } => format!("Download monitoring error: {error}"),
            Self::Retry { attempt, max, cooldown } => format!(
                "Connection attempt {attempt}/{max}. Retrying in {} seconds...",
                cooldown.as_secs()
            ),
            Self::GiveUp { attempts } => format!(
                "Download failed after {attempts} retry attempts. Please try again later."
            ),
        }
    }
}

/// Counts failures on the job itself so the state can be inspected
/// independently of the polling timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn on_failure(&self, job: &mut Job) -> RetryDecision {
        job.consecutive_errors = job.consecutive_errors.saturating_add(1);
        if job.consecutive_errors < self.policy.error_threshold {
            return RetryDecision::Warn {
                consecutive: job.consecutive_errors,
            };
        }
        if job.retry_count < self.policy.max_retries {
            job.retry_count += 1;
            RetryDecision::Retry {
                attempt: job.retry_count,
                max: self.policy.max_retries,
                cooldown: self.policy.cooldown,
            }
        } else {
            RetryDecision::GiveUp {
                attempts: job.retry_count,
            }
        }
    }

    /// Any successful poll ends the failure episode.
    pub fn on_success(&self, job: &mut Job) {
        job.consecutive_errors = 0;
        job.retry_count = 0;
        job.warning = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("job", 1, vec![])
    }

    #[test]
    fn first_failures_are_soft() {
        let rc = RetryController::default();
        let mut job = job();
        assert_eq!(rc.on_failure(&mut job), RetryDecision::Warn { consecutive: 1 });
        assert_eq!(rc.on_failure(&mut job), RetryDecision::Warn { consecutive: 2 });
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn third_failure_starts_retry_cycle() {
        let rc = RetryController::default();
        let mut job = job();
        rc.on_failure(&mut job);
        rc.on_failure(&mut job);
        let decision = rc.on_failure(&mut job);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                attempt: 1,
                max: 3,
                cooldown: Duration::from_secs(5)
            }
        );
        assert_eq!(decision.notice("x"), "Connection attempt 1/3. Retrying in 5 seconds...");
    }

    #[test]
    fn budget_runs_out() {
        let rc = RetryController::default();
        let mut job = job();
        let decisions: Vec<_> = (0..6).map(|_| rc.on_failure(&mut job)).collect();
        assert!(matches!(decisions[4], RetryDecision::Retry { attempt: 3, .. }));
        assert_eq!(decisions[5], RetryDecision::GiveUp { attempts: 3 });
    }

    #[test]
    fn success_resets_the_episode() {
        let rc = RetryController::default();
        let mut job = job();
        for _ in 0..4 {
            rc.on_failure(&mut job);
        }
        job.warning = Some("warn".into());
        rc.on_success(&mut job);
        assert_eq!(job.consecutive_errors, 0);
        assert_eq!(job.retry_count, 0);
        assert!(job.warning.is_none());
        assert_eq!(rc.on_failure(&mut job), RetryDecision::Warn { consecutive: 1 });
    }
}
