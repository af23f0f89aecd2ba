use serde::Deserialize;
use std::time::Duration;

/// Idle policy for a polling loop that found nothing to receive.
///
/// The first `spin_limit` empty polls busy-spin, the next `yield_limit`
/// yield to the scheduler, and every empty poll after that sleeps for
/// `idle_sleep_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub spin_limit: u32,
    pub yield_limit: u32,
    pub idle_sleep_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { spin_limit: 6, yield_limit: 10, idle_sleep_ms: 1 }
    }
}

impl BackoffPolicy {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Spin(u32),
    Yield,
    Sleep(Duration),
}

#[derive(Debug)]
pub(crate) struct Backoff {
    policy: BackoffPolicy,
    empty_polls: u32,
}

impl Backoff {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self { policy, empty_polls: 0 }
    }

    pub(crate) fn reset(&mut self) {
        self.empty_polls = 0;
    }

    pub(crate) fn next_step(&mut self) -> Step {
        let n = self.empty_polls;
        self.empty_polls = self.empty_polls.saturating_add(1);
        if n < self.policy.spin_limit {
            Step::Spin(1 << n.min(6))
        } else if n - self.policy.spin_limit < self.policy.yield_limit {
            Step::Yield
        } else {
            Step::Sleep(self.policy.idle_sleep())
        }
    }

    pub(crate) async fn snooze(&mut self) {
        match self.next_step() {
            Step::Spin(n) => {
                for _ in 0..n {
                    std::hint::spin_loop();
                }
            }
            Step::Yield => tokio::task::yield_now().await,
            Step::Sleep(d) => tokio::time::sleep(d).await,
        }
    }
}
