use anyhow::Result;

use crate::BackoffPolicy;

pub fn check_backoff(policy: &BackoffPolicy) -> Result<()> {
    anyhow::ensure!(
        policy.idle_sleep_ms > 0 || policy.yield_limit > 0,
        "listener backoff never yields; set idle_sleep_ms or yield_limit"
    );
    anyhow::ensure!(
        policy.idle_sleep_ms <= 1_000,
        "listener.idle_sleep_ms above 1000 delays stop and delivery"
    );
    Ok(())
}
