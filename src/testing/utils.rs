use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F>(condition: F, timeout: Duration, check_interval: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(check_interval).await;
    }
    condition()
}

/// Like [`wait_for`], for conditions that need to await.
pub async fn wait_for_async<F, Fut>(mut condition: F, timeout: Duration, check_interval: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        sleep(check_interval).await;
    }
    condition().await
}

/// `wait_for` with the defaults the scenario tests use.
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    wait_for(condition, Duration::from_secs(5), Duration::from_millis(5)).await
}
