use std::future::Future;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Retry `op` up to `attempts` times with a fixed sleep between attempts.
///
/// Returns the first success, or the error from the final attempt. The
/// terminal error is always the last attempt's error value, so callers
/// never observe stale or uninitialized state after an exhausted loop.
pub async fn retry_fixed<T, E, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    debug_assert!(attempts > 0);

    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                warn!("all {attempts} attempts failed, giving up: {e}");
                return Err(e);
            }
            Err(e) => {
                warn!("attempt {attempt}/{attempts} failed, retrying in {delay:?}: {e}");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}
