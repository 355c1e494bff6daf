use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{info, warn};

/// Block until `check` succeeds, retrying forever with a fixed delay
///
/// Returns the number of attempts it took.
#[inline]
pub async fn wait_for_service<F, Fut>(name: &str, delay: Duration, mut check: F) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempt = 1;
    loop {
        match check().await {
            Ok(()) => {
                info!("{} is ready", name);
                return attempt;
            }
            Err(e) => {
                warn!(
                    "{} is not ready (attempt {}): {:#}. Retrying in {:?}",
                    name, attempt, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
