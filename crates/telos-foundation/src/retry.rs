//! Async retry driver over the kernel retry types.

use std::future::Future;

use telos_kernel::error::EngineResult;
use telos_kernel::retry::RetryConfig;

/// Drive `op` until it succeeds, fails non-retryably, or the attempt
/// budget is spent.
///
/// `op` receives the 0-indexed attempt number. Retryability follows
/// [`EngineError::is_retryable`](telos_kernel::error::EngineError::is_retryable);
/// the sleep between attempts comes from [`RetryConfig::delay_for`].
/// Returns the final result together with the number of attempts made.
pub async fn retry_with_policy<T, F, Fut>(config: &RetryConfig, mut op: F) -> (EngineResult<T>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let budget = config.max_attempts.max(1) as u32;
    let mut attempt: u32 = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return (Ok(value), attempt + 1),
            Err(e) if attempt + 1 >= budget || !e.is_retryable() => {
                return (Err(e), attempt + 1);
            }
            Err(_) => {
                tokio::time::sleep(config.delay_for(attempt as usize)).await;
                attempt += 1;
            }
        }
    }
}
