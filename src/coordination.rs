//! # Coordination Layer
//!
//! `await`/`all`/`any`/`race`/`retry_with_backoff`/`timeout` over
//! `Client::call` futures. Every primitive here is a thin async function
//! over `futures::future` combinators. No non-local control transfer ever
//! happens here: every outcome is an ordinary returned `Result`, resolved
//! through normal async/await unwinding.

use std::future::Future;
use std::time::Duration;

#[cfg(test)]
use std::sync::Arc;

use tracing::debug;

use crate::error::{ErrorCode, RpcError};

/// Await a single future, mapping a `Cancelled`/timeout outcome the same way
/// `Client::call` already does: as an `RpcError`.
pub async fn await_call<F, T>(fut: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    fut.await
}

/// Resolve once every future resolves, never cancelling a sibling because one
/// of them failed: every outcome is delivered, success or error, in input
/// order.
pub async fn all<F, T>(futures: Vec<F>) -> Vec<Result<T, RpcError>>
where
    F: Future<Output = Result<T, RpcError>>,
{
    futures::future::join_all(futures).await
}

/// Resolve with the first future to succeed; if every future fails, return
/// the last error observed.
pub async fn any<F, T>(futures: Vec<F>) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    if futures.is_empty() {
        return Err(RpcError::new(ErrorCode::InvalidParam, "any() requires at least one future"));
    }
    let mut pending: Vec<_> = futures.into_iter().map(Box::pin).collect();
    let mut last_err = None;
    while !pending.is_empty() {
        let (outcome, _index, rest) = futures::future::select_all(pending).await;
        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = Some(e);
                pending = rest;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| RpcError::new(ErrorCode::Error, "all candidates failed")))
}

/// Resolve with whichever future settles first, success or failure.
pub async fn race<F, T>(futures: Vec<F>) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    if futures.is_empty() {
        return Err(RpcError::new(ErrorCode::InvalidParam, "race() requires at least one future"));
    }
    let pending: Vec<_> = futures.into_iter().map(Box::pin).collect();
    let (outcome, _index, _rest) = futures::future::select_all(pending).await;
    outcome
}

/// Retry `attempt` with exponential backoff, up to `max_attempts` total
/// tries. `base_delay` doubles after every failed attempt; only errors for
/// which `is_retryable` returns true are retried.
pub async fn retry_with_backoff<F, Fut, T>(
    max_attempts: u32,
    base_delay: Duration,
    is_retryable: impl Fn(&RpcError) -> bool,
    mut attempt: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut delay = base_delay;
    let mut tries = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if tries + 1 < max_attempts && is_retryable(&e) => {
                debug!("retry_with_backoff: attempt {} failed with {e}, backing off {delay:?}", tries + 1);
                tokio::time::sleep(delay).await;
                delay *= 2;
                tries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bound a future by a deadline, mapping elapsed time to `ErrorCode::Timeout`.
pub async fn timeout<F, T>(duration: Duration, fut: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .unwrap_or_else(|_| Err(RpcError::timeout("coordination timeout elapsed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    async fn ok_after(delay_ms: u64, value: u32) -> Result<u32, RpcError> {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(value)
    }

    async fn err_after(delay_ms: u64) -> Result<u32, RpcError> {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Err(RpcError::new(ErrorCode::Error, "boom"))
    }

    #[tokio::test]
    async fn all_collects_every_result_in_order() {
        let results = all(vec![ok_after(5, 1), ok_after(1, 2), ok_after(3, 3)]).await;
        let results: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn all_delivers_every_result_without_cancelling_siblings() {
        let results = all(vec![ok_after(20, 1).boxed(), err_after(1).boxed()]).await;
        assert!(results[0].is_ok());
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn any_returns_first_success() {
        let result = any(vec![err_after(1).boxed(), ok_after(20, 9).boxed()]).await.unwrap();
        assert_eq!(result, 9);
    }

    #[tokio::test]
    async fn any_fails_when_every_candidate_fails() {
        let result = any(vec![err_after(1), err_after(1)]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn race_returns_whichever_settles_first() {
        let result = race(vec![ok_after(30, 1), ok_after(1, 2)]).await.unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn retry_with_backoff_eventually_succeeds() {
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let result = retry_with_backoff(
            5,
            Duration::from_millis(1),
            |_| true,
            || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    if n < 2 {
                        Err(RpcError::new(ErrorCode::Timeout, "not yet"))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn retry_with_backoff_stops_on_non_retryable_error() {
        let result: Result<u32, RpcError> = retry_with_backoff(
            5,
            Duration::from_millis(1),
            |e| e.code == ErrorCode::Timeout,
            || async { Err(RpcError::new(ErrorCode::InvalidParam, "bad input")) },
        )
        .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::InvalidParam);
    }

    #[tokio::test]
    async fn timeout_wraps_slow_future() {
        let result = timeout(Duration::from_millis(5), ok_after(50, 1)).await;
        assert_eq!(result.unwrap_err().code, ErrorCode::Timeout);
    }
}
