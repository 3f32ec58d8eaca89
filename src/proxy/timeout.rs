//! Deadline guard for awaited outcomes

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Race `fut` against `deadline`
///
/// Whichever settles first decides the outcome; the loser is dropped, so an
/// outcome is produced exactly once.
pub async fn guard<F: Future>(fut: F, deadline: Duration) -> Result<F::Output> {
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| Error::Timeout(deadline))
}

/// Like [`guard`], but runs `compensate` once when the deadline wins
pub async fn guard_with_fallback<F, C>(fut: F, deadline: Duration, compensate: C) -> Result<F::Output>
where
    F: Future,
    C: FnOnce(),
{
    match guard(fut, deadline).await {
        Ok(value) => Ok(value),
        Err(err) => {
            compensate();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn test_inner_wins() {
        let value = guard(async { 7 }, Duration::from_millis(50)).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_deadline_wins() {
        let started = Instant::now();
        let result = guard(std::future::pending::<()>(), Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout(d)) if d == Duration::from_millis(10)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_fallback_runs_only_on_timeout() {
        let calls = AtomicUsize::new(0);

        let ok = guard_with_fallback(async { "done" }, Duration::from_millis(50), || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(ok.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let timed_out = guard_with_fallback(
            std::future::pending::<()>(),
            Duration::from_millis(5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
