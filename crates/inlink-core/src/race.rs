//! First-of-two combinator used for timeouts.

use std::future::Future;
use std::time::Duration;

/// Resolve with whichever future finishes first. The loser is dropped and its
/// eventual result discarded. On a tie `primary` wins.
pub async fn first_of<T, A, B>(primary: A, secondary: B) -> T
where
    A: Future<Output = T>,
    B: Future<Output = T>,
{
    tokio::select! {
        biased;
        value = primary => value,
        value = secondary => value,
    }
}

/// Run `fut`, resolving to `fallback` if it has not finished within `limit`.
pub async fn timeout_or<T, F>(fut: F, limit: Duration, fallback: T) -> T
where
    F: Future<Output = T>,
{
    first_of(fut, async move {
        tokio::time::sleep(limit).await;
        fallback
    })
    .await
}
