//! Chunked parallel fetch with progress reporting
//!
//! Partitions a half-open range into fixed-size chunks, fetches all chunks
//! concurrently and flattens the results in index order.

use crate::config::BULK_EMPTY_RETRY_LIMIT;
use crate::error::{GatewayError, GatewayResult};
use futures::future::try_join_all;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Progress observer; receives the completed fraction in `[0, 1]`.
pub type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;

/// Fetch `[0, total)` in parallel chunks of `query_size`, invoking
/// `getter(start, end)` per half-open chunk.
///
/// A chunk that comes back empty is retried immediately up to
/// `BULK_EMPTY_RETRY_LIMIT` times and then accepted as empty. Progress
/// advances by chunk width as chunks finish; `on_progress(1.0)` is always
/// delivered once at the end.
pub async fn aggregate_bulk_getter<T, F, Fut>(
    total: u64,
    query_size: u64,
    getter: F,
    on_progress: Option<ProgressFn>,
) -> GatewayResult<Vec<T>>
where
    T: Send,
    F: Fn(u64, u64) -> Fut + Sync,
    Fut: Future<Output = GatewayResult<Vec<T>>> + Send,
{
    if query_size == 0 {
        return Err(GatewayError::Config(
            "bulk query size must be positive".to_string(),
        ));
    }

    let completed = AtomicU64::new(0);
    let chunk_count = total.div_ceil(query_size);

    let chunks = (0..chunk_count).map(|i| {
        let start = i * query_size;
        let end = ((i + 1) * query_size).min(total);
        let getter = &getter;
        let completed = &completed;
        let on_progress = &on_progress;
        async move {
            let mut batch = getter(start, end).await?;
            let mut empty_retries = 0;
            while batch.is_empty() && empty_retries < BULK_EMPTY_RETRY_LIMIT {
                empty_retries += 1;
                batch = getter(start, end).await?;
            }
            if batch.is_empty() && empty_retries == BULK_EMPTY_RETRY_LIMIT {
                warn!(start, end, "Bulk chunk still empty after retries, accepting");
            }

            let done = completed.fetch_add(end - start, Ordering::SeqCst) + (end - start);
            if let Some(progress) = on_progress {
                progress(done as f64 / total as f64);
            }
            Ok::<_, GatewayError>(batch)
        }
    });

    let batches = try_join_all(chunks).await?;

    if let Some(progress) = &on_progress {
        progress(1.0);
    }

    Ok(batches.into_iter().flatten().collect())
}
