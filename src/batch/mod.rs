//! Batch Processor (§4.13) — `batch_import`/`batch_export`/`batch_convert`
//! plus a generic `process_batch` over four strategies.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng as _;
use serde::Serialize;
use sysinfo::{System, SystemExt};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Error, Serialize)]
pub enum BatchError {
    #[error("item timed out after {0}ms")]
    ItemTimeout(u64),
    #[error("item failed: {0}")]
    ItemFailed(String),
}

impl BatchError {
    pub fn code(&self) -> &'static str {
        match self {
            BatchError::ItemTimeout(_) => "timeout_exceeded",
            BatchError::ItemFailed(_) => "temporary_failure",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Parallel,
    Sequential,
    Chunked,
    Adaptive,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOptions {
    pub strategy: Strategy,
    pub per_item_timeout: Duration,
    pub continue_on_error: bool,
    pub max_retries: u32,
    pub chunk_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Adaptive,
            per_item_timeout: Duration::from_secs(30),
            continue_on_error: true,
            max_retries: 2,
            chunk_size: 8,
        }
    }
}

/// `total/processed/successful/failed/skipped/current_item/pct/eta` (§4.13).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub current_item: Option<usize>,
    pub pct: f32,
    pub eta_secs: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    /// Index-tagged since parallel/adaptive strategies don't preserve input order.
    pub successes: Vec<(usize, T)>,
    pub errors: Vec<(usize, BatchError)>,
    pub skipped: Vec<usize>,
    pub progress: BatchProgress,
}

impl<T> BatchResult<T> {
    /// P13: `len(results) + skipped == total`; `successful + failed == processed`.
    pub fn is_complete(&self) -> bool {
        self.successes.len() + self.errors.len() + self.skipped.len() == self.progress.total
            && self.successes.len() + self.errors.len() == self.progress.processed
    }
}

fn adaptive_concurrency(item_count: usize) -> usize {
    let mut sys = System::new();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpus = sys.cpus().len().max(1);
    let mem_budget = (sys.available_memory() / (256 * 1024 * 1024)).max(1) as usize;
    item_count.min(cpus * 2).min(mem_budget).max(1)
}

async fn run_with_retries<T, E, F>(
    index: usize,
    timeout: Duration,
    max_retries: u32,
    op: F,
) -> Result<T, BatchError>
where
    F: Fn(usize) -> BoxFuture<'static, Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        let result = tokio::time::timeout(timeout, op(index)).await;
        match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if attempt < max_retries => {
                attempt += 1;
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt)) + jitter_ms();
                tokio::time::sleep(backoff).await;
                let _ = e;
            }
            Ok(Err(e)) => return Err(BatchError::ItemFailed(e.to_string())),
            Err(_) if attempt < max_retries => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt)) + jitter_ms()).await;
            }
            Err(_) => return Err(BatchError::ItemTimeout(timeout.as_millis() as u64)),
        }
    }
}

fn jitter_ms() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..20))
}

/// Generic fan-out over `items` using `operation` per item (§4.13).
pub async fn process_batch<T, E, F>(
    items: Vec<usize>,
    options: BatchOptions,
    operation: Arc<F>,
) -> BatchResult<T>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
    F: Fn(usize) -> BoxFuture<'static, Result<T, E>> + Send + Sync + 'static,
{
    let total = items.len();
    let mut successes = Vec::new();
    let mut errors = Vec::new();

    let concurrency = match options.strategy {
        Strategy::Sequential => 1,
        Strategy::Chunked => options.chunk_size,
        Strategy::Parallel => total.max(1),
        Strategy::Adaptive => adaptive_concurrency(total),
    };

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::new();
    for index in items {
        let semaphore = semaphore.clone();
        let operation = operation.clone();
        let timeout = options.per_item_timeout;
        let max_retries = options.max_retries;
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let result = run_with_retries(index, timeout, max_retries, move |i| operation(i)).await;
            (index, result)
        }));
        if options.strategy == Strategy::Chunked {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    for handle in handles {
        match handle.await {
            Ok((index, Ok(value))) => successes.push((index, value)),
            Ok((index, Err(e))) => {
                errors.push((index, e));
                if !options.continue_on_error {
                    break;
                }
            }
            Err(join_err) => errors.push((0, BatchError::ItemFailed(join_err.to_string()))),
        }
    }

    let processed = successes.len() + errors.len();
    let progress = BatchProgress {
        total,
        processed,
        successful: successes.len(),
        failed: errors.len(),
        skipped: total.saturating_sub(processed),
        current_item: None,
        pct: if total == 0 { 100.0 } else { (processed as f32 / total as f32) * 100.0 },
        eta_secs: None,
    };
    let skipped = (0..total).filter(|i| !successes.iter().any(|(j, _)| j == i) && !errors.iter().any(|(j, _)| j == i)).collect();

    BatchResult { successes, errors, skipped, progress }
}

/// A named file path paired with its index, the unit `batch_import`/
/// `batch_export`/`batch_convert` operate over.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub index: usize,
    pub path: String,
}

/// Imports each path via the Upload Normalizer's format detection, returning
/// the detected format per item. Thin named wrapper over `process_batch`,
/// matching §4.13's operation list.
pub async fn batch_import(items: Vec<BatchItem>, options: BatchOptions) -> BatchResult<crate::upload::UploadFormat> {
    let paths: std::collections::HashMap<usize, String> = items.iter().map(|i| (i.index, i.path.clone())).collect();
    let paths = Arc::new(paths);
    let op = Arc::new(move |i: usize| -> BoxFuture<'static, Result<crate::upload::UploadFormat, String>> {
        let paths = paths.clone();
        Box::pin(async move {
            let path_str = paths.get(&i).ok_or("missing path")?.clone();
            let path = std::path::Path::new(&path_str);
            let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
            crate::upload::detect_format(path, &bytes).map_err(|e| e.to_string())
        })
    });
    process_batch(items.iter().map(|i| i.index).collect(), options, op).await
}

/// Exports each item via its already-loaded bytes (export is a pure
/// transform here — object-storage upload is the caller's concern per §6).
pub async fn batch_export(items: Vec<(usize, Vec<u8>)>, options: BatchOptions) -> BatchResult<usize> {
    let sizes: std::collections::HashMap<usize, usize> = items.into_iter().map(|(i, bytes)| (i, bytes.len())).collect();
    let sizes = Arc::new(sizes);
    let indices: Vec<usize> = sizes.keys().copied().collect();
    let op = Arc::new(move |i: usize| -> BoxFuture<'static, Result<usize, String>> {
        let sizes = sizes.clone();
        Box::pin(async move { sizes.get(&i).copied().ok_or_else(|| "missing item".to_string()) })
    });
    process_batch(indices, options, op).await
}

/// Converts each path from its detected format to a target format by
/// round-tripping through the matching `UploadHandler` (§4.9).
pub async fn batch_convert(
    items: Vec<BatchItem>,
    target: crate::upload::UploadFormat,
    options: BatchOptions,
) -> BatchResult<Vec<u8>> {
    let paths: std::collections::HashMap<usize, String> = items.iter().map(|i| (i.index, i.path.clone())).collect();
    let paths = Arc::new(paths);
    let op = Arc::new(move |i: usize| -> BoxFuture<'static, Result<Vec<u8>, String>> {
        let paths = paths.clone();
        Box::pin(async move {
            let path_str = paths.get(&i).ok_or("missing path")?.clone();
            let path = std::path::Path::new(&path_str);
            let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
            let format = crate::upload::detect_format(path, &bytes).map_err(|e| e.to_string())?;
            let handler = crate::upload::formats::handler_for(format);
            let mut doc = handler.load(&bytes).map_err(|e| e.to_string())?;
            let target_handler = crate::upload::formats::handler_for(target);
            let metrics_config = crate::upload::NormalizeConfig::default();
            let _ = handler.normalize(&mut doc, &metrics_config).map_err(|e| e.to_string())?;
            target_handler.export(&doc).map_err(|e| e.to_string())
        })
    });
    process_batch(items.iter().map(|i| i.index).collect(), options, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn batch_completeness_holds() {
        let counter = Arc::new(AtomicUsize::new(0));
        let op = Arc::new(move |i: usize| -> BoxFuture<'static, Result<usize, String>> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if i == 2 {
                    Err("boom".to_string())
                } else {
                    Ok(i * 2)
                }
            })
        });
        let result = process_batch(
            (0..5).collect(),
            BatchOptions { strategy: Strategy::Parallel, max_retries: 0, ..Default::default() },
            op,
        )
        .await;
        assert!(result.is_complete());
        assert_eq!(result.progress.successful, 4);
        assert_eq!(result.progress.failed, 1);
    }

    #[tokio::test]
    async fn sequential_strategy_runs_one_at_a_time() {
        let op = Arc::new(|i: usize| -> BoxFuture<'static, Result<usize, String>> { Box::pin(async move { Ok(i) }) });
        let result = process_batch(
            (0..3).collect(),
            BatchOptions { strategy: Strategy::Sequential, ..Default::default() },
            op,
        )
        .await;
        assert_eq!(result.successes.len(), 3);
    }
}
