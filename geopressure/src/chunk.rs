//! Chunked parallel execution of per-observation jobs.

use crate::EngineError;
use log::warn;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// One output column. Rows an extraction could not produce are `None`.
pub type Column = Vec<Option<f64>>;

/// Named output columns of one job, all the same length.
pub type ColumnSet = BTreeMap<String, Column>;

/// Upper bound on worker threads regardless of chunk count.
pub const MAX_WORKERS: usize = 90;

/// Splits an observation array into contiguous chunks, runs one job
/// per chunk on a bounded worker pool, and merges the jobs' columns
/// back in chunk order.
///
/// A chunk whose job fails is logged and dropped; the merge then
/// simply misses its rows. Chunk boundaries never split a single
/// observation, and an empty input produces an empty column set.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedExecutor {
    nb_chunks: usize,
    workers: usize,
}

impl ChunkedExecutor {
    pub fn new(nb_chunks: usize) -> Self {
        let nb_chunks = nb_chunks.max(1);
        Self {
            nb_chunks,
            workers: nb_chunks.min(MAX_WORKERS),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn run<T, F>(&self, items: &[T], job: F) -> Result<ColumnSet, EngineError>
    where
        T: Sync,
        F: Fn(&[T]) -> Result<ColumnSet, EngineError> + Sync,
    {
        if items.is_empty() {
            return Ok(ColumnSet::new());
        }
        let chunk_size = items.len().div_ceil(self.nb_chunks);
        let chunks: Vec<&[T]> = items.chunks(chunk_size).collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.min(chunks.len()))
            .build()?;
        let partials: Vec<Option<ColumnSet>> = pool.install(|| {
            chunks
                .par_iter()
                .enumerate()
                .map(|(index, chunk)| match job(chunk) {
                    Ok(columns) => Some(columns),
                    Err(e) => {
                        warn!("chunk {index}/{} dropped: {e}", chunks.len());
                        None
                    }
                })
                .collect()
        });
        Ok(merge(partials))
    }
}

/// Concatenates surviving partial results, restoring chunk order.
///
/// Every surviving chunk must emit the same column set; otherwise the
/// concatenation would misalign rows across keys.
fn merge(partials: Vec<Option<ColumnSet>>) -> ColumnSet {
    let mut merged = ColumnSet::new();
    for partial in partials.into_iter().flatten() {
        debug_assert!(
            merged.is_empty() || partial.keys().eq(merged.keys()),
            "chunk jobs must emit the same column set"
        );
        for (key, column) in partial {
            merged.entry(key).or_default().extend(column);
        }
    }
    merged
}
