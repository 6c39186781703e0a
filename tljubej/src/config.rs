use std::thread::available_parallelism;

use crate::error::ConfigError;

/// Page size the default chunk size is a multiple of.
pub const PAGE_SIZE: usize = 4096;

/// 4 MB chunks.
pub const DEFAULT_CHUNK_SIZE: usize = PAGE_SIZE * 1000;

/// Small enough to bound the in-flight window, large enough that handing a
/// batch to a worker is negligible next to parsing it. 1 million lines.
pub const DEFAULT_BATCH_SIZE: usize = 1000 * 1000;

/// Queued batches per worker when no explicit queue capacity is given.
pub const QUEUE_SLOTS_PER_WORKER: usize = 2;

/// Tuning knobs of one aggregation run.
///
/// Peak memory is roughly `(queue_capacity + workers + 1) * batch_size` lines
/// plus one chunk and the carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bytes read from the source per chunk.
    pub chunk_size: usize,
    /// Lines per batch handed to a worker.
    pub batch_size: usize,
    /// Batches the work queue holds before submission blocks.
    pub queue_capacity: usize,
    /// Fixed number of aggregation workers.
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        let workers = available_parallelism().map(|n| n.get()).unwrap_or(4);

        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: workers.saturating_mul(QUEUE_SLOTS_PER_WORKER),
            workers,
        }
    }
}

impl Config {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets the worker count. The queue capacity is left as is.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the worker count and sizes the queue to match it.
    pub fn with_workers_and_queue(self, workers: usize) -> Self {
        self.with_workers(workers)
            .with_queue_capacity(workers.saturating_mul(QUEUE_SLOTS_PER_WORKER))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (option, value) in [
            ("chunk_size", self.chunk_size),
            ("batch_size", self.batch_size),
            ("queue_capacity", self.queue_capacity),
            ("workers", self.workers),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { option });
            }
        }
        Ok(())
    }
}
