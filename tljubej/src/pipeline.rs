use std::{path::Path, time::Instant};

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::{
    chunk::ChunkSource,
    config::Config,
    dispatch::{BatchDispatcher, DispatchStats},
    error::PipelineError,
    format::Report,
    observability::{log_debug, log_info, log_warn},
    reassembler::LineReassembler,
    stats::{FrozenStore, StatsStore},
    worker::{AggregationWorker, WorkerTally},
};

/// Counters of one completed run.
///
/// `lines == accepted + rejected` for every run that returns successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub bytes_read: u64,
    pub chunks: u64,
    pub lines: u64,
    pub batches: u64,
    pub blocked_submissions: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Result of a run: the frozen statistics and how they were produced.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub stats: FrozenStore,
    pub report: RunReport,
}

impl Aggregation {
    pub fn report(&self) -> Report<'_> {
        Report::new(&self.stats)
    }
}

/// Reader -> bounded queue -> fixed worker pool -> merge.
///
/// The calling task reads, reassembles and dispatches; `config.workers`
/// workers aggregate on the blocking pool into private stores that are merged
/// once every worker has returned.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        config.validate()?;

        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Replaces the token checked at every chunk and batch boundary.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run_path(&self, path: impl AsRef<Path>) -> Result<Aggregation, PipelineError> {
        let source = ChunkSource::open(path, self.config.chunk_size).await?;
        self.run(source).await
    }

    pub async fn run_reader<R>(&self, reader: R) -> Result<Aggregation, PipelineError>
    where
        R: AsyncRead + Unpin,
    {
        self.run(ChunkSource::new(reader, self.config.chunk_size)).await
    }

    async fn run<R>(&self, mut source: ChunkSource<R>) -> Result<Aggregation, PipelineError>
    where
        R: AsyncRead + Unpin,
    {
        let started = Instant::now();
        log_info!(
            component = "pipeline",
            event = "run_started",
            chunk_size = self.config.chunk_size,
            batch_size = self.config.batch_size,
            queue_capacity = self.config.queue_capacity,
            workers = self.config.workers,
        );

        let (sender, queue) = flume::bounded(self.config.queue_capacity);
        let workers: Vec<_> = (0..self.config.workers)
            .map(|id| AggregationWorker::new(id).spawn(queue.clone()))
            .collect();
        drop(queue);

        let dispatcher = BatchDispatcher::new(sender, self.config.batch_size, self.cancel.clone());
        // The dispatcher is consumed here, so the queue is closed once this returns.
        let dispatched = self.read_input(&mut source, dispatcher).await;

        let mut store = StatsStore::new();
        let mut tally = WorkerTally::default();
        let mut failure = None;
        for handle in workers {
            match handle.await {
                Ok(output) => {
                    store.merge(output.store);
                    tally += output.tally;
                }
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            log_warn!(component = "pipeline", event = "worker_failed", error = %err);
            return Err(PipelineError::Worker(err));
        }
        let dispatched = match dispatched {
            Ok(dispatched) => dispatched,
            Err(err) => {
                log_warn!(component = "pipeline", event = "run_aborted", error = %err);
                return Err(err);
            }
        };

        let report = RunReport {
            bytes_read: source.bytes_read(),
            chunks: source.chunks(),
            lines: dispatched.lines,
            batches: dispatched.batches,
            blocked_submissions: dispatched.blocked,
            accepted: tally.accepted,
            rejected: tally.rejected,
        };
        let stats = store.freeze();
        log_info!(
            component = "pipeline",
            event = "run_finished",
            keys = stats.len(),
            bytes = report.bytes_read,
            lines = report.lines,
            rejected = report.rejected,
            batches = report.batches,
            blocked = report.blocked_submissions,
            elapsed_ms = started.elapsed().as_millis() as u64,
        );

        Ok(Aggregation { stats, report })
    }

    async fn read_input<R>(
        &self,
        source: &mut ChunkSource<R>,
        mut dispatcher: BatchDispatcher,
    ) -> Result<DispatchStats, PipelineError>
    where
        R: AsyncRead + Unpin,
    {
        let mut reassembler = LineReassembler::new();

        loop {
            if self.cancel.is_cancelled() {
                log_debug!(
                    component = "pipeline",
                    event = "read_cancelled",
                    bytes = source.bytes_read(),
                );
                return Err(PipelineError::Cancelled);
            }
            let Some(chunk) = source.next_chunk().await? else {
                break;
            };
            for block in reassembler.push(chunk) {
                dispatcher.push(block).await?;
            }
        }

        if let Some(block) = reassembler.finish() {
            dispatcher.push(block).await?;
        }
        dispatcher.finish().await
    }
}
