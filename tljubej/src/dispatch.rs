use flume::{Sender, TrySendError};
use tokio_util::sync::CancellationToken;

use crate::{
    error::PipelineError,
    observability::log_debug,
    reassembler::LineBlock,
};

/// A group of complete lines handed to one worker as a unit.
#[derive(Debug, Default)]
pub struct Batch {
    blocks: Vec<LineBlock>,
    lines: usize,
}

impl Batch {
    /// Number of lines in the batch.
    pub fn len(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.blocks.iter().flat_map(LineBlock::lines)
    }

    fn push(&mut self, block: LineBlock, lines: usize) {
        self.blocks.push(block);
        self.lines += lines;
    }
}

/// Counters of a finished dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub lines: u64,
    pub batches: u64,
    /// Submissions that found the queue full and had to wait.
    pub blocked: u64,
}

/// Packs lines into batches of exactly `batch_size` lines and submits them
/// to the bounded work queue.
///
/// Backpressure policy: a full queue blocks the submitter until a worker
/// frees a slot. The worker pool is never grown. Dropping the dispatcher
/// closes the queue.
pub struct BatchDispatcher {
    sender: Sender<Batch>,
    batch_size: usize,
    current: Batch,
    cancel: CancellationToken,
    stats: DispatchStats,
}

impl BatchDispatcher {
    pub fn new(sender: Sender<Batch>, batch_size: usize, cancel: CancellationToken) -> Self {
        assert!(batch_size > 0, "batch size must be non-zero");

        Self {
            sender,
            batch_size,
            current: Batch::default(),
            cancel,
            stats: DispatchStats::default(),
        }
    }

    /// Adds a block of lines, submitting every batch it fills.
    pub async fn push(&mut self, block: LineBlock) -> Result<(), PipelineError> {
        let mut pending = Some(block);

        while let Some(block) = pending.take() {
            let room = self.batch_size - self.current.len();
            let (head, lines, rest) = block.split_lines(room);
            self.current.push(head, lines);
            self.stats.lines += lines as u64;

            if self.current.len() == self.batch_size {
                self.submit().await?;
            }
            pending = rest;
        }
        Ok(())
    }

    /// Submits the trailing partial batch, if any, and closes the queue.
    pub async fn finish(mut self) -> Result<DispatchStats, PipelineError> {
        if !self.current.is_empty() {
            self.submit().await?;
        }
        Ok(self.stats)
    }

    async fn submit(&mut self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let batch = std::mem::take(&mut self.current);
        self.stats.batches += 1;

        match self.sender.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(batch)) => {
                self.stats.blocked += 1;
                log_debug!(
                    component = "dispatch",
                    event = "queue_saturated",
                    batch = self.stats.batches,
                    queue_capacity = ?self.sender.capacity(),
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
                    sent = self.sender.send_async(batch) => {
                        sent.map_err(|_| PipelineError::QueueClosed)
                    }
                }
            }
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::QueueClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::reassembler::LineReassembler;

    fn blocks(input: &'static [u8]) -> Vec<LineBlock> {
        let mut reassembler = LineReassembler::new();
        let mut blocks: Vec<_> = reassembler.push(Bytes::from_static(input)).collect();
        blocks.extend(reassembler.finish());
        blocks
    }

    fn batch_lines(batch: &Batch) -> Vec<&[u8]> {
        batch.lines().collect()
    }

    #[tokio::test]
    async fn batches_hold_exactly_batch_size_lines() {
        let (tx, rx) = flume::unbounded();
        let mut dispatcher = BatchDispatcher::new(tx, 2, CancellationToken::new());

        for block in blocks(b"a\nb\nc\nd\ne") {
            dispatcher.push(block).await.unwrap();
        }
        let stats = dispatcher.finish().await.unwrap();

        let batches: Vec<Batch> = rx.drain().collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batch_lines(&batches[0]), vec![&b"a"[..], b"b"]);
        assert_eq!(batch_lines(&batches[1]), vec![&b"c"[..], b"d"]);
        assert_eq!(batch_lines(&batches[2]), vec![&b"e"[..]]);
        assert_eq!(stats, DispatchStats { lines: 5, batches: 3, blocked: 0 });
        assert!(rx.is_disconnected());
    }

    #[tokio::test]
    async fn batch_spans_several_blocks() {
        let (tx, rx) = flume::unbounded();
        let mut dispatcher = BatchDispatcher::new(tx, 3, CancellationToken::new());

        dispatcher.push(blocks(b"a\n").remove(0)).await.unwrap();
        dispatcher.push(blocks(b"b\n").remove(0)).await.unwrap();
        assert!(rx.is_empty());
        dispatcher.push(blocks(b"c\nd\n").remove(0)).await.unwrap();
        assert_eq!(rx.len(), 1);

        dispatcher.finish().await.unwrap();
        let batches: Vec<Batch> = rx.drain().collect();
        assert_eq!(batch_lines(&batches[0]), vec![&b"a"[..], b"b", b"c"]);
        assert_eq!(batch_lines(&batches[1]), vec![&b"d"[..]]);
    }

    #[tokio::test]
    async fn empty_input_submits_nothing() {
        let (tx, rx) = flume::unbounded::<Batch>();
        let dispatcher = BatchDispatcher::new(tx, 4, CancellationToken::new());

        let stats = dispatcher.finish().await.unwrap();
        assert_eq!(stats, DispatchStats::default());
        assert!(rx.drain().next().is_none());
    }

    #[tokio::test]
    async fn full_queue_blocks_until_drained() {
        let (tx, rx) = flume::bounded(1);
        let mut dispatcher = BatchDispatcher::new(tx, 1, CancellationToken::new());
        let consumer = tokio::spawn(async move {
            let mut seen = 0;
            while let Ok(batch) = rx.recv_async().await {
                seen += batch.len();
            }
            seen
        });

        for block in blocks(b"a\nb\nc\n") {
            dispatcher.push(block).await.unwrap();
        }
        let stats = dispatcher.finish().await.unwrap();

        assert_eq!(consumer.await.unwrap(), 3);
        assert_eq!(stats.batches, 3);
        assert!(stats.blocked >= 1);
    }

    #[tokio::test]
    async fn cancellation_stops_submission() {
        let (tx, _rx) = flume::bounded(1);
        let cancel = CancellationToken::new();
        let mut dispatcher = BatchDispatcher::new(tx, 1, cancel.clone());

        dispatcher.push(blocks(b"a\n").remove(0)).await.unwrap();
        cancel.cancel();
        let err = dispatcher.push(blocks(b"b\n").remove(0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (tx, rx) = flume::bounded(1);
        drop(rx);
        let mut dispatcher = BatchDispatcher::new(tx, 1, CancellationToken::new());

        let err = dispatcher.push(blocks(b"a\n").remove(0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::QueueClosed));
    }
}
