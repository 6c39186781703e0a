use std::ops::AddAssign;

use flume::Receiver;
use memchr::memchr;
use tokio::task::JoinHandle;

use crate::{dispatch::Batch, observability::log_debug, stats::StatsStore};

/// One valid `key;value` line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedRecord<'a> {
    pub key: &'a [u8],
    pub value: f64,
}

/// Splits a line at its first `;` and parses the rest as a finite `f64`.
///
/// Returns `None` for lines without a delimiter or with an unparseable value.
pub fn parse_line(line: &[u8]) -> Option<ParsedRecord<'_>> {
    let split = memchr(b';', line)?;
    let value = parse_value(&line[split + 1..])?;

    Some(ParsedRecord {
        key: &line[..split],
        value,
    })
}

fn parse_value(bytes: &[u8]) -> Option<f64> {
    if let Some(value) = parse_tenths(bytes) {
        return Some(value);
    }
    let value: f64 = std::str::from_utf8(bytes).ok()?.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Fast path for `-?d+.d`, the shape of nearly every measurement.
///
/// The integer number of tenths is exact, and dividing it by ten rounds once,
/// so the result is bit-identical to the general parser.
fn parse_tenths(bytes: &[u8]) -> Option<f64> {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    let [int @ .., b'.', frac] = digits else {
        return None;
    };
    if int.is_empty() || int.len() > 14 || !frac.is_ascii_digit() {
        return None;
    }

    let mut tenths: i64 = 0;
    for byte in int {
        if !byte.is_ascii_digit() {
            return None;
        }
        tenths = tenths * 10 + i64::from(byte - b'0');
    }
    tenths = tenths * 10 + i64::from(frac - b'0');

    let value = tenths as f64 / 10.0;
    Some(if negative { -value } else { value })
}

/// Lines a worker accepted and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTally {
    pub accepted: u64,
    pub rejected: u64,
}

impl AddAssign for WorkerTally {
    fn add_assign(&mut self, other: Self) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
    }
}

/// What a worker hands back once the queue is closed and drained.
#[derive(Debug, Default)]
pub struct WorkerOutput {
    pub store: StatsStore,
    pub tally: WorkerTally,
}

/// Aggregates batches into a private [`StatsStore`]. No state is shared
/// with other workers until the final merge.
pub struct AggregationWorker {
    id: usize,
    store: StatsStore,
    tally: WorkerTally,
}

impl AggregationWorker {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            store: StatsStore::new(),
            tally: WorkerTally::default(),
        }
    }

    pub fn process(&mut self, batch: &Batch) {
        for line in batch.lines() {
            match parse_line(line) {
                Some(record) => {
                    self.store.record(record.key, record.value);
                    self.tally.accepted += 1;
                }
                None => self.tally.rejected += 1,
            }
        }
    }

    /// Takes batches until the queue is closed and empty.
    pub fn run(mut self, queue: Receiver<Batch>) -> WorkerOutput {
        let mut batches = 0u64;
        while let Ok(batch) = queue.recv() {
            self.process(&batch);
            batches += 1;
        }
        log_debug!(
            component = "worker",
            event = "worker_drained",
            worker = self.id,
            batches,
            keys = self.store.len(),
            accepted = self.tally.accepted,
            rejected = self.tally.rejected,
        );

        WorkerOutput {
            store: self.store,
            tally: self.tally,
        }
    }

    /// Runs the worker on tokio's blocking pool; it only ever waits on the queue.
    pub fn spawn(self, queue: Receiver<Batch>) -> JoinHandle<WorkerOutput> {
        tokio::task::spawn_blocking(move || self.run(queue))
    }
}
