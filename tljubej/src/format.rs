use std::{
    fmt::{self, Display},
    io,
};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::stats::{FrozenStore, RunningStat};

/// 2^52: every `f64` at least this large is a whole number.
const WHOLE_NUMBERS_FROM: f64 = 4_503_599_627_370_496.0;

/// Rounds to one decimal place, halves away from zero.
///
/// Negative zero collapses to `0.0` so `-0.04` prints as `0.0`, not `-0.0`.
/// Magnitudes of 2^52 and above are already whole numbers and are returned
/// as they are.
pub fn round_tenths(value: f64) -> f64 {
    if value.abs() >= WHOLE_NUMBERS_FROM {
        return value + 0.0;
    }
    (value * 10.0).round() / 10.0 + 0.0
}

/// Renders a frozen store as `{key=min/mean/max, ...}` in key order.
///
/// Keys are printed as UTF-8 with invalid sequences replaced.
pub struct Report<'a> {
    stats: &'a FrozenStore,
}

impl<'a> Report<'a> {
    pub fn new(stats: &'a FrozenStore) -> Self {
        Self { stats }
    }

    /// Writes the report to `sink` and flushes it.
    pub async fn write_to<W>(&self, sink: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        sink.write_all(self.to_string().as_bytes()).await?;
        sink.flush().await
    }
}

impl Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let entries = self.stats.iter().filter(|(_, stat)| !stat.is_empty());
        for (idx, (key, stat)) in entries.enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write_entry(f, key, stat)?;
        }
        f.write_str("}")
    }
}

fn write_entry(f: &mut fmt::Formatter<'_>, key: &[u8], stat: &RunningStat) -> fmt::Result {
    let mean = stat.mean().unwrap_or_default();
    write!(
        f,
        "{}={:.1}/{:.1}/{:.1}",
        String::from_utf8_lossy(key),
        round_tenths(stat.min()),
        round_tenths(mean),
        round_tenths(stat.max()),
    )
}

/// Renders `stats` into a new string.
pub fn render(stats: &FrozenStore) -> String {
    Report::new(stats).to_string()
}
