use bytes::{Bytes, BytesMut};
use memchr::{memchr, memchr_iter, memrchr};

/// A non-empty run of complete lines.
///
/// Every line is terminated by `\n` except possibly the last line of the
/// input. The bytes are a view into the chunk they were read from, or into the
/// carry buffer for a line that straddled a chunk boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBlock {
    buf: Bytes,
}

impl LineBlock {
    fn new(buf: Bytes) -> Self {
        debug_assert!(!buf.is_empty());
        Self { buf }
    }

    /// Raw bytes of the block, separators included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Lines of the block without their separators.
    pub fn lines(&self) -> Lines<'_> {
        Lines { rest: &self.buf }
    }

    pub fn line_count(&self) -> usize {
        let terminated = memchr_iter(b'\n', &self.buf).count();
        terminated + usize::from(!self.buf.ends_with(b"\n"))
    }

    /// Splits off the first `n` lines (`n > 0`).
    ///
    /// Returns the head, how many lines it holds (at most `n`), and the
    /// remaining lines if the block had more than `n`.
    pub(crate) fn split_lines(self, n: usize) -> (LineBlock, usize, Option<LineBlock>) {
        debug_assert!(n > 0);
        let mut buf = self.buf;
        let mut seen = 0;

        for pos in memchr_iter(b'\n', &buf) {
            seen += 1;
            if seen == n {
                if pos + 1 == buf.len() {
                    return (LineBlock::new(buf), n, None);
                }
                let head = buf.split_to(pos + 1);
                return (LineBlock::new(head), n, Some(LineBlock::new(buf)));
            }
        }

        let lines = seen + usize::from(!buf.ends_with(b"\n"));
        (LineBlock::new(buf), lines, None)
    }
}

/// Iterator over the lines of a [`LineBlock`].
pub struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let line = match memchr(b'\n', self.rest) {
            Some(end) => {
                let line = &self.rest[..end];
                self.rest = &self.rest[end + 1..];
                line
            }
            None => std::mem::take(&mut self.rest),
        };
        Some(line)
    }
}

/// Turns chunks into blocks of complete lines.
///
/// The only state is the carry: the bytes of a line begun in an earlier chunk
/// and not yet terminated. Chunks must be pushed in file order.
#[derive(Debug, Default)]
pub struct LineReassembler {
    carry: BytesMut,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next chunk and returns the lines it completes.
    ///
    /// Yields at most two blocks: the line that finishes the carry (copied),
    /// then the remaining complete lines of the chunk (not copied).
    pub fn push(&mut self, chunk: Bytes) -> impl Iterator<Item = LineBlock> {
        let mut head = None;
        let mut body = None;

        if let (Some(first), Some(last)) = (memchr(b'\n', &chunk), memrchr(b'\n', &chunk)) {
            let mut start = 0;
            if !self.carry.is_empty() {
                self.carry.extend_from_slice(&chunk[..=first]);
                head = Some(LineBlock::new(self.carry.split().freeze()));
                start = first + 1;
            }
            if start <= last {
                body = Some(LineBlock::new(chunk.slice(start..=last)));
            }
            self.carry.extend_from_slice(&chunk[last + 1..]);
        } else {
            self.carry.extend_from_slice(&chunk);
        }

        head.into_iter().chain(body)
    }

    /// Bytes of the pending unterminated line.
    pub fn carry(&self) -> &[u8] {
        &self.carry
    }

    /// Flushes the final line of an input that does not end with `\n`.
    pub fn finish(mut self) -> Option<LineBlock> {
        if self.carry.is_empty() {
            None
        } else {
            Some(LineBlock::new(self.carry.split().freeze()))
        }
    }
}
