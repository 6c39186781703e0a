use std::{io, path::Path};

use bytes::Bytes;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt},
};

use crate::observability::log_debug;

/// Reads its source front to back in chunks of exactly `chunk_size` bytes.
///
/// Only the last chunk may be shorter. Short reads from the underlying reader
/// are refilled, so chunk boundaries depend on `chunk_size` alone.
pub struct ChunkSource<R> {
    reader: R,
    chunk_size: usize,
    bytes_read: u64,
    chunks: u64,
    exhausted: bool,
}

impl ChunkSource<File> {
    pub async fn open(path: impl AsRef<Path>, chunk_size: usize) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        log_debug!(
            component = "chunk",
            event = "source_opened",
            path = %path.display(),
            chunk_size,
        );
        Ok(Self::new(file, chunk_size))
    }
}

impl<R> ChunkSource<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");

        Self {
            reader,
            chunk_size,
            bytes_read: 0,
            chunks: 0,
            exhausted: false,
        }
    }

    /// Next chunk in file order, or `None` once the source is exhausted.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut chunk = vec![0; self.chunk_size];
        let mut filled = 0;

        while filled < self.chunk_size {
            match self.reader.read(&mut chunk[filled..]).await {
                Ok(0) => {
                    self.exhausted = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        if filled == 0 {
            return Ok(None);
        }

        chunk.truncate(filled);
        self.bytes_read += filled as u64;
        self.chunks += 1;

        Ok(Some(Bytes::from(chunk)))
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }
}
