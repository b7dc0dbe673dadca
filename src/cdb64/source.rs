//! Byte-range I/O abstraction shared identically by memory/file/HTTP sources.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Result, WayfinderError};

/// Positions beyond this are rejected: several CDB64 offsets travel over the
/// wire as doubles in non-Rust callers of the same format, which only have
/// exact integer precision up to `2^53 - 1`.
pub const MAX_SAFE_POSITION: u64 = (1u64 << 53) - 1;

/// A random-access byte source: `read(offset, size) -> bytes`, plus `close`.
/// The CDB64 reader is implemented once against this trait and is identical
/// across every backing implementation.
#[async_trait]
pub trait ByteRangeSource: Send + Sync {
    /// Read exactly `size` bytes starting at `offset`.
    async fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>>;

    /// Release any held resources. Idempotent.
    async fn close(&self) {}
}

fn check_position(offset: u64) -> Result<()> {
    if offset > MAX_SAFE_POSITION {
        return Err(WayfinderError::PositionOutOfRange(offset));
    }
    Ok(())
}

/// An in-memory byte source, used in tests and for small embedded indexes.
pub struct MemorySource {
    bytes: Vec<u8>,
}

impl MemorySource {
    /// Wrap an owned byte buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[async_trait]
impl ByteRangeSource for MemorySource {
    async fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        check_position(offset)?;
        let start = offset as usize;
        let end = start + size as usize;
        if end > self.bytes.len() {
            return Err(WayfinderError::RangeNotSatisfied {
                offset,
                size,
                reason: "read past end of in-memory buffer".into(),
            });
        }
        Ok(self.bytes[start..end].to_vec())
    }
}

/// A local-file byte source, backed by a shared tokio file handle.
pub struct FileSource {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl FileSource {
    /// Open `path` for random-access reads.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self { file: tokio::sync::Mutex::new(file) })
    }
}

#[async_trait]
impl ByteRangeSource for FileSource {
    async fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        check_position(offset)?;
        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// An HTTP byte source, issuing `Range: bytes=offset-(offset+size-1)` and
/// requiring a `206 Partial Content` response of exactly `size` bytes.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    timeout: std::time::Duration,
}

impl HttpSource {
    /// Construct a source reading ranges of `url` via `client`, with a
    /// per-request timeout (default 10s per spec.md §5).
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into(), timeout: std::time::Duration::from_secs(10) }
    }

    /// Override the per-read timeout.
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ByteRangeSource for HttpSource {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        check_position(offset)?;
        let range = format!("bytes={}-{}", offset, offset + size - 1);
        let request = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range)
            .timeout(self.timeout);

        let response = request.send().await.map_err(|e| WayfinderError::RangeNotSatisfied {
            offset,
            size,
            reason: format!("request failed: {e}"),
        })?;

        if response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(WayfinderError::RangeNotSatisfied {
                offset,
                size,
                reason: format!("expected 206 Partial Content, got {}", response.status()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| WayfinderError::RangeNotSatisfied {
            offset,
            size,
            reason: format!("failed to read body: {e}"),
        })?;

        if bytes.len() as u64 != size {
            return Err(WayfinderError::RangeNotSatisfied {
                offset,
                size,
                reason: format!("expected {} bytes, got {}", size, bytes.len()),
            });
        }

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_reads_exact_range() {
        let source = MemorySource::new((0u8..20).collect());
        let bytes = source.read(5, 4).await.unwrap();
        assert_eq!(bytes, vec![5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn memory_source_rejects_read_past_end() {
        let source = MemorySource::new(vec![1, 2, 3]);
        assert!(source.read(0, 10).await.is_err());
    }

    #[tokio::test]
    async fn memory_source_rejects_unsafe_position() {
        let source = MemorySource::new(vec![1, 2, 3]);
        let err = source.read(MAX_SAFE_POSITION + 1, 1).await.unwrap_err();
        assert!(matches!(err, WayfinderError::PositionOutOfRange(_)));
    }

    #[tokio::test]
    async fn file_source_reads_exact_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, (0u8..20).collect::<Vec<u8>>()).await.unwrap();
        let source = FileSource::open(&path).await.unwrap();
        let bytes = source.read(10, 5).await.unwrap();
        assert_eq!(bytes, vec![10, 11, 12, 13, 14]);
    }
}
