use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::error::{GodModeError, Result};

/// Content reference for an externally supplied rule file.
///
/// The settings surface hands over whatever the platform picker returned;
/// the store only ever reads bytes through this trait.
#[async_trait]
pub trait ImportSource: Send + Sync {
    fn describe(&self) -> String;

    /// Reads the whole payload. Payloads over `limit` bytes are rejected as
    /// malformed, read failures as `ImportIo`.
    async fn read(&self, limit: u64) -> Result<Vec<u8>>;
}

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ImportSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn read(&self, limit: u64) -> Result<Vec<u8>> {
        let io_err = |e: std::io::Error| GodModeError::ImportIo(format!("{}: {}", self.describe(), e));

        let file = tokio::fs::File::open(&self.path).await.map_err(io_err)?;
        let mut buf = Vec::new();
        // One byte past the limit tells an oversized file apart from one that
        // is exactly at the limit.
        file.take(limit.saturating_add(1))
            .read_to_end(&mut buf)
            .await
            .map_err(io_err)?;

        if buf.len() as u64 > limit {
            return Err(too_large(limit));
        }
        Ok(buf)
    }
}

/// In-memory payload, e.g. content already pulled from a sandboxed provider.
pub struct BytesSource {
    name: String,
    bytes: Vec<u8>,
}

impl BytesSource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl ImportSource for BytesSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn read(&self, limit: u64) -> Result<Vec<u8>> {
        if self.bytes.len() as u64 > limit {
            return Err(too_large(limit));
        }
        Ok(self.bytes.clone())
    }
}

fn too_large(limit: u64) -> GodModeError {
    GodModeError::ImportMalformed(format!("payload exceeds {} bytes", limit))
}
