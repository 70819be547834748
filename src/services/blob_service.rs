//! Blob operations: upload, download, metadata, listing, and signed URLs.
//! Transfer methods report throughput alongside the elapsed time.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::api::Timed;
use crate::error::ApiError;
use crate::provider::BlobMetadata;
use crate::state::AppState;

const MAX_SIGNED_URL_SECS: u64 = 7 * 24 * 3600;

/// Transfer result with throughput, computed from payload size and
/// wall-clock time.
#[derive(Debug, Serialize)]
pub struct TransferStats {
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub bytes_per_sec: u64,
}

impl TransferStats {
    fn new(bytes: u64, elapsed_ms: u64) -> Self {
        let bytes_per_sec = if elapsed_ms == 0 {
            bytes * 1000
        } else {
            bytes * 1000 / elapsed_ms
        };
        Self { bytes, elapsed_ms, bytes_per_sec }
    }
}

pub struct BlobService {
    state: AppState,
}

impl BlobService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<Timed<(BlobMetadata, TransferStats)>, ApiError> {
        if bytes.is_empty() {
            return Err(ApiError::validation("Upload body must not be empty"));
        }
        let blobs = self.state.capabilities.blobs().await?;
        let size = bytes.len() as u64;
        let started = Instant::now();
        let metadata = blobs.put(path, bytes, content_type).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        let stats = TransferStats::new(size, elapsed);
        tracing::info!(path, size, elapsed, "blob uploaded");
        Ok(Timed::new((metadata, stats), elapsed))
    }

    pub async fn download(
        &self,
        path: &str,
    ) -> Result<Timed<(Vec<u8>, BlobMetadata)>, ApiError> {
        let blobs = self.state.capabilities.blobs().await?;
        let started = Instant::now();
        let (bytes, metadata) = blobs.get(path).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(path, size = bytes.len(), elapsed, "blob downloaded");
        Ok(Timed::new((bytes, metadata), elapsed))
    }

    pub async fn metadata(&self, path: &str) -> Result<Timed<BlobMetadata>, ApiError> {
        let blobs = self.state.capabilities.blobs().await?;
        let started = Instant::now();
        let metadata = blobs.metadata(path).await?;
        Ok(Timed::new(metadata, started.elapsed().as_millis() as u64))
    }

    pub async fn delete(&self, path: &str) -> Result<Timed<()>, ApiError> {
        let blobs = self.state.capabilities.blobs().await?;
        let started = Instant::now();
        blobs.delete(path).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(path, elapsed, "blob deleted");
        Ok(Timed::new((), elapsed))
    }

    pub async fn list(
        &self,
        prefix: &str,
        max: u32,
    ) -> Result<Timed<Vec<BlobMetadata>>, ApiError> {
        let blobs = self.state.capabilities.blobs().await?;
        let started = Instant::now();
        let entries = blobs.list(prefix, max).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::debug!(prefix, count = entries.len(), elapsed, "blobs listed");
        Ok(Timed::new(entries, elapsed))
    }

    /// Time-boxed signed download URL. Expiry is clamped to seven days,
    /// the longest the signing scheme honors.
    pub async fn signed_read_url(
        &self,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<Timed<String>, ApiError> {
        if expires_in_secs == 0 {
            return Err(ApiError::validation("Expiry must be a positive number of seconds"));
        }
        let expires = Duration::from_secs(expires_in_secs.min(MAX_SIGNED_URL_SECS));
        let blobs = self.state.capabilities.blobs().await?;
        let started = Instant::now();
        let url = blobs.signed_read_url(path, expires).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(path, expires_secs = expires.as_secs(), elapsed, "signed url issued");
        Ok(Timed::new(url, elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_scales_with_elapsed_time() {
        let stats = TransferStats::new(10_000, 500);
        assert_eq!(stats.bytes_per_sec, 20_000);
    }

    #[test]
    fn instant_transfers_do_not_divide_by_zero() {
        let stats = TransferStats::new(1024, 0);
        assert_eq!(stats.bytes_per_sec, 1024 * 1000);
    }
}
