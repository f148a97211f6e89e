//! Chunked, resumable download of one media reference into a staging file.
//!
//! The staging file only ever holds a contiguous prefix of the resource.
//! Chunks are fetched with bounded fan-out but written strictly in order, so
//! after any failure the file can be truncated to the last complete chunk and
//! the transfer resumed from there.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::io::SeekFrom;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use strata_core::{IngestError, IngestResult, MediaReference};
use strata_infra::{RateLimiter, RetryPolicy};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::fetch::Fetcher;

/// Result of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Size of the staged file.
    pub bytes_total: u64,
    /// Offset the transfer resumed from; zero for a fresh download.
    pub resumed_from: u64,
    /// Size announced by the job or the upstream, if any.
    pub expected_size: Option<u64>,
}

#[derive(Clone)]
pub struct ChunkedTransfer {
    fetcher: Arc<dyn Fetcher>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    chunk_size: u64,
    fanout: usize,
}

impl ChunkedTransfer {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        limiter: RateLimiter,
        retry: RetryPolicy,
        chunk_size: u64,
        fanout: usize,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            retry,
            chunk_size: chunk_size.max(1),
            fanout: fanout.clamp(1, 4),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Download `media` into `staging_path`, resuming from whatever complete
    /// chunks the file already holds.
    ///
    /// `progress` receives the number of staged bytes after every chunk.
    #[tracing::instrument(skip(self, media, cancel, progress), fields(url = %media.source_url))]
    pub async fn download(
        &self,
        media: &MediaReference,
        staging_path: &Path,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> IngestResult<TransferOutcome> {
        let url = media.source_url.as_str();

        let expected_size = match media.expected_size {
            Some(size) => Some(size),
            None => self.probe_size(url, cancel).await?,
        };

        if let Some(parent) = staging_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(staging_path)
            .await?;

        let existing = file.metadata().await?.len();
        let resume_from = match expected_size {
            // Larger than the resource: the staged data cannot be trusted
            Some(size) if existing > size => 0,
            _ => existing / self.chunk_size * self.chunk_size,
        };
        file.set_len(resume_from).await?;
        file.seek(SeekFrom::Start(resume_from)).await?;

        if resume_from > 0 {
            tracing::info!(
                resume_from,
                expected_size = ?expected_size,
                "Resuming transfer from staged chunks"
            );
        }
        progress(resume_from);

        let written = match expected_size {
            Some(size) => {
                self.fetch_known(url, &mut file, resume_from, size, cancel, progress)
                    .await?
            }
            None => {
                self.fetch_unknown(url, &mut file, resume_from, cancel, progress)
                    .await?
            }
        };

        file.flush().await?;
        file.sync_all().await?;

        if let Some(expected) = expected_size {
            if written != expected {
                return Err(IngestError::IncompleteTransfer {
                    expected,
                    actual: written,
                });
            }
        }
        // A declared size is only a hint; the upstream must have nothing past it
        if let Some(declared) = media.expected_size {
            let overflow = self.fetch_chunk(url, declared..declared + 1, cancel).await?;
            if !overflow.is_empty() {
                tracing::warn!(declared, "Upstream resource is larger than declared");
                return Err(IngestError::IncompleteTransfer {
                    expected: declared,
                    actual: declared + overflow.len() as u64,
                });
            }
        }

        tracing::debug!(bytes_total = written, resumed_from = resume_from, "Transfer complete");

        Ok(TransferOutcome {
            bytes_total: written,
            resumed_from: resume_from,
            expected_size,
        })
    }

    async fn probe_size(&self, url: &str, cancel: &CancellationToken) -> IngestResult<Option<u64>> {
        let size = self
            .retry
            .run("probe_size", cancel, move |_| async move {
                self.limiter.acquire().await;
                self.fetcher.content_length(url).await
            })
            .await?;
        Ok(size)
    }

    async fn fetch_chunk(
        &self,
        url: &str,
        range: Range<u64>,
        cancel: &CancellationToken,
    ) -> IngestResult<Bytes> {
        let wanted = range.end - range.start;
        let chunk = self
            .retry
            .run("fetch_chunk", cancel, move |_| {
                let range = range.clone();
                async move {
                    self.limiter.acquire().await;
                    self.fetcher.fetch_range(url, range).await
                }
            })
            .await?;

        if chunk.len() as u64 > wanted {
            return Ok(chunk.slice(..wanted as usize));
        }
        Ok(chunk)
    }

    async fn fetch_known(
        &self,
        url: &str,
        file: &mut File,
        resume_from: u64,
        size: u64,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> IngestResult<u64> {
        let chunk_size = self.chunk_size;
        let ranges = (resume_from..size)
            .step_by(chunk_size as usize)
            .map(move |start| start..(start + chunk_size).min(size));

        let mut chunks = stream::iter(ranges)
            .map(move |range| async move {
                let expected = range.end - range.start;
                self.fetch_chunk(url, range, cancel)
                    .await
                    .map(|bytes| (expected, bytes))
            })
            .buffered(self.fanout);

        let mut written = resume_from;
        while let Some(result) = chunks.next().await {
            let (expected, bytes) = result?;
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
            progress(written);

            if (bytes.len() as u64) < expected {
                // Resource ended early; later chunks would leave a gap
                return Err(IngestError::IncompleteTransfer {
                    expected: size,
                    actual: written,
                });
            }
        }
        Ok(written)
    }

    async fn fetch_unknown(
        &self,
        url: &str,
        file: &mut File,
        resume_from: u64,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> IngestResult<u64> {
        let mut written = resume_from;
        loop {
            let range = written..written + self.chunk_size;
            let bytes = self.fetch_chunk(url, range, cancel).await?;
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
            progress(written);

            if (bytes.len() as u64) < self.chunk_size {
                return Ok(written);
            }
        }
    }
}
