#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;
use std::time::Duration;
use strata_core::config::RetrySettings;
use strata_core::{IngestError, IngestResult};
use strata_infra::RetryPolicy;
use strata_worker::Fetcher;

/// Deterministic, non-repeating test payload.
pub fn payload(len: usize) -> Bytes {
    let mut state: u32 = 0x9e37_79b9;
    let data: Vec<u8> = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect();
    Bytes::from(data)
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(RetrySettings {
        max_retries,
        attempt_timeout: Duration::from_secs(10),
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        jitter_ratio: 0.0,
    })
}

/// In-memory upstream serving fixed resources by URL.
#[derive(Default)]
pub struct MemoryFetcher {
    resources: HashMap<String, Bytes>,
    announce_size: bool,
    failing_offset: Mutex<Option<u64>>,
    requests: Mutex<Vec<(String, Range<u64>)>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self {
            announce_size: true,
            ..Default::default()
        }
    }

    pub fn with_resource(mut self, url: &str, data: Bytes) -> Self {
        self.resources.insert(url.to_string(), data);
        self
    }

    /// Upstream that never sends a content length.
    pub fn without_size(mut self) -> Self {
        self.announce_size = false;
        self
    }

    /// Every range starting at `offset` fails with a transient error.
    pub fn fail_at(&self, offset: Option<u64>) {
        *self.failing_offset.lock().unwrap() = offset;
    }

    pub fn requests(&self) -> Vec<(String, Range<u64>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_starting_at(&self, offset: u64) -> usize {
        self.requests()
            .iter()
            .filter(|(_, range)| range.start == offset)
            .count()
    }

    fn resource(&self, url: &str) -> IngestResult<&Bytes> {
        self.resources
            .get(url)
            .ok_or_else(|| IngestError::TransientNetwork(format!("connection reset: {}", url)))
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn content_length(&self, url: &str) -> IngestResult<Option<u64>> {
        let data = self.resource(url)?;
        Ok(self.announce_size.then_some(data.len() as u64))
    }

    async fn fetch_range(&self, url: &str, range: Range<u64>) -> IngestResult<Bytes> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), range.clone()));

        if *self.failing_offset.lock().unwrap() == Some(range.start) {
            return Err(IngestError::TransientNetwork("connection reset".into()));
        }

        let data = self.resource(url)?;
        let len = data.len() as u64;
        let start = range.start.min(len) as usize;
        let end = range.end.min(len) as usize;
        Ok(data.slice(start..end))
    }
}
