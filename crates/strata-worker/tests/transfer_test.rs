mod common;

use common::{fast_retry, payload, MemoryFetcher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{ContentType, IngestError, MediaReference};
use strata_infra::RateLimiter;
use strata_worker::ChunkedTransfer;
use tokio_util::sync::CancellationToken;

const MIB: u64 = 1024 * 1024;
const URL: &str = "https://cdn.example.com/live/stream.mp4";

fn transfer(fetcher: Arc<MemoryFetcher>, fanout: usize) -> ChunkedTransfer {
    ChunkedTransfer::new(
        fetcher,
        RateLimiter::new(10_000, 100),
        fast_retry(2),
        MIB,
        fanout,
    )
}

fn media() -> MediaReference {
    MediaReference::new("creator-1", ContentType::Livestream, URL)
}

#[tokio::test]
async fn test_resume_after_failure_on_third_chunk() {
    let data = payload(5 * MIB as usize);
    let fetcher = Arc::new(MemoryFetcher::new().with_resource(URL, data.clone()));
    let transfer = transfer(fetcher.clone(), 2);
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("stream.part");
    let cancel = CancellationToken::new();

    fetcher.fail_at(Some(2 * MIB));
    let err = transfer
        .download(&media(), &staging, &cancel, &|_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::RetryExhausted { attempts: 3, .. }));
    // Only the chunks before the failing one are staged
    assert_eq!(std::fs::metadata(&staging).unwrap().len(), 2 * MIB);

    fetcher.fail_at(None);
    let progress = AtomicU64::new(0);
    let outcome = transfer
        .download(&media(), &staging, &cancel, &|bytes| {
            progress.store(bytes, Ordering::SeqCst)
        })
        .await
        .unwrap();

    assert_eq!(outcome.resumed_from, 2 * MIB);
    assert_eq!(outcome.bytes_total, 5 * MIB);
    assert_eq!(progress.load(Ordering::SeqCst), 5 * MIB);
    assert_eq!(fetcher.requests_starting_at(0), 1);
    assert_eq!(fetcher.requests_starting_at(MIB), 1);

    let staged = std::fs::read(&staging).unwrap();
    assert!(staged == data.as_ref(), "staged bytes differ from source");
}

#[tokio::test]
async fn test_partial_chunk_is_refetched_on_resume() {
    let data = payload((3 * MIB + 10) as usize);
    let fetcher = Arc::new(MemoryFetcher::new().with_resource(URL, data.clone()));
    let transfer = transfer(fetcher.clone(), 1);
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("stream.part");

    // One full chunk plus half of the second left by an interrupted run
    std::fs::write(&staging, &data[..(MIB + MIB / 2) as usize]).unwrap();

    let outcome = transfer
        .download(&media(), &staging, &CancellationToken::new(), &|_| {})
        .await
        .unwrap();

    assert_eq!(outcome.resumed_from, MIB);
    assert_eq!(fetcher.requests_starting_at(0), 0);
    assert!(std::fs::read(&staging).unwrap() == data.as_ref());
}

#[tokio::test]
async fn test_unknown_size_reads_until_short_chunk() {
    let data = payload((2 * MIB + MIB / 2) as usize);
    let fetcher = Arc::new(
        MemoryFetcher::new()
            .without_size()
            .with_resource(URL, data.clone()),
    );
    let transfer = transfer(fetcher.clone(), 4);
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("nested/dir/stream.part");

    let outcome = transfer
        .download(&media(), &staging, &CancellationToken::new(), &|_| {})
        .await
        .unwrap();

    assert_eq!(outcome.expected_size, None);
    assert_eq!(outcome.bytes_total, data.len() as u64);
    assert_eq!(fetcher.requests().len(), 3);
    assert!(std::fs::read(&staging).unwrap() == data.as_ref());
}

#[tokio::test]
async fn test_short_upstream_is_incomplete_transfer() {
    let data = payload((2 * MIB) as usize);
    let fetcher = Arc::new(MemoryFetcher::new().with_resource(URL, data));
    let transfer = transfer(fetcher, 2);
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("stream.part");

    let declared = media().with_expected_size(3 * MIB);
    let err = transfer
        .download(&declared, &staging, &CancellationToken::new(), &|_| {})
        .await
        .unwrap_err();

    match err {
        IngestError::IncompleteTransfer { expected, actual } => {
            assert_eq!(expected, 3 * MIB);
            assert_eq!(actual, 2 * MIB);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_understated_size_is_incomplete_transfer() {
    let data = payload((5 * MIB) as usize);
    let fetcher = Arc::new(MemoryFetcher::new().with_resource(URL, data));
    let transfer = transfer(fetcher.clone(), 2);
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("stream.part");

    let declared = media().with_expected_size(3 * MIB);
    let err = transfer
        .download(&declared, &staging, &CancellationToken::new(), &|_| {})
        .await
        .unwrap_err();

    match err {
        IngestError::IncompleteTransfer { expected, actual } => {
            assert_eq!(expected, 3 * MIB);
            assert!(actual > 3 * MIB);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fetcher.requests_starting_at(3 * MIB), 1);
}

#[tokio::test]
async fn test_exact_declared_size_succeeds() {
    let data = payload((2 * MIB + 7) as usize);
    let fetcher = Arc::new(MemoryFetcher::new().with_resource(URL, data.clone()));
    let transfer = transfer(fetcher, 2);
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("stream.part");

    let declared = media().with_expected_size(data.len() as u64);
    let outcome = transfer
        .download(&declared, &staging, &CancellationToken::new(), &|_| {})
        .await
        .unwrap();

    assert_eq!(outcome.bytes_total, data.len() as u64);
    assert!(std::fs::read(&staging).unwrap() == data.as_ref());
}

#[tokio::test]
async fn test_oversized_staging_file_restarts_from_zero() {
    let data = payload((MIB + 100) as usize);
    let fetcher = Arc::new(MemoryFetcher::new().with_resource(URL, data.clone()));
    let transfer = transfer(fetcher, 1);
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("stream.part");
    std::fs::write(&staging, vec![0u8; (3 * MIB) as usize]).unwrap();

    let outcome = transfer
        .download(&media(), &staging, &CancellationToken::new(), &|_| {})
        .await
        .unwrap();

    assert_eq!(outcome.resumed_from, 0);
    assert!(std::fs::read(&staging).unwrap() == data.as_ref());
}

#[tokio::test]
async fn test_canceled_transfer_stops() {
    let fetcher = Arc::new(MemoryFetcher::new().with_resource(URL, payload(MIB as usize)));
    let transfer = transfer(fetcher, 1);
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = transfer
        .download(&media(), &dir.path().join("x.part"), &cancel, &|_| {})
        .await
        .unwrap_err();
    assert!(err.is_canceled());
}
