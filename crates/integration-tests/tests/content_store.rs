//! Content store over SQLite source rows and blobs on disk

use perennial_core::application::ContentStore;
use perennial_core::domain::PollableRef;
use perennial_core::port::blob_store::mocks::InMemoryBlobStore;
use perennial_core::port::time_provider::mocks::MockTimeProvider;
use perennial_core::port::BlobStore;
use perennial_infra_fs::FileBlobStore;
use perennial_infra_sqlite::{create_pool, run_migrations, SqliteSourceRepository};
use std::sync::Arc;
use std::time::Duration;

async fn source_repo() -> Arc<SqliteSourceRepository> {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteSourceRepository::new(pool))
}

fn clock() -> Arc<MockTimeProvider> {
    Arc::new(MockTimeProvider::new(1_700_000_000_000))
}

#[tokio::test]
async fn test_identical_content_is_stored_once() {
    let blobs = Arc::new(InMemoryBlobStore::new());
    let store = ContentStore::new(source_repo().await, blobs.clone(), clock());
    let feed = PollableRef::new("Feed", 1);

    let first = store.store(&feed, b"<rss>v1</rss>").await.unwrap();
    let second = store.store(&PollableRef::new("Feed", 2), b"<rss>v1</rss>").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(blobs.put_count(), 1);

    // The first writer owns the row
    assert_eq!(store.sources_for(&feed).await.unwrap().len(), 1);
    assert!(store.sources_for(&PollableRef::new("Feed", 2)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_content_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = Arc::new(FileBlobStore::open(dir.path()).await.unwrap());
    let store = ContentStore::new(source_repo().await, blobs, clock());

    let fingerprint = store
        .store(&PollableRef::new("Website", 1), b"<html>hello</html>")
        .await
        .unwrap();

    let handle = store.retrieve(&fingerprint).await.unwrap().unwrap();
    assert_eq!(handle.raw_content().await.unwrap(), b"<html>hello</html>");
    assert_eq!(handle.content_size().await.unwrap(), 18);
    assert_eq!(handle.source().pollable, PollableRef::new("Website", 1));

    assert!(store.delete(&fingerprint).await.unwrap());
    assert!(store.retrieve(&fingerprint).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rolled_back_transaction_leaves_no_blob() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = Arc::new(FileBlobStore::open(dir.path()).await.unwrap());
    let store = ContentStore::new(source_repo().await, blobs.clone(), clock());
    let site = PollableRef::new("Website", 1);

    let mut tx = store.begin().await.unwrap();
    let a = tx.store(&site, b"page a").await.unwrap();
    let b = tx.store(&site, b"page b").await.unwrap();
    assert!(blobs.exists(&a).await.unwrap());
    tx.rollback().await.unwrap();

    assert!(!blobs.exists(&a).await.unwrap());
    assert!(!blobs.exists(&b).await.unwrap());
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dropped_transaction_leaves_no_blob() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = Arc::new(FileBlobStore::open(dir.path()).await.unwrap());
    let store = ContentStore::new(source_repo().await, blobs.clone(), clock());

    let fingerprint = {
        let mut tx = store.begin().await.unwrap();
        tx.store(&PollableRef::new("Website", 1), b"abandoned").await.unwrap()
    };

    // Cleanup runs on a spawned task
    for _ in 0..50 {
        if !blobs.exists(&fingerprint).await.unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!blobs.exists(&fingerprint).await.unwrap());
    assert_eq!(store.count().await.unwrap(), 0);
}
