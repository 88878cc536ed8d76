//! Drives the transfer coordinator against a real directory store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ossync_dir_store::DirStore;
use ossync_transfer::{
    ObjectStoreClient, TransferConfig, TransferCoordinator, TransferEvent, TransferOutcome,
    object_key,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

const PART: u64 = 64 * 1024;

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

struct Fixture {
    _tmp: TempDir,
    work: PathBuf,
    store: Arc<DirStore>,
}

impl Fixture {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let store = DirStore::open(tmp.path().join("bucket")).await.unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        Self {
            _tmp: tmp,
            work,
            store: Arc::new(store),
        }
    }

    fn coordinator(&self) -> TransferCoordinator {
        TransferCoordinator::new(self.store.clone(), TransferConfig::new(PART, 4))
    }

    fn write(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.work.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn object(&self, key: &str) -> Vec<u8> {
        std::fs::read(self.store.root().join("objects").join(key)).unwrap()
    }
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let fx = Fixture::new().await;
    let data = payload((PART * 5 + 123) as usize, 1);
    let source = fx.write("report.bin", &data);
    let key = object_key("archive/", &source).unwrap();
    assert_eq!(key, "archive/report.bin");

    let coord = fx.coordinator();
    let (_, uploaded) = coord.start_upload(&source, &key).await.unwrap();
    let uploaded = uploaded.into_result().unwrap();
    assert_eq!(uploaded.parts_planned, 6);
    assert_eq!(uploaded.bytes_moved, data.len() as u64);
    assert_eq!(fx.object(&key), data);
    assert!(fx.store.list_multipart_uploads().await.unwrap().is_empty());

    let dest = fx.work.join("restored/report.bin");
    let downloaded = coord.resume_download(&key, &dest).await;
    assert!(downloaded.is_success(), "{:?}", downloaded.fatal_error);
    assert_eq!(read(&dest), data);
}

#[tokio::test]
async fn interrupted_upload_resumes_with_delta_only() {
    let fx = Fixture::new().await;
    let data = payload((PART * 3 + 10) as usize, 2);
    let source = fx.write("big.bin", &data);

    // A previous run stored the first two parts before dying.
    let upload = fx.store.initiate_multipart_upload("big.bin").await.unwrap();
    let p = PART as usize;
    fx.store.put_part(&upload, 1, &data[..p]).await.unwrap();
    fx.store.put_part(&upload, 2, &data[p..2 * p]).await.unwrap();

    let result = fx.coordinator().resume_upload(&source, &upload).await;

    assert!(result.is_success(), "{:?}", result.fatal_error);
    assert_eq!(result.parts_planned, 4);
    assert_eq!(result.parts_skipped, 2);
    assert_eq!(result.bytes_moved, data.len() as u64 - 2 * PART);
    assert_eq!(fx.object("big.bin"), data);
}

#[tokio::test]
async fn modified_source_overwrites_changed_parts() {
    let fx = Fixture::new().await;
    let old = payload((PART * 2) as usize, 3);
    let source = fx.write("doc.bin", &old);

    let upload = fx.store.initiate_multipart_upload("doc.bin").await.unwrap();
    let p = PART as usize;
    fx.store.put_part(&upload, 1, &old[..p]).await.unwrap();
    fx.store.put_part(&upload, 2, &old[p..]).await.unwrap();

    let mut new = old.clone();
    new[p + 5] ^= 0xff;
    std::fs::write(&source, &new).unwrap();

    let result = fx.coordinator().resume_upload(&source, &upload).await;

    assert!(result.is_success());
    assert_eq!(result.parts_skipped, 1);
    assert_eq!(result.bytes_moved, PART);
    assert_eq!(fx.object("doc.bin"), new);
}

#[tokio::test]
async fn partial_download_resumes_and_repeat_is_no_op() {
    let fx = Fixture::new().await;
    let data = payload((PART * 3 + 77) as usize, 4);
    let source = fx.write("movie.bin", &data);
    let coord = fx.coordinator();
    coord
        .start_upload(&source, "movie.bin")
        .await
        .unwrap()
        .1
        .into_result()
        .unwrap();

    let dest = fx.work.join("movie.part");
    std::fs::write(&dest, &data[..1000]).unwrap();

    let first = coord.resume_download("movie.bin", &dest).await;
    assert!(first.is_success());
    assert_eq!(first.outcome, TransferOutcome::Completed);
    assert_eq!(first.bytes_moved, data.len() as u64 - 1000);
    assert_eq!(read(&dest), data);

    let second = coord.resume_download("movie.bin", &dest).await;
    assert_eq!(second.outcome, TransferOutcome::AlreadyComplete);
    assert_eq!(second.bytes_moved, 0);
}

#[tokio::test]
async fn download_of_missing_object_fails_cleanly() {
    let fx = Fixture::new().await;
    let dest = fx.work.join("nothing.bin");

    let result = fx.coordinator().resume_download("nothing.bin", &dest).await;
    assert!(!result.is_success());
    assert!(result.into_result().is_err());
    assert!(!dest.exists());
}

#[tokio::test]
async fn events_trace_a_full_upload() {
    let fx = Fixture::new().await;
    let source = fx.write("small.bin", &payload((PART + 1) as usize, 5));
    let (tx, mut rx) = mpsc::channel(64);

    let coord = fx.coordinator().with_events(tx);
    let (_, result) = coord.start_upload(&source, "small.bin").await.unwrap();
    assert!(result.is_success());
    drop(coord);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let completed = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::PartCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
    assert!(matches!(events.first(), Some(TransferEvent::Planned { parts: 2, .. })));
    assert!(matches!(events.last(), Some(TransferEvent::Completed { .. })));
}
