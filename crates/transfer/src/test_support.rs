//! In-memory object store used by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::chunked::part_etag;
use crate::store::{
    CompletedPart, MultipartUpload, ObjectHead, ObjectStoreClient, RemotePartRecord, StoreError,
    StoreFuture,
};

/// Per-operation call counters.
#[derive(Default)]
pub(crate) struct Calls {
    pub head: AtomicUsize,
    pub get: AtomicUsize,
    pub initiate: AtomicUsize,
    pub put: AtomicUsize,
    pub list: AtomicUsize,
    pub complete: AtomicUsize,
    pub abort: AtomicUsize,
}

/// Mock store holding one bucket of objects and any number of uploads.
#[derive(Default)]
pub(crate) struct MockStore {
    pub calls: Calls,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    /// Upload id to (key, stored parts).
    uploads: Mutex<HashMap<String, (String, BTreeMap<u32, Vec<u8>>)>>,
    /// Part numbers passed to `put_part`, in call order.
    pub put_numbers: Mutex<Vec<u32>>,
    /// Part lists passed to `complete_multipart_upload`.
    pub completed: Mutex<Vec<Vec<CompletedPart>>>,
    pub fail_put: Mutex<HashSet<u32>>,
    pub fail_get_offsets: Mutex<HashSet<u64>>,
    pub get_delays: Mutex<HashMap<u64, Duration>>,
    pub fail_complete: AtomicBool,
    pub fail_list: AtomicBool,
    pub hide_content_length: AtomicBool,
    next_id: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_object(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Registers an unfinished upload with pre-stored parts.
    pub fn seed_upload(&self, upload: &MultipartUpload, parts: Vec<(u32, Vec<u8>)>) {
        self.uploads
            .lock()
            .unwrap()
            .insert(
                upload.upload_id.clone(),
                (upload.key.clone(), parts.into_iter().collect()),
            );
    }

    pub fn has_upload(&self, upload_id: &str) -> bool {
        self.uploads.lock().unwrap().contains_key(upload_id)
    }
}

impl ObjectStoreClient for MockStore {
    fn head_object<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectHead> {
        Box::pin(async move {
            self.calls.head.fetch_add(1, Ordering::SeqCst);
            let objects = self.objects.lock().unwrap();
            let data = objects
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            Ok(ObjectHead {
                content_length: if self.hide_content_length.load(Ordering::SeqCst) {
                    None
                } else {
                    Some(data.len() as u64)
                },
                etag: Some(part_etag(data)),
            })
        })
    }

    fn get_range<'a>(
        &'a self,
        key: &'a str,
        start: u64,
        end_inclusive: u64,
    ) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.calls.get.fetch_add(1, Ordering::SeqCst);
            let delay = self.get_delays.lock().unwrap().get(&start).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_get_offsets.lock().unwrap().contains(&start) {
                return Err(StoreError::Backend(format!("injected get failure at {start}")));
            }

            let objects = self.objects.lock().unwrap();
            let data = objects
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            if start > end_inclusive || end_inclusive >= data.len() as u64 {
                return Err(StoreError::InvalidRange {
                    key: key.to_string(),
                    start,
                    end: end_inclusive,
                });
            }
            Ok(data[start as usize..=end_inclusive as usize].to_vec())
        })
    }

    fn initiate_multipart_upload<'a>(&'a self, key: &'a str) -> StoreFuture<'a, MultipartUpload> {
        Box::pin(async move {
            self.calls.initiate.fetch_add(1, Ordering::SeqCst);
            let id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.uploads
                .lock()
                .unwrap()
                .insert(id.clone(), (key.to_string(), BTreeMap::new()));
            Ok(MultipartUpload::new(key, id))
        })
    }

    fn put_part<'a>(
        &'a self,
        upload: &'a MultipartUpload,
        part_number: u32,
        data: &'a [u8],
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            self.calls.put.fetch_add(1, Ordering::SeqCst);
            self.put_numbers.lock().unwrap().push(part_number);
            // Yield so that concurrent workers interleave.
            tokio::task::yield_now().await;
            if self.fail_put.lock().unwrap().contains(&part_number) {
                let msg = format!("injected put failure for part {part_number}");
                return Err(StoreError::Backend(msg));
            }

            let mut uploads = self.uploads.lock().unwrap();
            let (_, parts) = uploads
                .get_mut(&upload.upload_id)
                .ok_or_else(|| StoreError::NoSuchUpload(upload.upload_id.clone()))?;
            parts.insert(part_number, data.to_vec());
            Ok(part_etag(data))
        })
    }

    fn list_parts<'a>(
        &'a self,
        upload: &'a MultipartUpload,
    ) -> StoreFuture<'a, Vec<RemotePartRecord>> {
        Box::pin(async move {
            self.calls.list.fetch_add(1, Ordering::SeqCst);
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("injected list failure".into()));
            }
            let uploads = self.uploads.lock().unwrap();
            let (_, parts) = uploads
                .get(&upload.upload_id)
                .ok_or_else(|| StoreError::NoSuchUpload(upload.upload_id.clone()))?;
            Ok(parts
                .iter()
                .map(|(&number, data)| RemotePartRecord {
                    number,
                    checksum: part_etag(data),
                    size: data.len() as u64,
                })
                .collect())
        })
    }

    fn complete_multipart_upload<'a>(
        &'a self,
        upload: &'a MultipartUpload,
        parts: &'a [CompletedPart],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.calls.complete.fetch_add(1, Ordering::SeqCst);
            self.completed.lock().unwrap().push(parts.to_vec());
            if self.fail_complete.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("injected complete failure".into()));
            }

            let (_, stored) = self
                .uploads
                .lock()
                .unwrap()
                .remove(&upload.upload_id)
                .ok_or_else(|| StoreError::NoSuchUpload(upload.upload_id.clone()))?;
            let mut object = Vec::new();
            for part in parts {
                let data = stored
                    .get(&part.number)
                    .ok_or_else(|| StoreError::InvalidPart(part.number.to_string()))?;
                object.extend_from_slice(data);
            }
            self.put_object(&upload.key, object);
            Ok(())
        })
    }

    fn abort_multipart_upload<'a>(&'a self, upload: &'a MultipartUpload) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.calls.abort.fetch_add(1, Ordering::SeqCst);
            self.uploads.lock().unwrap().remove(&upload.upload_id);
            Ok(())
        })
    }

    fn list_multipart_uploads(&self) -> StoreFuture<'_, Vec<MultipartUpload>> {
        Box::pin(async move {
            Ok(self
                .uploads
                .lock()
                .unwrap()
                .iter()
                .map(|(id, (key, _))| MultipartUpload::new(key.clone(), id.clone()))
                .collect())
        })
    }
}
