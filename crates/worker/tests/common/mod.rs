#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use comfyrelay_core::asset::AssetMetadata;
use comfyrelay_core::generation::{AttemptRequest, MediaKind, TaskStatus};
use comfyrelay_core::lock_store::{LockStore, LockStoreError, LOCK_KEY_PREFIX};
use comfyrelay_core::persistence::{PersistError, ResultPersister};
use comfyrelay_core::render_backend::{
    AssetDescriptor, BackendError, JobOutputs, RenderBackend, SlotOutputs,
};
use comfyrelay_core::retry::RetryPolicy;
use comfyrelay_worker::dispatcher::{
    AttemptQueue, DispatchError, Dispatcher, MemoryAttemptQueue,
};
use comfyrelay_worker::lock_store::MemoryLockStore;
use comfyrelay_worker::orchestrator::{CompletionOrchestrator, OrchestratorSettings};
use tempfile::TempDir;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Output fixtures
// ---------------------------------------------------------------------------

pub fn descriptor(filename: &str, media: MediaKind) -> AssetDescriptor {
    AssetDescriptor {
        filename: filename.to_string(),
        subfolder: String::new(),
        folder_type: "output".to_string(),
        media,
        format: match media {
            MediaKind::Image => None,
            MediaKind::Video => Some("video/h264-mp4".to_string()),
        },
        frame_rate: None,
        duration_seconds: None,
    }
}

/// One slot holding the given image files.
pub fn image_outputs(slot: &str, files: &[&str]) -> JobOutputs {
    let mut outputs = JobOutputs::default();
    outputs.slots.insert(
        slot.to_string(),
        SlotOutputs {
            images: files.iter().map(|f| descriptor(f, MediaKind::Image)).collect(),
            videos: Vec::new(),
        },
    );
    outputs
}

/// One slot holding the given video files.
pub fn video_outputs(slot: &str, files: &[&str]) -> JobOutputs {
    let mut outputs = JobOutputs::default();
    outputs.slots.insert(
        slot.to_string(),
        SlotOutputs {
            images: Vec::new(),
            videos: files.iter().map(|f| descriptor(f, MediaKind::Video)).collect(),
        },
    );
    outputs
}

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

/// Render backend that replays scripted status responses and writes real
/// files into a scratch directory.
///
/// Once the script runs out every status check reports "not ready".
pub struct FakeBackend {
    dir: PathBuf,
    script: Mutex<VecDeque<Result<JobOutputs, BackendError>>>,
    failing_downloads: AtomicUsize,
    gate: Option<Arc<Notify>>,
    pub fetch_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(dir: PathBuf, gate: Option<Arc<Notify>>) -> Self {
        Self {
            dir,
            script: Mutex::new(VecDeque::new()),
            failing_downloads: AtomicUsize::new(0),
            gate,
            fetch_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: Result<JobOutputs, BackendError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn push_ready(&self, outputs: JobOutputs) {
        self.push(Ok(outputs));
    }

    pub fn push_not_ready(&self) {
        self.push(Ok(JobOutputs::default()));
    }

    /// Fail the next `n` downloads.
    pub fn fail_downloads(&self, n: usize) {
        self.failing_downloads.store(n, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderBackend for FakeBackend {
    async fn fetch_status(&self, _job_id: &str) -> Result<JobOutputs, BackendError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(JobOutputs::default()))
    }

    async fn download_asset(&self, descriptor: &AssetDescriptor) -> Result<PathBuf, BackendError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .failing_downloads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BackendError::Download {
                filename: descriptor.filename.clone(),
                reason: "connection reset".to_string(),
            });
        }

        let path = self.dir.join(&descriptor.filename);
        match descriptor.media {
            MediaKind::Image => image::RgbImage::new(64, 32).save(&path).unwrap(),
            MediaKind::Video => std::fs::write(&path, vec![0u8; 256]).unwrap(),
        }
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// FakePersister
// ---------------------------------------------------------------------------

/// Records every successful write; can be told to fail upcoming writes.
#[derive(Default)]
pub struct FakePersister {
    batches: Mutex<Vec<(String, Vec<AssetMetadata>)>>,
    statuses: Mutex<Vec<(String, TaskStatus)>>,
    failing_appends: AtomicUsize,
    failing_status_writes: AtomicUsize,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FakePersister {
    pub fn fail_appends(&self, n: usize) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    pub fn fail_status_writes(&self, n: usize) {
        self.failing_status_writes.store(n, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<(String, Vec<AssetMetadata>)> {
        self.batches.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, TaskStatus)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultPersister for FakePersister {
    async fn append_asset_records(
        &self,
        job_id: &str,
        batch: &[AssetMetadata],
    ) -> Result<(), PersistError> {
        if take_failure(&self.failing_appends) {
            return Err(PersistError::Database("connection closed".to_string()));
        }
        self.batches
            .lock()
            .unwrap()
            .push((job_id.to_string(), batch.to_vec()));
        Ok(())
    }

    async fn set_job_status(&self, job_id: &str, status: TaskStatus) -> Result<(), PersistError> {
        if take_failure(&self.failing_status_writes) {
            return Err(PersistError::Database("deadlock detected".to_string()));
        }
        self.statuses
            .lock()
            .unwrap()
            .push((job_id.to_string(), status));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FaultyLockStore
// ---------------------------------------------------------------------------

/// Wraps the in-memory store and fails upcoming calls on demand.
pub struct FaultyLockStore {
    inner: Arc<MemoryLockStore>,
    failing_gets: AtomicUsize,
    failing_lock_reads: AtomicUsize,
    failing_claims: AtomicUsize,
    failing_sets: AtomicUsize,
    churn: AtomicBool,
}

impl FaultyLockStore {
    pub fn new(inner: Arc<MemoryLockStore>) -> Self {
        Self {
            inner,
            failing_gets: AtomicUsize::new(0),
            failing_lock_reads: AtomicUsize::new(0),
            failing_claims: AtomicUsize::new(0),
            failing_sets: AtomicUsize::new(0),
            churn: AtomicBool::new(false),
        }
    }

    pub fn fail_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads of execution locks only.
    pub fn fail_lock_reads(&self, n: usize) {
        self.failing_lock_reads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` `set_if_absent` calls.
    pub fn fail_claims(&self, n: usize) {
        self.failing_claims.store(n, Ordering::SeqCst);
    }

    pub fn fail_sets(&self, n: usize) {
        self.failing_sets.store(n, Ordering::SeqCst);
    }

    /// Make every lock claim look like it lost to a holder that vanishes
    /// before it can be read.
    pub fn churn_locks(&self, on: bool) {
        self.churn.store(on, Ordering::SeqCst);
    }

    fn churning(&self, key: &str) -> bool {
        self.churn.load(Ordering::SeqCst) && key.starts_with(LOCK_KEY_PREFIX)
    }
}

fn unavailable() -> LockStoreError {
    LockStoreError::Connection("connection refused".to_string())
}

#[async_trait]
impl LockStore for FaultyLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        if take_failure(&self.failing_claims) {
            return Err(unavailable());
        }
        if self.churning(key) {
            return Ok(false);
        }
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LockStoreError> {
        if take_failure(&self.failing_gets) {
            return Err(unavailable());
        }
        if key.starts_with(LOCK_KEY_PREFIX) && take_failure(&self.failing_lock_reads) {
            return Err(unavailable());
        }
        if self.churning(key) {
            return Ok(None);
        }
        self.inner.get(key).await
    }

    async fn refresh_if_owner(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        self.inner.refresh_if_owner(key, value, ttl).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LockStoreError> {
        if take_failure(&self.failing_sets) {
            return Err(unavailable());
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), LockStoreError> {
        self.inner.delete(key).await
    }
}

// ---------------------------------------------------------------------------
// FlakyQueue
// ---------------------------------------------------------------------------

/// In-memory attempt queue whose next `n` schedules fail.
#[derive(Default)]
pub struct FlakyQueue {
    pub inner: MemoryAttemptQueue,
    failing_schedules: AtomicUsize,
    pub schedule_calls: AtomicUsize,
}

impl FlakyQueue {
    pub fn fail_schedules(&self, n: usize) {
        self.failing_schedules.store(n, Ordering::SeqCst);
    }

    pub fn schedule_calls(&self) -> usize {
        self.schedule_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatcher for FlakyQueue {
    async fn schedule(&self, request: &AttemptRequest, delay: Duration) -> Result<(), DispatchError> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_schedules) {
            return Err(DispatchError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "broken pipe",
            ))));
        }
        self.inner.schedule(request, delay).await
    }
}

#[async_trait]
impl AttemptQueue for FlakyQueue {
    async fn claim_due(&self, limit: usize) -> Result<Vec<AttemptRequest>, DispatchError> {
        self.inner.claim_due(limit).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// An orchestrator wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryLockStore>,
    pub faults: Arc<FaultyLockStore>,
    pub backend: Arc<FakeBackend>,
    pub persister: Arc<FakePersister>,
    pub orchestrator: Arc<CompletionOrchestrator>,
    _dir: TempDir,
}

pub struct HarnessBuilder {
    policy: RetryPolicy,
    settings: OrchestratorSettings,
    gate: Option<Arc<Notify>>,
}

impl HarnessBuilder {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    pub fn public_base_url(mut self, url: &str) -> Self {
        self.settings.public_base_url = Some(url.to_string());
        self
    }

    /// Block every status check until the gate is notified.
    pub fn gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryLockStore::new());
        let faults = Arc::new(FaultyLockStore::new(store.clone()));
        let backend = Arc::new(FakeBackend::new(dir.path().to_path_buf(), self.gate));
        let persister = Arc::new(FakePersister::default());
        let orchestrator = Arc::new(CompletionOrchestrator::new(
            faults.clone(),
            backend.clone(),
            persister.clone(),
            self.policy,
            self.settings,
        ));
        Harness {
            store,
            faults,
            backend,
            persister,
            orchestrator,
            _dir: dir,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            policy: RetryPolicy::default(),
            settings: OrchestratorSettings::default(),
            gate: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }
}
