//! Session sync engine.
//!
//! Owns the remote location, the local working directory, and an
//! in-memory snapshot of last known file state. A compute session pulls
//! once in the background at startup, works on the local files, then
//! pushes new and changed files back on demand. The snapshot is never
//! persisted; a fresh engine starts empty, so a push without a prior pull
//! uploads everything present locally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::store::ObjectStore;
use crate::sync::content_type::resolve_content_type;
use crate::sync::fingerprint::{fingerprint_file, fingerprint_file_async, FileRecord};
use crate::sync::ignore::IgnoreRules;

/// Maximum simultaneous file transfers during a push.
pub const MAX_CONCURRENT_TRANSFERS: usize = 10;

/// Page size for remote listings.
const LIST_PAGE_SIZE: usize = 1000;

/// Remote half of a sync target: bucket plus key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLocation {
    bucket: String,
    prefix: String,
}

impl RemoteLocation {
    /// Create a location, normalizing the prefix (no leading or trailing
    /// slash).
    pub fn new(bucket: impl Into<String>, prefix: &str) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Object key for a workspace-relative path.
    fn key_for(&self, relative_path: &str) -> String {
        if self.prefix.is_empty() {
            relative_path.to_string()
        } else {
            format!("{}/{}", self.prefix, relative_path)
        }
    }

    /// Listing prefix including the trailing delimiter.
    fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    /// Workspace-relative path for an object key. `None` for the prefix
    /// root itself, directory markers, and keys outside the prefix.
    fn relative_from_key(&self, key: &str) -> Option<String> {
        let list_prefix = self.list_prefix();
        let relative = if list_prefix.is_empty() {
            key
        } else {
            key.strip_prefix(list_prefix.as_str())?
        };
        if relative.is_empty() || relative.ends_with('/') {
            return None;
        }
        Some(relative.to_string())
    }
}

/// Outcome of one pull or push.
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    /// True iff every transfer in the batch succeeded.
    pub success: bool,
    pub files_transferred: u32,
    pub bytes_transferred: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl TransferOutcome {
    fn finish(files: u32, bytes: u64, errors: Vec<String>, started: Instant) -> Self {
        Self {
            success: errors.is_empty(),
            files_transferred: files,
            bytes_transferred: bytes,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            files_transferred: 0,
            bytes_transferred: 0,
            errors: vec![error.into()],
            duration_ms: 0,
        }
    }
}

/// Pull lifecycle. There is no transition back to `Pulling`: one engine
/// instance performs at most one pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullPhase {
    Idle,
    Pulling,
    Ready,
}

struct EngineInner {
    store: Arc<dyn ObjectStore>,
    workdir: PathBuf,
    remote: Option<RemoteLocation>,
    ignore: Mutex<IgnoreRules>,
    snapshot: Mutex<HashMap<String, FileRecord>>,
    phase: watch::Sender<PullPhase>,
    pull_outcome: Mutex<Option<TransferOutcome>>,
}

impl EngineInner {
    fn record_pull_outcome(&self, outcome: TransferOutcome) {
        *self.pull_outcome.lock().unwrap() = Some(outcome);
        self.phase.send_replace(PullPhase::Ready);
    }
}

/// Sync engine for one compute session. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine for a working directory. `remote` is `None` when
    /// the session has no remote location configured; pull and push then
    /// fail fast without touching the store.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        workdir: impl Into<PathBuf>,
        remote: Option<RemoteLocation>,
    ) -> Self {
        let (phase, _) = watch::channel(PullPhase::Idle);
        Self {
            inner: Arc::new(EngineInner {
                store,
                workdir: workdir.into(),
                remote,
                ignore: Mutex::new(IgnoreRules::built_in()),
                snapshot: Mutex::new(HashMap::new()),
                phase,
                pull_outcome: Mutex::new(None),
            }),
        }
    }

    pub fn workspace_path(&self) -> &Path {
        &self.inner.workdir
    }

    /// Whether the pull reached its terminal state (successfully or not).
    pub fn is_pull_complete(&self) -> bool {
        *self.inner.phase.borrow() == PullPhase::Ready
    }

    /// Terminal outcome of the pull, once recorded.
    pub fn pull_outcome(&self) -> Option<TransferOutcome> {
        self.inner.pull_outcome.lock().unwrap().clone()
    }

    /// Snapshot record for a relative path.
    pub fn snapshot_record(&self, relative_path: &str) -> Option<FileRecord> {
        self.inner.snapshot.lock().unwrap().get(relative_path).cloned()
    }

    /// Number of files currently tracked by the snapshot.
    pub fn snapshot_len(&self) -> usize {
        self.inner.snapshot.lock().unwrap().len()
    }

    /// Begin the background pull and return immediately; the download
    /// runs as a detached task. A second call is a no-op.
    pub fn start_pull(&self) {
        let started = self.inner.phase.send_if_modified(|phase| {
            if *phase == PullPhase::Idle {
                *phase = PullPhase::Pulling;
                true
            } else {
                false
            }
        });
        if !started {
            warn!("pull already started for this engine; ignoring");
            return;
        }

        if self.inner.remote.is_none() {
            // Fail fast, before any I/O.
            self.inner
                .record_pull_outcome(TransferOutcome::failure(SyncError::Configuration.to_string()));
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = engine.run_pull().await;
            info!(
                files = outcome.files_transferred,
                errors = outcome.errors.len(),
                duration_ms = outcome.duration_ms,
                "pull finished"
            );
            engine.inner.record_pull_outcome(outcome);
        });
    }

    /// Block until an in-flight pull reaches its terminal state. Returns
    /// immediately with `None` if no pull was started, or with the
    /// recorded outcome if the pull already finished.
    pub async fn wait_for_pull(&self) -> Option<TransferOutcome> {
        let mut rx = self.inner.phase.subscribe();
        loop {
            match *rx.borrow_and_update() {
                PullPhase::Idle => return None,
                PullPhase::Ready => return self.pull_outcome(),
                PullPhase::Pulling => {}
            }
            if rx.changed().await.is_err() {
                return self.pull_outcome();
            }
        }
    }

    async fn run_pull(&self) -> TransferOutcome {
        let started = Instant::now();
        let inner = &self.inner;
        let Some(remote) = &inner.remote else {
            return TransferOutcome::failure(SyncError::Configuration.to_string());
        };

        let mut files = 0u32;
        let mut bytes = 0u64;
        let mut errors: Vec<String> = Vec::new();

        if let Err(err) = tokio::fs::create_dir_all(&inner.workdir).await {
            errors.push(format!(
                "failed to create workspace {}: {err}",
                inner.workdir.display()
            ));
            return TransferOutcome::finish(0, 0, errors, started);
        }

        let list_prefix = remote.list_prefix();
        let mut continuation: Option<String> = None;

        loop {
            let page = match inner
                .store
                .list_objects(
                    remote.bucket(),
                    &list_prefix,
                    continuation.as_deref(),
                    LIST_PAGE_SIZE,
                )
                .await
            {
                Ok(page) => page,
                Err(source) => {
                    // Listing failure is fatal: the file universe is
                    // unknown, so nothing past this point can be trusted.
                    errors.push(
                        SyncError::Listing {
                            prefix: remote.prefix().to_string(),
                            source,
                        }
                        .to_string(),
                    );
                    break;
                }
            };

            for object in &page.objects {
                let Some(relative) = remote.relative_from_key(&object.key) else {
                    continue;
                };
                if inner.ignore.lock().unwrap().is_ignored(&relative) {
                    debug!(path = %relative, "skipping ignored remote object");
                    continue;
                }
                match self.download_one(remote, &object.key, &relative).await {
                    Ok(record) => {
                        bytes += record.size_bytes;
                        files += 1;
                        inner.snapshot.lock().unwrap().insert(relative, record);
                    }
                    Err(err) => {
                        warn!(path = %relative, error = %err, "download failed");
                        errors.push(err.to_string());
                    }
                }
            }

            continuation = page.next_continuation;
            if continuation.is_none() {
                break;
            }
        }

        // The workspace may have just received an ignore file; load it now.
        match inner.ignore.lock().unwrap().load_workspace(&inner.workdir) {
            Ok(count) if count > 0 => info!(patterns = count, "loaded workspace ignore rules"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "proceeding with built-in ignore rules only"),
        }

        TransferOutcome::finish(files, bytes, errors, started)
    }

    async fn download_one(
        &self,
        remote: &RemoteLocation,
        key: &str,
        relative: &str,
    ) -> Result<FileRecord, SyncError> {
        let body = self
            .inner
            .store
            .get_object(remote.bucket(), key)
            .await
            .map_err(|err| transfer_error(relative, err))?;

        let local_path = self.inner.workdir.join(relative);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| transfer_error(relative, err))?;
        }
        tokio::fs::write(&local_path, &body)
            .await
            .map_err(|err| transfer_error(relative, err))?;

        let fingerprint = fingerprint_file_async(&local_path)
            .await
            .map_err(|err| transfer_error(relative, err))?;
        Ok(FileRecord::new(relative, fingerprint))
    }

    /// Upload every new or changed file under the working directory.
    ///
    /// Waits for any in-flight pull first, so a push never races a
    /// concurrent pull. Files present in the snapshot but missing from
    /// disk are left alone: this engine only adds and updates, it never
    /// deletes remote objects.
    pub async fn push(&self) -> TransferOutcome {
        let _ = self.wait_for_pull().await;

        let inner = &self.inner;
        let Some(remote) = &inner.remote else {
            return TransferOutcome::failure(SyncError::Configuration.to_string());
        };

        let started = Instant::now();
        let mut errors: Vec<String> = Vec::new();

        // Scan and fingerprint off the async runtime.
        let workdir = inner.workdir.clone();
        let rules = inner.ignore.lock().unwrap().clone();
        let scan = match tokio::task::spawn_blocking(move || scan_workspace(&workdir, &rules)).await
        {
            Ok(scan) => scan,
            Err(err) => {
                errors.push(format!("workspace scan failed: {err}"));
                return TransferOutcome::finish(0, 0, errors, started);
            }
        };
        errors.extend(scan.errors);

        // Absent from the snapshot -> new; different hash -> modified;
        // anything else is unchanged and excluded from this push.
        let to_upload: Vec<FileRecord> = {
            let snapshot = inner.snapshot.lock().unwrap();
            scan.records
                .into_iter()
                .filter(|record| match snapshot.get(&record.relative_path) {
                    Some(existing) => existing.content_hash != record.content_hash,
                    None => true,
                })
                .collect()
        };
        debug!(candidates = to_upload.len(), "push change set computed");

        let mut files = 0u32;
        let mut bytes = 0u64;

        for chunk in to_upload.chunks(MAX_CONCURRENT_TRANSFERS) {
            let uploads = chunk.iter().map(|record| self.upload_one(remote, record));
            for result in join_all(uploads).await {
                match result {
                    Ok(record) => {
                        files += 1;
                        bytes += record.size_bytes;
                        inner
                            .snapshot
                            .lock()
                            .unwrap()
                            .insert(record.relative_path.clone(), record);
                    }
                    Err(err) => {
                        warn!(error = %err, "upload failed");
                        errors.push(err.to_string());
                    }
                }
            }
        }

        let outcome = TransferOutcome::finish(files, bytes, errors, started);
        info!(
            files = outcome.files_transferred,
            errors = outcome.errors.len(),
            duration_ms = outcome.duration_ms,
            "push finished"
        );
        outcome
    }

    async fn upload_one(
        &self,
        remote: &RemoteLocation,
        record: &FileRecord,
    ) -> Result<FileRecord, SyncError> {
        let local_path = self.inner.workdir.join(&record.relative_path);
        let body = tokio::fs::read(&local_path)
            .await
            .map_err(|err| transfer_error(&record.relative_path, err))?;

        let key = remote.key_for(&record.relative_path);
        let content_type = resolve_content_type(&record.relative_path);
        self.inner
            .store
            .put_object(remote.bucket(), &key, body, content_type)
            .await
            .map_err(|err| transfer_error(&record.relative_path, err))?;

        debug!(path = %record.relative_path, key = %key, "uploaded");
        Ok(record.clone())
    }
}

fn transfer_error(path: &str, err: impl std::fmt::Display) -> SyncError {
    SyncError::Transfer {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

struct ScanOutcome {
    records: Vec<FileRecord>,
    errors: Vec<String>,
}

/// Recursively scan the working directory, pruning ignored subtrees and
/// fingerprinting every surviving regular file.
fn scan_workspace(root: &Path, rules: &IgnoreRules) -> ScanOutcome {
    let mut records = Vec::new();
    let mut errors = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                // A workspace that was never hydrated scans as empty.
                if dir == root && err.kind() == std::io::ErrorKind::NotFound {
                    break;
                }
                errors.push(transfer_error(&dir.to_string_lossy(), err).to_string());
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    errors.push(transfer_error(&dir.to_string_lossy(), err).to_string());
                    continue;
                }
            };
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_string_lossy().into_owned();
            if rules.is_ignored(&relative) {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    errors.push(transfer_error(&relative, err).to_string());
                    continue;
                }
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                match fingerprint_file(&path) {
                    Ok(fingerprint) => records.push(FileRecord::new(relative, fingerprint)),
                    Err(err) => errors.push(transfer_error(&relative, err).to_string()),
                }
            }
        }
    }

    ScanOutcome { records, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ObjectPage, StoreError};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const BUCKET: &str = "session-store";
    const PREFIX: &str = "sessions/abc";

    fn session_engine(store: Arc<dyn ObjectStore>, workdir: &TempDir) -> SyncEngine {
        SyncEngine::new(
            store,
            workdir.path(),
            Some(RemoteLocation::new(BUCKET, PREFIX)),
        )
    }

    struct SlowStore {
        inner: Arc<MemoryStore>,
        delay: Duration,
    }

    #[async_trait]
    impl ObjectStore for SlowStore {
        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            continuation: Option<&str>,
            max_keys: usize,
        ) -> Result<ObjectPage, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner
                .list_objects(bucket, prefix, continuation, max_keys)
                .await
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
            self.inner.get_object(bucket, key).await
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Vec<u8>,
            content_type: &str,
        ) -> Result<(), StoreError> {
            self.inner.put_object(bucket, key, body, content_type).await
        }
    }

    struct FlakyStore {
        inner: Arc<MemoryStore>,
        fail_gets: HashSet<String>,
        fail_puts: HashSet<String>,
        fail_listing: bool,
    }

    impl FlakyStore {
        fn wrap(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                fail_gets: HashSet::new(),
                fail_puts: HashSet::new(),
                fail_listing: false,
            }
        }

        fn injected() -> StoreError {
            StoreError::Io(io::Error::new(io::ErrorKind::Other, "injected failure"))
        }
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            continuation: Option<&str>,
            max_keys: usize,
        ) -> Result<ObjectPage, StoreError> {
            if self.fail_listing {
                return Err(Self::injected());
            }
            self.inner
                .list_objects(bucket, prefix, continuation, max_keys)
                .await
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
            if self.fail_gets.contains(key) {
                return Err(Self::injected());
            }
            self.inner.get_object(bucket, key).await
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Vec<u8>,
            content_type: &str,
        ) -> Result<(), StoreError> {
            if self.fail_puts.contains(key) {
                return Err(Self::injected());
            }
            self.inner.put_object(bucket, key, body, content_type).await
        }
    }

    struct GaugeStore {
        inner: Arc<MemoryStore>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for GaugeStore {
        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            continuation: Option<&str>,
            max_keys: usize,
        ) -> Result<ObjectPage, StoreError> {
            self.inner
                .list_objects(bucket, prefix, continuation, max_keys)
                .await
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
            self.inner.get_object(bucket, key).await
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Vec<u8>,
            content_type: &str,
        ) -> Result<(), StoreError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let result = self.inner.put_object(bucket, key, body, content_type).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[test]
    fn remote_location_normalizes_and_maps_keys() {
        let remote = RemoteLocation::new("bkt", "/sessions/abc/");
        assert_eq!(remote.prefix(), "sessions/abc");
        assert_eq!(remote.key_for("src/main.rs"), "sessions/abc/src/main.rs");

        assert_eq!(
            remote.relative_from_key("sessions/abc/notes.txt").as_deref(),
            Some("notes.txt")
        );
        // Prefix root, directory markers, and foreign keys are skipped.
        assert_eq!(remote.relative_from_key("sessions/abc"), None);
        assert_eq!(remote.relative_from_key("sessions/abc/"), None);
        assert_eq!(remote.relative_from_key("sessions/abc/sub/"), None);
        assert_eq!(remote.relative_from_key("sessions/other/notes.txt"), None);

        let bare = RemoteLocation::new("bkt", "");
        assert_eq!(bare.key_for("notes.txt"), "notes.txt");
        assert_eq!(bare.relative_from_key("notes.txt").as_deref(), Some("notes.txt"));
    }

    #[tokio::test]
    async fn pull_hydrates_workspace_and_skips_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "sessions/abc/notes.txt", "hello");
        store.insert(BUCKET, "sessions/abc/.git/HEAD", "ref: refs/heads/main");
        store.insert(BUCKET, "sessions/abc/sub/", "");

        let workdir = TempDir::new().unwrap();
        let engine = session_engine(store.clone(), &workdir);
        engine.start_pull();
        let outcome = engine.wait_for_pull().await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.files_transferred, 1);
        assert_eq!(
            std::fs::read_to_string(workdir.path().join("notes.txt")).unwrap(),
            "hello"
        );
        assert!(!workdir.path().join(".git").exists());
        assert_eq!(engine.snapshot_len(), 1);
        assert!(engine.snapshot_record("notes.txt").is_some());
        assert!(engine.snapshot_record(".git/HEAD").is_none());
    }

    #[tokio::test]
    async fn push_uploads_only_new_and_changed() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "sessions/abc/notes.txt", "hello");

        let workdir = TempDir::new().unwrap();
        let engine = session_engine(store.clone(), &workdir);
        engine.start_pull();
        let _ = engine.wait_for_pull().await;

        std::fs::write(workdir.path().join("draft.md"), "wip").unwrap();
        let outcome = engine.push().await;
        assert!(outcome.success);
        assert_eq!(outcome.files_transferred, 1);
        assert_eq!(store.get(BUCKET, "sessions/abc/draft.md").unwrap(), b"wip");
        assert_eq!(
            store.content_type(BUCKET, "sessions/abc/draft.md").unwrap(),
            "text/markdown; charset=utf-8"
        );
        assert!(engine.snapshot_record("draft.md").is_some());

        // Nothing changed since: the second push uploads nothing.
        let outcome = engine.push().await;
        assert!(outcome.success);
        assert_eq!(outcome.files_transferred, 0);

        // A same-length edit is still detected by content hash.
        std::fs::write(workdir.path().join("draft.md"), "WIP").unwrap();
        let outcome = engine.push().await;
        assert_eq!(outcome.files_transferred, 1);
        assert_eq!(store.get(BUCKET, "sessions/abc/draft.md").unwrap(), b"WIP");
    }

    #[tokio::test]
    async fn round_trip_preserves_modified_content() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "sessions/abc/report.txt", "v1");

        let first_dir = TempDir::new().unwrap();
        let first = session_engine(store.clone(), &first_dir);
        first.start_pull();
        let _ = first.wait_for_pull().await;
        std::fs::write(first_dir.path().join("report.txt"), "v2 with more content").unwrap();
        assert!(first.push().await.success);

        let second_dir = TempDir::new().unwrap();
        let second = session_engine(store.clone(), &second_dir);
        second.start_pull();
        assert!(second.wait_for_pull().await.unwrap().success);
        assert_eq!(
            std::fs::read(second_dir.path().join("report.txt")).unwrap(),
            b"v2 with more content"
        );
    }

    #[tokio::test]
    async fn ignored_paths_never_transfer() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "sessions/abc/.git/HEAD", "ref: refs/heads/main");
        store.insert(BUCKET, "sessions/abc/src/main.rs", "fn main() {}");

        let workdir = TempDir::new().unwrap();
        // Physically present locally too, from an unrelated source.
        std::fs::create_dir_all(workdir.path().join(".git")).unwrap();
        std::fs::write(workdir.path().join(".git/HEAD"), "ref: refs/heads/local").unwrap();

        let engine = session_engine(store.clone(), &workdir);
        engine.start_pull();
        let _ = engine.wait_for_pull().await;

        // Pull left the local .git untouched.
        assert_eq!(
            std::fs::read_to_string(workdir.path().join(".git/HEAD")).unwrap(),
            "ref: refs/heads/local"
        );

        let outcome = engine.push().await;
        assert!(outcome.success);
        assert_eq!(outcome.files_transferred, 0);
        // Push never scanned .git, so the remote copy is untouched too.
        assert_eq!(
            store.get(BUCKET, "sessions/abc/.git/HEAD").unwrap(),
            b"ref: refs/heads/main"
        );
    }

    #[tokio::test]
    async fn push_isolates_individual_upload_failures() {
        let inner = Arc::new(MemoryStore::new());
        let mut flaky = FlakyStore::wrap(inner.clone());
        flaky.fail_puts.insert("sessions/abc/b.txt".to_string());

        let workdir = TempDir::new().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(workdir.path().join(name), name).unwrap();
        }

        let engine = session_engine(Arc::new(flaky), &workdir);
        let outcome = engine.push().await;

        assert!(!outcome.success);
        assert_eq!(outcome.files_transferred, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("b.txt"));
        assert!(inner.get(BUCKET, "sessions/abc/a.txt").is_some());
        assert!(inner.get(BUCKET, "sessions/abc/b.txt").is_none());
        assert!(inner.get(BUCKET, "sessions/abc/c.txt").is_some());
        // The failed file stays out of the snapshot, so a later push
        // retries it.
        assert!(engine.snapshot_record("b.txt").is_none());
    }

    #[tokio::test]
    async fn pull_collects_download_failures_and_continues() {
        let inner = Arc::new(MemoryStore::new());
        inner.insert(BUCKET, "sessions/abc/a.txt", "a");
        inner.insert(BUCKET, "sessions/abc/b.txt", "b");
        inner.insert(BUCKET, "sessions/abc/c.txt", "c");
        let mut flaky = FlakyStore::wrap(inner);
        flaky.fail_gets.insert("sessions/abc/b.txt".to_string());

        let workdir = TempDir::new().unwrap();
        let engine = session_engine(Arc::new(flaky), &workdir);
        engine.start_pull();
        let outcome = engine.wait_for_pull().await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.files_transferred, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(workdir.path().join("a.txt").exists());
        assert!(!workdir.path().join("b.txt").exists());
        assert!(workdir.path().join("c.txt").exists());
        assert!(engine.is_pull_complete());
    }

    #[tokio::test]
    async fn listing_failure_fails_pull_but_marks_ready() {
        let mut flaky = FlakyStore::wrap(Arc::new(MemoryStore::new()));
        flaky.fail_listing = true;

        let workdir = TempDir::new().unwrap();
        let engine = session_engine(Arc::new(flaky), &workdir);
        engine.start_pull();
        let outcome = engine.wait_for_pull().await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.files_transferred, 0);
        assert!(outcome.errors[0].contains("failed to list"));
        // Dependent work is never blocked by a failed pull.
        assert!(engine.is_pull_complete());
        assert!(engine.push().await.success);
    }

    #[tokio::test]
    async fn startup_is_non_blocking() {
        let inner = Arc::new(MemoryStore::new());
        inner.insert(BUCKET, "sessions/abc/notes.txt", "hello");
        let store = Arc::new(SlowStore {
            inner,
            delay: Duration::from_millis(200),
        });

        let workdir = TempDir::new().unwrap();
        let engine = session_engine(store, &workdir);
        engine.start_pull();
        assert!(!engine.is_pull_complete());

        // A second start is a no-op; one engine pulls at most once.
        engine.start_pull();

        let outcome = engine.wait_for_pull().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.files_transferred, 1);
        assert!(engine.is_pull_complete());

        // Waiting again returns the same recorded outcome.
        assert_eq!(engine.wait_for_pull().await.unwrap().files_transferred, 1);
    }

    #[tokio::test]
    async fn wait_without_start_returns_immediately() {
        let store = Arc::new(MemoryStore::new());
        let workdir = TempDir::new().unwrap();
        let engine = session_engine(store, &workdir);

        assert!(engine.wait_for_pull().await.is_none());
        assert!(!engine.is_pull_complete());
        assert_eq!(engine.workspace_path(), workdir.path());
    }

    #[tokio::test]
    async fn push_without_pull_uploads_everything() {
        let store = Arc::new(MemoryStore::new());
        let workdir = TempDir::new().unwrap();
        std::fs::create_dir_all(workdir.path().join("src")).unwrap();
        std::fs::write(workdir.path().join("README.md"), "# project").unwrap();
        std::fs::write(workdir.path().join("src/lib.rs"), "pub fn run() {}").unwrap();

        let engine = session_engine(store.clone(), &workdir);
        let outcome = engine.push().await;

        assert!(outcome.success);
        assert_eq!(outcome.files_transferred, 2);
        assert!(store.get(BUCKET, "sessions/abc/README.md").is_some());
        assert!(store.get(BUCKET, "sessions/abc/src/lib.rs").is_some());
    }

    #[tokio::test]
    async fn missing_remote_location_fails_fast() {
        let store = Arc::new(MemoryStore::new());
        let workdir = TempDir::new().unwrap();
        let engine = SyncEngine::new(store.clone(), workdir.path(), None);

        engine.start_pull();
        let outcome = engine.wait_for_pull().await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.errors[0].contains("not configured"));
        assert!(engine.is_pull_complete());

        std::fs::write(workdir.path().join("notes.txt"), "hello").unwrap();
        let outcome = engine.push().await;
        assert!(!outcome.success);
        assert!(store.is_empty(BUCKET));
    }

    #[tokio::test]
    async fn workspace_ignore_rules_load_after_pull() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "sessions/abc/.duffelignore", "*.log\n");
        store.insert(BUCKET, "sessions/abc/app.log", "old entries");

        let workdir = TempDir::new().unwrap();
        let engine = session_engine(store.clone(), &workdir);
        engine.start_pull();
        let outcome = engine.wait_for_pull().await.unwrap();

        // Rules load after the pull, so both files were downloaded and
        // already-downloaded files are never purged retroactively.
        assert_eq!(outcome.files_transferred, 2);
        assert!(workdir.path().join("app.log").exists());

        std::fs::write(workdir.path().join("fresh.log"), "new entries").unwrap();
        std::fs::write(workdir.path().join("notes.txt"), "keep me").unwrap();
        let outcome = engine.push().await;

        assert!(outcome.success);
        assert_eq!(outcome.files_transferred, 1);
        assert!(store.get(BUCKET, "sessions/abc/notes.txt").is_some());
        assert!(store.get(BUCKET, "sessions/abc/fresh.log").is_none());
    }

    #[tokio::test]
    async fn push_bounds_concurrent_transfers() {
        let inner = Arc::new(MemoryStore::new());
        let gauge = Arc::new(GaugeStore {
            inner: inner.clone(),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let workdir = TempDir::new().unwrap();
        for i in 0..25 {
            std::fs::write(workdir.path().join(format!("file-{i:02}.txt")), "x").unwrap();
        }

        let engine = session_engine(gauge.clone(), &workdir);
        let outcome = engine.push().await;

        assert!(outcome.success);
        assert_eq!(outcome.files_transferred, 25);
        assert_eq!(inner.len(BUCKET), 25);
        assert!(gauge.peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_TRANSFERS);
    }
}
