//! The local file index. Maintains the local log so it reflects the files
//! under the watch path, subject to the busy-file rule.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dashmap::DashMap;
use meshdrive_files::{hash, path as fpath, FileRecord};
use meshdrive_transport::LogHandle;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::events::{Event, EventBus};
use crate::node::config::IndexConfig;
use crate::node::error::NodeError;
use crate::transfer_table::TransferTable;

/// Debounce window for filesystem-watch events (≈500 ms).
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Scans and watches the watch directory, maintains the local log as a
/// sorted map from relative path to [`FileRecord`], and emits
/// added/changed/removed events.
pub struct LocalFileIndex {
    watch_path: PathBuf,
    log: Arc<dyn LogHandle>,
    cache: RwLock<BTreeMap<String, FileRecord>>,
    transfers: Arc<TransferTable>,
    events: EventBus,
    poll_interval: Duration,
    watch_enabled: bool,
    poll_running: AtomicBool,
    /// Per-path debounce generation counters: a watch event bumps the
    /// counter for its path, and the scheduled handler no-ops if it fires
    /// for a generation that has since been superseded.
    processing: DashMap<String, u64>,
    watcher: StdMutex<Option<RecommendedWatcher>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    closing: AtomicBool,
}

impl LocalFileIndex {
    /// Open the index: create the watch directory if needed, load the
    /// in-memory cache from the log, run one synchronous scan, then spawn
    /// the background poller and (if enabled) the filesystem watcher.
    pub async fn open(
        watch_path: PathBuf,
        log: Arc<dyn LogHandle>,
        transfers: Arc<TransferTable>,
        events: EventBus,
        config: IndexConfig,
    ) -> Result<Arc<Self>, NodeError> {
        tokio::fs::create_dir_all(&watch_path).await?;
        log.ready().await?;

        let mut cache = BTreeMap::new();
        for record in log.list().await? {
            cache.insert(record.path.clone(), record);
        }

        let this = Arc::new(Self {
            watch_path,
            log,
            cache: RwLock::new(cache),
            transfers,
            events,
            poll_interval: config.poll_interval,
            watch_enabled: config.watch_enabled,
            poll_running: AtomicBool::new(false),
            processing: DashMap::new(),
            watcher: StdMutex::new(None),
            tasks: StdMutex::new(Vec::new()),
            closing: AtomicBool::new(false),
        });

        this.poll_once().await?;

        if this.watch_enabled {
            this.clone().spawn_watch()?;
        }
        this.clone().spawn_poll_loop();

        Ok(this)
    }

    /// Tear down the poller, the watcher, and any pending debounce tasks.
    /// Idempotent.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        *self.watcher.lock().expect("watcher mutex poisoned") = None;
        let tasks: Vec<_> = self.tasks.lock().expect("tasks mutex poisoned").drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Snapshot of every indexed path.
    pub async fn list(&self) -> Vec<FileRecord> {
        self.cache.read().await.values().cloned().collect()
    }

    /// The cached record for `path`, if indexed.
    pub async fn get(&self, path: &str) -> Option<FileRecord> {
        self.cache.read().await.get(path).cloned()
    }

    /// The watch-path root, for resolving relative paths to absolute ones.
    #[must_use]
    pub fn watch_path(&self) -> &Path {
        &self.watch_path
    }

    /// True if `path` is the endpoint of an in-flight transfer.
    #[must_use]
    pub fn is_busy(&self, path: &str) -> bool {
        self.transfers.is_busy(path)
    }

    /// Perform one full rescan and synchronize the log. Reentrant-safe: a
    /// call that arrives while a scan is already running returns
    /// immediately without scheduling a second one.
    pub async fn poll_once(&self) -> Result<(), NodeError> {
        if self.poll_running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Ok(());
        }
        let result = self.poll_once_inner().await;
        self.poll_running.store(false, Ordering::SeqCst);
        result
    }

    async fn poll_once_inner(&self) -> Result<(), NodeError> {
        let found = self.scan_tree().await;
        let mut seen = std::collections::HashSet::with_capacity(found.len());
        for (rel, full, size, modified) in found {
            seen.insert(rel.clone());
            if self.transfers.is_busy(&rel) {
                continue;
            }
            self.sync_path(&rel, &full, size, modified).await;
        }

        let stale: Vec<String> = {
            let cache = self.cache.read().await;
            cache.keys().filter(|p| !seen.contains(p.as_str())).cloned().collect()
        };
        for path in stale {
            if self.transfers.is_busy(&path) {
                continue;
            }
            self.remove_path(&path).await;
        }
        Ok(())
    }

    /// Recursively enumerate regular files under the watch-path with their
    /// `(size, modified_ms)`. Unreadable directories and files are logged
    /// and skipped rather than aborting the walk.
    async fn scan_tree(&self) -> Vec<(String, PathBuf, u64, f64)> {
        let root = self.watch_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in WalkDir::new(&root).into_iter() {
                let entry = match entry {
                    Ok(e) => e,
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping unreadable entry during scan");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(err) => {
                        tracing::warn!(path = %entry.path().display(), error = %err, "skipping unreadable file during scan");
                        continue;
                    }
                };
                let rel = match fpath::normalize_relative(&root, entry.path()) {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                out.push((rel, entry.path().to_path_buf(), metadata.len(), modified_millis(&metadata)));
            }
            out
        })
        .await
        .unwrap_or_default()
    }

    /// Compare/hash one path against the cache and emit the matching event.
    /// Shared by the poller and the debounced watch handler so both sources
    /// funnel through the same emission rule.
    async fn sync_path(&self, rel: &str, full: &Path, size: u64, modified: f64) {
        let existing = self.cache.read().await.get(rel).cloned();
        if let Some(prev) = &existing {
            if prev.quick_change_key() == (size, modified.to_bits()) {
                return;
            }
        }

        let digest = match hash::hash_file(full).await {
            Ok(h) => h,
            Err(err) => {
                tracing::warn!(path = rel, error = %err, "failed to hash file, will retry next scan");
                return;
            }
        };
        let record = FileRecord::new(rel, size, modified, digest);

        if let Err(err) = self.log.put(rel, record.clone()).await {
            tracing::error!(path = rel, error = %err, "failed to persist file record");
            self.events.emit(Event::Error { message: format!("failed to index {rel}: {err}") });
            return;
        }

        self.cache.write().await.insert(rel.to_string(), record.clone());

        match existing {
            None => self.events.emit(Event::LocalFileAdded { path: rel.to_string(), hash: record.hash }),
            Some(prev) if prev.hash != record.hash => self.events.emit(Event::LocalFileChanged {
                path: rel.to_string(),
                prev_hash: prev.hash,
                hash: record.hash,
            }),
            Some(_) => {}
        }
    }

    async fn remove_path(&self, rel: &str) {
        if let Err(err) = self.log.del(rel).await {
            tracing::error!(path = rel, error = %err, "failed to delete file record");
            self.events.emit(Event::Error { message: format!("failed to remove {rel} from index: {err}") });
            return;
        }
        if self.cache.write().await.remove(rel).is_some() {
            self.events.emit(Event::LocalFileRemoved { path: rel.to_string() });
        }
    }

    fn spawn_poll_loop(self: Arc<Self>) {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the initial scan already ran synchronously in open()
            loop {
                ticker.tick().await;
                if self.closing.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = self.poll_once().await {
                    tracing::warn!(error = %err, "poll cycle failed");
                    self.events.emit(Event::Error { message: format!("poll failed: {err}") });
                }
            }
        });
        self.tasks.lock().expect("tasks mutex poisoned").push(handle);
    }

    fn spawn_watch(self: Arc<Self>) -> Result<(), NodeError> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<notify::Result<notify::Event>>(256);
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| NodeError::Io(format!("failed to create filesystem watcher: {e}").into()))?;
        watcher
            .watch(&self.watch_path, RecursiveMode::Recursive)
            .map_err(|e| NodeError::Io(format!("failed to watch {}: {e}", self.watch_path.display()).into()))?;
        *self.watcher.lock().expect("watcher mutex poisoned") = Some(watcher);

        let this = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) => this.clone().handle_raw_event(event),
                    Err(err) => tracing::warn!(error = %err, "filesystem watcher error"),
                }
            }
        });
        self.tasks.lock().expect("tasks mutex poisoned").push(handle);
        Ok(())
    }

    fn handle_raw_event(self: Arc<Self>, event: notify::Event) {
        for raw_path in event.paths {
            let Ok(rel) = fpath::normalize_relative(&self.watch_path, &raw_path) else { continue };
            let generation = {
                let mut counter = self.processing.entry(rel.clone()).or_insert(0);
                *counter += 1;
                *counter
            };
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(WATCH_DEBOUNCE).await;
                let current = this.processing.get(&rel).map(|g| *g).unwrap_or(0);
                if current != generation {
                    return;
                }
                this.processing.remove(&rel);
                this.handle_debounced(&rel).await;
            });
        }
    }

    async fn handle_debounced(&self, rel: &str) {
        if self.transfers.is_busy(rel) {
            return;
        }
        let full = fpath::to_absolute(&self.watch_path, rel);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => {
                self.sync_path(rel, &full, meta.len(), modified_millis(&meta)).await;
            }
            Ok(meta) if meta.is_dir() => {
                // notify's recursive mode re-arms watches under newly created
                // subdirectories automatically; nothing further to install.
                tracing::debug!(path = rel, "new directory observed");
            }
            Ok(_) => {}
            Err(_) => {
                if self.cache.read().await.contains_key(rel) {
                    self.remove_path(rel).await;
                }
            }
        }
    }
}

fn modified_millis(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}
