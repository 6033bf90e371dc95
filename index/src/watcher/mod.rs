//! Filesystem change watching.
//!
//! Raw OS events are captured, filtered through the ignore set, debounced
//! and coalesced per canonical path, then batched with priority ordering
//! and bounded queueing. Consumers receive [`EventBatch`] values and apply
//! them with the retry policy.

pub mod deps;
pub mod events;
pub mod ignore;
pub mod retry;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use notify::RecursiveMode;
use notify::Watcher;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::WatcherConfig;
use crate::error::IndexErr;
use crate::error::Result;
use crate::logs::JsonlSink;
use crate::types::ChangeKind;
use crate::types::EventStatus;
use crate::types::FileChangeEvent;

pub use deps::DependencyGraph;
pub use deps::resolve_specifier;
pub use deps::scan_imports;
pub use events::coalesce;
pub use ignore::IgnoreSet;
pub use retry::RetryPolicy;

/// Interval between memory-guard checks.
const MEMORY_CHECK_INTERVAL: Duration = Duration::from_secs(10);

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// One batch of coalesced events, priority-ordered.
#[derive(Debug, Clone, Serialize)]
pub struct EventBatch {
    pub events: Vec<FileChangeEvent>,
    /// Events dropped from the queue since the previous batch.
    pub dropped: u64,
}

/// Processing order of change kinds within a batch.
fn kind_order(kind: ChangeKind) -> u8 {
    match kind {
        ChangeKind::Delete => 0,
        ChangeKind::Rename => 1,
        ChangeKind::Create => 2,
        ChangeKind::Modify => 3,
    }
}

/// Dependency trees rank after user files.
fn is_dependency_path(path: &Path) -> bool {
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("node_modules") | Some("vendor") | Some("third_party")
        )
    })
}

/// Priority order: user files before dependency files, then deletes,
/// renames, creates, modifies, then path for determinism.
pub fn order_batch(events: &mut [FileChangeEvent]) {
    events.sort_by(|a, b| {
        is_dependency_path(&a.path)
            .cmp(&is_dependency_path(&b.path))
            .then_with(|| kind_order(a.kind).cmp(&kind_order(b.kind)))
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Bounded queue with drop-oldest overflow.
pub struct BoundedQueue {
    deque: VecDeque<FileChangeEvent>,
    max: usize,
    dropped: u64,
}

impl BoundedQueue {
    pub fn new(max: usize) -> Self {
        Self {
            deque: VecDeque::new(),
            max,
            dropped: 0,
        }
    }

    /// Push, dropping the oldest entry on overflow.
    pub fn push(&mut self, event: FileChangeEvent) {
        if self.deque.len() >= self.max {
            if let Some(oldest) = self.deque.pop_front() {
                self.dropped += 1;
                tracing::warn!(path = %oldest.path.display(), "event queue full, dropping oldest");
            }
        }
        self.deque.push_back(event);
    }

    pub fn drain_up_to(&mut self, count: usize) -> Vec<FileChangeEvent> {
        let take = count.min(self.deque.len());
        self.deque.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.deque.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    /// Dropped-event count since the last read; reading resets it.
    pub fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }
}

/// Resident set size in MB, from `/proc/self/statm`. `None` where the
/// proc filesystem is unavailable.
pub fn current_rss_mb() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096 / (1024 * 1024))
}

/// Convert one raw notify event into engine events.
///
/// Rename events with both paths carry the old path and old canonical
/// path; the store locates the row by the old canonical path.
pub fn convert_raw(
    raw: &notify::Event,
    root: &Path,
    follow_symlinks: bool,
) -> Vec<FileChangeEvent> {
    use notify::EventKind;
    use notify::event::ModifyKind;

    let kind = match raw.kind {
        EventKind::Create(_) => ChangeKind::Create,
        EventKind::Remove(_) => ChangeKind::Delete,
        EventKind::Modify(ModifyKind::Name(_)) if raw.paths.len() == 2 => ChangeKind::Rename,
        EventKind::Modify(_) => ChangeKind::Modify,
        EventKind::Access(_) => return Vec::new(),
        _ => ChangeKind::Modify,
    };

    let timestamp = chrono::Utc::now().timestamp_millis();
    let describe = |path: &Path| -> (PathBuf, u64, bool, bool) {
        let metadata = std::fs::symlink_metadata(path).ok();
        let is_symlink = metadata.as_ref().map(|m| m.is_symlink()).unwrap_or(false);
        let is_directory = metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false);
        let size = metadata.map(|m| m.len()).unwrap_or(0);
        let canonical = if is_symlink && !follow_symlinks {
            path.to_path_buf()
        } else {
            path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
        };
        (canonical, size, is_directory, is_symlink)
    };
    let relative =
        |path: &Path| -> PathBuf { path.strip_prefix(root).unwrap_or(path).to_path_buf() };

    if kind == ChangeKind::Rename {
        let old = &raw.paths[0];
        let new = &raw.paths[1];
        let (new_canonical, size, is_directory, is_symlink) = describe(new);
        let (old_canonical, _, _, _) = describe(old);
        return vec![FileChangeEvent {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            path: relative(new),
            canonical_path: new_canonical,
            kind,
            timestamp,
            status: EventStatus::Pending,
            retry_count: 0,
            error: None,
            old_path: Some(relative(old)),
            old_canonical_path: Some(old_canonical),
            size,
            is_directory,
            is_symlink,
        }];
    }

    raw.paths
        .iter()
        .map(|path| {
            let (canonical_path, size, is_directory, is_symlink) = describe(path);
            FileChangeEvent {
                id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
                path: relative(path),
                canonical_path,
                kind,
                timestamp,
                status: EventStatus::Pending,
                retry_count: 0,
                error: None,
                old_path: None,
                old_canonical_path: None,
                size,
                is_directory,
                is_symlink,
            }
        })
        .collect()
}

/// Running watcher session. Dropping (or calling [`stop`]) ends the
/// pipeline tasks; the receiver then drains and closes.
pub struct WatcherSession {
    pub batches: mpsc::Receiver<EventBatch>,
    stop: Arc<AtomicBool>,
    _watcher: notify::RecommendedWatcher,
}

impl WatcherSession {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// The change watcher: capture, filter, debounce, batch.
pub struct ChangeWatcher {
    root: PathBuf,
    config: WatcherConfig,
    ignore: Arc<IgnoreSet>,
    log: Option<Arc<JsonlSink>>,
}

impl ChangeWatcher {
    pub fn new(root: &Path, config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        let ignore = Arc::new(IgnoreSet::for_project(
            root,
            config.use_gitignore,
            &config.ignore_patterns,
        ));
        Ok(Self {
            root: root.to_path_buf(),
            config,
            ignore,
            log: None,
        })
    }

    /// Attach the `logs/watcher.jsonl` sink.
    pub fn with_log(mut self, sink: Arc<JsonlSink>) -> Self {
        self.log = Some(sink);
        self
    }

    pub fn ignore_set(&self) -> &IgnoreSet {
        &self.ignore
    }

    /// Start watching; batches arrive on the returned session's receiver.
    pub fn start(&self) -> Result<WatcherSession> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Event>();
        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                match event {
                    Ok(event) => {
                        let _ = raw_tx.send(event);
                    }
                    Err(e) => tracing::warn!(error = %e, "watch backend error"),
                }
            })
            .map_err(|e| IndexErr::Watcher {
                cause: format!("watcher init: {e}"),
            })?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| IndexErr::Watcher {
                cause: format!("watch {}: {e}", self.root.display()),
            })?;

        let (batch_tx, batch_rx) = mpsc::channel::<EventBatch>(8);
        let stop = Arc::new(AtomicBool::new(false));

        let root = self.root.clone();
        let config = self.config.clone();
        let ignore = self.ignore.clone();
        let log = self.log.clone();
        let stop_flag = stop.clone();

        tokio::spawn(async move {
            let debounce_ms = config.debounce_delay_ms as i64;
            let mut pending: HashMap<PathBuf, Vec<FileChangeEvent>> = HashMap::new();
            let mut queue = BoundedQueue::new(config.max_queue_size as usize);
            let mut tick =
                tokio::time::interval(Duration::from_millis(config.debounce_delay_ms.max(100) / 2));
            let mut memory_paused_until: Option<std::time::Instant> = None;

            loop {
                tick.tick().await;
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                // Memory guard: pause intake while over the threshold.
                if let Some(until) = memory_paused_until {
                    if std::time::Instant::now() < until {
                        continue;
                    }
                    memory_paused_until = None;
                }
                if let Some(rss) = current_rss_mb() {
                    if rss > config.memory_threshold_mb as u64 {
                        tracing::warn!(
                            rss_mb = rss,
                            threshold_mb = config.memory_threshold_mb,
                            "memory threshold exceeded, pausing event intake"
                        );
                        memory_paused_until =
                            Some(std::time::Instant::now() + MEMORY_CHECK_INTERVAL);
                        continue;
                    }
                }

                // Capture + filter.
                while let Ok(raw) = raw_rx.try_recv() {
                    for event in convert_raw(&raw, &root, config.follow_symlinks) {
                        if event.is_directory || ignore.is_ignored(&event.path) {
                            continue;
                        }
                        pending
                            .entry(event.canonical_path.clone())
                            .or_default()
                            .push(event);
                    }
                }

                // Debounce + coalesce windows that have gone quiet.
                let now = chrono::Utc::now().timestamp_millis();
                let ready: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, events)| {
                        events
                            .iter()
                            .map(|e| e.timestamp)
                            .max()
                            .map(|newest| now - newest >= debounce_ms)
                            .unwrap_or(true)
                    })
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in ready {
                    if let Some(window) = pending.remove(&path) {
                        if let Some(merged) = coalesce(window) {
                            queue.push(merged);
                        }
                    }
                }

                // Batch.
                if !queue.is_empty() {
                    let mut events = queue.drain_up_to(config.batch_size as usize);
                    order_batch(&mut events);
                    let batch = EventBatch {
                        dropped: queue.take_dropped(),
                        events,
                    };
                    if let Some(sink) = &log {
                        let _ = sink.append("watcher_batch", &batch);
                    }
                    if batch_tx.send(batch).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(WatcherSession {
            batches: batch_rx,
            stop,
            _watcher: watcher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str, kind: ChangeKind) -> FileChangeEvent {
        FileChangeEvent {
            id: 0,
            path: PathBuf::from(path),
            canonical_path: PathBuf::from(path),
            kind,
            timestamp: 0,
            status: EventStatus::Pending,
            retry_count: 0,
            error: None,
            old_path: None,
            old_canonical_path: None,
            size: 0,
            is_directory: false,
            is_symlink: false,
        }
    }

    #[test]
    fn test_batch_ordering() {
        let mut events = vec![
            event("src/new.ts", ChangeKind::Create),
            event("node_modules/dep/index.js", ChangeKind::Delete),
            event("src/gone.ts", ChangeKind::Delete),
            event("src/changed.ts", ChangeKind::Modify),
            event("src/moved.ts", ChangeKind::Rename),
        ];
        order_batch(&mut events);

        let kinds: Vec<(bool, ChangeKind)> = events
            .iter()
            .map(|e| (is_dependency_path(&e.path), e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (false, ChangeKind::Delete),
                (false, ChangeKind::Rename),
                (false, ChangeKind::Create),
                (false, ChangeKind::Modify),
                (true, ChangeKind::Delete),
            ]
        );
    }

    #[test]
    fn test_bounded_queue_drops_oldest() {
        let mut queue = BoundedQueue::new(2);
        queue.push(event("a.ts", ChangeKind::Modify));
        queue.push(event("b.ts", ChangeKind::Modify));
        queue.push(event("c.ts", ChangeKind::Modify));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.take_dropped(), 1);
        let drained = queue.drain_up_to(10);
        let paths: Vec<&str> = drained
            .iter()
            .map(|e| e.path.to_str().unwrap())
            .collect();
        assert_eq!(paths, vec!["b.ts", "c.ts"], "oldest was dropped");
    }

    #[test]
    fn test_dependency_path_detection() {
        assert!(is_dependency_path(Path::new("node_modules/x/y.js")));
        assert!(is_dependency_path(Path::new("a/vendor/lib.js")));
        assert!(!is_dependency_path(Path::new("src/vendors.ts")));
    }

    #[tokio::test]
    async fn test_watch_session_emits_batches() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = WatcherConfig::default();
        config.debounce_delay_ms = 100;
        config.use_gitignore = false;

        let watcher = ChangeWatcher::new(dir.path(), config).unwrap();
        let mut session = watcher.start().unwrap();

        std::fs::write(dir.path().join("sample.ts"), "const a = 1;\n").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), session.batches.recv())
            .await
            .expect("batch within timeout")
            .expect("channel open");
        assert!(!batch.events.is_empty());
        assert!(
            batch
                .events
                .iter()
                .any(|e| e.path.to_string_lossy().contains("sample.ts"))
        );
        session.stop();
    }

    #[tokio::test]
    async fn test_ignored_paths_never_emit() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        let mut config = WatcherConfig::default();
        config.debounce_delay_ms = 100;
        config.use_gitignore = false;

        let watcher = ChangeWatcher::new(dir.path(), config).unwrap();
        let mut session = watcher.start().unwrap();

        std::fs::write(
            dir.path().join("node_modules/pkg/index.js"),
            "module.exports = 1;\n",
        )
        .unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(600), session.batches.recv()).await;
        match outcome {
            Err(_) => {} // no batch: correct
            Ok(Some(batch)) => {
                assert!(
                    batch
                        .events
                        .iter()
                        .all(|e| !e.path.to_string_lossy().contains("node_modules")),
                    "ignored paths must not surface"
                );
            }
            Ok(None) => {}
        }
        session.stop();
    }
}
