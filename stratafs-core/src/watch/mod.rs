//! Per-path debounced change notification.
//!
//! Every emitted mutation lands in a pending-event bucket keyed by the
//! affected path. A bucket owns its debounce timer and (optionally) a
//! max-wait timer; flushing dispatches the coalesced kind to every matching
//! watcher and drops the bucket with both timers. Closing the last watcher
//! for a path also drops the bucket, so no timer outlives its subscribers.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use stratafs_model::{FsEventKind, FsResult, WatchId};

use crate::path;
use crate::sparse::glob::{GlobPattern, is_glob};
use crate::time::now_ms;

/// Default debounce window: 50 ms.
pub const DEFAULT_DEBOUNCE_MS: u64 = 50;

/// When within a window the emission happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceMode {
    /// Emit on the first event of a window only.
    Leading,
    /// Emit once when the window goes quiet.
    #[default]
    Trailing,
    /// Both of the above.
    Both,
}

/// Per-path timing override, matched by exact path or glob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchOverride {
    pub pattern: String,
    pub debounce_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
}

/// Watch manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window for coalescing rapid event bursts per path.
    pub debounce_ms: u64,
    /// Upper bound on how long a busy path may go unreported.
    pub max_wait_ms: Option<u64>,
    pub mode: DebounceMode,
    /// Promote namespace changes over content changes when collapsing.
    pub smart_coalescing: bool,
    pub overrides: Vec<WatchOverride>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_wait_ms: None,
            mode: DebounceMode::Trailing,
            smart_coalescing: true,
            overrides: Vec::new(),
        }
    }
}

/// Event delivered to a listener; `path` is relative to the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: FsEventKind,
    pub path: String,
}

pub type WatchListener = Arc<dyn Fn(WatchEvent) + Send + Sync>;

struct WatcherEntry {
    path: String,
    recursive: bool,
    listener: WatchListener,
    token: CancellationToken,
}

impl WatcherEntry {
    fn covers(&self, event_path: &str) -> bool {
        event_path == self.path || (self.recursive && path::is_within(event_path, &self.path))
    }

    fn relative(&self, event_path: &str) -> String {
        if event_path == self.path {
            path::basename(event_path).to_string()
        } else if self.path == "/" {
            event_path[1..].to_string()
        } else {
            event_path[self.path.len() + 1..].to_string()
        }
    }
}

struct Bucket {
    kind: FsEventKind,
    first_event_ms: i64,
    leading_emitted: bool,
    debounce_timer: Option<JoinHandle<()>>,
    max_wait_timer: Option<JoinHandle<()>>,
}

impl Bucket {
    fn cancel_timers(&mut self) {
        if let Some(handle) = self.debounce_timer.take() {
            handle.abort();
        }
        if let Some(handle) = self.max_wait_timer.take() {
            handle.abort();
        }
    }
}

enum OverrideMatcher {
    Exact(String),
    Glob(GlobPattern),
}

struct CompiledOverride {
    matcher: OverrideMatcher,
    debounce_ms: Option<u64>,
    max_wait_ms: Option<u64>,
}

struct Shared {
    mode: DebounceMode,
    smart_coalescing: bool,
    debounce_ms: u64,
    max_wait_ms: Option<u64>,
    overrides: Vec<CompiledOverride>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    watchers: HashMap<WatchId, WatcherEntry>,
    buckets: HashMap<String, Bucket>,
}

/// Owns all watchers and pending-event buckets for one catalog instance.
#[derive(Clone)]
pub struct WatchManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("WatchManager");
        match self.shared.inner.try_lock() {
            Ok(inner) => {
                debug
                    .field("watchers", &inner.watchers.len())
                    .field("pending_buckets", &inner.buckets.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl WatchManager {
    pub fn new(config: WatchConfig) -> FsResult<Self> {
        let mut overrides = Vec::with_capacity(config.overrides.len());
        for over in &config.overrides {
            let matcher = if is_glob(&over.pattern) {
                OverrideMatcher::Glob(GlobPattern::compile(&over.pattern)?)
            } else {
                OverrideMatcher::Exact(over.pattern.clone())
            };
            overrides.push(CompiledOverride {
                matcher,
                debounce_ms: over.debounce_ms,
                max_wait_ms: over.max_wait_ms,
            });
        }
        Ok(Self {
            shared: Arc::new(Shared {
                mode: config.mode,
                smart_coalescing: config.smart_coalescing,
                debounce_ms: config.debounce_ms,
                max_wait_ms: config.max_wait_ms,
                overrides,
                inner: Mutex::new(Inner::default()),
            }),
        })
    }

    /// Subscribe `listener` to changes at `path` (and below, when
    /// `recursive`). The returned id is the only way to unsubscribe.
    pub fn watch(&self, path: &str, recursive: bool, listener: WatchListener) -> WatchId {
        let id = WatchId::new();
        let entry = WatcherEntry {
            path: path.to_string(),
            recursive,
            listener,
            token: CancellationToken::new(),
        };
        self.lock().watchers.insert(id, entry);
        debug!("watch registered for {path} (recursive={recursive})");
        id
    }

    /// Close a watcher: its callback never runs again, and buckets left
    /// without subscribers are dropped with their timers.
    pub fn close(&self, id: WatchId) {
        let mut inner = self.lock();
        let Some(entry) = inner.watchers.remove(&id) else {
            return;
        };
        entry.token.cancel();

        let orphaned: Vec<String> = inner
            .buckets
            .keys()
            .filter(|path| !inner.watchers.values().any(|w| w.covers(path)))
            .cloned()
            .collect();
        for path in orphaned {
            if let Some(mut bucket) = inner.buckets.remove(&path) {
                bucket.cancel_timers();
            }
        }
    }

    /// Drop every watcher and bucket.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        for entry in inner.watchers.values() {
            entry.token.cancel();
        }
        inner.watchers.clear();
        for bucket in inner.buckets.values_mut() {
            bucket.cancel_timers();
        }
        inner.buckets.clear();
    }

    /// Record a change at `path`. Buckets exist only while somebody is
    /// listening; with no covering watcher this is a no-op.
    pub fn emit(&self, kind: FsEventKind, path: &str) {
        let (debounce_ms, max_wait_ms) = self.effective_timing(path);
        let mode = self.shared.mode;
        let smart = self.shared.smart_coalescing;

        let mut leading_targets = Vec::new();
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if !inner.watchers.values().any(|w| w.covers(path)) {
                return;
            }

            let is_new = !inner.buckets.contains_key(path);
            if is_new {
                let max_wait_timer = max_wait_ms.map(|wait| {
                    let manager = self.clone();
                    let flush_path = path.to_string();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(wait)).await;
                        manager.flush(&flush_path);
                    })
                });
                inner.buckets.insert(
                    path.to_string(),
                    Bucket {
                        kind,
                        first_event_ms: now_ms(),
                        leading_emitted: false,
                        debounce_timer: None,
                        max_wait_timer,
                    },
                );
            }

            let bucket = inner
                .buckets
                .get_mut(path)
                .expect("bucket inserted above");
            if !is_new {
                bucket.kind = coalesce(smart, bucket.kind, kind);
            }
            if is_new
                && matches!(mode, DebounceMode::Leading | DebounceMode::Both)
                && !bucket.leading_emitted
            {
                bucket.leading_emitted = true;
                leading_targets = collect_targets(&inner.watchers, kind, path);
            }

            if let Some(handle) = bucket.debounce_timer.take() {
                handle.abort();
            }
            let manager = self.clone();
            let flush_path = path.to_string();
            bucket.debounce_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(debounce_ms)).await;
                manager.flush(&flush_path);
            }));
        }

        dispatch(leading_targets);
    }

    /// Deliver the coalesced kind for `path` and drop its bucket.
    fn flush(&self, path: &str) {
        let targets = {
            let mut inner = self.lock();
            let Some(mut bucket) = inner.buckets.remove(path) else {
                return;
            };
            bucket.cancel_timers();
            debug!(
                "flushing {path} after {}ms window",
                now_ms() - bucket.first_event_ms
            );
            if self.shared.mode == DebounceMode::Leading {
                // The leading edge already reported this window.
                Vec::new()
            } else {
                collect_targets(&inner.watchers, bucket.kind, path)
            }
        };
        dispatch(targets);
    }

    /// Number of open pending-event buckets (test hook).
    pub fn pending_buckets(&self) -> usize {
        self.lock().buckets.len()
    }

    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    fn effective_timing(&self, path: &str) -> (u64, Option<u64>) {
        // Exact overrides win over glob overrides; within each class the
        // first registered match applies.
        let rel = path.strip_prefix('/').unwrap_or(path);
        let mut glob_hit: Option<&CompiledOverride> = None;
        for over in &self.shared.overrides {
            match &over.matcher {
                OverrideMatcher::Exact(exact) if exact == path => {
                    return (
                        over.debounce_ms.unwrap_or(self.shared.debounce_ms),
                        over.max_wait_ms.or(self.shared.max_wait_ms),
                    );
                }
                OverrideMatcher::Glob(glob) if glob_hit.is_none() && glob.matches(rel) => {
                    glob_hit = Some(over);
                }
                _ => {}
            }
        }
        match glob_hit {
            Some(over) => (
                over.debounce_ms.unwrap_or(self.shared.debounce_ms),
                over.max_wait_ms.or(self.shared.max_wait_ms),
            ),
            None => (self.shared.debounce_ms, self.shared.max_wait_ms),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Smart coalescing: a namespace change absorbs later content changes
/// (create dominates), while a later namespace change replaces content
/// changes (delete/rename dominates). Disabled, the latest kind wins.
fn coalesce(smart: bool, previous: FsEventKind, next: FsEventKind) -> FsEventKind {
    if smart && previous.is_namespace_change() && next.is_content_change() {
        previous
    } else {
        next
    }
}

type DispatchTarget = (WatchListener, CancellationToken, WatchEvent);

fn collect_targets(
    watchers: &HashMap<WatchId, WatcherEntry>,
    kind: FsEventKind,
    path: &str,
) -> Vec<DispatchTarget> {
    watchers
        .values()
        .filter(|w| w.covers(path))
        .map(|w| {
            (
                Arc::clone(&w.listener),
                w.token.clone(),
                WatchEvent {
                    kind,
                    path: w.relative(path),
                },
            )
        })
        .collect()
}

/// Invoke listeners outside the manager lock. The cancellation token is
/// checked immediately before each call; listener panics are swallowed.
fn dispatch(targets: Vec<DispatchTarget>) {
    for (listener, token, event) in targets {
        if token.is_cancelled() {
            continue;
        }
        let _ = catch_unwind(AssertUnwindSafe(|| listener(event)));
    }
}
