//! Background task controller.
//!
//! One discovery run per process, owned by the controller rather than by
//! whichever view started it. Views come and go through
//! [`TaskController::attach`]/[`TaskController::detach`] and watch the run
//! through [`TaskController::subscribe`]; the run keeps going regardless.
//!
//! ```text
//! idle → searching → processing → completed | error | cancelled
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use prospector_core::StreamEvent;
use prospector_shared::{
    ControllerConfig, FilterSet, ProgressSnapshot, ResolvedEntity, Result, RunStats, TaskId,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::result_cache::ResultCache;
use crate::transport::{DiscoveryTransport, HttpTransport};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of a background run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Searching,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// Everything a view needs to render the current run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub filters: FilterSet,
    pub state: TaskState,
    /// Matches in the order the server reported them.
    pub matches: Vec<ResolvedEntity>,
    pub progress: ProgressSnapshot,
    pub total_candidates: usize,
    /// Latest `status` message.
    pub status_message: Option<String>,
    /// Final stats, once completed.
    pub stats: Option<RunStats>,
    pub error: Option<String>,
    /// Served from the client result cache without a network call.
    pub from_cache: bool,
    /// At least one view is attached.
    pub attached: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    fn new(id: TaskId, filters: FilterSet) -> Self {
        Self {
            id,
            filters,
            state: TaskState::Searching,
            matches: Vec::new(),
            progress: ProgressSnapshot::default(),
            total_candidates: 0,
            status_message: None,
            stats: None,
            error: None,
            from_cache: false,
            attached: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn end(&mut self, state: TaskState) {
        self.state = state;
        self.completed_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Summary delivered once when a run completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionNotice {
    pub task_id: TaskId,
    pub matched: usize,
    pub total_candidates: usize,
    pub from_cache: bool,
    pub message: String,
}

/// Receives completion notices (desktop notification, log line, ...).
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &CompletionNotice);
}

/// Notifier that writes an `info` log line.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &CompletionNotice) {
        info!(
            task = %notice.task_id,
            matched = notice.matched,
            candidates = notice.total_candidates,
            from_cache = notice.from_cache,
            "{}",
            notice.message
        );
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// The single task slot.
struct BackgroundTask {
    snapshot: TaskSnapshot,
    /// Set the first time a completion notice is produced for this run.
    has_notified: bool,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// The completion notice, at most once per run.
    fn take_notice(&mut self) -> Option<CompletionNotice> {
        if self.snapshot.state != TaskState::Completed || self.has_notified {
            return None;
        }
        self.has_notified = true;
        let s = &self.snapshot;
        Some(CompletionNotice {
            task_id: s.id,
            matched: s.matches.len(),
            total_candidates: s.total_candidates,
            from_cache: s.from_cache,
            message: format!(
                "{} matches for {} in {}",
                s.matches.len(),
                s.filters.segment.trim(),
                s.filters.region.trim().to_ascii_uppercase()
            ),
        })
    }
}

struct Inner {
    transport: Arc<dyn DiscoveryTransport>,
    notifier: Arc<dyn Notifier>,
    slot: Mutex<Option<BackgroundTask>>,
    results: Mutex<ResultCache>,
    updates: watch::Sender<Option<TaskSnapshot>>,
    views: AtomicUsize,
}

/// Process-wide handle to the background run. Cheap to clone; every clone
/// drives the same slot.
#[derive(Clone)]
pub struct TaskController {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TaskController {
    pub fn new(
        transport: Arc<dyn DiscoveryTransport>,
        notifier: Arc<dyn Notifier>,
        config: &ControllerConfig,
    ) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                transport,
                notifier,
                slot: Mutex::new(None),
                results: Mutex::new(ResultCache::new(
                    config.result_cache_ttl,
                    config.result_cache_capacity,
                )),
                updates,
                views: AtomicUsize::new(0),
            }),
        }
    }

    /// Controller talking HTTP to `config.server_url`.
    pub fn from_config(config: &ControllerConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let transport = HttpTransport::new(&config.server_url)?;
        Ok(Self::new(Arc::new(transport), notifier, config))
    }

    /// Start a run, replacing (and cancelling) any current one.
    ///
    /// Unless `fresh` is set, a finished run with equivalent filters still in
    /// the result cache completes immediately without touching the network.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, filters: FilterSet, fresh: bool) -> Result<TaskId> {
        filters.validate()?;
        self.cancel();

        let id = TaskId::new();
        let mut snapshot = TaskSnapshot::new(id, filters.clone());
        snapshot.attached = self.inner.views.load(Ordering::SeqCst) > 0;

        let cached = if fresh {
            None
        } else {
            lock(&self.inner.results).get(&filters.cache_key())
        };

        if let Some((matches, stats)) = cached {
            debug!(task = %id, matched = matches.len(), "served from result cache");
            snapshot.matches = matches;
            snapshot.progress = stats.progress;
            snapshot.total_candidates = stats.total_candidates;
            snapshot.stats = Some(stats);
            snapshot.from_cache = true;
            snapshot.end(TaskState::Completed);

            let mut task = BackgroundTask {
                snapshot,
                has_notified: false,
                handle: None,
            };
            let notice = task.take_notice();
            {
                let mut slot = lock(&self.inner.slot);
                self.inner.updates.send_replace(Some(task.snapshot.clone()));
                *slot = Some(task);
            }
            if let Some(notice) = notice {
                self.inner.notifier.notify(&notice);
            }
            return Ok(id);
        }

        info!(task = %id, segment = %filters.segment, region = %filters.region, "starting run");
        let mut slot = lock(&self.inner.slot);
        self.inner.updates.send_replace(Some(snapshot.clone()));

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let result = inner
                .transport
                .run(&filters, &|event| inner.apply(id, event))
                .await;
            inner.finish(id, result);
        });

        *slot = Some(BackgroundTask {
            snapshot,
            has_notified: false,
            handle: Some(handle),
        });
        Ok(id)
    }

    /// Abort the current run. No-op without an active run.
    pub fn cancel(&self) {
        let mut slot = lock(&self.inner.slot);
        let Some(task) = slot.as_mut() else {
            return;
        };
        if task.snapshot.state.is_terminal() {
            return;
        }
        if let Some(handle) = task.handle.take() {
            handle.abort();
        }
        task.snapshot.end(TaskState::Cancelled);
        info!(task = %task.snapshot.id, "run cancelled");
        self.inner.updates.send_replace(Some(task.snapshot.clone()));
    }

    /// Cancel the current run and empty the slot.
    pub fn clear(&self) {
        self.cancel();
        *lock(&self.inner.slot) = None;
        self.inner.updates.send_replace(None);
    }

    /// Updates for every change to the slot. `None` means no run.
    pub fn subscribe(&self) -> watch::Receiver<Option<TaskSnapshot>> {
        self.inner.updates.subscribe()
    }

    /// Register a view. Returns the current run, if any.
    pub fn attach(&self) -> Option<TaskSnapshot> {
        self.inner.views.fetch_add(1, Ordering::SeqCst);
        self.set_attached(true)
    }

    /// Unregister a view. The run itself is unaffected.
    pub fn detach(&self) {
        let previous = self
            .inner
            .views
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if previous <= 1 {
            self.set_attached(false);
        }
    }

    pub fn snapshot(&self) -> Option<TaskSnapshot> {
        self.inner.updates.borrow().clone()
    }

    pub fn state(&self) -> TaskState {
        self.inner
            .updates
            .borrow()
            .as_ref()
            .map_or(TaskState::Idle, |s| s.state)
    }

    fn set_attached(&self, attached: bool) -> Option<TaskSnapshot> {
        let mut slot = lock(&self.inner.slot);
        let task = slot.as_mut()?;
        task.snapshot.attached = attached;
        self.inner.updates.send_replace(Some(task.snapshot.clone()));
        Some(task.snapshot.clone())
    }
}

impl Inner {
    /// Apply one event to run `id`. Events for a superseded run, or arriving
    /// after the run reached a terminal state, are dropped.
    fn apply(&self, id: TaskId, event: StreamEvent) {
        let notice = {
            let mut slot = lock(&self.slot);
            let Some(task) = slot.as_mut().filter(|t| t.snapshot.id == id) else {
                return;
            };
            let s = &mut task.snapshot;
            if s.state.is_terminal() {
                return;
            }

            match event {
                StreamEvent::Status { message } => s.status_message = Some(message),
                StreamEvent::SearchProgress {
                    queries_completed,
                    total_queries,
                    candidates_found,
                } => {
                    s.progress.queries_completed = queries_completed;
                    s.progress.total_queries = total_queries;
                    s.total_candidates = candidates_found;
                }
                StreamEvent::SearchComplete { total_candidates } => {
                    s.total_candidates = total_candidates;
                    s.state = TaskState::Processing;
                }
                StreamEvent::Match { entity, progress } => {
                    s.matches.push(entity);
                    s.progress = progress;
                    s.state = TaskState::Processing;
                }
                StreamEvent::Progress { progress } => {
                    s.progress = progress;
                    s.state = TaskState::Processing;
                }
                StreamEvent::Complete { stats } => {
                    s.progress = stats.progress;
                    s.total_candidates = stats.total_candidates;
                    s.stats = Some(stats);
                    s.end(TaskState::Completed);
                    lock(&self.results).insert(s.filters.cache_key(), s.matches.clone(), stats);
                    info!(task = %id, matched = s.matches.len(), "run completed");
                }
                StreamEvent::Error { message } => {
                    warn!(task = %id, error = %message, "run failed");
                    s.error = Some(message);
                    s.end(TaskState::Error);
                }
            }

            self.updates.send_replace(Some(task.snapshot.clone()));
            task.take_notice()
        };

        if let Some(notice) = notice {
            self.notifier.notify(&notice);
        }
    }

    /// The transport returned. Anything short of a terminal event is an error.
    fn finish(&self, id: TaskId, result: Result<()>) {
        let mut slot = lock(&self.slot);
        let Some(task) = slot.as_mut().filter(|t| t.snapshot.id == id) else {
            return;
        };
        task.handle = None;
        if task.snapshot.state.is_terminal() {
            return;
        }
        let message = match result {
            Err(e) => e.to_string(),
            Ok(()) => "stream ended without a terminal event".to_string(),
        };
        warn!(task = %id, error = %message, "run failed");
        task.snapshot.error = Some(message);
        task.snapshot.end(TaskState::Error);
        self.updates.send_replace(Some(task.snapshot.clone()));
    }
}
