//! Stream session controller
//!
//! Owns one decoder, one collector and one master table per session and
//! reports progress through a [`SessionObserver`]. Session work runs on a
//! spawned task; every await point races the session's cancellation token.
//!
//! **Callback contract:**
//! - `on_update` once per successful merge (and once for a non-empty seed)
//! - `on_source_progress` on every source state transition
//! - exactly one of `on_complete` / `on_error` ends a session
//! - nothing fires once `cancel()` has returned, even when `cancel()` is
//!   called from inside a callback
//!
//! Starting a new session cancels the previous one.

use chrono::Utc;
use franchise_common::events::{EventBus, SessionEvent, StreamEvent};
use franchise_common::models::{FranchiseQuery, MasterTable, SourceState};
use franchise_common::{Error, Result};
use futures::StreamExt;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collector::{CollectorAction, SourceBatch, SourceBatchCollector};
use crate::config::StreamSettings;
use crate::decoder::decode_stream;
use crate::merge::MergeEngine;
use crate::seed::SeedProvider;
use crate::transport::{StreamTransport, TransportError};

/// Receiver of session callbacks
///
/// Callbacks run on the session task and should return quickly. They may
/// call back into the controller, including `cancel()` and `start()`.
pub trait SessionObserver: Send + Sync {
    /// Full table after a merge
    fn on_update(&self, table: &MasterTable);

    fn on_complete(&self);

    /// Stream-level failure; no `on_complete` follows
    fn on_error(&self, message: &str);

    fn on_source_progress(&self, state: &SourceState);
}

/// Republishes session callbacks as [`SessionEvent`]s on an [`EventBus`]
pub struct BroadcastObserver {
    bus: EventBus,
    session_id: Uuid,
}

impl BroadcastObserver {
    pub fn new(bus: EventBus, session_id: Uuid) -> Self {
        Self { bus, session_id }
    }
}

impl SessionObserver for BroadcastObserver {
    fn on_update(&self, table: &MasterTable) {
        self.bus.emit_lossy(SessionEvent::TableUpdated {
            session_id: self.session_id,
            table: table.clone(),
            timestamp: Utc::now(),
        });
    }

    fn on_complete(&self) {
        self.bus.emit_lossy(SessionEvent::SessionCompleted {
            session_id: self.session_id,
            timestamp: Utc::now(),
        });
    }

    fn on_error(&self, message: &str) {
        self.bus.emit_lossy(SessionEvent::SessionFailed {
            session_id: self.session_id,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn on_source_progress(&self, state: &SourceState) {
        self.bus.emit_lossy(SessionEvent::SourceProgress {
            session_id: self.session_id,
            state: state.clone(),
            timestamp: Utc::now(),
        });
    }
}

type UpdateFn = Box<dyn Fn(&MasterTable) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;
type ErrorFn = Box<dyn Fn(&str) + Send + Sync>;
type ProgressFn = Box<dyn Fn(&SourceState) + Send + Sync>;

/// Observer assembled from closures; unset callbacks do nothing
#[derive(Default)]
pub struct CallbackObserver {
    update: Option<UpdateFn>,
    complete: Option<CompleteFn>,
    error: Option<ErrorFn>,
    progress: Option<ProgressFn>,
}

impl CallbackObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_update(mut self, f: impl Fn(&MasterTable) + Send + Sync + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_source_progress(mut self, f: impl Fn(&SourceState) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }
}

impl SessionObserver for CallbackObserver {
    fn on_update(&self, table: &MasterTable) {
        if let Some(f) = &self.update {
            f(table);
        }
    }

    fn on_complete(&self) {
        if let Some(f) = &self.complete {
            f();
        }
    }

    fn on_error(&self, message: &str) {
        if let Some(f) = &self.error {
            f(message);
        }
    }

    fn on_source_progress(&self, state: &SourceState) {
        if let Some(f) = &self.progress {
            f(state);
        }
    }
}

thread_local! {
    /// Session whose callback is running on this thread
    static ACTIVE_CALLBACK: Cell<Option<Uuid>> = const { Cell::new(None) };
}

/// Restores the previous callback marker, also on unwind
struct CallbackMarker {
    previous: Option<Uuid>,
}

impl CallbackMarker {
    fn enter(session_id: Uuid) -> Self {
        let previous = ACTIVE_CALLBACK.with(|c| c.replace(Some(session_id)));
        Self { previous }
    }
}

impl Drop for CallbackMarker {
    fn drop(&mut self) {
        ACTIVE_CALLBACK.with(|c| c.set(self.previous));
    }
}

fn in_callback_of(session_id: Uuid) -> bool {
    ACTIVE_CALLBACK.with(|c| c.get() == Some(session_id))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the controller and one session task
struct SessionShared {
    id: Uuid,
    token: CancellationToken,
    cancelled: AtomicBool,
    finished: AtomicBool,
    /// Held for the duration of every callback
    gate: Mutex<()>,
    table: Mutex<MasterTable>,
    states: Mutex<Vec<SourceState>>,
    observer: Arc<dyn SessionObserver>,
}

impl SessionShared {
    fn new(id: Uuid, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            gate: Mutex::new(()),
            table: Mutex::new(MasterTable::new()),
            states: Mutex::new(Vec::new()),
            observer,
        }
    }

    fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && !self.finished.load(Ordering::SeqCst)
    }

    /// Run one callback unless the session was cancelled
    fn deliver(&self, f: impl FnOnce(&dyn SessionObserver)) -> bool {
        let _gate = lock(&self.gate);
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        let _marker = CallbackMarker::enter(self.id);
        f(self.observer.as_ref());
        true
    }

    /// Stop the session; no callback runs after this returns
    fn cancel(&self) {
        // Set even after completion so a pending terminal callback is dropped
        let already_cancelled = self.cancelled.swap(true, Ordering::SeqCst);
        if !already_cancelled && !self.finished.load(Ordering::SeqCst) {
            self.token.cancel();
            info!(session_id = %self.id, "Session cancelled");
        }

        // Wait out a callback running on another thread. From inside one of
        // this session's callbacks the gate is already held by this thread.
        if !in_callback_of(self.id) {
            drop(lock(&self.gate));
        }
    }
}

/// Collaborators a session task needs
#[derive(Clone)]
struct SessionContext {
    transport: Arc<dyn StreamTransport>,
    merge: MergeEngine,
    seed: Option<Arc<dyn SeedProvider>>,
    expected_sources: Vec<String>,
}

/// Marker for a session stopped by `cancel()`
struct Cancelled;

type Step = std::result::Result<(), Cancelled>;

/// Starts, tracks and cancels streaming sessions
///
/// At most one session is active per controller.
pub struct StreamSessionController {
    context: SessionContext,
    current: Mutex<Option<Arc<SessionShared>>>,
}

impl StreamSessionController {
    pub fn new(transport: Arc<dyn StreamTransport>, merge: MergeEngine) -> Self {
        Self {
            context: SessionContext {
                transport,
                merge,
                seed: None,
                expected_sources: Vec::new(),
            },
            current: Mutex::new(None),
        }
    }

    /// Controller wired from resolved settings
    pub fn from_settings(settings: &StreamSettings) -> std::result::Result<Self, TransportError> {
        let mut controller = Self::new(Arc::new(settings.transport()?), settings.merge_engine())
            .with_expected_sources(settings.expected_sources.clone());
        if let Some(seed) = settings.seed_provider() {
            controller = controller.with_seed(seed);
        }
        Ok(controller)
    }

    pub fn with_seed(mut self, seed: Arc<dyn SeedProvider>) -> Self {
        self.context.seed = Some(seed);
        self
    }

    /// Sources reported as initializing before their first event
    pub fn with_expected_sources(mut self, sources: Vec<String>) -> Self {
        self.context.expected_sources = sources;
        self
    }

    /// Start a session, cancelling any previous one
    ///
    /// Must be called within a tokio runtime. Returns the new session id.
    pub fn start(&self, query: FranchiseQuery, observer: Arc<dyn SessionObserver>) -> Result<Uuid> {
        self.launch(query, Uuid::new_v4(), observer)
    }

    /// Start a session whose callbacks are published on `bus`
    pub fn start_broadcast(&self, query: FranchiseQuery, bus: &EventBus) -> Result<Uuid> {
        let session_id = Uuid::new_v4();
        let observer = Arc::new(BroadcastObserver::new(bus.clone(), session_id));
        self.launch(query, session_id, observer)
    }

    fn launch(&self, query: FranchiseQuery, session_id: Uuid, observer: Arc<dyn SessionObserver>) -> Result<Uuid> {
        query.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("No tokio runtime for session: {}", e)))?;

        let shared = Arc::new(SessionShared::new(session_id, observer));
        let previous = lock(&self.current).replace(shared.clone());
        if let Some(previous) = previous {
            debug!(session_id = %previous.id, "Replacing previous session");
            previous.cancel();
        }

        info!(
            session_id = %session_id,
            franchise = %query.franchise_name,
            city = %query.city,
            "Starting location stream"
        );

        let run = SessionRun::new(shared, self.context.clone());
        runtime.spawn(run.execute(query));
        Ok(session_id)
    }

    /// Cancel the current session; no-op when none is running
    pub fn cancel(&self) {
        let current = lock(&self.current).clone();
        if let Some(shared) = current {
            shared.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.current).as_ref().is_some_and(|s| s.is_active())
    }

    pub fn session_id(&self) -> Option<Uuid> {
        lock(&self.current).as_ref().map(|s| s.id)
    }

    /// Latest master table of the current (or last) session
    pub fn snapshot(&self) -> MasterTable {
        let current = lock(&self.current).clone();
        current.map(|s| lock(&s.table).clone()).unwrap_or_default()
    }

    /// Source states of the current (or last) session, first-seen order
    pub fn source_states(&self) -> Vec<SourceState> {
        let current = lock(&self.current).clone();
        current.map(|s| lock(&s.states).clone()).unwrap_or_default()
    }
}

impl Drop for StreamSessionController {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One session's task state
struct SessionRun {
    shared: Arc<SessionShared>,
    context: SessionContext,
    collector: SourceBatchCollector,
    table: MasterTable,
}

impl SessionRun {
    fn new(shared: Arc<SessionShared>, context: SessionContext) -> Self {
        Self {
            shared,
            context,
            collector: SourceBatchCollector::new(),
            table: MasterTable::new(),
        }
    }

    async fn execute(mut self, query: FranchiseQuery) {
        let session_id = self.shared.id;
        if self.run(&query).await.is_err() {
            debug!(session_id = %session_id, "Session task stopped after cancel");
        }
    }

    async fn run(&mut self, query: &FranchiseQuery) -> Step {
        for source in self.context.expected_sources.clone() {
            if let Some(state) = self.collector.register(&source) {
                self.progress(state);
            }
        }

        self.seed(query).await?;

        let token = self.shared.token.clone();
        let transport = self.context.transport.clone();
        let opened = tokio::select! {
            _ = token.cancelled() => return Err(Cancelled),
            opened = transport.open(query) => opened,
        };
        let chunks = match opened {
            Ok(chunks) => chunks,
            Err(e) => {
                self.fail(&e.to_string());
                return Ok(());
            }
        };

        let events = decode_stream(chunks);
        futures::pin_mut!(events);

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Err(Cancelled),
                next = events.next() => next,
            };

            match next {
                None | Some(Ok(StreamEvent::AllComplete)) => break,
                Some(Err(e)) => {
                    self.fail(&e.to_string());
                    return Ok(());
                }
                Some(Ok(StreamEvent::StreamError { source: None, message })) => {
                    self.fail(&message);
                    return Ok(());
                }
                Some(Ok(event)) => {
                    for action in self.collector.apply(&event) {
                        self.handle(action).await?;
                    }
                }
            }
        }

        for action in self.collector.finish() {
            self.handle(action).await?;
        }
        self.complete();
        Ok(())
    }

    /// Fetch the seed table, reported as its own source
    async fn seed(&mut self, query: &FranchiseQuery) -> Step {
        let Some(seed) = self.context.seed.clone() else {
            return Ok(());
        };
        let source = seed.source_name().to_string();
        if let Some(state) = self.collector.register(&source) {
            self.progress(state);
        }

        let token = self.shared.token.clone();
        let result = tokio::select! {
            _ = token.cancelled() => return Err(Cancelled),
            result = seed.seed(query) => result,
        };

        let state = match result {
            Ok(seeded) => {
                let found = seeded.len();
                if !seeded.is_empty() {
                    self.publish(seeded);
                }
                let message = if found == 0 {
                    "No locations found".to_string()
                } else {
                    format!("Found {} locations", found)
                };
                let count = u32::try_from(found).unwrap_or(u32::MAX);
                self.collector.mark_complete(&source, &message, count)
            }
            Err(e) => {
                warn!(session_id = %self.shared.id, source = %source, error = %e, "Seed lookup failed");
                self.collector.mark_failed(&source, &e.to_string())
            }
        };
        if let Some(state) = state {
            self.progress(state);
        }
        Ok(())
    }

    async fn handle(&mut self, action: CollectorAction) -> Step {
        match action {
            CollectorAction::Progress(state) => {
                self.progress(state);
                Ok(())
            }
            CollectorAction::BatchReady(batch) => self.merge(batch).await,
        }
    }

    async fn merge(&mut self, batch: SourceBatch) -> Step {
        debug!(
            session_id = %self.shared.id,
            source = %batch.source,
            records = batch.records.len(),
            "Merging source batch"
        );

        let token = self.shared.token.clone();
        let merge = self.context.merge.clone();
        let merged = tokio::select! {
            _ = token.cancelled() => return Err(Cancelled),
            merged = merge.merge(&self.table, &batch.records, batch.all_same_source()) => merged,
        };
        self.publish(merged);
        Ok(())
    }

    fn publish(&mut self, table: MasterTable) {
        self.table = table;
        *lock(&self.shared.table) = self.table.clone();
        let table = &self.table;
        self.shared.deliver(|observer| observer.on_update(table));
    }

    fn progress(&self, state: SourceState) {
        *lock(&self.shared.states) = self.collector.states();
        debug!(
            session_id = %self.shared.id,
            source = %state.source,
            status = ?state.status,
            count = state.count,
            "Source progress"
        );
        self.shared.deliver(|observer| observer.on_source_progress(&state));
    }

    fn complete(&self) {
        self.shared.finished.store(true, Ordering::SeqCst);
        info!(
            session_id = %self.shared.id,
            locations = self.table.len(),
            "Location stream complete"
        );
        self.shared.deliver(|observer| observer.on_complete());
    }

    fn fail(&self, message: &str) {
        self.shared.finished.store(true, Ordering::SeqCst);
        warn!(session_id = %self.shared.id, error = %message, "Location stream failed");
        self.shared.deliver(|observer| observer.on_error(message));
    }
}
