//! Recording observer and in-memory collaborators

use async_trait::async_trait;
use franchise_common::models::{FranchiseQuery, MasterTable, SourceState};
use franchise_stream::seed::{SeedError, SeedProvider};
use franchise_stream::transport::{ChunkStream, StreamTransport, TransportError};
use futures::channel::mpsc;
use futures::{stream, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One observed callback
#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    Update(MasterTable),
    Complete,
    Error(String),
    Progress(SourceState),
}

type Hook = Box<dyn Fn(&Callback) + Send + Sync>;

/// Observer that records every callback in order
#[derive(Default)]
pub struct RecordingObserver {
    calls: Mutex<Vec<Callback>>,
    hook: Mutex<Option<Hook>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `hook` after recording each callback
    pub fn set_hook(&self, hook: impl Fn(&Callback) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<Callback> {
        self.calls.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<MasterTable> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Callback::Update(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<SourceState> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Callback::Progress(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Callback::Error(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> usize {
        self.calls().iter().filter(|c| **c == Callback::Complete).count()
    }

    /// True once `on_complete` or `on_error` was seen
    pub fn finished(&self) -> bool {
        self.calls()
            .iter()
            .any(|c| matches!(c, Callback::Complete | Callback::Error(_)))
    }

    fn record(&self, call: Callback) {
        self.calls.lock().unwrap().push(call.clone());
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(&call);
        }
    }
}

impl franchise_stream::SessionObserver for RecordingObserver {
    fn on_update(&self, table: &MasterTable) {
        self.record(Callback::Update(table.clone()));
    }

    fn on_complete(&self) {
        self.record(Callback::Complete);
    }

    fn on_error(&self, message: &str) {
        self.record(Callback::Error(message.to_string()));
    }

    fn on_source_progress(&self, state: &SourceState) {
        self.record(Callback::Progress(state.clone()));
    }
}

/// Transport replaying a fixed list of chunks, or failing to open
pub struct ScriptedTransport {
    chunks: Vec<Result<Vec<u8>, String>>,
    open_error: Option<u16>,
}

impl ScriptedTransport {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Ok).collect(),
            open_error: None,
        }
    }

    /// Chunks followed by a read failure
    pub fn failing_after(chunks: Vec<Vec<u8>>, error: &str) -> Self {
        let mut scripted = Self::new(chunks);
        scripted.chunks.push(Err(error.to_string()));
        scripted
    }

    pub fn refusing(status: u16) -> Self {
        Self {
            chunks: Vec::new(),
            open_error: Some(status),
        }
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&self, _query: &FranchiseQuery) -> Result<ChunkStream, TransportError> {
        if let Some(status) = self.open_error {
            return Err(TransportError::Status(status));
        }
        let chunks: Vec<Result<Vec<u8>, TransportError>> = self
            .chunks
            .iter()
            .map(|c| c.clone().map_err(TransportError::Read))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

/// Transport whose chunks are pushed by the test, one channel per open
#[derive(Clone, Default)]
pub struct GatedTransport {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>>>>,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    /// Push a chunk into the stream of the `index`th open
    pub fn push(&self, index: usize, chunk: Vec<u8>) {
        let senders = self.senders.lock().unwrap();
        let _ = senders[index].unbounded_send(Ok(chunk));
    }

    /// End the stream of the `index`th open
    pub fn close(&self, index: usize) {
        self.senders.lock().unwrap()[index].close_channel();
    }
}

#[async_trait]
impl StreamTransport for GatedTransport {
    async fn open(&self, _query: &FranchiseQuery) -> Result<ChunkStream, TransportError> {
        let (tx, rx) = mpsc::unbounded();
        self.senders.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }
}

/// Seed provider returning a fixed result
pub struct StaticSeed {
    result: Result<MasterTable, String>,
}

impl StaticSeed {
    pub fn table(table: MasterTable) -> Self {
        Self { result: Ok(table) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl SeedProvider for StaticSeed {
    fn source_name(&self) -> &str {
        "Google Places"
    }

    async fn seed(&self, _query: &FranchiseQuery) -> Result<MasterTable, SeedError> {
        self.result.clone().map_err(SeedError::Network)
    }
}

/// One wire frame carrying `payload`
pub fn frame(payload: serde_json::Value) -> Vec<u8> {
    format!("data: {}\n\n", payload).into_bytes()
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
