//! Source batch collector
//!
//! Buffers `LocationFound` records per source and drives each source through
//! `Initializing → Searching → Complete | Error`. A source's buffer is handed
//! out as a [`SourceBatch`] when the source completes and dropped unmerged
//! when it fails.
//!
//! Sources interleave freely; nothing here assumes one finishes before
//! another starts.

use franchise_common::events::{CountUpdate, StreamEvent};
use franchise_common::models::{SourceState, SourceStatus, SourcedLocation};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Records buffered for one source, ready to merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBatch {
    pub source: String,
    pub records: Vec<SourcedLocation>,
}

impl SourceBatch {
    /// Whether every record carries the batch's source label
    pub fn all_same_source(&self) -> bool {
        self.records.iter().all(|r| r.source == self.source)
    }
}

/// What the session must do after feeding an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorAction {
    /// A source's state changed; report it
    Progress(SourceState),
    /// A source finished; merge its records
    BatchReady(SourceBatch),
}

#[derive(Debug)]
struct SourceEntry {
    state: SourceState,
    buffer: Vec<SourcedLocation>,
}

/// Per-source buffers and lifecycle state for one session
#[derive(Debug, Default)]
pub struct SourceBatchCollector {
    /// First-seen order
    entries: Vec<SourceEntry>,
    index: HashMap<String, usize>,
}

impl SourceBatchCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source before any event names it
    ///
    /// Returns the initial state when the source is new.
    pub fn register(&mut self, source: &str) -> Option<SourceState> {
        if self.index.contains_key(source) {
            return None;
        }
        let entry = self.entry_mut(source);
        entry.state.message = "Waiting for results...".to_string();
        Some(entry.state.clone())
    }

    /// Apply one decoded event
    pub fn apply(&mut self, event: &StreamEvent) -> Vec<CollectorAction> {
        match event {
            StreamEvent::LocationFound(record) => self.accept_record(record),
            StreamEvent::SourceStatus {
                source,
                status,
                message,
                count,
            } => self.update_status(source, *status, message, *count),
            StreamEvent::SourceComplete { source, message } => self.complete(source, message),
            StreamEvent::StreamError {
                source: Some(source),
                message,
            } => self.mark_failed(source, message).into_iter().map(CollectorAction::Progress).collect(),
            // Session-level signals
            StreamEvent::StreamError { source: None, .. } | StreamEvent::AllComplete => Vec::new(),
        }
    }

    /// Complete every source still running
    ///
    /// Called once the stream has ended. Pending records are released as
    /// batches so nothing accepted is lost.
    pub fn finish(&mut self) -> Vec<CollectorAction> {
        let mut actions = Vec::new();

        for entry in self.entries.iter_mut().filter(|e| !e.state.status.is_terminal()) {
            let records = std::mem::take(&mut entry.buffer);
            entry.state.status = SourceStatus::Complete;
            entry.state.message = if entry.state.count == 0 {
                "No locations found".to_string()
            } else {
                format!("Found {} locations", entry.state.count)
            };
            debug!(
                source = %entry.state.source,
                pending = records.len(),
                "Completing source at end of stream"
            );

            if !records.is_empty() {
                actions.push(CollectorAction::BatchReady(SourceBatch {
                    source: entry.state.source.clone(),
                    records,
                }));
            }
            actions.push(CollectorAction::Progress(entry.state.clone()));
        }

        actions
    }

    /// Mark a source complete without a batch (results delivered elsewhere)
    pub fn mark_complete(&mut self, source: &str, message: &str, count: u32) -> Option<SourceState> {
        let entry = self.entry_mut(source);
        if entry.state.status.is_terminal() {
            warn!(source = %source, "Completion for finished source ignored");
            return None;
        }
        entry.buffer.clear();
        entry.state.status = SourceStatus::Complete;
        entry.state.message = message.to_string();
        entry.state.count = entry.state.count.max(count);
        Some(entry.state.clone())
    }

    /// Move a source to `Error`, discarding its buffered records
    pub fn mark_failed(&mut self, source: &str, message: &str) -> Option<SourceState> {
        let entry = self.entry_mut(source);
        if entry.state.status.is_terminal() {
            warn!(source = %source, "Error for finished source ignored");
            return None;
        }

        let discarded = entry.buffer.len();
        entry.buffer = Vec::new();
        entry.state.status = SourceStatus::Error;
        entry.state.message = message.to_string();
        warn!(
            source = %source,
            discarded = discarded,
            error = %message,
            "Source failed, buffered records discarded"
        );
        Some(entry.state.clone())
    }

    pub fn state(&self, source: &str) -> Option<&SourceState> {
        self.index.get(source).map(|&i| &self.entries[i].state)
    }

    /// All source states in first-seen order
    pub fn states(&self) -> Vec<SourceState> {
        self.entries.iter().map(|e| e.state.clone()).collect()
    }

    /// Records buffered for a source and not yet merged
    pub fn pending(&self, source: &str) -> usize {
        self.index
            .get(source)
            .map(|&i| self.entries[i].buffer.len())
            .unwrap_or(0)
    }

    /// True when every known source is `Complete` or `Error`
    pub fn all_terminal(&self) -> bool {
        self.entries.iter().all(|e| e.state.status.is_terminal())
    }

    fn accept_record(&mut self, record: &SourcedLocation) -> Vec<CollectorAction> {
        let entry = self.entry_mut(&record.source);
        if entry.state.status.is_terminal() {
            warn!(
                source = %record.source,
                status = ?entry.state.status,
                address = %record.address,
                "Location for finished source dropped"
            );
            return Vec::new();
        }

        entry.buffer.push(record.clone());
        entry.state.status = SourceStatus::Searching;
        entry.state.count = entry.state.count.saturating_add(1);
        entry.state.message = format!("Found a location from {}", record.source);
        vec![CollectorAction::Progress(entry.state.clone())]
    }

    fn update_status(
        &mut self,
        source: &str,
        status: SourceStatus,
        message: &str,
        count: Option<CountUpdate>,
    ) -> Vec<CollectorAction> {
        match status {
            SourceStatus::Error => {
                return self
                    .mark_failed(source, message)
                    .into_iter()
                    .map(CollectorAction::Progress)
                    .collect();
            }
            SourceStatus::Complete => return self.complete(source, message),
            SourceStatus::Initializing | SourceStatus::Searching => {}
        }

        let entry = self.entry_mut(source);
        if entry.state.status.is_terminal() {
            warn!(source = %source, status = ?status, "Status for finished source ignored");
            return Vec::new();
        }

        // A running source never goes back to initializing
        if status == SourceStatus::Searching || entry.state.status == SourceStatus::Searching {
            entry.state.status = SourceStatus::Searching;
        }
        if !message.is_empty() {
            entry.state.message = message.to_string();
        }
        match count {
            Some(CountUpdate::Increment) => entry.state.count = entry.state.count.saturating_add(1),
            Some(CountUpdate::Set(n)) => entry.state.count = entry.state.count.max(n),
            None => {}
        }

        vec![CollectorAction::Progress(entry.state.clone())]
    }

    fn complete(&mut self, source: &str, message: &str) -> Vec<CollectorAction> {
        let entry = self.entry_mut(source);
        if entry.state.status.is_terminal() {
            warn!(source = %source, "Duplicate completion ignored");
            return Vec::new();
        }

        let records = std::mem::take(&mut entry.buffer);
        entry.state.status = SourceStatus::Complete;
        entry.state.message = if message.is_empty() {
            format!("Found {} locations", entry.state.count)
        } else {
            message.to_string()
        };
        debug!(source = %source, records = records.len(), "Source complete");

        let mut actions = Vec::with_capacity(2);
        if !records.is_empty() {
            actions.push(CollectorAction::BatchReady(SourceBatch {
                source: source.to_string(),
                records,
            }));
        }
        actions.push(CollectorAction::Progress(entry.state.clone()));
        actions
    }

    fn entry_mut(&mut self, source: &str) -> &mut SourceEntry {
        let i = match self.index.get(source) {
            Some(&i) => i,
            None => {
                self.entries.push(SourceEntry {
                    state: SourceState::new(source),
                    buffer: Vec::new(),
                });
                let i = self.entries.len() - 1;
                self.index.insert(source.to_string(), i);
                i
            }
        };
        &mut self.entries[i]
    }
}
