//! Event types for the franchise locator
//!
//! Two families:
//! - [`StreamEvent`]: typed events decoded from the search server's stream
//! - [`SessionEvent`]: what a streaming session publishes to its caller,
//!   broadcast through [`EventBus`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{MasterTable, SourceState, SourceStatus, SourcedLocation};

/// Count change carried by a source status frame
///
/// The wire protocol uses `-1` to mean "one more"; that convention stops at
/// the decoder and never reaches the collector as a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountUpdate {
    /// Replace the count (never lowers it, see the collector)
    Set(u32),
    /// Add one to the current count
    Increment,
}

impl CountUpdate {
    /// Interpret a raw wire count; negatives other than `-1` carry no update
    pub fn from_wire(raw: i64) -> Option<Self> {
        match raw {
            -1 => Some(CountUpdate::Increment),
            n if n >= 0 => Some(CountUpdate::Set(u32::try_from(n).unwrap_or(u32::MAX))),
            _ => None,
        }
    }
}

/// Typed event decoded from one stream frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A source reported one location
    LocationFound(SourcedLocation),
    /// A source changed status (never `Complete`, which has its own variant)
    SourceStatus {
        source: String,
        status: SourceStatus,
        message: String,
        count: Option<CountUpdate>,
    },
    /// A source finished; its buffered batch is ready for merging
    SourceComplete { source: String, message: String },
    /// The server finished all sources
    AllComplete,
    /// An error frame. Scoped to one source when `source` is set,
    /// otherwise it ends the session.
    StreamError {
        source: Option<String>,
        message: String,
    },
}

impl StreamEvent {
    /// Source this event refers to, if any
    pub fn source(&self) -> Option<&str> {
        match self {
            StreamEvent::LocationFound(location) => Some(&location.source),
            StreamEvent::SourceStatus { source, .. } | StreamEvent::SourceComplete { source, .. } => {
                Some(source)
            }
            StreamEvent::StreamError { source, .. } => source.as_deref(),
            StreamEvent::AllComplete => None,
        }
    }
}

/// Session output events
///
/// Serialized with a `type` tag so they can be forwarded as-is to any
/// JSON consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Master table replaced after a merge (or seeded)
    TableUpdated {
        session_id: Uuid,
        table: MasterTable,
        timestamp: DateTime<Utc>,
    },

    /// A source's progress changed
    SourceProgress {
        session_id: Uuid,
        state: SourceState,
        timestamp: DateTime<Utc>,
    },

    /// Every source reached a terminal state and the stream ended
    SessionCompleted {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// The stream failed; the session is over
    SessionFailed {
        session_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::TableUpdated { session_id, .. }
            | SessionEvent::SourceProgress { session_id, .. }
            | SessionEvent::SessionCompleted { session_id, .. }
            | SessionEvent::SessionFailed { session_id, .. } => *session_id,
        }
    }

    /// True for the two events that end a session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::SessionCompleted { .. } | SessionEvent::SessionFailed { .. }
        )
    }
}

/// Broadcast channel for session events
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded
/// (tokio broadcast semantics); table updates are full snapshots, so a
/// lagging subscriber only needs the latest one.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// ```
    /// use franchise_common::events::EventBus;
    ///
    /// let bus = EventBus::new(100);
    /// assert_eq!(bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the number of receivers, or the event back if nobody listens.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SessionEvent) -> Result<usize, broadcast::error::SendError<SessionEvent>> {
        self.tx.send(event)
    }

    /// Emit without caring whether anyone listens
    pub fn emit_lossy(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for session event");
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
