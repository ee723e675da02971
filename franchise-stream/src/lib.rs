//! franchise-stream library
//!
//! Streaming client for the franchise location search server: decodes the
//! server's event stream, buffers records per source and merges each
//! finished batch into one deduplicated master table.

pub mod collector;
pub mod config;
pub mod decoder;
pub mod merge;
pub mod seed;
pub mod session;
pub mod transport;

pub use collector::{CollectorAction, SourceBatch, SourceBatchCollector};
pub use config::{CliOverrides, StreamSettings};
pub use decoder::{decode_stream, FrameDecoder};
pub use merge::{AddressMatcher, MergeEngine, MergeError, SemanticMerger};
pub use seed::{SeedError, SeedProvider};
pub use session::{BroadcastObserver, CallbackObserver, SessionObserver, StreamSessionController};
pub use transport::{ChunkStream, HttpStreamTransport, StreamTransport, TransportError};
