//! Test Helper Utilities
//!
//! Shared utilities for testing franchise-stream

#![allow(dead_code, unused_imports)]

pub mod log_capture;
pub mod recording;

pub use log_capture::{capture_logs, LogCapture};
pub use recording::{
    frame, wait_until, Callback, GatedTransport, RecordingObserver, ScriptedTransport, StaticSeed,
};
