//! Core types for the read-aloud synthesis client
//!
//! This crate provides foundational types used across all other crates:
//! - Output records (audio payloads and word-boundary timings)
//! - Synthesis configuration and validation
//! - Error types
//! - Shared time helpers

pub mod error;
pub mod record;
pub mod speech;
pub mod time;

pub use error::{Error, Result};
pub use record::{AudioChunk, OutputRecord, WordBoundary};
pub use speech::SpeechConfig;
