//! Streaming client for the Edge read-aloud synthesis service
//!
//! Drives the service's framed message protocol over a persistent
//! channel and streams back audio with word-level timing metadata for
//! arbitrarily long input text:
//! - Byte-bounded chunking so every request fits the wire limit
//! - One authenticated channel per chunk, with clock-skew recovery
//! - A single ordered output stream with monotonic word offsets
//! - Transparent retry on transient connection failures
//!
//! # Example
//!
//! ```no_run
//! use readaloud_client::{SpeechConfig, SynthesisJob};
//! use tokio_stream::StreamExt;
//!
//! # async fn example() -> readaloud_client::Result<()> {
//! let config = SpeechConfig::new("en-US-AriaNeural")?;
//! let mut stream = SynthesisJob::new("Hello, world!", config).stream();
//!
//! while let Some(record) = stream.next().await {
//!     match record? {
//!         readaloud_client::OutputRecord::Audio(chunk) => {
//!             // feed chunk.data to a player or file
//!             let _ = chunk.data;
//!         }
//!         readaloud_client::OutputRecord::WordBoundary(word) => {
//!             println!("{}ms {}", word.offset_ms(), word.text);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod session;
mod stream;

pub use readaloud_core::{AudioChunk, Error, OutputRecord, Result, SpeechConfig, WordBoundary};
pub use readaloud_transport::{RetryEvent, RetryPolicy, DEFAULT_ENDPOINT};
pub use stream::RecordStream;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Callback invoked with each word boundary before it reaches the
/// stream, e.g. a subtitle collector.
pub type WordHook = Box<dyn Fn(&WordBoundary) + Send + Sync>;

/// Construction options for a synthesis job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    /// Channel open timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-frame receive timeout in milliseconds
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Reconnect policy for channel opens
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Optional HTTP CONNECT proxy, e.g. `http://127.0.0.1:8888`
    #[serde(default)]
    pub proxy: Option<String>,

    /// Service endpoint (tests and self-hosted gateways may override it)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_receive_timeout_ms() -> u64 {
    60_000
}
fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            retry: RetryPolicy::default(),
            proxy: None,
            endpoint: default_endpoint(),
        }
    }
}

/// One synthesis job: a text, a voice configuration, and options
///
/// A job is consumed by [`SynthesisJob::stream`], so its output can be
/// iterated at most once.
pub struct SynthesisJob {
    text: String,
    config: SpeechConfig,
    options: JobOptions,
    word_hook: Option<WordHook>,
    retry_events: Option<mpsc::Sender<RetryEvent>>,
}

impl SynthesisJob {
    /// Create a job with default options.
    pub fn new(text: impl Into<String>, config: SpeechConfig) -> Self {
        Self::with_options(text, config, JobOptions::default())
    }

    /// Create a job with explicit options.
    pub fn with_options(text: impl Into<String>, config: SpeechConfig, options: JobOptions) -> Self {
        Self {
            text: text.into(),
            config,
            options,
            word_hook: None,
            retry_events: None,
        }
    }

    /// Install a hook called with each word boundary before it is
    /// forwarded to the stream.
    pub fn on_word_boundary<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WordBoundary) + Send + Sync + 'static,
    {
        self.word_hook = Some(Box::new(hook));
        self
    }

    /// Observe reconnect-policy events.
    pub fn on_retry_event(mut self, events: mpsc::Sender<RetryEvent>) -> Self {
        self.retry_events = Some(events);
        self
    }

    /// Start synthesis and return the ordered output stream.
    ///
    /// Must be called within a Tokio runtime. Consuming the job makes
    /// the stream once-consumable by construction.
    pub fn stream(self) -> RecordStream {
        stream::spawn(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_options_defaults() {
        let options = JobOptions::default();
        assert_eq!(options.connect_timeout_ms, 10_000);
        assert_eq!(options.receive_timeout_ms, 60_000);
        assert_eq!(options.retry.max_retries, 3);
        assert!(options.proxy.is_none());
        assert_eq!(options.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_job_options_deserialize_with_defaults() {
        let options: JobOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.connect_timeout_ms, 10_000);
        assert_eq!(options.retry.initial_delay_ms, 1_000);
    }
}
