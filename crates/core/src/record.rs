//! Output records for a synthesis job

use serde::{Deserialize, Serialize};

use crate::time::TICKS_PER_MILLISECOND;

/// One tagged record in a synthesis output stream.
///
/// Records arrive in service order within a chunk and in chunk order
/// across chunks; word-boundary offsets are non-decreasing over the
/// whole stream.
#[derive(Debug, Clone)]
pub enum OutputRecord {
    /// Raw audio payload (MP3 at the configured output format)
    Audio(AudioChunk),
    /// Word-level timing record aligned to the full synthesized timeline
    WordBoundary(WordBoundary),
}

impl OutputRecord {
    /// Is this an audio record?
    pub fn is_audio(&self) -> bool {
        matches!(self, OutputRecord::Audio(_))
    }

    /// Borrow the word boundary, if this is a timing record.
    pub fn as_word_boundary(&self) -> Option<&WordBoundary> {
        match self {
            OutputRecord::WordBoundary(boundary) => Some(boundary),
            OutputRecord::Audio(_) => None,
        }
    }
}

/// Raw audio bytes received from the service
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Audio payload bytes
    pub data: Vec<u8>,
}

/// Timing record aligning one spoken token to the audio timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordBoundary {
    /// Start offset in 100-ns ticks from the start of the full timeline
    pub offset_ticks: u64,

    /// Duration in 100-ns ticks
    pub duration_ticks: u64,

    /// The spoken token
    pub text: String,
}

impl WordBoundary {
    /// Start offset in milliseconds.
    pub fn offset_ms(&self) -> u64 {
        self.offset_ticks / TICKS_PER_MILLISECOND
    }

    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ticks / TICKS_PER_MILLISECOND
    }

    /// End of the word in ticks (offset plus duration).
    pub fn end_ticks(&self) -> u64 {
        self.offset_ticks + self.duration_ticks
    }
}
