//! Text preparation for speech synthesis
//!
//! This crate turns raw input text into wire-ready pieces:
//! - Cleaning and XML escaping
//! - Speech markup (SSML) construction and per-message overhead
//! - Byte-bounded chunking that honors word and entity boundaries

pub mod chunker;
pub mod markup;

pub use chunker::ByteChunks;
pub use markup::{escape_text, remove_incompatible_characters, MarkupBuilder};
