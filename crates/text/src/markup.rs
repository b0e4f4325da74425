//! Speech markup construction and sizing
//!
//! Builds the single-line SSML document sent for each chunk and computes
//! how many payload bytes fit under the service's message size limit.

use readaloud_core::time::js_date_string;
use readaloud_core::SpeechConfig;

/// Hard limit on a single message accepted by the service.
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Safety margin subtracted from the computed payload budget.
const MESSAGE_SIZE_MARGIN: usize = 50;

/// Request ids are UUIDs with the hyphens removed.
const REQUEST_ID_WIDTH: usize = 32;

/// Replace characters the service rejects with spaces.
///
/// Covers the control ranges XML 1.0 cannot carry; the vertical tab in
/// particular is common in OCR-ed documents and makes the service error.
pub fn remove_incompatible_characters(text: &str) -> String {
    text.chars()
        .map(|c| match u32::from(c) {
            0..=8 | 11..=12 | 14..=31 => ' ',
            _ => c,
        })
        .collect()
}

/// Escape the five XML entities.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Builds the markup document and framed message for one chunk
#[derive(Debug, Clone)]
pub struct MarkupBuilder {
    config: SpeechConfig,
}

impl MarkupBuilder {
    /// Create a builder for the given voice configuration.
    pub fn new(config: SpeechConfig) -> Self {
        Self { config }
    }

    /// The voice configuration this builder wraps.
    pub fn config(&self) -> &SpeechConfig {
        &self.config
    }

    /// Build the single-line markup document wrapping `text`.
    ///
    /// `text` must already be cleaned and escaped.
    pub fn build(&self, text: &str) -> String {
        format!(
            "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='en-US'>\
             <voice name='{}'><prosody pitch='{}' rate='{}' volume='{}'>{}</prosody></voice></speak>",
            self.config.voice, self.config.pitch, self.config.rate, self.config.volume, text
        )
    }

    /// The full framed markup message: header lines, blank line, document.
    ///
    /// The timestamp carries a bare `Z` suffix; the service expects it
    /// even though the date string already names its timezone.
    pub fn framed(&self, request_id: &str, timestamp: &str, markup: &str) -> String {
        format!(
            "X-RequestId:{request_id}\r\n\
             Content-Type:application/ssml+xml\r\n\
             X-Timestamp:{timestamp}Z\r\n\
             Path:ssml\r\n\r\n\
             {markup}"
        )
    }

    /// Byte budget available to chunk text for this configuration.
    ///
    /// Computed as the message size limit minus the overhead of a framed
    /// empty-text document minus a safety margin.
    pub fn max_payload_bytes(&self) -> usize {
        let placeholder_id = "0".repeat(REQUEST_ID_WIDTH);
        let overhead = self
            .framed(&placeholder_id, &js_date_string(), &self.build(""))
            .len();
        MAX_MESSAGE_SIZE.saturating_sub(overhead + MESSAGE_SIZE_MARGIN)
    }
}
