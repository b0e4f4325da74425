//! Per-channel synthesis exchange
//!
//! Drives one request/response turn over an open channel: sends the
//! config and markup messages, then consumes frames until the turn ends,
//! emitting audio and word-boundary records along the way.

use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use readaloud_core::time::js_date_string;
use readaloud_core::{AudioChunk, Error, OutputRecord, Result, WordBoundary};
use readaloud_text::MarkupBuilder;
use readaloud_transport::{decode_binary, decode_text, encode_text, ServiceChannel};

use crate::WordHook;

/// Padding the service appends to the tail of each turn's audio, in
/// ticks. Adopted from observed service behavior (about 875 ms).
const POST_TURN_PADDING_TICKS: u64 = 8_750_000;

/// Output format requested in the config message.
const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

/// Driver states for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    AwaitResponse,
    AwaitTurnStart,
    Streaming,
}

/// Timeline state carried across chunks within one job.
///
/// Word offsets arrive relative to the current turn; the compensation
/// shifts them onto the job-wide timeline and grows at each turn end so
/// offsets stay monotonic across chunks.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Timeline {
    /// Ticks added to every emitted word-boundary offset
    offset_compensation: u64,
    /// End of the last emitted word boundary, on the job-wide timeline
    last_duration_offset: u64,
}

impl Timeline {
    /// Shift a turn-relative word boundary onto the job timeline.
    fn place(&mut self, offset: u64, duration: u64, text: String) -> WordBoundary {
        let boundary = WordBoundary {
            offset_ticks: offset + self.offset_compensation,
            duration_ticks: duration,
            text,
        };
        self.last_duration_offset = boundary.end_ticks();
        boundary
    }

    /// Advance the compensation past the just-finished turn's audio.
    pub(crate) fn complete_turn(&mut self) {
        self.offset_compensation = self.last_duration_offset + POST_TURN_PADDING_TICKS;
    }

    #[cfg(test)]
    fn offset_compensation(&self) -> u64 {
        self.offset_compensation
    }
}

/// Run one turn over `channel`, synthesizing `chunk`.
///
/// Returns once `turn.end` is observed; every audio and word-boundary
/// record is forwarded through `records` in arrival order.
pub(crate) async fn run_turn(
    channel: &mut ServiceChannel,
    markup: &MarkupBuilder,
    chunk: &[u8],
    timeline: &mut Timeline,
    records: &mpsc::Sender<Result<OutputRecord>>,
    word_hook: Option<&WordHook>,
) -> Result<()> {
    send_config(channel).await?;
    send_markup(channel, markup, chunk).await?;

    let mut state = DriverState::AwaitResponse;
    let mut audio_received = false;

    loop {
        match channel.recv().await? {
            Message::Text(raw) => {
                let frame = decode_text(&raw)?;
                match frame.path() {
                    Some("response") if state == DriverState::AwaitResponse => {
                        state = DriverState::AwaitTurnStart;
                    }
                    Some("turn.start") if state == DriverState::AwaitTurnStart => {
                        state = DriverState::Streaming;
                    }
                    Some("audio.metadata") if state == DriverState::Streaming => {
                        for boundary in parse_metadata(&frame.body, timeline)? {
                            if let Some(hook) = word_hook {
                                hook(&boundary);
                            }
                            forward(records, OutputRecord::WordBoundary(boundary)).await?;
                        }
                    }
                    Some("turn.end") if state == DriverState::Streaming => {
                        if !audio_received {
                            return Err(Error::NoAudioReceived);
                        }
                        timeline.complete_turn();
                        tracing::debug!("turn complete");
                        return Ok(());
                    }
                    Some(path @ ("response" | "turn.start" | "audio.metadata" | "turn.end")) => {
                        return Err(Error::UnexpectedResponse(format!(
                            "'{path}' frame out of order"
                        )));
                    }
                    Some(other) => {
                        return Err(Error::UnknownResponse(format!(
                            "unrecognized path '{other}'"
                        )));
                    }
                    None => {
                        return Err(Error::UnexpectedResponse(
                            "text frame without a Path header".to_string(),
                        ));
                    }
                }
            }
            Message::Binary(raw) => {
                if state != DriverState::Streaming {
                    return Err(Error::UnexpectedResponse(
                        "binary frame before the turn started".to_string(),
                    ));
                }
                if let Some(data) = audio_payload(&raw)? {
                    audio_received = true;
                    forward(records, OutputRecord::Audio(AudioChunk { data })).await?;
                }
            }
            Message::Close(_) => {
                return Err(Error::WebSocket(
                    "service closed the connection before the turn ended".to_string(),
                ));
            }
            // Ping/pong keepalives are handled by the transport.
            _ => {}
        }
    }
}

async fn send_config(channel: &mut ServiceChannel) -> Result<()> {
    let body = json!({
        "context": {
            "synthesis": {
                "audio": {
                    "metadataoptions": {
                        "sentenceBoundaryEnabled": false,
                        "wordBoundaryEnabled": true,
                    },
                    "outputFormat": OUTPUT_FORMAT,
                }
            }
        }
    });
    let frame = encode_text(
        &[
            ("Content-Type", "application/json; charset=utf-8"),
            ("Path", "speech.config"),
        ],
        &body.to_string(),
    );
    channel.send_text(frame).await
}

async fn send_markup(
    channel: &mut ServiceChannel,
    markup: &MarkupBuilder,
    chunk: &[u8],
) -> Result<()> {
    // The chunker keeps cuts on character boundaries whenever the text
    // allows it; a chunk that still fails here would reach the service
    // as garbled speech, so refuse it instead.
    let text = std::str::from_utf8(chunk).map_err(|_| Error::Config {
        field: "text",
        message: "chunk does not end on a character boundary; a single character exceeds \
                  the message byte budget"
            .to_string(),
    })?;
    let request_id = Uuid::new_v4().simple().to_string();
    let message = markup.framed(&request_id, &js_date_string(), &markup.build(text));
    channel.send_text(message).await
}

/// Validate an audio frame and extract its payload, if any.
///
/// The final frame of a turn carries no content type and no payload;
/// any other combination of the two is a protocol violation.
fn audio_payload(raw: &[u8]) -> Result<Option<Vec<u8>>> {
    let frame = decode_binary(raw)?;
    match frame.path() {
        Some("audio") => {}
        Some(other) => {
            return Err(Error::UnknownResponse(format!(
                "unrecognized binary path '{other}'"
            )))
        }
        None => {
            return Err(Error::UnexpectedResponse(
                "binary frame without a Path header".to_string(),
            ))
        }
    }
    match (frame.content_type(), frame.body.is_empty()) {
        (Some("audio/mpeg"), false) => Ok(Some(frame.body)),
        (None, true) => Ok(None),
        (Some("audio/mpeg"), true) => Err(Error::UnexpectedResponse(
            "audio frame with a content type but no payload".to_string(),
        )),
        (None, false) => Err(Error::UnexpectedResponse(
            "audio payload without a content type".to_string(),
        )),
        (Some(other), _) => Err(Error::UnexpectedResponse(format!(
            "unrecognized audio content type '{other}'"
        ))),
    }
}

async fn forward(
    records: &mpsc::Sender<Result<OutputRecord>>,
    record: OutputRecord,
) -> Result<()> {
    records
        .send(Ok(record))
        .await
        .map_err(|_| Error::WebSocket("output stream dropped by consumer".to_string()))
}

#[derive(Debug, Deserialize)]
struct MetadataEnvelope {
    #[serde(rename = "Metadata", default)]
    entries: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Data")]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WordBoundaryData {
    #[serde(rename = "Offset")]
    offset: u64,
    #[serde(rename = "Duration")]
    duration: u64,
    #[serde(rename = "text")]
    text: WordBoundaryText,
}

#[derive(Debug, Deserialize)]
struct WordBoundaryText {
    #[serde(rename = "Text")]
    text: String,
}

/// Parse a metadata frame body into job-timeline word boundaries.
fn parse_metadata(body: &str, timeline: &mut Timeline) -> Result<Vec<WordBoundary>> {
    let envelope: MetadataEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::UnexpectedResponse(format!("malformed metadata frame: {e}")))?;

    let mut boundaries = Vec::new();
    for entry in envelope.entries {
        match entry.kind.as_str() {
            "WordBoundary" => {
                let value = entry.data.ok_or_else(|| {
                    Error::UnexpectedResponse("word boundary without data".to_string())
                })?;
                let data: WordBoundaryData = serde_json::from_value(value).map_err(|e| {
                    Error::UnexpectedResponse(format!("malformed word boundary: {e}"))
                })?;
                boundaries.push(timeline.place(data.offset, data.duration, data.text.text));
            }
            "SessionEnd" => continue,
            other => {
                return Err(Error::UnknownResponse(format!(
                    "unrecognized metadata type '{other}'"
                )))
            }
        }
    }
    Ok(boundaries)
}
