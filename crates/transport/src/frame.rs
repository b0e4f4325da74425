//! Wire frame codec
//!
//! The service speaks a framed protocol over the message channel. Text
//! frames carry CRLF-separated `Key:Value` header lines, a blank line,
//! then a text body. Binary frames carry a two-byte big-endian header
//! length, that many bytes of header text, then the binary body.

use std::collections::HashMap;

use readaloud_core::time::js_date_string;
use readaloud_core::{Error, Result};

/// Decoded text frame
#[derive(Debug, Clone)]
pub struct TextFrame {
    /// Case-sensitive header map
    pub headers: HashMap<String, String>,
    /// Text body
    pub body: String,
}

impl TextFrame {
    /// The `Path` header, when present.
    pub fn path(&self) -> Option<&str> {
        self.headers.get("Path").map(String::as_str)
    }
}

/// Decoded binary frame
#[derive(Debug, Clone)]
pub struct BinaryFrame {
    /// Case-sensitive header map
    pub headers: HashMap<String, String>,
    /// Binary body
    pub body: Vec<u8>,
}

impl BinaryFrame {
    /// The `Path` header, when present.
    pub fn path(&self) -> Option<&str> {
        self.headers.get("Path").map(String::as_str)
    }

    /// The `Content-Type` header, when present.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type").map(String::as_str)
    }
}

/// Encode an outbound text frame.
///
/// A fresh `X-Timestamp` header always leads, followed by the supplied
/// headers, a blank line, and the body.
pub fn encode_text(headers: &[(&str, &str)], body: &str) -> String {
    let mut frame = format!("X-Timestamp:{}\r\n", js_date_string());
    for (key, value) in headers {
        frame.push_str(key);
        frame.push(':');
        frame.push_str(value);
        frame.push_str("\r\n");
    }
    frame.push_str("\r\n");
    frame.push_str(body);
    frame
}

/// Encode a binary frame.
///
/// The client never sends binary frames; this is the inverse of
/// [`decode_binary`] for tests and tooling.
pub fn encode_binary(headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut head = String::new();
    for (key, value) in headers {
        head.push_str(key);
        head.push(':');
        head.push_str(value);
        head.push_str("\r\n");
    }
    let mut frame = Vec::with_capacity(2 + head.len() + body.len());
    frame.extend_from_slice(&(head.len() as u16).to_be_bytes());
    frame.extend_from_slice(head.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Decode an inbound text frame.
pub fn decode_text(data: &str) -> Result<TextFrame> {
    let Some(delimiter) = data.find("\r\n\r\n") else {
        return Err(Error::UnexpectedResponse(
            "text frame is missing the header delimiter".to_string(),
        ));
    };
    Ok(TextFrame {
        headers: parse_headers(&data[..delimiter])?,
        body: data[delimiter + 4..].to_string(),
    })
}

/// Decode an inbound binary frame.
pub fn decode_binary(data: &[u8]) -> Result<BinaryFrame> {
    if data.len() < 2 {
        return Err(Error::UnexpectedResponse(
            "binary frame is missing the header length".to_string(),
        ));
    }
    let header_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() < header_len + 2 {
        return Err(Error::UnexpectedResponse(
            "binary frame is shorter than its declared header length".to_string(),
        ));
    }
    let head = std::str::from_utf8(&data[2..2 + header_len]).map_err(|_| {
        Error::UnexpectedResponse("binary frame header is not valid UTF-8".to_string())
    })?;
    Ok(BinaryFrame {
        headers: parse_headers(head)?,
        body: data[2 + header_len..].to_vec(),
    })
}

/// Split a header block into a map, cutting each line at the first colon.
fn parse_headers(block: &str) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for line in block.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(Error::UnexpectedResponse(format!(
                "header line without a separator: '{line}'"
            )));
        };
        headers.insert(key.to_string(), value.to_string());
    }
    Ok(headers)
}
