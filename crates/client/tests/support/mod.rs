//! Scripted in-process stand-in for the synthesis service.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async, WebSocketStream};

use readaloud_transport::{encode_binary, encode_text};

/// What the mock does with one accepted connection.
#[allow(dead_code)] // each test exercises a subset of behaviors
pub enum Conn {
    /// Reject the upgrade with 403 and this `Date` header
    Reject { date: String },
    /// Accept TCP, then close without a websocket handshake
    SlamShut,
    /// Serve a full turn with the given (offset, duration, text) words
    Turn { words: Vec<(u64, u64, &'static str)> },
    /// Start the turn, then send an unknown metadata type
    UnknownMetadata,
    /// Serve a turn that ends without any audio frame
    NoAudio,
    /// Send `turn.start` without the leading `response` frame
    SkipResponse,
    /// Send an audio frame with a content type but no payload
    EmptyTypedAudio,
}

/// Spawn a mock service; each accepted connection consumes the next
/// scripted behavior. Returns a `ws://` endpoint for `JobOptions`.
pub async fn spawn(script: Vec<Conn>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        for conn in script {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            match conn {
                Conn::Reject { date } => reject(stream, date).await,
                Conn::SlamShut => drop(stream),
                Conn::Turn { words } => serve_turn(stream, words).await,
                Conn::UnknownMetadata => serve_unknown_metadata(stream).await,
                Conn::NoAudio => serve_no_audio(stream).await,
                Conn::SkipResponse => serve_skip_response(stream).await,
                Conn::EmptyTypedAudio => serve_empty_typed_audio(stream).await,
            }
        }
    });
    endpoint
}

type Ws = WebSocketStream<TcpStream>;

async fn reject(stream: TcpStream, date: String) {
    let callback = move |_request: &Request, _response: Response| {
        let rejection: ErrorResponse = tokio_tungstenite::tungstenite::http::Response::builder()
            .status(403)
            .header("Date", date)
            .body(None)
            .unwrap();
        Err(rejection)
    };
    let _ = accept_hdr_async(stream, callback).await;
}

async fn next_text(ws: &mut Ws) -> String {
    loop {
        match ws.next().await.expect("client hung up").expect("ws error") {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected inbound message: {other:?}"),
        }
    }
}

/// Read and sanity-check the config and markup messages.
async fn expect_request(ws: &mut Ws) {
    let config = next_text(ws).await;
    assert!(config.contains("Path:speech.config"), "got: {config}");
    assert!(config.contains("\"wordBoundaryEnabled\":true"));
    assert!(config.contains("audio-24khz-48kbitrate-mono-mp3"));

    let markup = next_text(ws).await;
    assert!(markup.contains("Path:ssml"), "got: {markup}");
    assert!(markup.contains("Content-Type:application/ssml+xml"));
    assert!(markup.contains("<speak"));
}

async fn send_text(ws: &mut Ws, headers: &[(&str, &str)], body: &str) {
    ws.send(Message::Text(encode_text(headers, body)))
        .await
        .unwrap();
}

async fn send_preamble(ws: &mut Ws) {
    send_text(ws, &[("Path", "response")], "{}").await;
    send_text(ws, &[("Path", "turn.start")], "{}").await;
}

fn metadata_frame(offset: u64, duration: u64, text: &str) -> String {
    json!({
        "Metadata": [{
            "Type": "WordBoundary",
            "Data": {
                "Offset": offset,
                "Duration": duration,
                "text": { "Text": text, "Length": text.len(), "BoundaryType": "WordBoundary" },
            }
        }]
    })
    .to_string()
}

async fn serve_turn(stream: TcpStream, words: Vec<(u64, u64, &'static str)>) {
    let mut ws = accept_async(stream).await.unwrap();
    expect_request(&mut ws).await;
    send_preamble(&mut ws).await;

    ws.send(Message::Binary(encode_binary(
        &[("Content-Type", "audio/mpeg"), ("Path", "audio")],
        b"\xff\xf3mock-mp3-frame",
    )))
    .await
    .unwrap();

    for (offset, duration, text) in words {
        send_text(
            &mut ws,
            &[
                ("Content-Type", "application/json; charset=utf-8"),
                ("Path", "audio.metadata"),
            ],
            &metadata_frame(offset, duration, text),
        )
        .await;
    }

    // Tail marker: no content type, no payload.
    ws.send(Message::Binary(encode_binary(&[("Path", "audio")], b"")))
        .await
        .unwrap();
    send_text(&mut ws, &[("Path", "turn.end")], "{}").await;
    let _ = ws.close(None).await;
}

async fn serve_unknown_metadata(stream: TcpStream) {
    let mut ws = accept_async(stream).await.unwrap();
    expect_request(&mut ws).await;
    send_preamble(&mut ws).await;
    let body = json!({ "Metadata": [{ "Type": "Xyz" }] }).to_string();
    send_text(
        &mut ws,
        &[
            ("Content-Type", "application/json; charset=utf-8"),
            ("Path", "audio.metadata"),
        ],
        &body,
    )
    .await;
    let _ = ws.close(None).await;
}

async fn serve_no_audio(stream: TcpStream) {
    let mut ws = accept_async(stream).await.unwrap();
    expect_request(&mut ws).await;
    send_preamble(&mut ws).await;
    send_text(&mut ws, &[("Path", "turn.end")], "{}").await;
    let _ = ws.close(None).await;
}

async fn serve_skip_response(stream: TcpStream) {
    let mut ws = accept_async(stream).await.unwrap();
    expect_request(&mut ws).await;
    send_text(&mut ws, &[("Path", "turn.start")], "{}").await;
    let _ = ws.close(None).await;
}

async fn serve_empty_typed_audio(stream: TcpStream) {
    let mut ws = accept_async(stream).await.unwrap();
    expect_request(&mut ws).await;
    send_preamble(&mut ws).await;
    ws.send(Message::Binary(encode_binary(
        &[("Content-Type", "audio/mpeg"), ("Path", "audio")],
        b"",
    )))
    .await
    .unwrap();
    let _ = ws.close(None).await;
}
