//! Stream a short utterance and print the records as they arrive.

use readaloud_client::{OutputRecord, SpeechConfig, SynthesisJob};
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> readaloud_client::Result<()> {
    tracing_subscriber::fmt::init();

    let config = SpeechConfig::new("en-US-AriaNeural")?;
    let job = SynthesisJob::new("Hello from the read-aloud service!", config)
        .on_word_boundary(|word| println!("word @{:>6}ms  {}", word.offset_ms(), word.text));

    let mut stream = job.stream();
    let mut audio_bytes = 0usize;
    while let Some(record) = stream.next().await {
        if let OutputRecord::Audio(chunk) = record? {
            audio_bytes += chunk.data.len();
        }
    }
    println!("received {audio_bytes} bytes of audio");
    Ok(())
}
