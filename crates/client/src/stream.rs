//! Synthesis orchestration and the output stream
//!
//! Iterates the chunks of a job, opening one channel per chunk through
//! the reconnect policy, and forwards every record into a single ordered
//! stream. Dropping the stream cancels the job and releases the channel.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use readaloud_core::{Error, OutputRecord, Result};
use readaloud_text::{escape_text, remove_incompatible_characters, ByteChunks, MarkupBuilder};
use readaloud_transport::{
    adjust_from_server_date, ChannelConfig, RetryEvent, RetryPolicy, ServiceChannel,
};

use crate::session::{run_turn, Timeline};
use crate::{SynthesisJob, WordHook};

/// Records buffered between the producer task and the consumer.
const RECORD_BUFFER: usize = 100;

/// Ordered stream of synthesis output records.
///
/// Finite and once-consumable: the stream ends after the last chunk's
/// records, or with a single error item if the job fails. Dropping it
/// cancels the underlying job.
pub struct RecordStream {
    inner: ReceiverStream<Result<OutputRecord>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Stream for RecordStream {
    type Item = Result<OutputRecord>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Start the producer task for a job and hand back its output stream.
///
/// Must be called within a Tokio runtime.
pub(crate) fn spawn(job: SynthesisJob) -> RecordStream {
    let (tx, rx) = mpsc::channel(RECORD_BUFFER);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        if let Err(err) = run_job(job, tx.clone(), task_cancel).await {
            tracing::debug!(error = %err, "synthesis job failed");
            let _ = tx.send(Err(err)).await;
        }
    });
    RecordStream {
        inner: ReceiverStream::new(rx),
        cancel,
        task,
    }
}

/// Everything needed to synthesize one chunk over a fresh channel.
struct ChunkRunner {
    channel_config: ChannelConfig,
    retry: RetryPolicy,
    retry_events: Option<mpsc::Sender<RetryEvent>>,
    receive_timeout: Duration,
    markup: MarkupBuilder,
    word_hook: Option<WordHook>,
    records: mpsc::Sender<Result<OutputRecord>>,
    cancel: CancellationToken,
}

impl ChunkRunner {
    /// Open a channel through the reconnect policy and run one turn.
    ///
    /// The channel is closed on every exit path, success or failure.
    async fn run_chunk(&self, chunk: &[u8], timeline: &mut Timeline) -> Result<()> {
        let mut channel = self
            .retry
            .execute(&self.cancel, self.retry_events.as_ref(), || {
                ServiceChannel::open(&self.channel_config, self.receive_timeout)
            })
            .await?;

        let result = run_turn(
            &mut channel,
            &self.markup,
            chunk,
            timeline,
            &self.records,
            self.word_hook.as_ref(),
        )
        .await;
        channel.close().await;
        result
    }
}

async fn run_job(
    job: SynthesisJob,
    records: mpsc::Sender<Result<OutputRecord>>,
    cancel: CancellationToken,
) -> Result<()> {
    let SynthesisJob {
        text,
        config,
        options,
        word_hook,
        retry_events,
    } = job;

    let markup = MarkupBuilder::new(config);
    let processed = escape_text(&remove_incompatible_characters(&text));
    let budget = markup.max_payload_bytes();
    if budget == 0 {
        return Err(Error::Config {
            field: "voice",
            message: "configuration overhead leaves no room for text".to_string(),
        });
    }

    let runner = ChunkRunner {
        channel_config: ChannelConfig {
            endpoint: options.endpoint,
            connect_timeout_ms: options.connect_timeout_ms,
            proxy: options.proxy,
        },
        retry: options.retry,
        retry_events,
        receive_timeout: Duration::from_millis(options.receive_timeout_ms),
        markup,
        word_hook,
        records,
        cancel,
    };

    let mut timeline = Timeline::default();
    for chunk in ByteChunks::new(processed.as_bytes(), budget) {
        match runner.run_chunk(chunk, &mut timeline).await {
            Ok(()) => {}
            Err(Error::Drm { server_date, .. }) => {
                // One corrected reopen per chunk; a second rejection
                // propagates to the consumer.
                adjust_from_server_date(server_date.as_deref())?;
                tracing::info!("reopening channel with a corrected clock");
                runner.run_chunk(chunk, &mut timeline).await?;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}
