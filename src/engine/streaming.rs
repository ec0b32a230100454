//! Async completion streaming over a tokio channel.
//!
//! Generation is blocking work, so it runs on the blocking pool and hands
//! fragments to the async side in order. Dropping the receiver stops the
//! worker at its next send.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tracing::debug;

use super::completion::{collect_stream, Prompt};
use super::config::GenerationConfig;
use super::error::CompletionError;
use super::handle::ModelHandle;
use super::output::CompletionResult;

/// One streamed item.
pub type StreamItem = Result<CompletionResult, CompletionError>;

/// Async stream of completion fragments.
pub struct CompletionReceiver {
    receiver: mpsc::Receiver<StreamItem>,
}

impl CompletionReceiver {
    /// Create a new stream with sender/receiver pair.
    pub fn new(buffer_size: usize) -> (CompletionSender, Self) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        (CompletionSender { sender }, Self { receiver })
    }

    /// Receive the next fragment, if available.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.receiver.recv().await
    }

    /// Drain the stream into one buffered result.
    pub async fn collect(mut self) -> Result<CompletionResult, CompletionError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            let failed = item.is_err();
            items.push(item);
            if failed {
                break;
            }
        }
        collect_stream(items)
    }
}

impl futures::Stream for CompletionReceiver {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Sender half for pushing fragments to a stream.
pub struct CompletionSender {
    sender: mpsc::Sender<StreamItem>,
}

impl CompletionSender {
    /// Send from a blocking thread. Fails once the receiver is gone.
    pub fn blocking_send(&self, item: StreamItem) -> Result<(), StreamSendError> {
        self.sender.blocking_send(item).map_err(|_| StreamSendError)
    }

    /// Send from async code.
    pub async fn send(&self, item: StreamItem) -> Result<(), StreamSendError> {
        self.sender.send(item).await.map_err(|_| StreamSendError)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug)]
pub struct StreamSendError;

impl std::fmt::Display for StreamSendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream closed")
    }
}

impl std::error::Error for StreamSendError {}

/// Run a streamed completion on the blocking pool.
///
/// Must be called from within a tokio runtime. Setup errors (busy context,
/// invalid config) arrive as the only item of the stream.
pub fn spawn_completion(
    handle: Arc<ModelHandle>,
    prompt: impl Into<Prompt>,
    config: GenerationConfig,
    buffer_size: usize,
) -> CompletionReceiver {
    let prompt = prompt.into();
    let (sender, receiver) = CompletionReceiver::new(buffer_size);
    tokio::task::spawn_blocking(move || {
        let stream = match handle.create_completion_stream(&prompt, &config) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = sender.blocking_send(Err(e));
                return;
            }
        };
        for item in stream {
            if sender.blocking_send(item).is_err() {
                debug!("completion receiver dropped, stopping generation");
                break;
            }
        }
    });
    receiver
}
