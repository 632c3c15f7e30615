//! Completion relay: protocol preference, fallback and fragment delivery.
//!
//! Both modes try the `/responses` protocol first and fall back to
//! `/chat/completions`. For streaming, the protocol is settled while nothing
//! has been handed to the caller yet: the preferred session is polled until
//! its first fragment arrives, and only then is the stream returned. Once a
//! fragment has gone out, upstream failures are passed through instead of
//! triggering a fallback.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::error::RelayError;
use crate::relay::client::{BackendClient, FragmentSource};
use crate::relay::protocol::Message;

/// Channel depth between the backend reader and the HTTP body.
const FRAGMENT_CHANNEL_CAPACITY: usize = 32;

/// Upstream protocol that ended up serving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `/responses` (preferred).
    Responses,
    /// `/chat/completions` (legacy fallback).
    ChatCompletions,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Responses => "responses",
            Protocol::ChatCompletions => "chat-completions",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// Model actually sent upstream (already defaulted).
    pub model: String,
    pub temperature: f32,
}

/// Single-shot result.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub protocol: Protocol,
}

/// Live fragment sequence. Finite, consumed once.
///
/// Dropping it closes the channel; the producer task notices, stops reading
/// from the backend and drops the upstream connection.
#[derive(Debug)]
pub struct FragmentStream {
    pub model: String,
    pub protocol: Protocol,
    rx: mpsc::Receiver<Result<String, RelayError>>,
}

impl FragmentStream {
    /// Drain the stream into one string.
    pub async fn collect_text(mut self) -> Result<String, RelayError> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for FragmentStream {
    type Item = Result<String, RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Which session serves a stream, decided before any output exists.
enum Selected {
    /// The preferred session produced `first`; `rest` continues it.
    Preferred { first: String, rest: FragmentSource },
    /// The legacy session, opened after the preferred one was given up.
    Legacy(FragmentSource),
}

/// Relays completions to the backend with protocol fallback.
pub struct CompletionRelay {
    client: BackendClient,
}

impl CompletionRelay {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// Produce the full answer in one piece.
    ///
    /// One backend call when `/responses` works, two when it does not.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion, RelayError> {
        let CompletionRequest {
            messages,
            model,
            temperature,
        } = request;

        match self.client.responses(model, messages, *temperature).await {
            Ok(content) => {
                info!(model, protocol = %Protocol::Responses, "Completion served");
                return Ok(Completion {
                    content,
                    model: model.clone(),
                    protocol: Protocol::Responses,
                });
            }
            Err(e) => log_preferred_rejection(&e),
        }

        let content = self
            .client
            .chat_completion(model, messages, *temperature)
            .await
            .inspect_err(|e| error!(model, error = %e, "Fallback protocol failed"))?;

        info!(model, protocol = %Protocol::ChatCompletions, "Completion served");
        Ok(Completion {
            content,
            model: model.clone(),
            protocol: Protocol::ChatCompletions,
        })
    }

    /// Open a fragment stream.
    ///
    /// Returns once the serving protocol is fixed: either the preferred
    /// session has yielded its first fragment, or the legacy session is open.
    /// An error here means nothing was produced and the legacy protocol could
    /// not be opened either.
    pub async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, RelayError> {
        let selected = self.select(&request).await?;

        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let protocol = match selected {
            Selected::Preferred { first, rest } => {
                spawn_producer(Some(first), rest, tx);
                Protocol::Responses
            }
            Selected::Legacy(source) => {
                spawn_producer(None, source, tx);
                Protocol::ChatCompletions
            }
        };

        info!(model = request.model, %protocol, "Stream opened");
        Ok(FragmentStream {
            model: request.model,
            protocol,
            rx,
        })
    }

    async fn select(&self, request: &CompletionRequest) -> Result<Selected, RelayError> {
        let CompletionRequest {
            messages,
            model,
            temperature,
        } = request;

        let preferred = self
            .client
            .open_responses_stream(model, messages, *temperature)
            .await;

        // Nothing has been emitted yet, so any outcome short of a first
        // fragment still allows switching protocols.
        match preferred {
            Ok(mut source) => {
                let head = source.next().await;
                match head {
                    Some(Ok(first)) => return Ok(Selected::Preferred { first, rest: source }),
                    Some(Err(e)) => log_preferred_rejection(&e),
                    None => log_preferred_rejection(&RelayError::EmptyOutput),
                }
            }
            Err(e) => log_preferred_rejection(&e),
        }

        let source = self
            .client
            .open_chat_stream(model, messages, *temperature)
            .await
            .inspect_err(|e| error!(model, error = %e, "Fallback stream failed to open"))?;
        Ok(Selected::Legacy(source))
    }
}

/// Pump fragments from `source` into `tx` on a separate task.
fn spawn_producer(
    first: Option<String>,
    mut source: FragmentSource,
    tx: mpsc::Sender<Result<String, RelayError>>,
) {
    let task = async move {
        let mut emitted = 0usize;

        if let Some(first) = first {
            if tx.send(Ok(first)).await.is_err() {
                debug!("Consumer gone before first fragment");
                return;
            }
            emitted += 1;
        }

        loop {
            let item = tokio::select! {
                _ = tx.closed() => {
                    info!(fragments = emitted, "Client disconnected, abandoning backend stream");
                    return;
                }
                item = source.next() => item,
            };

            match item {
                Some(Ok(fragment)) => {
                    if tx.send(Ok(fragment)).await.is_err() {
                        info!(
                            fragments = emitted,
                            "Client disconnected, abandoning backend stream"
                        );
                        return;
                    }
                    emitted += 1;
                }
                Some(Err(e)) => {
                    error!(fragments = emitted, error = %e, "Backend stream failed after output");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                None => break,
            }
        }

        info!(fragments = emitted, "Stream complete");
    };

    tokio::spawn(task.instrument(Span::current()));
}

/// Log why the preferred protocol was abandoned. Behaviour is the same
/// either way; only the log level separates "not implemented" from
/// "something is wrong".
fn log_preferred_rejection(err: &RelayError) {
    if err.is_unsupported() {
        debug!(error = %err, "Responses protocol unsupported, falling back");
    } else {
        warn!(error = %err, "Responses protocol failed, falling back");
    }
}
