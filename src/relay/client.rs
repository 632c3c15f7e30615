//! Backend client factory and raw protocol calls.
//!
//! [`BackendClientFactory`] is built once at startup and owns the pooled
//! `reqwest::Client`; [`BackendClient`] handles are created per request and
//! never touch the network until used.

use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::RelayError;
use crate::relay::protocol::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Message,
    ResponseStreamEvent, ResponsesRequest, ResponsesResponse, StreamSignal,
};
use crate::relay::sse::data_stream;

/// Lazily produced text fragments from one open upstream session.
pub type FragmentSource = BoxStream<'static, Result<String, RelayError>>;

/// Builds per-request backend handles from process-wide settings.
#[derive(Debug, Clone)]
pub struct BackendClientFactory {
    http: Client,
    config: BackendConfig,
}

impl BackendClientFactory {
    /// Create the factory. Only TLS/resolver setup can fail here; no network
    /// traffic happens.
    pub fn new(config: &BackendConfig) -> Result<Self, RelayError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    /// Hand out a configured client for one request.
    pub fn create(&self) -> BackendClient {
        BackendClient {
            http: self.http.clone(),
            base_url: self.config.base_url.trim_end_matches('/').to_string(),
            api_key: self.config.api_key.clone(),
        }
    }
}

/// Handle to the OpenAI-compatible backend for a single request.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl BackendClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<Response, RelayError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url, "Calling backend");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Single-shot `/responses` call. `EmptyOutput` when no text came back.
    pub async fn responses(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f32,
    ) -> Result<String, RelayError> {
        let request = ResponsesRequest {
            model,
            input: messages,
            temperature,
            stream: false,
        };
        let response = self.post("/responses", &request).await?;
        let bytes = response.bytes().await?;
        let parsed: ResponsesResponse =
            serde_json::from_slice(&bytes).map_err(|e| RelayError::Decode(e.to_string()))?;
        parsed.text().ok_or(RelayError::EmptyOutput)
    }

    /// Single-shot `/chat/completions` call; first choice's content.
    pub async fn chat_completion(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f32,
    ) -> Result<String, RelayError> {
        let request = ChatCompletionRequest {
            model,
            messages,
            temperature,
            stream: false,
        };
        let response = self.post("/chat/completions", &request).await?;
        let bytes = response.bytes().await?;
        let parsed: ChatCompletionResponse =
            serde_json::from_slice(&bytes).map_err(|e| RelayError::Decode(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| RelayError::Decode("response has no choices".to_string()))
    }

    /// Open a streaming `/responses` session.
    ///
    /// Yields non-empty `response.output_text.delta` payloads. A failure event
    /// is surfaced as `StreamFailed` and ends the source.
    pub async fn open_responses_stream(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f32,
    ) -> Result<FragmentSource, RelayError> {
        let request = ResponsesRequest {
            model,
            input: messages,
            temperature,
            stream: true,
        };
        let response = self.post("/responses", &request).await?;

        let fragments = data_stream(response.bytes_stream())
            .try_filter_map(|data| {
                let signal = match serde_json::from_str::<ResponseStreamEvent>(&data) {
                    Ok(event) => event.signal(),
                    Err(_) => StreamSignal::Ignore,
                };
                future::ready(match signal {
                    StreamSignal::Delta(text) => Ok(Some(text)),
                    StreamSignal::Failed(reason) => Err(RelayError::StreamFailed(reason)),
                    StreamSignal::Ignore => Ok(None),
                })
            })
            .scan(false, |failed, item| {
                // Stop after the first error.
                if *failed {
                    return future::ready(None);
                }
                *failed = item.is_err();
                future::ready(Some(item))
            });

        Ok(fragments.boxed())
    }

    /// Open a streaming `/chat/completions` session.
    ///
    /// Yields each chunk's first-choice content. Chunks that fail to parse are
    /// skipped; `[DONE]` ends the source.
    pub async fn open_chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f32,
    ) -> Result<FragmentSource, RelayError> {
        let request = ChatCompletionRequest {
            model,
            messages,
            temperature,
            stream: true,
        };
        let response = self.post("/chat/completions", &request).await?;

        let fragments = data_stream(response.bytes_stream())
            .take_while(|item| future::ready(!matches!(item, Ok(data) if data.trim() == "[DONE]")))
            .try_filter_map(|data| {
                let fragment = match serde_json::from_str::<ChatCompletionChunk>(&data) {
                    Ok(chunk) => chunk.into_fragment(),
                    Err(e) => {
                        debug!(error = %e, "Skipping malformed chat chunk");
                        None
                    }
                };
                future::ready(Ok(fragment))
            });

        Ok(fragments.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_trims_base_url() {
        let config = BackendConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..BackendConfig::default()
        };
        let factory = BackendClientFactory::new(&config).unwrap();
        assert_eq!(factory.create().base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn test_factory_does_not_contact_backend() {
        let config = BackendConfig {
            base_url: "http://127.0.0.1:1/v1".to_string(),
            ..BackendConfig::default()
        };
        let factory = BackendClientFactory::new(&config).unwrap();
        let _a = factory.create();
        let _b = factory.create();
    }
}
