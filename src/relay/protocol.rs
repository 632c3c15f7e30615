//! Wire types for the two upstream protocols.
//!
//! Field names follow the OpenAI API exactly so that any compatible server
//! (Ollama, llama-server, vLLM) interoperates.

use serde::{Deserialize, Serialize};

// ─── Shared ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// ─── Responses protocol (preferred) ────────────────────────────────────────

/// `POST /responses` body.
#[derive(Debug, Serialize)]
pub struct ResponsesRequest<'a> {
    pub model: &'a str,
    pub input: &'a [Message],
    pub temperature: f32,
    pub stream: bool,
}

/// Non-streaming `/responses` result. Only the parts carrying text are read.
#[derive(Debug, Default, Deserialize)]
pub struct ResponsesResponse {
    /// Convenience aggregate some servers include.
    #[serde(default)]
    pub output_text: Option<String>,

    #[serde(default)]
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub content: Vec<OutputContent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputContent {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub text: Option<String>,
}

impl ResponsesResponse {
    /// Extract the generated text, or `None` when there is none.
    ///
    /// Prefers the `output_text` aggregate and otherwise concatenates every
    /// `output_text` content part of every message item.
    pub fn text(&self) -> Option<String> {
        if let Some(text) = self.output_text.as_deref().filter(|t| !t.is_empty()) {
            return Some(text.to_string());
        }

        let text: String = self
            .output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .filter_map(|part| part.text.as_deref())
            .collect();

        (!text.is_empty()).then_some(text)
    }
}

/// One server-sent event of a streaming `/responses` call.
#[derive(Debug, Deserialize)]
pub struct ResponseStreamEvent {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub delta: Option<String>,

    /// Present on `error` events.
    #[serde(default)]
    pub message: Option<String>,
}

/// What a streaming event means to the relay.
#[derive(Debug, PartialEq)]
pub enum StreamSignal {
    /// Non-empty output text increment.
    Delta(String),
    /// The backend reported a failure.
    Failed(String),
    /// Anything else (lifecycle events, reasoning, empty deltas).
    Ignore,
}

impl ResponseStreamEvent {
    pub const OUTPUT_TEXT_DELTA: &'static str = "response.output_text.delta";

    pub fn signal(self) -> StreamSignal {
        match self.kind.as_str() {
            Self::OUTPUT_TEXT_DELTA => match self.delta {
                Some(delta) if !delta.is_empty() => StreamSignal::Delta(delta),
                _ => StreamSignal::Ignore,
            },
            "error" | "response.failed" => StreamSignal::Failed(
                self.message
                    .unwrap_or_else(|| format!("{} event received", self.kind)),
            ),
            _ => StreamSignal::Ignore,
        }
    }
}

// ─── Chat completions protocol (legacy) ────────────────────────────────────

/// `POST /chat/completions` body.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Streaming chat completion chunk.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// First choice's non-empty content increment, if any.
    pub fn into_fragment(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::system("be brief")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be brief"}"#);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let parsed: Result<Message, _> =
            serde_json::from_str(r#"{"role":"tool","content":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_responses_request_shape() {
        let messages = vec![Message::user("hi")];
        let req = ResponsesRequest {
            model: "gpt-oss:20b",
            input: &messages,
            temperature: 0.2,
            stream: false,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["model"], "gpt-oss:20b");
        assert_eq!(value["input"][0]["role"], "user");
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_responses_text_from_output_items() {
        let body = r#"{
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "content": [{"type": "reasoning_text", "text": "hmm"}]},
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "Hello"},
                    {"type": "output_text", "text": " there"}
                ]}
            ]
        }"#;
        let resp: ResponsesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.text().as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_responses_text_prefers_aggregate() {
        let body = r#"{"output_text": "direct", "output": []}"#;
        let resp: ResponsesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.text().as_deref(), Some("direct"));
    }

    #[test]
    fn test_responses_text_empty() {
        let resp: ResponsesResponse = serde_json::from_str(r#"{"output": []}"#).unwrap();
        assert_eq!(resp.text(), None);
    }

    #[test]
    fn test_stream_event_signals() {
        let delta: ResponseStreamEvent = serde_json::from_str(
            r#"{"type":"response.output_text.delta","item_id":"m1","delta":"Hel"}"#,
        )
        .unwrap();
        assert_eq!(delta.signal(), StreamSignal::Delta("Hel".into()));

        let empty: ResponseStreamEvent =
            serde_json::from_str(r#"{"type":"response.output_text.delta","delta":""}"#).unwrap();
        assert_eq!(empty.signal(), StreamSignal::Ignore);

        let created: ResponseStreamEvent =
            serde_json::from_str(r#"{"type":"response.created","response":{}}"#).unwrap();
        assert_eq!(created.signal(), StreamSignal::Ignore);

        let failed: ResponseStreamEvent =
            serde_json::from_str(r#"{"type":"error","message":"model crashed"}"#).unwrap();
        assert_eq!(failed.signal(), StreamSignal::Failed("model crashed".into()));
    }

    #[test]
    fn test_chunk_fragment() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.into_fragment().as_deref(), Some("lo"));

        let role_only: ChatCompletionChunk = serde_json::from_str(
            r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#,
        )
        .unwrap();
        assert_eq!(role_only.into_fragment(), None);

        let no_choices: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[],"usage":{"total_tokens":3}}"#).unwrap();
        assert_eq!(no_choices.into_fragment(), None);
    }
}
