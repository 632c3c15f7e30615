//! HTTP routes.
//!
//! All endpoints sit behind the shared-secret guard:
//! - GET /health
//! - POST /chat
//! - POST /chat-stream
//! - POST /analyze-pdf
//! - POST /analyze-pdf-stream

use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::config::{Config, DEFAULT_TEMPERATURE};
use crate::error::{GatewayError, RelayError, Result};
use crate::pdf::{self, PdfExtractor};
use crate::relay::{
    BackendClientFactory, Completion, CompletionRelay, CompletionRequest, Message,
};
use crate::server::auth::require_api_key;
use crate::server::streaming::fragment_response;

/// Response header naming the upstream protocol that served the request.
pub const PROTOCOL_HEADER: &str = "x-relay-protocol";

/// Accepted sampling temperature range.
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

/// Application state shared across handlers. Read-only after startup.
pub struct AppState {
    pub config: Arc<Config>,
    pub backends: BackendClientFactory,
    pub pdf: Arc<dyn PdfExtractor>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        pdf: Arc<dyn PdfExtractor>,
    ) -> std::result::Result<Self, RelayError> {
        let backends = BackendClientFactory::new(&config.backend)?;
        Ok(Self {
            config,
            backends,
            pdf,
        })
    }

    /// Relay bound to a fresh backend handle.
    fn relay(&self) -> CompletionRelay {
        CompletionRelay::new(self.backends.create())
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/chat-stream", post(chat_stream))
        .route("/analyze-pdf", post(analyze_pdf))
        .route("/analyze-pdf-stream", post(analyze_pdf_stream))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Body of `/chat` and `/chat-stream`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    fn into_completion(self, config: &Config) -> Result<CompletionRequest> {
        if self.messages.is_empty() {
            return Err(GatewayError::Validation(
                "messages must not be empty".to_string(),
            ));
        }
        Ok(CompletionRequest {
            model: config.resolve_model(self.model.as_deref()),
            temperature: validate_temperature(self.temperature)?,
            messages: self.messages,
        })
    }
}

/// Optional PDF analysis parameters (query string or multipart fields).
#[derive(Debug, Default, Deserialize)]
pub struct PdfParams {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
}

impl PdfParams {
    /// Fill fields missing here from `fallback`.
    fn or(self, fallback: PdfParams) -> PdfParams {
        PdfParams {
            model: self.model.or(fallback.model),
            system_prompt: self.system_prompt.or(fallback.system_prompt),
            temperature: self.temperature.or(fallback.temperature),
        }
    }
}

/// Body of `/chat` and `/analyze-pdf` responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// JSON extractor that reports malformed bodies as [`GatewayError`].
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidJson(value)),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                Err(GatewayError::PayloadTooLarge)
            }
            Err(rejection) => Err(GatewayError::Validation(rejection.body_text())),
        }
    }
}

fn validate_temperature(temperature: Option<f32>) -> Result<f32> {
    let temperature = temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if TEMPERATURE_RANGE.contains(&temperature) {
        Ok(temperature)
    } else {
        Err(GatewayError::Validation(format!(
            "temperature must be between {} and {}",
            TEMPERATURE_RANGE.start(),
            TEMPERATURE_RANGE.end()
        )))
    }
}

fn request_span(endpoint: &'static str) -> Span {
    info_span!("request", request_id = %Uuid::new_v4(), endpoint)
}

fn completion_response(completion: Completion) -> Response {
    (
        [(PROTOCOL_HEADER, completion.protocol.as_str())],
        Json(ChatResponse {
            content: completion.content,
            model: completion.model,
        }),
    )
        .into_response()
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn chat(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<ChatRequest>,
) -> Result<Response> {
    async move {
        let request = req.into_completion(&state.config)?;
        info!(
            model = request.model,
            messages = request.messages.len(),
            "Chat request"
        );

        let completion = state.relay().complete(&request).await?;
        Ok::<_, GatewayError>(completion_response(completion))
    }
    .instrument(request_span("chat"))
    .await
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<ChatRequest>,
) -> Result<Response> {
    async move {
        let request = req.into_completion(&state.config)?;
        info!(
            model = request.model,
            messages = request.messages.len(),
            "Chat stream request"
        );

        let fragments = state.relay().stream(request).await?;
        Ok::<_, GatewayError>(fragment_response(fragments))
    }
    .instrument(request_span("chat-stream"))
    .await
}

async fn analyze_pdf(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<PdfParams>, QueryRejection>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    async move {
        let request = pdf_completion_request(&state, query, multipart).await?;
        let completion = state.relay().complete(&request).await?;
        Ok::<_, GatewayError>(completion_response(completion))
    }
    .instrument(request_span("analyze-pdf"))
    .await
}

async fn analyze_pdf_stream(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<PdfParams>, QueryRejection>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    async move {
        let request = pdf_completion_request(&state, query, multipart).await?;
        let fragments = state.relay().stream(request).await?;
        Ok::<_, GatewayError>(fragment_response(fragments))
    }
    .instrument(request_span("analyze-pdf-stream"))
    .await
}

// ─── PDF upload handling ───────────────────────────────────────────────────

/// Turn an upload into the two-message conversation
/// `[system prompt, extracted text]`.
async fn pdf_completion_request(
    state: &AppState,
    query: std::result::Result<Query<PdfParams>, QueryRejection>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<CompletionRequest> {
    let Query(query) = query.map_err(|e| GatewayError::Validation(e.body_text()))?;
    let multipart = multipart.map_err(|e| GatewayError::Validation(e.body_text()))?;

    let (data, form) = read_pdf_upload(multipart).await?;
    let params = form.or(query);

    let temperature = validate_temperature(params.temperature)?;
    let model = state.config.resolve_model(params.model.as_deref());
    let system_prompt = params
        .system_prompt
        .unwrap_or_else(|| state.config.default_system_prompt.clone());

    let text = pdf::extract_text(state.pdf.as_ref(), &data)
        .await
        .map_err(|e| GatewayError::Validation(format!("Invalid PDF: {e}")))?;

    info!(
        model,
        bytes = data.len(),
        chars = text.chars().count(),
        "PDF extracted"
    );

    Ok(CompletionRequest {
        messages: vec![Message::system(system_prompt), Message::user(text)],
        model,
        temperature,
    })
}

/// Read the `file` part and the optional text fields of the form.
async fn read_pdf_upload(mut multipart: Multipart) -> Result<(Bytes, PdfParams)> {
    let mut file = None;
    let mut params = PdfParams::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => file = Some(field.bytes().await.map_err(multipart_error)?),
            "model" => params.model = Some(field.text().await.map_err(multipart_error)?),
            "system_prompt" => {
                params.system_prompt = Some(field.text().await.map_err(multipart_error)?)
            }
            "temperature" => {
                let raw = field.text().await.map_err(multipart_error)?;
                let value = raw.trim().parse::<f32>().map_err(|_| {
                    GatewayError::Validation(format!("temperature is not a number: {raw}"))
                })?;
                params.temperature = Some(value);
            }
            _ => {}
        }
    }

    let file =
        file.ok_or_else(|| GatewayError::Validation("missing form field `file`".to_string()))?;
    Ok((file, params))
}

fn multipart_error(err: MultipartError) -> GatewayError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge
    } else {
        GatewayError::Validation(err.body_text())
    }
}
