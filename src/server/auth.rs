//! Shared-secret authentication.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use subtle::{Choice, ConstantTimeEq};
use tracing::{error, warn};

use crate::config::Config;
use crate::error::GatewayError;
use crate::server::routes::AppState;

/// Middleware: reject the request unless the configured header carries the
/// shared secret.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if let Err(e) = verify_api_key(&state.config, req.headers()) {
        if matches!(e, GatewayError::Unauthorized) {
            warn!(path = %req.uri().path(), "Unauthorized request");
        }
        return Err(e);
    }
    Ok(next.run(req).await)
}

/// Check the auth header against the configured secret.
pub fn verify_api_key(config: &Config, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(expected) = config.api_key.as_deref() else {
        error!("APP_API_KEY is not set; refusing all protected requests");
        return Err(GatewayError::Config(
            "Server API key not configured".to_string(),
        ));
    };

    match headers.get(config.api_key_header.as_str()) {
        Some(provided) if secrets_match(provided.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(GatewayError::Unauthorized),
    }
}

/// Constant-time comparison. Running time depends only on the length of the
/// expected secret, never on the provided value or where it differs.
fn secrets_match(provided: &[u8], expected: &[u8]) -> bool {
    let same_len = (provided.len() as u64).ct_eq(&(expected.len() as u64));
    let mut same_bytes = Choice::from(1u8);
    for (i, want) in expected.iter().enumerate() {
        let got = provided.get(i).copied().unwrap_or(0);
        same_bytes &= got.ct_eq(want);
    }
    (same_len & same_bytes).into()
}
