//! Runtime configuration for oss-gateway.
//!
//! Configuration is read once from the process environment (optionally seeded
//! from a `.env` file) and shared immutably as `Arc<Config>`.

use std::path::PathBuf;
use std::time::Duration;

use axum::http::HeaderName;
use clap::Parser;
use tracing::warn;

/// Default backend endpoint (local Ollama, OpenAI-compatible).
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Placeholder credential. OpenAI-compatible backends expect a bearer
/// token even when they do not check it.
pub const DEFAULT_BACKEND_API_KEY: &str = "ollama";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gpt-oss:20b";

/// Default header carrying the shared secret.
pub const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// System prompt used by the PDF endpoints when the caller sends none.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "너는 대본을 분석하는 연출자야. 주인공의 감정선을 분석해줘.";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "oss-gateway", about = "Authenticated gateway for a local LLM endpoint")]
pub struct Cli {
    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub listen: String,

    /// Path to a dotenv file. Defaults to `.env` in the working directory.
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret expected in the auth header. `None` means the server
    /// is misconfigured and every protected request fails.
    pub api_key: Option<String>,

    /// Name of the header carrying the shared secret.
    pub api_key_header: String,

    /// Model used when a request does not name one.
    pub default_model: String,

    /// System prompt used by the PDF endpoints when none is supplied.
    pub default_system_prompt: String,

    /// Maximum accepted request body, in bytes.
    pub max_upload_bytes: usize,

    /// Upstream backend settings.
    pub backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_upload_bytes: 32 * 1024 * 1024, // 32 MiB
            backend: BackendConfig::default(),
        }
    }
}

/// Upstream inference backend settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the OpenAI-compatible API, including the `/v1` suffix.
    pub base_url: String,

    /// Bearer credential sent to the backend.
    pub api_key: String,

    /// Overall deadline for one backend request, streaming included.
    pub request_timeout_secs: u64,

    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: DEFAULT_BACKEND_API_KEY.to_string(),
            request_timeout_secs: 300,
            connect_timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Reads the dotenv file first (if any) without overriding variables that
    /// are already set.
    pub fn load(env_file: Option<&std::path::Path>) -> anyhow::Result<Self> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path)?;
            }
            None => {
                if let Err(e) = dotenvy::dotenv() {
                    if !e.not_found() {
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unset or empty values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        Self {
            api_key: get("APP_API_KEY"),
            api_key_header: get("API_KEY_HEADER_NAME")
                .and_then(|h| header_name_or_warn(&h))
                .unwrap_or(defaults.api_key_header),
            default_model: get("OLLAMA_MODEL").unwrap_or(defaults.default_model),
            default_system_prompt: get("DEFAULT_SYSTEM_PROMPT")
                .unwrap_or(defaults.default_system_prompt),
            max_upload_bytes: parse_or(
                "MAX_UPLOAD_BYTES",
                get("MAX_UPLOAD_BYTES"),
                defaults.max_upload_bytes,
            ),
            backend: BackendConfig {
                base_url: get("OLLAMA_BASE_URL").unwrap_or(defaults.backend.base_url),
                api_key: get("OLLAMA_API_KEY").unwrap_or(defaults.backend.api_key),
                request_timeout_secs: parse_or(
                    "REQUEST_TIMEOUT_SECS",
                    get("REQUEST_TIMEOUT_SECS"),
                    defaults.backend.request_timeout_secs,
                ),
                connect_timeout_secs: parse_or(
                    "CONNECT_TIMEOUT_SECS",
                    get("CONNECT_TIMEOUT_SECS"),
                    defaults.backend.connect_timeout_secs,
                ),
            },
        }
    }

    /// Resolve the model for a request: the explicit value, or the default.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => self.default_model.clone(),
        }
    }
}

/// Normalize a configured header name, or `None` if it can never match a
/// request header.
fn header_name_or_warn(raw: &str) -> Option<String> {
    match HeaderName::from_bytes(raw.trim().as_bytes()) {
        Ok(name) => Some(name.as_str().to_string()),
        Err(_) => {
            warn!(
                key = "API_KEY_HEADER_NAME",
                value = raw,
                fallback = DEFAULT_API_KEY_HEADER,
                "Invalid header name, using default"
            );
            None
        }
    }
}

fn parse_or<T: std::str::FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Unparseable configuration value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.api_key_header, "x-api-key");
        assert_eq!(cfg.default_model, "gpt-oss:20b");
        assert_eq!(cfg.backend.base_url, "http://localhost:11434/v1");
        assert_eq!(cfg.backend.api_key, "ollama");
        assert_eq!(cfg.backend.request_timeout_secs, 300);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("APP_API_KEY", "s3cret"),
            ("API_KEY_HEADER_NAME", "X-Gateway-Key"),
            ("OLLAMA_BASE_URL", "http://gpu-box:8080/v1"),
            ("OLLAMA_MODEL", "llama3:8b"),
            ("REQUEST_TIMEOUT_SECS", "42"),
        ]));
        assert_eq!(cfg.api_key.as_deref(), Some("s3cret"));
        assert_eq!(cfg.api_key_header, "x-gateway-key");
        assert_eq!(cfg.backend.base_url, "http://gpu-box:8080/v1");
        assert_eq!(cfg.default_model, "llama3:8b");
        assert_eq!(cfg.backend.request_timeout(), Duration::from_secs(42));
    }

    #[test]
    fn test_empty_secret_is_unset() {
        let cfg = Config::from_lookup(lookup(&[("APP_API_KEY", "  ")]));
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn test_bad_number_falls_back() {
        let cfg = Config::from_lookup(lookup(&[("MAX_UPLOAD_BYTES", "lots")]));
        assert_eq!(cfg.max_upload_bytes, 32 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_header_name_falls_back() {
        let cfg = Config::from_lookup(lookup(&[("API_KEY_HEADER_NAME", "x api key")]));
        assert_eq!(cfg.api_key_header, "x-api-key");

        let cfg = Config::from_lookup(lookup(&[("API_KEY_HEADER_NAME", "X-Key:")]));
        assert_eq!(cfg.api_key_header, "x-api-key");

        let cfg = Config::from_lookup(lookup(&[("API_KEY_HEADER_NAME", " X-Team-Token ")]));
        assert_eq!(cfg.api_key_header, "x-team-token");
    }

    #[test]
    fn test_resolve_model() {
        let cfg = Config::default();
        assert_eq!(cfg.resolve_model(None), "gpt-oss:20b");
        assert_eq!(cfg.resolve_model(Some("")), "gpt-oss:20b");
        assert_eq!(cfg.resolve_model(Some("qwen3:4b")), "qwen3:4b");
    }
}
