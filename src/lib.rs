//! oss-gateway: authenticated HTTP gateway for a local LLM endpoint.
//!
//! Accepts chat requests and PDF uploads, forwards them to an
//! OpenAI-compatible backend and relays the answer either as one JSON payload
//! or as a plain-text stream of fragments. The relay prefers the `/responses`
//! protocol and falls back to `/chat/completions` while no output has been
//! produced yet.

pub mod config;
pub mod error;
pub mod pdf;
pub mod relay;
pub mod server;
