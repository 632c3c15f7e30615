//! Upstream relay to the OpenAI-compatible backend.
//!
//! - [`client`]: Backend client factory and raw protocol calls
//! - [`completion`]: Protocol preference/fallback for single-shot and streaming
//! - [`protocol`]: Wire types for `/responses` and `/chat/completions`
//! - [`sse`]: Incremental SSE decoding

pub mod client;
pub mod completion;
pub mod protocol;
pub mod sse;

pub use client::{BackendClient, BackendClientFactory};
pub use completion::{Completion, CompletionRelay, CompletionRequest, FragmentStream, Protocol};
pub use protocol::{Message, Role};
