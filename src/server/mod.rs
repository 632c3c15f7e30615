//! HTTP surface of the gateway.
//!
//! - [`routes`]: Router, shared state and request handlers
//! - [`auth`]: Shared-secret guard run before every handler
//! - [`streaming`]: Fragment stream to chunked plain-text body

pub mod auth;
pub mod routes;
pub mod streaming;
