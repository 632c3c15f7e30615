//! Streaming response bodies.
//!
//! Fragments are written to a chunked `text/plain` body as they arrive.
//! Dropping the body (client disconnect) drops the [`FragmentStream`], which
//! stops the backend reader.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::StreamExt;

use crate::relay::FragmentStream;
use crate::server::routes::PROTOCOL_HEADER;

/// Build a streamed plain-text response from a fragment stream.
///
/// A backend failure after output has started cannot change the status any
/// more; it surfaces as an aborted body.
pub fn fragment_response(fragments: FragmentStream) -> Response {
    let protocol = HeaderValue::from_static(fragments.protocol.as_str());
    let body = Body::from_stream(
        fragments.map(|item| item.map(Bytes::from).map_err(std::io::Error::other)),
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .header(PROTOCOL_HEADER, protocol)
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
