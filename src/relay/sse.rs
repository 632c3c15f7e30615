//! Incremental Server-Sent Events decoding.
//!
//! Network chunks do not respect line boundaries, so bytes are buffered until
//! a full line is available. Only `data:` payloads are surfaced; `event:`,
//! `id:` and comment lines are dropped since both upstream protocols repeat
//! the event kind inside the JSON payload.

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::RelayError;

/// Line-buffering SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the network.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) {
        if !self.buf.is_empty() && !self.buf.ends_with(b"\n") {
            self.buf.extend_from_slice(b"\n");
        }
    }

    /// Pop the next complete `data:` payload, if one is buffered.
    pub fn next_data(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos);
            self.buf.advance(1);
            if line.ends_with(b"\r") {
                line.truncate(line.len() - 1);
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.strip_prefix(' ').unwrap_or(data);
                return Some(data.to_string());
            }
        }
        None
    }
}

struct DecodeState {
    inner: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    decoder: SseDecoder,
    eof: bool,
    failed: bool,
}

/// Turn a response byte stream into a stream of SSE `data:` payloads.
///
/// A transport error is yielded once and ends the stream.
pub fn data_stream<S>(bytes: S) -> BoxStream<'static, Result<String, RelayError>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let state = DecodeState {
        inner: bytes.boxed(),
        decoder: SseDecoder::new(),
        eof: false,
        failed: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.failed {
            return None;
        }
        loop {
            if let Some(data) = st.decoder.next_data() {
                return Some((Ok(data), st));
            }
            if st.eof {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => st.decoder.push(&chunk),
                Some(Err(e)) => {
                    st.failed = true;
                    return Some((Err(RelayError::Transport(e)), st));
                }
                None => {
                    st.decoder.finish();
                    st.eof = true;
                }
            }
        }
    })
    .boxed()
}
