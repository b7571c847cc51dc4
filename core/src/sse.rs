//! Server-sent events decoding.
//!
//! `SseDecoder` is an incremental, push-style parser: feed it body chunks as
//! they arrive and it returns each event completed by a blank line. Chunk
//! boundaries may fall anywhere, including inside a UTF-8 sequence or between
//! the `\r` and `\n` of a CRLF.
//!
//! `EventStream` wraps a transport byte stream with a decoder.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::transport::ByteStream;

const DEFAULT_EVENT: &str = "message";

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// Event type, `"message"` when the server sent no `event:` field.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Last event id seen on the stream, carried over between events.
    pub id: Option<String>,
    /// Reconnection delay in milliseconds, if this event set one.
    pub retry: Option<u64>,
}

impl ServerEvent {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.data).map_err(|e| ApiError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    after_cr: bool,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if self.after_cr {
                self.after_cr = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\r' | b'\n' => {
                    self.after_cr = byte == b'\r';
                    let line = String::from_utf8_lossy(&self.line).into_owned();
                    self.line.clear();
                    if let Some(event) = self.process_line(&line) {
                        events.push(event);
                    }
                }
                _ => self.line.push(byte),
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(millis) = value.parse() {
                    self.retry = Some(millis);
                }
            }
            _ => {}
        }
        None
    }

    /// Blocks without any `data:` line reset the type and dispatch nothing.
    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();
        let retry = self.retry.take();
        if self.data.is_empty() {
            return None;
        }
        Some(ServerEvent {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.last_id.clone(),
            retry,
        })
    }
}

/// Stream of decoded events. Ends when the server closes the body; an
/// unterminated trailing event is discarded.
pub struct EventStream {
    inner: BoxStream<'static, Result<ServerEvent, ApiError>>,
}

impl EventStream {
    pub fn new(body: ByteStream) -> Self {
        let state = Some((body, SseDecoder::new(), VecDeque::new()));
        let inner = stream::unfold(state, |state| async move {
            let (mut body, mut decoder, mut queued) = state?;
            loop {
                if let Some(event) = queued.pop_front() {
                    return Some((Ok(event), Some((body, decoder, queued))));
                }
                match body.next().await {
                    Some(Ok(chunk)) => queued.extend(decoder.feed(&chunk)),
                    Some(Err(err)) => return Some((Err(ApiError::transport(err)), None)),
                    None => return None,
                }
            }
        });
        Self { inner: inner.boxed() }
    }
}

impl Stream for EventStream {
    type Item = Result<ServerEvent, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::TryStreamExt;

    use super::*;
    use crate::error::TransportError;

    #[test]
    fn parses_typed_event_with_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: progress\ndata: {\"a\":1,\ndata: \"b\":2}\nid: 7\n\n");
        assert_eq!(
            events,
            vec![ServerEvent {
                event: "progress".to_string(),
                data: "{\"a\":1,\n\"b\":2}".to_string(),
                id: Some("7".to_string()),
                retry: None,
            }]
        );
    }

    #[test]
    fn default_type_is_message_and_comments_are_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\ndata: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn chunk_boundaries_are_invisible() {
        let raw = "event: tick\r\ndata: caf\u{e9}\r\n\r\ndata: two\r\n\r\n".as_bytes();
        let mut whole = SseDecoder::new();
        let expected = whole.feed(raw);
        assert_eq!(expected.len(), 2);

        let mut split = SseDecoder::new();
        let mut got = Vec::new();
        for byte in raw {
            got.extend(split.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(got, expected);
        assert_eq!(got[0].data, "caf\u{e9}");
    }

    #[test]
    fn block_without_data_dispatches_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: ping\n\n").is_empty());
        let events = decoder.feed(b"data: x\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn id_persists_and_retry_is_per_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"id: 1\nretry: 1500\ndata: a\n\ndata: b\n\nretry: soon\ndata: c\n\n");
        assert_eq!(events[0].retry, Some(1500));
        assert_eq!(events[1].id.as_deref(), Some("1"));
        assert_eq!(events[1].retry, None);
        assert_eq!(events[2].retry, None);
    }

    #[test]
    fn event_payload_decodes_as_json() {
        #[derive(serde::Deserialize)]
        struct Progress {
            progress: u8,
        }
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"progress\": 50}\n\n");
        assert_eq!(events[0].json::<Progress>().unwrap().progress, 50);
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: nope\n\n");
        assert!(matches!(events[0].json::<Progress>(), Err(ApiError::Deserialization(_))));
    }

    #[tokio::test]
    async fn event_stream_reads_until_body_ends() {
        let chunks: Vec<Result<Bytes, TransportError>> = vec![
            Ok(Bytes::from_static(b"data: one\n")),
            Ok(Bytes::from_static(b"\ndata: two\n\ndata: partial")),
        ];
        let events: Vec<ServerEvent> = EventStream::new(stream::iter(chunks).boxed())
            .try_collect()
            .await
            .unwrap();
        let data: Vec<&str> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, ["one", "two"]);
    }

    #[tokio::test]
    async fn transport_error_ends_the_stream() {
        let chunks: Vec<Result<Bytes, TransportError>> = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err(TransportError::new("connection reset")),
            Ok(Bytes::from_static(b"data: never\n\n")),
        ];
        let items: Vec<_> = EventStream::new(stream::iter(chunks).boxed()).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ApiError::Transport { .. })));
    }
}
