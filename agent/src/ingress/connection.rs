//! Connection Handler: decodes a stream of JSON messages off one accepted
//! connection, validates, and dispatches by `msg_type`.
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::client::UpstreamClient;
use crate::queue::MessageQueue;
use crate::{Error, Message, MessageKind, ResponseEnvelope, MAX_TAGS, NO_CONTENT_REPLY};

/// Owns `stream` for its whole lifetime: decodes a whitespace-tolerant
/// stream of JSON objects, validates and dispatches each one, and writes
/// replies back on the same connection. Returns once the peer closes the
/// connection, an I/O error occurs, or `shutdown` fires mid-read.
pub async fn handle(
    stream: UnixStream,
    queue: Arc<MessageQueue>,
    upstream: UpstreamClient,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), Error> {
    let (read_half, mut write_half) = stream.into_split();
    let reader = BufReader::new(read_half);

    // A std-side sync reader bridges `serde_json::Deserializer`'s
    // iterator-based streaming decode (which is not itself async) onto the
    // tokio connection; messages are decoded one at a time so the loop can
    // still observe shutdown between them via `tokio::select!` on reads.
    let mut framed = FramedMessages::new(reader);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("connection handler observed shutdown");
                return Ok(());
            }

            next = framed.next_message() => {
                match next {
                    Ok(Some(message)) => {
                        if let Some(reply) = dispatch(message, &queue, &upstream).await {
                            write_half.write_all(&reply).await?;
                        }
                    }
                    Ok(None) => return Ok(()),
                    Err(DecodeError::Json(e)) => {
                        warn!(error = %e, "malformed JSON on ingress, continuing");
                    }
                    Err(DecodeError::Io(e)) => return Err(e.into()),
                }
            }
        }
    }
}

/// Validates and routes a single decoded [`Message`], returning the bytes
/// to write back on the connection, if any. `msg_check` and waited
/// `publish` always reply; fire-and-forget `publish`/`dest_publish` never
/// do.
async fn dispatch(
    message: Message,
    queue: &MessageQueue,
    upstream: &UpstreamClient,
) -> Option<Vec<u8>> {
    if message.tag_count() > MAX_TAGS {
        let envelope = ResponseEnvelope::error(format!(
            "too many tags provided; maximum is {MAX_TAGS}"
        ));
        return Some(encode(&envelope));
    }

    match message.kind() {
        Some(MessageKind::MsgCheck) => {
            let limit = match message
                .context
                .as_ref()
                .map(|c| c.resolved_limit())
                .unwrap_or(Ok(1))
            {
                Ok(limit) => limit,
                Err(_) => {
                    let envelope = ResponseEnvelope::error("invalid limit");
                    return Some(encode(&envelope));
                }
            };

            match upstream.poll(limit).await {
                Ok(messages) if messages.is_empty() => Some(NO_CONTENT_REPLY.to_vec()),
                Ok(messages) => Some(encode(&messages)),
                Err(e) => Some(encode(&ResponseEnvelope::error(e.to_string()))),
            }
        }

        Some(MessageKind::Publish) | Some(MessageKind::DestPublish) => {
            if message.wants_wait() {
                let result = upstream.post_single(&message).await;
                Some(encode(&result))
            } else {
                match queue.offer(message).await {
                    Ok(()) => None,
                    Err(_) => Some(encode(&ResponseEnvelope::error("queue is closed"))),
                }
            }
        }

        None => Some(encode(&ResponseEnvelope::error("Unknown message type"))),
    }
}

fn encode(value: &impl serde::Serialize) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|_| {
        encode_fallback_error()
    })
}

fn encode_fallback_error() -> Vec<u8> {
    br#"{"status":"error","message":"failed to encode response"}"#.to_vec()
}

enum DecodeError {
    Json(serde_json::Error),
    Io(std::io::Error),
}

/// Incremental decoder over a stream of whitespace-separated JSON objects.
/// Reads are buffered and chunked rather than line-delimited, since clients
/// may embed newlines inside a single JSON value.
struct FramedMessages<R> {
    reader: R,
    buffer: Vec<u8>,
    scanned: usize,
}

impl<R: tokio::io::AsyncRead + Unpin> FramedMessages<R> {
    fn new(reader: R) -> Self {
        FramedMessages {
            reader,
            buffer: Vec::new(),
            scanned: 0,
        }
    }

    /// Returns the next decoded [`Message`], `Ok(None)` on clean
    /// end-of-stream, or a [`DecodeError`] otherwise. A malformed value is
    /// reported without discarding the rest of the buffered stream state
    /// on the next well-formed value's own read.
    async fn next_message(&mut self) -> Result<Option<Message>, DecodeError> {
        use tokio::io::AsyncReadExt;

        loop {
            if let Some((value, consumed)) = try_decode(&self.buffer[self.scanned..]) {
                self.scanned += consumed;
                return match value {
                    Ok(message) => Ok(Some(message)),
                    Err(e) => Err(DecodeError::Json(e)),
                };
            }

            if self.scanned > 0 {
                self.buffer.drain(0..self.scanned);
                self.scanned = 0;
            }

            let mut chunk = [0u8; 4096];
            let read = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(DecodeError::Io)?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Attempts to decode one JSON value from the front of `input`, skipping
/// leading whitespace. Returns `None` if more bytes are needed.
fn try_decode(input: &[u8]) -> Option<(Result<Message, serde_json::Error>, usize)> {
    let first_non_ws = input.iter().position(|b| !b.is_ascii_whitespace())?;
    let mut stream = serde_json::Deserializer::from_slice(&input[first_non_ws..]).into_iter::<Message>();
    match stream.next() {
        Some(result) => {
            let consumed = first_non_ws + stream.byte_offset();
            Some((result, consumed))
        }
        None => None,
    }
}
