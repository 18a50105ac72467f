//! Host-local message-forwarding agent.
//!
//! Accepts JSON messages from co-resident applications over a local stream
//! socket and forwards them, in adaptively sized batches, to a remote HTTP
//! ingest API. A single bearer credential is shared across all upstream
//! calls so individual local clients need not authenticate.
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod batch;
pub mod client;
pub mod config;
pub mod dirs;
pub mod egress;
pub mod ingress;
pub mod metrics;
pub mod queue;
pub mod supervisor;

pub use config::Config;
pub use supervisor::run;

/// Maximum number of tags accepted on a [`Context`] before a message is rejected.
pub const MAX_TAGS: usize = 10;

/// The value carried over the wire for "no messages pending" poll replies.
pub const NO_CONTENT_REPLY: &[u8] = b"204";

/// Optional substructure accompanying a [`Message`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Context {
    /// Ordered tags, at most [`MAX_TAGS`] long.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether a `publish` should be served synchronously.
    #[serde(default)]
    pub wait: bool,
    /// Optional named entity the message is associated with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Poll result limit. Dynamically typed on the wire: present-and-integer,
    /// present-and-not-an-integer, or absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<serde_json::Value>,
}

impl Context {
    /// Resolves `limit` for a `msg_check` request: absent defaults to 1,
    /// present-and-integral is used as-is, anything else is invalid.
    pub fn resolved_limit(&self) -> Result<i64, LimitError> {
        match &self.limit {
            None => Ok(1),
            Some(serde_json::Value::Number(n)) => n.as_i64().ok_or(LimitError),
            Some(_) => Err(LimitError),
        }
    }
}

/// `context.limit` was present but not an integer.
#[derive(Debug, Clone, Copy)]
pub struct LimitError;

/// The recognized dispatch discriminants for a [`Message`].
///
/// `msg_type` itself decodes as a plain string: a *missing* field is a
/// decode error (malformed JSON, per §4.G.3 of the protocol), but a
/// *present, unrecognized* string decodes successfully into a [`Message`]
/// and is only rejected at dispatch time with an "Unknown message type"
/// reply (§4.G.2) — the two failure modes are surfaced differently on the
/// wire, so they can't be collapsed into one `serde` enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Fire-and-forget (or synchronous, if `context.wait`) publish.
    Publish,
    /// Poll for pending downstream messages.
    MsgCheck,
    /// Publish destined for an alternate upstream target.
    ///
    /// Enumerated in the protocol but, per the upstream service, behaves
    /// identically to [`MessageKind::Publish`] today; `dest` is carried
    /// through unread so a future upstream distinction does not require a
    /// wire-format change.
    DestPublish,
}

impl MessageKind {
    fn parse(raw: &str) -> Option<MessageKind> {
        match raw {
            "publish" => Some(MessageKind::Publish),
            "msg_check" => Some(MessageKind::MsgCheck),
            "dest_publish" => Some(MessageKind::DestPublish),
            _ => None,
        }
    }
}

/// Uniform message shape moving through ingress, the queue, and egress.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Optional context (tags, wait, entity, limit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    /// Dispatch discriminant, required on ingress. Carried as a raw string
    /// so an unrecognized value can still decode and be rejected at
    /// dispatch time rather than at JSON-decode time; see [`MessageKind`].
    pub msg_type: String,
    /// Alternate destination, meaningful only alongside `dest_publish`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    /// Client-supplied timestamp, carried through unvalidated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Message {
    /// Number of tags on this message's context, or 0 if no context is set.
    pub fn tag_count(&self) -> usize {
        self.context.as_ref().map(|c| c.tags.len()).unwrap_or(0)
    }

    /// Whether this message requests synchronous delivery.
    pub fn wants_wait(&self) -> bool {
        self.context.as_ref().map(|c| c.wait).unwrap_or(false)
    }

    /// Parses `msg_type` into a [`MessageKind`], or `None` for an
    /// unrecognized value.
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::parse(&self.msg_type)
    }
}

/// Reply envelope written back on the local socket for failures.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    /// Always the literal `"error"` for the replies this type models.
    pub status: String,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseEnvelope {
    /// Builds an error envelope with the given detail message.
    pub fn error(message: impl Into<String>) -> Self {
        ResponseEnvelope {
            status: "error".into(),
            message: Some(message.into()),
        }
    }
}

/// Errors surfaced across the agent. Transport/parse failures wrap their
/// source; local validation and lifecycle failures carry a detail string.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure to parse or encode JSON.
    #[error("JSON error: {0}")]
    Json(
        #[from]
        #[source]
        serde_json::Error,
    ),

    /// Transport-level failure calling the upstream HTTP API.
    #[error("upstream request failed: {0}")]
    Upstream(
        #[from]
        #[source]
        reqwest::Error,
    ),

    /// Upstream responded with an unexpected status code.
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),

    /// Local filesystem I/O failure (socket bind, directory provisioning).
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        std::io::Error,
    ),

    /// Configuration is missing a required value or contains an invalid one.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connection handler attempted an operation not valid for the
    /// message it received (unknown type, bad tag count, invalid limit).
    #[error("validation error: {0}")]
    Validation(String),

    /// The message queue has been closed and can no longer accept offers.
    #[error("queue is closed")]
    QueueClosed,
}
