//! Wire Codecs
//!
//! [`WireCodec`] is implemented by [`TextCodec`] (canonical, delimiter
//! based) and [`BinaryCodec`] (compact, fixed-width). [`hydrate`] turns
//! whatever arrived on a connection into a [`Message`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use super::binary::BinaryCodec;
use super::protocol::{Message, MessageKind};
use super::text::TextCodec;

/// Decode failures. Inbound payloads that fail are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Zero-length payload
    #[error("empty payload")]
    Empty,
    /// Unrecognized text tag
    #[error("unknown text tag {0:?}")]
    UnknownTextTag(char),
    /// Unrecognized binary tag
    #[error("unknown binary tag {0}")]
    UnknownBinaryTag(u8),
    /// Wrong number of top-level or record fields
    #[error("{kind}: expected {expected} fields, found {found}")]
    FieldCount {
        /// Message or record being decoded
        kind: &'static str,
        /// Fields the layout requires
        expected: usize,
        /// Fields present
        found: usize,
    },
    /// Field could not be parsed
    #[error("{kind}: invalid {field}")]
    InvalidField {
        /// Message or record being decoded
        kind: &'static str,
        /// Offending field
        field: &'static str,
    },
    /// Bad `%XX` escape
    #[error("invalid escape sequence")]
    InvalidEscape,
    /// Payload is not UTF-8 where text was required
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// Binary payload ended early
    #[error("truncated payload")]
    Truncated,
    /// Binary payload has bytes past the message
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
}

/// An inbound or outbound payload.
pub enum Payload {
    /// Text frame
    Text(String),
    /// Binary frame
    Bytes(Vec<u8>),
    /// Byte source resolved asynchronously
    Blob(BlobFuture),
}

/// Asynchronous byte source. Resolves to `None` when the source failed.
pub type BlobFuture = Pin<Box<dyn Future<Output = Option<Vec<u8>>> + Send>>;

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Payload::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Payload::Blob(_) => f.write_str("Blob(..)"),
        }
    }
}

impl Payload {
    /// Wrap a future resolving to bytes.
    pub fn blob<F>(future: F) -> Self
    where
        F: Future<Output = Option<Vec<u8>>> + Send + 'static,
    {
        Payload::Blob(Box::pin(future))
    }

    /// Byte length, unknown for blobs.
    pub fn len(&self) -> Option<usize> {
        match self {
            Payload::Text(s) => Some(s.len()),
            Payload::Bytes(b) => Some(b.len()),
            Payload::Blob(_) => None,
        }
    }

    /// True for a zero-length text or byte payload.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Copy a text or byte payload. Blobs cannot be copied.
    pub fn try_clone(&self) -> Option<Payload> {
        match self {
            Payload::Text(s) => Some(Payload::Text(s.clone())),
            Payload::Bytes(b) => Some(Payload::Bytes(b.clone())),
            Payload::Blob(_) => None,
        }
    }
}

/// A codec for the message set.
pub trait WireCodec: Send + Sync {
    /// Which wire format this is.
    fn format(&self) -> WireFormat;

    /// Encode. Never fails; oversize strings and lists are truncated.
    fn encode(&self, message: &Message) -> Payload;

    /// Decode one message.
    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError>;
}

/// Outbound wire format selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Delimited text
    #[default]
    Text,
    /// Fixed-width binary
    Binary,
}

impl WireFormat {
    /// The codec for this format.
    pub fn codec(self) -> &'static dyn WireCodec {
        match self {
            WireFormat::Text => &TextCodec,
            WireFormat::Binary => &BinaryCodec,
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(WireFormat::Text),
            "binary" => Ok(WireFormat::Binary),
            other => Err(format!("unknown wire format {other:?}")),
        }
    }
}

/// Outcome of normalizing an inbound payload.
pub enum Hydrated {
    /// Decoded now
    Ready(Message),
    /// Bytes not available yet; re-enter dispatch once the future resolves
    Deferred(BlobFuture),
    /// Undecodable, drop it
    Dropped(CodecError),
}

impl fmt::Debug for Hydrated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hydrated::Ready(m) => f.debug_tuple("Ready").field(&m.kind()).finish(),
            Hydrated::Deferred(_) => f.write_str("Deferred(..)"),
            Hydrated::Dropped(e) => f.debug_tuple("Dropped").field(e).finish(),
        }
    }
}

/// Normalize any inbound payload into a message.
pub fn hydrate(payload: Payload) -> Hydrated {
    let decoded = match payload {
        Payload::Text(text) => TextCodec.decode(text.as_bytes()),
        Payload::Bytes(bytes) => BinaryCodec.decode(&bytes),
        Payload::Blob(future) => return Hydrated::Deferred(future),
    };
    match decoded {
        Ok(message) => Hydrated::Ready(message),
        Err(e) => Hydrated::Dropped(e),
    }
}

/// Decode a binary message and re-encode it in canonical text form.
pub fn binary_to_text(bytes: &[u8]) -> Result<String, CodecError> {
    let message = BinaryCodec.decode(bytes)?;
    Ok(TextCodec.encode_string(&message))
}

/// Decode a text message and re-encode it in binary form.
pub fn text_to_binary(text: &str) -> Result<Vec<u8>, CodecError> {
    let message = TextCodec.decode(text.as_bytes())?;
    Ok(BinaryCodec.encode_bytes(&message))
}

/// Kind of a raw payload without decoding it fully.
pub fn peek_kind(payload: &Payload) -> Option<MessageKind> {
    match payload {
        Payload::Text(s) => s.chars().next().and_then(MessageKind::from_text_tag),
        Payload::Bytes(b) => b.first().copied().and_then(MessageKind::from_binary_tag),
        Payload::Blob(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_ping_pong_to_text() {
        let ping = BinaryCodec.encode_bytes(&Message::Ping { timestamp: 123_456 });
        assert_eq!(binary_to_text(&ping).unwrap(), "Q,123456");

        let pong = BinaryCodec.encode_bytes(&Message::Pong { timestamp: 123_456 });
        assert_eq!(binary_to_text(&pong).unwrap(), "q,123456");
    }

    #[test]
    fn test_hydrate_routes_by_payload_type() {
        match hydrate(Payload::Text("Q,7".into())) {
            Hydrated::Ready(Message::Ping { timestamp }) => assert_eq!(timestamp, 7),
            other => panic!("unexpected {other:?}"),
        }

        let bytes = BinaryCodec.encode_bytes(&Message::Pong { timestamp: 9 });
        assert!(matches!(hydrate(Payload::Bytes(bytes)), Hydrated::Ready(Message::Pong { timestamp: 9 })));
    }

    #[test]
    fn test_hydrate_drops_garbage() {
        assert!(matches!(hydrate(Payload::Text(String::new())), Hydrated::Dropped(CodecError::Empty)));
        assert!(matches!(hydrate(Payload::Bytes(vec![200, 1, 2])), Hydrated::Dropped(_)));
    }

    #[test]
    fn test_error_messages_carry_context() {
        let count = CodecError::FieldCount { kind: "ping", expected: 1, found: 3 };
        assert_eq!(count.to_string(), "ping: expected 1 fields, found 3");
        let field = CodecError::InvalidField { kind: "delta", field: "seq" };
        assert_eq!(field.to_string(), "delta: invalid seq");
    }

    #[test]
    fn test_hydrate_defers_blobs() {
        let payload = Payload::blob(async { Some(vec![4, 0, 0, 0, 0]) });
        assert!(matches!(hydrate(payload), Hydrated::Deferred(_)));
    }

    #[test]
    fn test_text_to_binary() {
        let bytes = text_to_binary("Q,123456").unwrap();
        assert_eq!(bytes[0], MessageKind::Ping.binary_tag());
        assert_eq!(&bytes[1..], &123_456u32.to_le_bytes());
    }

    #[test]
    fn test_wire_format_parse() {
        assert_eq!("Binary".parse::<WireFormat>(), Ok(WireFormat::Binary));
        assert!("json".parse::<WireFormat>().is_err());
        assert_eq!(WireFormat::Binary.codec().format(), WireFormat::Binary);
    }

    #[test]
    fn test_peek_kind() {
        assert_eq!(peek_kind(&Payload::Text("D,1".into())), Some(MessageKind::Delta));
        assert_eq!(peek_kind(&Payload::Bytes(vec![3])), Some(MessageKind::Input));
    }
}
