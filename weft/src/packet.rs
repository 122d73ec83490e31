//! Packet model: the logical wire message.
//!
//! A [`Packet`] is one fabric-level message: a route id, a target id, a
//! wire data kind, optional decoded operation metadata, optional meta text,
//! and a body. Packets are produced by the codec on decode or by builders
//! on the send side, and are consumed exactly once by a handler.

use bytes::Bytes;
use serde_json::Value;

use crate::op::Op;

/// Wire data kind: the symbol byte immediately after the first tab.
///
/// The kind selects how the body segment is interpreted. The split kinds
/// mark one chunk of an oversized body travelling under a shared
/// correlation token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketKind {
    /// Plain data body (text over the text variant, raw bytes otherwise).
    Data,
    /// One chunk of a split data body.
    SplitData,
    /// JSON body.
    Json,
    /// One chunk of a split JSON body.
    SplitJson,
    /// Legacy alias: decodes like [`PacketKind::Data`] with a
    /// base64-encoded body. Kept for cross-version compatibility, and used
    /// on encode when a byte body must travel over the text variant.
    LegacyBase64,
}

impl PacketKind {
    /// Wire symbol for this kind.
    pub const fn symbol(self) -> u8 {
        match self {
            PacketKind::Data => b'=',
            PacketKind::SplitData => b'?',
            PacketKind::Json => b'@',
            PacketKind::SplitJson => b'#',
            PacketKind::LegacyBase64 => b'%',
        }
    }

    /// Look up a kind from its wire symbol.
    pub const fn from_symbol(symbol: u8) -> Option<Self> {
        match symbol {
            b'=' => Some(PacketKind::Data),
            b'?' => Some(PacketKind::SplitData),
            b'@' => Some(PacketKind::Json),
            b'#' => Some(PacketKind::SplitJson),
            b'%' => Some(PacketKind::LegacyBase64),
            _ => None,
        }
    }

    /// Whether this kind marks one chunk of a split body.
    pub const fn is_split(self) -> bool {
        matches!(self, PacketKind::SplitData | PacketKind::SplitJson)
    }

    /// The split counterpart of a plain kind (identity for split kinds).
    pub const fn split_variant(self) -> Self {
        match self {
            PacketKind::Json | PacketKind::SplitJson => PacketKind::SplitJson,
            _ => PacketKind::SplitData,
        }
    }

    /// The plain counterpart of a split kind (identity for plain kinds).
    pub const fn plain_variant(self) -> Self {
        match self {
            PacketKind::SplitJson => PacketKind::Json,
            PacketKind::SplitData => PacketKind::Data,
            other => other,
        }
    }
}

/// A packet body.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// No body.
    Empty,
    /// Textual body.
    Text(String),
    /// JSON body.
    Json(Value),
    /// Raw byte body.
    Bytes(Bytes),
}

impl Body {
    /// JSON-encoding heuristic for the encode side: true when the body is
    /// absent or neither length-bearing binary nor already textual, i.e.
    /// it should travel under the JSON kind.
    pub fn is_json(&self) -> bool {
        matches!(self, Body::Empty | Body::Json(_))
    }

    /// Serialized length in bytes, as the splitter measures it.
    pub fn wire_len(&self) -> usize {
        match self {
            Body::Empty => 0,
            Body::Text(text) => text.len(),
            Body::Json(value) => value.to_string().len(),
            Body::Bytes(bytes) => bytes.len(),
        }
    }

    /// Build a JSON body from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error when the value cannot be
    /// represented as JSON.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Body::Json(serde_json::to_value(value)?))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

/// One fabric-level message.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    /// Destination route id. The empty id is reserved for the
    /// peer-handshake targets.
    pub id_route: String,
    /// Destination target id within the route.
    pub id_target: String,
    /// Wire data kind.
    pub kind: PacketKind,
    /// Decoded operation metadata, when the meta text carried an op header.
    pub op: Option<Op>,
    /// Caller meta text (op header fields already stripped on decode).
    pub meta: Option<String>,
    /// The body.
    pub body: Body,
}

impl Packet {
    /// Build a packet addressed to `(id_route, id_target)`, picking the
    /// plain data kind from the body via [`Body::is_json`].
    pub fn to(id_route: impl Into<String>, id_target: impl Into<String>, body: Body) -> Self {
        let kind = if body.is_json() {
            PacketKind::Json
        } else {
            PacketKind::Data
        };
        Self {
            id_route: id_route.into(),
            id_target: id_target.into(),
            kind,
            op: None,
            meta: None,
            body,
        }
    }

    /// Attach caller meta text.
    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }

    /// Attach operation metadata.
    pub fn with_op(mut self, op: Op) -> Self {
        self.op = Some(op);
        self
    }

    /// Override the wire kind (used by the splitter for chunk packets).
    pub fn with_kind(mut self, kind: PacketKind) -> Self {
        self.kind = kind;
        self
    }

    /// The packet's correlation key: the op's token or message id.
    pub fn correlation_key(&self) -> Option<&crate::types::Token> {
        let op = self.op.as_ref()?;
        op.token.as_ref().or(op.msgid.as_ref())
    }
}
