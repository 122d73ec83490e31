//! Wire format for packet serialization.
//!
//! One logical packet model, three interchangeable wire variants:
//!
//! - **Text**: `ID_ROUTE ID_TARGET\t<kind><meta>\t<body>`, body is text.
//! - **Binary**: identical layout; body is raw bytes after the second tab.
//! - **Length-prefixed binary**: `[length:2 LE][binary layout]`, where the
//!   length counts the whole frame including the prefix. Required framing
//!   over raw byte streams with no inherent message boundaries.
//!
//! The header segment before the first tab splits on a single space into
//! `[id_route, id_target]`. The byte after the first tab is the data-kind
//! symbol (`=` data, `?` split data, `@` JSON, `#` split JSON, plus the
//! legacy `%` base64 alias); the rest up to the second tab is the meta
//! text, whose leading bytes may form an op header (see [`crate::op`]).
//! Everything after the second tab is the body.
//!
//! Missing separator bytes are a hard decode error: the transport must
//! treat them as a framing violation.

pub mod split;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

use crate::op::{FrameTable, OpError};
use crate::packet::{Body, Packet, PacketKind};

/// Length-prefix size for [`WireFormat::LengthPrefixed`].
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest frame the length-prefixed variant can carry.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// The wire variant in use on a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WireFormat {
    /// Tab-separated text; bodies must be textual (byte bodies travel as
    /// the legacy base64 alias).
    Text,
    /// Same layout with a raw byte body.
    Binary,
    /// Binary layout behind a 2-byte little-endian total-length field.
    LengthPrefixed,
}

/// Wire format error types.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A required separator byte was absent (a framing violation).
    #[error("missing {which} separator")]
    MissingSeparator {
        /// Which separator was absent (`"first tab"`, `"second tab"`,
        /// `"header space"`).
        which: &'static str,
    },

    /// The segment between the tabs was empty (no kind symbol).
    #[error("missing data-kind symbol")]
    MissingKind,

    /// The kind symbol is not in the table.
    #[error("unknown data-kind symbol {symbol:?}")]
    UnknownKind {
        /// The unmatched symbol byte.
        symbol: u8,
    },

    /// A textual segment was not valid UTF-8.
    #[error("invalid utf-8 in {segment}")]
    InvalidUtf8 {
        /// Which segment failed (`"header"`, `"meta"`, `"body"`).
        segment: &'static str,
    },

    /// The body could not be decoded for its kind.
    #[error("body decode failed: {message}")]
    BodyDecode {
        /// Details from the underlying decoder.
        message: String,
    },

    /// The op header in the meta text was malformed.
    #[error(transparent)]
    Op(#[from] OpError),

    /// A route or target id contained whitespace.
    #[error("id {id:?} contains wire separators")]
    IdWhitespace {
        /// The offending id.
        id: String,
    },

    /// The meta text contained a tab byte.
    #[error("meta text contains a tab")]
    MetaTab,

    /// The body cannot travel over this wire variant.
    #[error("byte body unsupported over the text variant for kind {kind:?}")]
    BinaryBody {
        /// The packet kind that carried the byte body.
        kind: PacketKind,
    },

    /// Not enough data to parse the frame.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    Truncated {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Frame exceeds the length-prefixed maximum.
    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The invalid length value from the prefix.
        length: u16,
    },
}

fn check_id(id: &str) -> Result<(), WireError> {
    if id.contains(' ') || id.contains('\t') {
        return Err(WireError::IdWhitespace { id: id.to_string() });
    }
    Ok(())
}

/// Serialize the body for its kind; returns the bytes and the effective
/// kind (the text variant swaps byte-bodied data to the base64 alias).
fn encode_body(pkt: &Packet, format: WireFormat) -> Result<(Vec<u8>, PacketKind), WireError> {
    let kind = pkt.kind;
    match (&pkt.body, kind) {
        (Body::Empty, _) => Ok((Vec::new(), kind)),
        (Body::Json(value), _) => Ok((value.to_string().into_bytes(), kind)),
        (Body::Text(text), _) => Ok((text.clone().into_bytes(), kind)),
        (Body::Bytes(bytes), PacketKind::LegacyBase64) => {
            Ok((BASE64.encode(bytes).into_bytes(), kind))
        }
        (Body::Bytes(bytes), _) => match format {
            // Byte bodies cannot travel as text; whole data bodies fall
            // back to the legacy alias, split chunks have no such escape.
            WireFormat::Text if kind == PacketKind::Data => {
                Ok((BASE64.encode(bytes).into_bytes(), PacketKind::LegacyBase64))
            }
            WireFormat::Text => Err(WireError::BinaryBody { kind }),
            _ => Ok((bytes.to_vec(), kind)),
        },
    }
}

/// Encode a packet into one wire frame.
///
/// # Errors
///
/// Rejects ids containing separators, meta containing tabs, byte bodies
/// over the text variant (except whole data bodies, which travel as the
/// base64 alias), and frames exceeding the length-prefixed maximum.
pub fn encode(pkt: &Packet, format: WireFormat, frames: &FrameTable) -> Result<Vec<u8>, WireError> {
    check_id(&pkt.id_route)?;
    check_id(&pkt.id_target)?;

    let meta_text = match &pkt.op {
        Some(op) => frames.pack(op, pkt.meta.as_deref())?,
        None => pkt.meta.clone().unwrap_or_default(),
    };
    if meta_text.contains('\t') {
        return Err(WireError::MetaTab);
    }

    let (body, kind) = encode_body(pkt, format)?;

    let mut frame = Vec::with_capacity(
        pkt.id_route.len() + pkt.id_target.len() + meta_text.len() + body.len() + 4,
    );
    frame.extend_from_slice(pkt.id_route.as_bytes());
    frame.push(b' ');
    frame.extend_from_slice(pkt.id_target.as_bytes());
    frame.push(b'\t');
    frame.push(kind.symbol());
    frame.extend_from_slice(meta_text.as_bytes());
    frame.push(b'\t');
    frame.extend_from_slice(&body);

    match format {
        WireFormat::Text | WireFormat::Binary => Ok(frame),
        WireFormat::LengthPrefixed => {
            let total = frame.len() + LENGTH_PREFIX_SIZE;
            if total > MAX_FRAME_SIZE {
                return Err(WireError::FrameTooLarge { size: total });
            }
            let mut prefixed = Vec::with_capacity(total);
            prefixed.extend_from_slice(&(total as u16).to_le_bytes());
            prefixed.extend_from_slice(&frame);
            Ok(prefixed)
        }
    }
}

fn utf8(bytes: &[u8], segment: &'static str) -> Result<String, WireError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8 { segment })
}

/// Decode one tab-separated frame (no length prefix).
fn decode_frame(buf: &[u8], text_mode: bool, frames: &FrameTable) -> Result<Packet, WireError> {
    let first = buf
        .iter()
        .position(|&b| b == b'\t')
        .ok_or(WireError::MissingSeparator { which: "first tab" })?;
    let second = buf[first + 1..]
        .iter()
        .position(|&b| b == b'\t')
        .map(|pos| first + 1 + pos)
        .ok_or(WireError::MissingSeparator {
            which: "second tab",
        })?;

    let header = utf8(&buf[..first], "header")?;
    let (id_route, id_target) = header.split_once(' ').ok_or(WireError::MissingSeparator {
        which: "header space",
    })?;

    let mid = &buf[first + 1..second];
    let symbol = *mid.first().ok_or(WireError::MissingKind)?;
    let kind = PacketKind::from_symbol(symbol).ok_or(WireError::UnknownKind { symbol })?;

    let meta_text = utf8(&mid[1..], "meta")?;
    let (op, meta) = if meta_text.is_empty() {
        (None, None)
    } else {
        match frames.unpack(&meta_text) {
            Ok(Some((op, user_meta))) => (Some(op), user_meta),
            Ok(None) => (None, Some(meta_text)),
            // Leading byte matched an action symbol but the fields did
            // not parse; carry the text as plain meta.
            Err(err) => {
                tracing::debug!(error = %err, "meta does not parse as an op header");
                (None, Some(meta_text))
            }
        }
    };

    let raw_body = &buf[second + 1..];
    let body = match kind {
        PacketKind::Json => {
            if raw_body.is_empty() {
                Body::Empty
            } else {
                let value =
                    serde_json::from_slice(raw_body).map_err(|e| WireError::BodyDecode {
                        message: e.to_string(),
                    })?;
                Body::Json(value)
            }
        }
        PacketKind::SplitJson => Body::Text(utf8(raw_body, "body")?),
        PacketKind::Data | PacketKind::SplitData => {
            if text_mode {
                Body::Text(utf8(raw_body, "body")?)
            } else {
                Body::Bytes(Bytes::copy_from_slice(raw_body))
            }
        }
        PacketKind::LegacyBase64 => {
            let text = utf8(raw_body, "body")?;
            let decoded = BASE64.decode(text).map_err(|e| WireError::BodyDecode {
                message: e.to_string(),
            })?;
            Body::Bytes(Bytes::from(decoded))
        }
    };

    Ok(Packet {
        id_route: id_route.to_string(),
        id_target: id_target.to_string(),
        kind,
        op,
        meta,
        body,
    })
}

/// Decode one complete wire frame.
///
/// # Errors
///
/// Missing separators, unknown kind symbols, malformed op headers, and
/// undecodable bodies are hard errors; for [`WireFormat::LengthPrefixed`]
/// a short buffer is [`WireError::Truncated`] (use [`try_decode`] for
/// streaming input).
pub fn decode(buf: &[u8], format: WireFormat, frames: &FrameTable) -> Result<Packet, WireError> {
    match format {
        WireFormat::Text => decode_frame(buf, true, frames),
        WireFormat::Binary => decode_frame(buf, false, frames),
        WireFormat::LengthPrefixed => match try_decode(buf, frames)? {
            Some((pkt, _consumed)) => Ok(pkt),
            None => Err(WireError::Truncated {
                needed: frame_len(buf).unwrap_or(LENGTH_PREFIX_SIZE),
                have: buf.len(),
            }),
        },
    }
}

fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u16::from_le_bytes([buf[0], buf[1]]) as usize)
}

/// Try to decode a length-prefixed frame from a buffer that may contain
/// partial data.
///
/// Returns `Ok(Some((packet, consumed)))` when a complete frame was
/// parsed, `Ok(None)` when more data is needed (not an error condition).
///
/// # Errors
///
/// Returns [`WireError::InvalidLength`] for a length below the prefix
/// size, plus any frame-level decode error once the frame is complete.
pub fn try_decode(
    buf: &[u8],
    frames: &FrameTable,
) -> Result<Option<(Packet, usize)>, WireError> {
    let total = match frame_len(buf) {
        Some(total) => total,
        None => return Ok(None), // Need more data for the prefix
    };
    if total < LENGTH_PREFIX_SIZE {
        return Err(WireError::InvalidLength {
            length: total as u16,
        });
    }
    if buf.len() < total {
        return Ok(None); // Need more data for the frame
    }
    let pkt = decode_frame(&buf[LENGTH_PREFIX_SIZE..total], false, frames)?;
    Ok(Some((pkt, total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{FrameRole, Op, OpKind};
    use crate::types::Token;
    use serde_json::json;

    fn table() -> FrameTable {
        FrameTable::new()
    }

    #[test]
    fn test_text_roundtrip_json_body() {
        let frames = table();
        let pkt = Packet::to("$unit$", "a-tgt", Body::Json(json!({"msg": "hi"})));

        let wire = encode(&pkt, WireFormat::Text, &frames).expect("encode");
        let decoded = decode(&wire, WireFormat::Text, &frames).expect("decode");

        assert_eq!(decoded.id_route, "$unit$");
        assert_eq!(decoded.id_target, "a-tgt");
        assert_eq!(decoded.kind, PacketKind::Json);
        assert_eq!(decoded.body, Body::Json(json!({"msg": "hi"})));
        assert!(decoded.op.is_none());
        assert!(decoded.meta.is_none());
    }

    #[test]
    fn test_text_roundtrip_with_op_and_meta() {
        let frames = table();
        let frame = frames
            .select(OpKind::Direct, FrameRole::AddressedSource)
            .copied()
            .expect("frame");
        let mut op = Op::for_frame(&frame);
        op.from_route = Some("$a$".to_string());
        op.from_target = Some("replies".to_string());
        op.token = Some(Token::from_text("t1"));

        let pkt = Packet::to("$b$", "calc", Body::Json(json!([1, 2])))
            .with_op(op.clone())
            .with_meta("caller-note");

        let wire = encode(&pkt, WireFormat::Text, &frames).expect("encode");
        let decoded = decode(&wire, WireFormat::Text, &frames).expect("decode");

        assert_eq!(decoded.op, Some(op));
        assert_eq!(decoded.meta.as_deref(), Some("caller-note"));
        assert_eq!(decoded.body, Body::Json(json!([1, 2])));
    }

    #[test]
    fn test_binary_roundtrip_byte_body() {
        let frames = table();
        let payload = Bytes::from_static(&[0x00, 0xFF, 0x10, 0x7F]);
        let pkt = Packet::to("$a$", "blob", Body::Bytes(payload.clone()));

        let wire = encode(&pkt, WireFormat::Binary, &frames).expect("encode");
        let decoded = decode(&wire, WireFormat::Binary, &frames).expect("decode");

        assert_eq!(decoded.body, Body::Bytes(payload));
        assert_eq!(decoded.kind, PacketKind::Data);
    }

    #[test]
    fn test_text_byte_body_travels_as_legacy_alias() {
        let frames = table();
        let payload = Bytes::from_static(&[1, 2, 3, 250]);
        let pkt = Packet::to("$a$", "blob", Body::Bytes(payload.clone()));

        let wire = encode(&pkt, WireFormat::Text, &frames).expect("encode");
        // The kind byte right after the first tab is the legacy alias.
        let tab = wire.iter().position(|&b| b == b'\t').expect("tab");
        assert_eq!(wire[tab + 1], b'%');

        let decoded = decode(&wire, WireFormat::Text, &frames).expect("decode");
        assert_eq!(decoded.kind, PacketKind::LegacyBase64);
        assert_eq!(decoded.body, Body::Bytes(payload));
    }

    #[test]
    fn test_length_prefixed_roundtrip() {
        let frames = table();
        let pkt = Packet::to("$a$", "tgt", Body::Json(json!({"n": 42})));

        let wire = encode(&pkt, WireFormat::LengthPrefixed, &frames).expect("encode");
        let total = u16::from_le_bytes([wire[0], wire[1]]) as usize;
        assert_eq!(total, wire.len());

        let decoded = decode(&wire, WireFormat::LengthPrefixed, &frames).expect("decode");
        assert_eq!(decoded.body, Body::Json(json!({"n": 42})));
    }

    #[test]
    fn test_try_decode_partial_then_complete() {
        let frames = table();
        let pkt = Packet::to("$a$", "tgt", Body::from("hello"));
        let wire = encode(&pkt, WireFormat::LengthPrefixed, &frames).expect("encode");

        // One prefix byte: need more data.
        assert!(try_decode(&wire[..1], &frames).expect("partial").is_none());
        // Prefix complete but frame partial: need more data.
        assert!(try_decode(&wire[..wire.len() - 2], &frames)
            .expect("partial")
            .is_none());

        // Complete frame plus trailing bytes of the next one.
        let mut extended = wire.clone();
        extended.extend_from_slice(&[9, 9, 9]);
        let (decoded, consumed) = try_decode(&extended, &frames)
            .expect("decode")
            .expect("complete");
        assert_eq!(consumed, wire.len());
        assert_eq!(decoded.id_target, "tgt");
    }

    #[test]
    fn test_decode_missing_separators() {
        let frames = table();
        assert!(matches!(
            decode(b"no tabs at all", WireFormat::Text, &frames),
            Err(WireError::MissingSeparator { which: "first tab" })
        ));
        assert!(matches!(
            decode(b"a b\t=meta no second", WireFormat::Text, &frames),
            Err(WireError::MissingSeparator {
                which: "second tab"
            })
        ));
        assert!(matches!(
            decode(b"nospace\t=\tbody", WireFormat::Text, &frames),
            Err(WireError::MissingSeparator {
                which: "header space"
            })
        ));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let frames = table();
        let result = decode(b"a b\t*\tbody", WireFormat::Text, &frames);
        assert!(matches!(result, Err(WireError::UnknownKind { symbol: b'*' })));
    }

    #[test]
    fn test_decode_empty_mid_segment() {
        let frames = table();
        let result = decode(b"a b\t\tbody", WireFormat::Text, &frames);
        assert!(matches!(result, Err(WireError::MissingKind)));
    }

    #[test]
    fn test_encode_rejects_separator_ids() {
        let frames = table();
        let pkt = Packet::to("bad id", "tgt", Body::Empty);
        assert!(matches!(
            encode(&pkt, WireFormat::Text, &frames),
            Err(WireError::IdWhitespace { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_tab_in_meta() {
        let frames = table();
        let pkt = Packet::to("$a$", "tgt", Body::Empty).with_meta("has\ttab");
        assert!(matches!(
            encode(&pkt, WireFormat::Text, &frames),
            Err(WireError::MetaTab)
        ));
    }

    #[test]
    fn test_empty_route_id_for_handshake() {
        let frames = table();
        let pkt = Packet::to("", "hello", Body::Json(json!(["$a$"])));
        let wire = encode(&pkt, WireFormat::Text, &frames).expect("encode");
        let decoded = decode(&wire, WireFormat::Text, &frames).expect("decode");
        assert_eq!(decoded.id_route, "");
        assert_eq!(decoded.id_target, "hello");
    }

    #[test]
    fn test_empty_json_body_decodes_as_empty() {
        let frames = table();
        let pkt = Packet::to("$a$", "tgt", Body::Empty);
        let wire = encode(&pkt, WireFormat::Text, &frames).expect("encode");
        let decoded = decode(&wire, WireFormat::Text, &frames).expect("decode");
        assert_eq!(decoded.body, Body::Empty);
    }

    #[test]
    fn test_plain_meta_starting_with_action_symbol() {
        // "my note" starts with 'm' (a frame symbol) but is not a valid
        // op header; it must survive as plain meta, not fail decode.
        let frames = table();
        let pkt = Packet::to("$a$", "tgt", Body::from("x")).with_meta("my note");
        let wire = encode(&pkt, WireFormat::Text, &frames).expect("encode");
        let decoded = decode(&wire, WireFormat::Text, &frames).expect("decode");
        assert!(decoded.op.is_none());
        assert_eq!(decoded.meta.as_deref(), Some("my note"));
    }

    #[test]
    fn test_body_may_contain_tabs() {
        let frames = table();
        let pkt = Packet::to("$a$", "tgt", Body::from("tab\there"));
        let wire = encode(&pkt, WireFormat::Text, &frames).expect("encode");
        let decoded = decode(&wire, WireFormat::Text, &frames).expect("decode");
        assert_eq!(decoded.body, Body::from("tab\there"));
    }
}
