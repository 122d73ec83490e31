//! Oversized-body splitting and reassembly.
//!
//! A body longer than the per-packet budget is sliced into budget-sized
//! chunks of the matching split kind. Data chunks carry `seq = 0, 1, 2, …`
//! in their op header; one extra terminal packet with `seq = -N` (and an
//! empty body) closes the sequence, so the receiver learns the part count
//! without a leading header exchange. The caller's meta travels on chunk 0
//! only.
//!
//! Reassembly tolerates any arrival order; [`join_packets`] expects the
//! data parts in index order and rebuilds the original body exactly.

use bytes::Bytes;

use crate::packet::{Body, Packet, PacketKind};

/// Splitting/joining errors.
///
/// Mismatched or non-split kinds are not expected from a well-formed peer
/// and are not recoverable locally.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    /// No parts were given to join.
    #[error("cannot join zero parts")]
    Empty,

    /// Parts did not all share one kind.
    #[error("parts mix kinds {first:?} and {other:?}")]
    KindMismatch {
        /// Kind of part 0.
        first: PacketKind,
        /// The first differing kind.
        other: PacketKind,
    },

    /// Parts mixed text and byte bodies.
    #[error("parts mix text and byte bodies")]
    BodyMixed,

    /// The shared kind is not a split kind.
    #[error("kind {kind:?} is not a split kind")]
    NotSplit {
        /// The offending kind.
        kind: PacketKind,
    },

    /// A data part carried no seq ordinal.
    #[error("split part carries no seq ordinal")]
    MissingSeq,

    /// The packet to split carried no op to hold the seq ordinals.
    #[error("oversized body requires a seq-bearing op frame")]
    NoSeqFrame,

    /// The joined body failed to decode.
    #[error("joined body decode failed: {message}")]
    Join {
        /// Details from the underlying decoder.
        message: String,
    },
}

/// Slice text into budget-sized chunks on `char` boundaries, so every
/// chunk stays valid UTF-8 in all wire variants.
fn chunk_text(text: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + budget).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single char wider than the budget still makes progress.
            end = start + 1;
            while end < text.len() && !text.is_char_boundary(end) {
                end += 1;
            }
        }
        chunks.push(text[start..end].to_string());
        start = end;
    }
    chunks
}

/// Serialize a body into budget-sized chunks plus the split kind they
/// travel under. Used by [`split_packets`] and the stream writers.
pub(crate) fn chunk_body(body: &Body, budget: usize) -> (Vec<Body>, PacketKind) {
    let budget = budget.max(1);
    match body {
        Body::Json(value) => (
            chunk_text(&value.to_string(), budget)
                .into_iter()
                .map(Body::Text)
                .collect(),
            PacketKind::SplitJson,
        ),
        Body::Text(text) => (
            chunk_text(text, budget).into_iter().map(Body::Text).collect(),
            PacketKind::SplitData,
        ),
        Body::Bytes(bytes) => (
            bytes
                .chunks(budget)
                .map(|c| Body::Bytes(Bytes::copy_from_slice(c)))
                .collect(),
            PacketKind::SplitData,
        ),
        Body::Empty => (vec![Body::Empty], PacketKind::SplitData),
    }
}

/// Split a packet into wire-sized parts.
///
/// Within budget the packet is passed through untouched. Otherwise the
/// body is serialized (JSON bodies to text; byte bodies pass through) and
/// sliced; each data part gets `seq = index` stamped into a clone of the
/// packet's op, and a final empty-bodied part carries `seq = -N`.
///
/// # Errors
///
/// An oversized body on a packet without an op returns
/// [`SplitError::NoSeqFrame`]: there is nowhere to carry the ordinals.
pub fn split_packets(pkt: Packet, budget: usize) -> Result<Vec<Packet>, SplitError> {
    let budget = budget.max(1);
    if pkt.body.wire_len() <= budget {
        return Ok(vec![pkt]);
    }

    let op = match &pkt.op {
        Some(op) => op.clone(),
        None => return Err(SplitError::NoSeqFrame),
    };

    let (chunks, split_kind) = chunk_body(&pkt.body, budget);

    let count = chunks.len();
    let mut parts = Vec::with_capacity(count + 1);
    for (index, chunk) in chunks.into_iter().enumerate() {
        let mut part_op = op.clone();
        part_op.seq = Some(index as i64);
        parts.push(Packet {
            id_route: pkt.id_route.clone(),
            id_target: pkt.id_target.clone(),
            kind: split_kind,
            op: Some(part_op),
            meta: if index == 0 { pkt.meta.clone() } else { None },
            body: chunk,
        });
    }

    let mut terminal_op = op;
    terminal_op.seq = Some(-(count as i64));
    parts.push(Packet {
        id_route: pkt.id_route,
        id_target: pkt.id_target,
        kind: split_kind,
        op: Some(terminal_op),
        meta: None,
        body: Body::Empty,
    });

    Ok(parts)
}

/// Reassemble split parts into one packet.
///
/// All parts must share one split kind; data parts are joined in `seq`
/// order (terminal markers in the input are skipped). The reconstructed
/// packet exposes the original ids, op (seq cleared), and chunk-0 meta;
/// it exists for terminal consumption by a handler.
///
/// # Errors
///
/// Mixed kinds, mixed body types, non-split kinds, missing seq ordinals,
/// and undecodable joined JSON are all hard [`SplitError`]s.
pub fn join_packets(parts: Vec<Packet>) -> Result<Packet, SplitError> {
    let first_kind = parts.first().map(|p| p.kind).ok_or(SplitError::Empty)?;
    if !first_kind.is_split() {
        return Err(SplitError::NotSplit { kind: first_kind });
    }
    if let Some(part) = parts.iter().find(|p| p.kind != first_kind) {
        return Err(SplitError::KindMismatch {
            first: first_kind,
            other: part.kind,
        });
    }

    let mut data_parts: Vec<(i64, Packet)> = Vec::with_capacity(parts.len());
    for part in parts {
        let seq = part
            .op
            .as_ref()
            .and_then(|op| op.seq)
            .ok_or(SplitError::MissingSeq)?;
        if seq >= 0 {
            data_parts.push((seq, part));
        }
    }
    data_parts.sort_by_key(|(seq, _)| *seq);
    if data_parts.is_empty() {
        return Err(SplitError::Empty);
    }

    let all_text = data_parts
        .iter()
        .all(|(_, p)| matches!(p.body, Body::Text(_)));
    let all_bytes = data_parts
        .iter()
        .all(|(_, p)| matches!(p.body, Body::Bytes(_)));

    let joined: Body = if all_text {
        let text: String = data_parts
            .iter()
            .map(|(_, p)| match &p.body {
                Body::Text(t) => t.as_str(),
                _ => "",
            })
            .collect();
        match first_kind {
            PacketKind::SplitJson => {
                let value = serde_json::from_str(&text).map_err(|e| SplitError::Join {
                    message: e.to_string(),
                })?;
                Body::Json(value)
            }
            _ => Body::Text(text),
        }
    } else if all_bytes {
        let mut buf = Vec::new();
        for (_, part) in &data_parts {
            if let Body::Bytes(bytes) = &part.body {
                buf.extend_from_slice(bytes);
            }
        }
        Body::Bytes(Bytes::from(buf))
    } else {
        return Err(SplitError::BodyMixed);
    };

    let (_, head) = data_parts.swap_remove(0);
    let mut op = head.op;
    if let Some(op) = op.as_mut() {
        op.seq = None;
    }
    Ok(Packet {
        id_route: head.id_route,
        id_target: head.id_target,
        kind: first_kind.plain_variant(),
        op,
        meta: head.meta,
        body: joined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{FrameRole, FrameTable, Op, OpKind};
    use crate::types::Token;
    use serde_json::json;

    fn multipart_packet(body: Body) -> Packet {
        let table = FrameTable::new();
        let frame = table
            .select(OpKind::Multipart, FrameRole::AnonSource)
            .copied()
            .expect("frame");
        let mut op = Op::for_frame(&frame);
        op.token = Some(Token::from_text("tok"));
        Packet::to("$a$", "sink", body).with_op(op)
    }

    #[test]
    fn test_within_budget_passes_through() {
        let pkt = multipart_packet(Body::from("small"));
        let parts = split_packets(pkt, 64).expect("split");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].body, Body::from("small"));
        assert!(!parts[0].kind.is_split());
    }

    #[test]
    fn test_split_seq_and_terminal_marker() {
        let pkt = multipart_packet(Body::from("abcdefghij"));
        let parts = split_packets(pkt, 4).expect("split");

        // ceil(10 / 4) = 3 data parts + terminal marker.
        assert_eq!(parts.len(), 4);
        let seqs: Vec<i64> = parts
            .iter()
            .map(|p| p.op.as_ref().and_then(|op| op.seq).expect("seq"))
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, -3]);
        assert_eq!(parts[3].body, Body::Empty);
        assert!(parts.iter().all(|p| p.kind == PacketKind::SplitData));
    }

    #[test]
    fn test_meta_only_on_chunk_zero() {
        let pkt = multipart_packet(Body::from("abcdefghij")).with_meta("note");
        let parts = split_packets(pkt, 4).expect("split");
        assert_eq!(parts[0].meta.as_deref(), Some("note"));
        assert!(parts[1..].iter().all(|p| p.meta.is_none()));
    }

    #[test]
    fn test_split_join_roundtrip_text() {
        let original = "the quick brown fox jumps over the lazy dog";
        let pkt = multipart_packet(Body::from(original));
        let parts = split_packets(pkt, 8).expect("split");
        let joined = join_packets(parts).expect("join");
        assert_eq!(joined.body, Body::from(original));
        assert_eq!(joined.kind, PacketKind::Data);
        assert_eq!(joined.id_target, "sink");
    }

    #[test]
    fn test_split_join_roundtrip_out_of_order() {
        let value = json!({"items": (0..40).collect::<Vec<_>>(), "label": "reorder"});
        let pkt = multipart_packet(Body::Json(value.clone()));
        let mut parts = split_packets(pkt, 16).expect("split");
        assert!(parts.len() > 2);
        parts.reverse();
        let joined = join_packets(parts).expect("join");
        assert_eq!(joined.body, Body::Json(value));
        assert_eq!(joined.kind, PacketKind::Json);
    }

    #[test]
    fn test_split_join_roundtrip_bytes() {
        let payload: Vec<u8> = (0..=255).collect();
        let pkt = multipart_packet(Body::from(payload.clone()));
        let parts = split_packets(pkt, 100).expect("split");
        let joined = join_packets(parts).expect("join");
        assert_eq!(joined.body, Body::Bytes(Bytes::from(payload)));
    }

    #[test]
    fn test_multibyte_chunks_stay_utf8() {
        let text = "héllo wörld ünïcode çhünks".repeat(4);
        let pkt = multipart_packet(Body::from(text.as_str()));
        let parts = split_packets(pkt, 7).expect("split");
        for part in &parts {
            if let Body::Text(chunk) = &part.body {
                assert!(chunk.len() <= 7);
            }
        }
        let joined = join_packets(parts).expect("join");
        assert_eq!(joined.body, Body::from(text.as_str()));
    }

    #[test]
    fn test_oversized_body_without_op() {
        let pkt = Packet::to("$a$", "sink", Body::from("abcdefghij"));
        assert!(matches!(
            split_packets(pkt, 4),
            Err(SplitError::NoSeqFrame)
        ));
    }

    #[test]
    fn test_join_rejects_mixed_kinds() {
        let pkt = multipart_packet(Body::from("abcdefghij"));
        let mut parts = split_packets(pkt, 4).expect("split");
        parts[1].kind = PacketKind::SplitJson;
        assert!(matches!(
            join_packets(parts),
            Err(SplitError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_join_rejects_plain_kind() {
        let pkt = multipart_packet(Body::from("x"));
        assert!(matches!(
            join_packets(vec![pkt]),
            Err(SplitError::NotSplit { .. })
        ));
    }

    #[test]
    fn test_join_rejects_empty() {
        assert!(matches!(join_packets(vec![]), Err(SplitError::Empty)));
    }
}
