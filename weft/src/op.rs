//! Operation framing: the declarative (kind, action-symbol) table.
//!
//! Every correlated packet carries an op header at the front of its meta
//! text: one action symbol selecting a [`Frame`], followed by that frame's
//! fields packed as space-separated atoms. Any text left over after the
//! fields is the caller's meta.
//!
//! The table is explicit and composed once at construction (a base table
//! plus optional overrides) rather than chained lookups. Four derived
//! subsets (addressed/anonymous × source/reply) are what the message layer
//! selects between.

use std::collections::HashMap;

use crate::types::Token;

/// Operation kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// Small control datagram carrying only a correlation id.
    Ctrl,
    /// Uncorrelated one-way message.
    Datagram,
    /// Correlated request or its reply.
    Direct,
    /// One logical message transmitted as a bounded part sequence.
    Multipart,
    /// Open-ended part sequence terminated by the writer.
    Stream,
}

/// One header sub-field of a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpField {
    /// Request-initiated correlation id.
    Token,
    /// Reply-initiated correlation id (echo of the request token).
    MsgId,
    /// Reply-address route id.
    FromRoute,
    /// Reply-address target id.
    FromTarget,
    /// Part ordinal; negative marks the terminal count.
    Seq,
}

/// One entry of the framing table: an action symbol and its field list.
#[derive(Copy, Clone, Debug)]
pub struct Frame {
    /// Operation kind this frame encodes.
    pub kind: OpKind,
    /// Wire action symbol (first byte of the meta text).
    pub symbol: char,
    /// Header fields, in pack order.
    pub fields: &'static [OpField],
}

use OpField::{FromRoute, FromTarget, MsgId, Seq, Token as TokenField};

/// The base framing table.
///
/// Uppercase symbols are token-bearing (source) variants, lowercase are
/// msgid-bearing (reply) variants; the two leading from-fields mark the
/// addressed (not anonymous) variants.
pub const BASE_FRAMES: &[Frame] = &[
    Frame { kind: OpKind::Ctrl, symbol: '?', fields: &[TokenField] },
    Frame { kind: OpKind::Ctrl, symbol: '!', fields: &[MsgId] },
    Frame { kind: OpKind::Datagram, symbol: '-', fields: &[] },
    Frame { kind: OpKind::Datagram, symbol: '@', fields: &[FromRoute, FromTarget] },
    Frame { kind: OpKind::Direct, symbol: 'E', fields: &[FromRoute, FromTarget, TokenField] },
    Frame { kind: OpKind::Direct, symbol: 'e', fields: &[FromRoute, FromTarget, MsgId] },
    Frame { kind: OpKind::Direct, symbol: 'D', fields: &[TokenField] },
    Frame { kind: OpKind::Direct, symbol: 'd', fields: &[MsgId] },
    Frame { kind: OpKind::Multipart, symbol: 'U', fields: &[FromRoute, FromTarget, TokenField, Seq] },
    Frame { kind: OpKind::Multipart, symbol: 'u', fields: &[FromRoute, FromTarget, MsgId, Seq] },
    Frame { kind: OpKind::Multipart, symbol: 'M', fields: &[TokenField, Seq] },
    Frame { kind: OpKind::Multipart, symbol: 'm', fields: &[MsgId, Seq] },
    Frame { kind: OpKind::Stream, symbol: 'R', fields: &[FromRoute, FromTarget, TokenField, Seq] },
    Frame { kind: OpKind::Stream, symbol: 'r', fields: &[FromRoute, FromTarget, MsgId, Seq] },
    Frame { kind: OpKind::Stream, symbol: 'S', fields: &[TokenField, Seq] },
    Frame { kind: OpKind::Stream, symbol: 's', fields: &[MsgId, Seq] },
];

/// Decoded operation metadata carried in a packet's meta text.
#[derive(Clone, Debug, PartialEq)]
pub struct Op {
    /// Operation kind.
    pub kind: OpKind,
    /// The action symbol this op was framed with.
    pub action: char,
    /// Request-initiated correlation id.
    pub token: Option<Token>,
    /// Reply-initiated correlation id.
    pub msgid: Option<Token>,
    /// Reply-address route id.
    pub from_route: Option<String>,
    /// Reply-address target id.
    pub from_target: Option<String>,
    /// Part ordinal (negative = terminal marker, `-seq` = part count).
    pub seq: Option<i64>,
}

impl Op {
    /// An op shell for the given frame, fields unset.
    pub fn for_frame(frame: &Frame) -> Self {
        Self {
            kind: frame.kind,
            action: frame.symbol,
            token: None,
            msgid: None,
            from_route: None,
            from_target: None,
            seq: None,
        }
    }

    /// Whether this op is a reply-side (msgid-bearing) variant.
    pub fn is_reply(&self) -> bool {
        self.msgid.is_some()
    }
}

/// Op framing errors.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// The action symbol has no frame in the table.
    #[error("unknown op action {symbol:?}")]
    UnknownAction {
        /// The unmatched symbol.
        symbol: char,
    },

    /// The meta text ended before all of the frame's fields.
    #[error("truncated op header for action {symbol:?}")]
    TruncatedHeader {
        /// The frame's symbol.
        symbol: char,
    },

    /// A seq atom was not a valid integer.
    #[error("invalid seq atom {value:?}")]
    BadSeq {
        /// The offending atom.
        value: String,
    },

    /// Packing required a field the op does not carry.
    #[error("op for action {symbol:?} is missing its {field:?} field")]
    MissingField {
        /// The missing field.
        field: OpField,
        /// The frame's symbol.
        symbol: char,
    },
}

/// One of the four frame subsets the message layer selects between.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameRole {
    /// Carries a reply address and a token.
    AddressedSource,
    /// Carries a reply address and a msgid.
    AddressedReply,
    /// Carries neither address nor msgid (token where the kind needs one).
    AnonSource,
    /// Carries a msgid only.
    AnonReply,
}

impl FrameRole {
    fn addressed(self) -> bool {
        matches!(self, FrameRole::AddressedSource | FrameRole::AddressedReply)
    }

    fn reply(self) -> bool {
        matches!(self, FrameRole::AddressedReply | FrameRole::AnonReply)
    }
}

/// Action-symbol-keyed frame lookup, built once at construction.
#[derive(Debug)]
pub struct FrameTable {
    frames: Vec<Frame>,
    by_symbol: HashMap<char, usize>,
}

impl FrameTable {
    /// The base table.
    pub fn new() -> Self {
        Self::with_overrides(&[])
    }

    /// Base table composed with `overrides`: an override sharing a base
    /// symbol replaces that entry, otherwise it is appended. The result is
    /// fixed for the table's lifetime.
    pub fn with_overrides(overrides: &[Frame]) -> Self {
        let mut frames: Vec<Frame> = BASE_FRAMES.to_vec();
        for over in overrides {
            match frames.iter_mut().find(|f| f.symbol == over.symbol) {
                Some(slot) => *slot = *over,
                None => frames.push(*over),
            }
        }
        let by_symbol = frames
            .iter()
            .enumerate()
            .map(|(idx, frame)| (frame.symbol, idx))
            .collect();
        Self { frames, by_symbol }
    }

    /// Look up the frame for an action symbol.
    pub fn frame(&self, symbol: char) -> Option<&Frame> {
        self.by_symbol.get(&symbol).map(|idx| &self.frames[*idx])
    }

    /// Select the frame for `(kind, role)` from the derived subsets.
    ///
    /// Ctrl frames ignore the addressed dimension (they carry no reply
    /// address); datagram frames ignore the reply dimension (they carry no
    /// correlation id).
    pub fn select(&self, kind: OpKind, role: FrameRole) -> Option<&Frame> {
        self.frames.iter().find(|frame| {
            if frame.kind != kind {
                return false;
            }
            let has_from = frame.fields.contains(&FromRoute);
            let has_msgid = frame.fields.contains(&MsgId);
            match kind {
                OpKind::Ctrl => has_msgid == role.reply(),
                OpKind::Datagram => has_from == role.addressed(),
                _ => has_from == role.addressed() && has_msgid == role.reply(),
            }
        })
    }

    /// Pack an op (plus optional caller meta) into meta text.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::UnknownAction`] when the op's action has no
    /// frame, and [`OpError::MissingField`] when the op lacks a field the
    /// frame requires.
    pub fn pack(&self, op: &Op, user_meta: Option<&str>) -> Result<String, OpError> {
        let frame = self
            .frame(op.action)
            .ok_or(OpError::UnknownAction { symbol: op.action })?;

        let mut atoms: Vec<String> = Vec::with_capacity(frame.fields.len() + 1);
        for field in frame.fields {
            let atom = match field {
                OpField::Token => op.token.as_ref().map(|t| t.to_string()),
                OpField::MsgId => op.msgid.as_ref().map(|t| t.to_string()),
                OpField::FromRoute => op.from_route.clone(),
                OpField::FromTarget => op.from_target.clone(),
                OpField::Seq => op.seq.map(|s| s.to_string()),
            };
            match atom {
                Some(atom) => atoms.push(atom),
                None => {
                    return Err(OpError::MissingField {
                        field: *field,
                        symbol: frame.symbol,
                    })
                }
            }
        }
        if let Some(meta) = user_meta {
            if !meta.is_empty() {
                atoms.push(meta.to_string());
            }
        }

        let mut text = String::with_capacity(1 + atoms.iter().map(|a| a.len() + 1).sum::<usize>());
        text.push(frame.symbol);
        text.push_str(&atoms.join(" "));
        Ok(text)
    }

    /// Unpack meta text into an op and any trailing caller meta.
    ///
    /// Returns `Ok(None)` when the first byte is not a known action symbol
    /// (the meta is plain caller text, not an op header).
    ///
    /// # Errors
    ///
    /// Returns [`OpError::TruncatedHeader`] when the text ends before the
    /// frame's fields, and [`OpError::BadSeq`] for a non-numeric seq atom.
    pub fn unpack(&self, meta: &str) -> Result<Option<(Op, Option<String>)>, OpError> {
        let symbol = match meta.chars().next() {
            Some(symbol) => symbol,
            None => return Ok(None),
        };
        let frame = match self.frame(symbol) {
            Some(frame) => frame,
            None => return Ok(None),
        };

        let rest = &meta[symbol.len_utf8()..];
        let mut op = Op::for_frame(frame);

        if frame.fields.is_empty() {
            let user_meta = (!rest.is_empty()).then(|| rest.to_string());
            return Ok(Some((op, user_meta)));
        }

        let mut atoms = rest.splitn(frame.fields.len() + 1, ' ');
        for field in frame.fields {
            let atom = atoms
                .next()
                .filter(|a| !a.is_empty())
                .ok_or(OpError::TruncatedHeader { symbol })?;
            match field {
                OpField::Token => op.token = Some(Token::from_text(atom)),
                OpField::MsgId => op.msgid = Some(Token::from_text(atom)),
                OpField::FromRoute => op.from_route = Some(atom.to_string()),
                OpField::FromTarget => op.from_target = Some(atom.to_string()),
                OpField::Seq => {
                    op.seq = Some(atom.parse::<i64>().map_err(|_| OpError::BadSeq {
                        value: atom.to_string(),
                    })?)
                }
            }
        }
        let user_meta = atoms.next().filter(|m| !m.is_empty()).map(str::to_string);
        Ok(Some((op, user_meta)))
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}
