//! Reassembly state for one split transfer.
//!
//! Parts are stored in a slot vector indexed by their ordinal; the
//! terminal marker (`seq < 0`) reveals the total count. Completion is a
//! counter comparison, not a slot scan.

use std::cell::Cell;
use std::rc::Rc;

use crate::codec::split::SplitError;
use crate::packet::{Packet, PacketKind};

/// Collects the parts of one split transfer until all indices are filled.
pub struct ReassemblyBuffer {
    kind: PacketKind,
    parts: Vec<Option<Packet>>,
    filled: usize,
    total: Option<usize>,
    expiry: Rc<Cell<bool>>,
}

impl ReassemblyBuffer {
    /// Create a buffer for parts of `kind`. The expiry flag belongs to the
    /// reaper entry that drops this buffer if it never completes.
    pub fn new(kind: PacketKind, expiry: Rc<Cell<bool>>) -> Self {
        Self {
            kind,
            parts: Vec::new(),
            filled: 0,
            total: None,
            expiry,
        }
    }

    /// Record one part.
    ///
    /// A non-negative `seq` stores the part at that index (duplicates are
    /// ignored); a negative `seq` is the terminal marker recording the
    /// total part count. Arrival order is arbitrary.
    ///
    /// # Errors
    ///
    /// Rejects parts whose kind differs from the buffer's, and parts
    /// carrying no seq ordinal.
    pub fn accept(&mut self, pkt: Packet) -> Result<(), SplitError> {
        if pkt.kind != self.kind {
            return Err(SplitError::KindMismatch {
                first: self.kind,
                other: pkt.kind,
            });
        }
        let seq = pkt
            .op
            .as_ref()
            .and_then(|op| op.seq)
            .ok_or(SplitError::MissingSeq)?;

        if seq < 0 {
            let total = (-seq) as usize;
            if self.parts.len() > total {
                // A part claimed an index past the terminal count; keep
                // the declared window and recount.
                tracing::warn!(total, got = self.parts.len(), "parts beyond terminal count");
                self.parts.truncate(total);
                self.filled = self.parts.iter().flatten().count();
            } else {
                self.parts.resize_with(total, || None);
            }
            self.total = Some(total);
            return Ok(());
        }

        let index = seq as usize;
        if let Some(total) = self.total {
            if index >= total {
                tracing::warn!(index, total, "dropping part beyond terminal count");
                return Ok(());
            }
        }
        if index >= self.parts.len() {
            self.parts.resize_with(index + 1, || None);
        }
        if self.parts[index].is_none() {
            self.parts[index] = Some(pkt);
            self.filled += 1;
        }
        Ok(())
    }

    /// Whether every index in `[0, total)` has a recorded part.
    pub fn is_complete(&self) -> bool {
        self.total.is_some_and(|total| self.filled == total)
    }

    /// Parts recorded so far.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Disarm the buffer's expiry entry.
    pub fn disarm(&self) {
        self.expiry.set(false);
    }

    /// Consume the buffer, yielding the data parts in index order.
    pub fn take_parts(self) -> Vec<Packet> {
        self.expiry.set(false);
        self.parts.into_iter().flatten().collect()
    }
}
