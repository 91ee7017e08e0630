//! Free-punch mutation operations and journal wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    punch::{FreePunch, FreePunchPatch},
    types::{CardNo, OpSeq, PunchId},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Immutable operation appended to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Insert a fully materialized free punch.
    Insert {
        /// Inserted punch.
        punch: FreePunch,
    },
    /// Patch a punch, including precomputed inverse patch.
    Patch {
        /// Punch id to mutate.
        id: PunchId,
        /// Forward patch.
        patch: FreePunchPatch,
        /// Inverse patch that restores prior state.
        prev: FreePunchPatch,
        /// Card number of the punch after the patch.
        #[serde(default)]
        card_no: CardNo,
    },
    /// Toggle removal using the previous value.
    Remove {
        /// Punch id to mutate.
        id: PunchId,
        /// Previous removed flag.
        prev_removed: bool,
        /// Card number of the punch.
        #[serde(default)]
        card_no: CardNo,
    },
}

impl Op {
    /// Punch touched by the op.
    pub fn punch_id(&self) -> PunchId {
        match self {
            Op::Insert { punch } => punch.id,
            Op::Patch { id, .. } | Op::Remove { id, .. } => *id,
        }
    }

    /// Card number of the punch once the op is applied.
    pub fn card_no(&self) -> CardNo {
        match self {
            Op::Insert { punch } => punch.card_no,
            Op::Patch { card_no, .. } | Op::Remove { card_no, .. } => *card_no,
        }
    }

    /// Card number the punch left, for patches that move it between cards.
    pub fn previous_card(&self) -> Option<CardNo> {
        match self {
            Op::Patch { prev, card_no, .. } => prev.card_no.filter(|old| old != card_no),
            _ => None,
        }
    }

    /// Card numbers whose index buckets the op can affect.
    ///
    /// `current` is the card number of the punch after the op was applied.
    pub fn affected_cards(&self, current: CardNo) -> Vec<CardNo> {
        let mut cards = vec![current];
        if let Op::Patch { prev, .. } = self {
            if let Some(old) = prev.card_no {
                if old != current {
                    cards.push(old);
                }
            }
        }
        cards
    }
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: Op,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
