//! Runtime event stream payloads.

use crate::types::{CardId, OpSeq, PunchId, Revision, RunnerId};

/// Events emitted from the single-writer engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A free punch was recorded.
    PunchAdded {
        /// New punch id.
        id: PunchId,
    },
    /// A free punch was edited.
    PunchUpdated {
        /// Edited punch id.
        id: PunchId,
    },
    /// A free punch was removed.
    PunchRemoved {
        /// Removed punch id.
        id: PunchId,
    },
    /// A card was read out.
    CardRead {
        /// Stored card id.
        card: CardId,
        /// Runner the card was assigned to, if any.
        owner: Option<RunnerId>,
    },
    /// One undo step was applied.
    UndoApplied,
    /// One redo step was applied.
    RedoApplied,
    /// Competition data moved to a new revision; cached results may be stale.
    Changed {
        /// New data revision.
        revision: Revision,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
