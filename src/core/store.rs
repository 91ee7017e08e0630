use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    model::meta::{EntityMeta, now_ms},
    op::{Op, StoredOp},
    origin::OriginCodec,
    punch::{FreePunch, FreePunchDraft, FreePunchPatch, Punch},
    types::{CardNo, OpSeq, PunchId, Revision},
};

use super::indices::VecIndex;

/// Rejected free-punch store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No punch with this id.
    #[error("punch {0} does not exist")]
    MissingPunch(PunchId),
    /// A replayed insert reused an id.
    #[error("punch {0} already exists")]
    AlreadyExists(PunchId),
    /// The punch is removed and cannot be edited.
    #[error("punch {0} is removed")]
    Removed(PunchId),
    /// Undo stack is empty.
    #[error("nothing to undo")]
    NothingToUndo,
    /// Redo stack is empty.
    #[error("nothing to redo")]
    NothingToRedo,
}

/// Serializable store state written to snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    /// Next id handed out by an insert.
    pub next_punch_id: PunchId,
    /// Next journal sequence.
    pub next_op_seq: OpSeq,
    /// Insertion order.
    pub order: Vec<PunchId>,
    /// Every punch, removed ones included.
    pub records: Vec<FreePunch>,
}

/// Authoritative store of free (online/radio) punches with an op journal and
/// undo/redo.
#[derive(Debug, Default)]
pub struct PunchStore {
    records: HashMap<PunchId, FreePunch>,
    order: Vec<PunchId>,
    by_card: VecIndex<CardNo>,
    undo: Vec<Op>,
    redo: Vec<Op>,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    next_punch_id: PunchId,
    codec: OriginCodec,
}

impl PunchStore {
    /// Empty store with the default origin codec.
    pub fn new() -> Self {
        Self::with_codec(OriginCodec::default())
    }

    /// Empty store checking provenance with `codec`.
    pub fn with_codec(codec: OriginCodec) -> Self {
        Self {
            next_op_seq: 1,
            next_punch_id: 1,
            codec,
            ..Self::default()
        }
    }

    /// Restores a store from a snapshot. Undo history starts empty.
    pub fn from_snapshot(snapshot: StoreSnapshotV1, codec: OriginCodec) -> Result<Self, StoreError> {
        let mut store = Self {
            next_punch_id: snapshot.next_punch_id,
            next_op_seq: snapshot.next_op_seq,
            order: snapshot.order,
            codec,
            ..Self::default()
        };

        for rec in snapshot.records {
            if store.records.contains_key(&rec.id) {
                return Err(StoreError::AlreadyExists(rec.id));
            }
            store.by_card.entry(rec.card_no).or_default().push(rec.id);
            store.records.insert(rec.id, rec);
        }

        Ok(store)
    }

    /// Snapshot of the current state.
    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        let records = self
            .order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect();

        StoreSnapshotV1 {
            next_punch_id: self.next_punch_id,
            next_op_seq: self.next_op_seq,
            order: self.order.clone(),
            records,
        }
    }

    /// Origin codec used for new punches.
    pub fn codec(&self) -> &OriginCodec {
        &self.codec
    }

    /// Inserts a punch. Its origin tag is computed from the captured time.
    pub fn insert(&mut self, draft: FreePunchDraft) -> Result<(PunchId, StoredOp), StoreError> {
        let id = self.next_punch_id;
        self.next_punch_id += 1;

        let punch = FreePunch {
            id,
            card_no: draft.card_no,
            punch: Punch::captured(draft.kind, draft.time, draft.unit, &self.codec),
            meta: EntityMeta::new(0, 0),
        };

        let (stored, inverse) = self.apply_insert(punch)?;
        self.record(stored.clone(), inverse);
        Ok((id, stored))
    }

    /// Applies a sparse patch to a live punch.
    pub fn patch(&mut self, id: PunchId, patch: FreePunchPatch) -> Result<StoredOp, StoreError> {
        if self.records.get(&id).ok_or(StoreError::MissingPunch(id))?.is_removed() {
            return Err(StoreError::Removed(id));
        }
        let (stored, inverse) = self.apply_patch(id, patch)?;
        self.record(stored.clone(), inverse);
        Ok(stored)
    }

    /// Flags a live punch removed.
    pub fn remove(&mut self, id: PunchId) -> Result<StoredOp, StoreError> {
        let prev_removed = self
            .records
            .get(&id)
            .ok_or(StoreError::MissingPunch(id))?
            .is_removed();
        if prev_removed {
            return Err(StoreError::Removed(id));
        }
        let (stored, inverse) = self.apply_remove(id, prev_removed)?;
        self.record(stored.clone(), inverse);
        Ok(stored)
    }

    /// Reverts the latest edit.
    pub fn undo(&mut self) -> Result<StoredOp, StoreError> {
        let op = self.undo.pop().ok_or(StoreError::NothingToUndo)?;
        let (stored, inverse) = self.apply_op(op)?;
        self.redo.push(inverse);
        self.pending_ops.push(stored.clone());
        Ok(stored)
    }

    /// Reapplies the latest undone edit.
    pub fn redo(&mut self) -> Result<StoredOp, StoreError> {
        let op = self.redo.pop().ok_or(StoreError::NothingToRedo)?;
        let (stored, inverse) = self.apply_op(op)?;
        self.undo.push(inverse);
        self.pending_ops.push(stored.clone());
        Ok(stored)
    }

    /// Applies a journaled op keeping its sequence. Clears undo and redo.
    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        let seq = stored.seq;
        match stored.op {
            Op::Insert { punch } => {
                self.apply_insert_with_seq(punch, seq)?;
            }
            Op::Patch { id, patch, .. } => {
                self.apply_patch_with_seq(id, patch, seq)?;
            }
            Op::Remove { id, prev_removed, .. } => {
                self.apply_remove_with_seq(id, prev_removed, seq)?;
            }
        }
        self.undo.clear();
        self.redo.clear();
        Ok(())
    }

    /// Punch by id, removed ones included.
    pub fn get(&self, id: PunchId) -> Option<&FreePunch> {
        self.records.get(&id)
    }

    /// Owned copy of a punch.
    pub fn get_cloned(&self, id: PunchId) -> Option<FreePunch> {
        self.get(id).cloned()
    }

    /// Stamps the data revision of the last durable change on a punch.
    pub fn touch(&mut self, id: PunchId, revision: Revision) {
        if let Some(rec) = self.records.get_mut(&id) {
            rec.meta.touch(revision);
        }
    }

    /// Mutable meta of a punch.
    pub fn meta_mut(&mut self, id: PunchId) -> Option<&mut EntityMeta> {
        self.records.get_mut(&id).map(|r| &mut r.meta)
    }

    /// Most recent `n` live punches in insertion order.
    pub fn recent(&self, n: usize) -> Vec<&FreePunch> {
        let mut out: Vec<&FreePunch> = self
            .order
            .iter()
            .rev()
            .filter_map(|id| self.records.get(id))
            .filter(|p| !p.is_removed())
            .take(n)
            .collect();
        out.reverse();
        out
    }

    /// Live punches recorded for `card_no`, in insertion order.
    pub fn by_card(&self, card_no: CardNo) -> Vec<&FreePunch> {
        self.by_card
            .get(&card_no)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.records.get(id))
            .filter(|p| !p.is_removed())
            .collect()
    }

    /// Owned copies of [`PunchStore::by_card`].
    pub fn by_card_cloned(&self, card_no: CardNo) -> Vec<FreePunch> {
        self.by_card(card_no).into_iter().cloned().collect()
    }

    /// All live punches in insertion order.
    pub fn live(&self) -> impl Iterator<Item = &FreePunch> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|p| !p.is_removed())
    }

    /// Every punch id in insertion order.
    pub fn ordered_ids(&self) -> &[PunchId] {
        &self.order
    }

    /// Number of punches, removed ones included.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no punch was ever inserted.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Takes the ops not yet handed to a journal.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Depth of the undo stack.
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Depth of the redo stack.
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Sequence of the latest op.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn record(&mut self, stored: StoredOp, inverse: Op) {
        self.undo.push(inverse);
        self.redo.clear();
        self.pending_ops.push(stored);
    }

    fn apply_op(&mut self, op: Op) -> Result<(StoredOp, Op), StoreError> {
        match op {
            Op::Insert { punch } => self.apply_insert(punch),
            Op::Patch { id, patch, .. } => self.apply_patch(id, patch),
            Op::Remove { id, prev_removed, .. } => self.apply_remove(id, prev_removed),
        }
    }

    fn apply_insert(&mut self, punch: FreePunch) -> Result<(StoredOp, Op), StoreError> {
        let seq = self.take_next_op_seq();
        self.apply_insert_with_seq(punch, seq)
    }

    fn apply_insert_with_seq(&mut self, mut punch: FreePunch, seq: OpSeq) -> Result<(StoredOp, Op), StoreError> {
        if self.records.contains_key(&punch.id) {
            return Err(StoreError::AlreadyExists(punch.id));
        }

        let id = punch.id;
        punch.meta.id = u32::try_from(id).unwrap_or(u32::MAX);
        self.next_punch_id = self.next_punch_id.max(id.saturating_add(1));
        self.by_card.entry(punch.card_no).or_default().push(id);
        self.order.push(id);
        self.records.insert(id, punch.clone());

        self.bump_next_seq_from(seq);
        let stored = StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::Insert { punch },
        };
        let inverse = Op::Remove {
            id,
            prev_removed: false,
            card_no: stored.op.card_no(),
        };
        Ok((stored, inverse))
    }

    fn apply_patch(&mut self, id: PunchId, patch: FreePunchPatch) -> Result<(StoredOp, Op), StoreError> {
        let seq = self.take_next_op_seq();
        self.apply_patch_with_seq(id, patch, seq)
    }

    fn apply_patch_with_seq(&mut self, id: PunchId, patch: FreePunchPatch, seq: OpSeq) -> Result<(StoredOp, Op), StoreError> {
        let rec = self.records.get_mut(&id).ok_or(StoreError::MissingPunch(id))?;
        let old_card = rec.card_no;

        let prev = patch.capture_inverse_for(rec);
        patch.apply_to(rec);

        let new_card = rec.card_no;
        if new_card != old_card {
            Self::remove_from_vec_index(self.by_card.entry(old_card).or_default(), id);
            self.by_card.entry(new_card).or_default().push(id);
        }

        self.bump_next_seq_from(seq);
        let stored = StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::Patch {
                id,
                patch: patch.clone(),
                prev: prev.clone(),
                card_no: new_card,
            },
        };
        let inverse = Op::Patch {
            id,
            patch: prev,
            prev: patch,
            card_no: old_card,
        };
        Ok((stored, inverse))
    }

    fn apply_remove(&mut self, id: PunchId, prev_removed: bool) -> Result<(StoredOp, Op), StoreError> {
        let seq = self.take_next_op_seq();
        self.apply_remove_with_seq(id, prev_removed, seq)
    }

    fn apply_remove_with_seq(&mut self, id: PunchId, prev_removed: bool, seq: OpSeq) -> Result<(StoredOp, Op), StoreError> {
        let (new_removed, card_no) = {
            let rec = self.records.get_mut(&id).ok_or(StoreError::MissingPunch(id))?;
            rec.meta.removed = !prev_removed;
            (rec.meta.removed, rec.card_no)
        };

        self.bump_next_seq_from(seq);
        let stored = StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::Remove {
                id,
                prev_removed,
                card_no,
            },
        };
        let inverse = Op::Remove {
            id,
            prev_removed: new_removed,
            card_no,
        };
        Ok((stored, inverse))
    }

    fn remove_from_vec_index(v: &mut Vec<PunchId>, id: PunchId) {
        if let Some(pos) = v.iter().position(|x| *x == id) {
            v.remove(pos);
        }
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}
