use orienteer::{
    core::store::{PunchStore, StoreError},
    punch::{FreePunchDraft, FreePunchPatch},
    types::PunchType,
};

fn draft(card_no: u32, code: u32, time: i32) -> FreePunchDraft {
    FreePunchDraft {
        card_no,
        kind: PunchType::Control(code),
        time,
        unit: 7,
    }
}

#[test]
fn insert_yields_monotonic_ids() {
    let mut store = PunchStore::new();
    let (id1, op1) = store.insert(draft(500, 31, 100)).unwrap();
    let (id2, op2) = store.insert(draft(500, 32, 200)).unwrap();
    let (id3, op3) = store.insert(draft(501, 31, 150)).unwrap();

    assert_eq!((id1, id2, id3), (1, 2, 3));
    assert_eq!((op1.seq, op2.seq, op3.seq), (1, 2, 3));
    assert_eq!(store.by_card(500).len(), 2);
}

#[test]
fn patch_undo_redo_restores_exact_state() {
    let mut store = PunchStore::new();
    let (id, _) = store.insert(draft(500, 31, 100)).unwrap();

    let before = store.get(id).unwrap().clone();

    let patch = FreePunchPatch {
        card_no: Some(600),
        time: Some(130),
        ..FreePunchPatch::default()
    };

    store.patch(id, patch).unwrap();
    let after_patch = store.get(id).unwrap().clone();
    assert_ne!(after_patch, before);
    assert!(store.by_card(500).is_empty());
    assert_eq!(store.by_card(600).len(), 1);

    store.undo().unwrap();
    let after_undo = store.get(id).unwrap().clone();
    assert_eq!(after_undo, before);
    assert_eq!(store.by_card(500).len(), 1);

    store.redo().unwrap();
    let after_redo = store.get(id).unwrap().clone();
    assert_eq!(after_redo, after_patch);
}

#[test]
fn remove_is_undoable_and_blocks_edits() {
    let mut store = PunchStore::new();
    let (id, _) = store.insert(draft(500, 31, 100)).unwrap();

    store.remove(id).unwrap();
    assert!(store.get(id).unwrap().is_removed());
    assert!(store.by_card(500).is_empty());
    assert_eq!(
        store.patch(id, FreePunchPatch { time: Some(1), ..FreePunchPatch::default() }),
        Err(StoreError::Removed(id))
    );

    store.undo().unwrap();
    assert!(!store.get(id).unwrap().is_removed());
    assert_eq!(store.live().count(), 1);
}

#[test]
fn new_edit_clears_redo() {
    let mut store = PunchStore::new();
    let (id, _) = store.insert(draft(500, 31, 100)).unwrap();
    store.patch(id, FreePunchPatch { time: Some(110), ..FreePunchPatch::default() }).unwrap();
    store.undo().unwrap();
    assert_eq!(store.redo_len(), 1);

    store.insert(draft(500, 32, 200)).unwrap();
    assert_eq!(store.redo_len(), 0);
    assert_eq!(store.redo(), Err(StoreError::NothingToRedo));
}

#[test]
fn undo_and_redo_are_journaled() {
    let mut store = PunchStore::new();
    let (id, _) = store.insert(draft(500, 31, 100)).unwrap();
    store.patch(id, FreePunchPatch { unit: Some(9), ..FreePunchPatch::default() }).unwrap();
    store.undo().unwrap();
    store.redo().unwrap();

    let seqs: Vec<u64> = store.drain_pending_ops().iter().map(|op| op.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
    assert_eq!(store.latest_op_seq(), 4);
    assert!(store.drain_pending_ops().is_empty());
}

#[test]
fn time_patch_keeps_the_captured_time_recoverable() {
    let mut store = PunchStore::new();
    let (id, _) = store.insert(draft(500, 31, 3725)).unwrap();
    let codec = *store.codec();
    assert!(store.get(id).unwrap().punch.is_original(&codec));

    store.patch(id, FreePunchPatch { time: Some(3700), ..FreePunchPatch::default() }).unwrap();
    let punch = &store.get(id).unwrap().punch;
    assert!(!punch.is_original(&codec));
    assert_eq!(punch.original_time(&codec), Some(3725));
}
