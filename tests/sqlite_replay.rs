use tempfile::TempDir;

use orienteer::{
    competition::Competition,
    config::EngineConfig,
    core::store::PunchStore,
    model::{
        class::ClassDraft,
        course::{ControlDraft, CourseDraft},
        runner::RunnerDraft,
    },
    origin::OriginCodec,
    persist::{OpSink, sqlite::SqliteOpSink},
    punch::{FreePunchDraft, FreePunchPatch},
    types::{PunchType, RunStatus},
};

fn draft(card_no: u32, kind: PunchType, time: i32) -> FreePunchDraft {
    FreePunchDraft {
        card_no,
        kind,
        time,
        unit: 1,
    }
}

#[test]
fn sqlite_replay_round_trips_state_and_order() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("ops.db");

    let mut store = PunchStore::new();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");

    let (id1, _) = store.insert(draft(500, PunchType::Control(31), 100)).expect("insert1");
    let (id2, _) = store.insert(draft(501, PunchType::Control(31), 120)).expect("insert2");
    store
        .patch(
            id1,
            FreePunchPatch {
                time: Some(105),
                ..FreePunchPatch::default()
            },
        )
        .expect("patch");
    store.remove(id2).expect("remove");

    let ops = store.drain_pending_ops();
    sink.append_ops(&ops).expect("append");

    drop(sink);

    let sink2 = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = sink2.load_store(OriginCodec::default()).expect("replay");

    let orig = store.export_snapshot();
    let replay = replayed.export_snapshot();
    assert_eq!(orig.order, replay.order);
    assert_eq!(orig.records, replay.records);
    assert_eq!(replayed.latest_op_seq(), store.latest_op_seq());
}

#[test]
fn snapshot_and_compaction_preserve_replay() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("snap.db");

    let mut store = PunchStore::new();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");

    for i in 0..10u32 {
        let _ = store
            .insert(draft(500 + i, PunchType::Control(31), 60 * i as i32))
            .expect("insert");
    }
    sink.append_ops(&store.drain_pending_ops()).expect("append");

    let snapshot = store.export_snapshot();
    let last_seq = store.latest_op_seq();
    sink.write_snapshot(&snapshot, last_seq).expect("snapshot");
    let removed = sink.compact_through(last_seq).expect("compact");
    assert_eq!(removed, 10);

    let (late, _) = store.insert(draft(777, PunchType::Finish, 900)).expect("insert after snapshot");
    sink.append_ops(&store.drain_pending_ops()).expect("append tail");

    drop(sink);

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = reopened.load_store(OriginCodec::default()).expect("replay");

    assert_eq!(replayed.export_snapshot().order, store.export_snapshot().order);
    assert_eq!(replayed.export_snapshot().records, store.export_snapshot().records);
    assert_eq!(replayed.get(late).map(|p| p.card_no), Some(777));
}

#[test]
fn events_are_queryable_by_card() {
    let mut store = PunchStore::new();
    let mut sink = SqliteOpSink::open_in_memory().expect("open");

    let (a, _) = store.insert(draft(500, PunchType::Control(31), 100)).expect("insert");
    let (b, _) = store.insert(draft(501, PunchType::Control(31), 110)).expect("insert");
    store
        .patch(
            a,
            FreePunchPatch {
                time: Some(105),
                ..FreePunchPatch::default()
            },
        )
        .expect("time");
    store.remove(a).expect("remove");
    store.undo().expect("undo remove");
    store
        .patch(
            a,
            FreePunchPatch {
                card_no: Some(501),
                ..FreePunchPatch::default()
            },
        )
        .expect("move");
    store
        .patch(
            b,
            FreePunchPatch {
                kind: Some(PunchType::Finish),
                ..FreePunchPatch::default()
            },
        )
        .expect("kind");
    sink.append_ops(&store.drain_pending_ops()).expect("append");

    let seqs = |card| -> Vec<u64> {
        sink.events_for_card(card)
            .expect("query")
            .into_iter()
            .map(|op| op.seq)
            .collect()
    };
    assert_eq!(seqs(500), vec![1, 3, 4, 5, 6]);
    assert_eq!(seqs(501), vec![2, 6, 7]);
    assert!(seqs(502).is_empty());
    assert_eq!(sink.latest_seq().expect("seq"), 7);
}

#[test]
fn restored_punches_drive_results() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("race.db");
    let config = EngineConfig::default();

    let setup = |comp: &mut Competition| {
        for id in [31, 32] {
            comp.add_control(ControlDraft {
                id,
                ..ControlDraft::default()
            })
            .expect("control");
        }
        let course = comp
            .add_course(CourseDraft {
                name: "A".into(),
                controls: vec![31, 32],
                ..CourseDraft::default()
            })
            .expect("course");
        let class = comp
            .add_class(ClassDraft {
                name: "D21".into(),
                course: Some(course),
                ..ClassDraft::default()
            })
            .expect("class");
        comp.add_runner(RunnerDraft {
            name: "Ines".into(),
            class: Some(class),
            card_no: 4242,
            start_time: 0,
            ..RunnerDraft::default()
        })
        .expect("runner")
    };

    let mut live = Competition::new(config.clone());
    let runner = setup(&mut live);
    let mut sink = SqliteOpSink::open(&db_path).expect("open");
    for (kind, time) in [
        (PunchType::Control(31), 200),
        (PunchType::Control(32), 410),
        (PunchType::Finish, 500),
    ] {
        live.add_free_punch(draft(4242, kind, time)).expect("punch");
    }
    sink.append_ops(&live.drain_pending_ops()).expect("append");
    assert_eq!(live.runner_status(runner).expect("status"), RunStatus::OK);
    drop(sink);

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    let store = reopened.load_store(OriginCodec::for_config(&config)).expect("replay");
    let mut restored = Competition::with_punch_store(config, store);
    let runner = setup(&mut restored);

    let result = restored.runner_result(runner).expect("result");
    assert_eq!(result.status, RunStatus::OK);
    assert_eq!(result.running_time, 500);
    assert_eq!(restored.card_punches(4242).len(), 3);
}
