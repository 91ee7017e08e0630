use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use orienteer::{
    competition::Competition,
    config::EngineConfig,
    model::{
        card::CardDraft,
        class::ClassDraft,
        course::{ControlDraft, CourseDraft},
        runner::RunnerDraft,
    },
    op::StoredOp,
    persist::{OpSink, PersistResult},
    punch::{FreePunchDraft, FreePunchPatch, Punch},
    runtime::{
        events::EngineEvent,
        handle::{RuntimeConfig, RuntimeError, spawn_engine},
    },
    types::{OpSeq, PunchType, RunStatus},
};

fn draft(card_no: u32, code: u32, time: i32) -> FreePunchDraft {
    FreePunchDraft {
        card_no,
        kind: PunchType::Control(code),
        time,
        unit: 3,
    }
}

struct SlowSink {
    seen: Arc<Mutex<Vec<OpSeq>>>,
    delay: Duration,
}

impl OpSink for SlowSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        std::thread::sleep(self.delay);
        let mut seen = self.seen.lock().expect("lock");
        for op in ops {
            seen.push(op.seq);
        }
        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }
}

#[tokio::test]
async fn runtime_add_patch_query_and_events_ordered() {
    let handle = spawn_engine(Competition::new(EngineConfig::default()), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    let id = handle.add_punch(draft(500, 31, 100)).await.expect("add");
    handle
        .patch_punch(
            id,
            FreePunchPatch {
                time: Some(110),
                ..FreePunchPatch::default()
            },
        )
        .await
        .expect("patch");

    let punches = handle.card_punches(500).await.expect("query");
    assert_eq!(punches.len(), 1);
    assert_eq!(punches[0].punch.time, 110);

    let mut seen = Vec::new();
    for _ in 0..8 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, EngineEvent::DurableUpTo { .. } | EngineEvent::Changed { .. }) {
            seen.push(evt);
        }
        if seen.len() == 2 {
            break;
        }
    }

    assert_eq!(seen[0], EngineEvent::PunchAdded { id });
    assert_eq!(seen[1], EngineEvent::PunchUpdated { id });

    handle.undo().await.expect("undo");
    let punches = handle.card_punches(500).await.expect("query");
    assert_eq!(punches[0].punch.time, 100);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn edits_and_read_outs_flow_through_the_loop() {
    let handle = spawn_engine(Competition::new(EngineConfig::default()), None, RuntimeConfig::default());

    let (class, runner) = handle
        .edit(|comp| {
            for id in [31, 32] {
                comp.add_control(ControlDraft {
                    id,
                    ..ControlDraft::default()
                })?;
            }
            let course = comp.add_course(CourseDraft {
                name: "A".into(),
                controls: vec![31, 32],
                ..CourseDraft::default()
            })?;
            let class = comp.add_class(ClassDraft {
                name: "H21".into(),
                course: Some(course),
                ..ClassDraft::default()
            })?;
            let runner = comp.add_runner(RunnerDraft {
                name: "Kari".into(),
                class: Some(class),
                card_no: 7001,
                start_time: 0,
                ..RunnerDraft::default()
            })?;
            Ok((class, runner))
        })
        .await
        .expect("setup");

    let mut sub = handle.subscribe();
    let card = handle
        .read_card(CardDraft {
            card_no: 7001,
            punches: vec![
                Punch::manual(PunchType::Control(31), 100),
                Punch::manual(PunchType::Control(32), 250),
                Punch::manual(PunchType::Finish, 300),
            ],
            read_id: 9,
            voltage_mv: Some(2900),
        })
        .await
        .expect("read-out");

    let mut read_event = None;
    for _ in 0..4 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if let EngineEvent::CardRead { .. } = evt {
            read_event = Some(evt);
            break;
        }
    }
    assert_eq!(
        read_event,
        Some(EngineEvent::CardRead {
            card,
            owner: Some(runner)
        })
    );

    let result = handle.runner_result(runner).await.expect("result");
    assert_eq!(result.status, RunStatus::OK);
    assert_eq!(result.running_time, 300);

    let rows = handle.class_results(class).await.expect("class results");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].place, Some(1));

    let splits = handle.split_table(runner, true).await.expect("splits").expect("table");
    assert_eq!(splits.entries.len(), 2);

    let revision = handle.with(|comp| comp.revision()).await.expect("revision");
    assert!(revision > 0);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn durable_event_advances_and_slow_sink_surfaces_queue_pressure() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(250),
    };

    let cfg = RuntimeConfig {
        flush_on_insert: true,
        batch_max_ops: 16,
        batch_max_latency_ms: 500,
        persist_queue_bound: 1,
        snapshot_every_ops: 0,
        compact_after_snapshot: false,
    };

    let handle = spawn_engine(Competition::new(EngineConfig::default()), Some(Box::new(sink)), cfg);
    let mut sub = handle.subscribe();

    let id = handle.add_punch(draft(500, 31, 60)).await.expect("add");
    assert_eq!(id, 1);

    let mut durable_seen = false;
    for _ in 0..5 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        if matches!(evt, EngineEvent::DurableUpTo { .. }) {
            durable_seen = true;
            break;
        }
    }
    assert!(durable_seen, "expected DurableUpTo event");

    let mut queue_error_seen = false;
    for i in 0..12u32 {
        let r = handle.add_punch(draft(600 + i, 31, 60 + i as i32)).await;
        if let Err(RuntimeError::Persist(_)) = r {
            queue_error_seen = true;
            break;
        }
    }
    assert!(queue_error_seen, "expected persistence queue pressure to surface as error");

    handle.shutdown().await.expect("shutdown");
    assert!(!seen.lock().expect("lock").is_empty());
}
