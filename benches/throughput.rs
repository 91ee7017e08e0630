use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use orienteer::{
    competition::Competition,
    config::EngineConfig,
    core::store::PunchStore,
    model::{
        class::ClassDraft,
        course::{ControlDraft, CourseDraft},
        runner::RunnerDraft,
    },
    punch::{FreePunchDraft, FreePunchPatch},
    types::{ClassId, PunchType},
};

const CONTROLS: [u32; 8] = [31, 32, 33, 34, 35, 36, 37, 38];

fn draft(card_no: u32, kind: PunchType, time: i32) -> FreePunchDraft {
    FreePunchDraft {
        card_no,
        kind,
        time,
        unit: 1,
    }
}

/// `runners` runners on one eight-control course, cards `1..=runners`.
fn competition(runners: u32) -> (Competition, ClassId) {
    let mut comp = Competition::new(EngineConfig::default());
    for id in CONTROLS {
        comp.add_control(ControlDraft {
            id,
            ..ControlDraft::default()
        })
        .expect("control");
    }
    let course = comp
        .add_course(CourseDraft {
            name: "Long".into(),
            controls: CONTROLS.to_vec(),
            ..CourseDraft::default()
        })
        .expect("course");
    let class = comp
        .add_class(ClassDraft {
            name: "H21".into(),
            course: Some(course),
            ..ClassDraft::default()
        })
        .expect("class");
    for i in 1..=runners {
        comp.add_runner(RunnerDraft {
            name: format!("Runner {i}"),
            class: Some(class),
            card_no: i,
            start_time: (i as i32 % 60) * 60,
            ..RunnerDraft::default()
        })
        .expect("runner");
    }
    (comp, class)
}

fn radio_all(comp: &mut Competition, runners: u32) {
    for i in 1..=runners {
        let start = (i as i32 % 60) * 60;
        for (k, code) in CONTROLS.iter().enumerate() {
            let time = start + 300 * (k as i32 + 1) + (i as i32 % 17);
            comp.add_free_punch(draft(i, PunchType::Control(*code), time))
                .expect("punch");
        }
        comp.add_free_punch(draft(i, PunchType::Finish, start + 3000 + i as i32))
            .expect("finish");
    }
}

fn bench_store_inserts(c: &mut Criterion) {
    c.bench_function("store_insert_50k", |b| {
        b.iter(|| {
            let mut store = PunchStore::new();
            for i in 0..50_000u32 {
                let _ = store
                    .insert(draft(i % 500, PunchType::Control(31 + i % 8), i as i32))
                    .expect("insert");
            }
        });
    });
}

fn bench_radio_ingest(c: &mut Criterion) {
    c.bench_function("radio_ingest_500_runners", |b| {
        b.iter(|| {
            let (mut comp, _) = competition(500);
            radio_all(&mut comp, 500);
        });
    });
}

fn bench_punch_time_edits(c: &mut Criterion) {
    c.bench_function("punch_time_edit_2k", |b| {
        let (mut comp, _) = competition(200);
        radio_all(&mut comp, 200);
        let ids: Vec<_> = comp.punches().live().map(|p| p.id).collect();
        b.iter(|| {
            for (n, id) in ids.iter().take(2000).enumerate() {
                let _ = comp
                    .patch_free_punch(
                        *id,
                        FreePunchPatch {
                            time: Some(n as i32),
                            ..FreePunchPatch::default()
                        },
                    )
                    .expect("patch");
            }
        });
    });
}

fn bench_class_results(c: &mut Criterion) {
    let mut group = c.benchmark_group("class_results");
    for runners in [50u32, 500u32] {
        let (mut comp, class) = competition(runners);
        radio_all(&mut comp, runners);

        group.bench_with_input(BenchmarkId::new("cached", runners), &runners, |b, _| {
            b.iter(|| comp.class_results(class).expect("results"));
        });

        group.bench_with_input(BenchmarkId::new("after_one_edit", runners), &runners, |b, _| {
            b.iter(|| {
                comp.set_start_time(1, 0).expect("edit");
                comp.set_start_time(1, 60).expect("edit");
                comp.class_results(class).expect("results")
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_store_inserts,
    bench_radio_ingest,
    bench_punch_time_edits,
    bench_class_results
);
criterion_main!(benches);
