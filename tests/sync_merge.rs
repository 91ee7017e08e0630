use orienteer::{
    competition::Competition,
    config::EngineConfig,
    model::{
        EntityKind,
        card::CardDraft,
        class::ClassDraft,
        course::{ControlDraft, CourseDraft},
        runner::RunnerDraft,
    },
    persist::sync::{MemoryBackend, SyncBackend},
    punch::Punch,
    types::{PunchType, RunStatus, RunnerId},
};

/// One site that has entered a course, a class and a runner and read the
/// runner's card.
fn origin_site() -> (Competition, RunnerId) {
    let mut comp = Competition::new(EngineConfig::default());
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
            name: "H21".into(),
            course: Some(course),
            ..ClassDraft::default()
        })
        .expect("class");
    let runner = comp
        .add_runner(RunnerDraft {
            name: "Ada".into(),
            class: Some(class),
            card_no: 5001,
            start_time: 0,
            ..RunnerDraft::default()
        })
        .expect("runner");
    comp.read_card(CardDraft {
        card_no: 5001,
        punches: vec![
            Punch::manual(PunchType::Control(31), 120),
            Punch::manual(PunchType::Control(32), 240),
            Punch::manual(PunchType::Finish, 360),
        ],
        read_id: 1,
        voltage_mv: None,
    })
    .expect("read-out");
    (comp, runner)
}

#[test]
fn committed_changes_reach_another_site() {
    let mut backend = MemoryBackend::new();
    let (mut site_a, runner) = origin_site();

    let pushed = site_a.commit_changes(&mut backend).expect("commit");
    assert_eq!(pushed.pushed, 6);
    assert_eq!(pushed.skipped, 0);
    assert_eq!(backend.len(), 6);
    assert_eq!(site_a.commit_changes(&mut backend).expect("recommit").pushed, 0);

    let mut site_b = Competition::new(EngineConfig::default());
    let pulled = site_b.pull(&backend, 0).expect("pull");
    assert_eq!(pulled.taken, 6);
    assert_eq!(pulled.latest, backend.latest_stamp());

    let result = site_b.runner_result(runner).expect("result");
    assert_eq!(result.status, RunStatus::OK);
    assert_eq!(result.running_time, 360);
    assert_eq!(site_b.data().runners_with_card_no(5001), vec![runner]);
    assert_eq!(site_b.commit_changes(&mut backend).expect("nothing to push").pushed, 0);
}

#[test]
fn pulled_edit_invalidates_the_cached_result() {
    let mut backend = MemoryBackend::new();
    let (mut site_a, runner) = origin_site();
    site_a.commit_changes(&mut backend).expect("commit");

    let mut site_b = Competition::new(EngineConfig::default());
    let since = site_b.pull(&backend, 0).expect("pull").latest;
    assert_eq!(site_b.runner_running_time(runner).expect("time"), 360);

    site_a.set_start_time(runner, 60).expect("edit");
    site_a.commit_changes(&mut backend).expect("commit edit");

    let pulled = site_b.pull(&backend, since).expect("pull edit");
    assert_eq!(pulled.taken, 1);
    assert!(!site_b.is_runner_cached(runner));
    assert_eq!(site_b.runner_running_time(runner).expect("time"), 300);
}

#[test]
fn later_durable_edit_wins_and_stale_push_is_skipped() {
    let mut backend = MemoryBackend::new();
    let (mut site_a, runner) = origin_site();
    site_a.commit_changes(&mut backend).expect("commit");
    let mut site_b = Competition::new(EngineConfig::default());
    let since = site_b.pull(&backend, 0).expect("pull").latest;

    site_b.set_start_time(runner, 30).expect("edit b");
    site_a.set_start_time(runner, 60).expect("edit a");
    site_a.commit_changes(&mut backend).expect("commit a");

    let report = site_b.commit_changes(&mut backend).expect("commit b");
    assert_eq!(report.pushed, 0);
    assert_eq!(report.skipped, 1);

    let pulled = site_b.pull(&backend, since).expect("pull");
    assert_eq!(pulled.taken, 1);
    assert_eq!(site_b.data().runner(runner).map(|r| r.start_time), Some(60));
    assert_eq!(site_b.runner_running_time(runner).expect("time"), 300);
}

#[test]
fn taken_identity_is_not_pushed() {
    let mut backend = MemoryBackend::new();
    let mut site_a = Competition::new(EngineConfig::default());
    let mut site_b = Competition::new(EngineConfig::default());
    let club_a = site_a.add_club("OK Linné");
    let club_b = site_b.add_club("IFK Lidingö");
    assert_eq!(club_a, club_b);

    assert_eq!(site_a.commit_changes(&mut backend).expect("commit a").pushed, 1);
    let report = site_b.commit_changes(&mut backend).expect("commit b");
    assert_eq!(report.skipped, 1);
    assert!(backend.fetch(EntityKind::Club, club_a).is_some());
    assert!(site_b.data().club(club_b).is_some_and(|c| c.meta.changed));
}

#[test]
fn quiet_voltage_reading_stays_local_and_yields_to_remote_edit() {
    let mut backend = MemoryBackend::new();
    let (mut site_a, runner) = origin_site();
    site_a.commit_changes(&mut backend).expect("commit");
    let card = site_a.data().runner(runner).and_then(|r| r.card).expect("card");

    let mut site_b = Competition::new(EngineConfig::default());
    let since = site_b.pull(&backend, 0).expect("pull").latest;
    assert_eq!(site_b.runner_running_time(runner).expect("time"), 360);

    site_b.set_card_voltage(card, Some(2800)).expect("voltage");
    let meta = &site_b.data().card(card).expect("card").meta;
    assert!(meta.quiet_changed && !meta.changed);
    assert!(site_b.is_runner_cached(runner));
    assert_eq!(site_b.commit_changes(&mut backend).expect("commit b").pushed, 0);

    site_a.set_card_punch_time_text(card, 2, "6:30").expect("edit finish");
    site_a.commit_changes(&mut backend).expect("commit a");

    let pulled = site_b.pull(&backend, since).expect("pull edit");
    assert_eq!(pulled.taken, 1);
    let taken = site_b.data().card(card).expect("card");
    assert_eq!(taken.voltage_mv, None);
    assert!(!taken.meta.is_dirty());
    assert_eq!(site_b.runner_running_time(runner).expect("time"), 390);
}
