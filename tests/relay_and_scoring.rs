use orienteer::{
    competition::{Competition, EditError},
    config::EngineConfig,
    engine::traits::PointsAsTimeBonus,
    model::{
        card::CardDraft,
        class::{ClassDraft, LegRule},
        course::{ControlDraft, ControlStatus, CourseDraft, RogainingRules},
        runner::RunnerDraft,
        team::TeamDraft,
    },
    punch::{FreePunchDraft, Punch},
    types::{CardNo, ClassId, NO_TIME, PunchType, RunStatus, RunnerId, TeamId, Time},
};

fn control(comp: &mut Competition, id: u32, status: ControlStatus, points: i32) {
    comp.add_control(ControlDraft {
        id,
        status,
        points,
        ..ControlDraft::default()
    })
    .expect("control");
}

fn runner(comp: &mut Competition, name: &str, class: ClassId, card_no: CardNo, start_time: Time) -> RunnerId {
    comp.add_runner(RunnerDraft {
        name: name.into(),
        class: Some(class),
        card_no,
        start_time,
        ..RunnerDraft::default()
    })
    .expect("runner")
}

fn read(comp: &mut Competition, card_no: CardNo, punches: &[(PunchType, Time)]) {
    comp.read_card(CardDraft {
        card_no,
        punches: punches.iter().map(|(k, t)| Punch::manual(*k, *t)).collect(),
        read_id: u64::from(card_no),
        voltage_mv: None,
    })
    .expect("read-out");
}

struct Relay {
    comp: Competition,
    class: ClassId,
    teams: Vec<TeamId>,
    runners: Vec<RunnerId>,
}

/// Two legs: leg 1 runs 31-32, leg 2 runs 33. Leg 2 restarts at 2000 for
/// handovers after 1800.
fn relay() -> Relay {
    let mut comp = Competition::new(EngineConfig::default());
    for id in [31, 32, 33] {
        control(&mut comp, id, ControlStatus::Ok, 0);
    }
    let first = comp
        .add_course(CourseDraft {
            name: "Leg 1".into(),
            controls: vec![31, 32],
            ..CourseDraft::default()
        })
        .expect("course");
    let second = comp
        .add_course(CourseDraft {
            name: "Leg 2".into(),
            controls: vec![33],
            ..CourseDraft::default()
        })
        .expect("course");
    let class = comp
        .add_class(ClassDraft {
            name: "Relay".into(),
            course: Some(first),
            legs: vec![
                LegRule::default(),
                LegRule {
                    course: Some(second),
                    restart_time: Some(2000),
                    rope_time: Some(1800),
                },
            ],
            ..ClassDraft::default()
        })
        .expect("class");

    let mut teams = Vec::new();
    let mut runners = Vec::new();
    for (i, name) in ["Alpha", "Bravo", "Charlie"].into_iter().enumerate() {
        let team = comp
            .add_team(TeamDraft {
                name: name.into(),
                class: Some(class),
                leg_count: 2,
                start_time: 0,
                ..TeamDraft::default()
            })
            .expect("team");
        for leg in 0..2 {
            let card_no = (10 * (i + 1) + leg) as CardNo;
            let r = runner(&mut comp, &format!("{name} {}", leg + 1), class, card_no, NO_TIME);
            comp.set_team_leg(team, leg, Some(r)).expect("leg");
            runners.push(r);
        }
        teams.push(team);
    }

    // Alpha: clean handover at 1000.
    read(&mut comp, 10, &[(PunchType::Control(31), 300), (PunchType::Control(32), 600), (PunchType::Finish, 1000)]);
    read(&mut comp, 11, &[(PunchType::Control(33), 1300), (PunchType::Finish, 1500)]);
    // Bravo: first leg after the rope, second leg restarts at 2000.
    read(&mut comp, 20, &[(PunchType::Control(31), 400), (PunchType::Control(32), 1000), (PunchType::Finish, 1900)]);
    read(&mut comp, 21, &[(PunchType::Control(33), 2100), (PunchType::Finish, 2300)]);
    // Charlie: first leg misses 32.
    read(&mut comp, 30, &[(PunchType::Control(31), 300), (PunchType::Finish, 900)]);
    read(&mut comp, 31, &[(PunchType::Control(33), 1200), (PunchType::Finish, 1400)]);

    Relay {
        comp,
        class,
        teams,
        runners,
    }
}

#[test]
fn relay_legs_chain_and_rope_restarts() {
    let Relay { mut comp, teams, .. } = relay();

    let alpha = comp.team_result(teams[0]).expect("alpha");
    assert_eq!(alpha.status, RunStatus::OK);
    assert_eq!(alpha.legs[1].start_time, Some(1000));
    assert_eq!(alpha.running_time, 1500);

    let bravo = comp.team_result(teams[1]).expect("bravo");
    assert_eq!(bravo.legs[1].start_time, Some(2000));
    assert_eq!(bravo.legs[1].leg_time, 300);
    assert_eq!(bravo.running_time, 2200);

    let charlie = comp.team_result(teams[2]).expect("charlie");
    assert_eq!(charlie.status, RunStatus::MissingPunch);
    assert_eq!(charlie.legs[1].team_status, RunStatus::MissingPunch);

    assert_eq!(comp.team_place(teams[0]).expect("place"), Some(1));
    assert_eq!(comp.team_place(teams[1]).expect("place"), Some(2));
    assert_eq!(comp.team_place(teams[2]).expect("place"), None);
}

#[test]
fn leg_course_comes_from_the_team_class() {
    let Relay { mut comp, runners, .. } = relay();
    let second_leg = comp.split_table(runners[1]).expect("splits").expect("table");
    let controls: Vec<u32> = second_leg.entries.iter().map(|e| e.control).collect();
    assert_eq!(controls, vec![33]);
    assert_eq!(comp.runner_status(runners[1]).expect("status"), RunStatus::OK);
}

#[test]
fn leg_override_reranks_teams_and_spares_the_others() {
    let Relay {
        mut comp,
        class,
        teams,
        runners,
    } = relay();
    let before = comp.team_class_results(class).expect("results");
    assert_eq!(before.last().map(|r| r.status), Some(RunStatus::MissingPunch));

    comp.set_manual_status(runners[4], Some(RunStatus::OK)).expect("override");
    assert!(comp.is_team_cached(teams[0]));
    assert!(!comp.is_team_cached(teams[2]));

    let charlie = comp.team_result(teams[2]).expect("charlie");
    assert_eq!(charlie.status, RunStatus::OK);
    assert_eq!(charlie.running_time, 1400);
    assert_eq!(comp.team_place(teams[2]).expect("place"), Some(1));
    assert_eq!(comp.team_place(teams[0]).expect("place"), Some(2));

    comp.set_team_manual_status(teams[1], Some(RunStatus::Disqualified))
        .expect("team override");
    let rows = comp.team_class_results(class).expect("results");
    assert_eq!(rows.last().map(|r| r.status), Some(RunStatus::Disqualified));
    assert_eq!(comp.recompute_team(teams[1]).expect("recompute"), comp.team_result(teams[1]).expect("cached"));
}

#[test]
fn runner_cannot_run_for_two_teams() {
    let Relay {
        mut comp,
        teams,
        runners,
        ..
    } = relay();
    let err = comp.set_team_leg(teams[1], 0, Some(runners[0])).unwrap_err();
    assert_eq!(
        err,
        EditError::RunnerInOtherTeam {
            runner: runners[0],
            team: teams[0]
        }
    );

    comp.set_team_leg(teams[0], 0, None).expect("clear leg");
    let alpha = comp.team_result(teams[0]).expect("alpha");
    assert_eq!(alpha.legs[0].runner, None);
    assert_eq!(alpha.status, RunStatus::Unknown);
}

fn rogaining() -> (Competition, ClassId, [RunnerId; 3]) {
    let mut comp = Competition::new(EngineConfig::default());
    control(&mut comp, 101, ControlStatus::Rogaining, 10);
    control(&mut comp, 102, ControlStatus::Rogaining, 20);
    control(&mut comp, 103, ControlStatus::Rogaining, 30);
    let course = comp
        .add_course(CourseDraft {
            name: "Score".into(),
            controls: vec![101, 102, 103],
            rogaining: Some(RogainingRules {
                time_limit: 3600,
                reduction_per_minute: 2,
                min_points: 0,
            }),
            ..CourseDraft::default()
        })
        .expect("course");
    let class = comp
        .add_class(ClassDraft {
            name: "Score".into(),
            course: Some(course),
            ..ClassDraft::default()
        })
        .expect("class");

    let a = runner(&mut comp, "Anna", class, 1, 0);
    let b = runner(&mut comp, "Bo", class, 2, 0);
    let c = runner(&mut comp, "Cleo", class, 3, 0);
    read(&mut comp, 1, &[(PunchType::Control(102), 600), (PunchType::Control(101), 1200), (PunchType::Finish, 3000)]);
    read(
        &mut comp,
        2,
        &[
            (PunchType::Control(101), 500),
            (PunchType::Control(102), 1500),
            (PunchType::Control(103), 2500),
            (PunchType::Finish, 3700),
        ],
    );
    read(&mut comp, 3, &[(PunchType::Control(101), 300), (PunchType::Finish, 700)]);
    (comp, class, [a, b, c])
}

#[test]
fn rogaining_ranks_by_points_after_overtime_reduction() {
    let (mut comp, _, [a, b, c]) = rogaining();

    assert_eq!(comp.runner_points(a).expect("points"), 30);
    assert_eq!(comp.runner_points(b).expect("points"), 56);
    assert_eq!(comp.runner_status(b).expect("status"), RunStatus::OK);

    assert_eq!(comp.runner_place(b).expect("place"), Some(1));
    assert_eq!(comp.runner_place(a).expect("place"), Some(2));
    assert_eq!(comp.runner_place(c).expect("place"), Some(3));
}

#[test]
fn result_module_swap_recomputes_and_reranks() {
    let (mut comp, class, [a, b, c]) = rogaining();
    comp.class_results(class).expect("warm");

    comp.set_result_module(Some(Box::new(PointsAsTimeBonus {
        key: "points-bonus".into(),
        ticks_per_point: 60,
    })));
    assert!(!comp.is_runner_cached(a));

    assert_eq!(comp.runner_running_time(a).expect("time"), 1200);
    assert_eq!(comp.runner_result_raw(a).expect("raw").running_time, 3000);
    assert_eq!(comp.runner_place(c).expect("place"), Some(1));
    assert_eq!(comp.runner_place(b).expect("place"), Some(2));
    assert_eq!(comp.runner_place(a).expect("place"), Some(3));

    comp.set_result_module(None);
    assert_eq!(comp.runner_place(b).expect("place"), Some(1));
}

#[test]
fn radio_punches_evaluate_without_a_read_out() {
    let mut comp = Competition::new(EngineConfig::default());
    for id in [31, 32] {
        control(&mut comp, id, ControlStatus::Ok, 0);
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
            name: "D35".into(),
            course: Some(course),
            ..ClassDraft::default()
        })
        .expect("class");
    let r = runner(&mut comp, "Vera", class, 900, 0);
    let other = runner(&mut comp, "Wim", class, 901, 0);

    let radio = |comp: &mut Competition, card_no: CardNo, kind: PunchType, time: Time| {
        comp.add_free_punch(FreePunchDraft {
            card_no,
            kind,
            time,
            unit: 5,
        })
        .expect("punch")
    };

    let first = radio(&mut comp, 900, PunchType::Control(31), 100);
    radio(&mut comp, 900, PunchType::Control(32), 200);
    assert_eq!(comp.runner_status(r).expect("status"), RunStatus::DidNotFinish);
    assert_eq!(comp.split_place(r, 31).expect("split"), Some(1));

    let matched = comp.punch_match(first).expect("filed");
    assert_eq!(matched.owner, Some(r));
    assert_eq!(matched.slot.map(|s| s.control), Some(31));
    assert_eq!(comp.active_controls(), vec![(31, 0), (32, 0)]);

    comp.runner_result(other).expect("other");
    radio(&mut comp, 900, PunchType::Finish, 300);
    assert!(comp.is_runner_cached(other));
    assert_eq!(comp.runner_status(r).expect("status"), RunStatus::OK);
    assert_eq!(comp.runner_running_time(r).expect("time"), 300);

    let card = comp.construct_card(r).expect("card");
    let built = comp.data().card(card).expect("stored");
    assert!(built.from_punches);
    assert_eq!(built.punches.len(), 3);
    assert_eq!(comp.runner_running_time(r).expect("time"), 300);
    assert_eq!(
        comp.construct_card(r).unwrap_err(),
        EditError::CardOwned { card, owner: r }
    );
}
