//! Card evaluation: matching punches against a course.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    engine::{
        rogaining::{PointSlots, RogainingOutcome},
        splits::{SplitEntry, SplitStatus, SplitTable, leg_keys},
        status,
    },
    model::course::{Control, Course},
    punch::Punch,
    types::{ControlId, PunchType, RunStatus, Time, has_time},
};

/// Everything the evaluator reads.
#[derive(Debug, Clone, Copy)]
pub struct EvalInput<'a> {
    /// Punches in recorded order.
    pub punches: &'a [Punch],
    /// Course to match against.
    pub course: Option<&'a Course>,
    /// Control definitions.
    pub controls: &'a HashMap<ControlId, Control>,
    /// Start-list start time, used without a start punch.
    pub start_time: Time,
    /// Manual finish time, used without a finish punch.
    pub finish_time: Time,
    /// Class publishes results without times.
    pub no_timing: bool,
    /// Maximum running time.
    pub max_time: Option<Time>,
    /// Timing resolution.
    pub ticks_per_second: Time,
}

/// Outcome of matching one card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CardEvaluation {
    /// Per-position split data in course order.
    pub splits: SplitTable,
    /// Course position matched by each punch.
    pub matched: Vec<Option<usize>>,
    /// Control punches that matched nothing.
    pub unmatched: Vec<usize>,
    /// Required controls without a punch, in course order.
    pub missing: Vec<ControlId>,
    /// Start time used.
    pub start_time: Option<Time>,
    /// Adjusted finish time.
    pub finish_time: Option<Time>,
    /// Running time in ticks (0 when unknown).
    pub running_time: Time,
    /// Rogaining score, for courses with point controls.
    pub rogaining: Option<RogainingOutcome>,
    /// Evaluated status.
    pub status: RunStatus,
}

/// Matches `input.punches` against the course and computes splits, running
/// time and status.
///
/// Sequential controls are matched greedily in course order, each search
/// starting after the previously matched punch. Point controls are collected
/// out of sequence from the punches left over.
pub fn evaluate_card(input: &EvalInput<'_>) -> CardEvaluation {
    let punches = input.punches;
    let n = punches.len();
    let mut matched: Vec<Option<usize>> = vec![None; n];
    let mut used = vec![false; n];

    let start_punch = punches
        .iter()
        .position(|p| p.kind == PunchType::Start && p.has_time());
    if let Some(i) = start_punch {
        used[i] = true;
    }
    let start = start_punch
        .and_then(|i| punches[i].adjusted_time())
        .or_else(|| has_time(input.start_time).then_some(input.start_time));

    let course_controls: &[ControlId] = input.course.map(|c| c.controls.as_slice()).unwrap_or(&[]);
    let sequential: Vec<(usize, ControlId)> = course_controls
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, id)| !input.controls.get(id).is_some_and(|c| c.status.is_rogaining()))
        .collect();
    let seq_ids: Vec<ControlId> = sequential.iter().map(|(_, id)| *id).collect();
    let keys = leg_keys(&seq_ids);

    let mut cursor = 0usize;
    let mut dyn_adjust: Time = 0;
    let mut prev_adj = start;
    let mut entries = Vec::with_capacity(sequential.len());
    let mut missing = Vec::new();

    for ((k, ctrl_id), key) in sequential.iter().copied().zip(keys) {
        let ctrl = input.controls.get(&ctrl_id);
        let found = ctrl.and_then(|c| {
            (cursor..n).find(|&j| {
                !used[j] && matches!(punches[j].kind, PunchType::Control(code) if c.has_code(code))
            })
        });

        let (Some(ctrl), Some(j)) = (ctrl, found) else {
            if ctrl.is_none_or(|c| c.status.is_required()) {
                missing.push(ctrl_id);
            }
            entries.push(SplitEntry {
                course_index: k,
                control: ctrl_id,
                key,
                status: SplitStatus::Missing,
                punch_time: None,
                adjusted: None,
            });
            continue;
        };

        used[j] = true;
        matched[j] = Some(k);
        cursor = j + 1;

        let punch_time = punches[j].adjusted_time();
        let (status, adjusted) = match punch_time {
            None => (SplitStatus::NoTime, None),
            Some(t) => {
                let fixed = t + ctrl.time_adjust;
                let leg = prev_adj.map(|p| fixed + dyn_adjust - p);
                let split_status = if ctrl.status.is_untimed() {
                    if let Some(l) = leg {
                        dyn_adjust -= l;
                    }
                    SplitStatus::NoTime
                } else {
                    if let Some(l) = leg {
                        if ctrl.min_time > 0 && l < ctrl.min_time {
                            dyn_adjust += ctrl.min_time - l;
                        }
                    }
                    SplitStatus::Ok
                };
                let adjusted = fixed + dyn_adjust;
                prev_adj = Some(adjusted);
                (split_status, Some(adjusted))
            }
        };

        entries.push(SplitEntry {
            course_index: k,
            control: ctrl_id,
            key,
            status,
            punch_time,
            adjusted,
        });
    }

    let finish_punch = punches
        .iter()
        .rposition(|p| p.kind == PunchType::Finish && p.has_time());
    if let Some(i) = finish_punch {
        used[i] = true;
    }
    let finish_raw = finish_punch
        .and_then(|i| punches[i].adjusted_time())
        .or_else(|| has_time(input.finish_time).then_some(input.finish_time));
    let finish = finish_raw.map(|f| f + dyn_adjust);

    let running_time = match (start, finish) {
        (Some(s), Some(f)) if f >= s => f - s,
        _ => 0,
    };

    let slots = PointSlots::new(course_controls.iter().filter_map(|id| input.controls.get(id)));
    let rogaining = (!slots.is_empty()).then(|| {
        slots.score(
            punches,
            &used,
            running_time,
            input.course.and_then(|c| c.rogaining.as_ref()),
            input.ticks_per_second,
        )
    });
    if let Some(r) = &rogaining {
        for (_, idx, _) in &r.visited {
            used[*idx] = true;
        }
    }

    let unmatched = punches
        .iter()
        .enumerate()
        .filter(|(i, p)| !used[*i] && p.kind.is_control())
        .map(|(i, _)| i)
        .collect();

    let evaluated = if !missing.is_empty() || rogaining.as_ref().is_some_and(RogainingOutcome::is_incomplete) {
        RunStatus::MissingPunch
    } else if finish.is_none() {
        RunStatus::DidNotFinish
    } else if input.max_time.is_some_and(|m| running_time > m) {
        RunStatus::OverMaxTime
    } else {
        status::apply_class_rules(RunStatus::OK, input.no_timing)
    };

    CardEvaluation {
        splits: SplitTable {
            start,
            finish,
            entries,
        },
        matched,
        unmatched,
        missing,
        start_time: start,
        finish_time: finish,
        running_time,
        rogaining,
        status: evaluated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::splits::LegSplit,
        model::{course::ControlStatus, meta::EntityMeta},
        types::NO_TIME,
    };

    fn control(id: ControlId, status: ControlStatus) -> Control {
        Control {
            meta: EntityMeta::new(id, 0),
            name: String::new(),
            codes: vec![id],
            status,
            time_adjust: 0,
            min_time: 0,
            points: 0,
        }
    }

    fn course(controls: &[ControlId]) -> Course {
        Course {
            meta: EntityMeta::new(1, 0),
            name: "A".into(),
            controls: controls.to_vec(),
            length: 0,
            rogaining: None,
        }
    }

    fn p(kind: PunchType, time: Time) -> Punch {
        Punch::manual(kind, time)
    }

    fn input<'a>(punches: &'a [Punch], course: &'a Course, controls: &'a HashMap<ControlId, Control>) -> EvalInput<'a> {
        EvalInput {
            punches,
            course: Some(course),
            controls,
            start_time: NO_TIME,
            finish_time: NO_TIME,
            no_timing: false,
            max_time: None,
            ticks_per_second: 1,
        }
    }

    #[test]
    fn no_timing_leg_is_neutralized() {
        let mut controls = HashMap::new();
        controls.insert(31, control(31, ControlStatus::Ok));
        controls.insert(32, control(32, ControlStatus::NoTiming));
        let c = course(&[31, 32]);
        let punches = [
            p(PunchType::Start, 0),
            p(PunchType::Control(31), 100),
            p(PunchType::Control(32), 400),
            p(PunchType::Finish, 450),
        ];
        let eval = evaluate_card(&input(&punches, &c, &controls));
        assert_eq!(eval.status, RunStatus::OK);
        assert_eq!(eval.running_time, 150);
        assert_eq!(
            eval.splits.leg_times(),
            vec![LegSplit::Time(100), LegSplit::NoTime, LegSplit::Time(50)]
        );
    }

    #[test]
    fn min_time_and_fixed_offset_adjust_legs() {
        let mut controls = HashMap::new();
        let mut c31 = control(31, ControlStatus::Ok);
        c31.time_adjust = -20;
        let mut c32 = control(32, ControlStatus::Ok);
        c32.min_time = 90;
        controls.insert(31, c31);
        controls.insert(32, c32);
        let c = course(&[31, 32]);
        let punches = [
            p(PunchType::Start, 0),
            p(PunchType::Control(31), 120),
            p(PunchType::Control(32), 150),
            p(PunchType::Finish, 200),
        ];
        let eval = evaluate_card(&input(&punches, &c, &controls));
        assert_eq!(eval.splits.entries[0].adjusted, Some(100));
        assert_eq!(eval.splits.entries[0].punch_time, Some(120));
        assert_eq!(eval.splits.entries[1].adjusted, Some(190));
        assert_eq!(eval.running_time, 240);
    }

    #[test]
    fn bad_control_is_not_required() {
        let mut controls = HashMap::new();
        controls.insert(31, control(31, ControlStatus::Bad));
        controls.insert(32, control(32, ControlStatus::Ok));
        let c = course(&[31, 32]);
        let punches = [
            p(PunchType::Start, 0),
            p(PunchType::Control(32), 100),
            p(PunchType::Finish, 200),
        ];
        let eval = evaluate_card(&input(&punches, &c, &controls));
        assert_eq!(eval.status, RunStatus::OK);
        assert!(eval.missing.is_empty());
        assert_eq!(eval.splits.entries[0].status, SplitStatus::Missing);
    }

    #[test]
    fn no_finish_is_dnf_and_extra_punches_are_unmatched() {
        let mut controls = HashMap::new();
        controls.insert(31, control(31, ControlStatus::Ok));
        let c = course(&[31]);
        let punches = [
            p(PunchType::Start, 0),
            p(PunchType::Control(77), 50),
            p(PunchType::Control(31), 100),
        ];
        let eval = evaluate_card(&input(&punches, &c, &controls));
        assert_eq!(eval.status, RunStatus::DidNotFinish);
        assert_eq!(eval.unmatched, vec![1]);
        assert_eq!(eval.matched, vec![None, None, Some(0)]);
    }

    #[test]
    fn punched_without_time_is_no_time() {
        let mut controls = HashMap::new();
        controls.insert(31, control(31, ControlStatus::Ok));
        let c = course(&[31]);
        let punches = [
            p(PunchType::Start, 0),
            p(PunchType::Control(31), NO_TIME),
            p(PunchType::Finish, 200),
        ];
        let eval = evaluate_card(&input(&punches, &c, &controls));
        assert_eq!(eval.splits.entries[0].status, SplitStatus::NoTime);
        assert_eq!(eval.status, RunStatus::OK);
        assert_eq!(eval.running_time, 200);
    }
}
