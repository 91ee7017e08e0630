//! Free-order point controls.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    model::course::{Control, RogainingRules},
    punch::Punch,
    types::{ControlId, Time},
};

/// Points collected on a rogaining course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RogainingOutcome {
    /// Net points after time reduction.
    pub points: i32,
    /// Points before reduction.
    pub gross_points: i32,
    /// Points lost for exceeding the time limit.
    pub reduction: i32,
    /// Visited point controls with the punch index and time used.
    pub visited: Vec<(ControlId, usize, Time)>,
    /// Required point controls not visited.
    pub missing_required: Vec<ControlId>,
    /// Net points are below the course minimum.
    pub below_minimum: bool,
}

impl RogainingOutcome {
    /// True when the rogaining part makes the result invalid.
    pub fn is_incomplete(&self) -> bool {
        !self.missing_required.is_empty() || self.below_minimum
    }
}

/// Point slots of one course, keyed by control.
#[derive(Debug, Clone, Default)]
pub struct PointSlots {
    by_code: HashMap<u32, ControlId>,
    slots: Vec<(ControlId, i32, bool)>,
}

impl PointSlots {
    /// Collects the rogaining controls among `controls`; each control forms
    /// one slot no matter how often it appears.
    pub fn new<'a>(controls: impl IntoIterator<Item = &'a Control>) -> Self {
        let mut out = Self::default();
        for ctrl in controls {
            if !ctrl.status.is_rogaining() || out.slots.iter().any(|(id, _, _)| *id == ctrl.id()) {
                continue;
            }
            for code in &ctrl.codes {
                out.by_code.insert(*code, ctrl.id());
            }
            out.slots.push((
                ctrl.id(),
                ctrl.points,
                ctrl.status == crate::model::course::ControlStatus::RogainingRequired,
            ));
        }
        out
    }

    /// True without any point control.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Gathers punches into slots (first punch per slot counts) and scores
    /// them. `used[i]` marks punches consumed by the sequential match.
    pub fn score(
        &self,
        punches: &[Punch],
        used: &[bool],
        running_time: Time,
        rules: Option<&RogainingRules>,
        ticks_per_second: Time,
    ) -> RogainingOutcome {
        let mut taken: HashMap<ControlId, (usize, Time)> = HashMap::new();
        for (i, p) in punches.iter().enumerate() {
            if used.get(i).copied().unwrap_or(false) {
                continue;
            }
            let Some(ctrl) = self.by_code.get(&p.code()) else {
                continue;
            };
            let Some(time) = p.adjusted_time() else {
                continue;
            };
            taken.entry(*ctrl).or_insert((i, time));
        }

        let mut out = RogainingOutcome::default();
        for (id, points, required) in &self.slots {
            match taken.get(id) {
                Some((idx, time)) => {
                    out.gross_points += *points;
                    out.visited.push((*id, *idx, *time));
                }
                None if *required => out.missing_required.push(*id),
                None => {}
            }
        }

        out.reduction = rules
            .map(|r| time_reduction(r, running_time, ticks_per_second))
            .unwrap_or(0);
        out.points = (out.gross_points - out.reduction).max(0);
        out.below_minimum = rules.is_some_and(|r| out.points < r.min_points);
        out
    }
}

/// Points lost for finishing after the time limit, per started minute.
pub fn time_reduction(rules: &RogainingRules, running_time: Time, ticks_per_second: Time) -> i32 {
    let over = running_time - rules.time_limit;
    if over <= 0 || rules.reduction_per_minute <= 0 {
        return 0;
    }
    let minute = 60 * ticks_per_second.max(1);
    let started_minutes = (over + minute - 1) / minute;
    started_minutes.saturating_mul(rules.reduction_per_minute)
}
