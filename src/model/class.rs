use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    model::meta::EntityMeta,
    types::{ClassId, ControlId, CourseId, Revision, Time},
};

/// Relay/multi-leg rule for one leg of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LegRule {
    /// Course run on this leg, overriding the class course.
    pub course: Option<CourseId>,
    /// Mass restart time for runners not yet sent out.
    pub restart_time: Option<Time>,
    /// Handover closes at this time; later finishes send the next leg at the
    /// restart time instead.
    pub rope_time: Option<Time>,
}

impl LegRule {
    /// Start time of this leg given the predecessor's finish.
    pub fn leg_start(&self, prev_finish: Option<Time>) -> Option<Time> {
        match (self.restart_time, self.rope_time, prev_finish) {
            (Some(restart), Some(rope), Some(fin)) if fin > rope => Some(restart),
            (Some(restart), _, None) => Some(restart),
            (_, _, fin) => fin,
        }
    }
}

/// Category-level change markers used to decide when class-wide standings
/// must be rebuilt.
///
/// A marker keyed by a control invalidates standings at that control and the
/// overall standings; the coarse marker invalidates everything in the class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DirtyMarkers {
    any: Revision,
    coarse: Revision,
    per_control: HashMap<ControlId, Revision>,
}

impl DirtyMarkers {
    /// Marks a change at `control`, or a class-wide change for `None`.
    pub fn mark(&mut self, control: Option<ControlId>, revision: Revision) {
        self.any = self.any.max(revision);
        match control {
            Some(c) => {
                let slot = self.per_control.entry(c).or_insert(0);
                *slot = (*slot).max(revision);
            }
            None => self.coarse = self.coarse.max(revision),
        }
    }

    /// True when standings keyed by `control` (overall for `None`) computed at
    /// `stamp` are stale.
    pub fn is_dirty_since(&self, control: Option<ControlId>, stamp: Revision) -> bool {
        match control {
            None => self.any > stamp,
            Some(c) => {
                self.coarse > stamp || self.per_control.get(&c).is_some_and(|r| *r > stamp)
            }
        }
    }

    /// Latest revision at which anything was marked.
    pub fn latest(&self) -> Revision {
        self.any
    }
}

/// Ranking category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    /// Identity and change flags.
    pub meta: EntityMeta,
    /// Display name.
    pub name: String,
    /// Default course for the class.
    pub course: Option<CourseId>,
    /// Results are published without times.
    pub no_timing: bool,
    /// Maximum running time in ticks.
    pub max_time: Option<Time>,
    /// Per-leg rules for team classes.
    pub legs: Vec<LegRule>,
    /// Standings invalidation markers.
    pub dirty: DirtyMarkers,
}

impl Class {
    /// Class id.
    pub fn id(&self) -> ClassId {
        self.meta.id
    }

    /// Rule for `leg`, or the default rule when none is configured.
    pub fn leg_rule(&self, leg: usize) -> LegRule {
        self.legs.get(leg).copied().unwrap_or_default()
    }

    /// Course for `leg`, falling back to the class course.
    pub fn course_for_leg(&self, leg: usize) -> Option<CourseId> {
        self.legs.get(leg).and_then(|r| r.course).or(self.course)
    }
}

/// Class creation payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassDraft {
    /// Display name.
    pub name: String,
    /// Default course.
    pub course: Option<CourseId>,
    /// Results without times.
    pub no_timing: bool,
    /// Maximum running time.
    pub max_time: Option<Time>,
    /// Per-leg rules.
    pub legs: Vec<LegRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_marker_leaves_other_controls_clean() {
        let mut m = DirtyMarkers::default();
        m.mark(Some(31), 5);
        assert!(m.is_dirty_since(Some(31), 4));
        assert!(!m.is_dirty_since(Some(32), 4));
        assert!(m.is_dirty_since(None, 4));
        assert!(!m.is_dirty_since(None, 5));
        m.mark(None, 7);
        assert!(m.is_dirty_since(Some(32), 5));
    }

    #[test]
    fn rope_sends_late_legs_at_restart() {
        let rule = LegRule {
            course: None,
            restart_time: Some(5000),
            rope_time: Some(4800),
        };
        assert_eq!(rule.leg_start(Some(4700)), Some(4700));
        assert_eq!(rule.leg_start(Some(4900)), Some(5000));
        assert_eq!(rule.leg_start(None), Some(5000));
        assert_eq!(LegRule::default().leg_start(Some(100)), Some(100));
    }
}
