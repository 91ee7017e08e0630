use serde::{Deserialize, Serialize};

use crate::{
    model::meta::EntityMeta,
    types::{ControlId, CourseId, Time},
};

/// How a control takes part in course evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ControlStatus {
    /// Normal, required, timed.
    #[default]
    Ok,
    /// Broken unit: not required, ignored.
    Bad,
    /// May be skipped.
    Optional,
    /// Required, but the leg into it is not timed.
    NoTiming,
    /// Broken unit on an untimed leg.
    BadNoTiming,
    /// Free-order point control.
    Rogaining,
    /// Free-order point control that must be visited.
    RogainingRequired,
}

impl ControlStatus {
    /// True when a missing punch makes the result invalid.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Ok | Self::NoTiming)
    }

    /// True for free-order point controls.
    pub fn is_rogaining(self) -> bool {
        matches!(self, Self::Rogaining | Self::RogainingRequired)
    }

    /// True when the leg into the control is excluded from running time.
    pub fn is_untimed(self) -> bool {
        matches!(self, Self::NoTiming | Self::BadNoTiming)
    }
}

/// A physical control point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Identity and change flags.
    pub meta: EntityMeta,
    /// Display name.
    pub name: String,
    /// Punch codes accepted at this control.
    pub codes: Vec<u32>,
    /// Evaluation mode.
    pub status: ControlStatus,
    /// Fixed correction added to punch times (unit clock set wrong).
    pub time_adjust: Time,
    /// Minimum leg time into this control; faster legs are raised to it.
    pub min_time: Time,
    /// Rogaining value.
    pub points: i32,
}

impl Control {
    /// Control id.
    pub fn id(&self) -> ControlId {
        self.meta.id
    }

    /// True when `code` is punched at this control.
    pub fn has_code(&self, code: u32) -> bool {
        self.codes.contains(&code)
    }
}

/// Editable control fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlDraft {
    /// Requested id. Must not collide with reserved punch codes.
    pub id: ControlId,
    /// Display name.
    pub name: String,
    /// Accepted codes. Empty means "same as id".
    pub codes: Vec<u32>,
    /// Evaluation mode.
    pub status: ControlStatus,
    /// Fixed time correction.
    pub time_adjust: Time,
    /// Minimum leg time.
    pub min_time: Time,
    /// Rogaining value.
    pub points: i32,
}

/// Scoring rules for rogaining courses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RogainingRules {
    /// Time limit in ticks; later finishes lose points.
    pub time_limit: Time,
    /// Points lost per started minute over the limit.
    pub reduction_per_minute: i32,
    /// Minimum net points for a valid result.
    pub min_points: i32,
}

/// Ordered control sequence a runner must visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Identity and change flags.
    pub meta: EntityMeta,
    /// Display name.
    pub name: String,
    /// Control ids in running order. Ids may repeat (loops).
    pub controls: Vec<ControlId>,
    /// Course length in meters.
    pub length: u32,
    /// Rogaining scoring, if any.
    pub rogaining: Option<RogainingRules>,
}

impl Course {
    /// Course id.
    pub fn id(&self) -> CourseId {
        self.meta.id
    }

    /// Number of occurrences of `control` on the course.
    pub fn occurrences(&self, control: ControlId) -> usize {
        self.controls.iter().filter(|c| **c == control).count()
    }

    /// True when some control appears more than once.
    pub fn has_loops(&self) -> bool {
        let mut seen = hashbrown::HashSet::new();
        self.controls.iter().any(|c| !seen.insert(*c))
    }
}

/// Course creation payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CourseDraft {
    /// Display name.
    pub name: String,
    /// Control ids in running order.
    pub controls: Vec<ControlId>,
    /// Length in meters.
    pub length: u32,
    /// Rogaining scoring.
    pub rogaining: Option<RogainingRules>,
}
