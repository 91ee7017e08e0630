use serde::{Deserialize, Serialize};

use crate::{
    model::meta::EntityMeta,
    types::{CardId, CardNo, ClassId, ClubId, CourseId, RaceIndex, RunStatus, RunnerId, TeamId, Time, NO_TIME},
};

/// Individual competitor entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    /// Identity and change flags.
    pub meta: EntityMeta,
    /// Display name.
    pub name: String,
    /// Club reference.
    pub club: Option<ClubId>,
    /// Class reference.
    pub class: Option<ClassId>,
    /// Explicitly assigned course, overriding the class course.
    pub course: Option<CourseId>,
    /// Read-out card currently owned.
    pub card: Option<CardId>,
    /// Card number expected from this runner (0 for none).
    pub card_no: CardNo,
    /// Start time from the start list, or [`NO_TIME`].
    pub start_time: Time,
    /// Manually entered finish time, or [`NO_TIME`].
    pub finish_time: Time,
    /// Manually set status; always wins over evaluation.
    pub manual_status: Option<RunStatus>,
    /// Team membership and leg index.
    pub team: Option<(TeamId, usize)>,
    /// Parallel race index among multi-runners of one entry.
    pub race: RaceIndex,
}

impl Runner {
    /// Runner id.
    pub fn id(&self) -> RunnerId {
        self.meta.id
    }

    /// True when the runner can be found by card number.
    pub fn has_card_no(&self) -> bool {
        self.card_no != 0 && !self.meta.removed
    }
}

/// Runner creation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerDraft {
    /// Display name.
    pub name: String,
    /// Club.
    pub club: Option<ClubId>,
    /// Class.
    pub class: Option<ClassId>,
    /// Explicit course.
    pub course: Option<CourseId>,
    /// Expected card number (0 for none).
    pub card_no: CardNo,
    /// Start time.
    pub start_time: Time,
    /// Parallel race index.
    pub race: RaceIndex,
}

impl Default for RunnerDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            club: None,
            class: None,
            course: None,
            card_no: 0,
            start_time: NO_TIME,
            race: 0,
        }
    }
}
