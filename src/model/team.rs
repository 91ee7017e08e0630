use serde::{Deserialize, Serialize};

use crate::{
    model::meta::EntityMeta,
    types::{CardId, ClassId, ClubId, CourseId, RunStatus, RunnerId, TeamId, Time, NO_TIME},
};

/// Relay or team entry composed of runner legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Identity and change flags.
    pub meta: EntityMeta,
    /// Display name.
    pub name: String,
    /// Club reference.
    pub club: Option<ClubId>,
    /// Class reference.
    pub class: Option<ClassId>,
    /// Runner per leg; `None` marks a gap while editing.
    pub legs: Vec<Option<RunnerId>>,
    /// Card carried by the team as a whole.
    pub card: Option<CardId>,
    /// Course for the team card.
    pub course: Option<CourseId>,
    /// First-leg start time, or [`NO_TIME`].
    pub start_time: Time,
    /// Manually set team status.
    pub manual_status: Option<RunStatus>,
}

impl Team {
    /// Team id.
    pub fn id(&self) -> TeamId {
        self.meta.id
    }

    /// Runner on `leg`, if any.
    pub fn leg_runner(&self, leg: usize) -> Option<RunnerId> {
        self.legs.get(leg).copied().flatten()
    }
}

/// Team creation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamDraft {
    /// Display name.
    pub name: String,
    /// Club.
    pub club: Option<ClubId>,
    /// Class.
    pub class: Option<ClassId>,
    /// Number of legs to reserve.
    pub leg_count: usize,
    /// First-leg start time.
    pub start_time: Time,
}

impl Default for TeamDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            club: None,
            class: None,
            leg_count: 0,
            start_time: NO_TIME,
        }
    }
}
