//! Competition entities.

use serde::{Deserialize, Serialize};

/// Read-out cards.
pub mod card;
/// Classes, leg rules and dirty markers.
pub mod class;
/// Controls and courses.
pub mod course;
/// Identity, timestamps and change flags.
pub mod meta;
/// Individual runners.
pub mod runner;
/// Teams.
pub mod team;

use self::meta::EntityMeta;

/// Club a runner or team represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Club {
    /// Identity and change flags.
    pub meta: EntityMeta,
    /// Display name.
    pub name: String,
}

/// Entity kinds known to the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// [`runner::Runner`].
    Runner,
    /// [`team::Team`].
    Team,
    /// [`card::Card`].
    Card,
    /// [`crate::punch::FreePunch`].
    Punch,
    /// [`course::Course`].
    Course,
    /// [`course::Control`].
    Control,
    /// [`class::Class`].
    Class,
    /// [`Club`].
    Club,
}
