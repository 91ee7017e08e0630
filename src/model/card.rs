use serde::{Deserialize, Serialize};

use crate::{
    model::meta::EntityMeta,
    punch::Punch,
    types::{CardId, CardNo, PunchType, RunnerId, Time},
};

/// Punches read from one competitor's chip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Identity and change flags.
    pub meta: EntityMeta,
    /// Chip number.
    pub card_no: CardNo,
    /// Punches in recorded order.
    pub punches: Vec<Punch>,
    /// Read-out identifier used to drop repeated downloads.
    pub read_id: u64,
    /// Battery voltage in millivolts, when reported.
    pub voltage_mv: Option<u32>,
    /// Runner currently owning the card (back-reference by id).
    pub owner: Option<RunnerId>,
    /// Card was synthesized from free punches rather than read out.
    pub from_punches: bool,
}

impl Card {
    /// Card id.
    pub fn id(&self) -> CardId {
        self.meta.id
    }

    /// Time of the first start punch.
    pub fn start_time(&self) -> Option<Time> {
        self.punches
            .iter()
            .find(|p| p.kind == PunchType::Start && p.has_time())
            .and_then(Punch::adjusted_time)
    }

    /// Time of the last finish punch.
    pub fn finish_time(&self) -> Option<Time> {
        self.punches
            .iter()
            .rev()
            .find(|p| p.kind == PunchType::Finish && p.has_time())
            .and_then(Punch::adjusted_time)
    }
}

/// Read-out payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CardDraft {
    /// Chip number.
    pub card_no: CardNo,
    /// Punches in recorded order.
    pub punches: Vec<Punch>,
    /// Read-out identifier.
    pub read_id: u64,
    /// Battery voltage in millivolts.
    pub voltage_mv: Option<u32>,
}
