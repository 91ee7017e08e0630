use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::{ControlId, FINISH_CODE, PunchId, RaceIndex};

/// Secondary index from a key to punch ids.
pub type VecIndex<K> = HashMap<K, Vec<PunchId>>;

/// Multiplier separating the race index from the control id in a hash type.
pub const RACE_STRIDE: i64 = 100_000_000;

/// Outer key of the punch index: a matched control on a race, or a raw punch
/// code for unmatched punches (always race 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashType(i64);

impl HashType {
    /// Key of a punch matched to `control` on `race`.
    pub fn matched(control: ControlId, race: RaceIndex) -> Self {
        Self(i64::from(control) + i64::from(race) * RACE_STRIDE)
    }

    /// Key of a punch that could not be matched to a course control.
    pub fn unmatched(code: u32) -> Self {
        Self(i64::from(code))
    }

    /// Fixed key of finish punches.
    pub fn finish() -> Self {
        Self::unmatched(FINISH_CODE)
    }

    /// Raw encoded value.
    pub fn raw(self) -> i64 {
        self.0
    }

    /// Control id (or raw code) part.
    pub fn control(self) -> ControlId {
        ControlId::try_from(self.0.rem_euclid(RACE_STRIDE)).unwrap_or(0)
    }

    /// Race part.
    pub fn race(self) -> RaceIndex {
        RaceIndex::try_from(self.0.div_euclid(RACE_STRIDE)).unwrap_or(0)
    }

    /// `(control, race)` pair.
    pub fn decode(self) -> (ControlId, RaceIndex) {
        (self.control(), self.race())
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (control, race) = self.decode();
        write!(f, "{control}@{race}")
    }
}
