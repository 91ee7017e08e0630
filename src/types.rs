//! Shared primitive IDs, time representation, and competition enums.

use serde::{Deserialize, Serialize};

/// Monotonic free-punch identifier.
pub type PunchId = u64;
/// Monotonic operation sequence number.
pub type OpSeq = u64;
/// Data revision used to stamp computed values.
pub type Revision = u64;
/// Runner identifier.
pub type RunnerId = u32;
/// Team identifier.
pub type TeamId = u32;
/// Read-out card identifier.
pub type CardId = u32;
/// Course identifier.
pub type CourseId = u32;
/// Control identifier. Ids `1..=3` are reserved for start, finish and check.
pub type ControlId = u32;
/// Class (category) identifier.
pub type ClassId = u32;
/// Club identifier.
pub type ClubId = u32;
/// Physical card (chip) number.
pub type CardNo = u32;
/// Index of a parallel race for multi-runners (relay legs, re-runs).
pub type RaceIndex = u32;
/// Time in ticks since zero time. One tick is one second, or a tenth of a
/// second when sub-second timing is enabled.
pub type Time = i32;

/// Sentinel for "not punched" / unknown time.
pub const NO_TIME: Time = -1;

/// Punch code of a start punch.
pub const START_CODE: u32 = 1;
/// Punch code of a finish punch.
pub const FINISH_CODE: u32 = 2;
/// Punch code of a check punch.
pub const CHECK_CODE: u32 = 3;
/// Marker code written on hired cards.
pub const HIRED_CARD_CODE: u32 = 11111;

/// Key under which finish-related changes are tracked in class dirty markers.
pub const FINISH_CONTROL: ControlId = FINISH_CODE;

/// Returns true when `time` holds a punched time.
pub fn has_time(time: Time) -> bool {
    time >= 0
}

/// Kind of a single punch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PunchType {
    /// Start unit.
    Start,
    /// Finish unit.
    Finish,
    /// Check unit (card cleared/checked before start).
    Check,
    /// Hired-card marker.
    HiredCard,
    /// Numbered course control.
    Control(u32),
}

impl PunchType {
    /// Maps a raw punch code to its type.
    pub fn from_code(code: u32) -> Self {
        match code {
            START_CODE => Self::Start,
            FINISH_CODE => Self::Finish,
            CHECK_CODE => Self::Check,
            HIRED_CARD_CODE => Self::HiredCard,
            other => Self::Control(other),
        }
    }

    /// Raw punch code.
    pub fn code(self) -> u32 {
        match self {
            Self::Start => START_CODE,
            Self::Finish => FINISH_CODE,
            Self::Check => CHECK_CODE,
            Self::HiredCard => HIRED_CARD_CODE,
            Self::Control(code) => code,
        }
    }

    /// True for numbered course controls.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Control(_))
    }
}

/// Reportable competition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RunStatus {
    /// Not yet determined.
    #[default]
    Unknown,
    /// Valid result.
    OK,
    /// Did not start.
    DidNotStart,
    /// Entry cancelled.
    Cancelled,
    /// Runs, but outside the official ranking.
    OutOfCompetition,
    /// One or more required controls missing.
    MissingPunch,
    /// Started but no finish.
    DidNotFinish,
    /// Disqualified.
    Disqualified,
    /// Finished beyond the maximum allowed time.
    OverMaxTime,
    /// Finished in a class without timing.
    NoTiming,
    /// Registered but not competing.
    NotCompeting,
}

impl RunStatus {
    /// Every status value, in declaration order.
    pub const ALL: [RunStatus; 11] = [
        RunStatus::Unknown,
        RunStatus::OK,
        RunStatus::DidNotStart,
        RunStatus::Cancelled,
        RunStatus::OutOfCompetition,
        RunStatus::MissingPunch,
        RunStatus::DidNotFinish,
        RunStatus::Disqualified,
        RunStatus::OverMaxTime,
        RunStatus::NoTiming,
        RunStatus::NotCompeting,
    ];

    /// True for statuses that still carry a time when one exists.
    pub fn is_possible_result(self) -> bool {
        matches!(self, Self::NoTiming | Self::OutOfCompetition)
    }

    /// Short code used in result lists.
    pub fn short_code(self) -> &'static str {
        match self {
            Self::Unknown => "-",
            Self::OK => "OK",
            Self::DidNotStart => "DNS",
            Self::Cancelled => "CANC",
            Self::OutOfCompetition => "OOC",
            Self::MissingPunch => "MP",
            Self::DidNotFinish => "DNF",
            Self::Disqualified => "DSQ",
            Self::OverMaxTime => "OT",
            Self::NoTiming => "NT",
            Self::NotCompeting => "NC",
        }
    }
}
