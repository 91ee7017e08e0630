//! Status precedence and result predicates.

use crate::types::{RunStatus, Time};

/// Where a reported status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// Set by hand; always wins.
    Manual,
    /// Produced by card evaluation.
    Evaluated,
    /// Neither available.
    Default,
}

/// Merges a manual override with the card-evaluation outcome.
///
/// Manual wins, then evaluation, then [`RunStatus::Unknown`].
pub fn resolve(manual: Option<RunStatus>, evaluated: Option<RunStatus>) -> (RunStatus, StatusSource) {
    match (manual, evaluated) {
        (Some(s), _) => (s, StatusSource::Manual),
        (None, Some(s)) => (s, StatusSource::Evaluated),
        (None, None) => (RunStatus::Unknown, StatusSource::Default),
    }
}

/// True when the runner has a result that may be shown with a time.
///
/// Possible-result statuses only count with a positive running time.
pub fn has_result(status: RunStatus, running_time: Time) -> bool {
    match status {
        RunStatus::OK => true,
        s if s.is_possible_result() => running_time > 0,
        _ => false,
    }
}

/// True when the result takes part in the ranking.
pub fn is_ranked(status: RunStatus, running_time: Time) -> bool {
    status == RunStatus::OK && running_time > 0
}

/// Applies class-level rules to an evaluated OK status.
pub fn apply_class_rules(status: RunStatus, no_timing: bool) -> RunStatus {
    if status == RunStatus::OK && no_timing {
        RunStatus::NoTiming
    } else {
        status
    }
}

/// Team status after adding one leg, given the status so far.
///
/// The first non-OK leg decides; a leg without a result keeps the team
/// [`RunStatus::Unknown`] unless an earlier leg already failed.
pub fn merge_leg(team_so_far: RunStatus, leg: RunStatus, leg_time: Time) -> RunStatus {
    if team_so_far != RunStatus::OK {
        return team_so_far;
    }
    if leg == RunStatus::OK || has_result(leg, leg_time) {
        if leg.is_possible_result() { leg } else { RunStatus::OK }
    } else {
        leg
    }
}
