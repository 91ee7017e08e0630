use serde::{Deserialize, Serialize};

use crate::{
    engine::{
        status,
        team::TeamResult,
        evaluate::CardEvaluation,
    },
    types::{ClassId, RunStatus, RunnerId, TeamId, Time},
};

/// Cache key of one result-bearing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKey {
    /// Individual runner.
    Runner(RunnerId),
    /// Relay team.
    Team(TeamId),
}

/// Read access shared by runner and team results.
pub trait ResultView {
    /// Final status.
    fn status(&self) -> RunStatus;
    /// Running time in ticks.
    fn running_time(&self) -> Time;
    /// Rogaining points.
    fn points(&self) -> i32;

    /// True when the status and time form a result.
    fn has_result(&self) -> bool {
        status::has_result(self.status(), self.running_time())
    }

    /// True when the entry takes a place.
    fn is_ranked(&self) -> bool {
        status::is_ranked(self.status(), self.running_time())
    }
}

/// Computed result of one runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerResult {
    /// Final status.
    pub status: RunStatus,
    /// Status before a manual override.
    pub evaluated_status: Option<RunStatus>,
    /// Status set manually.
    pub manual: bool,
    /// Effective start.
    pub start_time: Option<Time>,
    /// Effective finish.
    pub finish_time: Option<Time>,
    /// Running time, 0 without start or finish.
    pub running_time: Time,
    /// Rogaining points after reductions.
    pub points: i32,
    /// Ranked by points.
    pub rogaining: bool,
    /// Card evaluation; `None` without card data.
    pub evaluation: Option<CardEvaluation>,
}

impl ResultView for RunnerResult {
    fn status(&self) -> RunStatus {
        self.status
    }

    fn running_time(&self) -> Time {
        self.running_time
    }

    fn points(&self) -> i32 {
        self.points
    }
}

impl ResultView for TeamResult {
    fn status(&self) -> RunStatus {
        self.status
    }

    fn running_time(&self) -> Time {
        self.running_time
    }

    fn points(&self) -> i32 {
        self.points
    }
}

/// Something that is ranked within a class and computed from scratch by
/// [`Competitor::apply`].
pub trait Competitor {
    /// Computed result.
    type Output: ResultView + Clone + PartialEq;
    /// Data the result is computed from.
    type Context<'a>;

    /// Cache key.
    fn entry(&self) -> EntryKey;
    /// Class the entry is ranked in.
    fn class(&self) -> Option<ClassId>;
    /// Computes the result from scratch.
    fn apply(&self, ctx: &Self::Context<'_>) -> Self::Output;
}

/// Pluggable scoring layered over the built-in evaluation.
///
/// Results computed under one module are recomputed once a module with a
/// different [`ResultModule::key`] is installed.
pub trait ResultModule: Send + Sync + 'static {
    /// Stable key; cached results are tagged with it.
    fn key(&self) -> &str;
    /// Adjusts a built-in runner result.
    fn adjust_runner(&self, raw: &RunnerResult) -> RunnerResult;

    /// Adjusts a built-in team result. Unchanged by default.
    fn adjust_team(&self, raw: &TeamResult) -> TeamResult {
        raw.clone()
    }
}

/// Converts rogaining points into a time bonus: every point takes
/// `ticks_per_point` off the running time. Runners are then ranked by time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsAsTimeBonus {
    /// Module key.
    pub key: String,
    /// Bonus per point.
    pub ticks_per_point: Time,
}

impl ResultModule for PointsAsTimeBonus {
    fn key(&self) -> &str {
        &self.key
    }

    fn adjust_runner(&self, raw: &RunnerResult) -> RunnerResult {
        let mut out = raw.clone();
        if raw.running_time > 0 {
            let bonus = raw.points.saturating_mul(self.ticks_per_point);
            out.running_time = (raw.running_time - bonus).max(1);
        }
        out.rogaining = false;
        out
    }
}
