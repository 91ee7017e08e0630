//! Relay aggregation: composing leg results into a team result.
//!
//! Each leg starts when the previous leg finished, subject to the class's
//! restart and rope rules. Leg times add up to the team time; the first leg
//! without a valid result decides the team status.

use serde::{Deserialize, Serialize};

use crate::{
    engine::{status, traits::RunnerResult},
    model::class::Class,
    types::{RunStatus, RunnerId, Time},
};

/// Result of one relay leg within its team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamLegResult {
    /// Leg position, from 0.
    pub leg: usize,
    /// Runner on the leg.
    pub runner: Option<RunnerId>,
    /// Leg start: previous finish, team start or restart.
    pub start_time: Option<Time>,
    /// Leg finish.
    pub finish_time: Option<Time>,
    /// Time spent on this leg.
    pub leg_time: Time,
    /// Accumulated team time after this leg.
    pub total_time: Time,
    /// Leg status.
    pub status: RunStatus,
    /// Team status after this leg.
    pub team_status: RunStatus,
}

/// Computed result of a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamResult {
    /// Final team status.
    pub status: RunStatus,
    /// Status before a manual override.
    pub evaluated_status: RunStatus,
    /// Status set manually.
    pub manual: bool,
    /// Summed team time.
    pub running_time: Time,
    /// Summed rogaining points.
    pub points: i32,
    /// Per-leg breakdown.
    pub legs: Vec<TeamLegResult>,
}

/// Inputs for [`aggregate`] besides the leg results.
#[derive(Debug, Clone, Copy)]
pub struct TeamRules<'a> {
    /// Team class with its leg rules.
    pub class: Option<&'a Class>,
    /// Team start time for the first leg.
    pub start_time: Option<Time>,
    /// Manual team status.
    pub manual_status: Option<RunStatus>,
}

/// Chains `legs` (runner and its result per leg, `None` for an empty leg).
pub fn aggregate(rules: TeamRules<'_>, legs: &[Option<(RunnerId, RunnerResult)>]) -> TeamResult {
    let mut out = Vec::with_capacity(legs.len());
    let mut team_status = RunStatus::OK;
    let mut total: Time = 0;
    let mut points = 0;
    let mut prev_finish: Option<Time> = None;

    for (i, leg) in legs.iter().enumerate() {
        let rule = rules.class.map(|c| c.leg_rule(i)).unwrap_or_default();
        let chained = if i == 0 {
            rules.start_time.or(rule.restart_time)
        } else {
            rule.leg_start(prev_finish)
        };

        let Some((runner, res)) = leg else {
            team_status = status::merge_leg(team_status, RunStatus::Unknown, 0);
            out.push(TeamLegResult {
                leg: i,
                runner: None,
                start_time: chained,
                finish_time: None,
                leg_time: 0,
                total_time: total,
                status: RunStatus::Unknown,
                team_status,
            });
            prev_finish = None;
            continue;
        };

        let start = chained.or(res.start_time);
        let finish = res.finish_time;
        let leg_time = match (start, finish) {
            (Some(s), Some(f)) if f >= s => f - s,
            _ => 0,
        };
        total += leg_time;
        points += res.points;
        team_status = status::merge_leg(team_status, res.status, leg_time);
        out.push(TeamLegResult {
            leg: i,
            runner: Some(*runner),
            start_time: start,
            finish_time: finish,
            leg_time,
            total_time: total,
            status: res.status,
            team_status,
        });
        prev_finish = finish;
    }

    if legs.is_empty() {
        team_status = RunStatus::Unknown;
    }
    let (final_status, source) = status::resolve(rules.manual_status, Some(team_status));
    TeamResult {
        status: final_status,
        evaluated_status: team_status,
        manual: source == status::StatusSource::Manual,
        running_time: total,
        points,
        legs: out,
    }
}
