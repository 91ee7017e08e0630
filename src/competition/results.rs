//! Result queries. Everything here reads through the result cache and
//! recomputes lazily.

use std::borrow::Cow;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    config::EngineConfig,
    core::{
        punch_index::{Classification, PunchIndex},
        store::PunchStore,
    },
    engine::{
        cache::{Computed, StandingKind, Standings},
        evaluate::{EvalInput, evaluate_card},
        splits::{CanonicalLayout, SplitTable},
        status,
        team::{TeamResult, TeamRules, aggregate},
        traits::{Competitor, EntryKey, ResultView, RunnerResult},
    },
    model::{runner::Runner, team::Team},
    punch::{FreePunch, Punch},
    types::{CardNo, ClassId, ControlId, PunchId, RaceIndex, RunStatus, RunnerId, TeamId, Time, has_time},
};

use super::{Competition, EditError, data::EntityData, rejected};

/// What a runner's result is computed from.
pub struct RunnerContext<'a> {
    /// Entity tables.
    pub data: &'a EntityData,
    /// Free punches.
    pub punches: &'a PunchStore,
    /// Built punch index.
    pub index: &'a PunchIndex,
    /// Engine configuration.
    pub config: &'a EngineConfig,
}

/// What a team's result is computed from: the runner context for a team
/// card, and the already computed leg results.
pub struct TeamContext<'a> {
    /// Context for evaluating a team card.
    pub runner: RunnerContext<'a>,
    /// Leg results in leg order; `None` for an empty leg.
    pub legs: &'a [Option<(RunnerId, RunnerResult)>],
}

impl Competitor for Runner {
    type Output = RunnerResult;
    type Context<'a> = RunnerContext<'a>;

    fn entry(&self) -> EntryKey {
        EntryKey::Runner(self.id())
    }

    fn class(&self) -> Option<ClassId> {
        self.class
    }

    fn apply(&self, ctx: &RunnerContext<'_>) -> RunnerResult {
        let data = ctx.data;
        let class = self.class.and_then(|c| data.class(c));
        let punches: Cow<'_, [Punch]> = match self.card.and_then(|c| data.card(c)) {
            Some(card) => Cow::Borrowed(&card.punches),
            None if self.card_no != 0 => {
                Cow::Owned(owned_punches(ctx.index, ctx.punches, self.card_no, self.id()))
            }
            None => Cow::Owned(Vec::new()),
        };

        let evaluation = (!punches.is_empty() || has_time(self.finish_time)).then(|| {
            evaluate_card(&EvalInput {
                punches: &punches,
                course: data.course_for(self),
                controls: &data.controls,
                start_time: self.start_time,
                finish_time: self.finish_time,
                no_timing: class.is_some_and(|c| c.no_timing),
                max_time: class.and_then(|c| c.max_time).or(ctx.config.default_max_time()),
                ticks_per_second: ctx.config.ticks_per_second(),
            })
        });

        let evaluated = evaluation.as_ref().map(|e| e.status);
        let (status, source) = status::resolve(self.manual_status, evaluated);
        let points = evaluation
            .as_ref()
            .and_then(|e| e.rogaining.as_ref())
            .map(|r| r.points)
            .unwrap_or(0);
        RunnerResult {
            status,
            evaluated_status: evaluated,
            manual: source == status::StatusSource::Manual,
            start_time: evaluation
                .as_ref()
                .and_then(|e| e.start_time)
                .or_else(|| has_time(self.start_time).then_some(self.start_time)),
            finish_time: evaluation.as_ref().and_then(|e| e.finish_time),
            running_time: evaluation.as_ref().map(|e| e.running_time).unwrap_or(0),
            points,
            rogaining: evaluation.as_ref().is_some_and(|e| e.rogaining.is_some()),
            evaluation,
        }
    }
}

impl Competitor for Team {
    type Output = TeamResult;
    type Context<'a> = TeamContext<'a>;

    fn entry(&self) -> EntryKey {
        EntryKey::Team(self.id())
    }

    fn class(&self) -> Option<ClassId> {
        self.class
    }

    fn apply(&self, ctx: &TeamContext<'_>) -> TeamResult {
        let data = ctx.runner.data;
        let class = self.class.and_then(|c| data.class(c));
        let Some(card) = self.card.and_then(|c| data.card(c)) else {
            return aggregate(
                TeamRules {
                    class,
                    start_time: has_time(self.start_time).then_some(self.start_time),
                    manual_status: self.manual_status,
                },
                ctx.legs,
            );
        };

        let course = self
            .course
            .or_else(|| class.and_then(|c| c.course_for_leg(0)))
            .and_then(|c| data.course(c));
        let config = ctx.runner.config;
        let eval = evaluate_card(&EvalInput {
            punches: &card.punches,
            course,
            controls: &data.controls,
            start_time: self.start_time,
            finish_time: crate::types::NO_TIME,
            no_timing: class.is_some_and(|c| c.no_timing),
            max_time: class.and_then(|c| c.max_time).or(config.default_max_time()),
            ticks_per_second: config.ticks_per_second(),
        });
        let (status, source) = status::resolve(self.manual_status, Some(eval.status));
        TeamResult {
            status,
            evaluated_status: eval.status,
            manual: source == status::StatusSource::Manual,
            running_time: eval.running_time,
            points: eval.rogaining.as_ref().map(|r| r.points).unwrap_or(0),
            legs: Vec::new(),
        }
    }
}

/// Free punches of `card_no` the index attributes to `runner`, in time order.
pub(crate) fn owned_punches(index: &PunchIndex, store: &PunchStore, card_no: CardNo, runner: RunnerId) -> Vec<Punch> {
    let mut out: Vec<(Time, PunchId, Punch)> = index
        .card_members(card_no)
        .iter()
        .filter(|id| index.match_of(**id).is_some_and(|c| c.owner == Some(runner)))
        .filter_map(|id| store.get(*id))
        .map(|p| (p.punch.time, p.id, p.punch.clone()))
        .collect();
    out.sort_by_key(|(time, id, _)| (*time, *id));
    out.into_iter().map(|(_, _, p)| p).collect()
}

/// One line of a class result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Runner or team.
    pub entry: EntryKey,
    /// Display name.
    pub name: String,
    /// Place, `None` when not ranked.
    pub place: Option<u32>,
    /// Final status.
    pub status: RunStatus,
    /// Running time.
    pub running_time: Time,
    /// Rogaining points.
    pub points: i32,
}

impl Competition {
    /// Runner result after the result module.
    pub fn runner_result(&mut self, id: RunnerId) -> Result<RunnerResult, EditError> {
        Ok(self.runner_computed(id)?.value)
    }

    /// Runner result of the built-in evaluation.
    pub fn runner_result_raw(&mut self, id: RunnerId) -> Result<RunnerResult, EditError> {
        Ok(self.runner_computed(id)?.raw)
    }

    /// Status after the result module.
    pub fn runner_status(&mut self, id: RunnerId) -> Result<RunStatus, EditError> {
        Ok(self.runner_computed(id)?.value.status)
    }

    /// Running time after the result module.
    pub fn runner_running_time(&mut self, id: RunnerId) -> Result<Time, EditError> {
        Ok(self.runner_computed(id)?.value.running_time)
    }

    /// Rogaining points after the result module.
    pub fn runner_points(&mut self, id: RunnerId) -> Result<i32, EditError> {
        Ok(self.runner_computed(id)?.value.points)
    }

    /// Place in the runner's class, `None` when not ranked.
    pub fn runner_place(&mut self, id: RunnerId) -> Result<Option<u32>, EditError> {
        let Some(class) = self.runner_lookup(id)?.class else {
            return Ok(None);
        };
        let standings = self.standings(class, StandingKind::Runners)?;
        Ok(standings.places.get(&EntryKey::Runner(id)).copied())
    }

    /// Raw split table in course order.
    pub fn split_table(&mut self, id: RunnerId) -> Result<Option<SplitTable>, EditError> {
        Ok(self.runner_computed(id)?.raw.evaluation.map(|e| e.splits))
    }

    /// Split table reordered into the canonical leg order of the runner's
    /// class, so runners of different loop variants line up.
    pub fn normalized_split_table(&mut self, id: RunnerId) -> Result<Option<SplitTable>, EditError> {
        let Some(raw) = self.split_table(id)? else {
            return Ok(None);
        };
        let layout = self.runner_layout(id)?;
        Ok(Some(raw.normalize(&layout)))
    }

    /// Canonical leg layout of a class.
    pub fn class_layout(&self, class: ClassId) -> CanonicalLayout {
        let courses: Vec<&[ControlId]> = self
            .data
            .class_courses(class)
            .into_iter()
            .filter_map(|c| self.data.course(c))
            .map(|c| c.controls.as_slice())
            .collect();
        CanonicalLayout::from_courses(courses)
    }

    /// Place by elapsed time at `control` within the runner's class.
    pub fn split_place(&mut self, id: RunnerId, control: ControlId) -> Result<Option<u32>, EditError> {
        let Some(class) = self.runner_lookup(id)?.class else {
            return Ok(None);
        };
        let standings = self.standings(class, StandingKind::Control(control))?;
        Ok(standings.places.get(&EntryKey::Runner(id)).copied())
    }

    /// Team result after the result module.
    pub fn team_result(&mut self, id: TeamId) -> Result<TeamResult, EditError> {
        Ok(self.team_computed(id)?.value)
    }

    /// Place in the team's class, `None` when not ranked.
    pub fn team_place(&mut self, id: TeamId) -> Result<Option<u32>, EditError> {
        let Some(class) = self.team_lookup(id)?.class else {
            return Ok(None);
        };
        let standings = self.standings(class, StandingKind::Teams)?;
        Ok(standings.places.get(&EntryKey::Team(id)).copied())
    }

    /// Result list of a class: ranked runners by place, then the rest by
    /// status and name.
    pub fn class_results(&mut self, class: ClassId) -> Result<Vec<ResultRow>, EditError> {
        let standings = self.standings(class, StandingKind::Runners)?;
        let mut rows = Vec::new();
        for id in self.data.class_members(class) {
            let result = self.runner_computed(id)?.value;
            let name = self.data.runner(id).map(|r| r.name.clone()).unwrap_or_default();
            rows.push(ResultRow {
                entry: EntryKey::Runner(id),
                name,
                place: standings.places.get(&EntryKey::Runner(id)).copied(),
                status: result.status,
                running_time: result.running_time,
                points: result.points,
            });
        }
        sort_rows(&mut rows);
        Ok(rows)
    }

    /// Ranked team list of `class`.
    pub fn team_class_results(&mut self, class: ClassId) -> Result<Vec<ResultRow>, EditError> {
        let standings = self.standings(class, StandingKind::Teams)?;
        let mut rows = Vec::new();
        for id in self.data.class_teams(class) {
            let result = self.team_computed(id)?.value;
            let name = self.data.team(id).map(|t| t.name.clone()).unwrap_or_default();
            rows.push(ResultRow {
                entry: EntryKey::Team(id),
                name,
                place: standings.places.get(&EntryKey::Team(id)).copied(),
                status: result.status,
                running_time: result.running_time,
                points: result.points,
            });
        }
        sort_rows(&mut rows);
        Ok(rows)
    }

    /// Recomputes a runner from scratch, bypassing and leaving the cache
    /// untouched.
    pub fn recompute_runner(&mut self, id: RunnerId) -> Result<RunnerResult, EditError> {
        self.ensure_index();
        let runner = self.runner_lookup(id)?;
        let raw = runner.apply(&self.runner_context());
        Ok(match &self.module {
            Some(m) => m.adjust_runner(&raw),
            None => raw,
        })
    }

    /// Recomputes a team and its legs from scratch.
    pub fn recompute_team(&mut self, id: TeamId) -> Result<TeamResult, EditError> {
        let legs = self.team_lookup(id)?.legs.clone();
        let mut results = Vec::with_capacity(legs.len());
        for leg in legs {
            results.push(match leg.filter(|r| self.data.runner(*r).is_some()) {
                Some(r) => Some((r, self.recompute_runner(r)?)),
                None => None,
            });
        }
        let team = self.team_lookup(id)?;
        let raw = team.apply(&TeamContext {
            runner: self.runner_context(),
            legs: &results,
        });
        Ok(match &self.module {
            Some(m) => m.adjust_team(&raw),
            None => raw,
        })
    }

    /// True when the runner's cached result is valid without recomputing.
    pub fn is_runner_cached(&self, id: RunnerId) -> bool {
        let Some(runner) = self.data.runner(id) else {
            return false;
        };
        let inputs = self.data.runner_inputs(runner, &self.cache);
        self.cache
            .is_runner_fresh(id, self.revisions.current(), inputs, self.module_key())
    }

    /// True when the cached team result is fresh.
    pub fn is_team_cached(&self, id: TeamId) -> bool {
        let Some(team) = self.data.team(id) else {
            return false;
        };
        let inputs = self.data.team_inputs(team, &self.cache);
        self.cache
            .is_team_fresh(id, self.revisions.current(), inputs, self.module_key())
    }

    /// Free punches recorded for `card_no`, in time order.
    pub fn card_punches(&self, card_no: CardNo) -> Vec<FreePunch> {
        let mut out = self.punches.by_card_cloned(card_no);
        out.sort_by_key(|p| (p.punch.time, p.id));
        out
    }

    /// Current classification of a free punch.
    pub fn punch_match(&mut self, id: PunchId) -> Option<Classification> {
        self.ensure_index();
        self.index.match_of(id).copied()
    }

    /// `(control, race)` pairs with at least one matched free punch.
    pub fn active_controls(&mut self) -> Vec<(ControlId, RaceIndex)> {
        self.ensure_index();
        self.index.active_controls()
    }

    /// The punch index, built.
    pub fn punch_index(&mut self) -> &PunchIndex {
        self.ensure_index();
        &self.index
    }

    fn runner_context(&self) -> RunnerContext<'_> {
        RunnerContext {
            data: &self.data,
            punches: &self.punches,
            index: &self.index,
            config: &self.config,
        }
    }

    fn runner_lookup(&self, id: RunnerId) -> Result<&Runner, EditError> {
        self.data.runner(id).ok_or_else(|| rejected(EditError::UnknownRunner(id)))
    }

    fn team_lookup(&self, id: TeamId) -> Result<&Team, EditError> {
        self.data.team(id).ok_or_else(|| rejected(EditError::UnknownTeam(id)))
    }

    fn runner_layout(&self, id: RunnerId) -> Result<CanonicalLayout, EditError> {
        let runner = self.runner_lookup(id)?;
        if let Some(class) = runner.class {
            return Ok(self.class_layout(class));
        }
        let own: Vec<&[ControlId]> = self
            .data
            .course_for(runner)
            .map(|c| c.controls.as_slice())
            .into_iter()
            .collect();
        Ok(CanonicalLayout::from_courses(own))
    }

    pub(crate) fn runner_computed(&mut self, id: RunnerId) -> Result<Computed<RunnerResult>, EditError> {
        self.ensure_index();
        let runner = self.runner_lookup(id)?;
        let inputs = self.data.runner_inputs(runner, &self.cache);
        let current = self.revisions.current();
        let module = self.module.as_ref().map(|m| m.key().to_owned());
        if let Some(hit) = self.cache.cached_runner(id, current, inputs, module.as_deref()) {
            return Ok(hit.clone());
        }

        let runner = self.runner_lookup(id)?;
        let raw = runner.apply(&self.runner_context());
        let value = match &self.module {
            Some(m) => m.adjust_runner(&raw),
            None => raw.clone(),
        };
        tracing::debug!(runner = id, revision = current, status = ?value.status, "runner result recomputed");
        let computed = Computed {
            revision: current,
            value,
            raw,
            module,
        };
        Ok(self.cache.store_runner(id, computed).clone())
    }

    pub(crate) fn team_computed(&mut self, id: TeamId) -> Result<Computed<TeamResult>, EditError> {
        self.ensure_index();
        let team = self.team_lookup(id)?;
        let inputs = self.data.team_inputs(team, &self.cache);
        let legs = team.legs.clone();
        let current = self.revisions.current();
        let module = self.module.as_ref().map(|m| m.key().to_owned());
        if let Some(hit) = self.cache.cached_team(id, current, inputs, module.as_deref()) {
            return Ok(hit.clone());
        }

        let mut results = Vec::with_capacity(legs.len());
        for leg in legs {
            results.push(match leg.filter(|r| self.data.runner(*r).is_some()) {
                Some(r) => Some((r, self.runner_computed(r)?.value)),
                None => None,
            });
        }
        let team = self.team_lookup(id)?;
        let raw = team.apply(&TeamContext {
            runner: self.runner_context(),
            legs: &results,
        });
        let value = match &self.module {
            Some(m) => m.adjust_team(&raw),
            None => raw.clone(),
        };
        tracing::debug!(team = id, revision = current, status = ?value.status, "team result recomputed");
        let computed = Computed {
            revision: current,
            value,
            raw,
            module,
        };
        Ok(self.cache.store_team(id, computed).clone())
    }

    /// Class-wide places, rebuilt only when the class's dirty markers (or the
    /// class itself, or the result module) changed since they were stamped.
    pub(crate) fn standings(&mut self, class: ClassId, kind: StandingKind) -> Result<Standings, EditError> {
        self.ensure_index();
        let cls = self
            .data
            .class(class)
            .ok_or_else(|| rejected(EditError::UnknownClass(class)))?;
        let module = self.module.as_ref().map(|m| m.key().to_owned());
        if let Some(s) = self.cache.standings(class, kind) {
            let fresh = s.module == module
                && cls.meta.revision <= s.revision
                && !cls.dirty.is_dirty_since(kind.marker(), s.revision);
            if fresh {
                return Ok(s.clone());
            }
        }

        let current = self.revisions.current();
        let mut scored: Vec<(EntryKey, (i64, i64))> = Vec::new();
        match kind {
            StandingKind::Runners => {
                let mut results = Vec::new();
                for id in self.data.class_members(class) {
                    results.push((id, self.runner_computed(id)?.value));
                }
                let by_points = results.iter().any(|(_, r)| r.rogaining);
                for (id, r) in &results {
                    if r.is_ranked() {
                        let primary = if by_points { -i64::from(r.points) } else { 0 };
                        scored.push((EntryKey::Runner(*id), (primary, i64::from(r.running_time))));
                    }
                }
            }
            StandingKind::Control(control) => {
                for id in self.data.class_members(class) {
                    let result = self.runner_computed(id)?.raw;
                    let at = result.evaluation.as_ref().and_then(|e| e.splits.time_at(control));
                    if let Some(t) = at {
                        scored.push((EntryKey::Runner(id), (i64::from(t), 0)));
                    }
                }
            }
            StandingKind::Teams => {
                for id in self.data.class_teams(class) {
                    let r = self.team_computed(id)?.value;
                    if r.is_ranked() {
                        scored.push((EntryKey::Team(id), (0, i64::from(r.running_time))));
                    }
                }
            }
        }

        let (places, order) = rank(scored);
        tracing::debug!(class, ?kind, ranked = order.len(), revision = current, "standings rebuilt");
        let standings = Standings {
            revision: current,
            module,
            places,
            order,
        };
        Ok(self.cache.store_standings(class, kind, standings).clone())
    }
}

/// Competition ranking: equal scores share a place, the next place skips.
fn rank(mut scored: Vec<(EntryKey, (i64, i64))>) -> (HashMap<EntryKey, u32>, Vec<EntryKey>) {
    scored.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    let mut places = HashMap::with_capacity(scored.len());
    let mut order = Vec::with_capacity(scored.len());
    let mut prev = None;
    let mut place = 0;
    for (i, (entry, score)) in scored.into_iter().enumerate() {
        if prev != Some(score) {
            place = i as u32 + 1;
            prev = Some(score);
        }
        places.insert(entry, place);
        order.push(entry);
    }
    (places, order)
}

fn status_order(status: RunStatus) -> usize {
    RunStatus::ALL.iter().position(|s| *s == status).unwrap_or(usize::MAX)
}

fn sort_rows(rows: &mut [ResultRow]) {
    rows.sort_by(|a, b| match (a.place, b.place) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name.cmp(&b.name)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => status_order(a.status)
            .cmp(&status_order(b.status))
            .then_with(|| a.name.cmp(&b.name)),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_share_a_place() {
        let (places, order) = rank(vec![
            (EntryKey::Runner(3), (0, 300)),
            (EntryKey::Runner(1), (0, 200)),
            (EntryKey::Runner(2), (0, 200)),
        ]);
        assert_eq!(places[&EntryKey::Runner(1)], 1);
        assert_eq!(places[&EntryKey::Runner(2)], 1);
        assert_eq!(places[&EntryKey::Runner(3)], 3);
        assert_eq!(order[0], EntryKey::Runner(1));
    }
}
