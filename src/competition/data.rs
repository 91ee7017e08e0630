//! Entity tables and the lookups the index and evaluator need.

use hashbrown::HashMap;

use crate::{
    core::punch_index::{CardOwner, CardResolver, CourseSlot},
    engine::{cache::ResultCache, traits::EntryKey},
    model::{
        Club, EntityKind,
        card::Card,
        class::Class,
        course::{Control, Course},
        runner::Runner,
        team::Team,
    },
    types::{
        CardId, CardNo, ClassId, ClubId, ControlId, CourseId, Revision, RunnerId, TeamId, Time, has_time,
    },
};

/// All competition entities, keyed by id. Removed entities stay in their
/// table (flagged in their meta) so they can still be synchronized.
#[derive(Debug, Default)]
pub struct EntityData {
    pub(crate) runners: HashMap<RunnerId, Runner>,
    pub(crate) teams: HashMap<TeamId, Team>,
    pub(crate) cards: HashMap<CardId, Card>,
    pub(crate) courses: HashMap<CourseId, Course>,
    pub(crate) controls: HashMap<ControlId, Control>,
    pub(crate) classes: HashMap<ClassId, Class>,
    pub(crate) clubs: HashMap<ClubId, Club>,
    by_card_no: HashMap<CardNo, Vec<RunnerId>>,
    next_ids: HashMap<EntityKind, u32>,
}

impl EntityData {
    /// Live runner by id.
    pub fn runner(&self, id: RunnerId) -> Option<&Runner> {
        self.runners.get(&id).filter(|r| !r.meta.removed)
    }

    /// Live team by id.
    pub fn team(&self, id: TeamId) -> Option<&Team> {
        self.teams.get(&id).filter(|t| !t.meta.removed)
    }

    /// Live card by id.
    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.cards.get(&id).filter(|c| !c.meta.removed)
    }

    /// Live course by id.
    pub fn course(&self, id: CourseId) -> Option<&Course> {
        self.courses.get(&id).filter(|c| !c.meta.removed)
    }

    /// Live control by id.
    pub fn control(&self, id: ControlId) -> Option<&Control> {
        self.controls.get(&id).filter(|c| !c.meta.removed)
    }

    /// Live class by id.
    pub fn class(&self, id: ClassId) -> Option<&Class> {
        self.classes.get(&id).filter(|c| !c.meta.removed)
    }

    /// Live club by id.
    pub fn club(&self, id: ClubId) -> Option<&Club> {
        self.clubs.get(&id).filter(|c| !c.meta.removed)
    }

    /// Live runners in id order.
    pub fn runners(&self) -> Vec<&Runner> {
        let mut out: Vec<&Runner> = self.runners.values().filter(|r| !r.meta.removed).collect();
        out.sort_by_key(|r| r.id());
        out
    }

    /// Live teams in id order.
    pub fn teams(&self) -> Vec<&Team> {
        let mut out: Vec<&Team> = self.teams.values().filter(|t| !t.meta.removed).collect();
        out.sort_by_key(|t| t.id());
        out
    }

    /// Runners registered with `card_no`.
    pub fn runners_with_card_no(&self, card_no: CardNo) -> Vec<RunnerId> {
        self.by_card_no.get(&card_no).cloned().unwrap_or_default()
    }

    pub(crate) fn next_id(&mut self, kind: EntityKind) -> u32 {
        let slot = self.next_ids.entry(kind).or_insert(1);
        let id = *slot;
        *slot += 1;
        id
    }

    /// Keeps the id allocator ahead of an id created elsewhere.
    pub(crate) fn reserve_id(&mut self, kind: EntityKind, id: u32) {
        let slot = self.next_ids.entry(kind).or_insert(1);
        *slot = (*slot).max(id + 1);
    }

    pub(crate) fn reindex_card_no(&mut self, runner: RunnerId, old: CardNo, new: CardNo) {
        if old != 0 {
            if let Some(ids) = self.by_card_no.get_mut(&old) {
                ids.retain(|r| *r != runner);
                if ids.is_empty() {
                    self.by_card_no.remove(&old);
                }
            }
        }
        if new != 0 {
            let ids = self.by_card_no.entry(new).or_default();
            if !ids.contains(&runner) {
                ids.push(runner);
                ids.sort_unstable();
            }
        }
    }

    /// Course a runner runs: explicit course, then the team leg course, then
    /// the class course.
    pub fn course_id_for(&self, runner: &Runner) -> Option<CourseId> {
        if runner.course.is_some() {
            return runner.course;
        }
        if let Some((team, leg)) = runner.team {
            let class = self
                .team(team)
                .and_then(|t| t.class)
                .or(runner.class)
                .and_then(|c| self.class(c));
            if let Some(course) = class.and_then(|c| c.course_for_leg(leg)) {
                return Some(course);
            }
        }
        runner.class.and_then(|c| self.class(c)).and_then(|c| c.course)
    }

    /// Course `runner` runs, see [`EntityData::course_id_for`].
    pub fn course_for(&self, runner: &Runner) -> Option<&Course> {
        self.course_id_for(runner).and_then(|c| self.course(c))
    }

    /// Finish of a runner used to bound the card-ownership window.
    fn window_end(&self, runner: &Runner) -> Option<Time> {
        runner
            .card
            .and_then(|c| self.card(c))
            .and_then(Card::finish_time)
            .or_else(|| has_time(runner.finish_time).then_some(runner.finish_time))
    }

    /// Runner holding `card_no` at `time`.
    ///
    /// With several runners sharing a card number, the runner whose start to
    /// finish window contains `time` wins (latest start first), then the last
    /// runner started before `time`, then the lowest id.
    pub fn owner_for(&self, card_no: CardNo, time: Time) -> Option<&Runner> {
        let live: Vec<&Runner> = self
            .by_card_no
            .get(&card_no)?
            .iter()
            .filter_map(|id| self.runner(*id))
            .collect();
        if live.len() <= 1 {
            return live.first().copied();
        }

        let started = |r: &Runner| !has_time(r.start_time) || r.start_time <= time;
        live.iter()
            .copied()
            .filter(|r| started(r) && self.window_end(r).is_none_or(|end| time <= end))
            .max_by_key(|r| (r.start_time, std::cmp::Reverse(r.id())))
            .or_else(|| {
                live.iter()
                    .copied()
                    .filter(|r| started(r))
                    .max_by_key(|r| (r.start_time, std::cmp::Reverse(r.id())))
            })
            .or_else(|| live.first().copied())
    }

    /// Live runners of `class`, in id order.
    pub fn class_members(&self, class: ClassId) -> Vec<RunnerId> {
        let mut out: Vec<RunnerId> = self
            .runners
            .values()
            .filter(|r| !r.meta.removed && r.class == Some(class))
            .map(Runner::id)
            .collect();
        out.sort_unstable();
        out
    }

    /// Live teams of `class`, in id order.
    pub fn class_teams(&self, class: ClassId) -> Vec<TeamId> {
        let mut out: Vec<TeamId> = self
            .teams
            .values()
            .filter(|t| !t.meta.removed && t.class == Some(class))
            .map(Team::id)
            .collect();
        out.sort_unstable();
        out
    }

    /// Classes whose runners may run `course`.
    pub fn classes_using_course(&self, course: CourseId) -> Vec<ClassId> {
        let mut out: Vec<ClassId> = self
            .classes
            .values()
            .filter(|c| c.course == Some(course) || c.legs.iter().any(|l| l.course == Some(course)))
            .map(Class::id)
            .collect();
        for runner in self.runners.values() {
            if runner.course == Some(course) {
                if let Some(class) = runner.class {
                    out.push(class);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Courses containing `control`.
    pub fn courses_with_control(&self, control: ControlId) -> Vec<CourseId> {
        let mut out: Vec<CourseId> = self
            .courses
            .values()
            .filter(|c| c.controls.contains(&control))
            .map(Course::id)
            .collect();
        out.sort_unstable();
        out
    }

    /// Courses run in `class`, class course first, then leg courses and
    /// explicitly assigned courses by id.
    pub fn class_courses(&self, class: ClassId) -> Vec<CourseId> {
        let Some(cls) = self.class(class) else {
            return Vec::new();
        };
        let mut rest: Vec<CourseId> = cls.legs.iter().filter_map(|l| l.course).collect();
        for id in self.class_members(class) {
            if let Some(course) = self.runner(id).and_then(|r| self.course_id_for(r)) {
                rest.push(course);
            }
        }
        rest.sort_unstable();
        rest.dedup();
        let mut out: Vec<CourseId> = cls.course.into_iter().collect();
        out.extend(rest.into_iter().filter(|c| Some(*c) != cls.course));
        out
    }

    /// Newest revision among everything a runner's result is computed from.
    pub fn runner_inputs(&self, runner: &Runner, cache: &ResultCache) -> Revision {
        let mut rev = runner
            .meta
            .revision
            .max(cache.trigger_of(EntryKey::Runner(runner.id())));
        if let Some(card) = runner.card.and_then(|c| self.cards.get(&c)) {
            rev = rev.max(card.meta.revision);
        }
        if let Some(course) = self.course_for(runner) {
            rev = rev.max(course.meta.revision);
            for id in &course.controls {
                if let Some(ctrl) = self.controls.get(id) {
                    rev = rev.max(ctrl.meta.revision);
                }
            }
        }
        if let Some(class) = runner.class.and_then(|c| self.classes.get(&c)) {
            rev = rev.max(class.meta.revision);
        }
        if let Some((team, _)) = runner.team {
            // Leg courses come from the team's class.
            if let Some(class) = self.team(team).and_then(|t| t.class).and_then(|c| self.classes.get(&c)) {
                rev = rev.max(class.meta.revision);
            }
        }
        rev
    }

    /// Newest revision among a team's own data and its legs' inputs.
    pub fn team_inputs(&self, team: &Team, cache: &ResultCache) -> Revision {
        let mut rev = team.meta.revision.max(cache.trigger_of(EntryKey::Team(team.id())));
        if let Some(class) = team.class.and_then(|c| self.classes.get(&c)) {
            rev = rev.max(class.meta.revision);
        }
        if let Some(card) = team.card.and_then(|c| self.cards.get(&c)) {
            rev = rev.max(card.meta.revision);
        }
        if let Some(course) = team.course.and_then(|c| self.courses.get(&c)) {
            rev = rev.max(course.meta.revision);
        }
        for runner in team.legs.iter().flatten().filter_map(|r| self.runner(*r)) {
            rev = rev.max(self.runner_inputs(runner, cache));
        }
        rev
    }

    fn slots_for(&self, course: &Course) -> Vec<CourseSlot> {
        course
            .controls
            .iter()
            .map(|id| CourseSlot {
                control: *id,
                codes: self.control(*id).map(|c| c.codes.clone()).unwrap_or_else(|| vec![*id]),
            })
            .collect()
    }
}

impl CardResolver for EntityData {
    fn owner_at(&self, card_no: CardNo, time: Time) -> Option<CardOwner> {
        let runner = self.owner_for(card_no, time)?;
        Some(CardOwner {
            runner: runner.id(),
            race: runner.race,
            slots: self.course_for(runner).map(|c| self.slots_for(c)).unwrap_or_default(),
        })
    }
}
