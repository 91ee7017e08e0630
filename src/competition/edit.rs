//! Edit commands. Each validates fully before mutating anything.

use crate::{
    clock,
    core::punch_index::{Classification, HashChange},
    model::{
        Club, EntityKind,
        card::{Card, CardDraft},
        class::{Class, ClassDraft, DirtyMarkers, LegRule},
        course::{Control, ControlDraft, Course, CourseDraft, RogainingRules},
        meta::EntityMeta,
        runner::{Runner, RunnerDraft},
        team::{Team, TeamDraft},
    },
    op::StoredOp,
    punch::{FreePunchDraft, FreePunchPatch, Punch},
    types::{
        CHECK_CODE, CardId, CardNo, ClassId, ClubId, ControlId, CourseId, FINISH_CONTROL, PunchId, PunchType,
        Revision, RunStatus, RunnerId, START_CODE, TeamId, Time,
    },
};

use super::{Competition, EditError, rejected};

impl Competition {
    // ---- clubs, controls, courses, classes -------------------------------

    /// Adds a club.
    pub fn add_club(&mut self, name: impl Into<String>) -> ClubId {
        let rev = self.bump();
        let id = self.data.next_id(EntityKind::Club);
        self.data.clubs.insert(
            id,
            Club {
                meta: EntityMeta::new(id, rev),
                name: name.into(),
            },
        );
        id
    }

    /// Adds a control. Ids `1..=3` are the start, finish and check codes.
    pub fn add_control(&mut self, draft: ControlDraft) -> Result<ControlId, EditError> {
        let id = draft.id;
        if (START_CODE..=CHECK_CODE).contains(&id) || id == 0 {
            return Err(rejected(EditError::ReservedControlId(id)));
        }
        if self.data.controls.contains_key(&id) {
            return Err(rejected(EditError::DuplicateControl(id)));
        }
        let rev = self.bump();
        self.data.reserve_id(EntityKind::Control, id);
        self.data.controls.insert(id, control_from_draft(draft, rev));
        Ok(id)
    }

    /// Replaces the editable fields of a control. Results of every class
    /// running a course with this control are invalidated.
    pub fn update_control(&mut self, id: ControlId, draft: ControlDraft) -> Result<(), EditError> {
        let Some(current) = self.data.control(id) else {
            return Err(rejected(EditError::UnknownControl(id)));
        };
        let mut next = control_from_draft(ControlDraft { id, ..draft }, 0);
        next.meta = current.meta.clone();
        let codes_changed = next.codes != current.codes;

        let rev = self.bump();
        next.meta.touch(rev);
        self.data.controls.insert(id, next);

        if codes_changed {
            self.invalidate_index();
        }
        for course in self.data.courses_with_control(id) {
            for class in self.data.classes_using_course(course) {
                self.mark_class(class, None, rev);
            }
        }
        Ok(())
    }

    /// Adds a course. Every control on it must exist.
    pub fn add_course(&mut self, draft: CourseDraft) -> Result<CourseId, EditError> {
        self.check_controls(&draft.controls)?;
        let rev = self.bump();
        let id = self.data.next_id(EntityKind::Course);
        self.data.courses.insert(
            id,
            Course {
                meta: EntityMeta::new(id, rev),
                name: draft.name,
                controls: draft.controls,
                length: draft.length,
                rogaining: draft.rogaining,
            },
        );
        Ok(id)
    }

    /// Replaces the control sequence of a course. Punch matching depends on
    /// it everywhere, so the index is rebuilt on the next read.
    pub fn set_course_controls(&mut self, id: CourseId, controls: Vec<ControlId>) -> Result<(), EditError> {
        if self.data.course(id).is_none() {
            return Err(rejected(EditError::UnknownCourse(id)));
        }
        self.check_controls(&controls)?;
        let rev = self.bump();
        if let Some(course) = self.data.courses.get_mut(&id) {
            course.controls = controls;
            course.meta.touch(rev);
        }
        self.invalidate_index();
        self.mark_course_classes(id, rev);
        Ok(())
    }

    /// Makes a course a rogaining course, or a plain one for `None`.
    pub fn set_course_rogaining(&mut self, id: CourseId, rules: Option<RogainingRules>) -> Result<(), EditError> {
        if self.data.course(id).is_none() {
            return Err(rejected(EditError::UnknownCourse(id)));
        }
        let rev = self.bump();
        if let Some(course) = self.data.courses.get_mut(&id) {
            course.rogaining = rules;
            course.meta.touch(rev);
        }
        self.mark_course_classes(id, rev);
        Ok(())
    }

    /// Adds a class.
    pub fn add_class(&mut self, draft: ClassDraft) -> Result<ClassId, EditError> {
        self.check_course(draft.course)?;
        for rule in &draft.legs {
            self.check_course(rule.course)?;
        }
        let rev = self.bump();
        let id = self.data.next_id(EntityKind::Class);
        self.data.classes.insert(
            id,
            Class {
                meta: EntityMeta::new(id, rev),
                name: draft.name,
                course: draft.course,
                no_timing: draft.no_timing,
                max_time: draft.max_time,
                legs: draft.legs,
                dirty: DirtyMarkers::default(),
            },
        );
        Ok(id)
    }

    /// Sets the course of a class. Runners without their own course follow it.
    pub fn set_class_course(&mut self, id: ClassId, course: Option<CourseId>) -> Result<(), EditError> {
        if self.data.class(id).is_none() {
            return Err(rejected(EditError::UnknownClass(id)));
        }
        self.check_course(course)?;
        let rev = self.bump();
        if let Some(class) = self.data.classes.get_mut(&id) {
            class.course = course;
            class.meta.touch(rev);
        }
        self.invalidate_index();
        self.mark_class(id, None, rev);
        Ok(())
    }

    /// Timing rules of a class: results without times, maximum running time.
    pub fn set_class_rules(&mut self, id: ClassId, no_timing: bool, max_time: Option<Time>) -> Result<(), EditError> {
        if self.data.class(id).is_none() {
            return Err(rejected(EditError::UnknownClass(id)));
        }
        let rev = self.bump();
        if let Some(class) = self.data.classes.get_mut(&id) {
            class.no_timing = no_timing;
            class.max_time = max_time;
            class.meta.touch(rev);
        }
        self.mark_class(id, None, rev);
        Ok(())
    }

    /// Sets the rule of one relay leg, growing the rule list as needed.
    pub fn set_leg_rule(&mut self, id: ClassId, leg: usize, rule: LegRule) -> Result<(), EditError> {
        if self.data.class(id).is_none() {
            return Err(rejected(EditError::UnknownClass(id)));
        }
        self.check_course(rule.course)?;
        let rev = self.bump();
        let mut course_changed = false;
        if let Some(class) = self.data.classes.get_mut(&id) {
            if class.legs.len() <= leg {
                class.legs.resize(leg + 1, LegRule::default());
            }
            course_changed = class.legs[leg].course != rule.course;
            class.legs[leg] = rule;
            class.meta.touch(rev);
        }
        if course_changed {
            self.invalidate_index();
        }
        self.mark_class(id, None, rev);
        Ok(())
    }

    // ---- runners ----------------------------------------------------------

    /// Adds a runner and registers its card number.
    pub fn add_runner(&mut self, draft: RunnerDraft) -> Result<RunnerId, EditError> {
        self.check_class(draft.class)?;
        self.check_course(draft.course)?;
        self.check_club(draft.club)?;

        let rev = self.bump();
        let id = self.data.next_id(EntityKind::Runner);
        let card_no = draft.card_no;
        self.data.runners.insert(
            id,
            Runner {
                meta: EntityMeta::new(id, rev),
                name: draft.name,
                club: draft.club,
                class: draft.class,
                course: draft.course,
                card: None,
                card_no,
                start_time: draft.start_time,
                finish_time: crate::types::NO_TIME,
                manual_status: None,
                team: None,
                race: draft.race,
            },
        );
        self.data.reindex_card_no(id, 0, card_no);
        self.mark_runner(id, [None], rev);
        if card_no != 0 {
            self.rehash(card_no);
        }
        Ok(id)
    }

    /// Removes a runner: its card is released and its team leg emptied.
    pub fn remove_runner(&mut self, id: RunnerId) -> Result<(), EditError> {
        let runner = self.runner_or_err(id)?;
        let (card, card_no, team) = (runner.card, runner.card_no, runner.team);

        let rev = self.bump();
        self.mark_runner(id, [None], rev);
        if let Some(card) = card.and_then(|c| self.data.cards.get_mut(&c)) {
            card.owner = None;
            card.meta.touch(rev);
        }
        if let Some((team_id, leg)) = team {
            if let Some(team) = self.data.teams.get_mut(&team_id) {
                if let Some(slot) = team.legs.get_mut(leg) {
                    *slot = None;
                }
                team.meta.touch(rev);
            }
        }
        if let Some(r) = self.data.runners.get_mut(&id) {
            r.meta.removed = true;
            r.card = None;
            r.team = None;
            r.meta.touch(rev);
        }
        self.data.reindex_card_no(id, card_no, 0);
        self.cache.forget_runner(id);
        if card_no != 0 {
            self.rehash(card_no);
        }
        Ok(())
    }

    /// Moves a runner to another class.
    pub fn set_runner_class(&mut self, id: RunnerId, class: Option<ClassId>) -> Result<(), EditError> {
        self.runner_or_err(id)?;
        self.check_class(class)?;
        let rev = self.bump();
        // Once under the old class, once under the new one.
        self.mark_runner(id, [None], rev);
        if let Some(r) = self.data.runners.get_mut(&id) {
            r.class = class;
            r.meta.touch(rev);
        }
        self.mark_runner(id, [None], rev);
        self.rehash_runner(id);
        Ok(())
    }

    /// Assigns an explicit course, overriding the class course.
    pub fn set_runner_course(&mut self, id: RunnerId, course: Option<CourseId>) -> Result<(), EditError> {
        self.runner_or_err(id)?;
        self.check_course(course)?;
        self.update_runner(id, None, |r| r.course = course);
        self.rehash_runner(id);
        Ok(())
    }

    /// Changes the expected card number. A read card with another number is
    /// released from the runner.
    pub fn set_card_no(&mut self, id: RunnerId, card_no: CardNo) -> Result<(), EditError> {
        let runner = self.runner_or_err(id)?;
        let old = runner.card_no;
        let card = runner.card;
        if old == card_no {
            return Ok(());
        }

        let rev = self.bump();
        if let Some(card_id) = card {
            let keep = self.data.card(card_id).is_some_and(|c| c.card_no == card_no);
            if !keep {
                self.release_card(card_id, rev);
            }
        }
        if let Some(r) = self.data.runners.get_mut(&id) {
            r.card_no = card_no;
            r.meta.touch(rev);
        }
        self.data.reindex_card_no(id, old, card_no);
        self.mark_runner(id, [None], rev);
        self.rehash_all([old, card_no].into_iter().filter(|c| *c != 0));
        Ok(())
    }

    /// Sets the start time of a runner.
    pub fn set_start_time(&mut self, id: RunnerId, time: Time) -> Result<(), EditError> {
        self.runner_or_err(id)?;
        self.update_runner(id, None, |r| r.start_time = time);
        self.rehash_runner(id);
        Ok(())
    }

    /// Parses `text` with [`clock::parse_time`] and sets the start time.
    pub fn set_start_time_text(&mut self, id: RunnerId, text: &str) -> Result<(), EditError> {
        let time = self.parse_time(text)?;
        self.set_start_time(id, time)
    }

    /// Sets a manual finish time.
    pub fn set_finish_time(&mut self, id: RunnerId, time: Time) -> Result<(), EditError> {
        self.runner_or_err(id)?;
        self.update_runner(id, Some(FINISH_CONTROL), |r| r.finish_time = time);
        self.rehash_runner(id);
        Ok(())
    }

    /// Sets or clears the manual status; a manual status always wins.
    pub fn set_manual_status(&mut self, id: RunnerId, status: Option<RunStatus>) -> Result<(), EditError> {
        self.runner_or_err(id)?;
        self.update_runner(id, Some(FINISH_CONTROL), |r| r.manual_status = status);
        Ok(())
    }

    // ---- cards ------------------------------------------------------------

    /// Stores a card read-out. A repeated download (same card number and read
    /// id) is ignored. The card goes to the runner registered with its number
    /// when that runner has no card yet.
    pub fn read_card(&mut self, draft: CardDraft) -> Result<CardId, EditError> {
        if draft.read_id != 0 {
            if let Some(existing) = self
                .data
                .cards
                .values()
                .find(|c| !c.meta.removed && c.card_no == draft.card_no && c.read_id == draft.read_id)
            {
                tracing::debug!(card = existing.id(), card_no = draft.card_no, "repeated read-out ignored");
                return Ok(existing.id());
            }
        }

        let rev = self.bump();
        let id = self.data.next_id(EntityKind::Card);
        let card = Card {
            meta: EntityMeta::new(id, rev),
            card_no: draft.card_no,
            punches: draft.punches,
            read_id: draft.read_id,
            voltage_mv: draft.voltage_mv,
            owner: None,
            from_punches: false,
        };
        let time = card.finish_time().or_else(|| card.start_time()).unwrap_or(crate::types::NO_TIME);
        let owner = self
            .data
            .owner_for(card.card_no, time)
            .filter(|r| r.card.is_none())
            .map(Runner::id);
        self.data.cards.insert(id, card);

        if let Some(runner) = owner {
            self.attach_card(id, runner, rev);
        }
        Ok(id)
    }

    /// Gives a card to a runner. A card owned by someone else must be moved
    /// with [`Competition::transfer_card`].
    pub fn assign_card(&mut self, card: CardId, runner: RunnerId) -> Result<(), EditError> {
        let owner = self.card_or_err(card)?.owner;
        self.runner_or_err(runner)?;
        match owner {
            Some(o) if o == runner => Ok(()),
            Some(o) => Err(rejected(EditError::CardOwned { card, owner: o })),
            None => {
                let rev = self.bump();
                self.attach_card(card, runner, rev);
                Ok(())
            }
        }
    }

    /// Moves a card from its current owner to `to`. Only the two runners
    /// involved are invalidated.
    pub fn transfer_card(&mut self, card: CardId, to: RunnerId) -> Result<(), EditError> {
        let owner = self.card_or_err(card)?.owner;
        self.runner_or_err(to)?;
        if owner == Some(to) {
            return Ok(());
        }
        let rev = self.bump();
        if let Some(from) = owner {
            let card_no = self.data.card(card).map(|c| c.card_no).unwrap_or(0);
            let mut unregistered = false;
            if let Some(r) = self.data.runners.get_mut(&from) {
                r.card = None;
                r.meta.touch(rev);
                if r.card_no == card_no {
                    r.card_no = 0;
                    unregistered = true;
                }
            }
            if unregistered {
                self.data.reindex_card_no(from, card_no, 0);
            }
            self.mark_runner(from, [None], rev);
        }
        tracing::debug!(card, from = ?owner, to, "card transferred");
        self.attach_card(card, to, rev);
        Ok(())
    }

    /// Releases a card from its owner.
    pub fn detach_card(&mut self, card: CardId) -> Result<(), EditError> {
        self.card_or_err(card)?;
        let rev = self.bump();
        self.release_card(card, rev);
        Ok(())
    }

    /// Sets the time of punch `index` on a read card.
    pub fn set_card_punch_time(&mut self, card: CardId, index: usize, time: Time) -> Result<(), EditError> {
        let kind = self.card_punch(card, index)?.kind;
        let marker = self.punch_marker(card, index, kind);
        let rev = self.bump();
        let owner = self.data.cards.get_mut(&card).and_then(|c| {
            c.punches[index].time = time;
            c.meta.touch(rev);
            c.owner
        });
        if let Some(owner) = owner {
            self.mark_runner(owner, [marker], rev);
        }
        Ok(())
    }

    /// Records a battery reading reported after the read-out. Results do
    /// not depend on it, so the card only carries a quiet change.
    pub fn set_card_voltage(&mut self, card: CardId, voltage_mv: Option<u32>) -> Result<(), EditError> {
        self.card_or_err(card)?;
        if let Some(c) = self.data.cards.get_mut(&card) {
            c.voltage_mv = voltage_mv;
            c.meta.touch_quiet();
        }
        Ok(())
    }

    /// Parses `text` and sets the punch time.
    pub fn set_card_punch_time_text(&mut self, card: CardId, index: usize, text: &str) -> Result<(), EditError> {
        self.card_punch(card, index)?;
        let time = self.parse_time(text)?;
        self.set_card_punch_time(card, index, time)
    }

    /// Changes the type (code) of punch `index`. Matching changes, so the
    /// owner's class is invalidated as a whole.
    pub fn set_card_punch_type(&mut self, card: CardId, index: usize, kind: PunchType) -> Result<(), EditError> {
        self.card_punch(card, index)?;
        let rev = self.bump();
        let owner = self.data.cards.get_mut(&card).and_then(|c| {
            c.punches[index].kind = kind;
            c.meta.touch(rev);
            c.owner
        });
        if let Some(owner) = owner {
            self.mark_runner(owner, [None], rev);
        }
        Ok(())
    }

    /// Builds a card from the free punches the index matched to a runner
    /// without a read card, and assigns it.
    pub fn construct_card(&mut self, runner: RunnerId) -> Result<CardId, EditError> {
        let r = self.runner_or_err(runner)?;
        if let Some(card) = r.card {
            return Err(rejected(EditError::CardOwned { card, owner: runner }));
        }
        let card_no = r.card_no;
        self.ensure_index();
        let punches = super::results::owned_punches(&self.index, &self.punches, card_no, runner);

        let rev = self.bump();
        let id = self.data.next_id(EntityKind::Card);
        self.data.cards.insert(
            id,
            Card {
                meta: EntityMeta::new(id, rev),
                card_no,
                punches,
                read_id: 0,
                voltage_mv: None,
                owner: None,
                from_punches: true,
            },
        );
        self.attach_card(id, runner, rev);
        Ok(id)
    }

    // ---- free punches -----------------------------------------------------

    /// Records an online/radio punch and refiles its card.
    pub fn add_free_punch(&mut self, draft: FreePunchDraft) -> Result<PunchId, EditError> {
        self.ensure_index();
        let card_no = draft.card_no;
        let (id, _) = self.punches.insert(draft)?;
        let rev = self.bump();
        self.punches.touch(id, rev);
        self.rehash(card_no);
        self.mark_punch_owners(id, None, rev);
        Ok(id)
    }

    /// Patches a free punch and refiles the cards it touches.
    pub fn patch_free_punch(&mut self, id: PunchId, patch: FreePunchPatch) -> Result<StoredOp, EditError> {
        self.ensure_index();
        let stored = self.punches.patch(id, patch)?;
        self.after_punch_op(&stored);
        Ok(stored)
    }

    /// Removes a free punch. Undoable.
    pub fn remove_free_punch(&mut self, id: PunchId) -> Result<StoredOp, EditError> {
        self.ensure_index();
        let stored = self.punches.remove(id)?;
        self.after_punch_op(&stored);
        Ok(stored)
    }

    /// Undoes the latest free-punch edit.
    pub fn undo_punch_edit(&mut self) -> Result<StoredOp, EditError> {
        self.ensure_index();
        let stored = self.punches.undo()?;
        self.after_punch_op(&stored);
        Ok(stored)
    }

    /// Redoes the latest undone free-punch edit.
    pub fn redo_punch_edit(&mut self) -> Result<StoredOp, EditError> {
        self.ensure_index();
        let stored = self.punches.redo()?;
        self.after_punch_op(&stored);
        Ok(stored)
    }

    fn after_punch_op(&mut self, stored: &StoredOp) {
        let id = stored.op.punch_id();
        let before = self.index.match_of(id).copied();
        let rev = self.bump();
        self.punches.touch(id, rev);
        self.rehash_all(stored.op.affected_cards(stored.op.card_no()));
        self.mark_punch_owners(id, before, rev);
    }

    /// Marks the old and new owner of an edited punch. A time edit that keeps
    /// the punch in its bucket produces no hash change but still moves the
    /// owner's result.
    fn mark_punch_owners(&mut self, id: PunchId, before: Option<Classification>, rev: Revision) {
        let touched = HashChange {
            punch: id,
            card_no: self.punches.get(id).map(|p| p.card_no).unwrap_or_default(),
            before,
            after: self.index.match_of(id).copied(),
        };
        for runner in touched.runners() {
            self.mark_runner(runner, touched.controls_for(runner), rev);
        }
    }

    // ---- teams ------------------------------------------------------------

    /// Adds a team with empty legs.
    pub fn add_team(&mut self, draft: TeamDraft) -> Result<TeamId, EditError> {
        self.check_class(draft.class)?;
        self.check_club(draft.club)?;
        let rev = self.bump();
        let id = self.data.next_id(EntityKind::Team);
        self.data.teams.insert(
            id,
            Team {
                meta: EntityMeta::new(id, rev),
                name: draft.name,
                club: draft.club,
                class: draft.class,
                legs: vec![None; draft.leg_count],
                card: None,
                course: None,
                start_time: draft.start_time,
                manual_status: None,
            },
        );
        self.mark_team(id, rev);
        Ok(id)
    }

    /// Puts `runner` on `leg` of `team` (or empties the leg for `None`).
    pub fn set_team_leg(&mut self, team: TeamId, leg: usize, runner: Option<RunnerId>) -> Result<(), EditError> {
        let previous = self.team_or_err(team)?.leg_runner(leg);
        if let Some(r) = runner {
            if let Some((other, _)) = self.runner_or_err(r)?.team {
                if other != team {
                    return Err(rejected(EditError::RunnerInOtherTeam { runner: r, team: other }));
                }
            }
        }
        if previous == runner {
            return Ok(());
        }

        let rev = self.bump();
        if let Some(prev) = previous {
            if let Some(p) = self.data.runners.get_mut(&prev) {
                p.team = None;
                p.meta.touch(rev);
            }
            self.mark_runner(prev, [None], rev);
        }
        if let Some(t) = self.data.teams.get_mut(&team) {
            if let Some(r) = runner {
                // Moving within the team empties the old leg.
                for slot in t.legs.iter_mut() {
                    if *slot == Some(r) {
                        *slot = None;
                    }
                }
            }
            if t.legs.len() <= leg {
                t.legs.resize(leg + 1, None);
            }
            t.legs[leg] = runner;
            t.meta.touch(rev);
        }
        if let Some(r) = runner {
            if let Some(rr) = self.data.runners.get_mut(&r) {
                rr.team = Some((team, leg));
                rr.meta.touch(rev);
            }
            self.mark_runner(r, [None], rev);
        }
        self.mark_team(team, rev);
        for r in [previous, runner].into_iter().flatten() {
            self.rehash_runner(r);
        }
        Ok(())
    }

    /// Sets the team start time used by the first leg.
    pub fn set_team_start_time(&mut self, team: TeamId, time: Time) -> Result<(), EditError> {
        self.team_or_err(team)?;
        self.update_team(team, |t| t.start_time = time);
        Ok(())
    }

    /// Sets or clears the manual team status.
    pub fn set_team_manual_status(&mut self, team: TeamId, status: Option<RunStatus>) -> Result<(), EditError> {
        self.team_or_err(team)?;
        self.update_team(team, |t| t.manual_status = status);
        Ok(())
    }

    /// Card and course carried by the team as a whole.
    pub fn set_team_card(&mut self, team: TeamId, card: Option<CardId>, course: Option<CourseId>) -> Result<(), EditError> {
        self.team_or_err(team)?;
        if let Some(c) = card {
            self.card_or_err(c)?;
        }
        self.check_course(course)?;
        self.update_team(team, |t| {
            t.card = card;
            t.course = course;
        });
        Ok(())
    }

    // ---- helpers ----------------------------------------------------------

    fn parse_time(&self, text: &str) -> Result<Time, EditError> {
        clock::parse_time(text, self.config.ticks_per_second())
            .ok_or_else(|| rejected(EditError::InvalidTime(text.to_owned())))
    }

    fn runner_or_err(&self, id: RunnerId) -> Result<&Runner, EditError> {
        self.data.runner(id).ok_or_else(|| rejected(EditError::UnknownRunner(id)))
    }

    fn team_or_err(&self, id: TeamId) -> Result<&Team, EditError> {
        self.data.team(id).ok_or_else(|| rejected(EditError::UnknownTeam(id)))
    }

    fn card_or_err(&self, id: CardId) -> Result<&Card, EditError> {
        self.data.card(id).ok_or_else(|| rejected(EditError::UnknownCard(id)))
    }

    fn card_punch(&self, card: CardId, index: usize) -> Result<&Punch, EditError> {
        self.card_or_err(card)?
            .punches
            .get(index)
            .ok_or_else(|| rejected(EditError::PunchIndexOutOfRange { card, index }))
    }

    fn check_controls(&self, controls: &[ControlId]) -> Result<(), EditError> {
        match controls.iter().find(|c| self.data.control(**c).is_none()) {
            Some(missing) => Err(rejected(EditError::UnknownControl(*missing))),
            None => Ok(()),
        }
    }

    fn check_course(&self, course: Option<CourseId>) -> Result<(), EditError> {
        match course {
            Some(c) if self.data.course(c).is_none() => Err(rejected(EditError::UnknownCourse(c))),
            _ => Ok(()),
        }
    }

    fn check_class(&self, class: Option<ClassId>) -> Result<(), EditError> {
        match class {
            Some(c) if self.data.class(c).is_none() => Err(rejected(EditError::UnknownClass(c))),
            _ => Ok(()),
        }
    }

    fn check_club(&self, club: Option<ClubId>) -> Result<(), EditError> {
        match club {
            Some(c) if self.data.club(c).is_none() => Err(rejected(EditError::UnknownClub(c))),
            _ => Ok(()),
        }
    }

    /// Applies a durable runner edit and marks it under `marker`.
    fn update_runner(&mut self, id: RunnerId, marker: Option<ControlId>, f: impl FnOnce(&mut Runner)) -> Revision {
        let rev = self.bump();
        if let Some(r) = self.data.runners.get_mut(&id) {
            f(r);
            r.meta.touch(rev);
        }
        self.mark_runner(id, [marker], rev);
        rev
    }

    fn update_team(&mut self, id: TeamId, f: impl FnOnce(&mut Team)) -> Revision {
        let rev = self.bump();
        if let Some(t) = self.data.teams.get_mut(&id) {
            f(t);
            t.meta.touch(rev);
        }
        self.mark_team(id, rev);
        rev
    }

    fn rehash_runner(&mut self, id: RunnerId) {
        let card_no = self.data.runner(id).map(|r| r.card_no).unwrap_or(0);
        if card_no != 0 {
            self.rehash(card_no);
        }
    }

    fn mark_course_classes(&mut self, course: CourseId, rev: Revision) {
        for class in self.data.classes_using_course(course) {
            self.mark_class(class, None, rev);
        }
    }

    /// Links `card` and `runner` both ways, releasing the runner's previous
    /// card. The runner takes the card's number.
    fn attach_card(&mut self, card: CardId, runner: RunnerId, rev: Revision) {
        let Some(r) = self.data.runners.get(&runner) else {
            return;
        };
        let previous = r.card.filter(|c| *c != card);
        let old_no = r.card_no;
        if let Some(prev) = previous {
            self.release_card(prev, rev);
        }

        let card_no = match self.data.cards.get_mut(&card) {
            Some(c) => {
                c.owner = Some(runner);
                c.meta.touch(rev);
                c.card_no
            }
            None => return,
        };
        if let Some(r) = self.data.runners.get_mut(&runner) {
            r.card = Some(card);
            r.card_no = card_no;
            r.meta.touch(rev);
        }
        self.data.reindex_card_no(runner, old_no, card_no);
        self.mark_runner(runner, [None], rev);
        self.rehash_all([old_no, card_no].into_iter().filter(|c| *c != 0));
    }

    fn release_card(&mut self, card: CardId, rev: Revision) {
        let owner = self.data.cards.get_mut(&card).and_then(|c| {
            c.meta.touch(rev);
            c.owner.take()
        });
        if let Some(owner) = owner {
            if let Some(r) = self.data.runners.get_mut(&owner) {
                if r.card == Some(card) {
                    r.card = None;
                    r.meta.touch(rev);
                }
            }
            self.mark_runner(owner, [None], rev);
        }
    }

    /// Dirty-marker key for an edit of punch `index` on `card`: the control
    /// it is matched to, the finish key for finish punches, and class-wide
    /// otherwise (start punches, or when later legs shift with it).
    fn punch_marker(&self, card: CardId, index: usize, kind: PunchType) -> Option<ControlId> {
        match kind {
            PunchType::Finish => return Some(FINISH_CONTROL),
            PunchType::Control(_) => {}
            _ => return None,
        }
        let owner = self.data.card(card)?.owner?;
        let runner = self.data.runner(owner)?;
        let course = self.data.course_for(runner)?;
        let shifts_later_legs = course.controls.iter().any(|c| {
            self.data
                .control(*c)
                .is_some_and(|ctrl| ctrl.min_time > 0 || ctrl.status.is_untimed())
        });
        if shifts_later_legs {
            return None;
        }
        let inputs = self.data.runner_inputs(runner, &self.cache);
        if !self.cache.is_runner_fresh(owner, self.revision(), inputs, self.module_key()) {
            return None;
        }
        let position = self
            .cache
            .runner(owner)?
            .raw
            .evaluation
            .as_ref()?
            .matched
            .get(index)
            .copied()
            .flatten()?;
        course.controls.get(position).copied()
    }
}

fn control_from_draft(draft: ControlDraft, rev: Revision) -> Control {
    let codes = if draft.codes.is_empty() {
        vec![draft.id]
    } else {
        draft.codes
    };
    Control {
        meta: EntityMeta::new(draft.id, rev),
        name: draft.name,
        codes,
        status: draft.status,
        time_adjust: draft.time_adjust,
        min_time: draft.min_time,
        points: draft.points,
    }
}
