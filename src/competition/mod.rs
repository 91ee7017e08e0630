//! The competition: entity tables, free punches, the punch index and the
//! result cache behind one single-writer API.
//!
//! Every durable edit bumps the shared [`RevisionCounter`], stamps the edited
//! entity and marks what depends on it: the runner (or team) cache entry and
//! its class's dirty markers, keyed by the control the edit concerns when
//! that is known. Punch-index rehashes report [`HashChange`]s that are marked
//! the same way. Queries recompute lazily.

/// Entity tables and resolver lookups.
pub mod data;
/// Edit commands.
pub mod edit;
/// Result and standings queries.
pub mod results;
/// Synchronization with a shared store.
pub mod sync;

use thiserror::Error;

use crate::{
    config::EngineConfig,
    core::{
        punch_index::{HashChange, PunchIndex},
        store::{PunchStore, StoreError},
    },
    engine::{
        cache::{CacheStats, ResultCache, RevisionCounter},
        traits::{EntryKey, ResultModule},
    },
    op::StoredOp,
    origin::OriginCodec,
    types::{
        CardId, CardNo, ClassId, ClubId, ControlId, CourseId, Revision, RunnerId, TeamId,
    },
};

use self::data::EntityData;

/// Rejected edit or query. Nothing was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// No live runner with this id.
    #[error("unknown runner {0}")]
    UnknownRunner(RunnerId),
    /// No live team with this id.
    #[error("unknown team {0}")]
    UnknownTeam(TeamId),
    /// No live card with this id.
    #[error("unknown card {0}")]
    UnknownCard(CardId),
    /// No live course with this id.
    #[error("unknown course {0}")]
    UnknownCourse(CourseId),
    /// No live control with this id.
    #[error("unknown control {0}")]
    UnknownControl(ControlId),
    /// No live class with this id.
    #[error("unknown class {0}")]
    UnknownClass(ClassId),
    /// No live club with this id.
    #[error("unknown club {0}")]
    UnknownClub(ClubId),
    /// The card already belongs to a runner.
    #[error("card {card} is owned by runner {owner}")]
    CardOwned {
        /// Requested card.
        card: CardId,
        /// Runner holding it.
        owner: RunnerId,
    },
    /// Time text that does not parse.
    #[error("invalid time {0:?}")]
    InvalidTime(String),
    /// Control id collides with a special punch code.
    #[error("control id {0} is reserved for special punches")]
    ReservedControlId(ControlId),
    /// A control with this id exists.
    #[error("control {0} already exists")]
    DuplicateControl(ControlId),
    /// Card punch position past the end of the card.
    #[error("card {card} has no punch at index {index}")]
    PunchIndexOutOfRange {
        /// Edited card.
        card: CardId,
        /// Requested punch position.
        index: usize,
    },
    /// A runner can run for one team only.
    #[error("runner {runner} already runs for team {team}")]
    RunnerInOtherTeam {
        /// Runner being placed.
        runner: RunnerId,
        /// Team the runner already belongs to.
        team: TeamId,
    },
    /// Free-punch store rejected the edit.
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub(crate) fn rejected(err: EditError) -> EditError {
    tracing::warn!(%err, "edit rejected");
    err
}

/// One competition: entities, free punches, punch index and result cache.
///
/// Single writer; every edit runs to completion before the next one.
pub struct Competition {
    config: EngineConfig,
    codec: OriginCodec,
    revisions: RevisionCounter,
    data: EntityData,
    punches: PunchStore,
    index: PunchIndex,
    cache: ResultCache,
    module: Option<Box<dyn ResultModule>>,
}

impl std::fmt::Debug for Competition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Competition")
            .field("revision", &self.revisions.current())
            .field("runners", &self.data.runners.len())
            .field("punches", &self.punches.len())
            .field("module", &self.module.as_ref().map(|m| m.key().to_owned()))
            .finish_non_exhaustive()
    }
}

impl Competition {
    /// Empty competition with its own revision counter.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_revisions(config, RevisionCounter::new())
    }

    /// Competition stamping computed state with a shared revision counter.
    pub fn with_revisions(config: EngineConfig, revisions: RevisionCounter) -> Self {
        let codec = OriginCodec::for_config(&config);
        let punches = PunchStore::with_codec(codec);
        Self::from_parts(config, revisions, punches)
    }

    /// Competition around free punches restored from a journal.
    pub fn with_punch_store(config: EngineConfig, punches: PunchStore) -> Self {
        Self::from_parts(config, RevisionCounter::new(), punches)
    }

    fn from_parts(config: EngineConfig, revisions: RevisionCounter, punches: PunchStore) -> Self {
        Self {
            codec: OriginCodec::for_config(&config),
            index: PunchIndex::new(config.duplicate_tolerance()),
            config,
            revisions,
            data: EntityData::default(),
            punches,
            cache: ResultCache::new(),
            module: None,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Origin codec for punch provenance tags.
    pub fn codec(&self) -> &OriginCodec {
        &self.codec
    }

    /// Current data revision.
    pub fn revision(&self) -> Revision {
        self.revisions.current()
    }

    /// Handle to the shared revision counter.
    pub fn revisions(&self) -> RevisionCounter {
        self.revisions.clone()
    }

    /// Entity tables.
    pub fn data(&self) -> &EntityData {
        &self.data
    }

    /// Free-punch store.
    pub fn punches(&self) -> &PunchStore {
        &self.punches
    }

    /// Recompute and standings-rebuild counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Journal ops of free-punch edits not yet handed to a sink.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        self.punches.drain_pending_ops()
    }

    /// Installs (or removes) the result module. Cached results produced under
    /// another module key are recomputed on their next read.
    pub fn set_result_module(&mut self, module: Option<Box<dyn ResultModule>>) {
        tracing::debug!(
            module = module.as_ref().map(|m| m.key()).unwrap_or("builtin"),
            "result module installed"
        );
        self.module = module;
    }

    /// Key of the installed result module, if any.
    pub fn module_key(&self) -> Option<&str> {
        self.module.as_ref().map(|m| m.key())
    }

    /// Marks `class` changed at `control` (class-wide for `None`).
    pub fn mark_class_changed(&mut self, class: ClassId, control: Option<ControlId>) -> Result<(), EditError> {
        if self.data.class(class).is_none() {
            return Err(rejected(EditError::UnknownClass(class)));
        }
        let rev = self.bump();
        self.mark_class(class, control, rev);
        Ok(())
    }

    fn bump(&mut self) -> Revision {
        self.revisions.bump()
    }

    fn mark_class(&mut self, class: ClassId, control: Option<ControlId>, rev: Revision) {
        if let Some(c) = self.data.classes.get_mut(&class) {
            c.dirty.mark(control, rev);
        }
    }

    /// Forces a runner recompute and marks its class (and team) for the
    /// given controls.
    fn mark_runner<I>(&mut self, id: RunnerId, controls: I, rev: Revision)
    where
        I: IntoIterator<Item = Option<ControlId>>,
    {
        self.cache.trigger(EntryKey::Runner(id), rev);
        let Some(runner) = self.data.runners.get(&id) else {
            return;
        };
        let (class, team) = (runner.class, runner.team);
        if let Some(class) = class {
            for control in controls {
                self.mark_class(class, control, rev);
            }
        }
        if let Some((team, _)) = team {
            self.mark_team(team, rev);
        }
    }

    fn mark_team(&mut self, id: TeamId, rev: Revision) {
        self.cache.trigger(EntryKey::Team(id), rev);
        if let Some(class) = self.data.teams.get(&id).and_then(|t| t.class) {
            self.mark_class(class, None, rev);
        }
    }

    /// Builds the punch index if it is cold and marks what the rebuild moved.
    fn ensure_index(&mut self) {
        let changes = self.index.ensure_built(&self.punches, &self.data);
        self.apply_hash_changes(&changes);
    }

    fn rehash(&mut self, card_no: CardNo) {
        let changes = self.index.rehash_card(card_no, &self.punches, &self.data);
        self.apply_hash_changes(&changes);
    }

    fn rehash_all<I: IntoIterator<Item = CardNo>>(&mut self, cards: I) {
        let mut seen = Vec::new();
        for card_no in cards {
            if !seen.contains(&card_no) {
                seen.push(card_no);
                self.rehash(card_no);
            }
        }
    }

    /// Structural edits (course layout, control codes) refile everything on
    /// the next read.
    fn invalidate_index(&mut self) {
        self.index.invalidate();
    }

    fn apply_hash_changes(&mut self, changes: &[HashChange]) {
        if changes.is_empty() {
            return;
        }
        let rev = self.bump();
        for change in changes {
            for runner in change.runners() {
                self.mark_runner(runner, change.controls_for(runner), rev);
            }
        }
        tracing::debug!(changes = changes.len(), revision = rev, "punch classification changed");
    }
}
