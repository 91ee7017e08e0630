//! Revision-stamped result cache.
//!
//! Every computed result carries the global revision it was computed at. On
//! read it is reused when nothing changed since (same revision), or when the
//! newest revision among its inputs is not newer than the stamp, in which
//! case the stamp is simply moved forward. Anything else recomputes.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use hashbrown::{HashMap, hash_map::Entry};

use crate::{
    engine::{team::TeamResult, traits::{EntryKey, RunnerResult}},
    types::{ClassId, ControlId, Revision, RunnerId, TeamId},
};

/// Global data revision shared by everything that stamps computed state.
#[derive(Debug, Clone, Default)]
pub struct RevisionCounter(Arc<AtomicU64>);

impl RevisionCounter {
    /// Counter starting at revision 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest revision handed out.
    pub fn current(&self) -> Revision {
        self.0.load(Ordering::Acquire)
    }

    /// Advances the revision and returns the new value.
    pub fn bump(&self) -> Revision {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// A cached value and the revision it is valid at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computed<T> {
    /// Revision the value is valid at.
    pub revision: Revision,
    /// Value after the result module.
    pub value: T,
    /// Value of the built-in evaluation.
    pub raw: T,
    /// Key of the module that produced `value`.
    pub module: Option<String>,
}

impl<T> Computed<T> {
    /// True when the value can be served at `current` given the newest input
    /// revision `inputs` and the installed module.
    pub fn is_fresh(&self, current: Revision, inputs: Revision, module: Option<&str>) -> bool {
        self.module.as_deref() == module && (self.revision == current || inputs <= self.revision)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Reads served at the current revision.
    pub hits: u64,
    /// Reads served after re-stamping an older entry.
    pub restamps: u64,
    /// Results computed from scratch.
    pub recomputes: u64,
    /// Class rankings rebuilt.
    pub standings_rebuilds: u64,
}

/// Which class-wide ranking a [`Standings`] entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandingKind {
    /// Overall runner places.
    Runners,
    /// Split places at one control.
    Control(ControlId),
    /// Team places.
    Teams,
}

impl StandingKind {
    /// Dirty-marker key the ranking depends on.
    pub fn marker(&self) -> Option<ControlId> {
        match self {
            StandingKind::Control(c) => Some(*c),
            StandingKind::Runners | StandingKind::Teams => None,
        }
    }
}

/// Class-wide places valid at `revision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standings {
    /// Revision the places are valid at.
    pub revision: Revision,
    /// Module key the places were ranked under.
    pub module: Option<String>,
    /// Place per ranked entry.
    pub places: HashMap<EntryKey, u32>,
    /// Ranked entries in order.
    pub order: Vec<EntryKey>,
}

/// Cached runner and team results and class standings.
#[derive(Debug, Default)]
pub struct ResultCache {
    runners: HashMap<RunnerId, Computed<RunnerResult>>,
    teams: HashMap<TeamId, Computed<TeamResult>>,
    triggers: HashMap<EntryKey, Revision>,
    standings: HashMap<(ClassId, StandingKind), Standings>,
    stats: CacheStats,
}

impl ResultCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters since creation.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Forces `entry` to recompute on its next read.
    pub fn trigger(&mut self, entry: EntryKey, revision: Revision) {
        let slot = self.triggers.entry(entry).or_insert(0);
        *slot = (*slot).max(revision);
    }

    /// Last forced-recompute revision of `entry`.
    pub fn trigger_of(&self, entry: EntryKey) -> Revision {
        self.triggers.get(&entry).copied().unwrap_or(0)
    }

    /// Fresh runner entry, re-stamped when only the revision moved.
    pub fn cached_runner(
        &mut self,
        id: RunnerId,
        current: Revision,
        inputs: Revision,
        module: Option<&str>,
    ) -> Option<&Computed<RunnerResult>> {
        lookup_slot(&mut self.runners, &mut self.stats, id, current, inputs, module)
    }

    /// Fresh team entry, re-stamped when only the revision moved.
    pub fn cached_team(
        &mut self,
        id: TeamId,
        current: Revision,
        inputs: Revision,
        module: Option<&str>,
    ) -> Option<&Computed<TeamResult>> {
        lookup_slot(&mut self.teams, &mut self.stats, id, current, inputs, module)
    }

    /// Stores a recomputed runner result.
    pub fn store_runner(&mut self, id: RunnerId, computed: Computed<RunnerResult>) -> &Computed<RunnerResult> {
        self.stats.recomputes += 1;
        store(&mut self.runners, id, computed)
    }

    /// Stores a recomputed team result.
    pub fn store_team(&mut self, id: TeamId, computed: Computed<TeamResult>) -> &Computed<TeamResult> {
        self.stats.recomputes += 1;
        store(&mut self.teams, id, computed)
    }

    /// Cached runner entry, fresh or not.
    pub fn runner(&self, id: RunnerId) -> Option<&Computed<RunnerResult>> {
        self.runners.get(&id)
    }

    /// Freshness check without touching statistics or stamps.
    pub fn is_runner_fresh(&self, id: RunnerId, current: Revision, inputs: Revision, module: Option<&str>) -> bool {
        self.runners
            .get(&id)
            .is_some_and(|c| c.is_fresh(current, inputs, module))
    }

    /// Freshness check without touching statistics or stamps.
    pub fn is_team_fresh(&self, id: TeamId, current: Revision, inputs: Revision, module: Option<&str>) -> bool {
        self.teams
            .get(&id)
            .is_some_and(|c| c.is_fresh(current, inputs, module))
    }

    /// Cached standings of `class`, fresh or not.
    pub fn standings(&self, class: ClassId, kind: StandingKind) -> Option<&Standings> {
        self.standings.get(&(class, kind))
    }

    /// Stores rebuilt standings.
    pub fn store_standings(&mut self, class: ClassId, kind: StandingKind, standings: Standings) -> &Standings {
        self.stats.standings_rebuilds += 1;
        match self.standings.entry((class, kind)) {
            Entry::Occupied(mut e) => {
                e.insert(standings);
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(standings),
        }
    }

    /// Drops a removed runner.
    pub fn forget_runner(&mut self, id: RunnerId) {
        self.runners.remove(&id);
        self.triggers.remove(&EntryKey::Runner(id));
    }

    /// Drops a removed team.
    pub fn forget_team(&mut self, id: TeamId) {
        self.teams.remove(&id);
        self.triggers.remove(&EntryKey::Team(id));
    }

    /// Drops every cached value. Triggers are kept.
    pub fn clear(&mut self) {
        self.runners.clear();
        self.teams.clear();
        self.standings.clear();
    }
}

fn lookup_slot<'a, T>(
    slots: &'a mut HashMap<u32, Computed<T>>,
    stats: &mut CacheStats,
    key: u32,
    current: Revision,
    inputs: Revision,
    module: Option<&str>,
) -> Option<&'a Computed<T>> {
    let entry = slots.get_mut(&key)?;
    if !entry.is_fresh(current, inputs, module) {
        return None;
    }
    if entry.revision == current {
        stats.hits += 1;
    } else {
        entry.revision = current;
        stats.restamps += 1;
    }
    Some(entry)
}

fn store<T>(slots: &mut HashMap<u32, Computed<T>>, key: u32, computed: Computed<T>) -> &Computed<T> {
    match slots.entry(key) {
        Entry::Occupied(mut e) => {
            e.insert(computed);
            e.into_mut()
        }
        Entry::Vacant(e) => e.insert(computed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn computed(revision: Revision) -> Computed<u32> {
        Computed {
            revision,
            value: 1,
            raw: 1,
            module: None,
        }
    }

    #[test]
    fn unchanged_inputs_restamp_instead_of_recompute() {
        let mut slots = HashMap::new();
        let mut stats = CacheStats::default();
        store(&mut slots, 1, computed(3));

        assert!(lookup_slot(&mut slots, &mut stats, 1, 3, 9, None).is_some());
        assert_eq!(stats.hits, 1);

        assert!(lookup_slot(&mut slots, &mut stats, 1, 7, 3, None).is_some());
        assert_eq!(stats.restamps, 1);
        assert_eq!(slots[&1].revision, 7);

        assert!(lookup_slot(&mut slots, &mut stats, 1, 8, 8, None).is_none());
        assert!(lookup_slot(&mut slots, &mut stats, 1, 7, 0, Some("bonus")).is_none());
    }

    #[test]
    fn revision_counter_is_shared() {
        let a = RevisionCounter::new();
        let b = a.clone();
        assert_eq!(a.bump(), 1);
        assert_eq!(b.bump(), 2);
        assert_eq!(a.current(), 2);
    }
}
