//! Two-level punch index: hash type -> card number -> punches.
//!
//! Every live free punch is filed under exactly one `(hash type, card)`
//! bucket. The hash type is whatever [`PunchIndex`] classification currently
//! yields for the punch: a matched `(control, race)` pair when the punch can
//! be bound to a position on the course of the runner owning the card at the
//! punch time, the raw code otherwise, and a fixed key for finish punches.
//!
//! Classification of a card's punches only depends on that card's punches
//! (slot occupancy is tracked per card), so rehashing one card in temporal
//! order files its punches exactly as a full rebuild would.

use std::ops::{Deref, DerefMut};

use hashbrown::{HashMap, HashSet};

use crate::{
    core::{indices::HashType, store::PunchStore},
    types::{CardNo, ControlId, PunchId, PunchType, RaceIndex, RunnerId, Time},
};

/// One position of a course as seen by the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSlot {
    /// Control at this position.
    pub control: ControlId,
    /// Codes accepted by the control.
    pub codes: Vec<u32>,
}

/// Runner owning a card number at some time, with its course layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardOwner {
    /// Owning runner.
    pub runner: RunnerId,
    /// Race index of the runner.
    pub race: RaceIndex,
    /// Course positions in running order (empty without a course).
    pub slots: Vec<CourseSlot>,
}

/// Lookup of the runner owning a card number at a given time.
pub trait CardResolver {
    /// Owner of `card_no` at `time`, if any.
    fn owner_at(&self, card_no: CardNo, time: Time) -> Option<CardOwner>;
}

/// Course position a punch is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotMatch {
    /// Matched control.
    pub control: ControlId,
    /// Position on the owner's course.
    pub course_index: usize,
    /// Race index of the owner.
    pub race: RaceIndex,
}

/// Result of classifying one punch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Classification {
    /// Bucket key.
    pub hash: HashType,
    /// Runner owning the card at the punch time.
    pub owner: Option<RunnerId>,
    /// Bound course position.
    pub slot: Option<SlotMatch>,
}

impl Classification {
    /// Control id whose results depend on the punch, if any.
    pub fn affected_control(&self) -> Option<ControlId> {
        if let Some(slot) = self.slot {
            return Some(slot.control);
        }
        (self.hash == HashType::finish()).then(|| self.hash.control())
    }
}

/// Classification change of one punch produced by a rehash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashChange {
    /// Punch whose filing changed.
    pub punch: PunchId,
    /// Card number the punch is now (or was last) filed under.
    pub card_no: CardNo,
    /// Previous classification, `None` if it was not filed.
    pub before: Option<Classification>,
    /// New classification, `None` if it is no longer filed.
    pub after: Option<Classification>,
}

impl HashChange {
    /// Runners whose results the change affects (old and new owner).
    pub fn runners(&self) -> Vec<RunnerId> {
        let mut out = Vec::with_capacity(2);
        for c in [self.before, self.after].into_iter().flatten() {
            if let Some(r) = c.owner {
                if !out.contains(&r) {
                    out.push(r);
                }
            }
        }
        out
    }

    /// Controls affected for `runner` (old and new bound control).
    pub fn controls_for(&self, runner: RunnerId) -> Vec<Option<ControlId>> {
        let mut out = Vec::with_capacity(2);
        for c in [self.before, self.after].into_iter().flatten() {
            if c.owner == Some(runner) {
                let ctrl = c.affected_control();
                if !out.contains(&ctrl) {
                    out.push(ctrl);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexState {
    Cold,
    Rebuilding,
    Ready,
}

#[derive(Debug, Clone, Copy)]
struct Filed {
    card_no: CardNo,
    class: Classification,
}

type SlotKey = (CardNo, RunnerId, usize);

/// Hashed index of free punches.
#[derive(Debug)]
pub struct PunchIndex {
    buckets: HashMap<HashType, HashMap<CardNo, Vec<PunchId>>>,
    filed: HashMap<PunchId, Filed>,
    cards: HashMap<CardNo, Vec<PunchId>>,
    stale: HashMap<PunchId, Classification>,
    state: IndexState,
    tolerance: Time,
}

impl PunchIndex {
    /// Empty (cold) index using `tolerance` ticks for duplicate re-reads.
    pub fn new(tolerance: Time) -> Self {
        Self {
            buckets: HashMap::new(),
            filed: HashMap::new(),
            cards: HashMap::new(),
            stale: HashMap::new(),
            state: IndexState::Cold,
            tolerance,
        }
    }

    /// Duplicate re-read tolerance in ticks.
    pub fn tolerance(&self) -> Time {
        self.tolerance
    }

    /// True once built and not invalidated since.
    pub fn is_ready(&self) -> bool {
        self.state == IndexState::Ready
    }

    /// True while a full rebuild is running.
    pub fn is_rebuilding(&self) -> bool {
        self.state == IndexState::Rebuilding
    }

    /// Number of filed punches.
    pub fn len(&self) -> usize {
        self.filed.len()
    }

    /// True when nothing is filed.
    pub fn is_empty(&self) -> bool {
        self.filed.is_empty()
    }

    /// Drops all buckets; the next [`PunchIndex::ensure_built`] rebuilds them.
    ///
    /// Current classifications are kept aside so the rebuild can report what
    /// changed.
    pub fn invalidate(&mut self) {
        if self.state == IndexState::Rebuilding {
            return;
        }
        for (id, filed) in self.filed.drain() {
            self.stale.insert(id, filed.class);
        }
        self.buckets.clear();
        self.cards.clear();
        self.state = IndexState::Cold;
        tracing::debug!(stale = self.stale.len(), "punch index invalidated");
    }

    /// Rebuilds the index if it is cold.
    pub fn ensure_built(&mut self, store: &PunchStore, resolver: &dyn CardResolver) -> Vec<HashChange> {
        match self.state {
            IndexState::Ready | IndexState::Rebuilding => Vec::new(),
            IndexState::Cold => self.rebuild(store, resolver),
        }
    }

    /// Refiles every live punch of `card_no`.
    ///
    /// The new filing is computed first and swapped in afterwards, so readers
    /// never observe a half-applied rehash. Requests made while a full rebuild
    /// runs are ignored; a cold index is rebuilt completely instead.
    pub fn rehash_card(
        &mut self,
        card_no: CardNo,
        store: &PunchStore,
        resolver: &dyn CardResolver,
    ) -> Vec<HashChange> {
        match self.state {
            IndexState::Rebuilding => {
                tracing::debug!(card_no, "rehash suppressed during rebuild");
                return Vec::new();
            }
            IndexState::Cold => return self.rebuild(store, resolver),
            IndexState::Ready => {}
        }

        let mut punches: Vec<(PunchId, Time, PunchType)> = store
            .by_card(card_no)
            .into_iter()
            .map(|p| (p.id, p.punch.time, p.punch.kind))
            .collect();
        punches.sort_by_key(|(id, time, _)| (*time, *id));

        let mut bound = HashMap::new();
        let fresh: Vec<(PunchId, Classification)> = punches
            .iter()
            .map(|(id, time, kind)| {
                let class = classify(card_no, *time, *kind, resolver, self.tolerance, &mut bound);
                (*id, class)
            })
            .collect();

        let mut before: HashMap<PunchId, (CardNo, Classification)> = HashMap::new();
        for id in self.cards.remove(&card_no).unwrap_or_default() {
            if let Some(filed) = self.filed.remove(&id) {
                self.unfile_bucket(filed.class.hash, filed.card_no, id);
                before.insert(id, (filed.card_no, filed.class));
            }
        }
        for (id, _) in &fresh {
            if let Some(filed) = self.filed.remove(id) {
                // Filed under the card number it had before a card edit.
                self.unfile_bucket(filed.class.hash, filed.card_no, *id);
                if let Some(list) = self.cards.get_mut(&filed.card_no) {
                    list.retain(|x| x != id);
                }
                before.insert(*id, (filed.card_no, filed.class));
            }
        }

        let mut changes = Vec::new();
        let mut seen = HashSet::new();
        for (id, class) in &fresh {
            self.file(*id, card_no, *class);
            seen.insert(*id);
            let prev = before.get(id).map(|(_, c)| *c);
            if prev != Some(*class) {
                changes.push(HashChange {
                    punch: *id,
                    card_no,
                    before: prev,
                    after: Some(*class),
                });
            }
        }
        for (id, (old_card, class)) in before {
            if !seen.contains(&id) {
                changes.push(HashChange {
                    punch: id,
                    card_no: old_card,
                    before: Some(class),
                    after: None,
                });
            }
        }

        tracing::debug!(card_no, punches = fresh.len(), changed = changes.len(), "card rehashed");
        changes
    }

    /// Punches of `card_no` filed under `hash`.
    pub fn lookup(&self, hash: HashType, card_no: CardNo) -> &[PunchId] {
        self.buckets
            .get(&hash)
            .and_then(|cards| cards.get(&card_no))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First punch of `card_no` bound to `control` on `race`.
    ///
    /// Matched keys on race 0 share their value with raw codes, so unmatched
    /// punches in the same bucket are skipped.
    pub fn find_punch(&self, card_no: CardNo, control: ControlId, race: RaceIndex) -> Option<PunchId> {
        self.lookup(HashType::matched(control, race), card_no)
            .iter()
            .copied()
            .find(|id| {
                self.match_of(*id)
                    .and_then(|c| c.slot)
                    .is_some_and(|s| s.control == control && s.race == race)
            })
    }

    /// True when `card_no` has a punch matched to `control` on `race`.
    pub fn has_punch(&self, card_no: CardNo, control: ControlId, race: RaceIndex) -> bool {
        self.find_punch(card_no, control, race).is_some()
    }

    /// Current classification of a filed punch.
    pub fn match_of(&self, id: PunchId) -> Option<&Classification> {
        self.filed.get(&id).map(|f| &f.class)
    }

    /// Punches filed for `card_no`.
    pub fn card_members(&self, card_no: CardNo) -> &[PunchId] {
        self.cards.get(&card_no).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Decoded `(control, race)` pairs of all non-empty buckets.
    pub fn active_controls(&self) -> Vec<(ControlId, RaceIndex)> {
        let mut out: Vec<(ControlId, RaceIndex)> = self
            .buckets
            .iter()
            .filter(|(_, cards)| cards.values().any(|v| !v.is_empty()))
            .map(|(hash, _)| hash.decode())
            .collect();
        out.sort_unstable();
        out
    }

    /// Every `(hash type, card, punch)` entry.
    pub fn entries(&self) -> impl Iterator<Item = (HashType, CardNo, PunchId)> + '_ {
        self.buckets.iter().flat_map(|(hash, cards)| {
            cards
                .iter()
                .flat_map(move |(card, ids)| ids.iter().map(move |id| (*hash, *card, *id)))
        })
    }

    fn rebuild(&mut self, store: &PunchStore, resolver: &dyn CardResolver) -> Vec<HashChange> {
        let Some(mut guard) = RebuildGuard::enter(self) else {
            return Vec::new();
        };

        let mut all: Vec<(PunchId, CardNo, Time, PunchType)> = store
            .live()
            .map(|p| (p.id, p.card_no, p.punch.time, p.punch.kind))
            .collect();
        all.sort_by_key(|(id, _, time, _)| (*time, *id));

        let stale = std::mem::take(&mut guard.stale);
        guard.buckets.clear();
        guard.filed.clear();
        guard.cards.clear();

        let tolerance = guard.tolerance;
        let mut bound = HashMap::new();
        let mut changes = Vec::new();
        for (id, card_no, time, kind) in &all {
            let class = classify(*card_no, *time, *kind, resolver, tolerance, &mut bound);
            guard.file(*id, *card_no, class);
            let prev = stale.get(id).copied();
            if prev != Some(class) {
                changes.push(HashChange {
                    punch: *id,
                    card_no: *card_no,
                    before: prev,
                    after: Some(class),
                });
            }
        }
        for (id, class) in stale {
            if !guard.filed.contains_key(&id) {
                let card_no = store.get(id).map(|p| p.card_no).unwrap_or(0);
                changes.push(HashChange {
                    punch: id,
                    card_no,
                    before: Some(class),
                    after: None,
                });
            }
        }

        guard.complete();
        tracing::debug!(punches = all.len(), changed = changes.len(), "punch index rebuilt");
        changes
    }

    fn file(&mut self, id: PunchId, card_no: CardNo, class: Classification) {
        self.buckets
            .entry(class.hash)
            .or_default()
            .entry(card_no)
            .or_default()
            .push(id);
        self.cards.entry(card_no).or_default().push(id);
        self.filed.insert(id, Filed { card_no, class });
    }

    fn unfile_bucket(&mut self, hash: HashType, card_no: CardNo, id: PunchId) {
        let Some(cards) = self.buckets.get_mut(&hash) else {
            return;
        };
        if let Some(ids) = cards.get_mut(&card_no) {
            ids.retain(|x| *x != id);
            if ids.is_empty() {
                cards.remove(&card_no);
            }
        }
        if cards.is_empty() {
            self.buckets.remove(&hash);
        }
    }
}

/// Marks the index as rebuilding for its lifetime. A rebuild that does not
/// reach [`RebuildGuard::complete`] leaves the index cold.
struct RebuildGuard<'a> {
    index: &'a mut PunchIndex,
    completed: bool,
}

impl<'a> RebuildGuard<'a> {
    fn enter(index: &'a mut PunchIndex) -> Option<Self> {
        if index.state == IndexState::Rebuilding {
            return None;
        }
        index.state = IndexState::Rebuilding;
        Some(Self {
            index,
            completed: false,
        })
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Deref for RebuildGuard<'_> {
    type Target = PunchIndex;

    fn deref(&self) -> &PunchIndex {
        self.index
    }
}

impl DerefMut for RebuildGuard<'_> {
    fn deref_mut(&mut self) -> &mut PunchIndex {
        self.index
    }
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.index.state = if self.completed {
            IndexState::Ready
        } else {
            IndexState::Cold
        };
    }
}

/// Classifies one punch of `card_no`, binding it to the first free course
/// position accepting its code. A position already holding a punch within
/// `tolerance` of `time` is reused: that is a re-read of the same punch, not a
/// new loop occurrence.
fn classify(
    card_no: CardNo,
    time: Time,
    kind: PunchType,
    resolver: &dyn CardResolver,
    tolerance: Time,
    bound: &mut HashMap<SlotKey, Time>,
) -> Classification {
    let owner = resolver.owner_at(card_no, time);
    let owner_id = owner.as_ref().map(|o| o.runner);

    if kind == PunchType::Finish {
        return Classification {
            hash: HashType::finish(),
            owner: owner_id,
            slot: None,
        };
    }

    if let (Some(owner), PunchType::Control(code)) = (owner.as_ref(), kind) {
        for (k, slot) in owner.slots.iter().enumerate() {
            if !slot.codes.contains(&code) {
                continue;
            }
            let key = (card_no, owner.runner, k);
            let accept = match bound.get(&key) {
                None => {
                    bound.insert(key, time);
                    true
                }
                Some(t) => (i64::from(*t) - i64::from(time)).abs() < i64::from(tolerance),
            };
            if accept {
                return Classification {
                    hash: HashType::matched(slot.control, owner.race),
                    owner: owner_id,
                    slot: Some(SlotMatch {
                        control: slot.control,
                        course_index: k,
                        race: owner.race,
                    }),
                };
            }
        }
    }

    Classification {
        hash: HashType::unmatched(kind.code()),
        owner: owner_id,
        slot: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punch::FreePunchDraft;

    struct OneRunner {
        card_no: CardNo,
        slots: Vec<CourseSlot>,
    }

    impl CardResolver for OneRunner {
        fn owner_at(&self, card_no: CardNo, _time: Time) -> Option<CardOwner> {
            (card_no == self.card_no).then(|| CardOwner {
                runner: 9,
                race: 0,
                slots: self.slots.clone(),
            })
        }
    }

    fn slot(control: ControlId) -> CourseSlot {
        CourseSlot {
            control,
            codes: vec![control],
        }
    }

    fn add(store: &mut PunchStore, card_no: CardNo, code: u32, time: Time) -> PunchId {
        store
            .insert(FreePunchDraft {
                card_no,
                kind: PunchType::from_code(code),
                time,
                unit: 0,
            })
            .expect("insert")
            .0
    }

    #[test]
    fn loop_control_binds_second_occurrence_unless_reread() {
        let resolver = OneRunner {
            card_no: 100,
            slots: vec![slot(31), slot(50), slot(32), slot(50)],
        };
        let mut store = PunchStore::new();
        let first = add(&mut store, 100, 50, 200);
        let reread = add(&mut store, 100, 50, 230);
        let second = add(&mut store, 100, 50, 900);

        let mut index = PunchIndex::new(60);
        index.ensure_built(&store, &resolver);

        let idx = |id| index.match_of(id).and_then(|c| c.slot).map(|s| s.course_index);
        assert_eq!(idx(first), Some(1));
        assert_eq!(idx(reread), Some(1));
        assert_eq!(idx(second), Some(3));
    }

    #[test]
    fn unknown_card_stays_unmatched() {
        let resolver = OneRunner {
            card_no: 100,
            slots: vec![slot(31)],
        };
        let mut store = PunchStore::new();
        let id = add(&mut store, 555, 31, 10);
        let mut index = PunchIndex::new(60);
        index.ensure_built(&store, &resolver);
        let class = index.match_of(id).copied().expect("filed");
        assert_eq!(class.hash, HashType::unmatched(31));
        assert_eq!(class.owner, None);
        assert_eq!(index.lookup(HashType::unmatched(31), 555), &[id]);
    }

    #[test]
    fn rehash_is_suppressed_while_rebuilding() {
        let resolver = OneRunner {
            card_no: 100,
            slots: vec![slot(31)],
        };
        let mut store = PunchStore::new();
        add(&mut store, 100, 31, 10);
        let mut index = PunchIndex::new(60);
        let mut guard = RebuildGuard::enter(&mut index).expect("enter");
        assert!(RebuildGuard::enter(&mut guard).is_none());
        assert!(guard.rehash_card(100, &store, &resolver).is_empty());
        drop(guard);
        assert!(!index.is_ready());
        assert_eq!(index.ensure_built(&store, &resolver).len(), 1);
        assert!(index.is_ready());
    }

    #[test]
    fn moving_a_punch_between_cards_refiles_it_once() {
        let resolver = OneRunner {
            card_no: 100,
            slots: vec![slot(31)],
        };
        let mut store = PunchStore::new();
        let id = add(&mut store, 200, 31, 10);
        let mut index = PunchIndex::new(60);
        index.ensure_built(&store, &resolver);
        assert_eq!(index.match_of(id).map(|c| c.owner), Some(None));

        store
            .patch(
                id,
                crate::punch::FreePunchPatch {
                    card_no: Some(100),
                    ..Default::default()
                },
            )
            .expect("patch");
        let changes = index.rehash_card(100, &store, &resolver);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].runners(), vec![9]);
        assert!(index.rehash_card(200, &store, &resolver).is_empty());
        assert_eq!(index.entries().count(), 1);
        assert!(index.has_punch(100, 31, 0));
    }

    #[test]
    fn raw_code_sharing_a_control_id_is_not_found_as_that_control() {
        // Control 50 is punched with code 45; code 50 is a different unit.
        let resolver = OneRunner {
            card_no: 100,
            slots: vec![CourseSlot {
                control: 50,
                codes: vec![45],
            }],
        };
        let mut store = PunchStore::new();
        let stray = add(&mut store, 100, 50, 10);
        let mut index = PunchIndex::new(60);
        index.ensure_built(&store, &resolver);
        assert_eq!(index.lookup(HashType::matched(50, 0), 100), &[stray]);
        assert_eq!(index.find_punch(100, 50, 0), None);

        let real = add(&mut store, 100, 45, 20);
        index.rehash_card(100, &store, &resolver);
        assert_eq!(index.find_punch(100, 50, 0), Some(real));
        assert!(index.has_punch(100, 50, 0));
    }
}
