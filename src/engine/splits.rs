//! Split tables and their normalization across loop/forked courses.
//!
//! Raw split entries are indexed by position on one runner's course. Each
//! entry also carries a [`LegKey`] naming the leg by its end points and the
//! number of times that exact leg occurred so far. Leg keys are the same for
//! runners who run loop iterations in a different order, which makes
//! [`SplitTable::normalize`] a plain reordering into the class's canonical
//! order.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::{ControlId, Time};

/// Identity of one leg: `from` (start for `None`) to `to`, n-th occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LegKey {
    /// Previous control, `None` for the start.
    pub from: Option<ControlId>,
    /// Control the leg ends at.
    pub to: ControlId,
    /// 1-based occurrence of this exact leg on the course.
    pub occurrence: u32,
}

/// Leg keys of a control sequence.
pub fn leg_keys(controls: &[ControlId]) -> Vec<LegKey> {
    let mut counts: HashMap<(Option<ControlId>, ControlId), u32> = HashMap::new();
    let mut prev = None;
    controls
        .iter()
        .map(|&to| {
            let n = counts.entry((prev, to)).or_insert(0);
            *n += 1;
            let key = LegKey {
                from: prev,
                to,
                occurrence: *n,
            };
            prev = Some(to);
            key
        })
        .collect()
}

/// Outcome at one course position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitStatus {
    /// Punched with a valid time.
    Ok,
    /// Never punched.
    Missing,
    /// Punched, but the time is invalid or withheld.
    NoTime,
}

/// Split data for one course position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitEntry {
    /// Position on the runner's course.
    pub course_index: usize,
    /// Control at that position.
    pub control: ControlId,
    /// Leg identity.
    pub key: LegKey,
    /// Punch outcome.
    pub status: SplitStatus,
    /// Recorded punch time.
    pub punch_time: Option<Time>,
    /// Time after fixed and dynamic corrections.
    pub adjusted: Option<Time>,
}

/// Time of one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegSplit {
    /// Leg time in ticks.
    Time(Time),
    /// Control not punched.
    Missing,
    /// Punched without usable time.
    NoTime,
}

/// Per-position split data of one evaluated card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SplitTable {
    /// Start time used for the evaluation.
    pub start: Option<Time>,
    /// Adjusted finish time.
    pub finish: Option<Time>,
    /// Entries in course order (or canonical order once normalized).
    pub entries: Vec<SplitEntry>,
}

impl SplitTable {
    /// Leg times: one per entry plus the leg to the finish.
    ///
    /// A leg is measured from the last position with a usable time.
    pub fn leg_times(&self) -> Vec<LegSplit> {
        let mut prev = self.start;
        let mut out = Vec::with_capacity(self.entries.len() + 1);
        for e in &self.entries {
            let leg = match (e.status, e.adjusted, prev) {
                (SplitStatus::Missing, _, _) => LegSplit::Missing,
                (SplitStatus::NoTime, adj, _) => {
                    if adj.is_some() {
                        prev = adj;
                    }
                    LegSplit::NoTime
                }
                (SplitStatus::Ok, Some(t), Some(p)) => {
                    prev = Some(t);
                    LegSplit::Time(t - p)
                }
                (SplitStatus::Ok, adj, _) => {
                    if adj.is_some() {
                        prev = adj;
                    }
                    LegSplit::NoTime
                }
            };
            out.push(leg);
        }
        out.push(match (self.finish, prev) {
            (Some(f), Some(p)) => LegSplit::Time(f - p),
            _ => LegSplit::Missing,
        });
        out
    }

    /// Elapsed time from start at the first valid punch of `control`.
    pub fn time_at(&self, control: ControlId) -> Option<Time> {
        let start = self.start?;
        self.entries
            .iter()
            .find(|e| e.control == control && e.status == SplitStatus::Ok)
            .and_then(|e| e.adjusted)
            .map(|t| t - start)
    }

    /// Elapsed time from start at the leg `key`.
    pub fn time_at_leg(&self, key: &LegKey) -> Option<Time> {
        let start = self.start?;
        self.entries
            .iter()
            .find(|e| e.key == *key && e.status == SplitStatus::Ok)
            .and_then(|e| e.adjusted)
            .map(|t| t - start)
    }

    /// Entries reordered into `layout` order; legs unknown to the layout keep
    /// their relative order at the end.
    pub fn normalize(&self, layout: &CanonicalLayout) -> SplitTable {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| layout.position(&e.key).unwrap_or(usize::MAX));
        SplitTable {
            start: self.start,
            finish: self.finish,
            entries,
        }
    }

    /// True when entries already follow `layout` order.
    pub fn is_normalized(&self, layout: &CanonicalLayout) -> bool {
        self.entries
            .windows(2)
            .all(|w| {
                layout.position(&w[0].key).unwrap_or(usize::MAX)
                    <= layout.position(&w[1].key).unwrap_or(usize::MAX)
            })
    }
}

/// Canonical leg order for comparing runners of one class.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalLayout {
    keys: Vec<LegKey>,
    pos: HashMap<LegKey, usize>,
}

impl CanonicalLayout {
    /// Layout from courses in priority order: legs of the first course in
    /// running order, then legs only present in later courses.
    pub fn from_courses<'a, I>(courses: I) -> Self
    where
        I: IntoIterator<Item = &'a [ControlId]>,
    {
        let mut layout = Self::default();
        for controls in courses {
            for key in leg_keys(controls) {
                if !layout.pos.contains_key(&key) {
                    layout.pos.insert(key, layout.keys.len());
                    layout.keys.push(key);
                }
            }
        }
        layout
    }

    /// Canonical position of `key`.
    pub fn position(&self, key: &LegKey) -> Option<usize> {
        self.pos.get(key).copied()
    }

    /// Legs in canonical order.
    pub fn keys(&self) -> &[LegKey] {
        &self.keys
    }

    /// True when no legs are known.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(controls: &[ControlId]) -> SplitTable {
        let entries = leg_keys(controls)
            .into_iter()
            .enumerate()
            .map(|(i, key)| SplitEntry {
                course_index: i,
                control: key.to,
                key,
                status: SplitStatus::Ok,
                punch_time: Some(100 * (i as Time + 1)),
                adjusted: Some(100 * (i as Time + 1)),
            })
            .collect();
        SplitTable {
            start: Some(0),
            finish: Some(100 * (controls.len() as Time + 1)),
            entries,
        }
    }

    #[test]
    fn butterfly_variants_share_canonical_order() {
        let a: &[ControlId] = &[31, 50, 41, 42, 50, 61, 62, 50, 99];
        let b: &[ControlId] = &[31, 50, 61, 62, 50, 41, 42, 50, 99];
        let layout = CanonicalLayout::from_courses([a, b]);

        let na = table(a).normalize(&layout);
        let nb = table(b).normalize(&layout);
        let ka: Vec<LegKey> = na.entries.iter().map(|e| e.key).collect();
        let kb: Vec<LegKey> = nb.entries.iter().map(|e| e.key).collect();
        assert_eq!(ka, kb);
        assert!(nb.is_normalized(&layout));
        assert_eq!(nb.normalize(&layout), nb);
    }

    #[test]
    fn leg_times_skip_missing_positions() {
        let mut t = table(&[31, 32]);
        t.entries[1].status = SplitStatus::Missing;
        t.entries[1].adjusted = None;
        assert_eq!(
            t.leg_times(),
            vec![LegSplit::Time(100), LegSplit::Missing, LegSplit::Time(200)]
        );
    }

    #[test]
    fn repeated_leg_counts_occurrences() {
        let keys = leg_keys(&[31, 32, 31, 32]);
        assert_eq!(keys[1].occurrence, 1);
        assert_eq!(keys[3].occurrence, 2);
        assert_eq!(keys[3].from, Some(31));
    }
}
