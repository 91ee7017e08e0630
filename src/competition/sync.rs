//! Pushing local changes to, and pulling remote changes from, a shared
//! store.
//!
//! Free punches are not synchronized here; they travel through the punch
//! journal.

use hashbrown::HashMap;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    model::{
        Club, EntityKind,
        card::Card,
        class::Class,
        course::{Control, Course},
        meta::{EntityMeta, Stamp},
        runner::Runner,
        team::Team,
    },
    persist::{
        PersistError,
        sync::{MergeOutcome, Mergeable, SyncBackend},
    },
    types::Revision,
};

use super::{Competition, data::EntityData};

/// Entity stored in one of the competition tables and synchronized as one
/// JSON payload.
pub trait SyncEntity: Mergeable + Serialize + DeserializeOwned + Clone {
    /// Kind tag in the shared store.
    const KIND: EntityKind;

    /// The entity's table.
    fn table(data: &EntityData) -> &HashMap<u32, Self>;
    /// The entity's table, mutable.
    fn table_mut(data: &mut EntityData) -> &mut HashMap<u32, Self>;

    /// Marks what depends on an entity replaced by its remote version.
    fn adopted(comp: &mut Competition, id: u32, previous: Option<Self>, rev: Revision) {
        let _ = (id, previous);
        comp.invalidate_index();
        comp.mark_all_classes(rev);
    }
}

macro_rules! sync_entity {
    (@adopted Runner) => {
        fn adopted(comp: &mut Competition, id: u32, previous: Option<Self>, rev: Revision) {
            let old_no = previous.as_ref().map(|r| r.card_no).unwrap_or(0);
            let new_no = comp.data.runners.get(&id).map(|r| r.card_no).unwrap_or(0);
            if let Some(prev) = &previous {
                if let Some(class) = prev.class {
                    comp.mark_class(class, None, rev);
                }
                if let Some((team, _)) = prev.team {
                    comp.mark_team(team, rev);
                }
            }
            comp.mark_runner(id, [None], rev);
            if old_no != new_no {
                comp.data.reindex_card_no(id, old_no, new_no);
            }
            comp.rehash_all([old_no, new_no].into_iter().filter(|n| *n != 0));
        }
    };
    (@adopted Class) => {
        fn adopted(comp: &mut Competition, id: u32, previous: Option<Self>, rev: Revision) {
            if let Some(class) = comp.data.classes.get_mut(&id) {
                class.dirty = previous.map(|p| p.dirty).unwrap_or_default();
            }
            comp.invalidate_index();
            comp.mark_all_classes(rev);
        }
    };
    (@adopted $other:ident) => {};
    ($ty:ty, $kind:ident, $field:ident) => {
        impl Mergeable for $ty {
            fn meta(&self) -> &EntityMeta {
                &self.meta
            }
            fn meta_mut(&mut self) -> &mut EntityMeta {
                &mut self.meta
            }
        }

        impl SyncEntity for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn table(data: &EntityData) -> &HashMap<u32, Self> {
                &data.$field
            }
            fn table_mut(data: &mut EntityData) -> &mut HashMap<u32, Self> {
                &mut data.$field
            }

            sync_entity!(@adopted $kind);
        }
    };
}

sync_entity!(Runner, Runner, runners);
sync_entity!(Team, Team, teams);
sync_entity!(Card, Card, cards);
sync_entity!(Course, Course, courses);
sync_entity!(Control, Control, controls);
sync_entity!(Class, Class, classes);
sync_entity!(Club, Club, clubs);

/// Counts of one push or pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Local changes written to the store.
    pub pushed: usize,
    /// Local changes not pushed because the store holds a newer version.
    pub skipped: usize,
    /// Remote versions adopted.
    pub taken: usize,
    /// Remote versions ignored in favour of local edits.
    pub kept: usize,
    /// Newest stamp seen.
    pub latest: Stamp,
}

impl Competition {
    /// Pushes every durable local change. Quiet changes stay local.
    pub fn commit_changes(&mut self, backend: &mut dyn SyncBackend) -> Result<SyncReport, PersistError> {
        let mut report = SyncReport::default();
        self.commit_table::<Club>(backend, &mut report)?;
        self.commit_table::<Control>(backend, &mut report)?;
        self.commit_table::<Course>(backend, &mut report)?;
        self.commit_table::<Class>(backend, &mut report)?;
        self.commit_table::<Card>(backend, &mut report)?;
        self.commit_table::<Runner>(backend, &mut report)?;
        self.commit_table::<Team>(backend, &mut report)?;
        tracing::info!(pushed = report.pushed, skipped = report.skipped, "changes committed");
        Ok(report)
    }

    /// Merges every entity the store changed after `since`.
    pub fn pull(&mut self, backend: &dyn SyncBackend, since: Stamp) -> Result<SyncReport, PersistError> {
        let mut report = SyncReport {
            latest: since,
            ..SyncReport::default()
        };
        for (kind, id) in backend.changed_since(since) {
            let Some((stamp, payload)) = backend.fetch(kind, id) else {
                continue;
            };
            report.latest = report.latest.max(stamp);
            let outcome = match kind {
                EntityKind::Runner => self.merge_remote::<Runner>(id, stamp, payload)?,
                EntityKind::Team => self.merge_remote::<Team>(id, stamp, payload)?,
                EntityKind::Card => self.merge_remote::<Card>(id, stamp, payload)?,
                EntityKind::Course => self.merge_remote::<Course>(id, stamp, payload)?,
                EntityKind::Control => self.merge_remote::<Control>(id, stamp, payload)?,
                EntityKind::Class => self.merge_remote::<Class>(id, stamp, payload)?,
                EntityKind::Club => self.merge_remote::<Club>(id, stamp, payload)?,
                EntityKind::Punch => continue,
            };
            match outcome {
                MergeOutcome::TakeRemote => report.taken += 1,
                MergeOutcome::KeepLocal => report.kept += 1,
            }
        }
        tracing::info!(taken = report.taken, kept = report.kept, latest = report.latest, "remote changes pulled");
        Ok(report)
    }

    /// Merges one remote version into the local table.
    pub fn merge_remote<T: SyncEntity>(
        &mut self,
        id: u32,
        stamp: Stamp,
        payload: serde_json::Value,
    ) -> Result<MergeOutcome, PersistError> {
        let mut remote: T = serde_json::from_value(payload)?;
        {
            let meta = remote.meta_mut();
            meta.id = id;
            meta.stamp = Some(stamp);
        }
        if let Some(local) = T::table(&self.data).get(&id) {
            if T::merge(&remote, local, None) == MergeOutcome::KeepLocal {
                tracing::debug!(kind = ?T::KIND, id, stamp, "remote version ignored");
                return Ok(MergeOutcome::KeepLocal);
            }
        }

        let rev = self.bump();
        {
            let meta = remote.meta_mut();
            meta.changed = false;
            meta.quiet_changed = false;
            meta.revision = rev;
        }
        let previous = T::table_mut(&mut self.data).insert(id, remote);
        self.data.reserve_id(T::KIND, id);
        T::adopted(self, id, previous, rev);
        tracing::debug!(kind = ?T::KIND, id, stamp, revision = rev, "remote version taken");
        Ok(MergeOutcome::TakeRemote)
    }

    fn commit_table<T: SyncEntity>(
        &mut self,
        backend: &mut dyn SyncBackend,
        report: &mut SyncReport,
    ) -> Result<(), PersistError> {
        let mut ids: Vec<u32> = T::table(&self.data)
            .iter()
            .filter(|(_, e)| e.meta().changed)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        for id in ids {
            let Some(entity) = T::table(&self.data).get(&id) else {
                continue;
            };
            match entity.meta().stamp {
                None => match backend.assign_identity(T::KIND, id) {
                    Ok(()) => {}
                    Err(PersistError::IdentityTaken { .. }) => {
                        tracing::warn!(kind = ?T::KIND, id, "identity taken in shared store, not pushed");
                        report.skipped += 1;
                        continue;
                    }
                    Err(err) => return Err(err),
                },
                Some(local) => {
                    if backend.timestamp(T::KIND, id).is_some_and(|remote| remote > local) {
                        tracing::warn!(kind = ?T::KIND, id, "shared store has a newer version, pull first");
                        report.skipped += 1;
                        continue;
                    }
                }
            }
            let payload = serde_json::to_value(entity)?;
            let stamp = backend.mark_durable(T::KIND, id, &payload)?;
            if let Some(entity) = T::table_mut(&mut self.data).get_mut(&id) {
                entity.meta_mut().mark_durable(stamp);
            }
            report.pushed += 1;
            report.latest = report.latest.max(stamp);
        }
        Ok(())
    }

    fn mark_all_classes(&mut self, rev: Revision) {
        let classes: Vec<_> = self.data.classes.keys().copied().collect();
        for class in classes {
            self.mark_class(class, None, rev);
        }
    }
}
