//! Contract with the shared store several clients synchronize through.
//!
//! The store hands out entity identities, keeps one JSON payload per entity
//! and stamps every accepted write with a monotonically increasing
//! timestamp. Clients push their durable changes and pull entities changed
//! since the newest stamp they have seen.

use hashbrown::{HashMap, HashSet};
use serde_json::Value;

use crate::model::{
    EntityKind,
    meta::{EntityMeta, Stamp},
};

use super::{PersistError, PersistResult};

/// Shared store of entity versions, stamped by the store.
pub trait SyncBackend: Send {
    /// Claims `id` for a new entity of `kind`.
    fn assign_identity(&mut self, kind: EntityKind, id: u32) -> PersistResult<()>;
    /// Stamp of the stored version, if any.
    fn timestamp(&self, kind: EntityKind, id: u32) -> Option<Stamp>;
    /// Persists `payload` and returns its new stamp.
    fn mark_durable(&mut self, kind: EntityKind, id: u32, payload: &Value) -> PersistResult<Stamp>;
    /// Stored version and its stamp.
    fn fetch(&self, kind: EntityKind, id: u32) -> Option<(Stamp, Value)>;
    /// Entities whose stamp is newer than `stamp`, oldest first.
    fn changed_since(&self, stamp: Stamp) -> Vec<(EntityKind, u32)>;
}

/// Which side of a conflict survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Remote version replaces the local one.
    TakeRemote,
    /// Local version stays.
    KeepLocal,
}

/// Last-writer-wins merge of one entity.
pub trait Mergeable {
    /// Identity, stamp and change flags.
    fn meta(&self) -> &EntityMeta;
    /// Mutable meta.
    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Decides between a remote version (its stamp in `remote.meta().stamp`)
    /// and the local one. `base` is the stamp the local edits started from;
    /// it defaults to the local stamp.
    ///
    /// A remote version no newer than the base changes nothing. A local side
    /// without durable edits always yields, so quiet changes never win over
    /// a durable remote change. When both sides changed durably the later
    /// edit wins and a tie goes to the remote.
    fn merge(remote: &Self, local: &Self, base: Option<Stamp>) -> MergeOutcome
    where
        Self: Sized,
    {
        let (remote, local) = (remote.meta(), local.meta());
        let remote_stamp = remote.stamp.unwrap_or(0);
        if base.or(local.stamp).is_some_and(|b| remote_stamp <= b) {
            return MergeOutcome::KeepLocal;
        }
        if !local.changed || remote.modified_ms >= local.modified_ms {
            MergeOutcome::TakeRemote
        } else {
            MergeOutcome::KeepLocal
        }
    }
}

/// Shared store held in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    clock: Stamp,
    identities: HashSet<(EntityKind, u32)>,
    rows: HashMap<(EntityKind, u32), (Stamp, Value)>,
}

impl MemoryBackend {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest stamp handed out.
    pub fn latest_stamp(&self) -> Stamp {
        self.clock
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl SyncBackend for MemoryBackend {
    fn assign_identity(&mut self, kind: EntityKind, id: u32) -> PersistResult<()> {
        if !self.identities.insert((kind, id)) {
            return Err(PersistError::IdentityTaken { kind, id });
        }
        Ok(())
    }

    fn timestamp(&self, kind: EntityKind, id: u32) -> Option<Stamp> {
        self.rows.get(&(kind, id)).map(|(s, _)| *s)
    }

    fn mark_durable(&mut self, kind: EntityKind, id: u32, payload: &Value) -> PersistResult<Stamp> {
        self.identities.insert((kind, id));
        self.clock += 1;
        self.rows.insert((kind, id), (self.clock, payload.clone()));
        Ok(self.clock)
    }

    fn fetch(&self, kind: EntityKind, id: u32) -> Option<(Stamp, Value)> {
        self.rows.get(&(kind, id)).cloned()
    }

    fn changed_since(&self, stamp: Stamp) -> Vec<(EntityKind, u32)> {
        let mut out: Vec<(Stamp, EntityKind, u32)> = self
            .rows
            .iter()
            .filter(|(_, (s, _))| *s > stamp)
            .map(|((kind, id), (s, _))| (*s, *kind, *id))
            .collect();
        out.sort_unstable_by_key(|(s, _, _)| *s);
        out.into_iter().map(|(_, kind, id)| (kind, id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doc(EntityMeta);

    impl Mergeable for Doc {
        fn meta(&self) -> &EntityMeta {
            &self.0
        }
        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.0
        }
    }

    fn doc(stamp: Option<Stamp>, modified_ms: Stamp, changed: bool, quiet_changed: bool) -> Doc {
        Doc(EntityMeta {
            id: 1,
            stamp,
            modified_ms,
            changed,
            quiet_changed,
            ..EntityMeta::default()
        })
    }

    #[test]
    fn stale_remote_is_ignored() {
        let remote = doc(Some(4), 100, false, false);
        let local = doc(Some(4), 50, true, false);
        assert_eq!(Doc::merge(&remote, &local, None), MergeOutcome::KeepLocal);
    }

    #[test]
    fn quiet_local_change_yields_to_durable_remote() {
        let remote = doc(Some(5), 10, false, false);
        let local = doc(Some(4), 99, false, true);
        assert_eq!(Doc::merge(&remote, &local, None), MergeOutcome::TakeRemote);
    }

    #[test]
    fn concurrent_durable_edits_resolve_by_last_writer() {
        let remote = doc(Some(5), 10, false, false);
        let local = doc(Some(4), 20, true, false);
        assert_eq!(Doc::merge(&remote, &local, None), MergeOutcome::KeepLocal);

        let remote = doc(Some(5), 20, false, false);
        assert_eq!(Doc::merge(&remote, &local, None), MergeOutcome::TakeRemote);
    }

    #[test]
    fn memory_backend_stamps_are_monotonic() {
        let mut backend = MemoryBackend::new();
        backend.assign_identity(EntityKind::Runner, 1).unwrap();
        assert!(matches!(
            backend.assign_identity(EntityKind::Runner, 1),
            Err(PersistError::IdentityTaken { .. })
        ));
        let a = backend.mark_durable(EntityKind::Runner, 1, &Value::Null).unwrap();
        let b = backend.mark_durable(EntityKind::Class, 1, &Value::Null).unwrap();
        assert!(b > a);
        assert_eq!(backend.changed_since(a), vec![(EntityKind::Class, 1)]);
    }
}
