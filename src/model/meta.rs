use serde::{Deserialize, Serialize};

use crate::types::Revision;

/// Server-assigned modification timestamp (milliseconds).
pub type Stamp = u64;

/// Identity, sync timestamp and change flags shared by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntityMeta {
    /// Entity id, unique per entity kind.
    pub id: u32,
    /// Timestamp of the last version acknowledged by the shared store.
    pub stamp: Option<Stamp>,
    /// Local wall-clock time of the last local edit.
    pub modified_ms: Stamp,
    /// Durable local change not yet persisted.
    pub changed: bool,
    /// Transient local change; never promoted over a durable remote change.
    pub quiet_changed: bool,
    /// Entity has been removed.
    pub removed: bool,
    /// Data revision of the last durable local change.
    pub revision: Revision,
}

impl EntityMeta {
    /// Fresh metadata for a newly created entity.
    pub fn new(id: u32, revision: Revision) -> Self {
        Self {
            id,
            modified_ms: now_ms(),
            changed: true,
            revision,
            ..Self::default()
        }
    }

    /// Records a durable local change at `revision`.
    pub fn touch(&mut self, revision: Revision) {
        self.changed = true;
        self.revision = revision;
        self.modified_ms = now_ms();
    }

    /// Records a quiet (transient) local change.
    pub fn touch_quiet(&mut self) {
        self.quiet_changed = true;
        self.modified_ms = now_ms();
    }

    /// Clears change flags after the shared store acknowledged `stamp`.
    pub fn mark_durable(&mut self, stamp: Stamp) {
        self.stamp = Some(stamp);
        self.changed = false;
        self.quiet_changed = false;
    }

    /// True when a local edit (durable or quiet) is pending.
    pub fn is_dirty(&self) -> bool {
        self.changed || self.quiet_changed
    }
}

pub(crate) fn now_ms() -> Stamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
