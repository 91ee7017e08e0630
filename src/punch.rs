//! Punch records, free (online) punches, drafts and patches.

use serde::{Deserialize, Serialize};

use crate::{
    model::meta::EntityMeta,
    origin::OriginCodec,
    types::{CardNo, PunchId, PunchType, Time, has_time},
};

/// A single timestamped punch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punch {
    /// Punch kind and code.
    pub kind: PunchType,
    /// Recorded time, or [`crate::types::NO_TIME`].
    pub time: Time,
    /// Unit (station) that produced the punch.
    pub unit: u32,
    /// Provenance tag computed at capture.
    pub origin: Option<u32>,
    /// Correction applied on top of the recorded time.
    pub adjust: Time,
}

impl Punch {
    /// Captures a hardware punch and tags its provenance.
    pub fn captured(kind: PunchType, time: Time, unit: u32, codec: &OriginCodec) -> Self {
        Self {
            kind,
            time,
            unit,
            origin: codec.tag(time, kind.code()),
            adjust: 0,
        }
    }

    /// Creates a punch without provenance (manually entered).
    pub fn manual(kind: PunchType, time: Time) -> Self {
        Self {
            kind,
            time,
            unit: 0,
            origin: None,
            adjust: 0,
        }
    }

    /// Raw punch code.
    pub fn code(&self) -> u32 {
        self.kind.code()
    }

    /// True when a time was recorded.
    pub fn has_time(&self) -> bool {
        has_time(self.time)
    }

    /// Recorded time plus correction, or `None` without a time.
    pub fn adjusted_time(&self) -> Option<Time> {
        self.has_time().then(|| self.time + self.adjust)
    }

    /// True when time and code still match the capture tag.
    pub fn is_original(&self, codec: &OriginCodec) -> bool {
        codec.is_original(self.origin, self.time, self.code())
    }

    /// Time as captured by the hardware, recovered from the tag.
    pub fn original_time(&self, codec: &OriginCodec) -> Option<Time> {
        self.origin.and_then(|tag| codec.decode(tag, self.code()))
    }
}

/// Online/radio punch not attached to a read-out card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreePunch {
    /// Stable punch id.
    pub id: PunchId,
    /// Card number the punch was recorded for.
    pub card_no: CardNo,
    /// Punch payload.
    pub punch: Punch,
    /// Identity, sync and change flags. `meta.removed` marks removal.
    pub meta: EntityMeta,
}

impl FreePunch {
    /// True once removed.
    pub fn is_removed(&self) -> bool {
        self.meta.removed
    }
}

/// Insert payload used to create a new [`FreePunch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreePunchDraft {
    /// Card number.
    pub card_no: CardNo,
    /// Punch kind and code.
    pub kind: PunchType,
    /// Recorded time.
    pub time: Time,
    /// Unit (station) id.
    pub unit: u32,
}

/// Sparse patch where each `Some` field overwrites the record value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FreePunchPatch {
    /// Optional replacement card number.
    pub card_no: Option<CardNo>,
    /// Optional replacement punch kind.
    pub kind: Option<PunchType>,
    /// Optional replacement time.
    pub time: Option<Time>,
    /// Optional replacement unit.
    pub unit: Option<u32>,
}

impl FreePunchPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// True when the patch can move the punch to another hash bucket.
    pub fn affects_hash(&self) -> bool {
        self.card_no.is_some() || self.kind.is_some() || self.time.is_some()
    }

    /// Captures an inverse patch for all fields present in `self`.
    pub fn capture_inverse_for(&self, rec: &FreePunch) -> Self {
        Self {
            card_no: self.card_no.map(|_| rec.card_no),
            kind: self.kind.map(|_| rec.punch.kind),
            time: self.time.map(|_| rec.punch.time),
            unit: self.unit.map(|_| rec.punch.unit),
        }
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut FreePunch) {
        if let Some(v) = self.card_no {
            rec.card_no = v;
        }
        if let Some(v) = self.kind {
            rec.punch.kind = v;
        }
        if let Some(v) = self.time {
            rec.punch.time = v;
        }
        if let Some(v) = self.unit {
            rec.punch.unit = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free(card_no: CardNo, code: u32, time: Time) -> FreePunch {
        FreePunch {
            id: 1,
            card_no,
            punch: Punch::captured(PunchType::from_code(code), time, 7, &OriginCodec::default()),
            meta: EntityMeta::default(),
        }
    }

    #[test]
    fn inverse_patch_restores_fields() {
        let mut rec = free(500, 31, 100);
        let before = rec.clone();
        let patch = FreePunchPatch {
            card_no: Some(600),
            time: Some(130),
            ..FreePunchPatch::default()
        };
        let inverse = patch.capture_inverse_for(&rec);
        patch.apply_to(&mut rec);
        assert_eq!(rec.card_no, 600);
        inverse.apply_to(&mut rec);
        assert_eq!(rec, before);
    }

    #[test]
    fn time_edit_breaks_provenance() {
        let codec = OriginCodec::default();
        let mut rec = free(500, 31, 100);
        assert!(rec.punch.is_original(&codec));
        FreePunchPatch {
            time: Some(160),
            ..FreePunchPatch::default()
        }
        .apply_to(&mut rec);
        assert!(!rec.punch.is_original(&codec));
        assert_eq!(rec.punch.original_time(&codec), Some(100));
    }
}
