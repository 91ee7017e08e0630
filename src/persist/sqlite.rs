//! SQLite-backed append-only journal of free-punch edits.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{
    core::store::{PunchStore, StoreSnapshotV1},
    model::meta::now_ms,
    op::{Op, StoredOp, StoredOpEnvelope},
    origin::OriginCodec,
    types::{CardNo, OpSeq},
};

use super::{OpSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: StoreSnapshotV1,
}

/// SQLite implementation of [`crate::persist::OpSink`].
pub struct SqliteOpSink {
    conn: Connection,
}

impl SqliteOpSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the punch store from the latest snapshot plus the events
    /// after it. Origin tags are checked with `codec`.
    pub fn load_store(&self, codec: OriginCodec) -> PersistResult<PunchStore> {
        let mut store = if let Some(snapshot) = self.load_latest_snapshot()? {
            PunchStore::from_snapshot(snapshot, codec)?
        } else {
            PunchStore::with_codec(codec)
        };

        let start_seq = store.export_snapshot().next_op_seq.saturating_sub(1);
        let events = self.load_events_after(start_seq)?;
        let replayed = events.len();
        for event in events {
            store.apply_replayed_op(event)?;
        }
        tracing::info!(punches = store.len(), replayed, "punch journal loaded");
        Ok(store)
    }

    /// Loads events strictly after `seq`.
    pub fn load_events_after(&self, seq: OpSeq) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, payload FROM events WHERE seq > ?1 ORDER BY seq ASC")?;

        let rows = stmt.query_map(params![seq], |row| {
            let seq: i64 = row.get(0)?;
            let ts_ms: i64 = row.get(1)?;
            let payload: Vec<u8> = row.get(2)?;
            let mut op = decode_stored_op_payload(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    rusqlite::types::Type::Blob,
                    Box::new(std::io::Error::other(err)),
                )
            })?;
            op.seq = seq as OpSeq;
            op.ts_ms = ts_ms as u64;
            Ok(op)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes a snapshot covering `last_seq`.
    pub fn write_snapshot(
        &mut self,
        snapshot: &StoreSnapshotV1,
        last_seq: OpSeq,
    ) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms() as i64, payload],
        )?;
        tracing::debug!(last_seq, "punch snapshot written");
        Ok(())
    }

    /// Deletes events up to and including `seq`.
    pub fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM events WHERE seq <= ?1", params![seq as i64])?;
        tracing::debug!(through = seq, removed = count, "punch journal compacted");
        Ok(count)
    }

    /// Journaled ops touching `card_no`, oldest first. A patch moving a
    /// punch between cards is listed for both.
    pub fn events_for_card(&self, card_no: CardNo) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM events WHERE card_no = ?1 OR prev_card_no = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![i64::from(card_no)], |row| row.get::<_, Vec<u8>>(0))?;
        let mut out = Vec::new();
        for payload in rows {
            let payload = payload?;
            out.push(decode_stored_op_payload(&payload).map_err(PersistError::Message)?);
        }
        Ok(out)
    }

    /// Returns the latest sequence persisted in the events table.
    pub fn latest_seq(&self) -> PersistResult<OpSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM events", [], |row| row.get(0))
            .optional()?;
        Ok(seq.unwrap_or(0) as OpSeq)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<StoreSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported snapshot format {}",
                env.format_version
            )));
        }
        Ok(Some(env.snapshot))
    }
}

impl OpSink for SqliteOpSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        if ops.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events(seq, ts_ms, kind, punch_id, card_no, prev_card_no, payload) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for stored in ops {
                let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    op_kind(&stored.op),
                    stored.op.punch_id() as i64,
                    i64::from(stored.op.card_no()),
                    stored.op.previous_card().map(i64::from),
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        let last = ops.last().map(|o| o.seq).unwrap_or(0);
        tracing::trace!(count = ops.len(), last, "punch ops journaled");
        Ok(last)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        SqliteOpSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        SqliteOpSink::compact_through(self, seq)
    }
}

fn op_kind(op: &Op) -> i64 {
    match op {
        Op::Insert { .. } => 1,
        Op::Patch { .. } => 2,
        Op::Remove { .. } => 3,
    }
}

fn decode_stored_op_payload(payload: &[u8]) -> Result<StoredOp, String> {
    if let Ok(envelope) = serde_json::from_slice::<StoredOpEnvelope>(payload) {
        if envelope.format_version != crate::op::OP_FORMAT_VERSION {
            return Err(format!(
                "unsupported op format version: {}",
                envelope.format_version
            ));
        }
        return Ok(envelope.stored);
    }

    // Bare ops written without an envelope.
    serde_json::from_slice::<StoredOp>(payload)
        .map_err(|e| format!("op payload decode failed: {e}"))
}
