use std::sync::Arc;

use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    competition::{Competition, EditError, results::ResultRow},
    core::store::StoreSnapshotV1,
    engine::{splits::SplitTable, team::TeamResult, traits::RunnerResult},
    model::card::CardDraft,
    op::{Op, StoredOp},
    persist::{OpSink, PersistError},
    punch::{FreePunch, FreePunchDraft, FreePunchPatch},
    types::{CardId, CardNo, ClassId, OpSeq, PunchId, RunnerId, TeamId},
};

use super::events::EngineEvent;

/// Error returned by [`EngineHandle`] calls.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The competition rejected the command.
    #[error(transparent)]
    Edit(#[from] EditError),
    /// Journal write failed or the persistence queue is full.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// The engine loop has stopped.
    #[error("engine loop is gone")]
    ChannelClosed,
}

/// Tuning of the engine loop and its persistence worker.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Write the journal right away when a new free punch arrives.
    pub flush_on_insert: bool,
    /// Ops per journal batch.
    pub batch_max_ops: usize,
    /// Longest time an op waits for its batch.
    pub batch_max_latency_ms: u64,
    /// Batches queued for the worker before commands fail.
    pub persist_queue_bound: usize,
    /// Write a snapshot after this many ops; 0 disables snapshots.
    pub snapshot_every_ops: usize,
    /// Drop journaled ops covered by a snapshot.
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_insert: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
        }
    }
}

/// Cloneable handle to a competition owned by the engine loop.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<EngineEvent>,
}

type EditFn = Box<dyn FnOnce(&mut Competition) + Send>;

enum Command {
    AddPunch {
        draft: FreePunchDraft,
        resp: oneshot::Sender<Result<PunchId, RuntimeError>>,
    },
    PatchPunch {
        id: PunchId,
        patch: FreePunchPatch,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    RemovePunch {
        id: PunchId,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Undo {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Redo {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    ReadCard {
        draft: CardDraft,
        resp: oneshot::Sender<Result<CardId, RuntimeError>>,
    },
    RunnerResult {
        id: RunnerId,
        resp: oneshot::Sender<Result<RunnerResult, RuntimeError>>,
    },
    TeamResult {
        id: TeamId,
        resp: oneshot::Sender<Result<TeamResult, RuntimeError>>,
    },
    ClassResults {
        class: ClassId,
        resp: oneshot::Sender<Result<Vec<ResultRow>, RuntimeError>>,
    },
    Splits {
        id: RunnerId,
        normalized: bool,
        resp: oneshot::Sender<Result<Option<SplitTable>, RuntimeError>>,
    },
    CardPunches {
        card_no: CardNo,
        resp: oneshot::Sender<Vec<FreePunch>>,
    },
    Run {
        f: EditFn,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Op(StoredOp),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Moves `competition` into a single-writer loop. Free-punch edits are
/// journaled to `sink` by a separate persistence worker.
pub fn spawn_engine(
    competition: Competition,
    sink: Option<Box<dyn OpSink>>,
    config: RuntimeConfig,
) -> EngineHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<EngineEvent>(1024);

    let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut comp = competition;
        let mut ops_since_snapshot = 0usize;
        tracing::info!(revision = comp.revision(), journaled = persist_tx_opt.is_some(), "engine loop started");

        loop {
            let cmd = if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => cmd,
                    durable = rx.recv() => {
                        match durable {
                            Some(Ok(op_seq)) => {
                                let _ = events_tx_loop.send(EngineEvent::DurableUpTo { op_seq });
                            }
                            Some(Err(err)) => tracing::error!(%err, "punch journal write failed"),
                            None => {}
                        }
                        continue;
                    }
                }
            } else {
                cmd_rx.recv().await
            };
            let Some(cmd) = cmd else { break };

            let before = comp.revision();
            let done = handle_command(
                cmd,
                &mut comp,
                &events_tx_loop,
                persist_tx_opt.as_ref(),
                &config,
                &mut ops_since_snapshot,
            )
            .await;
            if comp.revision() != before {
                let _ = events_tx_loop.send(EngineEvent::Changed {
                    revision: comp.revision(),
                });
            }
            if done {
                break;
            }
        }
        tracing::info!(revision = comp.revision(), "engine loop stopped");
    });

    EngineHandle { cmd_tx, events_tx }
}

impl EngineHandle {
    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    async fn send(&self, cmd: Command) -> Result<(), RuntimeError> {
        self.cmd_tx.send(cmd).await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Records a free punch.
    pub async fn add_punch(&self, draft: FreePunchDraft) -> Result<PunchId, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::AddPunch { draft, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Patches a free punch.
    pub async fn patch_punch(&self, id: PunchId, patch: FreePunchPatch) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::PatchPunch { id, patch, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Removes a free punch.
    pub async fn remove_punch(&self, id: PunchId) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::RemovePunch { id, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Undoes the latest free-punch edit.
    pub async fn undo(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Undo { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Redoes the latest undone free-punch edit.
    pub async fn redo(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Redo { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Stores a card read-out.
    pub async fn read_card(&self, draft: CardDraft) -> Result<CardId, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ReadCard { draft, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Current result of a runner.
    pub async fn runner_result(&self, id: RunnerId) -> Result<RunnerResult, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::RunnerResult { id, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Current result of a team.
    pub async fn team_result(&self, id: TeamId) -> Result<TeamResult, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::TeamResult { id, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Ranked result list of a class.
    pub async fn class_results(&self, class: ClassId) -> Result<Vec<ResultRow>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ClassResults { class, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Split table of a runner, optionally in the class's canonical leg order.
    pub async fn split_table(&self, id: RunnerId, normalized: bool) -> Result<Option<SplitTable>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Splits {
            id,
            normalized,
            resp: tx,
        })
        .await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Free punches of a card number, by time.
    pub async fn card_punches(&self, card_no: CardNo) -> Result<Vec<FreePunch>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::CardPunches { card_no, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Runs `f` on the loop's competition and returns its value.
    pub async fn with<R, F>(&self, f: F) -> Result<R, RuntimeError>
    where
        F: FnOnce(&mut Competition) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let f: EditFn = Box::new(move |comp| {
            let _ = tx.send(f(comp));
        });
        self.send(Command::Run { f }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Runs an edit command on the loop's competition.
    pub async fn edit<R, F>(&self, f: F) -> Result<R, RuntimeError>
    where
        F: FnOnce(&mut Competition) -> Result<R, EditError> + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.with(f).await??)
    }

    /// Writes pending ops and returns the durable sequence.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Writes a snapshot of the punch store.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Checkpoint { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Flushes and stops the loop.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }
}

async fn handle_command(
    cmd: Command,
    comp: &mut Competition,
    events_tx: &broadcast::Sender<EngineEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) -> bool {
    match cmd {
        Command::AddPunch { draft, resp } => {
            let res = comp.add_free_punch(draft).map_err(RuntimeError::from).and_then(|id| {
                journal(comp, events_tx, persist_tx, ops_since_snapshot)?;
                let _ = events_tx.send(EngineEvent::PunchAdded { id });
                Ok(id)
            });
            let _ = resp.send(res);
        }
        Command::PatchPunch { id, patch, resp } => {
            let res = comp.patch_free_punch(id, patch).map_err(RuntimeError::from).and_then(|_| {
                journal(comp, events_tx, persist_tx, ops_since_snapshot)?;
                let _ = events_tx.send(EngineEvent::PunchUpdated { id });
                Ok(())
            });
            let _ = resp.send(res);
        }
        Command::RemovePunch { id, resp } => {
            let res = comp.remove_free_punch(id).map_err(RuntimeError::from).and_then(|_| {
                journal(comp, events_tx, persist_tx, ops_since_snapshot)?;
                let _ = events_tx.send(EngineEvent::PunchRemoved { id });
                Ok(())
            });
            let _ = resp.send(res);
        }
        Command::Undo { resp } => {
            let res = comp.undo_punch_edit().map_err(RuntimeError::from).and_then(|_| {
                journal(comp, events_tx, persist_tx, ops_since_snapshot)?;
                let _ = events_tx.send(EngineEvent::UndoApplied);
                Ok(())
            });
            let _ = resp.send(res);
        }
        Command::Redo { resp } => {
            let res = comp.redo_punch_edit().map_err(RuntimeError::from).and_then(|_| {
                journal(comp, events_tx, persist_tx, ops_since_snapshot)?;
                let _ = events_tx.send(EngineEvent::RedoApplied);
                Ok(())
            });
            let _ = resp.send(res);
        }
        Command::ReadCard { draft, resp } => {
            let res = comp.read_card(draft).map_err(RuntimeError::from).inspect(|card| {
                let owner = comp.data().card(*card).and_then(|c| c.owner);
                let _ = events_tx.send(EngineEvent::CardRead { card: *card, owner });
            });
            let _ = resp.send(res);
        }
        Command::RunnerResult { id, resp } => {
            let _ = resp.send(comp.runner_result(id).map_err(RuntimeError::from));
        }
        Command::TeamResult { id, resp } => {
            let _ = resp.send(comp.team_result(id).map_err(RuntimeError::from));
        }
        Command::ClassResults { class, resp } => {
            let _ = resp.send(comp.class_results(class).map_err(RuntimeError::from));
        }
        Command::Splits { id, normalized, resp } => {
            let res = if normalized {
                comp.normalized_split_table(id)
            } else {
                comp.split_table(id)
            };
            let _ = resp.send(res.map_err(RuntimeError::from));
        }
        Command::CardPunches { card_no, resp } => {
            let _ = resp.send(comp.card_punches(card_no));
        }
        Command::Run { f } => {
            f(comp);
            if let Err(err) = journal(comp, events_tx, persist_tx, ops_since_snapshot) {
                tracing::error!(%err, "journaling edit failed");
            }
        }
        Command::Flush { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(comp.punches().latest_op_seq())
            };
            let _ = resp.send(out);
        }
        Command::Checkpoint { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (cp_tx, cp_rx) = oneshot::channel();
                let msg = PersistMsg::Checkpoint {
                    snapshot: comp.punches().export_snapshot(),
                    last_seq: comp.punches().latest_op_seq(),
                    compact: config.compact_after_snapshot,
                    resp: cp_tx,
                };
                if tx.send(msg).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    *ops_since_snapshot = 0;
                    cp_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    maybe_auto_checkpoint(comp, persist_tx, config, ops_since_snapshot).await;
    false
}

/// Hands the journal ops produced by the last command to persistence.
fn journal(
    comp: &mut Competition,
    events_tx: &broadcast::Sender<EngineEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    ops_since_snapshot: &mut usize,
) -> Result<(), RuntimeError> {
    let ops = comp.drain_pending_ops();
    if ops.is_empty() {
        return Ok(());
    }
    *ops_since_snapshot += ops.len();
    match persist_tx {
        Some(tx) => {
            for stored in ops {
                enqueue_persist(tx, stored)?;
            }
        }
        None => {
            let _ = events_tx.send(EngineEvent::DurableUpTo {
                op_seq: comp.punches().latest_op_seq(),
            });
        }
    }
    Ok(())
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Op(stored) => {
                            let is_insert = matches!(stored.op, Op::Insert { .. });
                            buf.push(stored);

                            if buf.len() >= config.batch_max_ops || (config.flush_on_insert && is_insert) {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await {
                                Err(err) => Err(err),
                                Ok(()) => {
                                    let sink_ref = Arc::clone(&sink);
                                    match tokio::task::spawn_blocking(move || {
                                        let mut sink = sink_ref.blocking_lock();
                                        sink.write_snapshot(&snapshot, last_seq)?;
                                        if compact {
                                            sink.compact_through(last_seq)?;
                                        }
                                        Result::<(), PersistError>::Ok(())
                                    }).await {
                                        Ok(inner) => inner,
                                        Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
                                    }
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let ops = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<OpSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_ops(&ops)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}

async fn maybe_auto_checkpoint(
    comp: &Competition,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) {
    if config.snapshot_every_ops == 0 || *ops_since_snapshot < config.snapshot_every_ops {
        return;
    }

    let Some(tx) = persist_tx else {
        return;
    };

    let (cp_tx, cp_rx) = oneshot::channel();
    let msg = PersistMsg::Checkpoint {
        snapshot: comp.punches().export_snapshot(),
        last_seq: comp.punches().latest_op_seq(),
        compact: config.compact_after_snapshot,
        resp: cp_tx,
    };
    if tx.send(msg).await.is_ok() {
        let _ = cp_rx.await;
        tracing::debug!(ops = *ops_since_snapshot, "automatic punch snapshot written");
        *ops_since_snapshot = 0;
    }
}

fn enqueue_persist(tx: &mpsc::Sender<PersistMsg>, stored: StoredOp) -> Result<(), RuntimeError> {
    tx.try_send(PersistMsg::Op(stored))
        .map_err(|err| RuntimeError::Persist(PersistError::Message(format!("persist queue error: {err}"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[tokio::test]
    async fn edits_run_on_the_loop() {
        let handle = spawn_engine(Competition::new(EngineConfig::default()), None, RuntimeConfig::default());
        let club = handle.with(|c| c.add_club("OK Linné")).await.unwrap();
        let name = handle
            .with(move |c| c.data().club(club).map(|c| c.name.clone()))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("OK Linné"));
        handle.shutdown().await.unwrap();
    }
}
