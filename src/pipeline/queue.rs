//! Background work queue
//!
//! Chains of [`WorkUnit`]s are submitted as a whole and run in order by a
//! fixed pool of tokio workers. Each unit is retried in isolation with
//! exponential backoff; when a unit gives up, the rest of its chain is
//! abandoned and the owning note is left in `WARNING` with the cause.
//! Follow-up units a unit yields run at the end of the same chain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backoff::Backoff;
use super::units::{WorkUnit, WorkerContext};
use crate::error::{IngestError, IngestResult};
use crate::events::EntityType;
use crate::notes::NoteStatus;
use crate::QueueConfig;

type Chain = Vec<WorkUnit>;

pub struct WorkQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Chain>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl WorkQueue {
    /// Spawn `config.workers` workers sharing one channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(ctx: Arc<WorkerContext>, config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Chain>();
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());
        let config = Arc::new(config);

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(Self::run_loop(
                    worker,
                    ctx.clone(),
                    config.clone(),
                    rx.clone(),
                    pending.clone(),
                    idle.clone(),
                ))
            })
            .collect();

        info!(workers = config.workers.max(1), "Work queue started");
        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            pending,
            idle,
        }
    }

    /// Enqueue a chain; its units run in order on one worker
    pub async fn submit(&self, chain: Vec<WorkUnit>) -> IngestResult<()> {
        if chain.is_empty() {
            return Ok(());
        }
        let sender = self.sender.lock().await;
        let Some(tx) = sender.as_ref() else {
            return Err(IngestError::Transient("work queue is shut down".into()));
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(chain).is_err() {
            self.finish_one();
            return Err(IngestError::Transient("work queue is closed".into()));
        }
        Ok(())
    }

    /// Chains submitted but not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every submitted chain has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting chains, drain what is queued and join the workers
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker panicked");
            }
        }
        info!("Work queue stopped");
    }

    fn finish_one(&self) {
        Self::release(&self.pending, &self.idle);
    }

    fn release(pending: &AtomicUsize, idle: &Notify) {
        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            idle.notify_waiters();
        }
    }

    async fn run_loop(
        worker: usize,
        ctx: Arc<WorkerContext>,
        config: Arc<QueueConfig>,
        rx: Arc<Mutex<mpsc::UnboundedReceiver<Chain>>>,
        pending: Arc<AtomicUsize>,
        idle: Arc<Notify>,
    ) {
        loop {
            let chain = {
                let mut rx = rx.lock().await;
                rx.recv().await
            };
            let Some(chain) = chain else {
                debug!(worker, "Channel closed, worker exiting");
                break;
            };
            run_chain(&ctx, &config, chain).await;
            Self::release(&pending, &idle);
        }
    }
}

/// Run units in order; the first unit that gives up ends the chain
pub(crate) async fn run_chain(ctx: &WorkerContext, config: &QueueConfig, chain: Vec<WorkUnit>) {
    // A chain without a revisioned unit was not scheduled by a commit
    let revision = chain.iter().find_map(WorkUnit::revision);
    let mut queue = VecDeque::from(chain);

    while let Some(unit) = queue.pop_front() {
        let err = match run_unit(ctx, config, &unit).await {
            Ok(follow_ups) => {
                queue.extend(follow_ups);
                continue;
            }
            Err(err) => err,
        };
        warn!(unit = %unit, error = %err, "Work unit failed, abandoning chain");

        if let Some(note_id) = unit.note_id() {
            mark_warning(ctx, note_id, revision, format!("{}: {}", unit.name(), err)).await;
        }
        return;
    }
}

async fn mark_warning(ctx: &WorkerContext, note_id: Uuid, revision: Option<u64>, cause: String) {
    match ctx
        .store
        .update_note_status(note_id, NoteStatus::Warning, Some(cause.clone()), revision)
        .await
    {
        Ok(true) => ctx.events.emit_updated(
            EntityType::Note,
            note_id.to_string(),
            serde_json::json!({ "status": "warning", "cause": cause }),
        ),
        Ok(false) => debug!(note_id = %note_id, cause = %cause, "Note moved on, warning dropped"),
        Err(e) => error!(note_id = %note_id, error = %e, "Failed to record note warning"),
    }
}

async fn run_unit(
    ctx: &WorkerContext,
    config: &QueueConfig,
    unit: &WorkUnit,
) -> IngestResult<Vec<WorkUnit>> {
    let mut backoff = Backoff::from_config(config);
    let mut attempt = 1u32;
    loop {
        match unit.execute(ctx).await {
            Ok(follow_ups) => {
                debug!(unit = %unit, attempt, follow_ups = follow_ups.len(), "Work unit done");
                return Ok(follow_ups);
            }
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                let delay = backoff.next_delay();
                debug!(unit = %unit, attempt, error = %err, delay_ms = delay.as_millis() as u64, "Retrying work unit");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
