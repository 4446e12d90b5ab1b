//! Reader/writer scheduling for derivation passes.
//!
//! An [`Operation`] owns a sized rayon pool running a fixed set of reader loops
//! and, when configured, writer loops. Each submitted reader runs in its own read
//! transaction and emits [`EdgeJob`]s through an [`Outbox`]. Writers drain the
//! bounded job channel in batches and upsert the derived relationships inside
//! write transactions. With `num_writers == 0` readers hand their jobs straight
//! to an in-memory accumulator returned by [`Operation::done`].
//!
//! The first reader or writer error is kept and returned by `done`. Recording it
//! cancels the operation's child token, so queued readers are skipped and
//! in-flight ones see cancellation at their next store call; their output is
//! discarded either way. When the parent token is cancelled and any reader or
//! job was dropped as a result, `done` reports [`PenumbraError::Cancelled`]
//! instead of a partial report.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rustc_hash::FxHashMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AnalysisConfig, PostProcessingStats};
use crate::graph::query::{self, Target};
use crate::graph::{GraphStore, GraphStoreExt, Properties, Transaction, TransactionExt, WriteTransaction};
use crate::primitives::concurrency::{submit, FirstError};
use crate::types::{Kind, NodeId, PenumbraError, Result};

/// Property refreshed on every derived relationship a writer touches.
pub const LAST_SEEN: &str = "lastseen";

/// One derived relationship to persist.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeJob {
    /// Source node.
    pub from: NodeId,
    /// Target node.
    pub to: NodeId,
    /// Relationship kind.
    pub kind: Kind,
}

impl EdgeJob {
    /// Creates a job.
    pub fn new(from: NodeId, to: NodeId, kind: Kind) -> Self {
        Self { from, to, kind }
    }
}

#[derive(Clone)]
enum Delivery {
    Channel(Sender<EdgeJob>),
    Accumulate(Arc<Mutex<Vec<EdgeJob>>>),
}

/// Output handle given to reader jobs.
pub struct Outbox<'a> {
    ctx: &'a CancellationToken,
    delivery: &'a Delivery,
    counters: &'a Counters,
}

impl Outbox<'_> {
    /// Queues `job`, blocking while the job channel is full.
    ///
    /// Returns false once the operation was cancelled; the job is dropped.
    pub fn submit(&self, job: EdgeJob) -> bool {
        let accepted = match self.delivery {
            Delivery::Channel(sender) => submit(self.ctx, sender, job),
            Delivery::Accumulate(jobs) => {
                if self.ctx.is_cancelled() {
                    false
                } else {
                    jobs.lock().push(job);
                    true
                }
            }
        };
        if accepted {
            self.counters.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Queues a `kind` relationship from `from` to `to`.
    pub fn emit(&self, from: NodeId, to: NodeId, kind: Kind) -> bool {
        self.submit(EdgeJob::new(from, to, kind))
    }
}

/// Unit of reader work.
pub type ReaderJob = Box<dyn FnOnce(&CancellationToken, &dyn Transaction, &Outbox<'_>) -> Result<()> + Send>;

#[derive(Default)]
struct Counters {
    readers_run: AtomicU64,
    readers_skipped: AtomicU64,
    jobs_submitted: AtomicU64,
    batches_committed: AtomicU64,
    refreshed: AtomicU64,
    // Jobs and reader submissions refused after cancellation.
    dropped: AtomicU64,
    created: Mutex<FxHashMap<Kind, u64>>,
}

struct Shared {
    ctx: CancellationToken,
    db: Arc<dyn GraphStore>,
    failure: FirstError,
    counters: Counters,
    name: &'static str,
}

impl Shared {
    fn fail(&self, err: PenumbraError, stage: &'static str) {
        let message = err.to_string();
        if self.failure.record(err) {
            error!(operation = self.name, stage, error = %message, "analysis.operation.failed");
            self.ctx.cancel();
        }
    }

    /// Work that was refused or skipped because the operation stopped early.
    fn truncated(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed) + self.counters.readers_skipped.load(Ordering::Relaxed)
    }
}

/// Outcome of a completed operation.
#[derive(Debug, Default)]
pub struct OperationReport {
    /// Relationship counters.
    pub stats: PostProcessingStats,
    /// Reader jobs that ran.
    pub readers_run: u64,
    /// Reader jobs skipped after a failure or cancellation.
    pub readers_skipped: u64,
    /// Jobs accepted from readers.
    pub jobs_submitted: u64,
    /// Write transactions committed.
    pub batches_committed: u64,
    /// Jobs gathered in accumulator mode, in arrival order.
    pub jobs: Vec<EdgeJob>,
}

/// Running reader/writer pool.
pub struct Operation {
    shared: Arc<Shared>,
    tasks: Option<Sender<ReaderJob>>,
    readers: Option<WaitGroup>,
    writers: Option<WaitGroup>,
    accumulator: Option<Arc<Mutex<Vec<EdgeJob>>>>,
    // Kept alive until every loop has been waited for.
    _pool: ThreadPool,
}

/// Runs one pool loop, turning a panic into an operation failure.
fn run_guarded(shared: &Shared, stage: &'static str, body: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(body)).is_err() {
        shared.fail(PenumbraError::Invariant("pool loop panicked"), stage);
    }
}

impl Operation {
    /// Starts reader and writer pools sized by `config`.
    pub fn start(
        ctx: &CancellationToken,
        db: Arc<dyn GraphStore>,
        config: &AnalysisConfig,
        name: &'static str,
    ) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_readers + config.num_writers)
            .thread_name(move |index| format!("penumbra-{name}-{index}"))
            .build()
            .map_err(|err| PenumbraError::InvalidArgument(format!("operation pool: {err}")))?;
        let shared = Arc::new(Shared {
            ctx: ctx.child_token(),
            db,
            failure: FirstError::new(),
            counters: Counters::default(),
            name,
        });

        let writers = WaitGroup::new();
        let mut accumulator = None;
        let delivery = if config.num_writers == 0 {
            let jobs = Arc::new(Mutex::new(Vec::new()));
            accumulator = Some(Arc::clone(&jobs));
            Delivery::Accumulate(jobs)
        } else {
            let (sender, receiver) = channel::bounded(config.output_buffer);
            for _ in 0..config.num_writers {
                let shared = Arc::clone(&shared);
                let receiver = receiver.clone();
                let batch_size = config.writer_batch_size;
                let done = writers.clone();
                pool.spawn(move || {
                    run_guarded(&shared, "writer", || writer_loop(&shared, &receiver, batch_size));
                    drop(done);
                });
            }
            Delivery::Channel(sender)
        };

        let readers = WaitGroup::new();
        let (task_tx, task_rx) = channel::bounded::<ReaderJob>(config.num_readers);
        // Each reader owns a clone of the job sender, so writers observe a
        // disconnect once the last reader exits.
        for _ in 0..config.num_readers {
            let shared = Arc::clone(&shared);
            let task_rx = task_rx.clone();
            let delivery = delivery.clone();
            let done = readers.clone();
            pool.spawn(move || {
                run_guarded(&shared, "reader", || reader_loop(&shared, &task_rx, &delivery));
                drop(delivery);
                drop(done);
            });
        }
        drop(delivery);

        debug!(
            operation = name,
            readers = config.num_readers,
            writers = config.num_writers,
            "analysis.operation.started"
        );
        Ok(Self {
            shared,
            tasks: Some(task_tx),
            readers: Some(readers),
            writers: Some(writers),
            accumulator,
            _pool: pool,
        })
    }

    /// Token cancelled when the operation fails or its parent is cancelled.
    pub fn context(&self) -> &CancellationToken {
        &self.shared.ctx
    }

    /// Queues a reader job, blocking while every reader is busy and the queue is full.
    ///
    /// Returns false when the operation no longer accepts work.
    pub fn submit_reader<F>(&self, job: F) -> bool
    where
        F: FnOnce(&CancellationToken, &dyn Transaction, &Outbox<'_>) -> Result<()> + Send + 'static,
    {
        let accepted = match &self.tasks {
            Some(tasks) if !self.shared.failure.is_set() => {
                submit(&self.shared.ctx, tasks, Box::new(job) as ReaderJob)
            }
            _ => false,
        };
        if !accepted {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    fn join(&mut self) {
        drop(self.tasks.take());
        if let Some(readers) = self.readers.take() {
            readers.wait();
        }
        if let Some(writers) = self.writers.take() {
            writers.wait();
        }
    }

    /// Waits for every reader and writer, returning the first failure if any.
    ///
    /// A cancelled parent yields [`PenumbraError::Cancelled`] whenever readers
    /// or jobs were dropped on its account.
    pub fn done(mut self) -> Result<OperationReport> {
        self.join();

        if let Some(err) = self.shared.failure.take() {
            return Err(err);
        }
        if self.shared.ctx.is_cancelled() && self.shared.truncated() > 0 {
            warn!(
                operation = self.shared.name,
                dropped = self.shared.truncated(),
                "analysis.operation.cancelled"
            );
            return Err(PenumbraError::Cancelled);
        }

        let counters = &self.shared.counters;
        let mut stats = PostProcessingStats::default();
        for (kind, count) in counters.created.lock().iter() {
            stats.add_created(kind, *count);
        }
        stats.relationships_refreshed = counters.refreshed.load(Ordering::Relaxed);
        let jobs = self
            .accumulator
            .take()
            .map(|jobs| std::mem::take(&mut *jobs.lock()))
            .unwrap_or_default();
        let report = OperationReport {
            stats,
            readers_run: counters.readers_run.load(Ordering::Relaxed),
            readers_skipped: counters.readers_skipped.load(Ordering::Relaxed),
            jobs_submitted: counters.jobs_submitted.load(Ordering::Relaxed),
            batches_committed: counters.batches_committed.load(Ordering::Relaxed),
            jobs,
        };
        info!(
            operation = self.shared.name,
            readers = report.readers_run,
            jobs = report.jobs_submitted,
            created = report.stats.total_created(),
            "analysis.operation.done"
        );
        Ok(report)
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        if self.readers.is_none() && self.writers.is_none() {
            return;
        }
        // Dropped without `done`: stop accepting work and let the pools wind down.
        self.shared.ctx.cancel();
        self.join();
    }
}

fn reader_loop(shared: &Shared, tasks: &Receiver<ReaderJob>, delivery: &Delivery) {
    let outbox = Outbox {
        ctx: &shared.ctx,
        delivery,
        counters: &shared.counters,
    };
    while let Ok(job) = tasks.recv() {
        if shared.ctx.is_cancelled() || shared.failure.is_set() {
            shared.counters.readers_skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        shared.counters.readers_run.fetch_add(1, Ordering::Relaxed);
        let result = shared
            .db
            .read(&shared.ctx, |tx| job(&shared.ctx, tx, &outbox));
        if let Err(err) = result {
            shared.fail(err, "reader");
        }
    }
}

fn writer_loop(shared: &Shared, receiver: &Receiver<EdgeJob>, batch_size: usize) {
    let mut batch = Vec::with_capacity(batch_size);
    while let Ok(first) = receiver.recv() {
        batch.clear();
        batch.push(first);
        batch.extend(receiver.try_iter().take(batch_size - 1));
        if shared.failure.is_set() {
            continue;
        }
        debug!(operation = shared.name, batch = batch.len(), "analysis.operation.writer_batch_ready");
        match shared.db.write(&shared.ctx, |tx| upsert_batch(tx, &batch)) {
            Ok(created) => {
                shared.counters.batches_committed.fetch_add(1, Ordering::Relaxed);
                let mut totals = shared.counters.created.lock();
                let mut refreshed = batch.len() as u64;
                for (kind, count) in created {
                    refreshed -= count;
                    *totals.entry(kind).or_default() += count;
                }
                shared.counters.refreshed.fetch_add(refreshed, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(operation = shared.name, batch = batch.len(), "analysis.operation.writer_batch_failed");
                shared.fail(err, "writer");
            }
        }
    }
}

/// Current UTC time formatted for `lastseen`.
pub(crate) fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| PenumbraError::InvalidArgument(err.to_string()))
}

/// Creates or refreshes the relationship of every job, returning creations per kind.
fn upsert_batch(tx: &mut dyn WriteTransaction, batch: &[EdgeJob]) -> Result<FxHashMap<Kind, u64>> {
    let now = now_rfc3339()?;
    let mut created: FxHashMap<Kind, u64> = FxHashMap::default();
    for job in batch {
        let existing = tx
            .relationships()
            .filter(query::and([
                query::id_equals(Target::Start, job.from),
                query::id_equals(Target::End, job.to),
                query::kind(Target::Relationship, job.kind.clone()),
            ]))
            .limit(1)
            .fetch()?;
        match existing.into_iter().next() {
            Some(mut rel) => {
                rel.properties.set(LAST_SEEN, now.clone());
                tx.update_relationship(&rel)?;
            }
            None => {
                let properties = Properties::new().with(LAST_SEEN, now.clone());
                tx.create_relationship_by_ids(job.from, job.to, job.kind.clone(), properties)?;
                *created.entry(job.kind.clone()).or_default() += 1;
            }
        }
    }
    Ok(created)
}
