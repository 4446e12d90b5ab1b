//! Breadth-first traversal over raw identifiers.
//!
//! [`IdTraversal`] expands segments on a sized rayon pool. Each expansion calls
//! the caller's delegate inside its own read transaction; the delegate returns the
//! next segments to explore, each spawned as a follow-up task in the same scope,
//! and an empty result marks the segment as terminal. Visited bookkeeping belongs
//! to the caller, which decides whether it spans one root or a whole run. The
//! first delegate error stops the traversal and is returned.

pub mod pattern;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use rayon::{Scope, ThreadPool, ThreadPoolBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::graph::query::{self, Criteria, Target};
use crate::graph::{Direction, GraphStore, GraphStoreExt, IdSegment, Transaction, TransactionExt};
use crate::primitives::concurrency::FirstError;
use crate::types::{NodeId, PenumbraError, Result};

pub use pattern::{Path, PathSet, Pattern};

/// Counters collected by one traversal.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TraversalStats {
    /// Segments handed to the delegate.
    pub expanded: u64,
    /// Deepest segment handed to the delegate.
    pub max_depth: u32,
}

/// Multi-worker breadth-first walker over [`IdSegment`]s.
pub struct IdTraversal<'g> {
    db: &'g dyn GraphStore,
    pool: ThreadPool,
}

struct Walk<'a, D> {
    db: &'a dyn GraphStore,
    ctx: &'a CancellationToken,
    delegate: &'a D,
    root: NodeId,
    failure: FirstError,
    expanded: AtomicU64,
    max_depth: AtomicU32,
}

impl<'a, D> Walk<'a, D>
where
    D: Fn(&dyn Transaction, &IdSegment) -> Result<Vec<IdSegment>> + Sync,
{
    fn expand<'s>(&'s self, scope: &Scope<'s>, segment: IdSegment)
    where
        'a: 's,
    {
        if self.failure.is_set() {
            return;
        }
        self.expanded.fetch_add(1, Ordering::Relaxed);
        self.max_depth.fetch_max(segment.depth(), Ordering::Relaxed);
        let result = if self.ctx.is_cancelled() {
            Err(PenumbraError::Cancelled)
        } else {
            self.db.read(self.ctx, |tx| (self.delegate)(tx, &segment))
        };
        match result {
            Ok(next) => {
                for child in next {
                    scope.spawn(move |scope| self.expand(scope, child));
                }
            }
            Err(err) => {
                if self.failure.record(err) {
                    debug!(root = self.root.get(), "traversal.id.aborted");
                }
            }
        }
    }
}

impl<'g> IdTraversal<'g> {
    /// Creates a walker running up to `workers` delegate calls concurrently.
    pub fn new(db: &'g dyn GraphStore, workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("penumbra-traversal-{index}"))
            .build()
            .map_err(|err| PenumbraError::InvalidArgument(format!("traversal pool: {err}")))?;
        Ok(Self { db, pool })
    }

    /// Explores from `root`, feeding every segment to `delegate`.
    pub fn breadth_first<D>(&self, ctx: &CancellationToken, root: NodeId, delegate: D) -> Result<TraversalStats>
    where
        D: Fn(&dyn Transaction, &IdSegment) -> Result<Vec<IdSegment>> + Sync,
    {
        let walk = Walk {
            db: self.db,
            ctx,
            delegate: &delegate,
            root,
            failure: FirstError::new(),
            expanded: AtomicU64::new(0),
            max_depth: AtomicU32::new(0),
        };
        self.pool.scope(|scope| walk.expand(scope, IdSegment::root(root)));

        if let Some(err) = walk.failure.take() {
            return Err(err);
        }
        let stats = TraversalStats {
            expanded: walk.expanded.into_inner(),
            max_depth: walk.max_depth.into_inner(),
        };
        trace!(root = root.get(), expanded = stats.expanded, max_depth = stats.max_depth, "traversal.id.complete");
        Ok(stats)
    }
}

/// Criteria selecting relationships that leave `node` in `direction`, excluding
/// self-loops, further restricted by `extra`.
pub fn segment_criteria(node: NodeId, direction: Direction, extra: &[Criteria]) -> Criteria {
    let (near, far) = match direction {
        Direction::Inbound => (Target::End, Target::Start),
        Direction::Outbound => (Target::Start, Target::End),
    };
    let mut parts = vec![
        query::id_equals(near, node),
        query::not(query::id_equals(far, node)),
    ];
    parts.extend(extra.iter().cloned());
    query::and(parts)
}

/// Child segments of `segment` across relationships matching `extra` in `direction`.
pub fn expand_segment(
    tx: &dyn Transaction,
    segment: &IdSegment,
    direction: Direction,
    extra: &[Criteria],
) -> Result<Vec<IdSegment>> {
    let triples = tx
        .relationships()
        .filter(segment_criteria(segment.node(), direction, extra))
        .fetch_triples()?;
    Ok(triples
        .iter()
        .map(|triple| segment.descend(direction.next_node(triple), triple.id))
        .collect())
}
