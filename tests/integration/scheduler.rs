#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{add_node, collecting, init_tracing};
use penumbra::analysis::Operation;
use penumbra::graph::{GraphStore, GraphStoreExt, MemoryGraph, Properties, TransactionExt};
use penumbra::types::{Kind, NodeId, PenumbraError, Result};
use penumbra::AnalysisConfig;
use tokio_util::sync::CancellationToken;

const OWNS: Kind = Kind::from_static("Owns");

fn store(count: usize) -> Result<(Arc<dyn GraphStore>, Vec<NodeId>)> {
    let graph = MemoryGraph::new();
    let ids = graph.write(&CancellationToken::new(), |tx| {
        (0..count)
            .map(|_| add_node(tx, Kind::from_static("Base"), Properties::new()))
            .collect::<Result<Vec<_>>>()
    })?;
    Ok((Arc::new(graph), ids))
}

#[test]
fn saturated_channel_delivers_every_job() -> Result<()> {
    let (db, ids) = store(28)?;
    let (sources, targets) = ids.split_at(8);
    let config = AnalysisConfig {
        num_readers: 4,
        num_writers: 1,
        output_buffer: 1,
        writer_batch_size: 1,
        ..AnalysisConfig::default()
    };
    let ctx = CancellationToken::new();
    let operation = Operation::start(&ctx, Arc::clone(&db), &config, "backpressure")?;
    for &source in sources {
        let targets = targets.to_vec();
        assert!(operation.submit_reader(move |_, _, outbox| {
            for target in targets {
                assert!(outbox.emit(source, target, OWNS));
            }
            Ok(())
        }));
    }
    let report = operation.done()?;

    assert_eq!(report.readers_run, 8);
    assert_eq!(report.jobs_submitted, 160);
    assert_eq!(report.batches_committed, 160);
    assert_eq!(report.stats.created(&OWNS), 160);
    assert_eq!(db.read(&ctx, |tx| tx.relationships().count())?, 160);
    Ok(())
}

#[test]
fn first_error_wins() -> Result<()> {
    init_tracing();
    let (db, ids) = store(2)?;
    let operation = Operation::start(&CancellationToken::new(), db, &collecting(), "first_error")?;
    let (a, b) = (ids[0], ids[1]);
    operation.submit_reader(move |_, _, outbox| {
        outbox.emit(a, b, OWNS);
        Ok(())
    });
    operation.submit_reader(|_, _, _| Err(PenumbraError::Query("first".into())));
    operation.submit_reader(|_, _, _| Err(PenumbraError::Query("second".into())));

    let err = operation.done().unwrap_err();
    assert_eq!(err.to_string(), "query failed: first");
    Ok(())
}

#[test]
fn failure_cancels_the_operation() -> Result<()> {
    let (db, _) = store(1)?;
    let parent = CancellationToken::new();
    let operation = Operation::start(&parent, db, &collecting(), "cancel_siblings")?;
    operation.submit_reader(|_, _, _| Err(PenumbraError::Query("boom".into())));

    let deadline = Instant::now() + Duration::from_secs(10);
    while !operation.context().is_cancelled() {
        assert!(Instant::now() < deadline, "operation was not cancelled");
        thread::sleep(Duration::from_millis(1));
    }
    // The failure stays local to the operation.
    assert!(!parent.is_cancelled());
    assert!(!operation.submit_reader(|_, _, _| Ok(())));
    assert!(operation.done().is_err());
    Ok(())
}

#[test]
fn cancelled_parent_refuses_readers() -> Result<()> {
    let (db, _) = store(1)?;
    let parent = CancellationToken::new();
    let operation = Operation::start(&parent, db, &collecting(), "cancelled")?;
    parent.cancel();
    assert!(operation.context().is_cancelled());
    assert!(!operation.submit_reader(|_, _, _| Ok(())));
    assert!(matches!(operation.done(), Err(PenumbraError::Cancelled)));
    Ok(())
}

#[test]
fn parent_cancelled_mid_reader_is_not_a_partial_success() -> Result<()> {
    let (db, ids) = store(2)?;
    let parent = CancellationToken::new();
    let operation = Operation::start(&parent, db, &collecting(), "cancelled_mid_reader")?;
    let (a, b) = (ids[0], ids[1]);
    let canceller = parent.clone();
    assert!(operation.submit_reader(move |_, _, outbox| {
        assert!(outbox.emit(a, b, OWNS));
        canceller.cancel();
        assert!(!outbox.emit(b, a, OWNS));
        Ok(())
    }));
    assert!(matches!(operation.done(), Err(PenumbraError::Cancelled)));
    Ok(())
}

#[test]
fn parent_cancelled_after_all_work_still_reports() -> Result<()> {
    let (db, ids) = store(2)?;
    let parent = CancellationToken::new();
    let operation = Operation::start(&parent, db, &collecting(), "cancelled_late")?;
    let (a, b) = (ids[0], ids[1]);
    let canceller = parent.clone();
    assert!(operation.submit_reader(move |_, _, outbox| {
        assert!(outbox.emit(a, b, OWNS));
        canceller.cancel();
        Ok(())
    }));
    let report = operation.done()?;
    assert_eq!(report.readers_run, 1);
    assert_eq!(report.jobs.len(), 1);
    Ok(())
}

#[test]
fn failing_reader_stops_spinning_siblings() -> Result<()> {
    init_tracing();
    let (db, _) = store(1)?;
    let config = AnalysisConfig {
        num_readers: 4,
        ..collecting()
    };
    let operation = Operation::start(&CancellationToken::new(), db, &config, "spinning_siblings")?;
    for _ in 0..3 {
        assert!(operation.submit_reader(|ctx, _, _| {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !ctx.is_cancelled() {
                if Instant::now() > deadline {
                    return Err(PenumbraError::Query("sibling never saw cancellation".into()));
                }
                thread::sleep(Duration::from_millis(1));
            }
            Err(PenumbraError::Cancelled)
        }));
    }
    assert!(operation.submit_reader(|_, _, _| {
        thread::sleep(Duration::from_millis(20));
        Err(PenumbraError::Query("boom".into()))
    }));

    let started = Instant::now();
    let err = operation.done().unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(err.to_string(), "query failed: boom");
    Ok(())
}

#[test]
fn zero_readers_is_rejected() {
    let err = AnalysisConfig {
        num_readers: 0,
        ..AnalysisConfig::default()
    }
    .validate()
    .unwrap_err();
    assert!(matches!(err, PenumbraError::InvalidArgument(_)));
}
