//! Generic analysis machinery: configuration, membership aggregation, the
//! reader/writer scheduler and run statistics.

pub mod aggregator;
/// Run configuration and presets.
pub mod config;
/// Scope timing.
pub mod measure;
pub mod operation;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::Kind;

pub use aggregator::{IdAggregator, PathAggregator};
pub use config::{AnalysisConfig, MAXIMUM_DATABASE_PARALLEL_WORKERS};
pub use measure::{measure, Measure};
pub use operation::{EdgeJob, Operation, OperationReport, Outbox};

/// Relationship counters reported by a derivation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PostProcessingStats {
    /// Relationships created, by kind name.
    pub relationships_created: BTreeMap<String, u64>,
    /// Derived relationships that already existed and had `lastseen` refreshed.
    pub relationships_refreshed: u64,
}

impl PostProcessingStats {
    /// Adds `count` creations of `kind`.
    pub fn add_created(&mut self, kind: &Kind, count: u64) {
        if count > 0 {
            *self
                .relationships_created
                .entry(kind.as_str().to_owned())
                .or_default() += count;
        }
    }

    /// Folds `other` into `self`.
    pub fn merge(&mut self, other: &PostProcessingStats) {
        for (kind, count) in &other.relationships_created {
            *self.relationships_created.entry(kind.clone()).or_default() += count;
        }
        self.relationships_refreshed += other.relationships_refreshed;
    }

    /// Relationships created of `kind`.
    pub fn created(&self, kind: &Kind) -> u64 {
        self.relationships_created
            .get(kind.as_str())
            .copied()
            .unwrap_or_default()
    }

    /// Relationships created across all kinds.
    pub fn total_created(&self) -> u64 {
        self.relationships_created.values().sum()
    }
}
