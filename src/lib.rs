//! Penumbra attack-path post-processing engine.
//!
//! Reads a directory graph through the [`graph::GraphStore`] port, resolves
//! transitive group memberships, and derives the relationships attack path
//! analysis traverses (DCSync, local admin rights, certificate abuse, NTLM
//! relay, GPO applicability). [`catalog::run_post_processing`] runs the whole
//! pipeline.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod ad;
pub mod analysis;
pub mod catalog;
pub mod graph;
pub mod primitives;
pub mod traversal;
pub mod types;

pub use analysis::{AnalysisConfig, EdgeJob, IdAggregator, OperationReport, PathAggregator, PostProcessingStats};
pub use catalog::{run_post_processing, PipelineReport, PostProcessor};
pub use graph::{GraphStore, MemoryGraph};
pub use types::{EdgeId, Kind, NodeId, PenumbraError, Result};
