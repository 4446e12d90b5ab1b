use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{PenumbraError, Result};

/// Worker count used for parallel graph reads unless configured otherwise.
pub const MAXIMUM_DATABASE_PARALLEL_WORKERS: usize = 6;

/// Tuning knobs for one post-processing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Reader jobs running concurrently per operation.
    pub num_readers: usize,
    /// Writer workers draining derived edges; 0 hands jobs to an accumulator instead.
    pub num_writers: usize,
    /// Capacity of the bounded derived-edge channel.
    pub output_buffer: usize,
    /// Derived edges committed per write transaction.
    pub writer_batch_size: usize,
    /// Worker threads used by membership traversals.
    pub traversal_workers: usize,
    /// Always apply Remote Interactive Logon Right filtering to CanRDP.
    pub enforce_ura: bool,
    /// Restrict CanRDP to members of the local "Direct Access Users" group.
    pub citrix_enabled: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            num_readers: MAXIMUM_DATABASE_PARALLEL_WORKERS,
            num_writers: 1,
            output_buffer: 4096,
            writer_batch_size: 1000,
            traversal_workers: MAXIMUM_DATABASE_PARALLEL_WORKERS,
            enforce_ura: false,
            citrix_enabled: false,
        }
    }
}

impl AnalysisConfig {
    /// One reader, one writer and a single traversal worker; useful when debugging.
    pub fn single_threaded() -> Self {
        Self {
            num_readers: 1,
            num_writers: 1,
            output_buffer: 256,
            writer_batch_size: 256,
            traversal_workers: 1,
            ..Self::default()
        }
    }

    /// Wider pools and larger batches for big graphs.
    pub fn throughput() -> Self {
        Self {
            num_readers: 16,
            num_writers: 2,
            output_buffer: 65_536,
            writer_batch_size: 5_000,
            traversal_workers: 12,
            ..Self::default()
        }
    }

    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|err| PenumbraError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|err| PenumbraError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| PenumbraError::Config(err.to_string()))
    }

    /// Rejects values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        let zero = |name: &str| PenumbraError::InvalidArgument(format!("{name} must be greater than zero"));
        if self.num_readers == 0 {
            return Err(zero("num_readers"));
        }
        if self.output_buffer == 0 {
            return Err(zero("output_buffer"));
        }
        if self.writer_batch_size == 0 {
            return Err(zero("writer_batch_size"));
        }
        if self.traversal_workers == 0 {
            return Err(zero("traversal_workers"));
        }
        Ok(())
    }
}
