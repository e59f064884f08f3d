//! The configuration surface recognized by the ingest pipeline (spec §6).
//!
//! Loading these values from TOML/CLI/environment is explicitly someone
//! else's job (see `spec.md` §1 Non-goals); this module only declares the
//! typed shape and its documented defaults so the core never has to guess.

use serde::{Deserialize, Serialize};

/// Chromosome identifier policy (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChromosomeMode {
    /// Column type is an enum over `chr1..chr22, chrX, chrY, chrM`.
    Constrained,
    /// Column type is free text.
    Open,
}

/// Left-alignment strategy (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NormalizeMode {
    ContextFree,
    ReferenceAssisted,
}

/// Typed form of the configuration options in `spec.md` §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Rows per sealed batch.
    pub batch_size: usize,
    /// Number of chromosome-sharded pipelines; 1 disables sharding.
    pub shard_count: usize,
    /// Whether to run the Normalizer at all.
    pub normalize: bool,
    pub normalize_mode: NormalizeMode,
    /// Drop declared secondary indexes before load, recreate after.
    pub drop_indexes: bool,
    pub chromosome_mode: ChromosomeMode,
    /// Bypass the idempotency guard in §4.8 step 2.
    pub force: bool,
    pub retry_max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    /// Minimum gap between throughput log lines while a load is running.
    pub progress_log_interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 50_000,
            shard_count: 1,
            normalize: true,
            normalize_mode: NormalizeMode::ContextFree,
            drop_indexes: true,
            chromosome_mode: ChromosomeMode::Constrained,
            force: false,
            retry_max_attempts: 5,
            retry_backoff_base_ms: 100,
            progress_log_interval_secs: 30,
        }
    }
}

impl IngestConfig {
    /// Reject configurations that contradict the documented invariants
    /// rather than silently clamping them.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be >= 1 (row-count flush is required)".into());
        }
        if self.shard_count == 0 {
            return Err("shard_count must be >= 1".into());
        }
        if self.retry_max_attempts == 0 && self.retry_backoff_base_ms > 0 {
            // zero retries is legal (fail fast), nothing to validate beyond count
        }
        Ok(())
    }
}
