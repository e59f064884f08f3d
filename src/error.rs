//! Error taxonomy for the ingest pipeline.
//!
//! Fatal errors (header parse failures, I/O, encoding, permanent DB errors)
//! propagate as [`IngestError`] and abort the load. Per-record and per-field
//! problems never propagate — they are folded into [`IngestReport`] counters
//! so that a single malformed cell does not sink an entire file.

use thiserror::Error;

/// Fatal errors. None of these are retried; each one aborts the load before
/// (or during) the point it is raised.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed VCF header: {0}")]
    MalformedHeader(String),

    #[error("invalid field declaration for {namespace} id {id:?}: {reason}")]
    InvalidFieldDeclaration {
        namespace: &'static str,
        id: String,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decompression error: {0}")]
    Codec(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("permanent database error: {0}")]
    PermanentDb(String),

    /// Connection/pool-acquisition failure, serialization-failure
    /// equivalents — anything the database side expects a client to retry
    /// (spec §7: "TransientDbError: retried per §4.8"). Kept as a distinct
    /// variant (rather than folded into `PermanentDb`) so
    /// [`crate::coordinator::commit_batch`] can dispatch on retryability
    /// without stringly-typed inspection.
    #[error("transient database error: {0}")]
    TransientDb(String),

    #[error("source already loaded (fingerprint {fingerprint}); use force to reload")]
    AlreadyLoaded { fingerprint: String },

    #[error("reference lookup out of range: {chrom}:{position}")]
    OutOfRange { chrom: String, position: i64 },

    /// A record's chromosome is not one of the declared
    /// `CONSTRAINED_CHROMOSOMES` under `ChromosomeMode::Constrained` (spec
    /// §4.5). Distinct from `OutOfRange`, which is exclusively the
    /// reference-genome provider's base-lookup failure (spec §6) — these
    /// are unrelated failure modes and must not share a variant.
    #[error("chromosome {chrom:?} is not in the constrained chromosome set")]
    UnconstrainedChromosome { chrom: String },

    #[error("record had fewer than 8 columns")]
    MalformedRecordFatal,
}

/// A pool-acquisition failure (exhausted pool, connection creation failure)
/// is always expected to succeed on a later attempt.
pub fn classify_pool_error(e: deadpool_postgres::PoolError) -> IngestError {
    IngestError::TransientDb(e.to_string())
}

/// A query/execute/copy failure carrying a SQLSTATE code is the server's
/// response to a well-formed request (constraint violation, undefined
/// table/column) and will fail again identically on retry — permanent. One
/// with no code came from the connection itself (reset, timeout) and is
/// retried (spec §7: "TransientDbError: retried per §4.8").
pub fn classify_query_error(e: tokio_postgres::Error) -> IngestError {
    if e.code().is_none() {
        IngestError::TransientDb(e.to_string())
    } else {
        IngestError::PermanentDb(e.to_string())
    }
}

/// One per-record or per-field problem, counted but never fatal by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIssue {
    /// Record had fewer than 8 tab-separated columns; skipped.
    MalformedRecord { line_no: u64 },
    /// A typed field's token failed to parse as its declared `vcf_type`;
    /// the cell became missing.
    CoercionFailure { field_id: String, line_no: u64 },
    /// A`Number=A/R/G` field's token list length did not match the
    /// expected cardinality for the record's ALT count; the field became
    /// missing for every row emitted from that record.
    ArrayCardinalityMismatch { field_id: String, line_no: u64 },
}

/// Accumulates [`RecordIssue`]s for the duration of one load, and is
/// logged (never silently dropped) when the load finishes.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub malformed_records: u64,
    pub coercion_failures: u64,
    pub array_cardinality_mismatches: u64,
    pub rows_emitted: u64,
}

impl IngestReport {
    pub fn record(&mut self, issue: RecordIssue) {
        match issue {
            RecordIssue::MalformedRecord { line_no } => {
                self.malformed_records += 1;
                tracing::warn!(line_no, "malformed record, skipping");
            }
            RecordIssue::CoercionFailure { field_id, line_no } => {
                self.coercion_failures += 1;
                tracing::debug!(field_id, line_no, "coercion failure, field set missing");
            }
            RecordIssue::ArrayCardinalityMismatch { field_id, line_no } => {
                self.array_cardinality_mismatches += 1;
                tracing::debug!(
                    field_id,
                    line_no,
                    "array cardinality mismatch, field set missing"
                );
            }
        }
    }

    pub fn merge(&mut self, other: &IngestReport) {
        self.malformed_records += other.malformed_records;
        self.coercion_failures += other.coercion_failures;
        self.array_cardinality_mismatches += other.array_cardinality_mismatches;
        self.rows_emitted += other.rows_emitted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_merge_sums_counters() {
        let mut a = IngestReport {
            malformed_records: 1,
            coercion_failures: 2,
            array_cardinality_mismatches: 3,
            rows_emitted: 4,
        };
        let b = IngestReport {
            malformed_records: 10,
            coercion_failures: 20,
            array_cardinality_mismatches: 30,
            rows_emitted: 40,
        };
        a.merge(&b);
        assert_eq!(a.malformed_records, 11);
        assert_eq!(a.coercion_failures, 22);
        assert_eq!(a.array_cardinality_mismatches, 33);
        assert_eq!(a.rows_emitted, 44);
    }

    #[test]
    fn record_increments_matching_counter() {
        let mut report = IngestReport::default();
        report.record(RecordIssue::MalformedRecord { line_no: 1 });
        report.record(RecordIssue::CoercionFailure {
            field_id: "AF".into(),
            line_no: 2,
        });
        report.record(RecordIssue::ArrayCardinalityMismatch {
            field_id: "AD".into(),
            line_no: 3,
        });
        assert_eq!(report.malformed_records, 1);
        assert_eq!(report.coercion_failures, 1);
        assert_eq!(report.array_cardinality_mismatches, 1);
    }
}
