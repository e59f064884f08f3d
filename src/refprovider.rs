//! Reference-sequence access for reference-assisted normalization (spec
//! §4.4). Kept as a trait so the default in-memory/no-op provider can be
//! swapped for a real FASTA-backed one without touching [`crate::normalize`].

use crate::error::IngestError;

/// Supplies reference bases for a contig, used to extend parsimony trimming
/// past the bases already present in a record (reference-assisted mode).
pub trait ReferenceProvider: Send + Sync {
    /// Returns the base at `pos` (1-based) on `chrom`, or an error if the
    /// position is outside the contig (spec §9: `OutOfRange`).
    fn base_at(&self, chrom: &str, pos: i64) -> Result<u8, IngestError>;
}

/// A provider with no backing sequence data. Reference-assisted mode with
/// this provider behaves identically to context-free mode: any attempt to
/// look up a base outside the record's own REF/ALT bytes fails closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReferenceProvider;

impl ReferenceProvider for NullReferenceProvider {
    fn base_at(&self, chrom: &str, pos: i64) -> Result<u8, IngestError> {
        Err(IngestError::OutOfRange {
            chrom: chrom.to_string(),
            position: pos,
        })
    }
}

/// An in-memory provider backed by a flat map of contig name to full
/// sequence, for tests and small references.
#[derive(Debug, Default, Clone)]
pub struct InMemoryReferenceProvider {
    sequences: indexmap::IndexMap<String, Vec<u8>>,
}

impl InMemoryReferenceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contig(mut self, chrom: impl Into<String>, sequence: impl Into<Vec<u8>>) -> Self {
        self.sequences.insert(chrom.into(), sequence.into());
        self
    }
}

impl ReferenceProvider for InMemoryReferenceProvider {
    fn base_at(&self, chrom: &str, pos: i64) -> Result<u8, IngestError> {
        let seq = self
            .sequences
            .get(chrom)
            .ok_or_else(|| IngestError::OutOfRange {
                chrom: chrom.to_string(),
                position: pos,
            })?;
        if pos < 1 || pos as usize > seq.len() {
            return Err(IngestError::OutOfRange {
                chrom: chrom.to_string(),
                position: pos,
            });
        }
        Ok(seq[pos as usize - 1])
    }
}
