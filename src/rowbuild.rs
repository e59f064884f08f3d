//! RowBuilder: projects a NormalizedRow into the column tuple the target
//! table expects, deriving the range, fingerprint, and audit-batch-id
//! columns along the way (spec §4.5).

use md5::{Digest, Md5};

use crate::config::ChromosomeMode;
use crate::error::IngestError;
use crate::normalize::NormalizedRow;

/// `chr1..chr22, chrX, chrY, chrM` — the fixed alphabet backing
/// [`ChromosomeMode::Constrained`].
pub const CONSTRAINED_CHROMOSOMES: &[&str] = &[
    "chr1", "chr2", "chr3", "chr4", "chr5", "chr6", "chr7", "chr8", "chr9", "chr10", "chr11",
    "chr12", "chr13", "chr14", "chr15", "chr16", "chr17", "chr18", "chr19", "chr20", "chr21",
    "chr22", "chrX", "chrY", "chrM",
];

fn is_constrained_chromosome(chrom: &str) -> bool {
    CONSTRAINED_CHROMOSOMES.contains(&chrom)
}

/// `[lower, upper)` over 1-based genomic coordinates, the column's range
/// encoding for spatial indexing (spec §4.5, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionRange {
    pub lower: i64,
    pub upper: i64,
}

/// One row ready for binary-COPY encoding: every value already typed and
/// ordered to match the destination table's declared column order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub chrom: String,
    pub pos: i64,
    pub id: Option<String>,
    pub reference: String,
    pub alt: String,
    pub alt_index: i32,
    pub is_spanning_deletion: bool,
    pub qual: Option<f64>,
    pub filter: Vec<String>,
    pub info: indexmap::IndexMap<String, crate::typedvalue::TypedValue>,
    pub samples: Vec<indexmap::IndexMap<String, crate::typedvalue::TypedValue>>,
    pub position_range: PositionRange,
    /// Hex-encoded MD5 of `(chrom, pos, ref, alt)`, used for dedup queries.
    pub fingerprint: String,
    pub audit_batch_id: uuid::Uuid,
}

/// Computes the hex content fingerprint of a (chrom, pos, ref, alt) key.
pub fn fingerprint(chrom: &str, pos: i64, reference: &str, alt: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(chrom.as_bytes());
    hasher.update(b"\0");
    hasher.update(pos.to_be_bytes());
    hasher.update(b"\0");
    hasher.update(reference.as_bytes());
    hasher.update(b"\0");
    hasher.update(alt.as_bytes());
    let digest = hasher.finalize();
    let mut buf = [0u8; 32];
    base16ct::lower::encode_str(&digest, &mut buf)
        .expect("32-byte buffer always fits a 16-byte digest")
        .to_string()
}

/// `[pos, pos+|ref|)` for a literal REF, or `[pos, pos+1)` for a symbolic
/// ALT such as the spanning deletion `*` (spec §9 open question, resolved).
fn position_range(row: &NormalizedRow) -> PositionRange {
    if row.is_spanning_deletion {
        PositionRange {
            lower: row.pos,
            upper: row.pos + 1,
        }
    } else {
        PositionRange {
            lower: row.pos,
            upper: row.pos + row.reference.len() as i64,
        }
    }
}

/// Builds one [`TableRow`], enforcing the configured chromosome identifier
/// policy.
pub fn build_row(
    row: NormalizedRow,
    chromosome_mode: ChromosomeMode,
    audit_batch_id: uuid::Uuid,
) -> Result<TableRow, IngestError> {
    if chromosome_mode == ChromosomeMode::Constrained && !is_constrained_chromosome(&row.chrom) {
        return Err(IngestError::UnconstrainedChromosome {
            chrom: row.chrom.clone(),
        });
    }

    let fingerprint = fingerprint(&row.chrom, row.pos, &row.reference, &row.alt);
    let position_range = position_range(&row);

    Ok(TableRow {
        chrom: row.chrom,
        pos: row.pos,
        id: row.id,
        reference: row.reference,
        alt: row.alt,
        alt_index: row.alt_index as i32,
        is_spanning_deletion: row.is_spanning_deletion,
        qual: row.qual,
        filter: row.filter,
        info: row.info,
        samples: row.samples,
        position_range,
        fingerprint,
        audit_batch_id,
    })
}
