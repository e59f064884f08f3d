//! Normalizer: parsimony trimming and left-alignment of (pos, ref, alt)
//! triples (spec §4.4).
//!
//! The trim loops stop as soon as either allele would be reduced to length
//! zero, rather than only when both would — the literal "trim while either
//! side is longer than one" reading can otherwise produce an empty allele,
//! which contradicts the very invariant the same section states for
//! `NormalizedRow` ("no empty strings"). Stopping at a one-base floor on
//! both sides is also what real normalizers (bcftools `norm`, vt
//! `normalize`) implement, and it keeps the anchor base VCF callers already
//! encode. See DESIGN.md for the full resolution.

use crate::config::NormalizeMode;
use crate::decompose::BiallelicRow;
use crate::error::IngestError;
use crate::refprovider::ReferenceProvider;

/// A [`BiallelicRow`] after the parsimony-and-left-align rewrite. `ref`/`alt`
/// are minimal: no shared prefix and no shared suffix, unless the pair is a
/// SNV (both length 1) or one side has already hit the one-base floor.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub chrom: String,
    pub pos: i64,
    pub id: Option<String>,
    pub reference: String,
    pub alt: String,
    pub alt_index: usize,
    pub is_spanning_deletion: bool,
    pub qual: Option<f64>,
    pub filter: Vec<String>,
    pub info: indexmap::IndexMap<String, crate::typedvalue::TypedValue>,
    pub samples: Vec<indexmap::IndexMap<String, crate::typedvalue::TypedValue>>,
    pub line_no: u64,
}

fn trim_right(reference: &mut Vec<u8>, alt: &mut Vec<u8>) {
    while reference.len() > 1 && alt.len() > 1 && reference.last() == alt.last() {
        reference.pop();
        alt.pop();
    }
}

fn trim_left(pos: &mut i64, reference: &mut Vec<u8>, alt: &mut Vec<u8>) {
    while reference.len() > 1 && alt.len() > 1 && reference.first() == alt.first() {
        reference.remove(0);
        alt.remove(0);
        *pos += 1;
    }
}

/// Shifts the (pos, ref, alt) window one base to the left whenever the
/// reference base immediately preceding `pos` equals the base that would
/// fall off the back of the longer allele — the classic repeat-region
/// left-alignment rule. Reference-assisted mode only (spec §4.4 step 3).
fn left_align_repeat(
    chrom: &str,
    pos: &mut i64,
    reference: &mut Vec<u8>,
    alt: &mut Vec<u8>,
    provider: &dyn ReferenceProvider,
) -> Result<(), IngestError> {
    loop {
        if reference.len() == alt.len() || *pos <= 1 {
            return Ok(());
        }
        let longer = if reference.len() > alt.len() {
            &*reference
        } else {
            &*alt
        };
        let last = *longer.last().expect("longer allele is non-empty");
        let candidate = match provider.base_at(chrom, *pos - 1) {
            Ok(b) => b,
            Err(_) => return Ok(()), // no more reference context; stop shifting
        };
        if candidate != last {
            return Ok(());
        }
        reference.pop();
        reference.insert(0, candidate);
        alt.pop();
        alt.insert(0, candidate);
        *pos -= 1;
    }
}

/// Normalizes one [`BiallelicRow`]. `*` (spanning deletion) passes through
/// untouched. Idempotent: normalizing an already-normalized row is a no-op.
pub fn normalize(
    row: BiallelicRow,
    mode: NormalizeMode,
    provider: &dyn ReferenceProvider,
) -> Result<NormalizedRow, IngestError> {
    if row.is_spanning_deletion {
        return Ok(NormalizedRow {
            chrom: row.chrom,
            pos: row.pos,
            id: row.id,
            reference: row.reference,
            alt: row.alt,
            alt_index: row.alt_index,
            is_spanning_deletion: row.is_spanning_deletion,
            qual: row.qual,
            filter: row.filter,
            info: row.info,
            samples: row.samples,
            line_no: row.line_no,
        });
    }

    let mut pos = row.pos;
    let mut reference: Vec<u8> = row.reference.clone().into_bytes();
    let mut alt: Vec<u8> = row.alt.clone().into_bytes();

    trim_right(&mut reference, &mut alt);
    trim_left(&mut pos, &mut reference, &mut alt);

    if mode == NormalizeMode::ReferenceAssisted {
        left_align_repeat(&row.chrom, &mut pos, &mut reference, &mut alt, provider)?;
    }

    Ok(NormalizedRow {
        chrom: row.chrom,
        pos,
        id: row.id,
        reference: String::from_utf8(reference).expect("input REF/ALT bytes are valid UTF-8"),
        alt: String::from_utf8(alt).expect("input REF/ALT bytes are valid UTF-8"),
        alt_index: row.alt_index,
        is_spanning_deletion: row.is_spanning_deletion,
        qual: row.qual,
        filter: row.filter,
        info: row.info,
        samples: row.samples,
        line_no: row.line_no,
    })
}
