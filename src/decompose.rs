//! Decomposer: rewrites one multi-allelic [`RawRecord`] into *k* biallelic
//! rows, projecting per-ALT/per-allele/per-genotype arrays along the way
//! (spec §4.3 — the hard part).

use indexmap::IndexMap;

use crate::error::{IngestReport, RecordIssue};
use crate::header::{Cardinality, HeaderField, HeaderModel, VcfType};
use crate::reader::RawRecord;
use crate::typedvalue::{coerce_token, missing_of, Scalar, TypedValue};

/// One ALT allele's worth of a formerly multi-allelic record.
#[derive(Debug, Clone, PartialEq)]
pub struct BiallelicRow {
    pub chrom: String,
    pub pos: i64,
    pub id: Option<String>,
    pub reference: String,
    pub alt: String,
    /// 1-based index into the original ALT list, preserved for provenance.
    pub alt_index: usize,
    pub is_spanning_deletion: bool,
    pub qual: Option<f64>,
    pub filter: Vec<String>,
    pub info: IndexMap<String, TypedValue>,
    /// One map per sample, same order as [`HeaderModel::sample_names`].
    pub samples: Vec<IndexMap<String, TypedValue>>,
    pub line_no: u64,
}

fn split_csv(raw: &[u8]) -> Vec<&[u8]> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(|b| *b == b',').collect()
}

/// Projects one declared field's raw token across all `k` rows of a record,
/// returning one [`TypedValue`] per row (row `i` ↔ `alt_index = i + 1`).
fn project_field(
    field: &HeaderField,
    raw: Option<&bytes::Bytes>,
    k: usize,
    report: &mut IngestReport,
    line_no: u64,
) -> Vec<TypedValue> {
    match field.cardinality {
        Cardinality::Fixed(0) => {
            // Flag: presence of the key (regardless of raw value) is true.
            vec![TypedValue::Flag(raw.is_some() || field.vcf_type == VcfType::Flag && raw.is_none()); k]
        }
        Cardinality::Fixed(1) => {
            let (scalar, failed) = coerce_token(raw.map(|b| b.as_ref()), field.vcf_type);
            if failed {
                report.record(RecordIssue::CoercionFailure {
                    field_id: field.id.clone(),
                    line_no,
                });
            }
            vec![TypedValue::Scalar(scalar); k]
        }
        Cardinality::Fixed(n) => {
            let tokens = raw.map(|b| split_csv(b)).unwrap_or_default();
            let mut scalars = Vec::with_capacity(n as usize);
            for idx in 0..n as usize {
                let tok = tokens.get(idx).copied();
                let (scalar, failed) = coerce_token(tok, field.vcf_type);
                if failed {
                    report.record(RecordIssue::CoercionFailure {
                        field_id: field.id.clone(),
                        line_no,
                    });
                }
                scalars.push(scalar);
            }
            vec![TypedValue::Array(scalars); k]
        }
        Cardinality::Unbounded => {
            // Never split; pass the raw comma-joined string through as-is.
            let text = raw.map(|b| String::from_utf8_lossy(b).into_owned());
            vec![TypedValue::Scalar(Scalar::Str(text)); k]
        }
        Cardinality::PerAlt => {
            let tokens = raw.map(|b| split_csv(b)).unwrap_or_default();
            if tokens.len() != k {
                report.record(RecordIssue::ArrayCardinalityMismatch {
                    field_id: field.id.clone(),
                    line_no,
                });
                return vec![TypedValue::missing_scalar(field.vcf_type); k];
            }
            tokens
                .iter()
                .map(|tok| {
                    let (scalar, failed) = coerce_token(Some(tok), field.vcf_type);
                    if failed {
                        report.record(RecordIssue::CoercionFailure {
                            field_id: field.id.clone(),
                            line_no,
                        });
                    }
                    TypedValue::Scalar(scalar)
                })
                .collect()
        }
        Cardinality::PerAllele => {
            let tokens = raw.map(|b| split_csv(b)).unwrap_or_default();
            if tokens.len() != k + 1 {
                report.record(RecordIssue::ArrayCardinalityMismatch {
                    field_id: field.id.clone(),
                    line_no,
                });
                return vec![
                    TypedValue::Array(vec![missing_of(field.vcf_type), missing_of(field.vcf_type)]);
                    k
                ];
            }
            let mut rows = Vec::with_capacity(k);
            for i in 0..k {
                let (ref_scalar, ref_failed) = coerce_token(Some(tokens[0]), field.vcf_type);
                let (alt_scalar, alt_failed) = coerce_token(Some(tokens[i + 1]), field.vcf_type);
                if ref_failed || alt_failed {
                    report.record(RecordIssue::CoercionFailure {
                        field_id: field.id.clone(),
                        line_no,
                    });
                }
                rows.push(TypedValue::Array(vec![ref_scalar, alt_scalar]));
            }
            rows
        }
        Cardinality::PerGenotype => {
            let tokens = raw.map(|b| split_csv(b)).unwrap_or_default();
            let expected = (k as u64 + 1) * (k as u64 + 2) / 2;
            if tokens.len() as u64 != expected {
                report.record(RecordIssue::ArrayCardinalityMismatch {
                    field_id: field.id.clone(),
                    line_no,
                });
                return vec![
                    TypedValue::Array(vec![
                        missing_of(field.vcf_type),
                        missing_of(field.vcf_type),
                        missing_of(field.vcf_type),
                    ]);
                    k
                ];
            }
            let mut rows = Vec::with_capacity(k);
            for alt_index in 1..=k {
                let i = alt_index as u64;
                let idx0 = 0usize;
                let idx1 = (i * (i + 1) / 2) as usize;
                let idx2 = ((i + 1) * (i + 2) / 2 - 1) as usize;
                let mut any_failed = false;
                let scalars: Vec<Scalar> = [idx0, idx1, idx2]
                    .into_iter()
                    .map(|idx| {
                        let (scalar, failed) = coerce_token(Some(tokens[idx]), field.vcf_type);
                        any_failed |= failed;
                        scalar
                    })
                    .collect();
                if any_failed {
                    report.record(RecordIssue::CoercionFailure {
                        field_id: field.id.clone(),
                        line_no,
                    });
                }
                rows.push(TypedValue::Array(scalars));
            }
            rows
        }
    }
}

/// Rewrite one allele component of a GT value: `.`/`*` pass through, a
/// numeric allele index becomes `1` iff it equals `alt_index`, else `0`.
fn rewrite_allele(token: &str, alt_index: usize) -> String {
    if token == "." || token == "*" {
        return token.to_string();
    }
    match token.parse::<usize>() {
        Ok(n) if n == alt_index => "1".to_string(),
        Ok(_) => "0".to_string(),
        Err(_) => token.to_string(),
    }
}

/// Rewrite a full `GT` value (`a/b`, `a|b`, possibly higher ploidy),
/// preserving phase separators (spec §4.3).
fn rewrite_genotype(raw: &str, alt_index: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut token = String::new();
    for ch in raw.chars() {
        if ch == '/' || ch == '|' {
            out.push_str(&rewrite_allele(&token, alt_index));
            token.clear();
            out.push(ch);
        } else {
            token.push(ch);
        }
    }
    out.push_str(&rewrite_allele(&token, alt_index));
    out
}

fn project_genotype(raw: Option<&bytes::Bytes>, alt_index: usize) -> TypedValue {
    match raw {
        None => TypedValue::Scalar(Scalar::Str(None)),
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            TypedValue::Scalar(Scalar::Str(Some(rewrite_genotype(&text, alt_index))))
        }
    }
}

/// Decomposes a `RawRecord` into exactly `k = alts.len()` [`BiallelicRow`]s,
/// consuming it (it owns its byte storage for exactly this one stage; spec
/// §3 ownership summary).
pub fn decompose(
    record: RawRecord,
    header: &HeaderModel,
    report: &mut IngestReport,
) -> Vec<BiallelicRow> {
    let k = record.alts.len();
    debug_assert!(k >= 1, "RawRecord invariant: at least one ALT");

    let chrom = String::from_utf8_lossy(&record.chrom).into_owned();
    let reference = String::from_utf8_lossy(&record.reference).into_owned();
    let id = record
        .id
        .as_ref()
        .map(|b| String::from_utf8_lossy(b).into_owned());

    // Project every declared (or undeclared-but-seen) INFO field once for
    // the whole record, then distribute per row.
    let mut info_keys: Vec<&String> = record.info.keys().collect();
    info_keys.sort(); // deterministic column iteration order for tests/logs
    let mut per_row_info: Vec<IndexMap<String, TypedValue>> =
        (0..k).map(|_| IndexMap::new()).collect();
    for key in info_keys {
        let raw = record.info.get(key).and_then(|v| v.as_ref());
        let field = header.info(key);
        let projected = match field {
            Some(field) => project_field(field, raw, k, report, record.line_no),
            None => {
                // Undeclared field (e.g. an un-annotated ANN/CSQ): treated
                // as opaque String, passed through unchanged (spec §3).
                let text = raw.map(|b| String::from_utf8_lossy(b).into_owned());
                vec![TypedValue::Scalar(Scalar::Str(text)); k]
            }
        };
        for (row_idx, value) in projected.into_iter().enumerate() {
            per_row_info[row_idx].insert(key.clone(), value);
        }
    }

    // Project every FORMAT field for every sample.
    let mut per_row_samples: Vec<Vec<IndexMap<String, TypedValue>>> = (0..k)
        .map(|_| {
            (0..record.sample_values.len())
                .map(|_| IndexMap::new())
                .collect()
        })
        .collect();
    for (fmt_idx, fmt_key) in record.format_keys.iter().enumerate() {
        let field = header.format(fmt_key);
        for (sample_idx, sample_cells) in record.sample_values.iter().enumerate() {
            let raw = sample_cells.get(fmt_idx).and_then(|v| v.as_ref());
            if fmt_key == "GT" {
                for alt_index in 1..=k {
                    per_row_samples[alt_index - 1][sample_idx]
                        .insert(fmt_key.clone(), project_genotype(raw, alt_index));
                }
                continue;
            }
            let projected = match field {
                Some(field) => project_field(field, raw, k, report, record.line_no),
                None => {
                    let text = raw.map(|b| String::from_utf8_lossy(b).into_owned());
                    vec![TypedValue::Scalar(Scalar::Str(text)); k]
                }
            };
            for (row_idx, value) in projected.into_iter().enumerate() {
                per_row_samples[row_idx][sample_idx].insert(fmt_key.clone(), value);
            }
        }
    }

    (0..k)
        .map(|row_idx| {
            let alt_index = row_idx + 1;
            let alt = String::from_utf8_lossy(&record.alts[row_idx]).into_owned();
            BiallelicRow {
                chrom: chrom.clone(),
                pos: record.pos,
                id: id.clone(),
                reference: reference.clone(),
                is_spanning_deletion: alt == "*",
                alt,
                alt_index,
                qual: record.qual,
                filter: record.filter.clone(),
                info: std::mem::take(&mut per_row_info[row_idx]),
                samples: std::mem::take(&mut per_row_samples[row_idx]),
                line_no: record.line_no,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{HeaderModel, Namespace};
    use bytes::Bytes;
    use std::io::Cursor;

    fn header_with(extra: &str) -> HeaderModel {
        let text = format!(
            "##fileformat=VCFv4.2\n{extra}#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA001\n"
        );
        let mut cursor = Cursor::new(text.into_bytes());
        HeaderModel::parse(&mut cursor).unwrap()
    }

    fn raw(chrom: &str, pos: i64, r: &str, alts: &[&str], info: &[(&str, &str)]) -> RawRecord {
        let mut info_map = IndexMap::new();
        for (k, v) in info {
            info_map.insert(k.to_string(), Some(Bytes::copy_from_slice(v.as_bytes())));
        }
        RawRecord {
            chrom: Bytes::copy_from_slice(chrom.as_bytes()),
            pos,
            id: None,
            reference: Bytes::copy_from_slice(r.as_bytes()),
            alts: alts.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect(),
            qual: None,
            filter: vec!["PASS".to_string()],
            info: info_map,
            format_keys: vec![],
            sample_values: vec![],
            line_no: 1,
        }
    }

    #[test]
    fn decomposition_count_invariant() {
        let header = header_with("");
        let record = raw("chr1", 100, "A", &["G", "T", "C"], &[]);
        let mut report = IngestReport::default();
        let rows = decompose(record, &header, &mut report);
        assert_eq!(rows.len(), 3);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.alt_index, i + 1);
        }
    }

    #[test]
    fn s1_multi_allelic_split() {
        let header = header_with(concat!(
            "##INFO=<ID=AC,Number=A,Type=Integer,Description=\"d\">\n",
            "##INFO=<ID=AF,Number=A,Type=Float,Description=\"d\">\n",
            "##INFO=<ID=AD,Number=R,Type=Integer,Description=\"d\">\n",
        ));
        let record = raw(
            "chr1",
            100,
            "A",
            &["G", "T"],
            &[("AC", "10,5"), ("AF", "0.1,0.05"), ("AD", "100,10,5")],
        );
        let mut report = IngestReport::default();
        let rows = decompose(record, &header, &mut report);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].alt, "G");
        assert_eq!(rows[0].info["AC"], TypedValue::Scalar(Scalar::Integer(Some(10))));
        assert_eq!(rows[0].info["AF"], TypedValue::Scalar(Scalar::Float(Some(0.1))));
        assert_eq!(
            rows[0].info["AD"],
            TypedValue::Array(vec![Scalar::Integer(Some(100)), Scalar::Integer(Some(10))])
        );

        assert_eq!(rows[1].alt, "T");
        assert_eq!(rows[1].info["AC"], TypedValue::Scalar(Scalar::Integer(Some(5))));
        assert_eq!(rows[1].info["AF"], TypedValue::Scalar(Scalar::Float(Some(0.05))));
        assert_eq!(
            rows[1].info["AD"],
            TypedValue::Array(vec![Scalar::Integer(Some(100)), Scalar::Integer(Some(5))])
        );
    }

    #[test]
    fn s2_spanning_deletion_and_gt_rewrite() {
        let header = header_with(concat!(
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"d\">\n",
            "##FORMAT=<ID=AD,Number=R,Type=Integer,Description=\"d\">\n",
            "##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"d\">\n",
        ));
        let mut record = raw("chr1", 14604, "A", &["G", "*"], &[]);
        record.format_keys = vec!["GT".into(), "AD".into(), "DP".into()];
        record.sample_values = vec![vec![
            Some(Bytes::from_static(b"1/2")),
            Some(Bytes::from_static(b"6,19,10")),
            Some(Bytes::from_static(b"36")),
        ]];
        let mut report = IngestReport::default();
        let rows = decompose(record, &header, &mut report);
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].is_spanning_deletion);
        assert!(rows[1].is_spanning_deletion);
        assert_eq!(rows[1].alt, "*");

        assert_eq!(
            rows[0].samples[0]["GT"],
            TypedValue::Scalar(Scalar::Str(Some("1/0".to_string())))
        );
        assert_eq!(
            rows[1].samples[0]["GT"],
            TypedValue::Scalar(Scalar::Str(Some("0/1".to_string())))
        );
    }

    #[test]
    fn per_genotype_diploid_projection() {
        let header = header_with("##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"d\">\n");
        let mut record = raw("chr1", 100, "A", &["G", "T"], &[]);
        record.format_keys = vec!["PL".into()];
        // n_alleles = 3 (REF + 2 ALT) -> 6 combinations: 00,01,11,02,12,22
        record.sample_values = vec![vec![Some(Bytes::from_static(b"0,1,2,3,4,5"))]];
        let mut report = IngestReport::default();
        let rows = decompose(record, &header, &mut report);

        assert_eq!(
            rows[0].samples[0]["PL"],
            TypedValue::Array(vec![
                Scalar::Integer(Some(0)),
                Scalar::Integer(Some(1)),
                Scalar::Integer(Some(2))
            ])
        );
        assert_eq!(
            rows[1].samples[0]["PL"],
            TypedValue::Array(vec![
                Scalar::Integer(Some(0)),
                Scalar::Integer(Some(3)),
                Scalar::Integer(Some(5))
            ])
        );
    }

    #[test]
    fn per_alt_cardinality_mismatch_becomes_missing() {
        let header = header_with("##INFO=<ID=AC,Number=A,Type=Integer,Description=\"d\">\n");
        let record = raw("chr1", 100, "A", &["G", "T"], &[("AC", "10")]); // wrong length
        let mut report = IngestReport::default();
        let rows = decompose(record, &header, &mut report);
        assert_eq!(report.array_cardinality_mismatches, 1);
        assert_eq!(rows[0].info["AC"], TypedValue::Scalar(Scalar::Integer(None)));
        assert_eq!(rows[1].info["AC"], TypedValue::Scalar(Scalar::Integer(None)));
    }

    #[test]
    fn s5_coercion_failure_counted_and_row_still_committed() {
        let header = header_with("##INFO=<ID=XF,Number=1,Type=Float,Description=\"d\">\n");
        let record = raw("chr1", 100, "A", &["G"], &[("XF", "0.123,0.122")]);
        let mut report = IngestReport::default();
        let rows = decompose(record, &header, &mut report);
        assert_eq!(report.coercion_failures, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].info["XF"], TypedValue::Scalar(Scalar::Float(None)));
    }

    #[test]
    fn flag_field_passes_through_to_every_row() {
        let header = header_with("##INFO=<ID=DB,Number=0,Type=Flag,Description=\"d\">\n");
        let record = raw("chr1", 100, "A", &["G", "T"], &[("DB", "")]);
        let mut report = IngestReport::default();
        let rows = decompose(record, &header, &mut report);
        assert_eq!(rows[0].info["DB"], TypedValue::Flag(true));
        assert_eq!(rows[1].info["DB"], TypedValue::Flag(true));
    }

    #[test]
    fn unbounded_field_passes_raw_string_unsplit() {
        let header = header_with("##INFO=<ID=ANN,Number=.,Type=String,Description=\"d\">\n");
        let record = raw("chr1", 100, "A", &["G", "T"], &[("ANN", "a|b,c|d")]);
        let mut report = IngestReport::default();
        let rows = decompose(record, &header, &mut report);
        assert_eq!(
            rows[0].info["ANN"],
            TypedValue::Scalar(Scalar::Str(Some("a|b,c|d".to_string())))
        );
        assert_eq!(rows[0].info["ANN"], rows[1].info["ANN"]);
    }

    #[test]
    fn undeclared_field_treated_as_opaque_string() {
        let header = header_with("");
        let record = raw("chr1", 100, "A", &["G"], &[("CSQ", "whatever")]);
        let mut report = IngestReport::default();
        let rows = decompose(record, &header, &mut report);
        assert_eq!(
            rows[0].info["CSQ"],
            TypedValue::Scalar(Scalar::Str(Some("whatever".to_string())))
        );
    }

    #[test]
    fn namespace_variant_used_only_for_construction_sanity() {
        let _ = Namespace::Info;
    }
}
