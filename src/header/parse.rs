//! Meta-line tokenizer and structured-tag parser backing [`super::HeaderModel::parse`].

use std::io::BufRead;

use indexmap::IndexMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::{derive_storage_kind, Cardinality, HeaderField, HeaderModel, Namespace, VcfType};
use crate::error::IngestError;
use crate::sanitize::ColumnNamer;

/// Split a `##KEY=VALUE` line into its key and value, stripping the `##`.
fn split_meta_line(line: &str) -> Option<(&str, &str)> {
    let body = line.strip_prefix("##")?;
    body.split_once('=')
}

/// Parse the `<...>` structured-tag body of a meta-line into an ordered
/// key/value map, respecting double-quoted values (which may contain
/// commas, e.g. `Description="a, b"`).
fn parse_structured(value: &str) -> Option<IndexMap<String, String>> {
    let inner = value.strip_prefix('<')?.strip_suffix('>')?;
    let mut out = IndexMap::new();
    let bytes = inner.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        // skip leading comma/space
        while i < bytes.len() && (bytes[i] == b',' || bytes[i] == b' ') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' {
            i += 1;
        }
        if i >= bytes.len() {
            return None; // dangling key with no '='
        }
        let key = inner[key_start..i].to_string();
        i += 1; // skip '='
        let value_start = i;
        let val = if i < bytes.len() && bytes[i] == b'"' {
            i += 1;
            let quoted_start = i;
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    i += 1;
                }
                i += 1;
            }
            if i >= bytes.len() {
                return None; // unterminated quote
            }
            let v = inner[quoted_start..i].to_string();
            i += 1; // closing quote
            v
        } else {
            while i < bytes.len() && bytes[i] != b',' {
                i += 1;
            }
            inner[value_start..i].to_string()
        };
        out.insert(key, val);
    }
    Some(out)
}

fn build_field(
    namespace: Namespace,
    tags: &IndexMap<String, String>,
    namer: &mut ColumnNamer,
) -> Result<HeaderField, IngestError> {
    let id = tags
        .get("ID")
        .ok_or_else(|| IngestError::MalformedHeader(format!("{} declaration missing ID", namespace.label())))?
        .clone();
    let number = tags.get("Number").ok_or_else(|| {
        IngestError::MalformedHeader(format!("{} {id} missing Number", namespace.label()))
    })?;
    let vcf_type_raw = tags.get("Type").ok_or_else(|| {
        IngestError::MalformedHeader(format!("{} {id} missing Type", namespace.label()))
    })?;
    let _description = tags.get("Description").ok_or_else(|| {
        IngestError::MalformedHeader(format!("{} {id} missing Description", namespace.label()))
    })?;

    let vcf_type = VcfType::parse(vcf_type_raw).ok_or_else(|| IngestError::InvalidFieldDeclaration {
        namespace: namespace.label(),
        id: id.clone(),
        reason: format!("unknown Type {vcf_type_raw:?}"),
    })?;
    let cardinality = Cardinality::parse(number).ok_or_else(|| IngestError::InvalidFieldDeclaration {
        namespace: namespace.label(),
        id: id.clone(),
        reason: format!("unparseable Number {number:?}"),
    })?;

    match (vcf_type, cardinality) {
        (VcfType::Flag, Cardinality::Fixed(0)) if matches!(namespace, Namespace::Info) => {}
        (VcfType::Flag, _) => {
            return Err(IngestError::InvalidFieldDeclaration {
                namespace: namespace.label(),
                id: id.clone(),
                reason: "Flag fields must be INFO with Number=0".into(),
            })
        }
        (_, Cardinality::Fixed(0)) => {
            return Err(IngestError::InvalidFieldDeclaration {
                namespace: namespace.label(),
                id: id.clone(),
                reason: "Number=0 is only valid for Type=Flag".into(),
            })
        }
        _ => {}
    }

    let storage_kind = derive_storage_kind(vcf_type, cardinality);
    let column_name = namer.assign(&format!("{}{}", namespace.column_prefix(), id));

    Ok(HeaderField {
        id,
        namespace,
        vcf_type,
        cardinality,
        description: tags.get("Description").cloned().unwrap_or_default(),
        column_name,
        storage_kind,
    })
}

pub(super) fn parse_header<R: BufRead>(reader: &mut R) -> Result<HeaderModel, IngestError> {
    let mut model = HeaderModel::default();
    let mut namer = ColumnNamer::new();
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Err(IngestError::MalformedHeader(
                "reached end of input before #CHROM column header line".into(),
            ));
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);

        if let Some(rest) = trimmed.strip_prefix("#CHROM") {
            // column header line: "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO[\tFORMAT\tsample...]"
            let cols: Vec<&str> = rest.split('\t').filter(|s| !s.is_empty()).collect();
            // cols here excludes the leading "#CHROM" token itself.
            let required = ["POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO"];
            for (i, want) in required.iter().enumerate() {
                if cols.get(i).copied() != Some(*want) {
                    return Err(IngestError::MalformedHeader(format!(
                        "column header line missing or misordered {want}"
                    )));
                }
            }
            if cols.len() > required.len() {
                if cols[required.len()] != "FORMAT" {
                    return Err(IngestError::MalformedHeader(
                        "column after INFO must be FORMAT".into(),
                    ));
                }
                model.sample_names = cols[required.len() + 1..]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
            }
            break;
        }

        if !trimmed.starts_with("##") {
            return Err(IngestError::MalformedHeader(format!(
                "expected meta-line or column header, got: {trimmed:?}"
            )));
        }

        let (key, value) = split_meta_line(trimmed).ok_or_else(|| {
            IngestError::MalformedHeader(format!("malformed meta-line: {trimmed:?}"))
        })?;

        match key {
            "INFO" | "FORMAT" => {
                let namespace = if key == "INFO" {
                    Namespace::Info
                } else {
                    Namespace::Format
                };
                let tags = parse_structured(value).ok_or_else(|| {
                    IngestError::MalformedHeader(format!("malformed {key} declaration: {value:?}"))
                })?;
                let field = build_field(namespace, &tags, &mut namer)?;
                let map = match namespace {
                    Namespace::Info => &mut model.info_fields,
                    Namespace::Format => &mut model.format_fields,
                };
                if map.contains_key(&field.id) {
                    tracing::warn!(id = %field.id, namespace = namespace.label(), "duplicate header field id, keeping first declaration");
                } else {
                    map.insert(field.id.clone(), field);
                }
            }
            "FILTER" => {
                let tags = parse_structured(value).ok_or_else(|| {
                    IngestError::MalformedHeader(format!("malformed FILTER declaration: {value:?}"))
                })?;
                let id = tags
                    .get("ID")
                    .ok_or_else(|| IngestError::MalformedHeader("FILTER missing ID".into()))?
                    .clone();
                let description = tags.get("Description").cloned().unwrap_or_default();
                model.filters.entry(id).or_insert(description);
            }
            "contig" => {
                let tags = parse_structured(value).ok_or_else(|| {
                    IngestError::MalformedHeader(format!("malformed contig declaration: {value:?}"))
                })?;
                let id = tags
                    .get("ID")
                    .ok_or_else(|| IngestError::MalformedHeader("contig missing ID".into()))?
                    .clone();
                let length = tags.get("length").and_then(|s| s.parse::<u64>().ok());
                model.contigs.entry(id).or_insert(length);
            }
            "fileformat" => {
                model.fileformat = Some(value.to_string());
            }
            _ => {
                model.other_meta.push((key.to_string(), value.to_string()));
            }
        }
    }

    if model.fileformat.is_none() {
        return Err(IngestError::MalformedHeader(
            "missing required ##fileformat meta-line".into(),
        ));
    }

    Ok(model)
}

/// Async counterpart of [`parse_header`]: reads lines from `reader` until
/// and including the `#CHROM` column header line, buffering only the header
/// text itself (never the record body), then hands the buffer to the same
/// synchronous tokenizer used by the sync path and by tests.
pub(super) async fn parse_header_async<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<HeaderModel, IngestError> {
    let mut buffer = String::new();
    loop {
        let before = buffer.len();
        let n = reader.read_line(&mut buffer).await?;
        if n == 0 {
            break; // EOF; let the sync parser report the missing-header error
        }
        if buffer[before..].trim_end_matches(['\n', '\r']).starts_with("#CHROM") {
            break;
        }
    }
    let mut cursor = std::io::Cursor::new(buffer.into_bytes());
    parse_header(&mut cursor)
}
