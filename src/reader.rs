//! RecordReader: a lazy, finite, restartable sequence of [`RawRecord`]s
//! (spec §4.2).

use bytes::Bytes;
use indexmap::IndexMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{IngestError, IngestReport, RecordIssue};

const REQUIRED_COLUMNS: usize = 8;

/// One VCF data line, tokenized but not type-coerced. Owns its byte storage
/// for the duration of one pipeline stage (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub chrom: Bytes,
    pub pos: i64,
    pub id: Option<Bytes>,
    pub reference: Bytes,
    pub alts: Vec<Bytes>,
    pub qual: Option<f64>,
    pub filter: Vec<String>,
    /// INFO field id -> raw token; `None` marks a bare Flag key (no `=value`).
    pub info: IndexMap<String, Option<Bytes>>,
    pub format_keys: Vec<String>,
    /// `sample_values[sample_idx][format_key_idx]`.
    pub sample_values: Vec<Vec<Option<Bytes>>>,
    /// 1-based line number in the record body, for diagnostics/resume.
    pub line_no: u64,
}

impl RawRecord {
    pub fn alt_count(&self) -> usize {
        self.alts.len()
    }
}

fn split_tab(line: &str) -> Vec<&str> {
    line.split('\t').collect()
}

fn token_or_missing(tok: &str) -> Option<Bytes> {
    if tok == "." {
        None
    } else {
        Some(Bytes::copy_from_slice(tok.as_bytes()))
    }
}

fn parse_info(tok: &str) -> IndexMap<String, Option<Bytes>> {
    let mut out = IndexMap::new();
    if tok == "." || tok.is_empty() {
        return out;
    }
    for entry in tok.split(';') {
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('=') {
            Some((k, v)) => {
                out.insert(k.to_string(), Some(Bytes::copy_from_slice(v.as_bytes())));
            }
            None => {
                out.insert(entry.to_string(), None);
            }
        }
    }
    out
}

fn parse_filter(tok: &str) -> Vec<String> {
    if tok == "." || tok.is_empty() {
        Vec::new()
    } else {
        tok.split(';').map(|s| s.to_string()).collect()
    }
}

fn parse_line(line: &str, line_no: u64) -> Result<RawRecord, RecordIssue> {
    let cols = split_tab(line);
    if cols.len() < REQUIRED_COLUMNS {
        return Err(RecordIssue::MalformedRecord { line_no });
    }
    let pos: i64 = cols[1]
        .parse()
        .map_err(|_| RecordIssue::MalformedRecord { line_no })?;
    if cols[4] == "." {
        // Non-variant / reference-only site: outside the scope of this
        // variant-ingest pipeline.
        return Err(RecordIssue::MalformedRecord { line_no });
    }
    let alts: Vec<Bytes> = cols[4]
        .split(',')
        .map(|s| Bytes::copy_from_slice(s.as_bytes()))
        .collect();
    let qual = if cols[5] == "." {
        None
    } else {
        cols[5].parse::<f64>().ok()
    };

    let format_keys: Vec<String> = if cols.len() > REQUIRED_COLUMNS {
        cols[REQUIRED_COLUMNS]
            .split(':')
            .map(|s| s.to_string())
            .collect()
    } else {
        Vec::new()
    };

    let sample_values: Vec<Vec<Option<Bytes>>> = if cols.len() > REQUIRED_COLUMNS {
        cols[REQUIRED_COLUMNS + 1..]
            .iter()
            .map(|sample_tok| {
                let parts: Vec<&str> = sample_tok.split(':').collect();
                (0..format_keys.len())
                    .map(|i| parts.get(i).map(|p| token_or_missing(p)).unwrap_or(None))
                    .collect()
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(RawRecord {
        chrom: Bytes::copy_from_slice(cols[0].as_bytes()),
        pos,
        id: token_or_missing(cols[2]),
        reference: Bytes::copy_from_slice(cols[3].as_bytes()),
        alts,
        qual,
        filter: parse_filter(cols[6]),
        info: parse_info(cols[7]),
        format_keys,
        sample_values,
        line_no,
    })
}

/// Lazy sequence of [`RawRecord`]s over an async byte stream. The `FORMAT`
/// column and sample columns are tokenized but not type-coerced; that
/// happens in [`crate::decompose`] using the frozen [`crate::header::HeaderModel`].
pub struct RecordReader<R> {
    reader: R,
    next_line_no: u64,
    line_buf: String,
    /// Accumulates `MalformedRecord` issues for lines skipped under the
    /// default skip-and-count policy (spec §7).
    pub report: IngestReport,
}

impl<R: AsyncBufRead + Unpin> RecordReader<R> {
    /// `reader` must already be positioned just past the `#CHROM` header
    /// line (see [`crate::header::HeaderModel::parse_async`]).
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            next_line_no: 1,
            line_buf: String::new(),
            report: IngestReport::default(),
        }
    }

    /// Returns the next well-formed record, skipping (and counting) any
    /// malformed lines along the way. `Ok(None)` means the stream is
    /// exhausted.
    pub async fn next_record(&mut self) -> Result<Option<RawRecord>, IngestError> {
        loop {
            self.line_buf.clear();
            let n = self
                .reader
                .read_line(&mut self.line_buf)
                .await
                .map_err(IngestError::Io)?;
            if n == 0 {
                return Ok(None);
            }
            let line_no = self.next_line_no;
            self.next_line_no += 1;
            let trimmed = self.line_buf.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            match parse_line(trimmed, line_no) {
                Ok(record) => return Ok(Some(record)),
                Err(issue) => {
                    self.report.record(issue);
                    continue;
                }
            }
        }
    }
}
