//! BatchBuffer: accumulates rows up to a configured threshold, then seals
//! them into an immutable [`BatchHandle`] (spec §4.6).

use crate::rowbuild::TableRow;

/// Lifecycle state of one batch, as it travels from accumulation through
/// the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Filling,
    Sealed,
    Encoding,
    Flushed,
    Failed,
}

/// An immutable, sealed sequence of rows plus the bookkeeping needed to
/// resume a load that failed partway through (spec §4.6, §4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchHandle {
    pub id: uuid::Uuid,
    pub rows: Vec<TableRow>,
    /// Record-body line numbers covered by this batch, for resume.
    pub source_offset_start: u64,
    pub source_offset_end: u64,
    pub state: BatchState,
}

impl BatchHandle {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rough wire-size estimate used by the byte-budget flush trigger:
    /// sums the length of every string/array payload field, ignoring
    /// per-field framing overhead (good enough for a soft threshold).
    pub fn approx_byte_size(&self) -> usize {
        self.rows
            .iter()
            .map(|row| {
                row.chrom.len()
                    + row.reference.len()
                    + row.alt.len()
                    + row.id.as_ref().map(|s| s.len()).unwrap_or(0)
                    + row.fingerprint.len()
                    + 64 // fixed-width columns: pos, alt_index, qual, range, audit id, flags
            })
            .sum()
    }
}

/// Accumulates [`TableRow`]s for one shard until a row-count or byte-budget
/// threshold is crossed, then seals them. Row-count flush is required;
/// byte-budget flush is an additional, optional trigger.
pub struct BatchBuffer {
    pending: Vec<TableRow>,
    batch_size: usize,
    byte_budget: Option<usize>,
    source_offset_start: u64,
    next_source_offset: u64,
}

impl BatchBuffer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(batch_size),
            batch_size,
            byte_budget: None,
            source_offset_start: 0,
            next_source_offset: 0,
        }
    }

    pub fn with_byte_budget(mut self, bytes: usize) -> Self {
        self.byte_budget = Some(bytes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Adds one row, tracking its source line number for resume bookkeeping.
    /// Returns a sealed batch if the threshold was crossed by this push.
    pub fn push(&mut self, row: TableRow, source_line_no: u64) -> Option<BatchHandle> {
        if self.pending.is_empty() {
            self.source_offset_start = source_line_no;
        }
        self.next_source_offset = source_line_no;
        self.pending.push(row);

        let over_row_threshold = self.pending.len() >= self.batch_size;
        let over_byte_threshold = self
            .byte_budget
            .map(|budget| self.approx_pending_bytes() >= budget)
            .unwrap_or(false);

        if over_row_threshold || over_byte_threshold {
            Some(self.seal())
        } else {
            None
        }
    }

    fn approx_pending_bytes(&self) -> usize {
        self.pending
            .iter()
            .map(|row| row.chrom.len() + row.reference.len() + row.alt.len() + 64)
            .sum()
    }

    /// Seals whatever rows are currently pending, even below threshold —
    /// used to flush a partial batch at end-of-stream.
    pub fn seal(&mut self) -> BatchHandle {
        let rows = std::mem::take(&mut self.pending);
        BatchHandle {
            id: uuid::Uuid::new_v4(),
            source_offset_start: self.source_offset_start,
            source_offset_end: self.next_source_offset,
            rows,
            state: BatchState::Sealed,
        }
    }
}
