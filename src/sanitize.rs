//! Stable, lossless sanitization of VCF field identifiers into SQL column
//! names (spec §4.1).

use std::collections::HashSet;

/// Lowercase, replace every byte outside `[a-z0-9_]` with `_`.
///
/// This alone is not injective (`AF` and `af` collide, `A.B` and `A_B`
/// collide), so callers that need a frozen, collision-free projection
/// should go through [`ColumnNamer`] instead of calling this directly.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '_' {
            out.push(lower);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    // Column names can't start with a digit.
    if out.as_bytes()[0].is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

/// Assigns stable, unique column names for a frozen set of identifiers,
/// breaking collisions with a numeric suffix in first-seen order.
#[derive(Debug, Default)]
pub struct ColumnNamer {
    seen: HashSet<String>,
}

impl ColumnNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the column name to use for `raw` (already namespaced by the
    /// caller, e.g. `"info_"`/`"fmt_"` prefixed) and records it as taken.
    pub fn assign(&mut self, raw: &str) -> String {
        let base = sanitize_identifier(raw);
        if self.seen.insert(base.clone()) {
            return base;
        }
        let mut suffix = 2u32;
        loop {
            let candidate = format!("{base}_{suffix}");
            if self.seen.insert(candidate.clone()) {
                return candidate;
            }
            suffix += 1;
        }
    }
}
