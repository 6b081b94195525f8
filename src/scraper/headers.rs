//! Dynamic header-to-field mapping.
//!
//! HKJC table layouts drift between page renders: column order changes,
//! columns appear and disappear, and header spellings vary. Every parser
//! therefore resolves columns through a [`HeaderMapper`] instead of
//! positional access. Unknown headers are discarded rather than treated
//! as errors so pages that add columns keep parsing.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::{Result, ScrapeError};

/// Normalize header text before comparison: full-width and repeated
/// whitespace collapsed, ASCII case folded.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Maps literal column headers to canonical fields for one table.
///
/// `F` is a parser-owned canonical field enum. Each field carries the
/// header spellings that may denote it on a live page.
pub struct HeaderMapper<F> {
    specs: Vec<(F, &'static [&'static str])>,
}

/// Column-index lookup produced by [`HeaderMapper::map_columns`] for a
/// single page render.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap<F> {
    columns: HashMap<F, usize>,
}

impl<F: Copy + Eq + Hash> ColumnMap<F> {
    pub fn get(&self, field: F) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// Cell text for a field, or empty string when the column is absent
    /// from this page render or the row is short.
    pub fn cell<'a>(&self, cells: &'a [String], field: F) -> &'a str {
        self.get(field)
            .and_then(|idx| cells.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Number of canonical fields mapped for this render.
    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

impl<F: Copy + Eq + Hash + std::fmt::Debug> HeaderMapper<F> {
    pub fn new(specs: Vec<(F, &'static [&'static str])>) -> Self {
        Self { specs }
    }

    fn match_field(&self, header: &str) -> Option<F> {
        let normalized = normalize(header);
        if normalized.is_empty() {
            return None;
        }
        for (field, aliases) in &self.specs {
            if aliases.iter().any(|alias| normalize(alias) == normalized) {
                return Some(*field);
            }
        }
        None
    }

    /// Map literal header cells to column indices.
    ///
    /// Unknown headers are skipped. A canonical field matched by two
    /// different columns means the page cannot be parsed reliably and
    /// is an [`ScrapeError::AmbiguousHeader`].
    pub fn map_columns(&self, headers: &[String]) -> Result<ColumnMap<F>> {
        let mut columns: HashMap<F, usize> = HashMap::new();
        for (index, header) in headers.iter().enumerate() {
            let Some(field) = self.match_field(header) else {
                continue;
            };
            if let Some(&first) = columns.get(&field) {
                return Err(ScrapeError::AmbiguousHeader {
                    header: normalize(header),
                    first,
                    second: index,
                });
            }
            columns.insert(field, index);
        }
        Ok(ColumnMap { columns })
    }
}
