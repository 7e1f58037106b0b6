//! Row batches and the columnar result table
//!
//! A `RowBatch` is what the chunked reader yields: decoded rows in source
//! order plus the union of the signal names they carry. A `ResultTable` is
//! the typed, column-oriented form every later stage works on.

use crate::metadata::SignalAttributes;
use crate::types::{DecodedRow, DecoderError, Result};
use std::sync::Arc;

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const RAW_TIMESTAMP_COLUMN: &str = "raw_timestamp";

/// Ordered decoded rows sharing one column set; the unit of streaming
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    pub rows: Vec<DecodedRow>,
    /// Signal names seen in this batch, in first-seen order
    pub columns: Vec<String>,
}

impl RowBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            columns: Vec::new(),
        }
    }

    pub fn push(&mut self, row: DecodedRow) {
        for signal in &row.signals {
            if !self.columns.iter().any(|c| c == &signal.name) {
                self.columns.push(signal.name.clone());
            }
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Declared dtype of a signal column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    Float,
    Integer,
    /// Fixed category list, derived from the registry
    Categorical(Arc<[String]>),
}

/// Typed column storage; `None` is a null cell
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<Option<f64>>),
    Integer(Vec<Option<i64>>),
    Categorical {
        categories: Arc<[String]>,
        codes: Vec<Option<u32>>,
    },
}

impl ColumnData {
    /// An all-null column of `len` rows with the given dtype
    pub fn nulls(kind: &ColumnKind, len: usize) -> Self {
        match kind {
            ColumnKind::Float => ColumnData::Float(vec![None; len]),
            ColumnKind::Integer => ColumnData::Integer(vec![None; len]),
            ColumnKind::Categorical(categories) => ColumnData::Categorical {
                categories: categories.clone(),
                codes: vec![None; len],
            },
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Float(_) => ColumnKind::Float,
            ColumnData::Integer(_) => ColumnKind::Integer,
            ColumnData::Categorical { categories, .. } => ColumnKind::Categorical(categories.clone()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Integer(v) => v.len(),
            ColumnData::Categorical { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn null_count(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Integer(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Categorical { codes, .. } => codes.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Rendered cell value, `None` for null
    pub fn cell(&self, row: usize) -> Option<String> {
        match self {
            ColumnData::Float(v) => v.get(row).copied().flatten().map(|x| x.to_string()),
            ColumnData::Integer(v) => v.get(row).copied().flatten().map(|x| x.to_string()),
            ColumnData::Categorical { categories, codes } => codes
                .get(row)
                .copied()
                .flatten()
                .and_then(|code| categories.get(code as usize).cloned()),
        }
    }

    fn reorder(&mut self, order: &[usize]) {
        match self {
            ColumnData::Float(v) => *v = order.iter().map(|&i| v[i]).collect(),
            ColumnData::Integer(v) => *v = order.iter().map(|&i| v[i]).collect(),
            ColumnData::Categorical { codes, .. } => {
                *codes = order.iter().map(|&i| codes[i]).collect()
            }
        }
    }

    fn extend_from(&mut self, other: &ColumnData) -> bool {
        match (self, other) {
            (ColumnData::Float(a), ColumnData::Float(b)) => a.extend_from_slice(b),
            (ColumnData::Integer(a), ColumnData::Integer(b)) => a.extend_from_slice(b),
            (
                ColumnData::Categorical { categories: ca, codes: a },
                ColumnData::Categorical { categories: cb, codes: b },
            ) if ca == cb => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }
}

/// A named signal column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Materialized, time-aligned decode output
///
/// Column order is `timestamp`, the signal columns, then `raw_timestamp`
/// when uniform timing was applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    pub timestamp: Vec<f64>,
    pub raw_timestamp: Option<Vec<f64>>,
    pub columns: Vec<Column>,
    /// Side-channel signal metadata, attached once and shared between batches
    pub attributes: Arc<SignalAttributes>,
}

impl ResultTable {
    /// An empty table with the given signal columns
    pub fn empty(schema: &[(String, ColumnKind)]) -> Self {
        Self {
            timestamp: Vec::new(),
            raw_timestamp: None,
            columns: schema
                .iter()
                .map(|(name, kind)| Column {
                    name: name.clone(),
                    data: ColumnData::nulls(kind, 0),
                })
                .collect(),
            attributes: Arc::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Signal column names, in order
    pub fn signal_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Every output column name, in output order
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.columns.len() + 2);
        names.push(TIMESTAMP_COLUMN.to_string());
        names.extend(self.columns.iter().map(|c| c.name.clone()));
        if self.raw_timestamp.is_some() {
            names.push(RAW_TIMESTAMP_COLUMN.to_string());
        }
        names
    }

    /// Rendered cells of one row in `column_names()` order; nulls are `None`
    pub fn row_cells(&self, row: usize) -> Vec<Option<String>> {
        let mut cells = Vec::with_capacity(self.columns.len() + 2);
        cells.push(self.timestamp.get(row).map(|t| t.to_string()));
        cells.extend(self.columns.iter().map(|c| c.data.cell(row)));
        if let Some(raw) = &self.raw_timestamp {
            cells.push(raw.get(row).map(|t| t.to_string()));
        }
        cells
    }

    /// Apply a row permutation to every column
    pub fn reorder_rows(&mut self, order: &[usize]) {
        self.timestamp = order.iter().map(|&i| self.timestamp[i]).collect();
        if let Some(raw) = self.raw_timestamp.as_mut() {
            *raw = order.iter().map(|&i| raw[i]).collect();
        }
        for column in &mut self.columns {
            column.data.reorder(order);
        }
    }

    /// Append another table with the same schema
    pub fn append(&mut self, other: &ResultTable) -> Result<()> {
        let mismatch = || DecoderError::SchemaMismatch {
            existing: self.column_names(),
            incoming: other.column_names(),
        };
        if self.column_names() != other.column_names() {
            return Err(mismatch());
        }
        for (mine, theirs) in self.columns.iter().zip(&other.columns) {
            if mine.data.kind() != theirs.data.kind() {
                return Err(mismatch());
            }
        }

        for (mine, theirs) in self.columns.iter_mut().zip(&other.columns) {
            mine.data.extend_from(&theirs.data);
        }
        self.timestamp.extend_from_slice(&other.timestamp);
        if let (Some(mine), Some(theirs)) = (self.raw_timestamp.as_mut(), other.raw_timestamp.as_ref()) {
            mine.extend_from_slice(theirs);
        }
        if self.attributes.is_empty() {
            self.attributes = other.attributes.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecodedSignal, SignalValue};

    fn row(ts: f64, signals: &[(&str, i64)]) -> DecodedRow {
        DecodedRow {
            timestamp: ts,
            can_id: 1,
            multiplexer_value: None,
            signals: signals
                .iter()
                .map(|(name, v)| DecodedSignal {
                    name: name.to_string(),
                    value: SignalValue::Integer(*v),
                    raw_value: *v,
                })
                .collect(),
        }
    }

    #[test]
    fn test_batch_column_union_keeps_first_seen_order() {
        let mut batch = RowBatch::default();
        batch.push(row(0.0, &[("B", 1)]));
        batch.push(row(0.1, &[("A", 2), ("B", 3)]));
        assert_eq!(batch.columns, vec!["B".to_string(), "A".to_string()]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_cells_and_column_names() {
        let categories: Arc<[String]> = Arc::from(vec!["Off".to_string(), "On".to_string()]);
        let table = ResultTable {
            timestamp: vec![0.0, 0.5],
            raw_timestamp: Some(vec![1.25, 1.75]),
            columns: vec![
                Column {
                    name: "Speed".into(),
                    data: ColumnData::Float(vec![Some(1.5), None]),
                },
                Column {
                    name: "Switch".into(),
                    data: ColumnData::Categorical {
                        categories,
                        codes: vec![None, Some(1)],
                    },
                },
            ],
            attributes: Arc::default(),
        };

        assert_eq!(
            table.column_names(),
            vec!["timestamp", "Speed", "Switch", "raw_timestamp"]
        );
        assert_eq!(
            table.row_cells(1),
            vec![Some("0.5".into()), None, Some("On".into()), Some("1.75".into())]
        );
    }

    #[test]
    fn test_reorder_and_append() {
        let mut table = ResultTable::empty(&[("X".to_string(), ColumnKind::Integer)]);
        table.timestamp = vec![2.0, 1.0];
        table.columns[0].data = ColumnData::Integer(vec![Some(20), Some(10)]);
        table.reorder_rows(&[1, 0]);
        assert_eq!(table.timestamp, vec![1.0, 2.0]);
        assert_eq!(table.columns[0].data, ColumnData::Integer(vec![Some(10), Some(20)]));

        let other = table.clone();
        table.append(&other).unwrap();
        assert_eq!(table.len(), 4);

        let wrong = ResultTable::empty(&[("Y".to_string(), ColumnKind::Integer)]);
        assert!(matches!(table.append(&wrong), Err(DecoderError::SchemaMismatch { .. })));
    }
}
