//! Timestamp normalization
//!
//! Three optional steps, always applied in this order:
//!
//! 1. stable sort of rows by source timestamp
//! 2. uniform re-indexing (`timestamp = row_index * interval`), keeping the
//!    source timestamps in `raw_timestamp`
//! 3. linear interpolation of interior nulls in numeric columns
//!
//! When tables arrive as a stream the normalizer carries the running row
//! index between calls so uniform timestamps continue across batch
//! boundaries. Sorting and interpolation only see one batch at a time.

use crate::config::DecoderConfig;
use crate::table::{ColumnData, ResultTable};

#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    sort: bool,
    uniform_interval: Option<f64>,
    interpolate: bool,
    next_index: u64,
}

impl TimestampNormalizer {
    pub fn new(sort: bool, uniform_interval: Option<f64>, interpolate: bool) -> Self {
        Self {
            sort,
            uniform_interval,
            interpolate,
            next_index: 0,
        }
    }

    pub fn from_config(config: &DecoderConfig) -> Self {
        Self::new(
            config.sort_timestamps,
            config
                .force_uniform_timing
                .then_some(config.interval_seconds),
            config.interpolate_missing,
        )
    }

    /// Whether tables leave this normalizer with a `raw_timestamp` column
    pub fn reindexes(&self) -> bool {
        self.uniform_interval.is_some()
    }

    /// Normalize `table` in place
    pub fn apply(&mut self, table: &mut ResultTable) {
        if self.sort {
            sort_by_timestamp(table);
        }
        if let Some(interval) = self.uniform_interval {
            uniform_timing(table, self.next_index, interval);
            self.next_index += table.len() as u64;
        }
        if self.interpolate {
            interpolate_linear(table);
        }
    }
}

/// Stable sort of all rows by source timestamp
///
/// Uses `raw_timestamp` when the table was already re-indexed, so sorting
/// twice never reorders anything.
pub fn sort_by_timestamp(table: &mut ResultTable) {
    let keys = table.raw_timestamp.as_ref().unwrap_or(&table.timestamp);
    if keys.windows(2).all(|w| w[0] <= w[1]) {
        return;
    }
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| keys[a].total_cmp(&keys[b]));
    table.reorder_rows(&order);
}

/// Replace `timestamp` with `(start_index + i) * interval`
///
/// The original timestamps move to `raw_timestamp` unless the table
/// already has one.
pub fn uniform_timing(table: &mut ResultTable, start_index: u64, interval: f64) {
    let len = table.len();
    let uniform: Vec<f64> = (0..len)
        .map(|i| (start_index + i as u64) as f64 * interval)
        .collect();
    let source = std::mem::replace(&mut table.timestamp, uniform);
    if table.raw_timestamp.is_none() {
        table.raw_timestamp = Some(source);
    }
}

/// Fill interior nulls of float and integer columns by linear interpolation
/// over `timestamp`
///
/// Nulls before the first or after the last non-null sample stay null.
/// Integer columns are rounded back to integers. Categorical columns are
/// left alone.
pub fn interpolate_linear(table: &mut ResultTable) {
    let xs = table.timestamp.clone();
    for column in &mut table.columns {
        match &mut column.data {
            ColumnData::Float(values) => interpolate_column(&xs, values),
            ColumnData::Integer(values) => {
                let mut as_float: Vec<Option<f64>> =
                    values.iter().map(|v| v.map(|x| x as f64)).collect();
                interpolate_column(&xs, &mut as_float);
                for (slot, filled) in values.iter_mut().zip(as_float) {
                    if slot.is_none() {
                        *slot = filled.map(|x| x.round() as i64);
                    }
                }
            }
            ColumnData::Categorical { .. } => {}
        }
    }
}

fn interpolate_column(xs: &[f64], values: &mut [Option<f64>]) {
    let mut prev: Option<usize> = None;
    let mut idx = 0;
    while idx < values.len() {
        if values[idx].is_some() {
            prev = Some(idx);
            idx += 1;
            continue;
        }
        let Some(left) = prev else {
            idx += 1;
            continue;
        };
        let Some(right) = (idx..values.len()).find(|&j| values[j].is_some()) else {
            // Trailing gap
            return;
        };

        let (x0, x1) = (xs[left], xs[right]);
        let (y0, y1) = (values[left].unwrap_or_default(), values[right].unwrap_or_default());
        for gap in idx..right {
            values[gap] = Some(if x1 == x0 {
                y0
            } else {
                y0 + (y1 - y0) * (xs[gap] - x0) / (x1 - x0)
            });
        }
        prev = Some(right);
        idx = right + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, ColumnKind};
    use std::sync::Arc;

    fn table(timestamp: Vec<f64>, columns: Vec<(&str, ColumnData)>) -> ResultTable {
        ResultTable {
            timestamp,
            raw_timestamp: None,
            columns: columns
                .into_iter()
                .map(|(name, data)| Column {
                    name: name.to_string(),
                    data,
                })
                .collect(),
            attributes: Arc::default(),
        }
    }

    #[test]
    fn test_uniform_reindex_keeps_raw() {
        let mut t = table(vec![0.0, 0.05, 0.12], vec![]);
        let mut normalizer = TimestampNormalizer::new(false, Some(0.01), false);
        normalizer.apply(&mut t);

        assert_eq!(t.timestamp, vec![0.0, 0.01, 0.02]);
        assert_eq!(t.raw_timestamp, Some(vec![0.0, 0.05, 0.12]));
    }

    #[test]
    fn test_uniform_index_continues_across_batches() {
        let mut normalizer = TimestampNormalizer::new(false, Some(0.5), false);
        let mut first = table(vec![10.0, 11.0], vec![]);
        let mut second = table(vec![12.0], vec![]);
        normalizer.apply(&mut first);
        normalizer.apply(&mut second);

        assert_eq!(first.timestamp, vec![0.0, 0.5]);
        assert_eq!(second.timestamp, vec![1.0]);
    }

    #[test]
    fn test_stable_sort() {
        let mut t = table(
            vec![0.2, 0.1, 0.2, 0.0],
            vec![("A", ColumnData::Integer(vec![Some(1), Some(2), Some(3), Some(4)]))],
        );
        sort_by_timestamp(&mut t);
        assert_eq!(t.timestamp, vec![0.0, 0.1, 0.2, 0.2]);
        assert_eq!(
            t.columns[0].data,
            ColumnData::Integer(vec![Some(4), Some(2), Some(1), Some(3)])
        );
    }

    #[test]
    fn test_interpolation_fills_interior_only() {
        let mut t = table(
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            vec![
                (
                    "F",
                    ColumnData::Float(vec![None, Some(0.0), None, None, Some(3.0), None]),
                ),
                (
                    "I",
                    ColumnData::Integer(vec![Some(0), None, Some(3), None, None, None]),
                ),
            ],
        );
        interpolate_linear(&mut t);

        assert_eq!(
            t.columns[0].data,
            ColumnData::Float(vec![None, Some(0.0), Some(1.0), Some(2.0), Some(3.0), None])
        );
        assert_eq!(
            t.columns[1].data,
            ColumnData::Integer(vec![Some(0), Some(2), Some(3), None, None, None])
        );
    }

    #[test]
    fn test_interpolation_uses_timestamp_spacing() {
        let mut t = table(
            vec![0.0, 0.1, 0.4],
            vec![("F", ColumnData::Float(vec![Some(0.0), None, Some(4.0)]))],
        );
        interpolate_linear(&mut t);
        match &t.columns[0].data {
            ColumnData::Float(v) => assert!((v[1].unwrap() - 1.0).abs() < 1e-9),
            other => panic!("unexpected column {:?}", other),
        }
    }

    #[test]
    fn test_single_sample_and_categorical_untouched() {
        let categories: Arc<[String]> = Arc::from(vec!["Off".to_string(), "On".to_string()]);
        let mut t = table(
            vec![0.0, 1.0, 2.0],
            vec![
                ("F", ColumnData::Float(vec![None, Some(7.0), None])),
                (
                    "C",
                    ColumnData::Categorical {
                        categories: categories.clone(),
                        codes: vec![Some(0), None, Some(1)],
                    },
                ),
            ],
        );
        let before = t.clone();
        interpolate_linear(&mut t);
        assert_eq!(t, before);
        assert_eq!(t.columns[1].data.kind(), ColumnKind::Categorical(categories));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut t = table(
            vec![0.3, 0.1, 0.2],
            vec![("F", ColumnData::Float(vec![Some(3.0), None, Some(2.0)]))],
        );
        TimestampNormalizer::new(true, Some(0.01), true).apply(&mut t);
        let once = t.clone();
        TimestampNormalizer::new(true, Some(0.01), true).apply(&mut t);
        assert_eq!(t, once);
    }
}
