//! Missing-signal injection and column typing
//!
//! The injector owns the output schema: the ordered signal columns and the
//! dtype the registry declares for each. It turns row batches into typed
//! tables and guarantees every schema column exists, filling never-seen
//! signals with nulls of the declared dtype.
//!
//! Enumeration signals become categorical columns whose category list is
//! every label the registry declares for the signal, observed or not, so
//! tables decoded from different logs share identical categories.

use crate::config::DecoderConfig;
use crate::signals::SignalDatabase;
use crate::table::{Column, ColumnData, ColumnKind, ResultTable, RowBatch};
use crate::types::SignalValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Declared dtype of `name` according to the registry
///
/// Signals the registry does not know are `Float`.
pub fn column_kind(registry: &SignalDatabase, name: &str) -> ColumnKind {
    if let Some(labels) = registry.enum_labels(name) {
        return ColumnKind::Categorical(Arc::from(labels));
    }
    match registry.signal(name) {
        Some(def) if def.is_integral() => ColumnKind::Integer,
        _ => ColumnKind::Float,
    }
}

/// Signal columns a decode run produces, in output order
///
/// `expected_signals` wins when set; otherwise every registry signal,
/// narrowed by `signal_filter`.
pub fn output_signals(registry: &SignalDatabase, config: &DecoderConfig) -> Vec<String> {
    match &config.expected_signals {
        Some(expected) => expected.clone(),
        None => registry
            .signal_names()
            .into_iter()
            .filter(|name| {
                config
                    .signal_filter
                    .as_ref()
                    .map_or(true, |filter| filter.contains(*name))
            })
            .map(str::to_string)
            .collect(),
    }
}

/// Owns the typed output schema for one registry + signal set
#[derive(Debug, Clone)]
pub struct SignalInjector {
    schema: Vec<(String, ColumnKind)>,
    positions: HashMap<String, usize>,
    /// Label -> category code, per categorical schema column
    category_codes: Vec<Option<HashMap<String, u32>>>,
}

impl SignalInjector {
    /// Build the schema for `signals`, typing each from the registry
    pub fn new<S: AsRef<str>>(registry: &SignalDatabase, signals: &[S]) -> Self {
        let mut schema = Vec::with_capacity(signals.len());
        for name in signals {
            let name = name.as_ref();
            if !registry.contains_signal(name) {
                log::warn!(
                    "Expected signal '{}' is not defined in any DBC; it will be all nulls",
                    name
                );
            }
            schema.push((name.to_string(), column_kind(registry, name)));
        }

        let positions = schema
            .iter()
            .enumerate()
            .map(|(idx, (name, _))| (name.clone(), idx))
            .collect();

        let category_codes = schema
            .iter()
            .map(|(_, kind)| match kind {
                ColumnKind::Categorical(categories) => Some(
                    categories
                        .iter()
                        .enumerate()
                        .map(|(code, label)| (label.clone(), code as u32))
                        .collect(),
                ),
                _ => None,
            })
            .collect();

        Self {
            schema,
            positions,
            category_codes,
        }
    }

    /// Schema for a decode run configured by `config`
    pub fn for_config(registry: &SignalDatabase, config: &DecoderConfig) -> Self {
        Self::new(registry, &output_signals(registry, config))
    }

    /// Ordered (name, dtype) pairs
    pub fn schema(&self) -> &[(String, ColumnKind)] {
        &self.schema
    }

    pub fn signal_names(&self) -> Vec<&str> {
        self.schema.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Type the batch's observed schema columns
    ///
    /// Returns the table and the number of enumeration values that had no
    /// label in their category list (stored as null). Columns never seen in
    /// the batch are not created here; `inject` adds them.
    pub fn materialize(&self, batch: &RowBatch) -> (ResultTable, u64) {
        let len = batch.len();
        let mut observed: Vec<usize> = batch
            .columns
            .iter()
            .filter_map(|name| self.positions.get(name).copied())
            .collect();
        observed.sort_unstable();

        let mut data: Vec<Option<ColumnData>> = vec![None; self.schema.len()];
        for &idx in &observed {
            data[idx] = Some(ColumnData::nulls(&self.schema[idx].1, len));
        }

        let mut unlabelled = 0u64;
        let mut timestamp = Vec::with_capacity(len);
        for (row_idx, row) in batch.rows.iter().enumerate() {
            timestamp.push(row.timestamp);
            for signal in &row.signals {
                let Some(&idx) = self.positions.get(&signal.name) else {
                    continue;
                };
                let Some(column) = data[idx].as_mut() else {
                    continue;
                };
                match column {
                    ColumnData::Float(values) => values[row_idx] = signal.value.as_f64(),
                    ColumnData::Integer(values) => values[row_idx] = signal.value.as_i64(),
                    ColumnData::Categorical { codes, .. } => {
                        let code = match &signal.value {
                            SignalValue::Label(label) => self.category_codes[idx]
                                .as_ref()
                                .and_then(|lookup| lookup.get(label).copied()),
                            _ => None,
                        };
                        if code.is_none() {
                            unlabelled += 1;
                            log::debug!(
                                "Value {} of '{}' has no enumeration label; stored as null",
                                signal.value,
                                signal.name
                            );
                        }
                        codes[row_idx] = code;
                    }
                }
            }
        }

        let columns = data
            .into_iter()
            .zip(&self.schema)
            .filter_map(|(data, (name, _))| {
                data.map(|data| Column {
                    name: name.clone(),
                    data,
                })
            })
            .collect();

        let table = ResultTable {
            timestamp,
            raw_timestamp: None,
            columns,
            attributes: Arc::default(),
        };
        (table, unlabelled)
    }

    /// Guarantee every schema column exists, in schema order
    ///
    /// Missing columns are all-null with their declared dtype. Columns not in
    /// the schema are kept after the schema columns.
    pub fn inject(&self, table: &mut ResultTable) {
        let len = table.len();
        let mut existing: Vec<Column> = std::mem::take(&mut table.columns);

        let mut columns = Vec::with_capacity(self.schema.len());
        for (name, kind) in &self.schema {
            match existing.iter().position(|c| &c.name == name) {
                Some(pos) => columns.push(existing.remove(pos)),
                None => columns.push(Column {
                    name: name.clone(),
                    data: ColumnData::nulls(kind, len),
                }),
            }
        }
        columns.extend(existing);
        table.columns = columns;
    }

    /// An empty table with the full schema
    pub fn empty_table(&self) -> ResultTable {
        ResultTable::empty(&self.schema)
    }
}
