use std::collections::HashMap;

use anyhow::{bail, Result};

use super::{ItemType, Namespace, ResultSink, Value};

/// Column-wise storage for the values of one column
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    F64(Vec<f64>),
    Bool(Vec<bool>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    String(Vec<String>),
}

impl Column {
    /// Create a new empty column of the specified type
    fn new(item_type: ItemType) -> Self {
        match item_type {
            ItemType::F64 => Column::F64(Vec::new()),
            ItemType::Bool => Column::Bool(Vec::new()),
            ItemType::I64 => Column::I64(Vec::new()),
            ItemType::U64 => Column::U64(Vec::new()),
            ItemType::String => Column::String(Vec::new()),
        }
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            Column::F64(_) => ItemType::F64,
            Column::Bool(_) => ItemType::Bool,
            Column::I64(_) => ItemType::I64,
            Column::U64(_) => ItemType::U64,
            Column::String(_) => ItemType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::F64(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::I64(v) => v.len(),
            Column::U64(v) => v.len(),
            Column::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a value to the internal vector
    fn push(&mut self, value: Value) -> Result<()> {
        match (self, value) {
            (Column::F64(vec), Value::F64(v)) => vec.push(v),
            (Column::Bool(vec), Value::Bool(v)) => vec.push(v),
            (Column::I64(vec), Value::I64(v)) => vec.push(v),
            (Column::U64(vec), Value::U64(v)) => vec.push(v),
            (Column::String(vec), Value::String(v)) => vec.push(v),
            (column, value) => bail!(
                "Mismatched item type: column holds {} but got {}",
                column.item_type(),
                value.item_type()
            ),
        }
        Ok(())
    }

    /// The values of a numeric column as f64.
    pub fn as_f64(&self) -> Option<Vec<f64>> {
        match self {
            Column::F64(v) => Some(v.clone()),
            Column::I64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Column::U64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Column::Bool(_) | Column::String(_) => None,
        }
    }
}

/// One tidy table held in memory
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    columns: Vec<(String, Column)>,
    n_rows: usize,
}

impl Table {
    fn append(&mut self, row: Vec<(&str, Value)>) -> Result<()> {
        if self.n_rows == 0 && self.columns.is_empty() {
            self.columns = row
                .iter()
                .map(|(name, value)| (name.to_string(), Column::new(value.item_type())))
                .collect();
        }
        if row.len() != self.columns.len() {
            bail!(
                "Row has {} columns but the table has {}",
                row.len(),
                self.columns.len()
            );
        }
        // Check the whole row first so a bad row leaves the table untouched.
        for ((name, value), (column_name, column)) in row.iter().zip(self.columns.iter()) {
            if *name != column_name.as_str() {
                bail!("Unexpected column {}, expected {}", name, column_name);
            }
            if value.item_type() != column.item_type() {
                bail!(
                    "Mismatched item type in column {}: expected {} but got {}",
                    name,
                    column.item_type(),
                    value.item_type()
                );
            }
        }
        for ((_, value), (_, column)) in row.into_iter().zip(self.columns.iter_mut()) {
            column.push(value)?;
        }
        self.n_rows += 1;
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn columns(&self) -> &[(String, Column)] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(column_name, _)| column_name == name)
            .map(|(_, column)| column)
    }
}

/// Keeps every table in memory. Mostly useful for tests and for handing
/// results on to Arrow.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    tables: HashMap<(Namespace, String), Table>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, namespace: Namespace, name: &str) -> Option<&Table> {
        self.tables.get(&(namespace, name.to_string()))
    }

    /// Number of rows written to a table, zero if it was never written to.
    pub fn n_rows(&self, namespace: Namespace, name: &str) -> usize {
        self.table(namespace, name).map_or(0, Table::n_rows)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = (Namespace, &str, &Table)> {
        self.tables
            .iter()
            .map(|((namespace, name), table)| (*namespace, name.as_str(), table))
    }
}

impl ResultSink for MemorySink {
    fn write(&mut self, namespace: Namespace, table: &str, row: Vec<(&str, Value)>) -> Result<()> {
        self.tables
            .entry((namespace, table.to_string()))
            .or_default()
            .append(row)
    }
}
