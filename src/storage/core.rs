use std::fmt;

use anyhow::Result;

use super::Value;

/// The area of the results a table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Top level summaries such as the log normalization estimate.
    Root,
    /// Draws and their log densities.
    Samples,
    /// Diagnostics recorded while an engine runs.
    Monitoring,
}

impl Namespace {
    /// Directory name of the namespace relative to the results root.
    pub fn dir_name(&self) -> Option<&'static str> {
        match self {
            Namespace::Root => None,
            Namespace::Samples => Some("samples"),
            Namespace::Monitoring => Some("monitoring"),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name().unwrap_or("root"))
    }
}

/// Append-only writer for tidy result tables.
///
/// Rows are lists of `(column, value)` pairs. The first row written to a
/// table fixes its columns; every later row must name the same columns in
/// the same order.
pub trait ResultSink: Send {
    /// Append one row to `table` in `namespace`.
    fn write(&mut self, namespace: Namespace, table: &str, row: Vec<(&str, Value)>) -> Result<()>;

    /// Flush any buffered rows.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: ResultSink + ?Sized> ResultSink for &mut S {
    fn write(&mut self, namespace: Namespace, table: &str, row: Vec<(&str, Value)>) -> Result<()> {
        (**self).write(namespace, table, row)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// A sink that drops every row.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn write(&mut self, _namespace: Namespace, _table: &str, _row: Vec<(&str, Value)>) -> Result<()> {
        Ok(())
    }
}
