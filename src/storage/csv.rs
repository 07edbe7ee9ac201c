//! CSV result sink writing one file per table.
//!
//! Tables of the root namespace land directly in the output directory,
//! the others in `samples/` and `monitoring/` subdirectories:
//!
//! ```text
//! out/logNormEstimate.csv
//! out/samples/samples.csv
//! out/samples/logDensity.csv
//! out/monitoring/propagation.csv
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use super::{Namespace, ResultSink, Value};

/// Writes tidy tables as CSV files below a results directory.
pub struct CsvSink {
    output_dir: PathBuf,
    /// Number of decimal places for floating point values
    precision: Option<usize>,
    tables: HashMap<(Namespace, String), CsvTable>,
}

struct CsvTable {
    writer: BufWriter<File>,
    columns: Vec<String>,
}

impl CsvSink {
    /// Create a sink writing below `output_dir`. Directories are created
    /// lazily with the first row of a table.
    ///
    /// # Example
    ///
    /// ```rust
    /// use anneal_rs::CsvSink;
    /// let sink = CsvSink::new("results").with_precision(8);
    /// ```
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            precision: None,
            tables: HashMap::new(),
        }
    }

    /// Write floats with a fixed number of decimal places instead of the
    /// shortest representation that round-trips.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Path of the file backing a table.
    pub fn table_path(&self, namespace: Namespace, table: &str) -> PathBuf {
        let dir = match namespace.dir_name() {
            Some(sub) => self.output_dir.join(sub),
            None => self.output_dir.clone(),
        };
        dir.join(format!("{}.csv", table))
    }

    fn open_table(&self, namespace: Namespace, table: &str, columns: Vec<String>) -> Result<CsvTable> {
        let path = self.table_path(namespace, table);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory: {:?}", dir))?;
        }
        let file =
            File::create(&path).with_context(|| format!("Failed to create CSV file: {:?}", path))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", columns.join(","))?;
        Ok(CsvTable { writer, columns })
    }

    fn format_value(&self, value: &Value) -> String {
        match value {
            Value::F64(v) => {
                if v.is_nan() {
                    "NA".to_string()
                } else if v.is_infinite() {
                    if *v > 0.0 { "Inf" } else { "-Inf" }.to_string()
                } else if let Some(prec) = self.precision {
                    format!("{:.prec$}", v, prec = prec)
                } else {
                    v.to_string()
                }
            }
            Value::U64(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::Bool(v) => if *v { "true" } else { "false" }.to_string(),
            Value::String(v) => {
                if v.contains([',', '"', '\n']) {
                    format!("\"{}\"", v.replace('"', "\"\""))
                } else {
                    v.clone()
                }
            }
        }
    }
}

impl ResultSink for CsvSink {
    fn write(&mut self, namespace: Namespace, table: &str, row: Vec<(&str, Value)>) -> Result<()> {
        let key = (namespace, table.to_string());
        if !self.tables.contains_key(&key) {
            let columns = row.iter().map(|(name, _)| name.to_string()).collect();
            let csv_table = self.open_table(namespace, table, columns)?;
            self.tables.insert(key.clone(), csv_table);
        }

        let line = row
            .iter()
            .map(|(_, value)| self.format_value(value))
            .collect::<Vec<_>>()
            .join(",");

        let Some(csv_table) = self.tables.get_mut(&key) else {
            bail!("CSV table {} vanished", table);
        };
        let names_match = row.len() == csv_table.columns.len()
            && row
                .iter()
                .zip(csv_table.columns.iter())
                .all(|((name, _), column)| *name == column.as_str());
        if !names_match {
            bail!(
                "Row columns do not match the header of table {}/{}",
                namespace,
                table
            );
        }
        writeln!(csv_table.writer, "{}", line)
            .with_context(|| format!("Failed to write to table {}/{}", namespace, table))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for ((namespace, table), csv_table) in self.tables.iter_mut() {
            csv_table
                .writer
                .flush()
                .with_context(|| format!("Failed to flush table {}/{}", namespace, table))?;
        }
        Ok(())
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
