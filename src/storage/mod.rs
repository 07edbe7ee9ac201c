mod arrow;
mod core;
mod csv;
mod memory;
mod value;

pub use csv::CsvSink;
pub use memory::{Column, MemorySink, Table};
pub use value::{ItemType, Value};

pub use self::core::{Namespace, NullSink, ResultSink};
