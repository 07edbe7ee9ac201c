use std::fmt;

/// The type of a column in a result table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    U64,
    I64,
    F64,
    Bool,
    String,
}

/// A single cell of a result table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
}

impl Value {
    pub fn item_type(&self) -> ItemType {
        match self {
            Value::U64(_) => ItemType::U64,
            Value::I64(_) => ItemType::I64,
            Value::F64(_) => ItemType::F64,
            Value::Bool(_) => ItemType::Bool,
            Value::String(_) => ItemType::String,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::U64(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            Value::Bool(_) | Value::String(_) => None,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemType::U64 => "u64",
            ItemType::I64 => "i64",
            ItemType::F64 => "f64",
            ItemType::Bool => "bool",
            ItemType::String => "string",
        };
        f.write_str(name)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::U64(value)
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}
impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::I64(value as i64)
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}
