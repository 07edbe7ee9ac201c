use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};

use super::{Column, ItemType, Table};

fn item_type_to_arrow_type(item_type: ItemType) -> DataType {
    match item_type {
        ItemType::F64 => DataType::Float64,
        ItemType::Bool => DataType::Boolean,
        ItemType::I64 => DataType::Int64,
        ItemType::U64 => DataType::UInt64,
        ItemType::String => DataType::Utf8,
    }
}

fn column_to_array(column: &Column) -> ArrayRef {
    match column {
        Column::F64(values) => Arc::new(Float64Array::from(values.clone())),
        Column::Bool(values) => Arc::new(BooleanArray::from(values.clone())),
        Column::I64(values) => Arc::new(Int64Array::from(values.clone())),
        Column::U64(values) => Arc::new(UInt64Array::from(values.clone())),
        Column::String(values) => Arc::new(StringArray::from(values.clone())),
    }
}

impl Table {
    /// Convert the table into an Arrow record batch with one non-nullable
    /// field per column.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let fields: Vec<Field> = self
            .columns()
            .iter()
            .map(|(name, column)| {
                Field::new(name.as_str(), item_type_to_arrow_type(column.item_type()), false)
            })
            .collect();
        let arrays: Vec<ArrayRef> = self
            .columns()
            .iter()
            .map(|(_, column)| column_to_array(column))
            .collect();
        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .context("Could not assemble record batch")
    }
}
