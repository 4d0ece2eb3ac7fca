use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use common::{Error, Result};
use std::sync::Arc;

/// Columns of the joined price/fundamentals table: every price column,
/// followed by the requested fundamentals columns.
pub fn price_fund_schema(price: &Schema, fund: &Schema, fund_columns: &[String]) -> Result<Schema> {
    let mut fields: Vec<Field> = price.fields().iter().map(|f| f.as_ref().clone()).collect();

    for name in fund_columns {
        if price.field_with_name(name).is_ok() {
            return Err(Error::SchemaMismatch(format!(
                "Fundamentals column '{}' already exists in the price schema",
                name
            )));
        }
        let field = fund.field_with_name(name).map_err(|_| {
            Error::SchemaMismatch(format!("Fundamentals schema has no column '{}'", name))
        })?;
        fields.push(field.clone());
    }

    Ok(Schema::new(fields))
}

/// String encodings are interchangeable; everything else must match exactly.
pub fn types_compatible(expected: &DataType, actual: &DataType) -> bool {
    let is_string = |t: &DataType| matches!(t, DataType::Utf8 | DataType::Utf8View | DataType::LargeUtf8);
    expected == actual || (is_string(expected) && is_string(actual))
}

/// Rewrites `batch` against the table schema, casting compatible columns.
pub fn conform_batch(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    if batch.schema() == *schema {
        return Ok(batch.clone());
    }

    let batch_schema = batch.schema();
    if batch_schema.fields().len() != schema.fields().len() {
        return Err(Error::SchemaMismatch(format!(
            "Expected {} columns, found {}",
            schema.fields().len(),
            batch_schema.fields().len()
        )));
    }

    let mut columns = Vec::with_capacity(batch.num_columns());
    for ((expected, actual), column) in schema
        .fields()
        .iter()
        .zip(batch_schema.fields().iter())
        .zip(batch.columns())
    {
        if expected.name() != actual.name() {
            return Err(Error::SchemaMismatch(format!(
                "Field name mismatch. Expected: {}, Found: {}",
                expected.name(),
                actual.name()
            )));
        }

        if !types_compatible(expected.data_type(), actual.data_type()) {
            return Err(Error::SchemaMismatch(format!(
                "Type mismatch for field {}. Expected: {:?}, Found: {:?}",
                expected.name(),
                expected.data_type(),
                actual.data_type()
            )));
        }

        if expected.data_type() == actual.data_type() {
            columns.push(Arc::clone(column));
        } else {
            columns.push(cast(column, expected.data_type())?);
        }
    }

    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}
