use arrow::array::{Array, AsArray, Int64Array};
use arrow::datatypes::{DataType, Date32Type};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use common::{Error, Result};

pub fn total_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

/// Days since the Unix epoch, the physical value of an Arrow `Date32`.
pub fn date_to_days(date: NaiveDate) -> i32 {
    // NaiveDate::default() is 1970-01-01.
    date.signed_duration_since(NaiveDate::default()).num_days() as i32
}

/// Reads the first column of every batch as `Date32`, skipping nulls.
pub fn dates_from_batches(batches: &[RecordBatch]) -> Result<Vec<NaiveDate>> {
    let mut dates = Vec::new();

    for batch in batches {
        if batch.num_columns() == 0 {
            continue;
        }
        let column = batch.column(0);
        if column.data_type() != &DataType::Date32 {
            return Err(Error::InvalidInput(format!(
                "Expected a Date32 column, found {:?}",
                column.data_type()
            )));
        }

        let array = column.as_primitive::<Date32Type>();
        for index in 0..array.len() {
            if array.is_null(index) {
                continue;
            }
            if let Some(date) = array.value_as_date(index) {
                dates.push(date);
            }
        }
    }

    Ok(dates)
}

/// Reads a single `count(*)`-style scalar.
pub fn single_count(batches: &[RecordBatch]) -> Result<u64> {
    let array = batches
        .iter()
        .find(|b| b.num_rows() > 0 && b.num_columns() > 0)
        .and_then(|b| b.column(0).as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::Other("Count query returned no Int64 value".to_string()))?;

    Ok(array.value(0) as u64)
}
