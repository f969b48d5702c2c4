//   Copyright (c) 2025-2026 The Floe Authors
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

//! Encode engine results into pgwire `QueryResponse` messages.
//!
//! Values are rendered in PostgreSQL text form (`t`/`f` booleans, space-
//! separated timestamps, `{...}` array literals, `\x` bytea). Column types
//! map through a fixed Arrow-to-OID table; DuckDB surfaces UUID and JSON
//! columns as Arrow strings, so those ride the text OID.

use std::sync::Arc;

use duckdb::arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, LargeBinaryArray, ListArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray,
};
use duckdb::arrow::datatypes::{DataType, TimeUnit};
use duckdb::arrow::util::display::array_value_to_string;
use futures::stream;
use pgwire::api::results::{DataRowEncoder, FieldFormat, FieldInfo, QueryResponse};
use pgwire::api::Type;
use pgwire::error::{PgWireError, PgWireResult};

use crate::engine::QueryResult;

/// Fixed Arrow-to-PostgreSQL type mapping for `RowDescription`.
pub fn pg_type_for(data_type: &DataType) -> Type {
    match data_type {
        DataType::Boolean => Type::BOOL,
        DataType::Int8 | DataType::Int16 => Type::INT2,
        DataType::Int32 | DataType::UInt8 | DataType::UInt16 => Type::INT4,
        DataType::Int64 | DataType::UInt32 => Type::INT8,
        DataType::UInt64 | DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => {
            Type::NUMERIC
        }
        DataType::Float16 | DataType::Float32 => Type::FLOAT4,
        DataType::Float64 => Type::FLOAT8,
        DataType::Utf8 | DataType::LargeUtf8 => Type::TEXT,
        DataType::Date32 | DataType::Date64 => Type::DATE,
        DataType::Time32(_) | DataType::Time64(_) => Type::TIME,
        DataType::Timestamp(_, None) => Type::TIMESTAMP,
        DataType::Timestamp(_, Some(_)) => Type::TIMESTAMPTZ,
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => Type::BYTEA,
        DataType::Interval(_) => Type::INTERVAL,
        DataType::List(field) => match pg_type_for(field.data_type()) {
            Type::BOOL => Type::BOOL_ARRAY,
            Type::INT2 => Type::INT2_ARRAY,
            Type::INT4 => Type::INT4_ARRAY,
            Type::INT8 => Type::INT8_ARRAY,
            Type::FLOAT4 => Type::FLOAT4_ARRAY,
            Type::FLOAT8 => Type::FLOAT8_ARRAY,
            _ => Type::TEXT_ARRAY,
        },
        _ => Type::TEXT,
    }
}

/// `RowDescription` fields for a result. With `all_varchar`, every column is
/// described as VARCHAR so binary-format requests from Extended-Query clients
/// receive the text bytes unchanged.
pub fn row_description(result: &QueryResult, all_varchar: bool) -> Vec<FieldInfo> {
    result
        .schema
        .fields()
        .iter()
        .map(|field| {
            let pg_type = if all_varchar {
                Type::VARCHAR
            } else {
                pg_type_for(field.data_type())
            };
            FieldInfo::new(field.name().clone(), None, None, pg_type, FieldFormat::Text)
        })
        .collect()
}

/// Encode a materialized engine result into a pgwire `QueryResponse`.
pub fn query_response(result: &QueryResult, all_varchar: bool) -> PgWireResult<QueryResponse> {
    let fields = Arc::new(row_description(result, all_varchar));
    let mut rows = Vec::with_capacity(result.row_count());
    let mut encoder = DataRowEncoder::new(fields.clone());
    for batch in &result.batches {
        for row in 0..batch.num_rows() {
            for column in batch.columns() {
                let cell = format_value(column, row)?;
                encoder.encode_field(&cell)?;
            }
            rows.push(Ok(encoder.take_row()));
        }
    }
    Ok(QueryResponse::new(fields, stream::iter(rows)))
}

/// Render one cell as PostgreSQL text; `None` is a wire NULL.
pub fn format_value(array: &ArrayRef, row: usize) -> PgWireResult<Option<String>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let rendered = match array.data_type() {
        DataType::Boolean => {
            let values = downcast::<BooleanArray>(array)?;
            if values.value(row) { "t" } else { "f" }.to_string()
        }
        DataType::Timestamp(unit, tz) => {
            let micros = timestamp_micros(array, unit, row)?;
            format_timestamp(micros, tz.is_some())
        }
        DataType::Binary => {
            let values = downcast::<BinaryArray>(array)?;
            format_bytea(values.value(row))
        }
        DataType::LargeBinary => {
            let values = downcast::<LargeBinaryArray>(array)?;
            format_bytea(values.value(row))
        }
        DataType::List(_) => {
            let values = downcast::<ListArray>(array)?;
            let inner = values.value(row);
            let mut items = Vec::with_capacity(inner.len());
            for i in 0..inner.len() {
                items.push(format_value(&inner, i)?.unwrap_or_else(|| "NULL".to_string()));
            }
            format!("{{{}}}", items.join(","))
        }
        // Integers, floats, decimals, strings, dates and times already render
        // in PostgreSQL-compatible text through Arrow's display path.
        _ => array_value_to_string(array, row).map_err(api_error)?,
    };
    Ok(Some(rendered))
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef) -> PgWireResult<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        api_error(format!(
            "column downcast failed for {:?}",
            array.data_type()
        ))
    })
}

fn timestamp_micros(array: &ArrayRef, unit: &TimeUnit, row: usize) -> PgWireResult<i64> {
    Ok(match unit {
        TimeUnit::Second => downcast::<TimestampSecondArray>(array)?
            .value(row)
            .saturating_mul(1_000_000),
        TimeUnit::Millisecond => downcast::<TimestampMillisecondArray>(array)?
            .value(row)
            .saturating_mul(1_000),
        TimeUnit::Microsecond => downcast::<TimestampMicrosecondArray>(array)?.value(row),
        TimeUnit::Nanosecond => downcast::<TimestampNanosecondArray>(array)?.value(row) / 1_000,
    })
}

fn format_timestamp(micros: i64, with_zone: bool) -> String {
    let rendered = match chrono::DateTime::from_timestamp_micros(micros) {
        Some(ts) if micros % 1_000_000 == 0 => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        Some(ts) => {
            let full = ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
            full.trim_end_matches('0').to_string()
        }
        None => micros.to_string(),
    };
    if with_zone {
        format!("{rendered}+00")
    } else {
        rendered
    }
}

fn format_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn api_error(message: impl std::fmt::Display) -> PgWireError {
    PgWireError::ApiError(message.to_string().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckdb::arrow::array::{Int32Array, Int64Array, StringArray};
    use duckdb::arrow::datatypes::Field;

    fn as_ref(array: impl Array + 'static) -> ArrayRef {
        Arc::new(array)
    }

    #[test]
    fn maps_scalar_types() {
        assert_eq!(pg_type_for(&DataType::Boolean), Type::BOOL);
        assert_eq!(pg_type_for(&DataType::Int32), Type::INT4);
        assert_eq!(pg_type_for(&DataType::Int64), Type::INT8);
        assert_eq!(pg_type_for(&DataType::Float64), Type::FLOAT8);
        assert_eq!(pg_type_for(&DataType::Utf8), Type::TEXT);
        assert_eq!(pg_type_for(&DataType::Decimal128(10, 2)), Type::NUMERIC);
        assert_eq!(
            pg_type_for(&DataType::Timestamp(TimeUnit::Microsecond, None)),
            Type::TIMESTAMP
        );
        assert_eq!(
            pg_type_for(&DataType::Timestamp(
                TimeUnit::Microsecond,
                Some("UTC".into())
            )),
            Type::TIMESTAMPTZ
        );
    }

    #[test]
    fn maps_list_types_to_element_arrays() {
        let int_list = DataType::List(Arc::new(Field::new("item", DataType::Int32, true)));
        assert_eq!(pg_type_for(&int_list), Type::INT4_ARRAY);
        let text_list = DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)));
        assert_eq!(pg_type_for(&text_list), Type::TEXT_ARRAY);
    }

    #[test]
    fn formats_booleans_as_pg_text() {
        let array = as_ref(BooleanArray::from(vec![Some(true), Some(false), None]));
        assert_eq!(format_value(&array, 0).unwrap().unwrap(), "t");
        assert_eq!(format_value(&array, 1).unwrap().unwrap(), "f");
        assert_eq!(format_value(&array, 2).unwrap(), None);
    }

    #[test]
    fn formats_numbers_and_strings() {
        let ints = as_ref(Int32Array::from(vec![42]));
        assert_eq!(format_value(&ints, 0).unwrap().unwrap(), "42");
        let bigs = as_ref(Int64Array::from(vec![i64::MAX]));
        assert_eq!(
            format_value(&bigs, 0).unwrap().unwrap(),
            i64::MAX.to_string()
        );
        let strings = as_ref(StringArray::from(vec!["hello"]));
        assert_eq!(format_value(&strings, 0).unwrap().unwrap(), "hello");
    }

    #[test]
    fn formats_timestamps_with_space_separator() {
        // 2024-01-02 03:04:05 UTC
        let micros = 1_704_164_645_000_000_i64;
        let array = as_ref(TimestampMicrosecondArray::from(vec![micros]));
        assert_eq!(
            format_value(&array, 0).unwrap().unwrap(),
            "2024-01-02 03:04:05"
        );
    }

    #[test]
    fn formats_bytea_as_hex() {
        let array = as_ref(BinaryArray::from_vec(vec![b"\x01\xab"]));
        assert_eq!(format_value(&array, 0).unwrap().unwrap(), "\\x01ab");
    }

    #[test]
    fn formats_lists_as_pg_array_literals() {
        let list = ListArray::from_iter_primitive::<
            duckdb::arrow::datatypes::Int32Type,
            _,
            _,
        >(vec![Some(vec![Some(1), Some(2), Some(3)])]);
        let array = as_ref(list);
        assert_eq!(format_value(&array, 0).unwrap().unwrap(), "{1,2,3}");
    }
}
