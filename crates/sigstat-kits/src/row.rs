//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "KITS SQL Server status reader."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Cell decoding for status rows.
//!
//! KITS stores status and plan codes as integers on some installations and as
//! `NUMERIC` on others, and `ASSETNUM` may be numeric or text. Decoding is
//! therefore done per cell rather than through `Row::get`, which panics on a
//! type mismatch.

use chrono::NaiveDateTime;
use sigstat_core::{SignalId, SignalStatusRecord, SourceError, StatusValue};
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, FromSql, Row};

use crate::query::{COL_DATETIME, COL_PLAN, COL_SIGNAL, COL_STATUS};

/// Decode one result row into an un-normalised record.
pub fn decode_row(row: &Row) -> Result<SignalStatusRecord, SourceError> {
    let mut datetime = None;
    let mut status = None;
    let mut plan = None;
    let mut signal = None;
    for (column, data) in row.cells() {
        match column.name() {
            COL_DATETIME => datetime = Some(data),
            COL_STATUS => status = Some(data),
            COL_PLAN => plan = Some(data),
            COL_SIGNAL => signal = Some(data),
            _ => {}
        }
    }

    let signal_id = signal_id(required(COL_SIGNAL, signal)?)?;
    let operation_state = status_value(COL_STATUS, required(COL_STATUS, status)?)?;
    let plan_id = status_value(COL_PLAN, required(COL_PLAN, plan)?)?;
    let at = timestamp(COL_DATETIME, required(COL_DATETIME, datetime)?)?;
    Ok(SignalStatusRecord::from_source(
        signal_id,
        operation_state,
        plan_id,
        at,
    ))
}

fn required<'a>(
    column: &str,
    data: Option<&'a ColumnData<'static>>,
) -> Result<&'a ColumnData<'static>, SourceError> {
    data.ok_or_else(|| SourceError::DataShape(format!("column {column} missing from result set")))
}

fn null(column: &str) -> SourceError {
    SourceError::DataShape(format!("column {column} is NULL"))
}

fn unsupported(column: &str, data: &ColumnData<'_>) -> SourceError {
    SourceError::DataShape(format!(
        "column {column} has unsupported type {}",
        type_name(data)
    ))
}

pub(crate) fn status_value(
    column: &str,
    data: &ColumnData<'_>,
) -> Result<StatusValue, SourceError> {
    let value = match data {
        ColumnData::U8(value) => value.map(|v| StatusValue::Integer(v.into())),
        ColumnData::I16(value) => value.map(|v| StatusValue::Integer(v.into())),
        ColumnData::I32(value) => value.map(|v| StatusValue::Integer(v.into())),
        ColumnData::I64(value) => value.map(StatusValue::Integer),
        ColumnData::F32(value) => value.map(|v| StatusValue::Numeric(v.into())),
        ColumnData::F64(value) => value.map(StatusValue::Numeric),
        ColumnData::Numeric(value) => value
            .as_ref()
            .map(|n| StatusValue::Numeric(numeric_to_f64(n))),
        ColumnData::String(value) => match value {
            Some(text) => Some(
                text.trim()
                    .parse::<f64>()
                    .map(StatusValue::Numeric)
                    .map_err(|_| {
                        SourceError::DataShape(format!("column {column} is not numeric: {text:?}"))
                    })?,
            ),
            None => None,
        },
        other => return Err(unsupported(column, other)),
    };
    value.ok_or_else(|| null(column))
}

pub(crate) fn signal_id(data: &ColumnData<'_>) -> Result<SignalId, SourceError> {
    let id = match data {
        ColumnData::U8(value) => value.map(|v| SignalId::Numeric(v.into())),
        ColumnData::I16(value) => value.map(|v| SignalId::Numeric(v.into())),
        ColumnData::I32(value) => value.map(|v| SignalId::Numeric(v.into())),
        ColumnData::I64(value) => value.map(SignalId::Numeric),
        ColumnData::Numeric(value) => value.as_ref().map(|n| {
            if n.dec_part() == 0 {
                SignalId::Numeric(n.int_part() as i64)
            } else {
                SignalId::Text(n.to_string())
            }
        }),
        ColumnData::String(value) => value.as_ref().map(|text| SignalId::Text(text.trim().to_owned())),
        other => return Err(unsupported(COL_SIGNAL, other)),
    };
    id.ok_or_else(|| null(COL_SIGNAL))
}

pub(crate) fn timestamp(
    column: &str,
    data: &ColumnData<'static>,
) -> Result<NaiveDateTime, SourceError> {
    NaiveDateTime::from_sql(data)
        .map_err(|_| unsupported(column, data))?
        .ok_or_else(|| null(column))
}

fn numeric_to_f64(n: &Numeric) -> f64 {
    n.value() as f64 / 10f64.powi(i32::from(n.scale()))
}

fn type_name(data: &ColumnData<'_>) -> &'static str {
    match data {
        ColumnData::U8(_) => "tinyint",
        ColumnData::I16(_) => "smallint",
        ColumnData::I32(_) => "int",
        ColumnData::I64(_) => "bigint",
        ColumnData::F32(_) => "real",
        ColumnData::F64(_) => "float",
        ColumnData::Bit(_) => "bit",
        ColumnData::String(_) => "string",
        ColumnData::Guid(_) => "uniqueidentifier",
        ColumnData::Binary(_) => "binary",
        ColumnData::Numeric(_) => "numeric",
        ColumnData::Xml(_) => "xml",
        _ => "temporal",
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn status_accepts_integer_and_decimal_cells() {
        assert_eq!(
            status_value(COL_STATUS, &ColumnData::I32(Some(2))).unwrap(),
            StatusValue::Integer(2)
        );
        assert_eq!(
            status_value(COL_STATUS, &ColumnData::U8(Some(3))).unwrap(),
            StatusValue::Integer(3)
        );
        let decimal = ColumnData::Numeric(Some(Numeric::new_with_scale(25, 1)));
        assert_eq!(
            status_value(COL_PLAN, &decimal).unwrap(),
            StatusValue::Numeric(2.5)
        );
        assert_eq!(
            status_value(COL_PLAN, &ColumnData::String(Some(Cow::Borrowed(" 4 ")))).unwrap(),
            StatusValue::Numeric(4.0)
        );
    }

    #[test]
    fn null_status_is_a_shape_error() {
        let err = status_value(COL_STATUS, &ColumnData::I32(None)).unwrap_err();
        assert!(matches!(err, SourceError::DataShape(ref msg) if msg.contains(COL_STATUS)));
    }

    #[test]
    fn non_numeric_text_is_rejected() {
        let err = status_value(COL_PLAN, &ColumnData::String(Some(Cow::Borrowed("n/a"))))
            .unwrap_err();
        assert!(err.to_string().contains("not numeric"));
        let err = status_value(COL_PLAN, &ColumnData::Bit(Some(true))).unwrap_err();
        assert!(err.to_string().contains("bit"));
    }

    #[test]
    fn signal_id_keeps_source_representation() {
        assert_eq!(signal_id(&ColumnData::I32(Some(101))).unwrap(), SignalId::Numeric(101));
        assert_eq!(
            signal_id(&ColumnData::Numeric(Some(Numeric::new_with_scale(1010, 1)))).unwrap(),
            SignalId::Numeric(101)
        );
        assert_eq!(
            signal_id(&ColumnData::String(Some(Cow::Borrowed("0101 ")))).unwrap(),
            SignalId::Text("0101".into())
        );
        assert!(signal_id(&ColumnData::String(None)).is_err());
    }

    #[test]
    fn timestamp_rejects_null_and_wrong_type() {
        let err = timestamp(COL_DATETIME, &ColumnData::DateTime2(None)).unwrap_err();
        assert!(err.to_string().contains("NULL"));
        let err = timestamp(COL_DATETIME, &ColumnData::I32(Some(1))).unwrap_err();
        assert!(err.to_string().contains("unsupported type int"));
    }
}
