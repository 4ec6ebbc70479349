//! Result marshaling: converts a streaming cursor into a bounded,
//! truncation-aware preview, and native cell values into transport-safe
//! representations.

use meridian_common::proto::{data_value::Kind, DataRow, DataValue, ResultPreview};
use meridian_common::Result;

use crate::runtime::{CellValue, Cursor};

/// Default preview row limit when the caller passes 0.
pub const DEFAULT_ROW_LIMIT: usize = 10_000;

/// Fixed timestamp rendering for previews and wire rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Drain up to `row_limit` rows from the cursor into a [`ResultPreview`].
///
/// The preview holds `min(actual_row_count, row_limit)` rows; `truncated` is
/// set iff iteration stopped at the limit with rows remaining. After the
/// limit is reached the cursor is probed once more so that a terminal cursor
/// error still surfaces.
pub async fn marshal(
    cursor: &mut dyn Cursor,
    row_limit: usize,
) -> Result<(ResultPreview, usize)> {
    let columns = cursor.schema().to_vec();
    let mut rows: Vec<DataRow> = Vec::new();
    let mut truncated = false;

    loop {
        if rows.len() == row_limit {
            if cursor.try_next().await?.is_some() {
                truncated = true;
            }
            break;
        }
        match cursor.try_next().await? {
            Some(cells) => rows.push(to_data_row(cells)),
            None => break,
        }
    }

    let row_count = rows.len();
    Ok((
        ResultPreview {
            columns,
            rows,
            truncated,
        },
        row_count,
    ))
}

/// Convert one native row into its wire representation.
pub fn to_data_row(cells: Vec<CellValue>) -> DataRow {
    DataRow {
        values: cells.into_iter().map(to_data_value).collect(),
    }
}

/// Convert a native value into its transport-safe representation: primitive
/// scalars pass through, byte sequences become strings, timestamps become
/// fixed-format strings, and everything else falls back to its string form.
pub fn to_data_value(cell: CellValue) -> DataValue {
    let kind = match cell {
        CellValue::Null => None,
        CellValue::Bool(v) => Some(Kind::BoolValue(v)),
        CellValue::Int(v) => Some(Kind::IntValue(v)),
        CellValue::UInt(v) => Some(Kind::UintValue(v)),
        CellValue::Float(v) => Some(Kind::FloatValue(v)),
        CellValue::String(v) => Some(Kind::StringValue(v)),
        CellValue::Bytes(v) => Some(Kind::StringValue(
            String::from_utf8_lossy(&v).into_owned(),
        )),
        CellValue::Timestamp(v) => Some(Kind::StringValue(
            v.format(TIMESTAMP_FORMAT).to_string(),
        )),
        CellValue::Json(v) => Some(Kind::StringValue(v.to_string())),
    };
    DataValue { kind }
}

/// Convert a wire value back into a native cell value.
pub fn from_data_value(value: DataValue) -> CellValue {
    match value.kind {
        None => CellValue::Null,
        Some(Kind::BoolValue(v)) => CellValue::Bool(v),
        Some(Kind::IntValue(v)) => CellValue::Int(v),
        Some(Kind::UintValue(v)) => CellValue::UInt(v),
        Some(Kind::FloatValue(v)) => CellValue::Float(v),
        Some(Kind::StringValue(v)) => CellValue::String(v),
    }
}

/// Text rendering of a cell for the PostgreSQL text format. `None` is SQL
/// NULL.
pub fn cell_to_text(cell: &CellValue) -> Option<String> {
    match cell {
        CellValue::Null => None,
        CellValue::Bool(v) => Some(if *v { "t".to_string() } else { "f".to_string() }),
        CellValue::Int(v) => Some(v.to_string()),
        CellValue::UInt(v) => Some(v.to_string()),
        CellValue::Float(v) => Some(v.to_string()),
        CellValue::String(v) => Some(v.clone()),
        CellValue::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
        CellValue::Timestamp(v) => Some(v.format(TIMESTAMP_FORMAT).to_string()),
        CellValue::Json(v) => Some(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{static_descriptor, StaticCursor};
    use chrono::TimeZone;
    use meridian_common::proto::TypeCode;
    use pretty_assertions::assert_eq;

    fn int_rows(n: usize) -> Vec<Vec<CellValue>> {
        (0..n).map(|i| vec![CellValue::Int(i as i64)]).collect()
    }

    fn cursor_with(n: usize) -> StaticCursor {
        StaticCursor::new(
            vec![static_descriptor("id", TypeCode::Int64)],
            int_rows(n),
        )
    }

    #[tokio::test]
    async fn within_limit_is_not_truncated() {
        let mut cursor = cursor_with(50);
        let (preview, count) = marshal(&mut cursor, 100).await.unwrap();
        assert_eq!(count, 50);
        assert_eq!(preview.rows.len(), 50);
        assert!(!preview.truncated);
    }

    #[tokio::test]
    async fn exactly_at_limit_is_not_truncated() {
        let mut cursor = cursor_with(100);
        let (preview, _) = marshal(&mut cursor, 100).await.unwrap();
        assert_eq!(preview.rows.len(), 100);
        assert!(!preview.truncated);
    }

    #[tokio::test]
    async fn exceeding_limit_truncates() {
        let mut cursor = cursor_with(200);
        let (preview, count) = marshal(&mut cursor, 100).await.unwrap();
        assert_eq!(count, 100);
        assert_eq!(preview.rows.len(), 100);
        assert!(preview.truncated);
    }

    #[tokio::test]
    async fn zero_limit_yields_no_rows_but_detects_truncation() {
        let mut cursor = cursor_with(3);
        let (preview, count) = marshal(&mut cursor, 0).await.unwrap();
        assert_eq!(count, 0);
        assert!(preview.rows.is_empty());
        assert!(preview.truncated);

        let mut empty = cursor_with(0);
        let (preview, _) = marshal(&mut empty, 0).await.unwrap();
        assert!(!preview.truncated);
    }

    #[tokio::test]
    async fn schema_is_carried_into_preview() {
        let mut cursor = cursor_with(1);
        let (preview, _) = marshal(&mut cursor, 10).await.unwrap();
        assert_eq!(preview.columns.len(), 1);
        assert_eq!(preview.columns[0].name, "id");
    }

    #[tokio::test]
    async fn terminal_cursor_error_surfaces() {
        let mut cursor = StaticCursor::new(
            vec![static_descriptor("id", TypeCode::Int64)],
            int_rows(2),
        )
        .with_terminal_error("storage read failed");
        let err = marshal(&mut cursor, 10).await.unwrap_err();
        assert!(err.to_string().contains("storage read failed"));
    }

    #[test]
    fn bytes_marshal_to_string() {
        let value = to_data_value(CellValue::Bytes(b"abc".to_vec()));
        assert_eq!(value.kind, Some(Kind::StringValue("abc".to_string())));
    }

    #[test]
    fn timestamps_use_fixed_format() {
        let ts = chrono::Utc.with_ymd_and_hms(2022, 1, 2, 3, 4, 5).unwrap();
        let value = to_data_value(CellValue::Timestamp(ts));
        assert_eq!(
            value.kind,
            Some(Kind::StringValue("2022-01-02 03:04:05.000".to_string()))
        );
    }

    #[test]
    fn null_round_trips() {
        let value = to_data_value(CellValue::Null);
        assert_eq!(value.kind, None);
        assert_eq!(from_data_value(value), CellValue::Null);
    }

    #[test]
    fn text_rendering() {
        assert_eq!(cell_to_text(&CellValue::Null), None);
        assert_eq!(cell_to_text(&CellValue::Bool(true)), Some("t".to_string()));
        assert_eq!(cell_to_text(&CellValue::Int(-7)), Some("-7".to_string()));
        assert_eq!(
            cell_to_text(&CellValue::String("x".to_string())),
            Some("x".to_string())
        );
    }
}
