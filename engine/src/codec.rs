//! Row codec: typed records to and from raw sheet rows.
//!
//! A sheet row is an ordered list of cell strings in header order. Decoding
//! is strict about shape and types because a row that does not fit the
//! schema means the sheet was edited into a state the engine cannot trust.
//!
//! For every record `r` that [`Schema::validate_full`] leaves unchanged,
//! `decode(&encode(&r, schema)?, schema)? == r`.

use crate::{
    error::Result, ColumnType, Error, Position, PulledRow, Record, Schema, Value, HEADER_ROW,
};

/// Decode a row of cells into a record.
///
/// Fails with a malformed-row error if the cell count differs from the
/// column count or a cell cannot be read as its column's type.
pub fn decode(cells: &[String], schema: &Schema) -> Result<Record> {
    if cells.len() != schema.len() {
        return Err(Error::CellCountMismatch {
            expected: schema.len(),
            actual: cells.len(),
        });
    }

    let mut record = Record::new();
    for (column, cell) in schema.columns().iter().zip(cells) {
        let value = if cell.is_empty() {
            match column.column_type {
                _ if column.nullable => Value::Null,
                ColumnType::Text => Value::Text(String::new()),
                _ => return Err(invalid_cell(&column.name, cell, column.column_type)),
            }
        } else {
            Value::parse_cell(cell, column.column_type)
                .ok_or_else(|| invalid_cell(&column.name, cell, column.column_type))?
        };
        record.set(column.name.clone(), value);
    }
    Ok(record)
}

/// Encode a complete record into a row of cells in header order.
///
/// The record is validated first; a missing non-nullable column, an unknown
/// column or a type mismatch is a validation error.
pub fn encode(record: &Record, schema: &Schema) -> Result<Vec<String>> {
    let record = schema.validate_full(record)?;
    let cells: Vec<String> = schema
        .columns()
        .iter()
        .map(|column| record.get(&column.name).map(Value::to_cell))
        .map(Option::unwrap_or_default)
        .collect();
    Ok(cells)
}

/// Pad a row with empty cells up to `width`.
///
/// Spreadsheet APIs drop trailing empty cells from each row, so a row that is
/// shorter than the schema is not necessarily malformed. Rows that are longer
/// are left alone for [`decode`] to reject.
pub fn pad_row(mut cells: Vec<String>, width: usize) -> Vec<String> {
    if cells.len() < width {
        cells.resize(width, String::new());
    }
    cells
}

/// Decode a full range read, header row included.
///
/// The first row must match the schema header. Blank rows are skipped but
/// still count towards the positions of the rows after them. A row that
/// fails to decode is reported with its sheet position.
pub fn decode_sheet(values: &[Vec<String>], schema: &Schema) -> Result<Vec<PulledRow>> {
    let Some((header, data)) = values.split_first() else {
        return Err(Error::HeaderMismatch {
            expected: schema.header(),
            actual: Vec::new(),
        });
    };
    schema.check_header(header)?;

    let mut rows = Vec::with_capacity(data.len());
    for (offset, cells) in data.iter().enumerate() {
        let position = HEADER_ROW + 1 + offset as Position;
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let cells = pad_row(cells.clone(), schema.len());
        let record = decode(&cells, schema).map_err(|e| Error::AtRow {
            position,
            source: Box::new(e),
        })?;
        rows.push(PulledRow { position, record });
    }
    Ok(rows)
}

fn invalid_cell(column: &str, cell: &str, expected: ColumnType) -> Error {
    Error::InvalidCell {
        column: column.to_string(),
        cell: cell.to_string(),
        expected: expected.to_string(),
    }
}
