//! SQL literal rendering for decoded row values.

use binlog_events::{ColumnType, ColumnValue, RowsEvent};

use crate::schema::TableInfo;

use super::RenderError;

/// Render every column of one row image to its SQL literal. The catalog
/// entry, when present, must align with the row position by position.
pub(super) fn render_row(
    event: &RowsEvent,
    row: &[ColumnValue],
    info: Option<&TableInfo>,
    hex_string: bool,
) -> Result<Vec<String>, RenderError> {
    let table = format!("{}.{}", event.schema_name, event.table_name);
    if let Some(info) = info {
        if info.columns.len() != row.len() {
            return Err(RenderError {
                table,
                message: format!(
                    "schema lists {} columns but the row carries {}",
                    info.columns.len(),
                    row.len()
                ),
            });
        }
    }
    let mut rendered = Vec::with_capacity(row.len());
    for (i, value) in row.iter().enumerate() {
        let ty = event
            .column_types
            .get(i)
            .copied()
            .ok_or_else(|| RenderError {
                table: table.clone(),
                message: format!("no declared type for column {i}"),
            })?;
        let unsigned = info.map(|t| t.unsigned(i)).unwrap_or(false);
        rendered.push(render_value(ty, value, unsigned, hex_string));
    }
    Ok(rendered)
}

/// One value to one SQL literal.
pub(super) fn render_value(
    ty: ColumnType,
    value: &ColumnValue,
    unsigned: bool,
    hex_string: bool,
) -> String {
    match value {
        ColumnValue::Null => "NULL".to_string(),
        ColumnValue::SignedInt(n) => {
            if ty == ColumnType::Year {
                return format!("'{n}'");
            }
            // The wire encodes unsigned columns through the signed range;
            // a decoded -1 on an unsigned column is the type's maximum.
            if unsigned && *n == -1 {
                if let Some(max) = unsigned_max(ty) {
                    return max;
                }
            }
            n.to_string()
        }
        ColumnValue::Float(_)
        | ColumnValue::Double(_)
        | ColumnValue::Decimal(_)
        | ColumnValue::Timestamp(_)
        | ColumnValue::Enum(_)
        | ColumnValue::Set(_)
        | ColumnValue::Bit(_) => value.to_string(),
        ColumnValue::Date { .. } | ColumnValue::Time { .. } | ColumnValue::DateTime { .. } => {
            format!("'{value}'")
        }
        ColumnValue::String(bytes) => {
            if hex_string {
                format!("X'{}'", hex::encode(bytes))
            } else {
                format!("\"{}\"", escape_bytes(bytes))
            }
        }
        ColumnValue::Json(doc) => format!("'{doc}'"),
        ColumnValue::Bytes(bytes) => format!("X'{}'", hex::encode(bytes)),
    }
}

fn unsigned_max(ty: ColumnType) -> Option<String> {
    let max = match ty {
        ColumnType::Tiny => u64::from(u8::MAX),
        ColumnType::Short => u64::from(u16::MAX),
        ColumnType::Int24 => 16_777_215,
        ColumnType::Long => u64::from(u32::MAX),
        ColumnType::LongLong => u64::MAX,
        _ => return None,
    };
    Some(max.to_string())
}

/// Backslash-escape the bytes MySQL's quoting cares about, then decode
/// lossily so invalid UTF-8 cannot poison the output stream.
fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            0x00 => out.extend_from_slice(b"\\0"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\'' => out.extend_from_slice(b"\\'"),
            b'"' => out.extend_from_slice(b"\\\""),
            0x1a => out.extend_from_slice(b"\\Z"),
            _ => out.push(b),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub(super) fn quote_name(name: &str) -> String {
    format!("`{name}`")
}

/// `@0`, `@1`, .. stand-ins when no catalog names the columns.
pub(super) fn placeholders(width: usize) -> Vec<String> {
    (0..width).map(|i| format!("@{i}")).collect()
}

/// `name = value` pairs AND-joined, with `IS NULL` for NULL literals.
pub(super) fn where_clause(names: &[String], values: &[String]) -> String {
    names
        .iter()
        .zip(values)
        .map(|(name, value)| {
            if value == "NULL" {
                format!("{name} IS NULL")
            } else {
                format!("{name} = {value}")
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Key column names and their rendered values. `None` when the catalog's
/// key list does not resolve against its own column list.
pub(super) fn key_values(
    info: &TableInfo,
    rendered: &[String],
) -> Option<(Vec<String>, Vec<String>)> {
    let mut names = Vec::new();
    let mut values = Vec::new();
    for key in info.key_columns() {
        let idx = info.columns.iter().position(|c| c.name == key)?;
        names.push(quote_name(&key));
        values.push(rendered.get(idx)?.clone());
    }
    Some((names, values))
}

/// WHERE clause for one row image, plus whether the statement is only
/// advisory because no primary key pins down the row.
pub(super) fn row_predicate(
    info: Option<&TableInfo>,
    rendered: &[String],
) -> Option<(String, bool)> {
    match info {
        Some(info) if !info.primary_keys.is_empty() => {
            let (names, values) = key_values(info, rendered)?;
            Some((where_clause(&names, &values), false))
        }
        Some(info) => {
            let names: Vec<String> = info
                .columns
                .iter()
                .map(|c| quote_name(&c.name))
                .collect();
            Some((where_clause(&names, rendered), true))
        }
        None => {
            let names = placeholders(rendered.len());
            Some((where_clause(&names, rendered), true))
        }
    }
}

/// SET clause over one row image, skipping ignored columns when the
/// catalog names them.
pub(super) fn set_clause(
    info: Option<&TableInfo>,
    rendered: &[String],
    ignore: &[String],
) -> String {
    match info {
        Some(info) => info
            .columns
            .iter()
            .zip(rendered)
            .filter(|(c, _)| !ignore.contains(&c.name))
            .map(|(c, v)| format!("{} = {v}", quote_name(&c.name)))
            .collect::<Vec<_>>()
            .join(", "),
        None => placeholders(rendered.len())
            .iter()
            .zip(rendered)
            .map(|(n, v)| format!("{n} = {v}"))
            .collect::<Vec<_>>()
            .join(", "),
    }
}
