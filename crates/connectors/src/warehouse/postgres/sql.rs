use crate::warehouse::postgres::utils::quote_ident;
use model::core::field_type::FieldType;
use serde_json::Value;

pub(crate) const KEY_COLUMN: &str = "_pk";
pub(crate) const LOADED_AT_COLUMN: &str = "_loaded_at";

/// Bind parameters per statement stay well below the protocol limit of 65535.
pub(crate) const MAX_PARAMS: usize = 60_000;

pub(crate) const QUERY_COLUMNS_SQL: &str = "SELECT column_name, data_type \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2";

/// Column type used for a field.
pub(crate) fn column_type(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Boolean => "BOOLEAN",
        FieldType::Integer => "BIGINT",
        FieldType::Decimal => "NUMERIC",
        FieldType::VarChar => "VARCHAR(255)",
        // all-null columns start as TEXT and are retyped once values arrive
        FieldType::Null | FieldType::Text => "TEXT",
        FieldType::Object | FieldType::Array => "JSONB",
    }
}

/// The `information_schema.columns.data_type` reported for [`column_type`].
pub(crate) fn reported_type(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Boolean => "boolean",
        FieldType::Integer => "bigint",
        FieldType::Decimal => "numeric",
        FieldType::VarChar => "character varying",
        FieldType::Null | FieldType::Text => "text",
        FieldType::Object | FieldType::Array => "jsonb",
    }
}

/// What `evolve` does to an existing column when a schema version arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnChange {
    Keep,
    Widen,
    /// TEXT is also the placeholder for all-null fields; it can only be
    /// retyped while the column holds no values.
    RetypeIfEmpty,
    Incompatible,
}

/// The field type a reported column type holds, `None` for types this
/// warehouse never creates.
pub(crate) fn field_type_for(reported: &str) -> Option<FieldType> {
    match reported {
        "boolean" => Some(FieldType::Boolean),
        "smallint" | "integer" | "bigint" => Some(FieldType::Integer),
        "numeric" | "real" | "double precision" => Some(FieldType::Decimal),
        "character varying" => Some(FieldType::VarChar),
        "text" => Some(FieldType::Text),
        "jsonb" | "json" => Some(FieldType::Object),
        _ => None,
    }
}

/// Columns only ever widen. A column whose type already holds `incoming`
/// stays as it is, even when `incoming` is narrower.
pub(crate) fn column_change(reported: &str, incoming: FieldType) -> ColumnChange {
    if reported == reported_type(incoming) || incoming == FieldType::Null {
        return ColumnChange::Keep;
    }
    let Some(existing) = field_type_for(reported) else {
        return ColumnChange::Keep;
    };
    // json columns hold objects and arrays alike
    if existing.accepts(&incoming) || (existing, incoming) == (FieldType::Object, FieldType::Array) {
        ColumnChange::Keep
    } else if existing.widens_to(&incoming) {
        ColumnChange::Widen
    } else if existing == FieldType::Text {
        ColumnChange::RetypeIfEmpty
    } else {
        ColumnChange::Incompatible
    }
}

pub(crate) fn column_has_values(schema: &str, table: &str, column: &str) -> String {
    format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE {} IS NOT NULL)",
        qualified(schema, table),
        quote_ident(column),
    )
}

/// Cast applied to a text-encoded parameter for a column of the reported type.
pub(crate) fn cast_for(reported: &str) -> &'static str {
    match reported {
        "boolean" => "BOOLEAN",
        "bigint" => "BIGINT",
        "integer" => "INTEGER",
        "numeric" => "NUMERIC",
        "character varying" => "VARCHAR",
        "jsonb" => "JSONB",
        "json" => "JSON",
        _ => "TEXT",
    }
}

pub(crate) fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

pub(crate) fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

pub(crate) fn create_table(schema: &str, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} TIMESTAMPTZ NOT NULL DEFAULT now())",
        qualified(schema, table),
        quote_ident(KEY_COLUMN),
        quote_ident(LOADED_AT_COLUMN),
    )
}

pub(crate) fn add_column(schema: &str, table: &str, column: &str, ty: FieldType) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
        qualified(schema, table),
        quote_ident(column),
        column_type(ty),
    )
}

pub(crate) fn widen_column(schema: &str, table: &str, column: &str, ty: FieldType) -> String {
    let col = quote_ident(column);
    let target = column_type(ty);
    format!(
        "ALTER TABLE {} ALTER COLUMN {col} TYPE {target} USING {col}::TEXT::{target}",
        qualified(schema, table),
    )
}

/// Multi-row `INSERT .. ON CONFLICT DO UPDATE` keyed on [`KEY_COLUMN`].
///
/// `columns` pairs each data column with the cast for its parameter.
pub(crate) fn upsert(
    schema: &str,
    table: &str,
    columns: &[(&str, &'static str)],
    row_count: usize,
) -> String {
    let width = columns.len() + 1;
    let mut names = vec![quote_ident(KEY_COLUMN)];
    names.extend(columns.iter().map(|(name, _)| quote_ident(name)));

    let tuples = (0..row_count)
        .map(|row| {
            let base = row * width;
            let mut slots = vec![format!("${}::TEXT", base + 1)];
            slots.extend(
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, (_, cast))| format!("${}::TEXT::{cast}", base + i + 2)),
            );
            format!("({})", slots.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut updates: Vec<String> = columns
        .iter()
        .map(|(name, _)| {
            let col = quote_ident(name);
            format!("{col} = EXCLUDED.{col}")
        })
        .collect();
    updates.push(format!("{} = now()", quote_ident(LOADED_AT_COLUMN)));

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) DO UPDATE SET {}",
        qualified(schema, table),
        names.join(", "),
        tuples,
        quote_ident(KEY_COLUMN),
        updates.join(", "),
    )
}

/// Text encoding of a JSON value for a `$n::TEXT::<type>` parameter.
pub(crate) fn encode_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
