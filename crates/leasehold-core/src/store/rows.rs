//! Row decoding and dynamic UPDATE assembly.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};

use crate::{
    domain::{format_timestamp, parse_timestamp},
    Error, Result,
};

pub(crate) fn get<'r, T>(row: &'r SqliteRow, col: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(col)
        .map_err(|e| Error::DatabaseError(format!("Failed to read {col}: {e}")))
}

pub(crate) fn get_parsed<T>(row: &SqliteRow, col: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let text: String = get(row, col)?;
    T::from_str(&text).map_err(|e| Error::ParseError(format!("Invalid {col} '{text}': {e}")))
}

pub(crate) fn get_opt_parsed<T>(row: &SqliteRow, col: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let text: Option<String> = get(row, col)?;
    text.filter(|t| !t.trim().is_empty())
        .map(|t| {
            T::from_str(&t).map_err(|e| Error::ParseError(format!("Invalid {col} '{t}': {e}")))
        })
        .transpose()
}

pub(crate) fn get_ts(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>> {
    let text: String = get(row, col)?;
    parse_timestamp(&text)
}

pub(crate) fn get_opt_ts(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>> {
    let text: Option<String> = get(row, col)?;
    text.map(|t| parse_timestamp(&t)).transpose()
}

pub(crate) fn get_json(row: &SqliteRow, col: &str) -> Result<Value> {
    let text: Option<String> = get(row, col)?;
    match text {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .map_err(|e| Error::ParseError(format!("Invalid JSON in {col}: {e}"))),
        _ => Ok(Value::Object(serde_json::Map::new())),
    }
}

enum SqlValue {
    Text(Option<String>),
    Int(Option<i64>),
}

/// Column assignments for a single-row `UPDATE ... WHERE id = ?`.
#[derive(Default)]
pub(crate) struct Assignments {
    items: Vec<(&'static str, SqlValue)>,
    excluded: Option<(&'static str, Vec<&'static str>)>,
}

impl Assignments {
    pub(crate) fn text(&mut self, col: &'static str, value: Option<String>) -> &mut Self {
        self.items.push((col, SqlValue::Text(value)));
        self
    }

    pub(crate) fn int(&mut self, col: &'static str, value: Option<i64>) -> &mut Self {
        self.items.push((col, SqlValue::Int(value)));
        self
    }

    pub(crate) fn ts(&mut self, col: &'static str, value: Option<DateTime<Utc>>) -> &mut Self {
        self.text(col, value.map(format_timestamp))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Only update the row while `col` holds none of `values`.
    pub(crate) fn unless_in(&mut self, col: &'static str, values: Vec<&'static str>) -> &mut Self {
        self.excluded = Some((col, values));
        self
    }

    pub(crate) async fn execute(self, pool: &SqlitePool, table: &str, id: i64) -> Result<u64> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!("UPDATE {table} SET "));
        let mut separated = builder.separated(", ");
        for (col, value) in self.items {
            separated.push(format!("{col} = "));
            match value {
                SqlValue::Text(v) => separated.push_bind_unseparated(v),
                SqlValue::Int(v) => separated.push_bind_unseparated(v),
            };
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);
        if let Some((col, values)) = self.excluded.filter(|(_, values)| !values.is_empty()) {
            builder.push(format!(" AND {col} NOT IN ("));
            let mut list = builder.separated(", ");
            for value in values {
                list.push_bind(value);
            }
            list.push_unseparated(")");
        }

        builder
            .build()
            .execute(pool)
            .await
            .map(|done| done.rows_affected())
            .map_err(|e| Error::DatabaseError(format!("Failed to update {table} {id}: {e}")))
    }
}
