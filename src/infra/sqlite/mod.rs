//! SQLite record stores
//!
//! Two schemas live here:
//! - the canonical store (`sensor_data` + `prediction_data`, unique content hashes)
//! - the display mirror (flattened `sensor_data` rows read by dashboards)
//!
//! Updates are built against the live column set so databases created by
//! older releases keep working.

mod canonical;
mod display;

pub use canonical::*;
pub use display::*;

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::infra::{LedgerError, Result};

/// Open (creating if needed) a SQLite database
pub async fn connect(path: &str) -> Result<SqlitePool> {
    let url = if path == ":memory:" || path.starts_with("sqlite:") {
        path.to_string()
    } else {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        format!("sqlite://{}", path)
    };
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Fixed-width RFC 3339 so text comparison orders chronologically
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite's `CURRENT_TIMESTAMP` text, written by older schemas; always UTC
const SQLITE_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse RFC 3339 or SQLite `CURRENT_TIMESTAMP` text
pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, SQLITE_TS_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| LedgerError::Internal(format!("Invalid timestamp {}: {}", value, e)))
}

/// Column names of `table` as the database currently reports them
pub(crate) async fn table_columns(pool: &SqlitePool, table: &str) -> Result<HashSet<String>> {
    let names: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(pool)
        .await?;
    Ok(names.into_iter().collect())
}

/// Bindable value for dynamically built statements
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Int(i64),
    Real(f64),
    Text(String),
    Null,
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// `UPDATE` restricted to the columns that exist in the live schema
#[derive(Debug)]
pub(crate) struct DynamicUpdate {
    table: &'static str,
    sets: Vec<(&'static str, SqlValue)>,
    filters: Vec<(String, Vec<SqlValue>)>,
    guards: Vec<(&'static str, String)>,
}

impl DynamicUpdate {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            sets: Vec::new(),
            filters: Vec::new(),
            guards: Vec::new(),
        }
    }

    pub fn set(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.sets.push((column, value.into()));
        self
    }

    /// Set only when a value is present
    pub fn set_some<T: Into<SqlValue>>(self, column: &'static str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Add a `WHERE` fragment; `?` placeholders are bound in order
    pub fn filter(mut self, clause: impl Into<String>, values: Vec<SqlValue>) -> Self {
        self.filters.push((clause.into(), values));
        self
    }

    /// Add a `WHERE` fragment that only applies when `column` exists
    pub fn guard(mut self, column: &'static str, clause: impl Into<String>) -> Self {
        self.guards.push((column, clause.into()));
        self
    }

    /// Columns this update would write, before schema filtering
    #[cfg(test)]
    pub fn columns(&self) -> Vec<&'static str> {
        self.sets.iter().map(|(c, _)| *c).collect()
    }

    /// Run against the live schema.
    ///
    /// Returns the number of matched rows; 0 without touching the database
    /// when none of the requested columns exist.
    pub async fn execute(self, pool: &SqlitePool) -> Result<u64> {
        let available = table_columns(pool, self.table).await?;
        let sets: Vec<(&'static str, SqlValue)> = self
            .sets
            .into_iter()
            .filter(|(column, _)| available.contains(*column))
            .collect();
        if sets.is_empty() {
            return Ok(0);
        }

        let assignments: Vec<String> = sets.iter().map(|(c, _)| format!("{} = ?", c)).collect();
        let mut sql = format!("UPDATE {} SET {}", self.table, assignments.join(", "));
        let clauses: Vec<&str> = self
            .filters
            .iter()
            .map(|(c, _)| c.as_str())
            .chain(
                self.guards
                    .iter()
                    .filter(|(column, _)| available.contains(*column))
                    .map(|(_, c)| c.as_str()),
            )
            .collect();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut query = sqlx::query(&sql);
        let values = sets
            .into_iter()
            .map(|(_, v)| v)
            .chain(self.filters.into_iter().flat_map(|(_, v)| v));
        for value in values {
            query = match value {
                SqlValue::Int(i) => query.bind(i),
                SqlValue::Real(r) => query.bind(r),
                SqlValue::Text(s) => query.bind(s),
                SqlValue::Null => query.bind(None::<String>),
            };
        }

        let result = query.execute(pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dynamic_update_skips_missing_columns() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t (id, a) VALUES (1, 'old')")
            .execute(&pool)
            .await
            .unwrap();

        let update = DynamicUpdate::new("t")
            .set("a", "new".to_string())
            .set("missing", 5i64)
            .filter("id = ?", vec![SqlValue::Int(1)]);
        assert_eq!(update.columns(), vec!["a", "missing"]);
        assert_eq!(update.execute(&pool).await.unwrap(), 1);

        let a: String = sqlx::query_scalar("SELECT a FROM t WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(a, "new");
    }

    #[tokio::test]
    async fn test_dynamic_update_with_no_known_columns_is_noop() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        let affected = DynamicUpdate::new("t")
            .set("ghost", 1i64)
            .filter("id = ?", vec![SqlValue::Int(1)])
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }

    #[test]
    fn test_timestamp_format_round_trip() {
        let now = Utc::now();
        let text = format_ts(now);
        assert!(text.ends_with('Z'));
        let parsed = parse_ts(&text).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_parse_sqlite_current_timestamp() {
        let parsed = parse_ts("2024-06-01 12:30:45").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-06-01T12:30:45+00:00");
        assert_eq!(
            parse_ts("2024-06-01 12:30:45.250").unwrap().timestamp_millis(),
            parsed.timestamp_millis() + 250
        );
        assert!(parse_ts("yesterday").is_err());
    }
}
