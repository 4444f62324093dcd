use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::query::{Query, QueryAs};

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    I64(i64),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

/// Bind a slice of values onto a query, in order.
pub fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value.clone() {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::Timestamp(v) => query.bind(v),
        };
    }
    query
}

/// `bind_all` for queries that map rows into `O`.
pub fn bind_all_as<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    values: &[SqlValue],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    for value in values {
        query = match value.clone() {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::Timestamp(v) => query.bind(v),
        };
    }
    query
}

/// ===============================
/// Partial UPDATE builder
/// ===============================
/// Column names are `&'static str` so only code, never request
/// payloads, decides which columns appear in the statement.
#[derive(Debug)]
pub struct UpdateBuilder {
    table: &'static str,
    columns: Vec<&'static str>,
    values: Vec<SqlValue>,
}

impl UpdateBuilder {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) -> &mut Self {
        self.columns.push(column);
        self.values.push(value.into());
        self
    }

    pub fn set_opt<V: Into<SqlValue>>(
        &mut self,
        column: &'static str,
        value: Option<V>,
    ) -> &mut Self {
        if let Some(v) = value {
            self.set(column, v);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `UPDATE <table> SET a = ?, b = ? WHERE id = ?` and its bindings.
    pub fn build(&self, id: i64) -> (String, Vec<SqlValue>) {
        let set_clause = self
            .columns
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, set_clause);

        let mut values = self.values.clone();
        values.push(SqlValue::I64(id));
        (sql, values)
    }

    /// Returns rows affected; 0 means no row with that id.
    pub async fn execute(&self, pool: &SqlitePool, id: i64) -> Result<u64, sqlx::Error> {
        if self.is_empty() {
            return Ok(0);
        }
        let (sql, values) = self.build(id);
        tracing::debug!(sql = %sql, "Executing update");

        let result = bind_all(sqlx::query(&sql), &values).execute(pool).await?;
        Ok(result.rows_affected())
    }
}
