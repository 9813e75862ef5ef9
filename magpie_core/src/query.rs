//! Parameter-binding query construction.
//!
//! A [`QuerySpec`] is an immutable description of a SELECT statement: every
//! builder method consumes the value and returns a new one, and every value is
//! carried as a bind parameter, never interpolated into the SQL text.

use sqlx::{sqlite::SqliteRow, SqlitePool};

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl From<i64> for Bind {
    fn from(v: i64) -> Self {
        Bind::Int(v)
    }
}

impl From<&str> for Bind {
    fn from(v: &str) -> Self {
        Bind::Text(v.to_string())
    }
}

impl From<String> for Bind {
    fn from(v: String) -> Self {
        Bind::Text(v)
    }
}

impl From<bool> for Bind {
    fn from(v: bool) -> Self {
        Bind::Bool(v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    table: String,
    columns: Vec<String>,
    joins: Vec<String>,
    join_binds: Vec<Bind>,
    wheres: Vec<String>,
    where_binds: Vec<Bind>,
    group_by: Vec<String>,
    having: Vec<String>,
    having_binds: Vec<Bind>,
    order_by: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl QuerySpec {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Raw join clause, e.g. `left join activity using (deviationid)`.
    pub fn join(mut self, clause: &str) -> Self {
        self.joins.push(clause.to_string());
        self
    }

    pub fn left_join(self, table: &str, using: &str) -> Self {
        let clause = format!("left join {table} using ({using})");
        self.join(&clause)
    }

    /// Join clause with `?` placeholders, e.g. an `on ... and kind = ?`
    /// condition. Join binds come before any where/having binds.
    pub fn join_with(mut self, clause: &str, binds: impl IntoIterator<Item = Bind>) -> Self {
        self.joins.push(clause.to_string());
        self.join_binds.extend(binds);
        self
    }

    /// Condition with `?` placeholders, bound in order.
    pub fn filter(mut self, condition: &str, binds: impl IntoIterator<Item = Bind>) -> Self {
        self.wheres.push(condition.to_string());
        self.where_binds.extend(binds);
        self
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn having(mut self, condition: &str, binds: impl IntoIterator<Item = Bind>) -> Self {
        self.having.push(condition.to_string());
        self.having_binds.extend(binds);
        self
    }

    pub fn order_by(mut self, expr: &str) -> Self {
        self.order_by.push(expr.to_string());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn sql(&self) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        let mut sql = format!("select {} from {}", columns, self.table);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.wheres.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&self.wheres.join(" and "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" group by ");
            sql.push_str(&self.group_by.join(", "));
        }
        if !self.having.is_empty() {
            sql.push_str(" having ");
            sql.push_str(&self.having.join(" and "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" order by ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" limit {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" offset {offset}"));
        }
        sql
    }

    /// Binds in placeholder order: joins, then where, then having clauses.
    pub fn binds(&self) -> Vec<Bind> {
        let mut binds = self.join_binds.clone();
        binds.extend(self.where_binds.clone());
        binds.extend(self.having_binds.clone());
        binds
    }

    pub async fn fetch_all(&self, db: &SqlitePool) -> sqlx::Result<Vec<SqliteRow>> {
        let sql = self.sql();
        let mut query = sqlx::query(&sql);
        for bind in self.binds() {
            query = match bind {
                Bind::Int(v) => query.bind(v),
                Bind::Real(v) => query.bind(v),
                Bind::Text(v) => query.bind(v),
                Bind::Bool(v) => query.bind(v),
                Bind::Null => query.bind(None::<String>),
            };
        }
        query.fetch_all(db).await
    }
}
