//! Schema registry and migration generator.
//!
//! Tables are declared in code as [`TableDef`] values. At startup the actual
//! layout is read back from the store (`PRAGMA table_info` and friends),
//! diffed against the declaration, and a DDL script is produced that brings
//! the store in line without discarding rows. SQLite cannot alter a column's
//! type, nullability, default or primary-key membership in place, so those
//! changes go through a shadow-table rebuild that copies the common columns
//! forward.

use log::{debug, warn};
use snafu::{ResultExt, Snafu};
use sqlx::{Row, SqlitePool};
use std::{collections::BTreeSet, time::Instant};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("database error during migration: {source}"))]
    Database { source: sqlx::Error },
}
type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Timestamp,
    Json,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Json => "JSON",
        }
    }

    /// Parse a declared type back out of `PRAGMA table_info`.
    pub fn parse(s: &str) -> ColumnType {
        match s.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" => ColumnType::Integer,
            "REAL" | "DOUBLE" | "FLOAT" | "NUMERIC" => ColumnType::Real,
            "BLOB" => ColumnType::Blob,
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "TIMESTAMP" | "DATETIME" | "DATE" => ColumnType::Timestamp,
            "JSON" | "JSONB" => ColumnType::Json,
            _ => ColumnType::Text,
        }
    }
}

/// Whether a stored value of `from` survives a copy into a column of `to`.
///
/// SQLite affinities convert freely between the textual and numeric types;
/// only BLOB payloads have no meaningful representation elsewhere.
pub fn coercible(from: ColumnType, to: ColumnType) -> bool {
    from == to || (from != ColumnType::Blob && to != ColumnType::Blob)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub not_null: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            not_null: false,
            default: None,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// SQL literal used as the column default, e.g. `0` or `''`.
    pub fn default_value(mut self, literal: &str) -> Self {
        self.default = Some(literal.to_string());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    fn sql(&self) -> String {
        let mut def = format!("\"{}\" {}", self.name, self.ty.sql());
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        if let Some(ref default) = self.default {
            def.push_str(&format!(" DEFAULT {default}"));
        }
        def
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn create_sql(&self, table: &str) -> String {
        let unique = if self.unique { "UNIQUE " } else { "" };
        let columns = quoted_list(&self.columns);
        format!(
            "CREATE {unique}INDEX \"{}\" ON \"{table}\" ({columns});",
            self.name
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            indexes: vec![],
        }
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// CREATE TABLE under this definition. Unique indexes are embedded as
    /// table constraints; non-unique indexes are separate statements.
    pub fn create_sql(&self, table_name: &str) -> String {
        let mut items: Vec<String> = self.columns.iter().map(|c| c.sql()).collect();
        let pk = self.primary_key_columns();
        if !pk.is_empty() {
            items.push(format!(
                "PRIMARY KEY ({})",
                quoted_list_str(&pk)
            ));
        }
        for index in self.indexes.iter().filter(|i| i.unique) {
            items.push(format!("UNIQUE ({})", quoted_list(&index.columns)));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS \"{table_name}\" ({});",
            items.join(", ")
        )
    }

    fn nonunique_index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .filter(|i| !i.unique)
            .map(|i| i.create_sql(&self.name))
            .collect()
    }
}

fn quoted_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quoted_list_str(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStep {
    Sql(String),
    /// Surfaced in the script but never executed.
    Comment(String),
}

#[derive(Debug, Clone, Default)]
pub struct MigrationScript {
    pub steps: Vec<MigrationStep>,
    /// Set when part of the migration could not be expressed safely; the
    /// remaining steps are comments explaining what was left undone.
    pub incomplete: bool,
}

impl MigrationScript {
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty() && !self.incomplete
    }

    fn sql(&mut self, statement: String) {
        self.steps.push(MigrationStep::Sql(statement));
    }

    fn comment(&mut self, text: String) {
        self.steps.push(MigrationStep::Comment(text));
    }
}

/// Read the actual definition of `table` back from the store.
///
/// Table names come from our own declarations, never from user input, so
/// interpolating them into PRAGMA statements is safe.
pub async fn introspect(db: &SqlitePool, table: &str) -> Result<Option<TableDef>> {
    let exists = sqlx::query("select name from sqlite_master where type = 'table' and name = ?")
        .bind(table)
        .fetch_optional(db)
        .await
        .context(Database)?
        .is_some();
    if !exists {
        return Ok(None);
    }

    let mut columns = vec![];
    // table_info rows: cid, name, type, notnull, dflt_value, pk
    let mut info = sqlx::query(&format!("PRAGMA table_info(\"{table}\")"))
        .fetch_all(db)
        .await
        .context(Database)?;
    info.sort_by_key(|row| row.get::<i64, _>("cid"));
    for row in &info {
        columns.push(ColumnDef {
            name: row.get("name"),
            ty: ColumnType::parse(&row.get::<String, _>("type")),
            not_null: row.get::<i64, _>("notnull") != 0,
            default: row.get::<Option<String>, _>("dflt_value"),
            primary_key: row.get::<i64, _>("pk") != 0,
        });
    }

    let mut indexes = vec![];
    let index_list = sqlx::query(&format!("PRAGMA index_list(\"{table}\")"))
        .fetch_all(db)
        .await
        .context(Database)?;
    for row in &index_list {
        // Skip the implicit primary-key index; it is described by table_info.
        if row.get::<String, _>("origin") == "pk" {
            continue;
        }
        let name: String = row.get("name");
        let unique = row.get::<i64, _>("unique") != 0;
        let info = sqlx::query(&format!("PRAGMA index_info(\"{name}\")"))
            .fetch_all(db)
            .await
            .context(Database)?;
        let mut index_columns: Vec<(i64, String)> = info
            .iter()
            .map(|r| (r.get::<i64, _>("seqno"), r.get::<String, _>("name")))
            .collect();
        index_columns.sort();
        indexes.push(IndexDef {
            name,
            columns: index_columns.into_iter().map(|(_, c)| c).collect(),
            unique,
        });
    }

    Ok(Some(TableDef {
        name: table.to_string(),
        columns,
        indexes,
    }))
}

/// Generate the script transforming `actual` into `declared`.
///
/// An empty script is the expected outcome for an up-to-date table.
pub fn diff_table(actual: &TableDef, declared: &TableDef) -> MigrationScript {
    let mut script = MigrationScript::default();
    let table = &declared.name;

    let actual_names: BTreeSet<&str> = actual.columns.iter().map(|c| c.name.as_str()).collect();
    let declared_names: BTreeSet<&str> =
        declared.columns.iter().map(|c| c.name.as_str()).collect();
    let common: Vec<&str> = declared
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .filter(|n| actual_names.contains(n))
        .collect();

    let mut rebuild = actual.primary_key_columns() != declared.primary_key_columns();
    for name in &common {
        let a = actual.column(name).unwrap();
        let d = declared.column(name).unwrap();
        if a.ty != d.ty || a.not_null != d.not_null || a.default != d.default {
            rebuild = true;
        }
    }
    // A new NOT NULL column without a default cannot be added in place.
    for column in &declared.columns {
        if !actual_names.contains(column.name.as_str())
            && column.not_null
            && column.default.is_none()
        {
            rebuild = true;
        }
    }
    // Unique constraints embedded in the table definition leave behind
    // auto-indexes that cannot be dropped directly.
    for index in actual.indexes.iter().filter(|i| i.unique) {
        let declared_sets: Vec<_> = declared
            .indexes
            .iter()
            .filter(|i| i.unique)
            .map(|i| sorted(&i.columns))
            .collect();
        if !declared_sets.contains(&sorted(&index.columns))
            && index.name.starts_with("sqlite_autoindex")
        {
            rebuild = true;
        }
    }

    if rebuild {
        let mut copyable = vec![];
        let mut blocked = vec![];
        for name in &common {
            let from = actual.column(name).unwrap().ty;
            let to = declared.column(name).unwrap().ty;
            if coercible(from, to) {
                copyable.push(*name);
            } else {
                blocked.push((*name, from, to));
            }
        }
        if !blocked.is_empty() {
            for (name, from, to) in blocked {
                script.comment(format!(
                    "cannot coerce \"{table}\".\"{name}\" from {} to {}; \
                     rebuild skipped, migrate this column by hand",
                    from.sql(),
                    to.sql()
                ));
            }
            script.incomplete = true;
            return script;
        }

        let shadow = format!("new_{table}");
        script.sql(declared.create_sql(&shadow));
        if !copyable.is_empty() {
            let columns = quoted_list_str(&copyable);
            script.sql(format!(
                "INSERT INTO \"{shadow}\" ({columns}) SELECT {columns} FROM \"{table}\";"
            ));
        }
        script.sql(format!("DROP TABLE \"{table}\";"));
        script.sql(format!(
            "ALTER TABLE \"{shadow}\" RENAME TO \"{table}\";"
        ));
        for statement in declared.nonunique_index_sql() {
            script.sql(statement);
        }
        return script;
    }

    // In-place path: append, drop, and index churn.
    for column in &declared.columns {
        if !actual_names.contains(column.name.as_str()) {
            script.sql(format!(
                "ALTER TABLE \"{table}\" ADD COLUMN {};",
                column.sql()
            ));
        }
    }
    for column in &actual.columns {
        if !declared_names.contains(column.name.as_str()) {
            script.sql(format!(
                "ALTER TABLE \"{table}\" DROP COLUMN \"{}\";",
                column.name
            ));
        }
    }

    let declared_unique_sets: Vec<Vec<String>> = declared
        .indexes
        .iter()
        .filter(|i| i.unique)
        .map(|i| sorted(&i.columns))
        .collect();
    let actual_unique_sets: Vec<Vec<String>> = actual
        .indexes
        .iter()
        .filter(|i| i.unique)
        .map(|i| sorted(&i.columns))
        .collect();
    for index in declared.indexes.iter().filter(|i| i.unique) {
        if !actual_unique_sets.contains(&sorted(&index.columns)) {
            script.sql(index.create_sql(table));
        }
    }
    for index in actual.indexes.iter().filter(|i| i.unique) {
        if !declared_unique_sets.contains(&sorted(&index.columns)) {
            // Auto-indexes were already routed to the rebuild path above.
            script.sql(format!("DROP INDEX IF EXISTS \"{}\";", index.name));
        }
    }

    let declared_plain: BTreeSet<&str> = declared
        .indexes
        .iter()
        .filter(|i| !i.unique)
        .map(|i| i.name.as_str())
        .collect();
    let actual_plain: BTreeSet<&str> = actual
        .indexes
        .iter()
        .filter(|i| !i.unique)
        .map(|i| i.name.as_str())
        .collect();
    for index in declared.indexes.iter().filter(|i| !i.unique) {
        if !actual_plain.contains(index.name.as_str()) {
            script.sql(index.create_sql(table));
        }
    }
    for name in actual_plain.difference(&declared_plain) {
        script.sql(format!("DROP INDEX IF EXISTS \"{name}\";"));
    }

    script
}

fn sorted(columns: &[String]) -> Vec<String> {
    let mut v = columns.to_vec();
    v.sort();
    v
}

/// Bring every declared table in line with its definition. Runs once at
/// process start, before the harvester's first write.
pub async fn migrate(db: &SqlitePool, tables: &[TableDef]) -> Result<()> {
    debug!("migration started");
    let t = Instant::now();
    for declared in tables {
        match introspect(db, &declared.name).await? {
            None => {
                sqlx::query(&declared.create_sql(&declared.name))
                    .execute(db)
                    .await
                    .context(Database)?;
                for statement in declared.nonunique_index_sql() {
                    sqlx::query(&statement).execute(db).await.context(Database)?;
                }
                debug!("created table: {}", declared.name);
            }
            Some(actual) => {
                let script = diff_table(&actual, declared);
                if script.is_noop() {
                    continue;
                }
                if script.incomplete {
                    warn!("migration of table {} is incomplete", declared.name);
                }
                for step in &script.steps {
                    match step {
                        MigrationStep::Sql(statement) => {
                            debug!("migration: {statement}");
                            sqlx::query(statement).execute(db).await.context(Database)?;
                        }
                        MigrationStep::Comment(text) => warn!("migration: {text}"),
                    }
                }
            }
        }
    }
    debug!("migration finished: {:?}", t.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_steps(script: &MigrationScript) -> Vec<&str> {
        script
            .steps
            .iter()
            .filter_map(|s| match s {
                MigrationStep::Sql(sql) => Some(sql.as_str()),
                MigrationStep::Comment(_) => None,
            })
            .collect()
    }

    // One connection only: every new connection to :memory: is a new database.
    async fn memory_pool() -> SqlitePool {
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn simple_table(columns: Vec<ColumnDef>) -> TableDef {
        TableDef::new("t", columns)
    }

    #[tokio::test]
    async fn introspect_roundtrips_declaration() {
        let db = memory_pool().await;
        let declared = TableDef::new(
            "events",
            vec![
                ColumnDef::new("id", ColumnType::Text).primary_key(),
                ColumnDef::new("kind", ColumnType::Text).not_null(),
                ColumnDef::new("n", ColumnType::Integer).default_value("0"),
            ],
        )
        .index(IndexDef::new("ix_events_kind", &["kind"]));
        migrate(&db, &[declared.clone()]).await.unwrap();

        let actual = introspect(&db, "events").await.unwrap().unwrap();
        assert_eq!(actual.columns.len(), 3);
        assert_eq!(actual.primary_key_columns(), vec!["id"]);
        assert_eq!(actual.column("n").unwrap().default.as_deref(), Some("0"));
        assert!(actual.column("kind").unwrap().not_null);
        assert_eq!(actual.indexes.len(), 1);
        assert!(!actual.indexes[0].unique);

        // An up-to-date table diffs to the empty script.
        assert!(diff_table(&actual, &declared).is_noop());
    }

    #[tokio::test]
    async fn add_and_drop_preserve_shared_column() {
        let db = memory_pool().await;
        sqlx::query("create table t (a INTEGER, b TEXT)")
            .execute(&db)
            .await
            .unwrap();
        sqlx::query("insert into t (a, b) values (1, 'one'), (2, 'two')")
            .execute(&db)
            .await
            .unwrap();

        let declared = simple_table(vec![
            ColumnDef::new("b", ColumnType::Text),
            ColumnDef::new("c", ColumnType::Integer),
        ]);
        let actual = introspect(&db, "t").await.unwrap().unwrap();
        let script = diff_table(&actual, &declared);
        let steps = sql_steps(&script);
        assert_eq!(steps.len(), 2);
        assert!(steps[0].contains("ADD COLUMN \"c\""));
        assert!(steps[1].contains("DROP COLUMN \"a\""));

        migrate(&db, &[declared]).await.unwrap();
        let rows = sqlx::query("select b, c from t order by b")
            .fetch_all(&db)
            .await
            .unwrap();
        let values: Vec<(String, Option<i64>)> =
            rows.iter().map(|r| (r.get("b"), r.get("c"))).collect();
        assert_eq!(
            values,
            vec![("one".to_string(), None), ("two".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn type_change_takes_rebuild_path() {
        let db = memory_pool().await;
        sqlx::query("create table t (a INTEGER, b TEXT)")
            .execute(&db)
            .await
            .unwrap();
        sqlx::query("insert into t (a, b) values (9, '41'), (8, '42')")
            .execute(&db)
            .await
            .unwrap();

        let declared = simple_table(vec![
            ColumnDef::new("b", ColumnType::Integer),
            ColumnDef::new("c", ColumnType::Text),
        ]);
        let actual = introspect(&db, "t").await.unwrap().unwrap();
        let script = diff_table(&actual, &declared);
        let steps = sql_steps(&script);
        assert!(steps[0].starts_with("CREATE TABLE IF NOT EXISTS \"new_t\""));
        assert!(steps
            .iter()
            .any(|s| s.contains("INSERT INTO \"new_t\" (\"b\") SELECT \"b\" FROM \"t\"")));
        assert!(steps.iter().any(|s| s.starts_with("DROP TABLE \"t\"")));
        assert!(steps
            .iter()
            .any(|s| s.contains("RENAME TO \"t\"")));

        migrate(&db, &[declared]).await.unwrap();
        let rows = sqlx::query("select b from t order by b")
            .fetch_all(&db)
            .await
            .unwrap();
        let values: Vec<i64> = rows.iter().map(|r| r.get("b")).collect();
        assert_eq!(values, vec![41, 42]);
    }

    #[tokio::test]
    async fn default_only_change_rebuilds_and_applies() {
        let db = memory_pool().await;
        sqlx::query("create table t (a INTEGER DEFAULT 0)")
            .execute(&db)
            .await
            .unwrap();
        sqlx::query("insert into t (a) values (7)")
            .execute(&db)
            .await
            .unwrap();

        // SQLite has no ALTER COLUMN; a changed default must go through the
        // shadow table like any other column change.
        let declared = simple_table(vec![ColumnDef::new("a", ColumnType::Integer)
            .default_value("1")]);
        let actual = introspect(&db, "t").await.unwrap().unwrap();
        let script = diff_table(&actual, &declared);
        let steps = sql_steps(&script);
        assert!(steps[0].starts_with("CREATE TABLE IF NOT EXISTS \"new_t\""));
        assert!(steps.iter().all(|s| !s.contains("ALTER COLUMN")));

        migrate(&db, &[declared.clone()]).await.unwrap();
        let actual = introspect(&db, "t").await.unwrap().unwrap();
        assert_eq!(actual.column("a").unwrap().default.as_deref(), Some("1"));
        assert!(diff_table(&actual, &declared).is_noop());

        // Existing rows survive; new rows pick up the new default.
        sqlx::query("insert into t default values")
            .execute(&db)
            .await
            .unwrap();
        let rows = sqlx::query("select a from t order by a")
            .fetch_all(&db)
            .await
            .unwrap();
        let values: Vec<i64> = rows.iter().map(|r| r.get("a")).collect();
        assert_eq!(values, vec![1, 7]);
    }

    #[tokio::test]
    async fn primary_key_change_takes_rebuild_path() {
        let db = memory_pool().await;
        sqlx::query("create table t (a TEXT, b TEXT, PRIMARY KEY (a))")
            .execute(&db)
            .await
            .unwrap();

        let declared = simple_table(vec![
            ColumnDef::new("a", ColumnType::Text).primary_key(),
            ColumnDef::new("b", ColumnType::Text).primary_key(),
        ]);
        let actual = introspect(&db, "t").await.unwrap().unwrap();
        let script = diff_table(&actual, &declared);
        assert!(sql_steps(&script)[0].contains("PRIMARY KEY (\"a\", \"b\")"));
    }

    #[tokio::test]
    async fn uncoercible_copy_surfaces_comment_instead_of_statement() {
        let db = memory_pool().await;
        sqlx::query("create table t (a BLOB)")
            .execute(&db)
            .await
            .unwrap();

        let declared = simple_table(vec![ColumnDef::new("a", ColumnType::Integer)]);
        let actual = introspect(&db, "t").await.unwrap().unwrap();
        let script = diff_table(&actual, &declared);
        assert!(script.incomplete);
        assert!(!script.is_noop());
        assert!(sql_steps(&script).is_empty());
        assert!(matches!(&script.steps[0], MigrationStep::Comment(c) if c.contains("coerce")));

        // The incomplete script must leave the table untouched.
        migrate(&db, &[declared]).await.unwrap();
        let actual = introspect(&db, "t").await.unwrap().unwrap();
        assert_eq!(actual.column("a").unwrap().ty, ColumnType::Blob);
    }

    #[tokio::test]
    async fn index_only_change_avoids_rebuild() {
        let db = memory_pool().await;
        let before = simple_table(vec![
            ColumnDef::new("a", ColumnType::Text).primary_key(),
            ColumnDef::new("b", ColumnType::Text),
        ]);
        migrate(&db, &[before.clone()]).await.unwrap();

        let after = before.index(IndexDef::new("ix_t_b", &["b"]));
        let actual = introspect(&db, "t").await.unwrap().unwrap();
        let script = diff_table(&actual, &after);
        let steps = sql_steps(&script);
        assert_eq!(steps.len(), 1);
        assert!(steps[0].starts_with("CREATE INDEX \"ix_t_b\""));

        migrate(&db, &[after.clone()]).await.unwrap();
        let actual = introspect(&db, "t").await.unwrap().unwrap();
        assert!(diff_table(&actual, &after).is_noop());
    }

    #[tokio::test]
    async fn migrate_twice_is_idempotent() {
        let db = memory_pool().await;
        let declared = TableDef::new(
            "activity",
            vec![
                ColumnDef::new("deviationid", ColumnType::Text).primary_key(),
                ColumnDef::new("userid", ColumnType::Text).primary_key(),
                ColumnDef::new("action", ColumnType::Text).primary_key(),
                ColumnDef::new("time", ColumnType::Integer).primary_key(),
            ],
        )
        .index(IndexDef::new("ix_activity_userid", &["userid"]));

        migrate(&db, &[declared.clone()]).await.unwrap();
        migrate(&db, &[declared.clone()]).await.unwrap();
        let actual = introspect(&db, "activity").await.unwrap().unwrap();
        assert!(diff_table(&actual, &declared).is_noop());
    }
}
