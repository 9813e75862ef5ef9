//! Declared table layout for an account replica database.
//!
//! The migration engine compares these declarations against the live file
//! on startup, so adding a column here is all a layout change takes.

use magpie_core::schema::{
    ColumnDef,
    ColumnType::{Boolean, Integer, Json, Text, Timestamp},
    IndexDef, TableDef,
};

pub fn tables() -> Vec<TableDef> {
    vec![
        users(),
        deviations(),
        deviation_metadata(),
        folders(),
        deviation_activity(),
        feed_messages(),
    ]
}

fn users() -> TableDef {
    TableDef::new(
        "users",
        vec![
            ColumnDef::new("userid", Text).not_null().primary_key(),
            ColumnDef::new("username", Text).not_null(),
            ColumnDef::new("usericon", Text),
            ColumnDef::new("kind", Text),
            ColumnDef::new("profile", Json),
            ColumnDef::new("stats", Json),
            ColumnDef::new("created_at", Timestamp).not_null(),
            ColumnDef::new("updated_at", Timestamp).not_null(),
        ],
    )
}

fn deviations() -> TableDef {
    TableDef::new(
        "deviations",
        vec![
            ColumnDef::new("deviationid", Text).not_null().primary_key(),
            ColumnDef::new("title", Text),
            ColumnDef::new("url", Text),
            ColumnDef::new("userid", Text),
            ColumnDef::new("published_time", Integer),
            ColumnDef::new("is_deleted", Boolean).not_null().default_value("0"),
            ColumnDef::new("is_published", Boolean),
            ColumnDef::new("is_pinned", Boolean),
            ColumnDef::new("is_mature", Boolean),
            ColumnDef::new("is_downloadable", Boolean),
            ColumnDef::new("allows_comments", Boolean),
            ColumnDef::new("favourites", Integer),
            ColumnDef::new("comments", Integer),
            ColumnDef::new("views", Integer),
            ColumnDef::new("downloads", Integer),
            ColumnDef::new("preview", Json),
            ColumnDef::new("content", Json),
            ColumnDef::new("thumbs", Json),
            ColumnDef::new("videos", Json),
            ColumnDef::new("excerpt", Text),
            ColumnDef::new("created_at", Timestamp).not_null(),
            ColumnDef::new("updated_at", Timestamp).not_null(),
        ],
    )
    .index(IndexDef::new("idx_deviations_userid", &["userid"]))
}

fn deviation_metadata() -> TableDef {
    TableDef::new(
        "deviation_metadata",
        vec![
            ColumnDef::new("deviationid", Text).not_null().primary_key(),
            ColumnDef::new("printid", Text),
            ColumnDef::new("userid", Text),
            ColumnDef::new("title", Text),
            ColumnDef::new("description", Text),
            ColumnDef::new("license", Text),
            ColumnDef::new("allows_comments", Boolean),
            ColumnDef::new("tags", Json),
            ColumnDef::new("is_favourited", Boolean),
            ColumnDef::new("is_mature", Boolean),
            ColumnDef::new("mature_level", Text),
            ColumnDef::new("mature_classification", Json),
            ColumnDef::new("submission", Json),
            ColumnDef::new("views", Integer),
            ColumnDef::new("views_today", Integer),
            ColumnDef::new("favourites", Integer),
            ColumnDef::new("comments", Integer),
            ColumnDef::new("downloads", Integer),
            ColumnDef::new("collections", Json),
            ColumnDef::new("galleries", Json),
            ColumnDef::new("can_post_comment", Boolean),
            ColumnDef::new("created_at", Timestamp).not_null(),
            ColumnDef::new("updated_at", Timestamp).not_null(),
        ],
    )
}

/// Collection and gallery folders share a table, discriminated by `kind`.
fn folders() -> TableDef {
    TableDef::new(
        "folders",
        vec![
            ColumnDef::new("folderid", Text).not_null().primary_key(),
            ColumnDef::new("kind", Text).not_null(),
            ColumnDef::new("name", Text),
            ColumnDef::new("created_at", Timestamp).not_null(),
            ColumnDef::new("updated_at", Timestamp).not_null(),
        ],
    )
}

fn deviation_activity() -> TableDef {
    TableDef::new(
        "deviation_activity",
        vec![
            ColumnDef::new("deviationid", Text).not_null().primary_key(),
            ColumnDef::new("userid", Text).not_null().primary_key(),
            ColumnDef::new("action", Text).not_null().primary_key(),
            ColumnDef::new("time", Integer).not_null().primary_key(),
            ColumnDef::new("created_at", Timestamp).not_null(),
        ],
    )
}

fn feed_messages() -> TableDef {
    TableDef::new(
        "feed_messages",
        vec![
            ColumnDef::new("messageid", Text).not_null().primary_key(),
            ColumnDef::new("kind", Text),
            // NULL until the message's stack is expanded.
            ColumnDef::new("ts", Timestamp),
            ColumnDef::new("userid", Text),
            ColumnDef::new("deviationid", Text),
            ColumnDef::new("stackid", Text),
            ColumnDef::new("stack_size", Integer),
            ColumnDef::new("created_at", Timestamp).not_null(),
            ColumnDef::new("updated_at", Timestamp).not_null(),
        ],
    )
    .index(IndexDef::new("idx_feed_messages_stackid", &["stackid"]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie_core::schema::{diff_table, introspect, migrate};

    #[tokio::test]
    async fn replica_schema_applies_and_settles() {
        let db = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let declared = tables();
        migrate(&db, &declared).await.unwrap();

        for table in &declared {
            let actual = introspect(&db, &table.name)
                .await
                .unwrap()
                .unwrap_or_else(|| panic!("table {} missing after migrate", table.name));
            assert!(
                diff_table(&actual, table).is_noop(),
                "table {} drifts right after creation",
                table.name
            );
        }
    }
}
