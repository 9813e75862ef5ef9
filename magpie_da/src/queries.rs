use chrono::Utc;
use serde::Serialize;

/// The only activity kind the reconciler writes today.
pub const ACTION_FAVE: &str = "fave";

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn to_json<T: Serialize>(value: &Option<T>) -> Option<String> {
    value.as_ref().and_then(|v| serde_json::to_string(v).ok())
}

fn slice_json<T: Serialize>(values: &[T]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        serde_json::to_string(values).ok()
    }
}

pub mod user {
    use snafu::ResultExt;
    use sqlx::{query, SqliteExecutor};

    use super::{now, to_json};
    use crate::{error, models::User, Result};

    pub async fn upsert(user: &User, e: impl SqliteExecutor<'_>) -> Result<()> {
        query(
            "
            insert into users (userid, username, usericon, kind, profile, stats, created_at, updated_at)
            values (?, ?, ?, ?, ?, ?, ?, ?)
            on conflict (userid) do update set
                username = excluded.username,
                usericon = excluded.usericon,
                kind = excluded.kind,
                profile = coalesce(excluded.profile, users.profile),
                stats = coalesce(excluded.stats, users.stats),
                updated_at = excluded.updated_at
            ",
        )
        .bind(&user.userid)
        .bind(&user.username)
        .bind(&user.usericon)
        .bind(&user.kind)
        .bind(to_json(&user.profile))
        .bind(to_json(&user.stats))
        .bind(now())
        .bind(now())
        .execute(e)
        .await
        .context(error::Database)?;
        Ok(())
    }
}

pub mod deviation {
    use std::collections::BTreeSet;

    use chrono::{Duration, Utc};
    use magpie_core::query::QuerySpec;
    use snafu::ResultExt;
    use sqlx::{query, Row, SqliteExecutor, SqlitePool};

    use super::{now, slice_json, to_json};
    use crate::{
        error,
        models::{Deviation, Stats},
        Result,
    };

    pub async fn exists(deviationid: &str, e: impl SqliteExecutor<'_>) -> Result<bool> {
        Ok(query("select 1 from deviations where deviationid = ?")
            .bind(deviationid)
            .fetch_optional(e)
            .await
            .context(error::Database)?
            .is_some())
    }

    /// Upsert from a gallery listing row. Re-observation clears an earlier
    /// tombstone; precise stats stay untouched until the metadata stage
    /// pushes them.
    pub async fn upsert(d: &Deviation, e: impl SqliteExecutor<'_>) -> Result<()> {
        query(
            "
            insert into deviations (deviationid, title, url, userid, published_time,
                is_deleted, is_published, is_pinned, is_mature, is_downloadable,
                allows_comments, favourites, comments, preview, content, thumbs,
                videos, excerpt, created_at, updated_at)
            values (?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            on conflict (deviationid) do update set
                title = excluded.title,
                url = excluded.url,
                userid = coalesce(excluded.userid, deviations.userid),
                published_time = coalesce(excluded.published_time, deviations.published_time),
                is_deleted = 0,
                is_published = excluded.is_published,
                is_pinned = excluded.is_pinned,
                is_mature = excluded.is_mature,
                is_downloadable = excluded.is_downloadable,
                allows_comments = excluded.allows_comments,
                favourites = coalesce(excluded.favourites, deviations.favourites),
                comments = coalesce(excluded.comments, deviations.comments),
                preview = excluded.preview,
                content = excluded.content,
                thumbs = excluded.thumbs,
                videos = excluded.videos,
                excerpt = excluded.excerpt,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&d.deviationid)
        .bind(&d.title)
        .bind(&d.url)
        .bind(d.author.as_ref().map(|a| a.userid.clone()))
        .bind(d.published_time)
        .bind(d.is_published)
        .bind(d.is_pinned)
        .bind(d.is_mature)
        .bind(d.is_downloadable)
        .bind(d.allows_comments)
        .bind(d.stats.as_ref().map(|s| s.favourites))
        .bind(d.stats.as_ref().map(|s| s.comments))
        .bind(to_json(&d.preview))
        .bind(to_json(&d.content))
        .bind(to_json(&d.thumbs))
        .bind(to_json(&d.videos))
        .bind(&d.excerpt)
        .bind(now())
        .bind(now())
        .execute(e)
        .await
        .context(error::Database)?;
        Ok(())
    }

    /// Push precise engagement numbers from a metadata snapshot back onto
    /// the listing row.
    pub async fn update_stats(
        deviationid: &str,
        stats: &Stats,
        e: impl SqliteExecutor<'_>,
    ) -> Result<()> {
        query(
            "
            update deviations
            set favourites = ?, comments = ?, views = ?, downloads = ?, updated_at = ?
            where deviationid = ?
            ",
        )
        .bind(stats.favourites)
        .bind(stats.comments)
        .bind(stats.views)
        .bind(stats.downloads)
        .bind(now())
        .bind(deviationid)
        .execute(e)
        .await
        .context(error::Database)?;
        Ok(())
    }

    /// Marks every stored, live deviation absent from `seen` as deleted.
    /// Rows and their activity stay queryable.
    pub async fn tombstone_missing(seen: &BTreeSet<String>, db: &SqlitePool) -> Result<u64> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "update deviations set is_deleted = 1, updated_at = ",
        );
        builder.push_bind(now());
        builder.push(" where is_deleted = 0");
        if !seen.is_empty() {
            builder.push(" and deviationid not in (");
            let mut ids = builder.separated(", ");
            for id in seen {
                ids.push_bind(id);
            }
            builder.push(")");
        }
        let result = builder
            .build()
            .execute(db)
            .await
            .context(error::Database)?;
        Ok(result.rows_affected())
    }

    /// Ids whose metadata snapshot is missing or older than the window.
    pub async fn stale_metadata_ids(window_days: i64, db: &SqlitePool) -> Result<Vec<String>> {
        let cutoff = (Utc::now() - Duration::days(window_days)).to_rfc3339();
        let rows = QuerySpec::new("deviations")
            .select(&["deviations.deviationid as deviationid"])
            .join("left join deviation_metadata on deviation_metadata.deviationid = deviations.deviationid")
            .filter("deviations.is_deleted = 0", [])
            .filter(
                "(deviation_metadata.deviationid is null or deviation_metadata.updated_at < ?)",
                [cutoff.into()],
            )
            .order_by("deviations.published_time desc")
            .fetch_all(db)
            .await
            .context(error::Database)?;
        Ok(rows.iter().map(|r| r.get("deviationid")).collect())
    }

    pub async fn metadata_upsert(
        m: &crate::models::DeviationMetadata,
        e: impl SqliteExecutor<'_>,
    ) -> Result<()> {
        let collections: Vec<&str> = m.collections.iter().map(|f| f.folderid.as_str()).collect();
        let galleries: Vec<&str> = m.galleries.iter().map(|f| f.folderid.as_str()).collect();
        query(
            "
            insert into deviation_metadata (deviationid, printid, userid, title,
                description, license, allows_comments, tags, is_favourited, is_mature,
                mature_level, mature_classification, submission, views, views_today,
                favourites, comments, downloads, collections, galleries,
                can_post_comment, created_at, updated_at)
            values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            on conflict (deviationid) do update set
                printid = excluded.printid,
                userid = excluded.userid,
                title = excluded.title,
                description = excluded.description,
                license = excluded.license,
                allows_comments = excluded.allows_comments,
                tags = excluded.tags,
                is_favourited = excluded.is_favourited,
                is_mature = excluded.is_mature,
                mature_level = excluded.mature_level,
                mature_classification = excluded.mature_classification,
                submission = excluded.submission,
                views = excluded.views,
                views_today = excluded.views_today,
                favourites = excluded.favourites,
                comments = excluded.comments,
                downloads = excluded.downloads,
                collections = excluded.collections,
                galleries = excluded.galleries,
                can_post_comment = excluded.can_post_comment,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&m.deviationid)
        .bind(&m.printid)
        .bind(&m.author.userid)
        .bind(&m.title)
        .bind(&m.description)
        .bind(&m.license)
        .bind(m.allows_comments)
        .bind(slice_json(&m.tags))
        .bind(m.is_favourited)
        .bind(m.is_mature)
        .bind(&m.mature_level)
        .bind(to_json(&m.mature_classification))
        .bind(to_json(&m.submission))
        .bind(m.stats.as_ref().map(|s| s.views))
        .bind(m.stats.as_ref().and_then(|s| s.views_today))
        .bind(m.stats.as_ref().map(|s| s.favourites))
        .bind(m.stats.as_ref().map(|s| s.comments))
        .bind(m.stats.as_ref().map(|s| s.downloads))
        .bind(slice_json(&collections))
        .bind(slice_json(&galleries))
        .bind(m.can_post_comment)
        .bind(now())
        .bind(now())
        .execute(e)
        .await
        .context(error::Database)?;
        Ok(())
    }
}

pub mod folder {
    use snafu::ResultExt;
    use sqlx::{query, SqliteExecutor};

    use super::now;
    use crate::{error, models::Folder, Result};

    pub async fn upsert(folder: &Folder, kind: &str, e: impl SqliteExecutor<'_>) -> Result<()> {
        query(
            "
            insert into folders (folderid, kind, name, created_at, updated_at)
            values (?, ?, ?, ?, ?)
            on conflict (folderid) do update set
                kind = excluded.kind,
                name = excluded.name,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&folder.folderid)
        .bind(kind)
        .bind(&folder.name)
        .bind(now())
        .bind(now())
        .execute(e)
        .await
        .context(error::Database)?;
        Ok(())
    }
}

pub mod activity {
    use magpie_core::query::QuerySpec;
    use snafu::ResultExt;
    use sqlx::{query, Row, SqliteExecutor, SqlitePool};

    use super::{now, ACTION_FAVE};
    use crate::{error, Result};

    /// A deviation whose stored fave-event count disagrees with the
    /// favourites number in its metadata snapshot.
    #[derive(Debug, Clone)]
    pub struct FavoriteDrift {
        pub deviationid: String,
        pub reported: i64,
        pub stored: i64,
    }

    pub async fn insert_fave(
        deviationid: &str,
        userid: &str,
        time: i64,
        e: impl SqliteExecutor<'_>,
    ) -> Result<()> {
        query(
            "
            insert or ignore into deviation_activity (deviationid, userid, action, time, created_at)
            values (?, ?, ?, ?, ?)
            ",
        )
        .bind(deviationid)
        .bind(userid)
        .bind(ACTION_FAVE)
        .bind(time)
        .bind(now())
        .execute(e)
        .await
        .context(error::Database)?;
        Ok(())
    }

    pub async fn count_faves(deviationid: &str, e: impl SqliteExecutor<'_>) -> Result<i64> {
        let row = query(
            "select count(*) as n from deviation_activity where deviationid = ? and action = ?",
        )
        .bind(deviationid)
        .bind(ACTION_FAVE)
        .fetch_one(e)
        .await
        .context(error::Database)?;
        Ok(row.get("n"))
    }

    pub async fn delete_faves(deviationid: &str, e: impl SqliteExecutor<'_>) -> Result<u64> {
        let result = query("delete from deviation_activity where deviationid = ? and action = ?")
            .bind(deviationid)
            .bind(ACTION_FAVE)
            .execute(e)
            .await
            .context(error::Database)?;
        Ok(result.rows_affected())
    }

    /// Every deviation whose event count drifted from the snapshot number.
    pub async fn favorite_drift(db: &SqlitePool) -> Result<Vec<FavoriteDrift>> {
        let rows = QuerySpec::new("deviation_metadata")
            .select(&[
                "deviation_metadata.deviationid as deviationid",
                "deviation_metadata.favourites as reported",
                "count(deviation_activity.userid) as stored",
            ])
            .join_with(
                "left join deviation_activity \
                 on deviation_activity.deviationid = deviation_metadata.deviationid \
                 and deviation_activity.action = ?",
                [ACTION_FAVE.into()],
            )
            .filter("deviation_metadata.favourites is not null", [])
            .group_by(&[
                "deviation_metadata.deviationid",
                "deviation_metadata.favourites",
            ])
            .having(
                "count(deviation_activity.userid) <> deviation_metadata.favourites",
                [],
            )
            .fetch_all(db)
            .await
            .context(error::Database)?;
        Ok(rows
            .iter()
            .map(|r| FavoriteDrift {
                deviationid: r.get("deviationid"),
                reported: r.get("reported"),
                stored: r.get("stored"),
            })
            .collect())
    }
}

pub mod feed {
    use magpie_core::query::QuerySpec;
    use snafu::ResultExt;
    use sqlx::{query, Row, SqliteExecutor, SqlitePool};

    use super::now;
    use crate::{error, models::FeedItem, Result};

    /// A stack whose stored message count disagrees with its declared size.
    #[derive(Debug, Clone)]
    pub struct StackProgress {
        pub stackid: String,
        pub declared: i64,
        pub stored: i64,
    }

    pub async fn exists(messageid: &str, e: impl SqliteExecutor<'_>) -> Result<bool> {
        Ok(query("select 1 from feed_messages where messageid = ?")
            .bind(messageid)
            .fetch_optional(e)
            .await
            .context(error::Database)?
            .is_some())
    }

    /// A message counts as expanded once it carries its own timestamp.
    pub async fn exists_expanded(messageid: &str, e: impl SqliteExecutor<'_>) -> Result<bool> {
        Ok(
            query("select 1 from feed_messages where messageid = ? and ts is not null")
                .bind(messageid)
                .fetch_optional(e)
                .await
                .context(error::Database)?
                .is_some(),
        )
    }

    /// `stack` overrides the item's own stackid during stack expansion.
    pub async fn upsert(
        item: &FeedItem,
        stack: Option<&str>,
        e: impl SqliteExecutor<'_>,
    ) -> Result<()> {
        let stackid = stack.or(item.stackid.as_deref());
        query(
            "
            insert into feed_messages (messageid, kind, ts, userid, deviationid,
                stackid, stack_size, created_at, updated_at)
            values (?, ?, ?, ?, ?, ?, ?, ?, ?)
            on conflict (messageid) do update set
                kind = excluded.kind,
                ts = coalesce(excluded.ts, feed_messages.ts),
                userid = coalesce(excluded.userid, feed_messages.userid),
                deviationid = coalesce(excluded.deviationid, feed_messages.deviationid),
                stackid = coalesce(excluded.stackid, feed_messages.stackid),
                stack_size = coalesce(excluded.stack_size, feed_messages.stack_size),
                updated_at = excluded.updated_at
            ",
        )
        .bind(&item.messageid)
        .bind(&item.kind)
        .bind(item.ts.map(|t| t.to_rfc3339()))
        .bind(item.by_user.as_ref().map(|u| u.userid.clone()))
        .bind(item.deviation_id())
        .bind(stackid)
        .bind(item.stack_size)
        .bind(now())
        .bind(now())
        .execute(e)
        .await
        .context(error::Database)?;
        Ok(())
    }

    pub async fn count_in_stack(stackid: &str, e: impl SqliteExecutor<'_>) -> Result<i64> {
        let row = query("select count(*) as n from feed_messages where stackid = ?")
            .bind(stackid)
            .fetch_one(e)
            .await
            .context(error::Database)?;
        Ok(row.get("n"))
    }

    pub async fn incomplete_stacks(db: &SqlitePool) -> Result<Vec<StackProgress>> {
        let rows = QuerySpec::new("feed_messages")
            .select(&[
                "stackid",
                "max(stack_size) as declared",
                "count(*) as stored",
            ])
            .filter("stackid is not null", [])
            .group_by(&["stackid"])
            .having("count(*) <> max(stack_size)", [])
            .fetch_all(db)
            .await
            .context(error::Database)?;
        Ok(rows
            .iter()
            .map(|r| StackProgress {
                stackid: r.get("stackid"),
                declared: r.get("declared"),
                stored: r.get("stored"),
            })
            .collect())
    }
}
