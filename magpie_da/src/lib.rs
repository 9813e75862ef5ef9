//! Incremental harvester for a deviantart account replica.
//!
//! [`run_sync`] drives five stages in order, each draining and committing
//! before the next: gallery crawl, metadata refresh, favorite
//! reconciliation, feed ingestion, feed-stack expansion. Every write is
//! idempotent, so an interrupted run picks up where it stopped.

use futures::Future;
use log::{debug, info, warn};
use magpie_core::config::Config;
use snafu::ResultExt;
use sqlx::SqlitePool;
use std::{
    collections::BTreeSet,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

pub mod api;
pub mod database;
pub mod models;
pub mod schema;

mod error;
mod queries;

pub use error::Error;
pub use queries::{activity::FavoriteDrift, feed::StackProgress};

pub(crate) type Result<T> = std::result::Result<T, Error>;

use api::{ApiResult, DaApi, Page, Session, GALLERY_PAGE_LIMIT};
use models::{Deviation, FeedItem, Reactor};

const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(5);

fn limit_reached<T>(limit: Option<T>, items_sent: T) -> bool
where
    T: std::cmp::PartialOrd,
{
    if let Some(limit) = limit {
        items_sent >= limit
    } else {
        false
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Walk the gallery to exhaustion and tombstone unlisted rows instead
    /// of stopping at the first known id.
    pub full: bool,
    pub start_offset: i64,
    /// Overrides the configured gallery folder.
    pub gallery: Option<String>,
    /// Upper bound on gallery items processed this run.
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Gallery,
    Metadata,
    Favorites,
    Feed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlSummary {
    pub new_items: u32,
    pub tombstoned: u64,
}

/// Bundle of everything a sync stage needs: api client, replica pool,
/// config, and the immutable session value.
pub struct DaKit {
    pub api: DaApi,
    pub db: SqlitePool,
    pub config: Config,
    pub session: Session,
}

impl DaKit {
    /// Builds the api client, validates (or refreshes) the saved token,
    /// and persists the resulting session for the next run.
    pub async fn new(config: Config, db: SqlitePool) -> Result<Self> {
        let proxy = config
            .pxoxy(&config.deviantart.proxy_api)
            .context(error::Config)?;
        if proxy.is_some() {
            debug!("deviantart api proxy set");
        }
        let api = DaApi::new(proxy).context(error::Api)?;

        let token_path = config.token_path();
        let saved = Session::load(&token_path);
        let session = api
            .ensure_valid_token(&config.deviantart, saved)
            .await
            .context(error::Api)?;
        if let Err(e) = session.save(&token_path) {
            warn!("cannot save token file: {e}");
        }
        info!("deviantart session valid until {}", session.expires_at);

        Ok(Self {
            api,
            db,
            config,
            session,
        })
    }

    fn lock_path(&self) -> PathBuf {
        let mut path = self.config.database_path(None).into_os_string();
        path.push(".lock");
        path.into()
    }
}

/// Lock file next to the account database; at most one harvester touches a
/// replica at a time. A second invocation waits until the first finishes.
pub struct SyncGuard {
    path: PathBuf,
}

impl SyncGuard {
    pub fn try_acquire(path: &Path) -> std::io::Result<Option<SyncGuard>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Some(SyncGuard {
                    path: path.to_owned(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn acquire(path: &Path) -> std::io::Result<SyncGuard> {
        loop {
            if let Some(guard) = Self::try_acquire(path)? {
                return Ok(guard);
            }
            info!(
                "another sync holds {}, waiting for it to finish",
                path.to_string_lossy()
            );
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("cannot remove lock file {}: {e}", self.path.to_string_lossy());
        }
    }
}

fn stop_requested(stop: Option<&AtomicBool>) -> bool {
    stop.map(|s| s.load(Ordering::Relaxed)).unwrap_or(false)
}

/// Runs every stage in order under the sync lock. `stop` is checked
/// between stages only; a stage in progress always drains.
pub async fn run_sync(kit: &DaKit, opts: &SyncOptions, stop: Option<&AtomicBool>) -> Result<()> {
    let _guard = SyncGuard::acquire(&kit.lock_path())
        .await
        .context(error::SyncLock)?;

    crawl_gallery(kit, opts).await?;
    for stage in [Stage::Metadata, Stage::Favorites, Stage::Feed] {
        if stop_requested(stop) {
            info!("stop requested, ending sync early");
            return Ok(());
        }
        run_stage_inner(kit, stage, opts).await?;
    }
    Ok(())
}

/// Runs a single stage under the sync lock.
pub async fn run_stage(kit: &DaKit, stage: Stage, opts: &SyncOptions) -> Result<()> {
    let _guard = SyncGuard::acquire(&kit.lock_path())
        .await
        .context(error::SyncLock)?;
    run_stage_inner(kit, stage, opts).await
}

async fn run_stage_inner(kit: &DaKit, stage: Stage, opts: &SyncOptions) -> Result<()> {
    match stage {
        Stage::Gallery => {
            crawl_gallery(kit, opts).await?;
        }
        Stage::Metadata => refresh_metadata(kit).await?,
        Stage::Favorites => reconcile_favorites(kit).await?,
        Stage::Feed => {
            ingest_feed(kit).await?;
            expand_stacks(kit).await?;
        }
    }
    Ok(())
}

/// Stage 1: newest-first walk of the account gallery.
pub async fn crawl_gallery(kit: &DaKit, opts: &SyncOptions) -> Result<CrawlSummary> {
    let gallery = opts
        .gallery
        .clone()
        .unwrap_or_else(|| kit.config.deviantart.gallery.clone());
    let api = &kit.api;
    let session = &kit.session;
    let folder = gallery.as_str();
    crawl_gallery_with(&kit.db, opts, move |offset| async move {
        api.gallery(session, folder, offset, GALLERY_PAGE_LIMIT).await
    })
    .await
}

async fn crawl_gallery_with<F, Fut>(
    db: &SqlitePool,
    opts: &SyncOptions,
    mut fetch: F,
) -> Result<CrawlSummary>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = ApiResult<Page<Deviation>>>,
{
    let mut seen = BTreeSet::new();
    let mut offset = opts.start_offset;
    let mut new_items: u32 = 0;
    let mut found_known = false;
    let mut truncated = false;

    loop {
        info!("crawling gallery at offset {offset}");
        let page = fetch(offset).await.context(error::Api)?;
        let has_more = page.has_more;
        let next_offset = page.next_offset;

        let mut batch = vec![];
        for d in page.results {
            if !opts.full && queries::deviation::exists(&d.deviationid, db).await? {
                found_known = true;
                break;
            }
            seen.insert(d.deviationid.clone());
            batch.push(d);
        }
        new_items += batch.len() as u32;
        database::save_deviations(&batch, db).await?;

        if limit_reached(opts.limit, new_items) {
            truncated = true;
            break;
        }
        if found_known || !has_more {
            break;
        }
        offset = match next_offset {
            Some(o) => o,
            None => break,
        };
    }

    // Tombstoning needs the complete listing; a limit-truncated walk or one
    // started past offset 0 would mark every unvisited row as deleted.
    let tombstoned = if opts.full && !truncated && opts.start_offset == 0 {
        queries::deviation::tombstone_missing(&seen, db).await?
    } else {
        0
    };
    if tombstoned > 0 {
        warn!("{tombstoned} deviations no longer listed, marked deleted");
    }
    info!("gallery crawl done, {new_items} new deviations");
    Ok(CrawlSummary {
        new_items,
        tombstoned,
    })
}

/// Stage 2: refresh metadata snapshots that are missing or older than the
/// configured window.
pub async fn refresh_metadata(kit: &DaKit) -> Result<()> {
    let window = kit.config.deviantart.metadata_refresh_days;
    let ids = queries::deviation::stale_metadata_ids(window, &kit.db).await?;
    if ids.is_empty() {
        info!("all metadata snapshots are fresh");
        return Ok(());
    }
    info!("refreshing metadata for {} deviations", ids.len());
    let batch = kit
        .api
        .metadata(&kit.session, &ids)
        .await
        .context(error::Api)?;
    database::save_metadata(&batch, &kit.db).await
}

/// Stage 3: bring stored fave events in line with the snapshot numbers.
pub async fn reconcile_favorites(kit: &DaKit) -> Result<()> {
    let drifts = queries::activity::favorite_drift(&kit.db).await?;
    if drifts.is_empty() {
        info!("favorite events already match the snapshots");
        return Ok(());
    }
    info!("{} deviations with favorite drift", drifts.len());
    for drift in drifts {
        let api = &kit.api;
        let session = &kit.session;
        let id = drift.deviationid.clone();
        let id = id.as_str();
        reconcile_artwork(&kit.db, &drift, move |offset| async move {
            api.whofaved(session, id, offset).await
        })
        .await?;
    }
    Ok(())
}

async fn reconcile_artwork<F, Fut>(db: &SqlitePool, drift: &FavoriteDrift, mut fetch: F) -> Result<()>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = ApiResult<Page<Reactor>>>,
{
    let mut stored = drift.stored;
    if stored > drift.reported {
        // Only destructive step in the whole sync, scoped to the rows
        // re-fetched right below.
        warn!(
            "deviation {}: {stored} stored fave events exceed the reported {}, refetching",
            drift.deviationid, drift.reported
        );
        queries::activity::delete_faves(&drift.deviationid, db).await?;
        stored = 0;
    }

    // Resume where the stored events end: the listing is assumed stable
    // enough that offset equals the count already known.
    let mut offset = stored;
    while stored < drift.reported {
        let page = fetch(offset).await.context(error::Api)?;
        let has_more = page.has_more;
        let next_offset = page.next_offset;
        if page.results.is_empty() {
            break;
        }
        database::save_reactors(&drift.deviationid, &page.results, db).await?;
        stored = queries::activity::count_faves(&drift.deviationid, db).await?;
        if !has_more {
            break;
        }
        offset = next_offset.unwrap_or(stored);
    }
    Ok(())
}

/// Stage 4: newest-first feed walk, stopping at the first known message.
pub async fn ingest_feed(kit: &DaKit) -> Result<()> {
    let api = &kit.api;
    let session = &kit.session;
    ingest_feed_with(&kit.db, move |cursor: Option<String>| async move {
        api.feed(session, cursor.as_deref()).await
    })
    .await
}

async fn ingest_feed_with<F, Fut>(db: &SqlitePool, mut fetch: F) -> Result<()>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = ApiResult<Page<FeedItem>>>,
{
    let mut cursor: Option<String> = None;
    let mut ingested = 0u32;
    'pages: loop {
        let page = fetch(cursor).await.context(error::Api)?;
        let has_more = page.has_more;
        let next_cursor = page.cursor;
        if page.results.is_empty() {
            break;
        }
        for item in page.results {
            if queries::feed::exists(&item.messageid, db).await? {
                break 'pages;
            }
            database::save_feed_item(&item, None, db).await?;
            ingested += 1;
        }
        if !has_more || next_cursor.is_none() {
            break;
        }
        cursor = next_cursor;
    }
    info!("{ingested} new feed messages");
    Ok(())
}

/// Stage 5: expand every stack whose stored message count disagrees with
/// its declared size.
pub async fn expand_stacks(kit: &DaKit) -> Result<()> {
    for stack in queries::feed::incomplete_stacks(&kit.db).await? {
        info!(
            "expanding feed stack {} ({} of {} stored)",
            stack.stackid, stack.stored, stack.declared
        );
        let api = &kit.api;
        let session = &kit.session;
        let stackid = stack.stackid.clone();
        let stackid = stackid.as_str();
        expand_stack(&kit.db, &stack, move |offset| async move {
            api.feed_stack(session, stackid, offset).await
        })
        .await?;
    }
    Ok(())
}

async fn expand_stack<F, Fut>(db: &SqlitePool, stack: &StackProgress, mut fetch: F) -> Result<()>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = ApiResult<Page<FeedItem>>>,
{
    let mut offset = 0;
    loop {
        if queries::feed::count_in_stack(&stack.stackid, db).await? >= stack.declared {
            break;
        }
        let page = fetch(offset).await.context(error::Api)?;
        let has_more = page.has_more;
        let next_offset = page.next_offset;
        if page.results.is_empty() {
            break;
        }
        for item in page.results {
            // A message that already has its own timestamp marks the
            // boundary of the previous expansion.
            if queries::feed::exists_expanded(&item.messageid, db).await? {
                return Ok(());
            }
            database::save_feed_item(&item, Some(&stack.stackid), db).await?;
        }
        if !has_more {
            break;
        }
        offset = match next_offset {
            Some(o) => o,
            None => break,
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use models::{DeviationMetadata, Stats, User};
    use sqlx::Row;
    use std::cell::RefCell;

    async fn test_db() -> SqlitePool {
        // One connection only: every new connection to :memory: is a new database.
        let db = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        magpie_core::migrate(&db, &schema::tables()).await.unwrap();
        db
    }

    fn user(id: &str) -> User {
        User {
            userid: id.to_string(),
            username: format!("name_{id}"),
            ..Default::default()
        }
    }

    fn deviation(id: &str) -> Deviation {
        Deviation {
            deviationid: id.to_string(),
            title: Some(format!("title {id}")),
            author: Some(user("author")),
            ..Default::default()
        }
    }

    fn page<T>(results: Vec<T>, next_offset: Option<i64>) -> Page<T> {
        Page {
            has_more: next_offset.is_some(),
            next_offset,
            results,
            cursor: None,
        }
    }

    async fn scalar(db: &SqlitePool, sql: &str) -> i64 {
        sqlx::query(sql).fetch_one(db).await.unwrap().get(0)
    }

    #[test_log::test(tokio::test)]
    async fn incremental_crawl_stops_at_first_known_id() {
        let db = test_db().await;
        database::save_deviations(&[deviation("d3")], &db)
            .await
            .unwrap();

        let calls = RefCell::new(vec![]);
        let fetch = |offset: i64| {
            calls.borrow_mut().push(offset);
            let p = match offset {
                0 => page(vec![deviation("d1"), deviation("d2")], Some(2)),
                2 => page(vec![deviation("d3"), deviation("d4")], None),
                other => panic!("unexpected offset {other}"),
            };
            async move { Ok(p) }
        };

        let summary = crawl_gallery_with(&db, &SyncOptions::default(), fetch)
            .await
            .unwrap();

        assert_eq!(summary.new_items, 2);
        assert_eq!(summary.tombstoned, 0);
        assert_eq!(*calls.borrow(), vec![0, 2]);
        // d4 sits behind the known id and must not be stored.
        assert!(!queries::deviation::exists("d4", &db).await.unwrap());

        // A rerun finds d1 immediately and stores nothing new.
        let fetch = |_offset: i64| {
            let p = page(vec![deviation("d1"), deviation("d2")], Some(2));
            async move { Ok(p) }
        };
        let summary = crawl_gallery_with(&db, &SyncOptions::default(), fetch)
            .await
            .unwrap();
        assert_eq!(summary.new_items, 0);
    }

    #[test_log::test(tokio::test)]
    async fn full_crawl_tombstones_unlisted_and_rerun_restores() {
        let db = test_db().await;
        database::save_deviations(&[deviation("d_old"), deviation("d1")], &db)
            .await
            .unwrap();

        let full = SyncOptions {
            full: true,
            ..Default::default()
        };
        let fetch = |_offset: i64| {
            let p = page(vec![deviation("d1")], None);
            async move { Ok(p) }
        };
        let summary = crawl_gallery_with(&db, &full, fetch).await.unwrap();
        assert_eq!(summary.tombstoned, 1);

        let deleted =
            scalar(&db, "select count(*) from deviations where is_deleted = 1").await;
        assert_eq!(deleted, 1);

        // The listing shows d_old again: the tombstone is cleared, and the
        // row keeps existing rather than being recreated.
        let fetch = |_offset: i64| {
            let p = page(vec![deviation("d_old"), deviation("d1")], None);
            async move { Ok(p) }
        };
        crawl_gallery_with(&db, &full, fetch).await.unwrap();
        let deleted =
            scalar(&db, "select count(*) from deviations where is_deleted = 1").await;
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn full_crawl_from_offset_keeps_unvisited_rows() {
        let db = test_db().await;
        database::save_deviations(&[deviation("d_early")], &db)
            .await
            .unwrap();

        // A resumed full crawl never sees the ids listed before its offset;
        // they must not be treated as gone from the gallery.
        let opts = SyncOptions {
            full: true,
            start_offset: 10,
            ..Default::default()
        };
        let fetch = |_offset: i64| {
            let p = page(vec![deviation("d_late")], None);
            async move { Ok(p) }
        };
        let summary = crawl_gallery_with(&db, &opts, fetch).await.unwrap();
        assert_eq!(summary.tombstoned, 0);

        let deleted =
            scalar(&db, "select count(*) from deviations where is_deleted = 1").await;
        assert_eq!(deleted, 0);
    }

    fn metadata_reporting(deviationid: &str, favourites: i64) -> DeviationMetadata {
        DeviationMetadata {
            deviationid: deviationid.to_string(),
            author: user("author"),
            stats: Some(Stats {
                favourites,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn reactor(userid: &str, time: i64) -> Reactor {
        Reactor {
            user: user(userid),
            time,
        }
    }

    #[tokio::test]
    async fn reconcile_resumes_at_stored_count_and_converges() {
        let db = test_db().await;
        database::save_deviations(&[deviation("d1")], &db)
            .await
            .unwrap();
        database::save_metadata(&[metadata_reporting("d1", 5)], &db)
            .await
            .unwrap();
        database::save_reactors(
            "d1",
            &[reactor("u1", 1), reactor("u2", 2), reactor("u3", 3)],
            &db,
        )
        .await
        .unwrap();

        let drifts = queries::activity::favorite_drift(&db).await.unwrap();
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].reported, 5);
        assert_eq!(drifts[0].stored, 3);

        let calls = RefCell::new(vec![]);
        let fetch = |offset: i64| {
            calls.borrow_mut().push(offset);
            let p = page(vec![reactor("u4", 4), reactor("u5", 5)], None);
            async move { Ok(p) }
        };
        reconcile_artwork(&db, &drifts[0], fetch).await.unwrap();

        // Resumed exactly where the stored events ended.
        assert_eq!(*calls.borrow(), vec![3]);
        assert_eq!(
            queries::activity::count_faves("d1", &db).await.unwrap(),
            5
        );
        assert!(queries::activity::favorite_drift(&db)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn reconcile_overcount_refetches_from_zero() {
        let db = test_db().await;
        database::save_deviations(&[deviation("d1")], &db)
            .await
            .unwrap();
        database::save_metadata(&[metadata_reporting("d1", 1)], &db)
            .await
            .unwrap();
        database::save_reactors(
            "d1",
            &[reactor("u1", 1), reactor("u2", 2), reactor("u3", 3)],
            &db,
        )
        .await
        .unwrap();

        let drifts = queries::activity::favorite_drift(&db).await.unwrap();
        assert_eq!(drifts[0].stored, 3);
        assert_eq!(drifts[0].reported, 1);

        let calls = RefCell::new(vec![]);
        let fetch = |offset: i64| {
            calls.borrow_mut().push(offset);
            let p = page(vec![reactor("u7", 7)], None);
            async move { Ok(p) }
        };
        reconcile_artwork(&db, &drifts[0], fetch).await.unwrap();

        assert_eq!(*calls.borrow(), vec![0]);
        assert_eq!(
            queries::activity::count_faves("d1", &db).await.unwrap(),
            1
        );
    }

    fn feed_item(messageid: &str, deviationid: &str, with_ts: bool) -> FeedItem {
        FeedItem {
            messageid: messageid.to_string(),
            kind: "deviation_submitted".to_string(),
            ts: with_ts.then(|| Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            by_user: Some(user("watcher")),
            deviations: vec![deviation(deviationid)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn feed_ingestion_stops_at_first_known_message() {
        let db = test_db().await;
        database::save_feed_item(&feed_item("m3", "d3", true), None, &db)
            .await
            .unwrap();

        let calls = RefCell::new(0u32);
        let fetch = |_cursor: Option<String>| {
            *calls.borrow_mut() += 1;
            let p = Page {
                results: vec![
                    feed_item("m1", "d1", true),
                    feed_item("m2", "d2", true),
                    feed_item("m3", "d3", true),
                    feed_item("m4", "d4", true),
                ],
                has_more: true,
                next_offset: None,
                cursor: Some("next".to_string()),
            };
            async move { Ok(p) }
        };
        ingest_feed_with(&db, fetch).await.unwrap();

        assert_eq!(*calls.borrow(), 1);
        assert!(queries::feed::exists("m1", &db).await.unwrap());
        assert!(queries::feed::exists("m2", &db).await.unwrap());
        assert!(!queries::feed::exists("m4", &db).await.unwrap());
    }

    #[tokio::test]
    async fn stack_expansion_fills_to_declared_size() {
        let db = test_db().await;

        // Stage-4 leftovers: the stack head without its own timestamp plus
        // one already-expanded member.
        let mut head = feed_item("m_head", "d1", false);
        head.stackid = Some("s1".to_string());
        head.stack_size = Some(4);
        database::save_feed_item(&head, None, &db).await.unwrap();
        database::save_feed_item(&feed_item("m_e1", "d2", true), Some("s1"), &db)
            .await
            .unwrap();

        let stacks = queries::feed::incomplete_stacks(&db).await.unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].declared, 4);
        assert_eq!(stacks[0].stored, 2);

        let calls = RefCell::new(vec![]);
        let fetch = |offset: i64| {
            calls.borrow_mut().push(offset);
            // The head reappears as a regular, timestamped member.
            let p = page(
                vec![
                    feed_item("m_head", "d1", true),
                    feed_item("m_e2", "d3", true),
                    feed_item("m_e3", "d4", true),
                ],
                Some(3),
            );
            async move { Ok(p) }
        };
        expand_stack(&db, &stacks[0], fetch).await.unwrap();

        assert_eq!(*calls.borrow(), vec![0]);
        assert_eq!(
            queries::feed::count_in_stack("s1", &db).await.unwrap(),
            4
        );
        let untimestamped = scalar(
            &db,
            "select count(*) from feed_messages where stackid = 's1' and ts is null",
        )
        .await;
        assert_eq!(untimestamped, 0);
        assert!(queries::feed::incomplete_stacks(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stack_expansion_stops_at_expanded_boundary() {
        let db = test_db().await;

        let mut head = feed_item("m_head", "d1", false);
        head.stackid = Some("s1".to_string());
        head.stack_size = Some(5);
        database::save_feed_item(&head, None, &db).await.unwrap();
        database::save_feed_item(&feed_item("m_e1", "d2", true), Some("s1"), &db)
            .await
            .unwrap();

        let stacks = queries::feed::incomplete_stacks(&db).await.unwrap();
        let fetch = |offset: i64| {
            let p = match offset {
                // m_e1 already carries a timestamp: the boundary.
                0 => page(vec![feed_item("m_head", "d1", true), feed_item("m_e1", "d2", true)], Some(2)),
                other => panic!("walked past the boundary, offset {other}"),
            };
            async move { Ok(p) }
        };
        expand_stack(&db, &stacks[0], fetch).await.unwrap();

        assert_eq!(
            queries::feed::count_in_stack("s1", &db).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn sync_guard_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.sqlite.lock");

        let guard = SyncGuard::try_acquire(&path).unwrap().unwrap();
        assert!(path.exists());
        assert!(SyncGuard::try_acquire(&path).unwrap().is_none());

        drop(guard);
        assert!(!path.exists());
        assert!(SyncGuard::try_acquire(&path).unwrap().is_some());
    }
}
