//! Transactional writes: each batch of api records lands atomically.

use log::warn;
use snafu::ResultExt;
use sqlx::SqlitePool;

use crate::{
    error,
    models::{Deviation, DeviationMetadata, FeedItem, Reactor},
    queries, Result,
};

pub async fn save_deviations(deviations: &[Deviation], db: &SqlitePool) -> Result<()> {
    if deviations.is_empty() {
        return Ok(());
    }
    let mut tx = db.begin().await.context(error::DatabaseTransaction)?;
    for d in deviations {
        if let Some(author) = &d.author {
            queries::user::upsert(author, &mut tx).await?;
        }
        queries::deviation::upsert(d, &mut tx).await?;
    }
    tx.commit().await.context(error::DatabaseTransaction)?;
    Ok(())
}

pub async fn save_metadata(batch: &[DeviationMetadata], db: &SqlitePool) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let mut tx = db.begin().await.context(error::DatabaseTransaction)?;
    for m in batch {
        queries::user::upsert(&m.author, &mut tx).await?;
        for folder in &m.collections {
            queries::folder::upsert(folder, "collection", &mut tx).await?;
        }
        for folder in &m.galleries {
            queries::folder::upsert(folder, "gallery", &mut tx).await?;
        }
        queries::deviation::metadata_upsert(m, &mut tx).await?;
        if let Some(stats) = &m.stats {
            queries::deviation::update_stats(&m.deviationid, stats, &mut tx).await?;
        }
    }
    tx.commit().await.context(error::DatabaseTransaction)?;
    Ok(())
}

pub async fn save_reactors(deviationid: &str, reactors: &[Reactor], db: &SqlitePool) -> Result<()> {
    if reactors.is_empty() {
        return Ok(());
    }
    let mut tx = db.begin().await.context(error::DatabaseTransaction)?;
    for reactor in reactors {
        if reactor.user.userid.is_empty() {
            warn!("whofaved entry without a user id on deviation {deviationid}, skipped");
            continue;
        }
        queries::user::upsert(&reactor.user, &mut tx).await?;
        queries::activity::insert_fave(deviationid, &reactor.user.userid, reactor.time, &mut tx)
            .await?;
    }
    tx.commit().await.context(error::DatabaseTransaction)?;
    Ok(())
}

/// `stack` carries the enclosing stackid during stack expansion.
pub async fn save_feed_item(item: &FeedItem, stack: Option<&str>, db: &SqlitePool) -> Result<()> {
    let mut tx = db.begin().await.context(error::DatabaseTransaction)?;
    if let Some(user) = &item.by_user {
        queries::user::upsert(user, &mut tx).await?;
    }
    queries::feed::upsert(item, stack, &mut tx).await?;
    tx.commit().await.context(error::DatabaseTransaction)?;
    Ok(())
}
