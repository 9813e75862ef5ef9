use crate::log::init_log4rs;
use ::log::{debug, error, warn};
use clap::Parser;
use colored::Colorize;
use magpie_core::{config::Config, migrate};
use magpie_da::{DaKit, Stage, SyncOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

mod log;

#[derive(Parser)]
#[clap(version)]
struct Main {
    #[clap(short, long)]
    config: Option<String>,
    #[clap(subcommand)]
    subcommand: SubcommandMain,
}

#[derive(Parser)]
enum SubcommandMain {
    /// Harvest the configured account into its replica database.
    Sync(SyncArgs),
    /// Create the config file if it does not exist.
    Init,
    /// Open the replica database and apply pending schema changes.
    Migrate(MigrateArgs),
}

#[derive(Parser)]
struct MigrateArgs {
    /// Account whose database file to migrate.
    #[clap(short, long)]
    account: Option<String>,
}

#[derive(Parser)]
struct SyncArgs {
    /// Account to harvest, overriding the configured one.
    #[clap(short, long)]
    account: Option<String>,
    /// Walk listings to exhaustion and tombstone unlisted rows.
    #[clap(long)]
    full: bool,
    /// Gallery offset to start crawling from.
    #[clap(long, default_value_t = 0)]
    offset: i64,
    /// Upper bound on gallery items processed this run.
    #[clap(short, long)]
    limit: Option<u32>,
    /// Gallery folder to crawl, defaults to the configured one.
    #[clap(short, long)]
    gallery: Option<String>,
    #[clap(subcommand)]
    subcommand: SubcommandSync,
}

#[derive(Parser)]
enum SubcommandSync {
    /// Every stage in order: gallery, metadata, favorites, feed.
    All,
    Gallery,
    Metadata,
    Favorites,
    Feed,
}

async fn open_replica(config: &Config, account: Option<&str>) -> anyhow::Result<SqlitePool> {
    let path = config.database_path(account);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);
    let db = SqlitePoolOptions::new().connect_with(options).await?;
    migrate(&db, &magpie_da::schema::tables()).await?;
    debug!("replica database ready: {}", path.display());
    Ok(db)
}

async fn run_internal() -> anyhow::Result<()> {
    init_log4rs()?;

    let opts = Main::parse();

    let config_builder = || {
        let config_path = if let Some(c) = &opts.config {
            PathBuf::from(c)
        } else {
            dirs::home_dir().unwrap_or_default().join(".magpie")
        }
        .join("config.json");
        let config = Config::from_file(&config_path)?;
        debug!("config loaded: {:?}", config_path);

        Ok(config) as anyhow::Result<Config>
    };

    match opts.subcommand {
        SubcommandMain::Init => {
            config_builder()?;
        }
        SubcommandMain::Migrate(c) => {
            let config = config_builder()?;
            open_replica(&config, c.account.as_deref()).await?;
            ::log::info!("migration finished");
        }
        SubcommandMain::Sync(c) => {
            let mut config = config_builder()?;
            if let Some(account) = &c.account {
                config.deviantart.account = account.clone();
            }
            let db = open_replica(&config, None).await?;
            let kit = DaKit::new(config, db).await?;
            let sync_opts = SyncOptions {
                full: c.full,
                start_offset: c.offset,
                gallery: c.gallery.clone(),
                limit: c.limit,
            };
            match c.subcommand {
                SubcommandSync::All => {
                    let stop = Arc::new(AtomicBool::new(false));
                    {
                        let stop = stop.clone();
                        tokio::spawn(async move {
                            if tokio::signal::ctrl_c().await.is_ok() {
                                warn!("interrupt received, stopping after the current stage");
                                stop.store(true, Ordering::Relaxed);
                            }
                        });
                    }
                    magpie_da::run_sync(&kit, &sync_opts, Some(&stop)).await?;
                }
                SubcommandSync::Gallery => {
                    magpie_da::run_stage(&kit, Stage::Gallery, &sync_opts).await?;
                }
                SubcommandSync::Metadata => {
                    magpie_da::run_stage(&kit, Stage::Metadata, &sync_opts).await?;
                }
                SubcommandSync::Favorites => {
                    magpie_da::run_stage(&kit, Stage::Favorites, &sync_opts).await?;
                }
                SubcommandSync::Feed => {
                    magpie_da::run_stage(&kit, Stage::Feed, &sync_opts).await?;
                }
            }
        }
    };

    Ok(())
}

/// Run the app and return the exit code.
pub async fn run() -> i32 {
    if let Err(e) = run_internal().await {
        if ::log::log_enabled!(::log::Level::Error) {
            error!("{:#}", e);
        } else {
            // Logger never came up; make sure the failure is still visible.
            eprintln!("{} {:#}", "error:".red().bold(), e);
        }
        1
    } else {
        0
    }
}
