use snafu::Snafu;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("deviantart api: {source}"))]
    Api { source: crate::api::ApiError },

    #[snafu(display("database error: {source}"))]
    Database { source: sqlx::Error },

    #[snafu(display("error on database transaction: {source}"))]
    DatabaseTransaction { source: sqlx::Error },

    #[snafu(display("config: {source}"))]
    Config {
        source: magpie_core::config::Error,
    },

    #[snafu(display("cannot take the sync lock: {source}"))]
    SyncLock { source: std::io::Error },
}
