pub mod config;
pub mod query;
pub mod schema;

pub use schema::migrate;
