use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

pub mod stores;

pub use stores::{SqliteMembershipStore, SqliteRoleStore};

/// Opens the authorization database and applies embedded migrations.
///
/// WAL keeps audit appends from blocking membership reads.
pub async fn init(database_url: &str) -> anyhow::Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.with_context(|| format!("invalid DATABASE_URL '{database_url}'"))?
		.create_if_missing(true)
		.journal_mode(SqliteJournalMode::Wal)
		.busy_timeout(Duration::from_secs(5));

	let pool = SqlitePoolOptions::new()
		.max_connections(10)
		.min_connections(1)
		.acquire_timeout(Duration::from_secs(10))
		.connect_with(options)
		.await
		.context("failed to connect to authorization database")?;

	sqlx::migrate!()
		.run(&pool)
		.await
		.context("failed to run authorization migrations")?;

	tracing::info!("authorization database ready");
	Ok(pool)
}
