//! Photocycle Sync Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Background workers that pull order groups from vendor sites and store
//! them as packages.
//!
//! # Overview
//!
//! - **Ingestion**: works through the `package_new` queue, fetches each
//!   group (and its boxes), maps it with data-driven rules and persists the
//!   package with all owned rows in one transaction
//! - **Netprint**: records netprint order numbers of recently finished groups
//! - **Scheduling**: both jobs run on a fixed interval until cancelled
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cycle_sync::api::HttpClientFactory;
//! use cycle_sync::config::Config;
//! use cycle_sync::db::create_pool;
//! use cycle_sync::ingest::{BatchPersister, IngestionJob, PgStore, PollScheduler, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = create_pool(&config.database).await?;
//!     let store = Arc::new(PgStore::new(pool, BatchPersister::default()));
//!     let clients = Arc::new(HttpClientFactory::new(&config.api)?);
//!
//!     let job = IngestionJob::new(store, clients, RetryPolicy::new(config.sync.max_attempts));
//!     PollScheduler::new(config.sync.interval())
//!         .with_job(job)
//!         .run(CancellationToken::new())
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;

pub use error::{Result, SyncError};
