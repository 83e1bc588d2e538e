//! Sync jobs and the pieces they are built from
//!
//! - [`lookup`] and [`coerce`] read untyped vendor JSON
//! - [`builder`] maps a vendor group onto a [`Package`](cycle_common::types::Package)
//! - [`batch`] and [`storage`] write packages to PostgreSQL
//! - [`job`] and [`netprint`] are the two sync jobs
//! - [`scheduler`] runs jobs on a fixed interval

pub mod batch;
pub mod builder;
pub mod coerce;
pub mod job;
pub mod lookup;
pub mod netprint;
pub mod scheduler;
pub mod storage;

pub use batch::{BatchError, BatchPersister, InsertRow};
pub use builder::{BuildError, Builder};
pub use job::{CycleStats, IngestionJob, RetryDecision, RetryPolicy};
pub use lookup::lookup;
pub use netprint::{netprint_rows, NetprintJob, NetprintStats};
pub use scheduler::{Job, PollScheduler};
pub use storage::{NetprintStore, PackageStore, PgStore};
