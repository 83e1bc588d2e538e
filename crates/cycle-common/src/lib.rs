//! Photocycle Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared domain types, logging setup and error handling for the photocycle
//! sync workers.
//!
//! # Overview
//!
//! - **Types**: the package aggregate and the records around it (pending
//!   queue entries, mapping rules, vendor endpoints, netprint rows)
//! - **Logging**: `tracing` subscriber initialisation from env or a builder
//! - **Error Handling**: [`CycleError`] and its [`Result`] alias
//!
//! # Example
//!
//! ```no_run
//! use cycle_common::logging::{init_logging, LogConfig};
//! use cycle_common::types::{BarcodeType, Package};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!
//!     let package = Package::new(7, 349141);
//!     tracing::info!(source = package.source, id = package.id, "package ready");
//!     assert_eq!(BarcodeType::Box.code(), 2);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CycleError, Result};
