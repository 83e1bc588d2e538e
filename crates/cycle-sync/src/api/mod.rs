//! Vendor API collaborator
//!
//! The sync jobs only see the [`VendorApi`] trait. Clients are produced per
//! source by a [`ClientFactory`], so tests can swap in fakes and every cycle
//! starts with fresh clients.

pub mod client;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use cycle_common::types::{GroupId, SourceEndpoint};
use serde_json::{Map, Value};
use thiserror::Error;

pub use client::{HttpClientFactory, VendorClient};
pub use types::{GroupBoxes, NetprintGroup, VendorBox, VendorBoxItem};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    /// Error envelope returned by the vendor
    #[error("{error}; code: {code}; exception: {exception}")]
    Vendor {
        code: i64,
        error: String,
        exception: String,
    },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Client is broken or spent its call budget
    #[error("client is not active")]
    Inactive,
}

#[async_trait]
pub trait VendorApi: Send + Sync {
    /// Full order group as untyped JSON
    async fn fetch_group_detail(&self, group_id: GroupId) -> Result<Map<String, Value>, ApiError>;

    async fn fetch_group_boxes(&self, group_id: GroupId) -> Result<GroupBoxes, ApiError>;

    /// Groups that reached one of `statuses` since `since` (unix seconds)
    async fn fetch_groups_since(
        &self,
        statuses: &[i32],
        since: i64,
    ) -> Result<Vec<NetprintGroup>, ApiError>;
}

/// Creates the API client for a registered source.
pub trait ClientFactory: Send + Sync {
    fn create(&self, endpoint: &SourceEndpoint) -> Result<Arc<dyn VendorApi>, ApiError>;
}
