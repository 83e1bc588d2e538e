//! Netprint number sync
//!
//! Pulls recently finished groups of the netprint source and records the
//! netprint order number of every box. Groups whose boxes carry no number
//! yet get a single placeholder row, so they are not looked up again.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cycle_common::types::{GroupNetprint, SourceEndpoint, SourceId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::scheduler::Job;
use super::storage::NetprintStore;
use crate::api::{ClientFactory, NetprintGroup};
use crate::config::NetprintConfig;
use crate::error::{Result, SyncError};

const SECONDS_PER_HOUR: i64 = 3600;

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetprintStats {
    /// Lower bound sent to the vendor, unix seconds
    pub since: i64,
    pub groups: usize,
    pub rows: usize,
    pub inserted: u64,
    pub cancelled: bool,
}

pub struct NetprintJob {
    store: Arc<dyn NetprintStore>,
    clients: Arc<dyn ClientFactory>,
    config: NetprintConfig,
    endpoint: Option<SourceEndpoint>,
}

impl NetprintJob {
    pub fn new(
        store: Arc<dyn NetprintStore>,
        clients: Arc<dyn ClientFactory>,
        config: NetprintConfig,
    ) -> Self {
        Self {
            store,
            clients,
            config: config.normalized(),
            endpoint: None,
        }
    }

    /// Resolve the endpoint of the configured source.
    pub async fn resolve_source(&mut self) -> Result<()> {
        let endpoint = self
            .store
            .find_source(self.config.source)
            .await?
            .ok_or_else(|| SyncError::unknown_source(self.config.source))?;
        info!(source = endpoint.id, url = %endpoint.url, "Netprint source resolved");
        self.endpoint = Some(endpoint);
        Ok(())
    }

    pub async fn sync(&self, cancel: &CancellationToken) -> Result<NetprintStats> {
        self.sync_at(Utc::now().timestamp(), cancel).await
    }

    /// One sync run started at `now` (unix seconds).
    pub async fn sync_at(&self, now: i64, cancel: &CancellationToken) -> Result<NetprintStats> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| SyncError::config("netprint source is not resolved"))?;
        let api = self
            .clients
            .create(endpoint)
            .map_err(|e| SyncError::config(format!("source {} client: {}", endpoint.id, e)))?;

        let mut last = self.store.last_netprint_sync(endpoint.id).await?;
        if last == 0 {
            last = now;
        }
        let since = last - self.config.offset_hours * SECONDS_PER_HOUR;
        let mut stats = NetprintStats {
            since,
            ..Default::default()
        };

        let groups = api.fetch_groups_since(&self.config.statuses, since).await?;
        if cancel.is_cancelled() {
            stats.cancelled = true;
            return Ok(stats);
        }
        stats.groups = groups.len();
        if groups.is_empty() {
            debug!(source = endpoint.id, since, "No netprint groups");
            return Ok(stats);
        }

        let rows = netprint_rows(endpoint.id, &groups);
        stats.rows = rows.len();
        stats.inserted = self.store.add_netprints(&rows).await?;
        self.store.set_last_netprint_sync(endpoint.id, now).await?;

        info!(
            source = endpoint.id,
            since,
            groups = stats.groups,
            rows = stats.rows,
            inserted = stats.inserted,
            "Netprint sync finished"
        );
        Ok(stats)
    }
}

/// Rows to store for `groups`. Groups not made by the netprint factory are
/// ignored.
pub fn netprint_rows(source: SourceId, groups: &[NetprintGroup]) -> Vec<GroupNetprint> {
    let mut rows = Vec::new();
    for group in groups.iter().filter(|g| g.npfactory) {
        let before = rows.len();
        rows.extend(
            group
                .boxes
                .iter()
                .filter(|b| !b.order_number.is_empty())
                .map(|b| GroupNetprint {
                    source,
                    group_id: group.id,
                    netprint_id: b.order_number.clone(),
                    state: group.status.value,
                    box_number: b.number,
                }),
        );
        if rows.len() == before {
            rows.push(GroupNetprint {
                source,
                group_id: group.id,
                netprint_id: GroupNetprint::NOT_PROCESSED.to_string(),
                state: 0,
                box_number: 0,
            });
        }
    }
    rows
}

#[async_trait]
impl Job for NetprintJob {
    fn name(&self) -> &str {
        "netprint"
    }

    async fn init(&mut self) -> Result<()> {
        self.resolve_source().await
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        self.sync(cancel).await.map(|_| ())
    }
}
