//! Package ingestion cycle
//!
//! Every pending reference is handled on its own, one after another:
//! fetch boxes (when the source has them), fetch the group, build the
//! package, persist it. A failed fetch bumps the reference's attempt
//! counter. Once the counter reaches the ceiling a missing box list is
//! accepted and the package is stored without boxes, while a group that
//! still cannot be fetched is dropped from the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cycle_common::types::{PendingPackage, SourceEndpoint, SourceId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::builder::Builder;
use super::scheduler::Job;
use super::storage::PackageStore;
use crate::api::{ApiError, ClientFactory, VendorApi};
use crate::error::{Result, SyncError};

/// When to give up on a pending reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Store the new attempt count and try again next cycle
    Requeue(i32),
    /// Ceiling reached with this attempt count
    GiveUp(i32),
}

impl RetryPolicy {
    pub fn new(max_attempts: i32) -> Self {
        Self { max_attempts }
    }

    pub fn after_failure(&self, attempt: i32) -> RetryDecision {
        let next = attempt.saturating_add(1);
        if next < self.max_attempts {
            RetryDecision::Requeue(next)
        } else {
            RetryDecision::GiveUp(next)
        }
    }
}

/// Counters of one ingestion cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    /// Pending references seen
    pub found: usize,
    pub added: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// Left untouched because the source client was unavailable
    pub skipped: usize,
    /// Persistence or bookkeeping failures
    pub failed: usize,
    pub cancelled: bool,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
}

impl CycleStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Added => self.added += 1,
            Outcome::Requeued => self.requeued += 1,
            Outcome::Dropped => self.dropped += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Cancelled => self.cancelled = true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Added,
    Requeued,
    Dropped,
    Skipped,
    Cancelled,
}

struct SourceClient {
    endpoint: SourceEndpoint,
    api: Arc<dyn VendorApi>,
}

pub struct IngestionJob {
    store: Arc<dyn PackageStore>,
    clients: Arc<dyn ClientFactory>,
    policy: RetryPolicy,
    builder: Option<Builder>,
}

impl IngestionJob {
    pub fn new(
        store: Arc<dyn PackageStore>,
        clients: Arc<dyn ClientFactory>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            clients,
            policy,
            builder: None,
        }
    }

    /// Load mapping rules and the delivery dictionary.
    pub async fn load_mappings(&mut self) -> Result<()> {
        let rules = self.store.load_field_mappings().await?;
        let deliveries = self.store.load_delivery_mappings().await?;
        let builder = Builder::new(rules, deliveries);
        info!(
            header_rules = builder.header_rule_count(),
            property_rules = builder.property_rule_count(),
            "Package mappings loaded"
        );
        self.builder = Some(builder);
        Ok(())
    }

    /// Run one pass over the pending queue.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleStats> {
        let builder = self
            .builder
            .as_ref()
            .ok_or_else(|| SyncError::config("package mappings are not loaded"))?;

        let started = Instant::now();
        let mut stats = CycleStats {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        let pending = self.store.list_pending_packages().await?;
        stats.found = pending.len();
        if pending.is_empty() {
            debug!("No pending packages");
            return Ok(stats);
        }

        let registry = self.client_registry().await?;

        for reference in &pending {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let client = registry
                .get(&reference.source)
                .ok_or_else(|| SyncError::unknown_source(reference.source))?;

            match self.ingest(builder, client, reference, cancel).await {
                Ok(Outcome::Cancelled) => {
                    stats.cancelled = true;
                    break;
                },
                Ok(outcome) => stats.record(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    stats.failed += 1;
                    error!(
                        source = reference.source,
                        group_id = reference.id,
                        error = %e,
                        "Package ingestion failed"
                    );
                },
            }
        }

        stats.duration_secs = started.elapsed().as_secs_f64();
        info!(
            found = stats.found,
            added = stats.added,
            requeued = stats.requeued,
            dropped = stats.dropped,
            skipped = stats.skipped,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "Groups found {}, added {}",
            stats.found,
            stats.added
        );
        Ok(stats)
    }

    async fn client_registry(&self) -> Result<HashMap<SourceId, SourceClient>> {
        let mut registry = HashMap::new();
        for endpoint in self.store.list_sources().await? {
            let api = self.clients.create(&endpoint).map_err(|e| {
                SyncError::config(format!("source {} client: {}", endpoint.id, e))
            })?;
            registry.insert(endpoint.id, SourceClient { endpoint, api });
        }
        Ok(registry)
    }

    async fn ingest(
        &self,
        builder: &Builder,
        client: &SourceClient,
        pending: &PendingPackage,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let mut attempt = pending.attempt;

        let boxes = if client.endpoint.has_boxes {
            let fetched = client.api.fetch_group_boxes(pending.id).await;
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            match fetched {
                Ok(boxes) if !boxes.is_empty() => Some(boxes),
                Err(ApiError::Inactive) => return Ok(Outcome::Skipped),
                other => {
                    let reason = match other {
                        Err(e) => e.to_string(),
                        Ok(_) => "no boxes yet".to_string(),
                    };
                    match self.policy.after_failure(attempt) {
                        RetryDecision::Requeue(next) => {
                            debug!(
                                source = pending.source,
                                group_id = pending.id,
                                attempt = next,
                                reason = %reason,
                                "Boxes not available, retrying later"
                            );
                            self.store.increment_attempt(pending, next).await?;
                            return Ok(Outcome::Requeued);
                        },
                        RetryDecision::GiveUp(next) => {
                            warn!(
                                source = pending.source,
                                group_id = pending.id,
                                attempt = next,
                                reason = %reason,
                                "Boxes still not available, continuing without boxes"
                            );
                            attempt = next;
                            None
                        },
                    }
                },
            }
        } else {
            None
        };

        let fetched = client.api.fetch_group_detail(pending.id).await;
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        let raw = match fetched {
            Ok(raw) => raw,
            Err(ApiError::Inactive) => return Ok(Outcome::Skipped),
            Err(e) => {
                return match self.policy.after_failure(attempt) {
                    RetryDecision::Requeue(next) => {
                        warn!(
                            source = pending.source,
                            group_id = pending.id,
                            attempt = next,
                            error = %e,
                            "Group fetch failed, retrying later"
                        );
                        self.store.increment_attempt(pending, next).await?;
                        Ok(Outcome::Requeued)
                    },
                    RetryDecision::GiveUp(next) => {
                        warn!(
                            source = pending.source,
                            group_id = pending.id,
                            attempt = next,
                            error = %e,
                            "Group fetch failed too often, dropping reference"
                        );
                        self.store.drop_pending(pending).await?;
                        Ok(Outcome::Dropped)
                    },
                };
            },
        };

        let mut package = builder.build_package(pending.source, &raw)?;
        if package.id != pending.id {
            if package.id != 0 {
                warn!(
                    source = pending.source,
                    group_id = pending.id,
                    mapped_id = package.id,
                    "Mapped package id differs from the pending reference"
                );
            }
            package.set_id(pending.id);
        }
        if let Some(boxes) = boxes {
            package.boxes = boxes.into_package_boxes(pending.source, pending.id);
        }

        self.store.save_new_package(&package).await?;
        debug!(
            source = pending.source,
            group_id = pending.id,
            properties = package.properties.len(),
            barcodes = package.barcodes.len(),
            boxes = package.boxes.len(),
            items = package.item_count(),
            "Package added"
        );
        Ok(Outcome::Added)
    }
}

#[async_trait]
impl Job for IngestionJob {
    fn name(&self) -> &str {
        "fill-boxes"
    }

    async fn init(&mut self) -> Result<()> {
        self.load_mappings().await
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        self.run_cycle(cancel).await.map(|_| ())
    }
}
