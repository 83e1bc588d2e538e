//! In-memory collaborators for sync job tests
//!
//! - [`FakeStore`] implements both store traits over a mutex-guarded state
//! - [`FakeApi`] answers vendor calls from canned JSON
//! - [`FakeFactory`] hands out the same [`FakeApi`] for every source

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use cycle_common::types::{
    DeliveryMapping, FieldMappingRule, GroupId, GroupNetprint, Package, PendingPackage,
    SourceEndpoint, SourceId,
};
use cycle_sync::api::{ApiError, ClientFactory, GroupBoxes, NetprintGroup, VendorApi};
use cycle_sync::error::{Result, SyncError};
use cycle_sync::ingest::builder::DEBT_PROPERTY;
use cycle_sync::ingest::{NetprintStore, PackageStore};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

pub const SOURCE: SourceId = 7;

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Default)]
pub struct StoreState {
    pub rules: Vec<FieldMappingRule>,
    pub deliveries: Vec<DeliveryMapping>,
    pub sources: Vec<SourceEndpoint>,
    pub pending: Vec<PendingPackage>,
    pub saved: Vec<Package>,
    pub netprints: Vec<GroupNetprint>,
    pub netprint_sync: HashMap<SourceId, i64>,
    pub fail_save: bool,
}

#[derive(Debug, Default)]
pub struct FakeStore {
    pub state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn new(state: StoreState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn pending(&self) -> Vec<PendingPackage> {
        self.state.lock().unwrap().pending.clone()
    }

    pub fn saved(&self) -> Vec<Package> {
        self.state.lock().unwrap().saved.clone()
    }

    pub fn netprints(&self) -> Vec<GroupNetprint> {
        self.state.lock().unwrap().netprints.clone()
    }

    pub fn netprint_sync(&self, source: SourceId) -> Option<i64> {
        self.state.lock().unwrap().netprint_sync.get(&source).copied()
    }
}

#[async_trait]
impl PackageStore for FakeStore {
    async fn load_field_mappings(&self) -> Result<Vec<FieldMappingRule>> {
        Ok(self.state.lock().unwrap().rules.clone())
    }

    async fn load_delivery_mappings(&self) -> Result<Vec<DeliveryMapping>> {
        Ok(self.state.lock().unwrap().deliveries.clone())
    }

    async fn list_sources(&self) -> Result<Vec<SourceEndpoint>> {
        Ok(self.state.lock().unwrap().sources.clone())
    }

    async fn list_pending_packages(&self) -> Result<Vec<PendingPackage>> {
        Ok(self.pending())
    }

    async fn increment_attempt(&self, pending: &PendingPackage, attempt: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state
            .pending
            .iter_mut()
            .find(|p| p.source == pending.source && p.id == pending.id)
        {
            entry.attempt = attempt;
        }
        Ok(())
    }

    async fn drop_pending(&self, pending: &PendingPackage) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .pending
            .retain(|p| !(p.source == pending.source && p.id == pending.id));
        Ok(())
    }

    async fn save_new_package(&self, package: &Package) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_save {
            return Err(SyncError::Persistence(sqlx::Error::PoolTimedOut));
        }
        state
            .pending
            .retain(|p| !(p.source == package.source && p.id == package.id));
        state.saved.push(package.clone());
        Ok(())
    }
}

#[async_trait]
impl NetprintStore for FakeStore {
    async fn find_source(&self, source: SourceId) -> Result<Option<SourceEndpoint>> {
        let state = self.state.lock().unwrap();
        Ok(state.sources.iter().find(|s| s.id == source).cloned())
    }

    async fn last_netprint_sync(&self, source: SourceId) -> Result<i64> {
        Ok(self.netprint_sync(source).unwrap_or(0))
    }

    async fn set_last_netprint_sync(&self, source: SourceId, timestamp: i64) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .netprint_sync
            .insert(source, timestamp);
        Ok(())
    }

    async fn add_netprints(&self, netprints: &[GroupNetprint]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0;
        for row in netprints {
            let exists = state.netprints.iter().any(|r| {
                r.source == row.source
                    && r.group_id == row.group_id
                    && r.netprint_id == row.netprint_id
            });
            if !exists {
                state.netprints.push(row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

// ============================================================================
// Vendor API
// ============================================================================

#[derive(Debug, Default)]
pub struct FakeApi {
    /// Group detail by id; a missing id answers with HTTP 404
    pub details: Mutex<HashMap<GroupId, Map<String, Value>>>,
    /// Boxes by id; a missing id answers with an empty list
    pub boxes: Mutex<HashMap<GroupId, GroupBoxes>>,
    pub groups: Mutex<Vec<NetprintGroup>>,
    pub inactive: AtomicBool,
    /// Cancelled as soon as a group detail is requested
    pub cancel_on_detail: Mutex<Option<CancellationToken>>,
    pub cancel_on_boxes: Mutex<Option<CancellationToken>>,
    pub detail_calls: AtomicUsize,
    pub box_calls: AtomicUsize,
    pub since_calls: Mutex<Vec<(Vec<i32>, i64)>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_detail(&self, id: GroupId, detail: Value) {
        self.details.lock().unwrap().insert(id, object(detail));
    }

    pub fn with_boxes(&self, id: GroupId, boxes: Value) {
        let boxes = serde_json::from_value(boxes).unwrap();
        self.boxes.lock().unwrap().insert(id, boxes);
    }

    pub fn with_groups(&self, groups: Value) {
        *self.groups.lock().unwrap() = serde_json::from_value(groups).unwrap();
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn box_calls(&self) -> usize {
        self.box_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorApi for FakeApi {
    async fn fetch_group_detail(
        &self,
        group_id: GroupId,
    ) -> std::result::Result<Map<String, Value>, ApiError> {
        if self.inactive.load(Ordering::SeqCst) {
            return Err(ApiError::Inactive);
        }
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = self.cancel_on_detail.lock().unwrap().as_ref() {
            cancel.cancel();
        }
        self.details
            .lock()
            .unwrap()
            .get(&group_id)
            .cloned()
            .ok_or(ApiError::Status { status: 404 })
    }

    async fn fetch_group_boxes(&self, group_id: GroupId) -> std::result::Result<GroupBoxes, ApiError> {
        if self.inactive.load(Ordering::SeqCst) {
            return Err(ApiError::Inactive);
        }
        self.box_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = self.cancel_on_boxes.lock().unwrap().as_ref() {
            cancel.cancel();
        }
        Ok(self
            .boxes
            .lock()
            .unwrap()
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_groups_since(
        &self,
        statuses: &[i32],
        since: i64,
    ) -> std::result::Result<Vec<NetprintGroup>, ApiError> {
        if self.inactive.load(Ordering::SeqCst) {
            return Err(ApiError::Inactive);
        }
        self.since_calls
            .lock()
            .unwrap()
            .push((statuses.to_vec(), since));
        Ok(self.groups.lock().unwrap().clone())
    }
}

pub struct FakeFactory {
    pub api: Arc<FakeApi>,
    pub fail: bool,
}

impl FakeFactory {
    pub fn new(api: Arc<FakeApi>) -> Arc<Self> {
        Arc::new(Self { api, fail: false })
    }
}

impl ClientFactory for FakeFactory {
    fn create(&self, endpoint: &SourceEndpoint) -> std::result::Result<Arc<dyn VendorApi>, ApiError> {
        if self.fail {
            return Err(ApiError::InvalidUrl {
                url: endpoint.url.clone(),
                reason: "unusable".into(),
            });
        }
        Ok(self.api.clone())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

fn rule(family: i32, json_path: &str, target_field: &str) -> FieldMappingRule {
    FieldMappingRule {
        source_type: 0,
        family,
        json_path: json_path.to_string(),
        target_field: target_field.to_string(),
        is_list: false,
    }
}

/// Header and property rules as seeded for the main vendor
pub fn mapping_rules() -> Vec<FieldMappingRule> {
    let header = FieldMappingRule::HEADER_FAMILY;
    let property = FieldMappingRule::PROPERTY_FAMILY;
    vec![
        rule(header, "id", "id"),
        rule(header, "number", "number"),
        rule(header, "client.id", "client_id"),
        rule(header, "delivery.id", "delivery_id"),
        rule(header, "delivery.title", "delivery_name"),
        rule(header, "execution_date", "execution_date"),
        rule(header, "status.value", "src_state"),
        rule(header, "status.title", "src_state_name"),
        rule(property, "client.phone", "phone"),
        rule(property, "comment", "comment"),
        rule(property, "debt.sum", DEBT_PROPERTY),
    ]
}

pub fn deliveries() -> Vec<DeliveryMapping> {
    vec![DeliveryMapping {
        source: SOURCE,
        vendor_delivery_id: 21,
        internal_delivery_id: 3,
        set_send: false,
    }]
}

pub fn endpoint(id: SourceId, has_boxes: bool) -> SourceEndpoint {
    SourceEndpoint {
        id,
        url: format!("https://vendor-{}.example/", id),
        kind: 0,
        app_key: "secret".into(),
        has_boxes,
    }
}

pub fn pending(source: SourceId, id: GroupId, attempt: i32) -> PendingPackage {
    PendingPackage {
        source,
        id,
        client_id: 5512,
        created: Utc.with_ymd_and_hms(2021, 3, 14, 9, 30, 0).unwrap(),
        attempt,
    }
}

pub fn group_detail(id: GroupId) -> Value {
    json!({
        "id": id,
        "number": format!("{}-A", id),
        "client": {"id": "5512", "phone": "+375291112233"},
        "delivery": {"id": 21, "title": "Courier"},
        "execution_date": "14.03.2021",
        "status": {"value": "30", "title": "Ready"},
        "boxes": [{"barcode": "BX-1", "number": 1}],
        "barcodes": [{"barcode": "OB-1"}]
    })
}

pub fn group_boxes(id: GroupId) -> Value {
    json!({
        "orderGroupId": id,
        "boxes": [
            {
                "boxId": 101,
                "boxNumber": 1,
                "barcode": "BX-1",
                "boxTotalPrice": 31.5,
                "weight": 1200,
                "orders": [
                    {"orderId": 9001, "alias": "photobook", "type": "book",
                     "order_items_from": 1, "order_items_to": 4}
                ]
            },
            {"boxId": 102, "boxNumber": 2, "barcode": "BX-2", "orders": []}
        ]
    })
}

/// Store seeded with mapping rules, the delivery dictionary and one source
pub fn seeded_store(has_boxes: bool, pending: Vec<PendingPackage>) -> Arc<FakeStore> {
    FakeStore::new(StoreState {
        rules: mapping_rules(),
        deliveries: deliveries(),
        sources: vec![endpoint(SOURCE, has_boxes)],
        pending,
        ..Default::default()
    })
}
