//! PostgreSQL storage for packages, the pending queue and netprint rows

use async_trait::async_trait;
use cycle_common::types::{
    DeliveryMapping, FieldMappingRule, GroupNetprint, Package, PackageBarcode, PackageBox,
    PackageBoxItem, PackageProperty, PendingPackage, SourceEndpoint, SourceId,
};
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres};
use tracing::debug;

use super::batch::{BatchPersister, InsertRow};
use crate::error::Result;

/// State written for freshly ingested packages, boxes and items
pub const STATE_NEW: i32 = 200;

/// Smallest statement ceiling that still fits the widest row written here
pub const MIN_PARAMS_PER_STATEMENT: usize = widest(&[
    Package::PLACEHOLDERS,
    PackageProperty::PLACEHOLDERS,
    PackageBarcode::PLACEHOLDERS,
    PackageBox::PLACEHOLDERS,
    PackageBoxItem::PLACEHOLDERS,
    GroupNetprint::PLACEHOLDERS,
]);

/// Vendor source types whose JSON mapping rules the builder understands
const MAPPED_SOURCE_TYPES: [i32; 2] = [0, 4];

const INSERT_PACKAGE: &str = "INSERT INTO package (source, id, client_id, id_name, execution_date, \
     delivery_id, native_delivery_id, delivery_name, src_state, src_state_name, mail_service, \
     orders_num, state, state_date) ";
const INSERT_PROPERTY: &str = "INSERT INTO package_prop (source, package_id, property, value) ";
const INSERT_BARCODE: &str =
    "INSERT INTO package_barcode (source, package_id, barcode, bar_type, box_number) ";
const INSERT_BOX: &str = "INSERT INTO package_box (source, package_id, box_id, box_num, barcode, \
     price, weight, state, state_date) ";
const INSERT_BOX_ITEM: &str = "INSERT INTO package_box_item (box_id, order_id, alias, item_from, \
     item_to, type, state, state_date) ";
const INSERT_NETPRINT: &str =
    "INSERT INTO group_netprint (source, group_id, netprint_id, state, box_number) ";

/// Storage operations used by the package ingestion job.
#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn load_field_mappings(&self) -> Result<Vec<FieldMappingRule>>;

    async fn load_delivery_mappings(&self) -> Result<Vec<DeliveryMapping>>;

    async fn list_sources(&self) -> Result<Vec<SourceEndpoint>>;

    /// Pending references of all sources, oldest first
    async fn list_pending_packages(&self) -> Result<Vec<PendingPackage>>;

    /// Store `attempt` as the new attempt counter of `pending`.
    async fn increment_attempt(&self, pending: &PendingPackage, attempt: i32) -> Result<()>;

    /// Remove a reference that will not be retried.
    async fn drop_pending(&self, pending: &PendingPackage) -> Result<()>;

    /// Persist one package and delete its pending reference atomically.
    async fn save_new_package(&self, package: &Package) -> Result<()>;
}

/// Storage operations used by the netprint sync.
#[async_trait]
pub trait NetprintStore: Send + Sync {
    async fn find_source(&self, source: SourceId) -> Result<Option<SourceEndpoint>>;

    /// Unix timestamp of the last successful sync, 0 when never synced
    async fn last_netprint_sync(&self, source: SourceId) -> Result<i64>;

    async fn set_last_netprint_sync(&self, source: SourceId, timestamp: i64) -> Result<()>;

    async fn add_netprints(&self, netprints: &[GroupNetprint]) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    batch: BatchPersister,
}

impl PgStore {
    pub fn new(pool: PgPool, batch: BatchPersister) -> Self {
        Self { pool, batch }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Write packages with all owned rows in one transaction, then remove
    /// their pending references. Nothing is visible unless everything is.
    pub async fn persist_packages(&self, packages: &[Package]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }

        let properties: Vec<&PackageProperty> =
            packages.iter().flat_map(|p| &p.properties).collect();
        let barcodes: Vec<&PackageBarcode> = packages.iter().flat_map(|p| &p.barcodes).collect();
        let boxes: Vec<&PackageBox> = packages.iter().flat_map(|p| &p.boxes).collect();
        let items: Vec<&PackageBoxItem> = boxes.iter().flat_map(|b| &b.items).collect();

        let mut tx = self.pool.begin().await?;

        self.batch.insert_batch(&mut tx, INSERT_PACKAGE, packages).await?;
        if !properties.is_empty() {
            self.batch.insert_batch(&mut tx, INSERT_PROPERTY, &properties).await?;
        }
        if !barcodes.is_empty() {
            self.batch.insert_batch(&mut tx, INSERT_BARCODE, &barcodes).await?;
        }
        if !boxes.is_empty() {
            self.batch.insert_batch(&mut tx, INSERT_BOX, &boxes).await?;
        }
        if !items.is_empty() {
            self.batch.insert_batch(&mut tx, INSERT_BOX_ITEM, &items).await?;
        }

        for package in packages {
            sqlx::query("DELETE FROM package_new WHERE source = $1 AND id = $2")
                .bind(package.source)
                .bind(package.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(
            packages = packages.len(),
            properties = properties.len(),
            barcodes = barcodes.len(),
            boxes = boxes.len(),
            items = items.len(),
            "Packages persisted"
        );
        Ok(())
    }
}

#[async_trait]
impl PackageStore for PgStore {
    async fn load_field_mappings(&self) -> Result<Vec<FieldMappingRule>> {
        let rows: Vec<(i32, i32, String, String, bool)> = sqlx::query_as(
            "SELECT m.src_type, t.family, m.json_key, t.field, t.list \
             FROM attr_json_map m \
             JOIN attr_type t ON t.id = m.attr_type \
             WHERE m.src_type = ANY($1) \
             ORDER BY t.family, t.id",
        )
        .bind(&MAPPED_SOURCE_TYPES[..])
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(source_type, family, json_path, target_field, is_list)| FieldMappingRule {
                source_type,
                family,
                json_path,
                target_field,
                is_list,
            })
            .collect())
    }

    async fn load_delivery_mappings(&self) -> Result<Vec<DeliveryMapping>> {
        let rows: Vec<(i32, i32, i32, bool)> = sqlx::query_as(
            "SELECT source, site_id, delivery_type, set_send \
             FROM delivery_type_dictionary \
             WHERE delivery_type != 0",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(source, vendor_delivery_id, internal_delivery_id, set_send)| DeliveryMapping {
                    source,
                    vendor_delivery_id,
                    internal_delivery_id,
                    set_send,
                },
            )
            .collect())
    }

    async fn list_sources(&self) -> Result<Vec<SourceEndpoint>> {
        let rows: Vec<EndpointRow> =
            sqlx::query_as("SELECT id, url, type, app_key, has_boxes FROM source_url ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(endpoint_from_row).collect())
    }

    async fn list_pending_packages(&self) -> Result<Vec<PendingPackage>> {
        let rows: Vec<(i32, i64, i64, chrono::DateTime<chrono::Utc>, i32)> = sqlx::query_as(
            "SELECT source, id, client_id, created, attempt FROM package_new ORDER BY created, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(source, id, client_id, created, attempt)| PendingPackage {
                source,
                id,
                client_id,
                created,
                attempt,
            })
            .collect())
    }

    async fn increment_attempt(&self, pending: &PendingPackage, attempt: i32) -> Result<()> {
        sqlx::query("UPDATE package_new SET attempt = $1 WHERE source = $2 AND id = $3")
            .bind(attempt)
            .bind(pending.source)
            .bind(pending.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn drop_pending(&self, pending: &PendingPackage) -> Result<()> {
        sqlx::query("DELETE FROM package_new WHERE source = $1 AND id = $2")
            .bind(pending.source)
            .bind(pending.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_new_package(&self, package: &Package) -> Result<()> {
        self.persist_packages(std::slice::from_ref(package)).await
    }
}

#[async_trait]
impl NetprintStore for PgStore {
    async fn find_source(&self, source: SourceId) -> Result<Option<SourceEndpoint>> {
        let row: Option<EndpointRow> =
            sqlx::query_as("SELECT id, url, type, app_key, has_boxes FROM source_url WHERE id = $1")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(endpoint_from_row))
    }

    async fn last_netprint_sync(&self, source: SourceId) -> Result<i64> {
        let timestamp: Option<i64> =
            sqlx::query_scalar("SELECT np_sync_tstamp FROM sources_sync WHERE id = $1")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;
        Ok(timestamp.unwrap_or(0))
    }

    async fn set_last_netprint_sync(&self, source: SourceId, timestamp: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO sources_sync (id, np_sync_tstamp) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET np_sync_tstamp = EXCLUDED.np_sync_tstamp",
        )
        .bind(source)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_netprints(&self, netprints: &[GroupNetprint]) -> Result<u64> {
        if netprints.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.acquire().await?;
        Ok(self.batch.insert_batch(&mut conn, INSERT_NETPRINT, netprints).await?)
    }
}

type EndpointRow = (i32, String, i32, String, bool);

fn endpoint_from_row((id, url, kind, app_key, has_boxes): EndpointRow) -> SourceEndpoint {
    SourceEndpoint {
        id,
        url,
        kind,
        app_key,
        has_boxes,
    }
}

// ============================================================================
// Row Bindings
// ============================================================================

impl InsertRow for Package {
    const PLACEHOLDERS: usize = 12;

    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(self.source)
            .push_bind(self.id)
            .push_bind(self.client_id)
            .push_bind(self.id_name.as_str())
            .push_bind(self.execution_date)
            .push_bind(self.delivery_id)
            .push_bind(self.native_delivery_id)
            .push_bind(self.delivery_name.as_str())
            .push_bind(self.src_state)
            .push_bind(self.src_state_name.as_str())
            .push_bind(self.mail_service)
            .push_bind(self.orders_num)
            .push(STATE_NEW)
            .push("NOW()");
    }
}

impl InsertRow for PackageProperty {
    const PLACEHOLDERS: usize = 4;

    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(self.source)
            .push_bind(self.package_id)
            .push_bind(self.property.as_str())
            .push_bind(self.value.as_str());
    }
}

impl InsertRow for PackageBarcode {
    const PLACEHOLDERS: usize = 5;

    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(self.source)
            .push_bind(self.package_id)
            .push_bind(self.barcode.as_str())
            .push_bind(self.kind.code())
            .push_bind(self.box_number);
    }
}

impl InsertRow for PackageBox {
    const PLACEHOLDERS: usize = 7;

    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(self.source)
            .push_bind(self.package_id)
            .push_bind(self.box_id.as_str())
            .push_bind(self.number)
            .push_bind(self.barcode.as_str())
            .push_bind(self.price)
            .push_bind(self.weight)
            .push(STATE_NEW)
            .push("NOW()");
    }
}

impl InsertRow for PackageBoxItem {
    const PLACEHOLDERS: usize = 6;

    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(self.box_id.as_str())
            .push_bind(self.order_id.as_str())
            .push_bind(self.alias.as_str())
            .push_bind(self.item_from)
            .push_bind(self.item_to)
            .push_bind(self.kind.as_str())
            .push(STATE_NEW)
            .push("NOW()");
    }
}

impl InsertRow for GroupNetprint {
    const PLACEHOLDERS: usize = 5;

    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(self.source)
            .push_bind(self.group_id)
            .push_bind(self.netprint_id.as_str())
            .push_bind(self.state)
            .push_bind(self.box_number);
    }
}

const fn widest(placeholders: &[usize]) -> usize {
    let mut max = 0;
    let mut i = 0;
    while i < placeholders.len() {
        if placeholders[i] > max {
            max = placeholders[i];
        }
        i += 1;
    }
    max
}
