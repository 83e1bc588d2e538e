//! Domain types shared by the sync workers
//!
//! A vendor "order group" is ingested as one [`Package`] aggregate. The
//! package exclusively owns its properties, barcodes and boxes; boxes own
//! their items. Nothing here talks to the database or the network.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CycleError, Result};

/// Identifier of a registered vendor site
pub type SourceId = i32;

/// Identifier of an order group at the vendor, also the package id
pub type GroupId = i64;

/// Date format used by the vendor for `execution_date`
pub const EXECUTION_DATE_FORMAT: &str = "%d.%m.%Y";

/// Parse a vendor execution date.
///
/// The vendor sends `dd.mm.yyyy`; ISO dates are accepted as well.
pub fn parse_execution_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, EXECUTION_DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|e| CycleError::Parse(format!("execution date '{}': {}", raw, e)))
}

// ============================================================================
// Package Aggregate
// ============================================================================

/// One customer order batch, mapped from a vendor order group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Package {
    /// Vendor group id
    pub id: GroupId,
    /// Vendor site the group came from
    pub source: SourceId,
    /// Human readable group number
    pub id_name: String,
    pub client_id: i64,
    pub state: i32,
    pub execution_date: Option<NaiveDate>,
    /// Delivery code as sent by the vendor
    pub native_delivery_id: i32,
    /// Delivery type after translation through the delivery dictionary
    pub delivery_id: i32,
    pub delivery_name: String,
    pub src_state: i32,
    pub src_state_name: String,
    pub mail_service: i32,
    pub orders_num: i32,
    pub properties: Vec<PackageProperty>,
    pub barcodes: Vec<PackageBarcode>,
    pub boxes: Vec<PackageBox>,
}

impl Package {
    pub fn new(source: SourceId, id: GroupId) -> Self {
        Self {
            id,
            source,
            ..Default::default()
        }
    }

    /// Set the package id and rewrite it on every owned child record.
    pub fn set_id(&mut self, id: GroupId) {
        self.id = id;
        for property in &mut self.properties {
            property.package_id = id;
        }
        for barcode in &mut self.barcodes {
            barcode.package_id = id;
        }
        for package_box in &mut self.boxes {
            package_box.package_id = id;
        }
    }

    /// Number of box items across all boxes
    pub fn item_count(&self) -> usize {
        self.boxes.iter().map(|b| b.items.len()).sum()
    }
}

/// Key-value attribute of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageProperty {
    pub source: SourceId,
    pub package_id: GroupId,
    pub property: String,
    pub value: String,
}

/// Kind of barcode attached to a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum BarcodeType {
    /// Bare order barcode from the `barcodes` list
    Order = 1,
    /// Barcode of a shipping box from the `boxes` list
    Box = 2,
}

impl BarcodeType {
    pub fn code(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for BarcodeType {
    type Error = CycleError;

    fn try_from(code: i16) -> Result<Self> {
        match code {
            1 => Ok(BarcodeType::Order),
            2 => Ok(BarcodeType::Box),
            other => Err(CycleError::UnknownBarcodeType(other)),
        }
    }
}

impl std::fmt::Display for BarcodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BarcodeType::Order => write!(f, "order"),
            BarcodeType::Box => write!(f, "box"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageBarcode {
    pub source: SourceId,
    pub package_id: GroupId,
    pub barcode: String,
    pub kind: BarcodeType,
    pub box_number: i32,
}

/// Physical shipping container of a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageBox {
    pub source: SourceId,
    pub package_id: GroupId,
    /// `"{source}-{vendor box id}"`, unique across sources
    pub box_id: String,
    pub number: i32,
    pub barcode: String,
    pub price: f64,
    pub weight: i32,
    pub items: Vec<PackageBoxItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageBoxItem {
    pub box_id: String,
    /// `"{source}-{vendor order id}"`
    pub order_id: String,
    pub alias: String,
    pub kind: String,
    pub item_from: i32,
    pub item_to: i32,
}

/// Builds the cross-source identifier used for boxes and box items.
pub fn composite_id(source: SourceId, native: impl std::fmt::Display) -> String {
    format!("{}-{}", source, native)
}

// ============================================================================
// Queue And Configuration Records
// ============================================================================

/// Order group reported by the vendor that is not ingested yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPackage {
    pub source: SourceId,
    pub id: GroupId,
    pub client_id: i64,
    pub created: DateTime<Utc>,
    pub attempt: i32,
}

/// Data-driven mapping of one JSON path onto a package field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMappingRule {
    /// Vendor source type the rule applies to
    pub source_type: i32,
    /// Target record discriminator, see [`FieldMappingRule::HEADER_FAMILY`]
    pub family: i32,
    /// Dotted path inside the vendor JSON
    pub json_path: String,
    /// Package field or property name
    pub target_field: String,
    pub is_list: bool,
}

impl FieldMappingRule {
    /// Rules that populate the package header
    pub const HEADER_FAMILY: i32 = 5;
    /// Rules that produce package properties
    pub const PROPERTY_FAMILY: i32 = 6;
}

/// Vendor delivery code to internal delivery type, per source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMapping {
    pub source: SourceId,
    pub vendor_delivery_id: i32,
    pub internal_delivery_id: i32,
    pub set_send: bool,
}

/// Registered vendor site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEndpoint {
    pub id: SourceId,
    pub url: String,
    pub kind: i32,
    pub app_key: String,
    /// Site exposes the group boxes sub-resource
    pub has_boxes: bool,
}

/// Netprint (post office) number assigned to a package box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupNetprint {
    pub source: SourceId,
    pub group_id: GroupId,
    pub netprint_id: String,
    pub state: i32,
    pub box_number: i32,
}

impl GroupNetprint {
    /// Netprint id stored for groups whose boxes are not filled yet
    pub const NOT_PROCESSED: &'static str = "notprocessed";
}
