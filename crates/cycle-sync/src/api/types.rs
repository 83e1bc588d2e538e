//! Response bodies of the vendor API

use cycle_common::types::{composite_id, GroupId, PackageBox, PackageBoxItem, SourceId};
use serde::Deserialize;

/// Body of `fk:get_group_boxes`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GroupBoxes {
    #[serde(rename = "orderGroupId")]
    pub id: GroupId,
    pub boxes: Vec<VendorBox>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VendorBox {
    #[serde(rename = "boxId")]
    pub id: i64,
    #[serde(rename = "boxNumber")]
    pub number: i32,
    pub barcode: String,
    #[serde(rename = "boxTotalPrice")]
    pub price: f64,
    pub weight: i32,
    #[serde(rename = "orders")]
    pub items: Vec<VendorBoxItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VendorBoxItem {
    #[serde(rename = "orderId")]
    pub order_id: i64,
    pub alias: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "order_items_from")]
    pub from: i32,
    #[serde(rename = "order_items_to")]
    pub to: i32,
}

impl GroupBoxes {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Convert into package boxes with ids prefixed by `source`.
    pub fn into_package_boxes(self, source: SourceId, package_id: GroupId) -> Vec<PackageBox> {
        self.boxes
            .into_iter()
            .map(|b| {
                let box_id = composite_id(source, b.id);
                let items = b
                    .items
                    .into_iter()
                    .map(|item| PackageBoxItem {
                        box_id: box_id.clone(),
                        order_id: composite_id(source, item.order_id),
                        alias: item.alias,
                        kind: item.kind,
                        item_from: item.from,
                        item_to: item.to,
                    })
                    .collect();
                PackageBox {
                    source,
                    package_id,
                    box_id,
                    number: b.number,
                    barcode: b.barcode,
                    price: b.price,
                    weight: b.weight,
                    items,
                }
            })
            .collect()
    }
}

/// Element of `fk:get_groups_by_status_and_period`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetprintGroup {
    pub id: GroupId,
    pub status: GroupStatus,
    #[serde(rename = "tstamp")]
    pub created_ts: i64,
    pub boxes: Vec<NetprintBox>,
    /// Group is produced by the netprint factory
    pub npfactory: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GroupStatus {
    pub value: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetprintBox {
    pub number: i32,
    #[serde(rename = "orderNumber")]
    pub order_number: String,
}
