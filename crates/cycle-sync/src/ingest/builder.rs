//! Data-driven mapping of vendor group JSON onto a [`Package`]
//!
//! Which JSON path feeds which package field is configured in the database
//! (`attr_json_map`), grouped by family: family 5 rules fill the package
//! header, family 6 rules produce key-value properties. Header values are
//! staged in a JSON object keyed by target field and converted into the
//! typed header in one lenient deserialization step, so a missing or oddly
//! typed vendor field leaves the zero value behind instead of failing.
//!
//! Barcodes are read from two fixed top-level arrays: `boxes` (box
//! barcodes) and `barcodes` (order barcodes).

use std::collections::HashMap;

use cycle_common::types::{
    BarcodeType, DeliveryMapping, FieldMappingRule, GroupId, Package, PackageBarcode,
    PackageProperty, SourceId,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::coerce::{self, lenient_date, lenient_i32, lenient_i64, lenient_string};
use super::lookup::lookup;

/// Property that is stored as "0" when the vendor omits it
pub const DEBT_PROPERTY: &str = "debt_sum";

const BOX_BARCODES_FIELD: &str = "boxes";
const ORDER_BARCODES_FIELD: &str = "barcodes";
const BARCODE_KEY: &str = "barcode";
const BOX_NUMBER_KEY: &str = "number";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("no mapping rules for family {family}")]
    MissingFamily { family: i32 },
}

/// Typed package header, filled from the staged field bag.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Header {
    #[serde(deserialize_with = "lenient_i64")]
    id: i64,
    #[serde(rename = "number", deserialize_with = "lenient_string")]
    id_name: String,
    #[serde(deserialize_with = "lenient_i64")]
    client_id: i64,
    #[serde(deserialize_with = "lenient_i32")]
    state: i32,
    #[serde(deserialize_with = "lenient_date")]
    execution_date: Option<chrono::NaiveDate>,
    #[serde(rename = "delivery_id", deserialize_with = "lenient_i32")]
    native_delivery_id: i32,
    #[serde(deserialize_with = "lenient_string")]
    delivery_name: String,
    #[serde(deserialize_with = "lenient_i32")]
    src_state: i32,
    #[serde(deserialize_with = "lenient_string")]
    src_state_name: String,
    #[serde(deserialize_with = "lenient_i32")]
    mail_service: i32,
    #[serde(deserialize_with = "lenient_i32")]
    orders_num: i32,
}

impl Header {
    fn into_package(self, source: SourceId) -> Package {
        Package {
            id: self.id,
            source,
            id_name: self.id_name,
            client_id: self.client_id,
            state: self.state,
            execution_date: self.execution_date,
            native_delivery_id: self.native_delivery_id,
            delivery_name: self.delivery_name,
            src_state: self.src_state,
            src_state_name: self.src_state_name,
            mail_service: self.mail_service,
            orders_num: self.orders_num,
            ..Default::default()
        }
    }
}

/// Turns raw vendor groups into packages using the configured rules.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    header_rules: Vec<FieldMappingRule>,
    property_rules: Vec<FieldMappingRule>,
    deliveries: HashMap<(SourceId, i32), i32>,
}

impl Builder {
    pub fn new(rules: Vec<FieldMappingRule>, deliveries: Vec<DeliveryMapping>) -> Self {
        let (header_rules, rest): (Vec<_>, Vec<_>) = rules
            .into_iter()
            .partition(|r| r.family == FieldMappingRule::HEADER_FAMILY);
        let property_rules = rest
            .into_iter()
            .filter(|r| r.family == FieldMappingRule::PROPERTY_FAMILY)
            .collect();
        let deliveries = deliveries
            .into_iter()
            .map(|d| ((d.source, d.vendor_delivery_id), d.internal_delivery_id))
            .collect();

        Self {
            header_rules,
            property_rules,
            deliveries,
        }
    }

    pub fn header_rule_count(&self) -> usize {
        self.header_rules.len()
    }

    pub fn property_rule_count(&self) -> usize {
        self.property_rules.len()
    }

    /// Map one vendor group onto a package. Boxes are left empty.
    ///
    /// Fails only when the header or property rules were never configured.
    pub fn build_package(
        &self,
        source: SourceId,
        raw: &Map<String, Value>,
    ) -> Result<Package, BuildError> {
        if self.header_rules.is_empty() {
            return Err(BuildError::MissingFamily {
                family: FieldMappingRule::HEADER_FAMILY,
            });
        }
        if self.property_rules.is_empty() {
            return Err(BuildError::MissingFamily {
                family: FieldMappingRule::PROPERTY_FAMILY,
            });
        }

        let mut package = self.build_header(source, raw);

        if let Some(internal) = self.deliveries.get(&(source, package.native_delivery_id)) {
            package.delivery_id = *internal;
        }

        package.properties = self.build_properties(source, package.id, raw);

        let mut barcodes = Vec::new();
        scan_barcodes(raw, BOX_BARCODES_FIELD, BarcodeType::Box, source, package.id, &mut barcodes);
        scan_barcodes(
            raw,
            ORDER_BARCODES_FIELD,
            BarcodeType::Order,
            source,
            package.id,
            &mut barcodes,
        );
        package.barcodes = barcodes;

        Ok(package)
    }

    fn build_header(&self, source: SourceId, raw: &Map<String, Value>) -> Package {
        let mut staged = Map::new();
        for rule in &self.header_rules {
            if let Some(value) = lookup(raw, &rule.json_path) {
                staged.insert(rule.target_field.clone(), value.clone());
            }
        }

        let header = match serde_json::from_value::<Header>(Value::Object(staged)) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(source, error = %e, "Package header not coercible, using defaults");
                Header::default()
            },
        };
        header.into_package(source)
    }

    fn build_properties(
        &self,
        source: SourceId,
        package_id: GroupId,
        raw: &Map<String, Value>,
    ) -> Vec<PackageProperty> {
        self.property_rules
            .iter()
            .filter_map(|rule| {
                let value = match lookup(raw, &rule.json_path) {
                    Some(value) => coerce::to_string(value),
                    None => missing_property_default(&rule.target_field)?.to_string(),
                };
                if value.is_empty() {
                    return None;
                }
                Some(PackageProperty {
                    source,
                    package_id,
                    property: rule.target_field.clone(),
                    value,
                })
            })
            .collect()
    }
}

fn missing_property_default(field: &str) -> Option<&'static str> {
    match field {
        DEBT_PROPERTY => Some("0"),
        _ => None,
    }
}

fn scan_barcodes(
    raw: &Map<String, Value>,
    field: &str,
    kind: BarcodeType,
    source: SourceId,
    package_id: GroupId,
    out: &mut Vec<PackageBarcode>,
) {
    let Some(Value::Array(entries)) = raw.get(field) else {
        return;
    };

    for entry in entries {
        let Value::Object(entry) = entry else {
            continue;
        };
        let barcode = entry.get(BARCODE_KEY).map(coerce::to_string).unwrap_or_default();
        if barcode.is_empty() {
            continue;
        }
        out.push(PackageBarcode {
            source,
            package_id,
            barcode,
            kind,
            box_number: entry.get(BOX_NUMBER_KEY).map(coerce::to_i32).unwrap_or_default(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn rule(family: i32, json_path: &str, target_field: &str) -> FieldMappingRule {
        FieldMappingRule {
            source_type: 0,
            family,
            json_path: json_path.to_string(),
            target_field: target_field.to_string(),
            is_list: false,
        }
    }

    fn header(json_path: &str, target_field: &str) -> FieldMappingRule {
        rule(FieldMappingRule::HEADER_FAMILY, json_path, target_field)
    }

    fn property(json_path: &str, target_field: &str) -> FieldMappingRule {
        rule(FieldMappingRule::PROPERTY_FAMILY, json_path, target_field)
    }

    fn sample_builder() -> Builder {
        Builder::new(
            vec![
                header("id", "id"),
                header("number", "number"),
                header("client.id", "client_id"),
                header("delivery.id", "delivery_id"),
                header("delivery.title", "delivery_name"),
                header("execution_date", "execution_date"),
                header("status.value", "src_state"),
                header("status.title", "src_state_name"),
                property("client.phone", "phone"),
                property("client.email", "email"),
                property("comment", "comment"),
                property("debt.sum", DEBT_PROPERTY),
                property("total", "total"),
            ],
            vec![DeliveryMapping {
                source: 7,
                vendor_delivery_id: 21,
                internal_delivery_id: 3,
                set_send: false,
            }],
        )
    }

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("raw group must be an object"),
        }
    }

    fn sample_group() -> Map<String, Value> {
        raw(json!({
            "id": 349141,
            "number": "349141-A",
            "client": {"id": "5512", "phone": "+375291112233", "email": ""},
            "delivery": {"id": 21, "title": "Courier"},
            "execution_date": "14.03.2021",
            "status": {"value": "30", "title": "Ready"},
            "total": 62.77,
            "boxes": [
                {"barcode": "", "number": 1},
                {"barcode": "BX-2", "number": 2}
            ]
        }))
    }

    #[test]
    fn test_missing_header_family_is_config_error() {
        let builder = Builder::new(vec![property("comment", "comment")], vec![]);
        let err = builder.build_package(7, &sample_group()).unwrap_err();
        assert_eq!(err, BuildError::MissingFamily { family: 5 });
    }

    #[test]
    fn test_missing_property_family_is_config_error() {
        let builder = Builder::new(vec![header("id", "id")], vec![]);
        let err = builder.build_package(7, &sample_group()).unwrap_err();
        assert_eq!(err, BuildError::MissingFamily { family: 6 });
    }

    #[test]
    fn test_rules_of_other_families_are_ignored() {
        let builder = Builder::new(
            vec![header("id", "id"), property("total", "total"), rule(9, "x", "x")],
            vec![],
        );
        assert_eq!(builder.header_rule_count(), 1);
        assert_eq!(builder.property_rule_count(), 1);
    }

    #[test]
    fn test_header_fields() {
        let package = sample_builder().build_package(7, &sample_group()).unwrap();

        assert_eq!(package.id, 349141);
        assert_eq!(package.source, 7);
        assert_eq!(package.id_name, "349141-A");
        assert_eq!(package.client_id, 5512);
        assert_eq!(package.native_delivery_id, 21);
        assert_eq!(package.delivery_name, "Courier");
        assert_eq!(package.src_state, 30);
        assert_eq!(package.src_state_name, "Ready");
        assert_eq!(package.execution_date, NaiveDate::from_ymd_opt(2021, 3, 14));
        assert!(package.boxes.is_empty());
    }

    #[test]
    fn test_absent_header_fields_stay_zero() {
        let package = sample_builder()
            .build_package(7, &raw(json!({"id": 10})))
            .unwrap();

        assert_eq!(package.id, 10);
        assert_eq!(package.client_id, 0);
        assert_eq!(package.id_name, "");
        assert_eq!(package.execution_date, None);
        assert_eq!(package.native_delivery_id, 0);
        assert_eq!(package.delivery_id, 0);
    }

    #[test]
    fn test_wrongly_typed_header_fields_degrade() {
        let package = sample_builder()
            .build_package(
                7,
                &raw(json!({
                    "id": {"nested": true},
                    "client": "anonymous",
                    "execution_date": "asap"
                })),
            )
            .unwrap();

        assert_eq!(package.id, 0);
        assert_eq!(package.client_id, 0);
        assert_eq!(package.execution_date, None);
    }

    #[test]
    fn test_delivery_translation() {
        let package = sample_builder().build_package(7, &sample_group()).unwrap();
        assert_eq!(package.delivery_id, 3);
    }

    #[test]
    fn test_delivery_mapping_is_per_source() {
        let package = sample_builder().build_package(8, &sample_group()).unwrap();
        assert_eq!(package.native_delivery_id, 21);
        assert_eq!(package.delivery_id, 0);
    }

    #[test]
    fn test_properties_skip_missing_and_empty() {
        let package = sample_builder().build_package(7, &sample_group()).unwrap();

        let props: Vec<(&str, &str)> = package
            .properties
            .iter()
            .map(|p| (p.property.as_str(), p.value.as_str()))
            .collect();

        // email is empty, comment is absent
        assert_eq!(
            props,
            vec![("phone", "+375291112233"), (DEBT_PROPERTY, "0"), ("total", "62.77")]
        );
        assert!(package
            .properties
            .iter()
            .all(|p| p.source == 7 && p.package_id == 349141));
    }

    #[test]
    fn test_debt_property_uses_vendor_value_when_present() {
        let mut group = sample_group();
        group.insert("debt".into(), json!({"sum": 15}));
        let package = sample_builder().build_package(7, &group).unwrap();

        let debt = package
            .properties
            .iter()
            .find(|p| p.property == DEBT_PROPERTY)
            .unwrap();
        assert_eq!(debt.value, "15");
    }

    #[test]
    fn test_box_barcodes_skip_empty() {
        let package = sample_builder().build_package(7, &sample_group()).unwrap();

        assert_eq!(package.barcodes.len(), 1);
        let barcode = &package.barcodes[0];
        assert_eq!(barcode.barcode, "BX-2");
        assert_eq!(barcode.kind, BarcodeType::Box);
        assert_eq!(barcode.box_number, 2);
        assert_eq!(barcode.package_id, 349141);
    }

    #[test]
    fn test_order_barcodes() {
        let mut group = sample_group();
        group.insert(
            "barcodes".into(),
            json!([{"barcode": 777001}, "junk", {"number": 3}, {"barcode": "OB-2", "number": "4"}]),
        );
        let package = sample_builder().build_package(7, &group).unwrap();

        let orders: Vec<_> = package
            .barcodes
            .iter()
            .filter(|b| b.kind == BarcodeType::Order)
            .map(|b| (b.barcode.as_str(), b.box_number))
            .collect();
        assert_eq!(orders, vec![("777001", 0), ("OB-2", 4)]);
    }

    #[test]
    fn test_barcode_fields_not_arrays_are_ignored() {
        let mut group = sample_group();
        group.insert("boxes".into(), json!({"barcode": "X"}));
        group.insert("barcodes".into(), json!("Y"));
        let package = sample_builder().build_package(7, &group).unwrap();
        assert!(package.barcodes.is_empty());
    }

    #[test]
    fn test_empty_group() {
        let package = sample_builder().build_package(7, &Map::new()).unwrap();
        assert_eq!(package.id, 0);
        assert_eq!(package.source, 7);
        assert_eq!(package.properties.len(), 1);
        assert!(package.barcodes.is_empty());
    }
}
