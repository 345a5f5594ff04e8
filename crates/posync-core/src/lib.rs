//! Core domain model for the PO warehouse sync pipeline.
//!
//! Holds the typed records for both entity shapes, the raw-value handoff
//! contract from source extractors, the lenient coercion primitives, and the
//! `EntityDescriptor` capability trait the load engine is generic over.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "posync-core";

/// A value as delivered by the legacy source, before any coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

/// One extracted row: lower-cased column name to raw value.
pub type RawRow = BTreeMap<String, SourceValue>;

/// A coerced value ready to be bound into a warehouse write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarehouseValue {
    Int(Option<i64>),
    Date(Option<NaiveDate>),
    Text(Option<String>),
    Timestamp(Option<DateTime<Utc>>),
}

/// Declared warehouse column type for DDL generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int64,
    Date,
    Text,
    TimestampTz,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// One key of a tie-break ordering; first key is most significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: &'static str,
    pub descending: bool,
}

impl SortKey {
    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            descending: true,
        }
    }

    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            descending: false,
        }
    }
}

/// Rolling business-date window bounding which rows stay "live".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionWindow {
    pub days_back: i64,
    pub days_forward: i64,
}

impl Default for RetentionWindow {
    fn default() -> Self {
        Self {
            days_back: 30,
            days_forward: 60,
        }
    }
}

/// Record key segment for an absent business date. Rows with an unknown
/// expected date are still grouped by identity and compete with each other.
pub const NULL_DATE_TOKEN: &str = "NULL";

/// Build the `{primary}_{secondary}_{YYYYMMDD|NULL}` business key.
///
/// Deterministic and pure; no case or whitespace normalization is applied
/// here, so callers must coerce first or keys may diverge for equivalent
/// data.
pub fn format_record_key(
    primary: &str,
    secondary: &str,
    business_date: Option<NaiveDate>,
) -> String {
    match business_date {
        Some(d) => format!("{}_{}_{}", primary, secondary, d.format("%Y%m%d")),
        None => format!("{}_{}_{}", primary, secondary, NULL_DATE_TOKEN),
    }
}

/// Lenient integer coercion: unparseable or missing becomes zero.
pub fn coerce_int(value: Option<&SourceValue>) -> i64 {
    match value {
        Some(SourceValue::Int(v)) => *v,
        Some(SourceValue::Float(f)) if f.is_finite() => f.trunc() as i64,
        Some(SourceValue::Text(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

/// Lenient date coercion: unparseable becomes absent, never an error.
pub fn coerce_date(value: Option<&SourceValue>) -> Option<NaiveDate> {
    match value {
        Some(SourceValue::Date(d)) => Some(*d),
        Some(SourceValue::Timestamp(ts)) => Some(ts.date_naive()),
        Some(SourceValue::Text(s)) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
                .ok()
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.date_naive()))
        }
        _ => None,
    }
}

/// Lenient string coercion: stringify, and map the textual `"None"`
/// null-sentinel that leaks from upstream to an empty string.
pub fn coerce_string(value: Option<&SourceValue>) -> String {
    match value {
        Some(SourceValue::Text(s)) if s == "None" => String::new(),
        Some(SourceValue::Text(s)) => s.clone(),
        Some(SourceValue::Int(v)) => v.to_string(),
        Some(SourceValue::Float(f)) => f.to_string(),
        Some(SourceValue::Date(d)) => d.format("%Y-%m-%d").to_string(),
        Some(SourceValue::Timestamp(ts)) => ts.to_rfc3339(),
        _ => String::new(),
    }
}

/// A typed record the load engine can key, stamp, and write.
pub trait WarehouseRecord {
    fn record_key(&self) -> Option<&str>;
    fn set_record_key(&mut self, key: String);
    fn set_load_timestamp(&mut self, at: DateTime<Utc>);
    /// Column name/value pairs in the entity's declared column order.
    fn values(&self) -> Vec<(&'static str, WarehouseValue)>;
}

/// Per-entity configuration as a capability interface.
///
/// One descriptor parameterizes the whole load/merge/sweep engine for its
/// entity type; adding another entity type means another implementation,
/// not engine changes.
pub trait EntityDescriptor: Send + Sync {
    type Row: WarehouseRecord + Clone + Send + Sync;

    fn entity(&self) -> &'static str;
    fn staging_table(&self) -> &str;
    fn final_table(&self) -> &str;

    /// Full ordered column list used by the merge insert/update clauses.
    /// Invariant: includes `record_key` and `load_timestamp`.
    fn columns(&self) -> &'static [&'static str];
    fn integer_columns(&self) -> &'static [&'static str];
    fn date_columns(&self) -> &'static [&'static str];
    fn string_columns(&self) -> &'static [&'static str];

    /// Tie-break ordering for window resolution.
    fn merge_order(&self) -> &'static [SortKey];

    /// Business-date column retention sweeps filter on.
    fn date_column(&self) -> &'static str;

    fn retention(&self) -> RetentionWindow {
        RetentionWindow::default()
    }

    fn cleanup_staging(&self) -> bool {
        true
    }

    fn cleanup_final(&self) -> bool {
        true
    }

    /// Derive the business key from a coerced row.
    fn derive_key(&self, row: &Self::Row) -> String;

    /// Coerce one raw extracted row into the typed record shape. Produces a
    /// fresh record; the raw row is left untouched.
    fn coerce(&self, raw: &RawRow) -> Self::Row;

    /// Declared warehouse schema, derived from the column classification.
    fn schema(&self) -> Vec<ColumnDef> {
        self.columns()
            .iter()
            .map(|&col| {
                let ty = if col == "load_timestamp" {
                    ColumnType::TimestampTz
                } else if self.integer_columns().contains(&col) {
                    ColumnType::Int64
                } else if self.date_columns().contains(&col) {
                    ColumnType::Date
                } else {
                    ColumnType::Text
                };
                ColumnDef::new(col, ty)
            })
            .collect()
    }
}

/// One purchase-order inbound fact: a (PO, SKU, expected-date) grain row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoRecord {
    pub store: String,
    pub vendor: String,
    pub ss: String,
    pub po_type: String,
    pub po_code: String,
    pub po: String,
    pub po_man: String,
    pub sku: String,
    pub style: String,
    pub skudesc1: String,
    pub expected_date: Option<NaiveDate>,
    pub cancel_date: Option<NaiveDate>,
    pub ooqty: i64,
    pub rcvdqty: i64,
    pub breakoutqty: i64,
    pub allocated: i64,
    pub unitinvc_per_sku: i64,
    pub shipped_sku: String,
    pub shipped_qty: i64,
    pub latest_datercv: Option<NaiveDate>,
    pub shipnotice_date: Option<NaiveDate>,
    pub record_key: Option<String>,
    pub load_timestamp: Option<DateTime<Utc>>,
}

impl WarehouseRecord for PoRecord {
    fn record_key(&self) -> Option<&str> {
        self.record_key.as_deref()
    }

    fn set_record_key(&mut self, key: String) {
        self.record_key = Some(key);
    }

    fn set_load_timestamp(&mut self, at: DateTime<Utc>) {
        self.load_timestamp = Some(at);
    }

    fn values(&self) -> Vec<(&'static str, WarehouseValue)> {
        vec![
            ("store", WarehouseValue::Text(Some(self.store.clone()))),
            ("vendor", WarehouseValue::Text(Some(self.vendor.clone()))),
            ("ss", WarehouseValue::Text(Some(self.ss.clone()))),
            ("type", WarehouseValue::Text(Some(self.po_type.clone()))),
            ("po_code", WarehouseValue::Text(Some(self.po_code.clone()))),
            ("po", WarehouseValue::Text(Some(self.po.clone()))),
            ("po_man", WarehouseValue::Text(Some(self.po_man.clone()))),
            ("sku", WarehouseValue::Text(Some(self.sku.clone()))),
            ("style", WarehouseValue::Text(Some(self.style.clone()))),
            ("skudesc1", WarehouseValue::Text(Some(self.skudesc1.clone()))),
            ("expected_date", WarehouseValue::Date(self.expected_date)),
            ("cancel_date", WarehouseValue::Date(self.cancel_date)),
            ("ooqty", WarehouseValue::Int(Some(self.ooqty))),
            ("rcvdqty", WarehouseValue::Int(Some(self.rcvdqty))),
            ("breakoutqty", WarehouseValue::Int(Some(self.breakoutqty))),
            ("allocated", WarehouseValue::Int(Some(self.allocated))),
            ("unitinvc_per_sku", WarehouseValue::Int(Some(self.unitinvc_per_sku))),
            ("shipped_sku", WarehouseValue::Text(Some(self.shipped_sku.clone()))),
            ("shipped_qty", WarehouseValue::Int(Some(self.shipped_qty))),
            ("latest_datercv", WarehouseValue::Date(self.latest_datercv)),
            ("shipnotice_date", WarehouseValue::Date(self.shipnotice_date)),
            ("record_key", WarehouseValue::Text(self.record_key.clone())),
            ("load_timestamp", WarehouseValue::Timestamp(self.load_timestamp)),
        ]
    }
}

/// One breakout allocation fact: a (manual PO, SKU, expected-date) grain row
/// tying a child breakout to its parent purchase order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakoutRecord {
    pub po_man: String,
    pub ss: String,
    pub vendor: String,
    pub sku: String,
    pub style: String,
    pub skudesc: String,
    pub ship_date: Option<NaiveDate>,
    pub exp_date: Option<NaiveDate>,
    pub store: String,
    pub breakout_qty: i64,
    pub record_key: Option<String>,
    pub load_timestamp: Option<DateTime<Utc>>,
}

impl WarehouseRecord for BreakoutRecord {
    fn record_key(&self) -> Option<&str> {
        self.record_key.as_deref()
    }

    fn set_record_key(&mut self, key: String) {
        self.record_key = Some(key);
    }

    fn set_load_timestamp(&mut self, at: DateTime<Utc>) {
        self.load_timestamp = Some(at);
    }

    fn values(&self) -> Vec<(&'static str, WarehouseValue)> {
        vec![
            ("po_man", WarehouseValue::Text(Some(self.po_man.clone()))),
            ("ss", WarehouseValue::Text(Some(self.ss.clone()))),
            ("vendor", WarehouseValue::Text(Some(self.vendor.clone()))),
            ("sku", WarehouseValue::Text(Some(self.sku.clone()))),
            ("style", WarehouseValue::Text(Some(self.style.clone()))),
            ("skudesc", WarehouseValue::Text(Some(self.skudesc.clone()))),
            ("ship_date", WarehouseValue::Date(self.ship_date)),
            ("exp_date", WarehouseValue::Date(self.exp_date)),
            ("store", WarehouseValue::Text(Some(self.store.clone()))),
            ("breakout_qty", WarehouseValue::Int(Some(self.breakout_qty))),
            ("record_key", WarehouseValue::Text(self.record_key.clone())),
            ("load_timestamp", WarehouseValue::Timestamp(self.load_timestamp)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn record_key_is_deterministic() {
        let a = format_record_key("PO001", "SKU001", Some(d(2026, 8, 1)));
        let b = format_record_key("PO001", "SKU001", Some(d(2026, 8, 1)));
        assert_eq!(a, b);
        assert_eq!(a, "PO001_SKU001_20260801");
    }

    #[test]
    fn record_key_changes_with_each_input() {
        let base = format_record_key("PO001", "SKU001", Some(d(2026, 8, 1)));
        assert_ne!(base, format_record_key("PO002", "SKU001", Some(d(2026, 8, 1))));
        assert_ne!(base, format_record_key("PO001", "SKU002", Some(d(2026, 8, 1))));
        assert_ne!(base, format_record_key("PO001", "SKU001", Some(d(2026, 8, 2))));
    }

    #[test]
    fn record_key_absent_date_uses_null_token() {
        let key = format_record_key("PO001", "SKU001", None);
        assert!(key.ends_with("_NULL"));
        assert_eq!(key, "PO001_SKU001_NULL");
    }

    #[test]
    fn int_coercion_degrades_to_zero() {
        assert_eq!(coerce_int(None), 0);
        assert_eq!(coerce_int(Some(&SourceValue::Null)), 0);
        assert_eq!(coerce_int(Some(&SourceValue::Text("garbage".into()))), 0);
        assert_eq!(coerce_int(Some(&SourceValue::Text("42".into()))), 42);
        assert_eq!(coerce_int(Some(&SourceValue::Text(" 7 ".into()))), 7);
        assert_eq!(coerce_int(Some(&SourceValue::Float(5.9))), 5);
        assert_eq!(coerce_int(Some(&SourceValue::Int(-3))), -3);
    }

    #[test]
    fn date_coercion_degrades_to_none() {
        assert_eq!(coerce_date(None), None);
        assert_eq!(coerce_date(Some(&SourceValue::Text("not-a-date".into()))), None);
        assert_eq!(
            coerce_date(Some(&SourceValue::Text("2026-08-01".into()))),
            Some(d(2026, 8, 1))
        );
        assert_eq!(
            coerce_date(Some(&SourceValue::Text("20260801".into()))),
            Some(d(2026, 8, 1))
        );
        assert_eq!(coerce_date(Some(&SourceValue::Date(d(2026, 1, 2)))), Some(d(2026, 1, 2)));
    }

    #[test]
    fn string_coercion_maps_none_sentinel_to_empty() {
        assert_eq!(coerce_string(Some(&SourceValue::Text("None".into()))), "");
        assert_eq!(coerce_string(Some(&SourceValue::Null)), "");
        assert_eq!(coerce_string(None), "");
        assert_eq!(coerce_string(Some(&SourceValue::Text("VENDOR1".into()))), "VENDOR1");
        assert_eq!(coerce_string(Some(&SourceValue::Int(110))), "110");
    }

    #[test]
    fn coercion_is_idempotent_on_coerced_values() {
        let once = coerce_int(Some(&SourceValue::Text("19".into())));
        assert_eq!(coerce_int(Some(&SourceValue::Int(once))), once);

        let date = coerce_date(Some(&SourceValue::Text("2026-08-01".into()))).unwrap();
        assert_eq!(coerce_date(Some(&SourceValue::Date(date))), Some(date));

        let text = coerce_string(Some(&SourceValue::Text("None".into())));
        assert_eq!(coerce_string(Some(&SourceValue::Text(text.clone()))), text);
    }
}
