//! Purchase-order inbound adapter: extraction template, mock fixtures, and
//! the PO entity descriptor.

use chrono::{Duration, NaiveDate, Utc};
use posync_core::{
    coerce_date, coerce_int, coerce_string, format_record_key, EntityDescriptor, PoRecord, RawRow,
    SortKey, SourceValue,
};
use tracing::info;

use crate::{raw_row, DateRange, ExtractError, SourceExtractor};

pub const DEFAULT_STAGING_TABLE: &str = "po_inbound_daily";
pub const DEFAULT_FINAL_TABLE: &str = "po_inbound_final";

/// Extraction template against the legacy replica. The record key is
/// derived at the source for this entity; rows missing it are keyed again
/// before staging.
pub const QUERY: &str = r#"
SELECT
    h.po_store AS store,
    v.vend_name AS vendor,
    s.ss_no AS ss,
    COALESCE(t.po_type, 'INVALID') AS type,
    h.po_code AS po_code,
    h.po_no AS po,
    h.po_man AS po_man,
    s.sku_no AS sku,
    s.style AS style,
    s.sku_desc1 AS skudesc1,
    h.date_exp AS expected_date,
    h.date_canc AS cancel_date,
    SUM(d.oo_unit) AS ooqty,
    SUM(d.rc_unit) AS rcvdqty,
    COALESCE(MAX(b.breakout_qty), 0) AS breakoutqty,
    COALESCE(MAX(b.allocated), 0) AS allocated,
    COALESCE(MAX(i.unitinvc_per_sku), 0) AS unitinvc_per_sku,
    MAX(a.sku_no) AS shipped_sku,
    COALESCE(MAX(a.asn_qty), 0) AS shipped_qty,
    MAX(r.date_rcv) AS latest_datercv,
    MAX(a.shipnotice_date) AS shipnotice_date,
    h.po_no || '_' || s.sku_no || '_' || COALESCE(TO_CHAR(h.date_exp, 'YYYYMMDD'), 'NULL') AS record_key
FROM pohdr h
JOIN podtl d ON d.po_no = h.po_no
JOIN skufile s ON s.sku_no = d.sku_no
JOIN vendmain v ON v.vend_no = s.vend_no1
LEFT JOIN potype t ON t.po_no = h.po_no
LEFT JOIN purhst_latest r ON r.po_no = h.po_no
LEFT JOIN asn_details a ON a.po_no = h.po_no AND a.sku_no = s.sku_no
LEFT JOIN invoice_sums i ON i.po_no = h.po_no AND i.sku_no = s.sku_no
LEFT JOIN breakout_sums b ON b.po_man = h.po_man AND b.sku_no = s.sku_no
WHERE h.date_exp BETWEEN :START_DATE AND :END_DATE
  AND h.po_code IN ('O', 'D')
  AND t.po_type IN ('P', 'R')
GROUP BY h.po_store, v.vend_name, s.ss_no, t.po_type, h.po_code, h.po_no,
         h.po_man, s.sku_no, s.style, s.sku_desc1, h.date_exp, h.date_canc
ORDER BY h.po_no, s.sku_no
"#;

pub const COLUMNS: &[&str] = &[
    "store",
    "vendor",
    "ss",
    "type",
    "po_code",
    "po",
    "po_man",
    "sku",
    "style",
    "skudesc1",
    "expected_date",
    "cancel_date",
    "ooqty",
    "rcvdqty",
    "breakoutqty",
    "allocated",
    "unitinvc_per_sku",
    "shipped_sku",
    "shipped_qty",
    "latest_datercv",
    "shipnotice_date",
    "record_key",
    "load_timestamp",
];

const INTEGER_COLUMNS: &[&str] = &[
    "ooqty",
    "rcvdqty",
    "breakoutqty",
    "allocated",
    "unitinvc_per_sku",
    "shipped_qty",
];

const DATE_COLUMNS: &[&str] = &[
    "expected_date",
    "cancel_date",
    "latest_datercv",
    "shipnotice_date",
];

const STRING_COLUMNS: &[&str] = &[
    "store",
    "vendor",
    "ss",
    "type",
    "po_code",
    "po",
    "po_man",
    "sku",
    "style",
    "skudesc1",
    "shipped_sku",
    "record_key",
];

/// Latest arrival wins; ship-notice, latest-receipt, received quantity and
/// ordered quantity break remaining ties in that order.
const MERGE_ORDER: &[SortKey] = &[
    SortKey::desc("load_timestamp"),
    SortKey::desc("shipnotice_date"),
    SortKey::desc("latest_datercv"),
    SortKey::desc("rcvdqty"),
    SortKey::desc("ooqty"),
];

/// Descriptor for the purchase-order entity.
#[derive(Debug, Clone)]
pub struct PoEntity {
    staging_table: String,
    final_table: String,
}

impl PoEntity {
    pub fn new(staging_table: impl Into<String>, final_table: impl Into<String>) -> Self {
        Self {
            staging_table: staging_table.into(),
            final_table: final_table.into(),
        }
    }
}

impl Default for PoEntity {
    fn default() -> Self {
        Self::new(DEFAULT_STAGING_TABLE, DEFAULT_FINAL_TABLE)
    }
}

impl EntityDescriptor for PoEntity {
    type Row = PoRecord;

    fn entity(&self) -> &'static str {
        "po"
    }

    fn staging_table(&self) -> &str {
        &self.staging_table
    }

    fn final_table(&self) -> &str {
        &self.final_table
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn integer_columns(&self) -> &'static [&'static str] {
        INTEGER_COLUMNS
    }

    fn date_columns(&self) -> &'static [&'static str] {
        DATE_COLUMNS
    }

    fn string_columns(&self) -> &'static [&'static str] {
        STRING_COLUMNS
    }

    fn merge_order(&self) -> &'static [SortKey] {
        MERGE_ORDER
    }

    fn date_column(&self) -> &'static str {
        "expected_date"
    }

    fn derive_key(&self, row: &PoRecord) -> String {
        format_record_key(&row.po, &row.sku, row.expected_date)
    }

    fn coerce(&self, raw: &RawRow) -> PoRecord {
        PoRecord {
            store: coerce_string(raw.get("store")),
            vendor: coerce_string(raw.get("vendor")),
            ss: coerce_string(raw.get("ss")),
            po_type: coerce_string(raw.get("type")),
            po_code: coerce_string(raw.get("po_code")),
            po: coerce_string(raw.get("po")),
            po_man: coerce_string(raw.get("po_man")),
            sku: coerce_string(raw.get("sku")),
            style: coerce_string(raw.get("style")),
            skudesc1: coerce_string(raw.get("skudesc1")),
            expected_date: coerce_date(raw.get("expected_date")),
            cancel_date: coerce_date(raw.get("cancel_date")),
            ooqty: coerce_int(raw.get("ooqty")),
            rcvdqty: coerce_int(raw.get("rcvdqty")),
            breakoutqty: coerce_int(raw.get("breakoutqty")),
            allocated: coerce_int(raw.get("allocated")),
            unitinvc_per_sku: coerce_int(raw.get("unitinvc_per_sku")),
            shipped_sku: coerce_string(raw.get("shipped_sku")),
            shipped_qty: coerce_int(raw.get("shipped_qty")),
            latest_datercv: coerce_date(raw.get("latest_datercv")),
            shipnotice_date: coerce_date(raw.get("shipnotice_date")),
            record_key: raw.get("record_key").and_then(|v| match v {
                SourceValue::Null => None,
                v => Some(coerce_string(Some(v))),
            }),
            load_timestamp: None,
        }
    }
}

/// Fetch PO rows: mock fixtures in mock mode, the legacy replica otherwise.
pub async fn fetch_rows(
    source: Option<&dyn SourceExtractor>,
    range: DateRange,
    mock: bool,
) -> Result<Vec<RawRow>, ExtractError> {
    if mock {
        info!(start = %range.start, end = %range.end, "generating mock purchase-order rows");
        return Ok(mock_rows(Utc::now().date_naive()));
    }
    let source = source.ok_or(ExtractError::NotConfigured)?;
    source.execute(QUERY, range.start, range.end).await
}

/// Three fixture rows spread over consecutive expected dates.
pub fn mock_rows(today: NaiveDate) -> Vec<RawRow> {
    let fixtures = [
        ("110", "VENDOR1", "SS1", "P", "O", "PO001", "PM001", "SKU001", "STY001", "Description 1", 0i64, 100, 50, 10, 40, 25, 45),
        ("114", "VENDOR2", "SS2", "R", "D", "PO002", "PM002", "SKU002", "STY002", "Description 2", 1, 200, 100, 20, 80, 30, 95),
        ("614", "VENDOR3", "SS3", "P", "O", "PO003", "PM003", "SKU003", "STY003", "Description 3", 2, 150, 75, 15, 60, 35, 70),
    ];

    fixtures
        .into_iter()
        .map(
            |(store, vendor, ss, ty, code, po, po_man, sku, style, desc, offset, oo, rcvd, brk, alloc, invc, shipped)| {
                let expected = today + Duration::days(offset);
                raw_row(vec![
                    ("store", SourceValue::Text(store.into())),
                    ("vendor", SourceValue::Text(vendor.into())),
                    ("ss", SourceValue::Text(ss.into())),
                    ("type", SourceValue::Text(ty.into())),
                    ("po_code", SourceValue::Text(code.into())),
                    ("po", SourceValue::Text(po.into())),
                    ("po_man", SourceValue::Text(po_man.into())),
                    ("sku", SourceValue::Text(sku.into())),
                    ("style", SourceValue::Text(style.into())),
                    ("skudesc1", SourceValue::Text(desc.into())),
                    ("expected_date", SourceValue::Date(expected)),
                    ("cancel_date", SourceValue::Date(today + Duration::days(30))),
                    ("ooqty", SourceValue::Int(oo)),
                    ("rcvdqty", SourceValue::Int(rcvd)),
                    ("breakoutqty", SourceValue::Int(brk)),
                    ("allocated", SourceValue::Int(alloc)),
                    ("unitinvc_per_sku", SourceValue::Int(invc)),
                    ("shipped_sku", SourceValue::Text(sku.into())),
                    ("shipped_qty", SourceValue::Int(shipped)),
                    ("latest_datercv", SourceValue::Date(today - Duration::days(1))),
                    ("shipnotice_date", SourceValue::Date(today - Duration::days(2))),
                    (
                        "record_key",
                        SourceValue::Text(format_record_key(po, sku, Some(expected))),
                    ),
                ])
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use posync_core::WarehouseRecord;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn merge_column_list_carries_key_and_stamp() {
        assert!(COLUMNS.contains(&"record_key"));
        assert!(COLUMNS.contains(&"load_timestamp"));
    }

    #[test]
    fn record_values_align_with_column_list() {
        let names: Vec<&str> = PoRecord::default()
            .values()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, COLUMNS);
    }

    #[test]
    fn every_column_is_classified_exactly_once() {
        for &col in COLUMNS {
            if col == "load_timestamp" {
                continue;
            }
            let classifications = [
                INTEGER_COLUMNS.contains(&col),
                DATE_COLUMNS.contains(&col),
                STRING_COLUMNS.contains(&col),
            ];
            assert_eq!(
                classifications.iter().filter(|&&c| c).count(),
                1,
                "column {col} must belong to exactly one classification"
            );
        }
    }

    #[test]
    fn key_derivation_matches_business_key_format() {
        let entity = PoEntity::default();
        let mut row = PoRecord {
            po: "PO001".into(),
            sku: "SKU001".into(),
            expected_date: Some(d(2026, 8, 1)),
            ..PoRecord::default()
        };
        assert_eq!(entity.derive_key(&row), "PO001_SKU001_20260801");

        row.expected_date = None;
        assert_eq!(entity.derive_key(&row), "PO001_SKU001_NULL");
    }

    #[test]
    fn coercion_is_lenient_per_classification() {
        let entity = PoEntity::default();
        let raw = raw_row(vec![
            ("po", SourceValue::Text("PO001".into())),
            ("sku", SourceValue::Text("SKU001".into())),
            ("vendor", SourceValue::Text("None".into())),
            ("ooqty", SourceValue::Text("not-a-number".into())),
            ("rcvdqty", SourceValue::Text("12".into())),
            ("expected_date", SourceValue::Text("garbage".into())),
        ]);
        let row = entity.coerce(&raw);
        assert_eq!(row.vendor, "");
        assert_eq!(row.ooqty, 0);
        assert_eq!(row.rcvdqty, 12);
        assert_eq!(row.expected_date, None);
        assert_eq!(row.record_key, None);
        assert_eq!(row.load_timestamp, None);
    }

    #[test]
    fn mock_rows_arrive_pre_keyed() {
        let entity = PoEntity::default();
        let rows = mock_rows(d(2026, 8, 7));
        assert_eq!(rows.len(), 3);
        for raw in &rows {
            let record = entity.coerce(raw);
            let presented = record.record_key.clone().unwrap();
            assert_eq!(presented, entity.derive_key(&record));
        }
    }
}
