//! Breakout allocation adapter: child purchase orders tied back to their
//! parent manual PO, one row per (manual PO, SKU, store).

use chrono::{Duration, NaiveDate, Utc};
use posync_core::{
    coerce_date, coerce_int, coerce_string, format_record_key, BreakoutRecord, EntityDescriptor,
    RawRow, SortKey, SourceValue,
};
use tracing::info;

use crate::{raw_row, DateRange, ExtractError, SourceExtractor};

pub const DEFAULT_STAGING_TABLE: &str = "po_breakout_staging";
pub const DEFAULT_FINAL_TABLE: &str = "po_breakout_final";

/// Extraction template. Parents are filtered by expected date and PO code;
/// children carry no date filter of their own, only the tie to a parent
/// manual PO. The record key is derived downstream, not at the source.
pub const QUERY: &str = r#"
WITH parents AS (
    SELECT DISTINCT h.po_man
    FROM pohdr h
    JOIN potype t ON t.po_no = h.po_no
    WHERE h.date_exp BETWEEN :START_DATE AND :END_DATE
      AND h.po_code IN ('O', 'D')
      AND t.po_type = 'P'
      AND h.po_man IS NOT NULL AND TRIM(h.po_man) <> ''
)
SELECT
    h.po_man AS po_man,
    s.ss_no AS ss,
    v.vend_name AS vendor,
    s.sku_no AS sku,
    s.style AS style,
    s.sku_desc1 AS skudesc,
    h.date_ship AS ship_date,
    h.date_exp AS exp_date,
    h.po_store AS store,
    SUM(d.oo_unit) AS breakout_qty
FROM pohdr h
JOIN podtl d ON d.po_no = h.po_no
JOIN skufile s ON s.sku_no = d.sku_no
JOIN vendmain v ON v.vend_no = s.vend_no1
JOIN potype t ON t.po_no = h.po_no
WHERE t.po_type = 'C'
  AND h.po_man IN (SELECT po_man FROM parents)
GROUP BY h.po_man, s.ss_no, v.vend_name, s.sku_no, s.style, s.sku_desc1,
         h.date_ship, h.date_exp, h.po_store
ORDER BY h.po_man, s.ss_no, v.vend_name, s.sku_no
"#;

pub const COLUMNS: &[&str] = &[
    "po_man",
    "ss",
    "vendor",
    "sku",
    "style",
    "skudesc",
    "ship_date",
    "exp_date",
    "store",
    "breakout_qty",
    "record_key",
    "load_timestamp",
];

const INTEGER_COLUMNS: &[&str] = &["breakout_qty"];

const DATE_COLUMNS: &[&str] = &["ship_date", "exp_date"];

const STRING_COLUMNS: &[&str] = &[
    "po_man",
    "ss",
    "vendor",
    "sku",
    "style",
    "skudesc",
    "store",
    "record_key",
];

const MERGE_ORDER: &[SortKey] = &[SortKey::desc("load_timestamp"), SortKey::desc("exp_date")];

/// Descriptor for the breakout allocation entity.
#[derive(Debug, Clone)]
pub struct BreakoutEntity {
    staging_table: String,
    final_table: String,
}

impl BreakoutEntity {
    pub fn new(staging_table: impl Into<String>, final_table: impl Into<String>) -> Self {
        Self {
            staging_table: staging_table.into(),
            final_table: final_table.into(),
        }
    }
}

impl Default for BreakoutEntity {
    fn default() -> Self {
        Self::new(DEFAULT_STAGING_TABLE, DEFAULT_FINAL_TABLE)
    }
}

impl EntityDescriptor for BreakoutEntity {
    type Row = BreakoutRecord;

    fn entity(&self) -> &'static str {
        "breakout"
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
        "exp_date"
    }

    fn derive_key(&self, row: &BreakoutRecord) -> String {
        format_record_key(&row.po_man, &row.sku, row.exp_date)
    }

    fn coerce(&self, raw: &RawRow) -> BreakoutRecord {
        BreakoutRecord {
            po_man: coerce_string(raw.get("po_man")),
            ss: coerce_string(raw.get("ss")),
            vendor: coerce_string(raw.get("vendor")),
            sku: coerce_string(raw.get("sku")),
            style: coerce_string(raw.get("style")),
            skudesc: coerce_string(raw.get("skudesc")),
            ship_date: coerce_date(raw.get("ship_date")),
            exp_date: coerce_date(raw.get("exp_date")),
            store: coerce_string(raw.get("store")),
            breakout_qty: coerce_int(raw.get("breakout_qty")),
            record_key: None,
            load_timestamp: None,
        }
    }
}

/// Fetch breakout rows: mock fixtures in mock mode, the legacy replica
/// otherwise.
pub async fn fetch_rows(
    source: Option<&dyn SourceExtractor>,
    range: DateRange,
    mock: bool,
) -> Result<Vec<RawRow>, ExtractError> {
    if mock {
        info!(start = %range.start, end = %range.end, "generating mock breakout rows");
        return Ok(mock_rows(Utc::now().date_naive()));
    }
    let source = source.ok_or(ExtractError::NotConfigured)?;
    source.execute(QUERY, range.start, range.end).await
}

/// Three fixture rows; record keys intentionally absent so the engine's
/// derive-if-missing path stays exercised.
pub fn mock_rows(today: NaiveDate) -> Vec<RawRow> {
    let fixtures = [
        ("PM001", "SS1", "VENDOR1", "SKU001", "STY001", "Child Desc 1", 0i64, "110", 50i64),
        ("PM002", "SS2", "VENDOR2", "SKU002", "STY002", "Child Desc 2", 1, "614", 125),
        ("PM003", "SS3", "VENDOR3", "SKU003", "STY003", "Child Desc 3", 2, "116", 150),
    ];

    fixtures
        .into_iter()
        .map(|(po_man, ss, vendor, sku, style, desc, offset, store, qty)| {
            raw_row(vec![
                ("po_man", SourceValue::Text(po_man.into())),
                ("ss", SourceValue::Text(ss.into())),
                ("vendor", SourceValue::Text(vendor.into())),
                ("sku", SourceValue::Text(sku.into())),
                ("style", SourceValue::Text(style.into())),
                ("skudesc", SourceValue::Text(desc.into())),
                ("ship_date", SourceValue::Date(today - Duration::days(5))),
                ("exp_date", SourceValue::Date(today + Duration::days(offset))),
                ("store", SourceValue::Text(store.into())),
                ("breakout_qty", SourceValue::Int(qty)),
            ])
        })
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
        let names: Vec<&str> = BreakoutRecord::default()
            .values()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, COLUMNS);
    }

    #[test]
    fn key_uses_manual_po_and_null_token() {
        let entity = BreakoutEntity::default();
        let mut row = BreakoutRecord {
            po_man: "PM001".into(),
            sku: "SKU001".into(),
            exp_date: Some(d(2026, 8, 2)),
            ..BreakoutRecord::default()
        };
        assert_eq!(entity.derive_key(&row), "PM001_SKU001_20260802");

        row.exp_date = None;
        assert_eq!(entity.derive_key(&row), "PM001_SKU001_NULL");
    }

    #[test]
    fn mock_rows_need_key_derivation() {
        let entity = BreakoutEntity::default();
        let rows = mock_rows(d(2026, 8, 7));
        assert_eq!(rows.len(), 3);
        for raw in &rows {
            let record = entity.coerce(raw);
            assert!(record.record_key().is_none());
            assert!(record.exp_date.is_some());
        }
    }

    #[test]
    fn schema_derives_from_classification() {
        use posync_core::ColumnType;

        let entity = BreakoutEntity::default();
        let schema = entity.schema();
        let ty_of = |name: &str| schema.iter().find(|c| c.name == name).unwrap().ty;
        assert_eq!(ty_of("breakout_qty"), ColumnType::Int64);
        assert_eq!(ty_of("exp_date"), ColumnType::Date);
        assert_eq!(ty_of("po_man"), ColumnType::Text);
        assert_eq!(ty_of("load_timestamp"), ColumnType::TimestampTz);
    }
}
