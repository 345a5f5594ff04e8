//! Source adapters for the two extracted entity types.
//!
//! Each entity module carries its extraction query template, its mock
//! fixture rows, and the `EntityDescriptor` implementation that
//! parameterizes the load engine (column classification, tie-break order,
//! record-key derivation, raw-row coercion).

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use posync_core::{RawRow, SourceValue};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "posync-adapters";

pub mod breakout;
pub mod po;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("source query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("no source configured; set SOURCE_DATABASE_URL or run with mock=true")]
    NotConfigured,
}

/// Inclusive business-date range an extraction run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Resolve the extraction range: rolling mode spans `today - days_back ..
/// today + days_forward`; explicit mode defaults a missing start to today
/// and a missing end to the start.
pub fn resolve_date_range(
    rolling: bool,
    today: NaiveDate,
    days_back: i64,
    days_forward: i64,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> DateRange {
    if rolling {
        let range = DateRange {
            start: today - Duration::days(days_back),
            end: today + Duration::days(days_forward),
        };
        info!(start = %range.start, end = %range.end, "using rolling extraction window");
        range
    } else {
        let start = start.unwrap_or(today);
        let range = DateRange {
            start,
            end: end.unwrap_or(start),
        };
        info!(start = %range.start, end = %range.end, "using explicit extraction window");
        range
    }
}

/// Extraction collaborator: runs one query template over a date range and
/// hands rows over as lower-cased column name to raw value.
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRow>, ExtractError>;
}

/// Substitute the `:START_DATE` / `:END_DATE` placeholders with quoted
/// date literals, the way the legacy query templates are written.
pub fn substitute_range(query: &str, start: NaiveDate, end: NaiveDate) -> String {
    query
        .replace(":START_DATE", &format!("'{start}'"))
        .replace(":END_DATE", &format!("'{end}'"))
}

/// SQL-backed extractor over a relational replica of the legacy source.
#[derive(Debug, Clone)]
pub struct SqlSource {
    pool: PgPool,
}

impl SqlSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, ExtractError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SourceExtractor for SqlSource {
    async fn execute(
        &self,
        query: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRow>, ExtractError> {
        let sql = substitute_range(query, start, end);
        info!(%start, %end, "executing source extraction query");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        info!(fetched = rows.len(), "source extraction complete");
        Ok(rows.iter().map(row_to_raw).collect())
    }
}

fn row_to_raw(row: &PgRow) -> RawRow {
    let mut out = RawRow::new();
    for column in row.columns() {
        let name = column.name().to_ascii_lowercase();
        out.insert(name, decode_value(row, column.ordinal(), column.type_info().name()));
    }
    out
}

fn decode_value(row: &PgRow, idx: usize, ty: &str) -> SourceValue {
    if row
        .try_get_raw(idx)
        .map(|raw| raw.is_null())
        .unwrap_or(true)
    {
        return SourceValue::Null;
    }
    match ty {
        "INT2" => row
            .try_get::<i16, _>(idx)
            .map(|v| SourceValue::Int(v as i64))
            .unwrap_or(SourceValue::Null),
        "INT4" => row
            .try_get::<i32, _>(idx)
            .map(|v| SourceValue::Int(v as i64))
            .unwrap_or(SourceValue::Null),
        "INT8" => row
            .try_get::<i64, _>(idx)
            .map(SourceValue::Int)
            .unwrap_or(SourceValue::Null),
        "FLOAT4" => row
            .try_get::<f32, _>(idx)
            .map(|v| SourceValue::Float(v as f64))
            .unwrap_or(SourceValue::Null),
        "FLOAT8" => row
            .try_get::<f64, _>(idx)
            .map(SourceValue::Float)
            .unwrap_or(SourceValue::Null),
        "DATE" => row
            .try_get::<NaiveDate, _>(idx)
            .map(SourceValue::Date)
            .unwrap_or(SourceValue::Null),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(|v| SourceValue::Timestamp(v.and_utc()))
            .unwrap_or(SourceValue::Null),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .map(SourceValue::Timestamp)
            .unwrap_or(SourceValue::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(SourceValue::Text)
            .unwrap_or(SourceValue::Null),
    }
}

pub(crate) fn raw_row(pairs: Vec<(&str, SourceValue)>) -> RawRow {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn rolling_range_spans_back_and_forward() {
        let today = d(2026, 8, 7);
        let range = resolve_date_range(true, today, 30, 60, None, None);
        assert_eq!(range.start, d(2026, 7, 8));
        assert_eq!(range.end, d(2026, 10, 6));
    }

    #[test]
    fn explicit_range_defaults_end_to_start() {
        let today = d(2026, 8, 7);
        let range = resolve_date_range(false, today, 30, 60, Some(d(2026, 8, 1)), None);
        assert_eq!(range.start, d(2026, 8, 1));
        assert_eq!(range.end, d(2026, 8, 1));

        let defaulted = resolve_date_range(false, today, 30, 60, None, None);
        assert_eq!(defaulted.start, today);
        assert_eq!(defaulted.end, today);
    }

    #[test]
    fn placeholders_are_substituted_as_quoted_literals() {
        let sql = substitute_range(
            "WHERE PH.DATEEXP BETWEEN :START_DATE AND :END_DATE",
            d(2026, 7, 8),
            d(2026, 10, 6),
        );
        assert_eq!(sql, "WHERE PH.DATEEXP BETWEEN '2026-07-08' AND '2026-10-06'");
    }
}
