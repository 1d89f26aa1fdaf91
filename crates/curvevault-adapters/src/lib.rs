//! Sheet source contracts + the curve row parser.
//!
//! The parser turns a raw CSV export into typed [`CurveRow`] candidates. A
//! systemically wrong header is a hard stop (`SchemaMismatch`, zero rows);
//! individually malformed data rows are dropped and counted, never aborting
//! the batch.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDate;
use csv::StringRecord;
use curvevault_core::CurveRow;
use curvevault_storage::{FetchError, SheetFetcher};
use thiserror::Error;

pub const CRATE_NAME: &str = "curvevault-adapters";

/// Accepted as-of date formats, tried in order.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading sheet file {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Seam for obtaining the raw CSV text of one export.
#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch_export(&self) -> Result<String, SourceError>;
}

/// Production source: GET the configured spreadsheet export URL.
pub struct HttpSheetSource {
    fetcher: SheetFetcher,
    export_url: String,
}

impl HttpSheetSource {
    pub fn new(fetcher: SheetFetcher, export_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            export_url: export_url.into(),
        }
    }
}

#[async_trait]
impl SheetSource for HttpSheetSource {
    async fn fetch_export(&self) -> Result<String, SourceError> {
        Ok(self.fetcher.fetch_text(&self.export_url).await?)
    }
}

/// Operator-supplied export on local disk.
pub struct FileSheetSource {
    path: PathBuf,
}

impl FileSheetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SheetSource for FileSheetSource {
    async fn fetch_export(&self) -> Result<String, SourceError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::File {
                path: self.path.clone(),
                source,
            })
    }
}

/// In-memory source for tests and fixtures.
pub struct StaticSheetSource {
    text: String,
}

impl StaticSheetSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl SheetSource for StaticSheetSource {
    async fn fetch_export(&self) -> Result<String, SourceError> {
        Ok(self.text.clone())
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("sheet header is missing required column(s): {}", missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },
    #[error("reading sheet header: {0}")]
    Header(#[from] csv::Error),
}

/// Parser output: surviving rows plus drop accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSheet {
    pub rows: Vec<CurveRow>,
    pub rows_read: usize,
    pub dropped_rows: usize,
}

struct Columns {
    as_of_date: usize,
    metal: usize,
    tenor_months: usize,
    price: usize,
    real_10yr_yield: usize,
    dollar_index: usize,
    deficit_gdp_flag: usize,
}

/// Parse one CSV export into curve row candidates.
///
/// Row-drop policy: `metal`, `tenor_months`, `price`, and the as-of date are
/// load-bearing; a row missing any of them (or with a non-finite price, or
/// a negative tenor) is dropped and counted. `real_10yr_yield` and
/// `dollar_index` default to `None` when unparseable and never drop the row;
/// the deficit/GDP flag is tri-state with `None` for anything unrecognized.
/// A later row repeating an earlier `(metal, tenor_months)` key replaces it,
/// the shadowed row counting as dropped.
pub fn parse_curve_sheet(text: &str) -> Result<ParsedSheet, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let columns = resolve_columns(&headers)?;

    let mut rows: Vec<CurveRow> = Vec::new();
    let mut index_by_key: HashMap<(String, i32), usize> = HashMap::new();
    let mut rows_read = 0usize;
    let mut dropped_rows = 0usize;

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(_) => {
                rows_read += 1;
                dropped_rows += 1;
                continue;
            }
        };
        rows_read += 1;

        let Some(row) = parse_row(&record, &columns) else {
            dropped_rows += 1;
            continue;
        };

        let key = (row.metal.clone(), row.tenor_months);
        match index_by_key.get(&key) {
            Some(&existing) => {
                // Last occurrence wins, same as sequential upserts would.
                rows[existing] = row;
                dropped_rows += 1;
            }
            None => {
                index_by_key.insert(key, rows.len());
                rows.push(row);
            }
        }
    }

    Ok(ParsedSheet {
        rows,
        rows_read,
        dropped_rows,
    })
}

fn resolve_columns(headers: &StringRecord) -> Result<Columns, ParseError> {
    let header_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect();

    let mut missing = Vec::new();
    let mut find = |label: &str, aliases: &[&str]| -> usize {
        for alias in aliases {
            if let Some(&idx) = header_map.get(*alias) {
                return idx;
            }
        }
        missing.push(label.to_string());
        usize::MAX
    };

    let columns = Columns {
        as_of_date: find("as_of_date", &["asofdate", "date"]),
        metal: find("metal", &["metal"]),
        tenor_months: find("tenor_months", &["tenormonths", "tenor"]),
        price: find("price", &["price"]),
        real_10yr_yield: find(
            "real_10yr_yield",
            &["real10yryield", "real10yyield", "real10yearyield"],
        ),
        dollar_index: find("dollar_index", &["dollarindex", "dxy"]),
        deficit_gdp_flag: find("deficit_gdp_flag", &["deficitgdpflag", "deficitgdp"]),
    };

    if missing.is_empty() {
        Ok(columns)
    } else {
        Err(ParseError::SchemaMismatch { missing })
    }
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often carry a UTF-8 BOM on the first header; strip
    // it or schema validation reports a phantom missing column.
    name.trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn parse_row(record: &StringRecord, columns: &Columns) -> Option<CurveRow> {
    let metal = field(record, columns.metal)?.to_ascii_lowercase();
    let tenor_months = parse_i32(field(record, columns.tenor_months)?)?;
    if tenor_months < 0 {
        return None;
    }
    let price = parse_f64(field(record, columns.price)?)?;
    let as_of_date = parse_date(field(record, columns.as_of_date)?)?;

    let real_10yr_yield = field(record, columns.real_10yr_yield).and_then(parse_f64);
    let dollar_index = field(record, columns.dollar_index).and_then(parse_f64);
    let deficit_gdp_flag = field(record, columns.deficit_gdp_flag).and_then(parse_flag);

    Some(CurveRow {
        metal,
        tenor_months,
        price,
        real_10yr_yield,
        dollar_index,
        deficit_gdp_flag,
        as_of_date,
    })
}

fn field(record: &StringRecord, idx: usize) -> Option<&str> {
    record
        .get(idx)
        .map(|s| s.trim().trim_matches('"').trim())
        .filter(|s| !s.is_empty())
}

fn parse_f64(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| *c != ',').collect();
    let value = cleaned.parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

fn parse_i32(s: &str) -> Option<i32> {
    let cleaned: String = s.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<i32>().ok()
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Date,Metal,Tenor (Months),Price,Real 10Y Yield,Dollar Index,Deficit/GDP Flag";

    fn sheet(rows: &[&str]) -> String {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text
    }

    #[test]
    fn missing_required_column_is_schema_mismatch() {
        let text = "Date,Metal,Price\n2024-03-01,gold,2100.0";
        let err = parse_curve_sheet(text).unwrap_err();
        match err {
            ParseError::SchemaMismatch { missing } => {
                assert!(missing.contains(&"tenor_months".to_string()));
                assert!(missing.contains(&"dollar_index".to_string()));
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn header_match_survives_bom_case_and_punctuation() {
        let text = "\u{feff}DATE,METAL,tenor_months,PRICE,real_10yr_yield,DOLLAR INDEX,deficit gdp flag\n2024-03-01,Gold,12,2100.0,1.9,104.2,yes";
        let parsed = parse_curve_sheet(text).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].metal, "gold");
        assert_eq!(parsed.rows[0].deficit_gdp_flag, Some(true));
    }

    #[test]
    fn bad_tenor_rows_are_dropped_and_counted() {
        let mut data_rows = Vec::new();
        for tenor in 1..=8 {
            data_rows.push(format!("2024-03-01,gold,{tenor},2100.0,1.9,104.2,true"));
        }
        data_rows.push("2024-03-01,gold,abc,2100.0,1.9,104.2,true".to_string());
        data_rows.push("2024-03-01,gold,,2100.0,1.9,104.2,true".to_string());
        let refs: Vec<&str> = data_rows.iter().map(String::as_str).collect();
        let parsed = parse_curve_sheet(&sheet(&refs)).unwrap();
        assert_eq!(parsed.rows.len(), 8);
        assert_eq!(parsed.rows_read, 10);
        assert_eq!(parsed.dropped_rows, 2);
    }

    #[test]
    fn thousands_separators_are_stripped_from_numerics() {
        let text = sheet(&["2024-03-01,gold,12,\"2,412.50\",1.9,\"104.2\",true"]);
        let parsed = parse_curve_sheet(&text).unwrap();
        assert_eq!(parsed.rows[0].price, 2412.50);
    }

    #[test]
    fn optional_numerics_default_to_none_without_dropping() {
        let text = sheet(&["2024-03-01,silver,6,24.1,n/a,,maybe"]);
        let parsed = parse_curve_sheet(&text).unwrap();
        assert_eq!(parsed.dropped_rows, 0);
        let row = &parsed.rows[0];
        assert_eq!(row.real_10yr_yield, None);
        assert_eq!(row.dollar_index, None);
        assert_eq!(row.deficit_gdp_flag, None);
    }

    #[test]
    fn non_finite_price_drops_the_row() {
        let text = sheet(&[
            "2024-03-01,gold,12,NaN,1.9,104.2,true",
            "2024-03-01,gold,24,2100.0,1.9,104.2,true",
        ]);
        let parsed = parse_curve_sheet(&text).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.dropped_rows, 1);
        assert_eq!(parsed.rows[0].tenor_months, 24);
    }

    #[test]
    fn duplicate_key_keeps_last_occurrence() {
        let text = sheet(&[
            "2024-03-01,gold,12,2100.0,1.9,104.2,true",
            "2024-03-01,gold,12,2105.5,1.9,104.2,true",
        ]);
        let parsed = parse_curve_sheet(&text).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.dropped_rows, 1);
        assert_eq!(parsed.rows[0].price, 2105.5);
    }

    #[test]
    fn us_style_dates_parse() {
        let text = sheet(&["03/01/2024,gold,12,2100.0,1.9,104.2,true"]);
        let parsed = parse_curve_sheet(&text).unwrap();
        assert_eq!(
            parsed.rows[0].as_of_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn unparseable_date_drops_the_row() {
        let text = sheet(&[
            "not-a-date,gold,12,2100.0,1.9,104.2,true",
            "2024-03-01,gold,24,2100.0,1.9,104.2,true",
        ]);
        let parsed = parse_curve_sheet(&text).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.dropped_rows, 1);
    }

    #[tokio::test]
    async fn static_source_round_trips() {
        let source = StaticSheetSource::new(sheet(&["2024-03-01,gold,12,2100.0,,,"]));
        let text = source.fetch_export().await.unwrap();
        assert!(text.starts_with("Date,"));
    }
}
