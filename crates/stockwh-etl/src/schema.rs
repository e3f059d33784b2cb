//! Declared mappings from provider field names to the canonical warehouse schema.
//!
//! Every frame handed over by the extraction collaborator is validated against its mapping
//! before any transform touches it: a declared, required field that is absent, or a column
//! that is neither declared nor explicitly ignored, fails the stage immediately.

use crate::error::{EtlError, Result};
use crate::frame::Frame;
use std::collections::HashSet;

/// One provider field and the canonical field it becomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub source: &'static str,
    pub canonical: &'static str,
    pub required: bool,
}

const fn req(source: &'static str, canonical: &'static str) -> Field {
    Field {
        source,
        canonical,
        required: true,
    }
}

const fn opt(source: &'static str, canonical: &'static str) -> Field {
    Field {
        source,
        canonical,
        required: false,
    }
}

/// A source → canonical mapping table for one provider frame.
#[derive(Debug)]
pub struct Mapping {
    pub table: &'static str,
    pub fields: Vec<Field>,
    /// Provider columns that are known and deliberately dropped.
    pub ignored: Vec<&'static str>,
}

impl Mapping {
    /// The canonical name for a provider field, if the mapping declares it.
    pub fn canonical(&self, source: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|field| field.source == source)
            .map(|field| field.canonical)
    }

    pub fn is_ignored(&self, source: &str) -> bool {
        self.ignored.contains(&source)
    }

    /// Check a frame's header: all required fields present, nothing undeclared.
    pub fn validate(&self, frame: &Frame) -> Result<()> {
        let names: HashSet<&str> = frame.names().collect();

        if let Some(field) = self
            .fields
            .iter()
            .find(|field| field.required && !names.contains(field.source))
        {
            return Err(EtlError::MissingField {
                table: self.table,
                field: field.source.to_string(),
            });
        }

        if let Some(name) = frame
            .names()
            .find(|name| self.canonical(name).is_none() && !self.is_ignored(name))
        {
            return Err(EtlError::UnexpectedField {
                table: self.table,
                field: name.to_string(),
            });
        }

        Ok(())
    }
}

//////////////////////////////////////////////////////////////////
// ratios
//////////////////////////////////////////////////////////////////

/// The financial ratios the analytics layer understands: provider label → canonical
/// `RatioName`. Any ratio outside this list is dropped, from the catalog and from the facts.
///
/// Each canonical name is the provider label with its trailing unit annotation removed,
/// which is exactly what the catalog normalization produces; fact rows and `Dim_Ratio`
/// therefore always agree on the name.
pub const RATIO_COLUMNS: [(&str, &str); 34] = [
    ("Nợ/VCSH", "Nợ/VCSH"),
    ("TSCĐ / Vốn CSH", "TSCĐ / Vốn CSH"),
    ("Vốn CSH/Vốn điều lệ", "Vốn CSH/Vốn điều lệ"),
    ("Biên lợi nhuận ròng (%)", "Biên lợi nhuận ròng"),
    ("ROE (%)", "ROE"),
    ("ROIC (%)", "ROIC"),
    ("ROA (%)", "ROA"),
    ("Tỷ suất cổ tức (%)", "Tỷ suất cổ tức"),
    ("Đòn bẩy tài chính", "Đòn bẩy tài chính"),
    ("Vốn hóa (Tỷ đồng)", "Vốn hóa"),
    ("Số CP lưu hành (Triệu CP)", "Số CP lưu hành"),
    ("P/E", "P/E"),
    ("P/B", "P/B"),
    ("P/S", "P/S"),
    ("P/Cash Flow", "P/Cash Flow"),
    ("EPS (VND)", "EPS"),
    ("BVPS (VND)", "BVPS"),
    ("(Vay NH+DH)/VCSH", "(Vay NH+DH)/VCSH"),
    ("Vòng quay tài sản", "Vòng quay tài sản"),
    ("Vòng quay TSCĐ", "Vòng quay TSCĐ"),
    ("Số ngày thu tiền bình quân", "Số ngày thu tiền bình quân"),
    ("Số ngày tồn kho bình quân", "Số ngày tồn kho bình quân"),
    ("Số ngày thanh toán bình quân", "Số ngày thanh toán bình quân"),
    ("Chu kỳ tiền", "Chu kỳ tiền"),
    ("Vòng quay hàng tồn kho", "Vòng quay hàng tồn kho"),
    ("Biên EBIT (%)", "Biên EBIT"),
    ("Biên lợi nhuận gộp (%)", "Biên lợi nhuận gộp"),
    ("EBITDA (Tỷ đồng)", "EBITDA"),
    ("EBIT (Tỷ đồng)", "EBIT"),
    ("Chỉ số thanh toán hiện thời", "Chỉ số thanh toán hiện thời"),
    ("Chỉ số thanh toán tiền mặt", "Chỉ số thanh toán tiền mặt"),
    ("Chỉ số thanh toán nhanh", "Chỉ số thanh toán nhanh"),
    ("Khả năng chi trả lãi vay", "Khả năng chi trả lãi vay"),
    ("EV/EBITDA", "EV/EBITDA"),
];

/// Identifier columns of the quarterly ratio table: symbol, fiscal year, fiscal quarter.
pub const RATIO_SYMBOL: &str = "CP";
pub const RATIO_YEAR: &str = "Năm";
pub const RATIO_PERIOD: &str = "Kỳ";

/// Is this provider label one of the allow-listed ratios?
pub fn is_allowed_ratio(label: &str) -> bool {
    RATIO_COLUMNS.iter().any(|(source, _)| *source == label)
}

/// Canonical column order of an assembled ratio table.
pub fn ratio_table_header() -> Vec<&'static str> {
    [RATIO_SYMBOL, RATIO_YEAR, RATIO_PERIOD]
        .into_iter()
        .chain(RATIO_COLUMNS.iter().map(|(source, _)| *source))
        .collect()
}

lazy_static::lazy_static! {
    /// Wide quarterly ratio table (one row per symbol, year, quarter).
    pub static ref RATIO_TABLE: Mapping = Mapping {
        table: "ratio table",
        fields: [
            req(RATIO_SYMBOL, "StockSymbol"),
            req(RATIO_YEAR, "Year"),
            req(RATIO_PERIOD, "Period"),
        ]
        .into_iter()
        .chain(RATIO_COLUMNS.iter().map(|&(source, canonical)| opt(source, canonical)))
        .collect(),
        ignored: vec![],
    };

    /// The provider's ratio-definition catalog.
    pub static ref RATIO_CATALOG: Mapping = Mapping {
        table: "ratio catalog",
        fields: vec![
            req("name", "RatioName"),
            req("unit", "Unit"),
            req("type", "RatioType"),
        ],
        ignored: vec!["order", "com_type_code"],
    };

//////////////////////////////////////////////////////////////////
// companies
//////////////////////////////////////////////////////////////////

    /// Per-symbol company overview.
    pub static ref COMPANY_OVERVIEW: Mapping = Mapping {
        table: "company overview",
        fields: vec![
            req("symbol", "StockSymbol"),
            req("short_name", "ShortName"),
            req("industry", "Industry"),
            req("company_type", "CompanyType"),
            req("stock_rating", "StockRating"),
        ],
        ignored: vec![
            "exchange",
            "no_shareholders",
            "foreign_percent",
            "outstanding_share",
            "issue_share",
            "established_year",
            "no_employees",
            "delta_in_week",
            "delta_in_month",
            "delta_in_year",
            "website",
            "industry_id",
            "industry_id_v2",
        ],
    };

    /// Per-symbol company profile.
    pub static ref COMPANY_PROFILE: Mapping = Mapping {
        table: "company profile",
        fields: vec![
            req("symbol", "StockSymbol"),
            req("company_name", "CompanyName"),
        ],
        ignored: vec![
            "history_dev",
            "company_promise",
            "key_developments",
            "business_risk",
            "company_profile",
            "business_strategies",
        ],
    };

    /// Overview ⋈ profile, the input of the company normalization.
    pub static ref COMPANY: Mapping = Mapping {
        table: "company",
        fields: vec![
            req("symbol", "StockSymbol"),
            req("company_name", "CompanyName"),
            req("short_name", "ShortName"),
            req("industry", "Industry"),
            req("company_type", "CompanyType"),
            req("stock_rating", "StockRating"),
        ],
        ignored: vec![],
    };

//////////////////////////////////////////////////////////////////
// quotes
//////////////////////////////////////////////////////////////////

    /// Daily OHLCV quotes, one row per (symbol, date).
    pub static ref QUOTE: Mapping = Mapping {
        table: "quote",
        fields: vec![
            req("time", "Date"),
            req("MaCK", "StockSymbol"),
            req("open", "Open"),
            req("high", "High"),
            req("low", "Low"),
            req("close", "Close"),
            req("volume", "Volume"),
        ],
        ignored: vec![],
    };
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////

#[test]
fn ratio_names_match_catalog_normalization() {
    for (source, canonical) in RATIO_COLUMNS {
        assert_eq!(crate::dimension::strip_unit(source), canonical);
    }
}

#[test]
fn ratio_labels_are_unique() {
    let labels: HashSet<&str> = RATIO_COLUMNS.iter().map(|(source, _)| *source).collect();
    assert_eq!(labels.len(), RATIO_COLUMNS.len());
}

#[test]
fn validate_rejects_missing_and_unexpected_fields() {
    let frame = Frame::flat(&["name", "unit"], vec![]);
    assert!(matches!(
        RATIO_CATALOG.validate(&frame),
        Err(EtlError::MissingField { field, .. }) if field == "type"
    ));

    let frame = Frame::flat(&["name", "unit", "type", "order", "colour"], vec![]);
    assert!(matches!(
        RATIO_CATALOG.validate(&frame),
        Err(EtlError::UnexpectedField { field, .. }) if field == "colour"
    ));

    let frame = Frame::flat(&["name", "unit", "type", "order", "com_type_code"], vec![]);
    assert!(RATIO_CATALOG.validate(&frame).is_ok());
}

#[test]
fn ratio_table_tolerates_absent_ratio_columns() {
    let frame = Frame::flat(&["CP", "Năm", "Kỳ", "ROE (%)"], vec![]);
    assert!(RATIO_TABLE.validate(&frame).is_ok());
    assert_eq!(RATIO_TABLE.canonical("ROE (%)"), Some("ROE"));
    assert_eq!(ratio_table_header().len(), 37);
}
