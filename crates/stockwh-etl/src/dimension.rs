//! Company & ratio-definition dimensions.
//!
//! Surrogate keys are handed out in one of two ways:
//! - positionally: a dense, 1-based sequence over the input's row order. Re-ordering or
//!   filtering the input changes every key after the first difference, so callers must
//!   normalize the complete, stably ordered input in one pass;
//! - from a [`KeyTracker`] loaded from the warehouse, which keeps known natural keys on
//!   their existing surrogate key and allocates the lowest free key to new ones.

use crate::error::{EtlError, Result};
use crate::frame::{Frame, Label};
use crate::key_tracker::KeyTracker;
use crate::schema::{self, COMPANY, COMPANY_OVERVIEW, COMPANY_PROFILE, RATIO_CATALOG};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// A row of `Dim_Company`.
#[derive(Clone, Debug, PartialEq)]
pub struct DimCompany {
    pub stock_key: i32,
    pub stock_symbol: String,
    pub company_name: Option<String>,
    pub short_name: Option<String>,
    pub industry: Option<String>,
    pub company_type: Option<String>,
    /// Rounded to 2 decimal places.
    pub stock_rating: Option<Decimal>,
}

/// A row of `Dim_Ratio`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimRatio {
    pub ratio_key: i32,
    pub ratio_name: String,
    pub unit: Option<String>,
    pub ratio_type: Option<String>,
}

// companies
// ----------------------------------------------------------------------------

/// Join the overview & profile tables on `symbol`, dropping each one's declared noise
/// columns. Rows follow the profile's order; symbols missing from either side are dropped.
pub fn merge_company_sources(overview: &Frame, profile: &Frame) -> Result<Frame> {
    COMPANY_OVERVIEW.validate(overview)?;
    COMPANY_PROFILE.validate(profile)?;

    let o_symbol = overview.require(COMPANY_OVERVIEW.table, "symbol")?;
    let p_symbol = profile.require(COMPANY_PROFILE.table, "symbol")?;

    // overview rows, grouped by symbol, in their original order
    let mut by_symbol: HashMap<String, Vec<usize>> = HashMap::new();
    for row in 0..overview.len() {
        if let Some(symbol) = overview.text(COMPANY_OVERVIEW.table, row, o_symbol)? {
            by_symbol.entry(symbol).or_default().push(row);
        }
    }

    let p_cols = kept_columns(profile, &COMPANY_PROFILE);
    let o_cols: Vec<usize> = kept_columns(overview, &COMPANY_OVERVIEW)
        .into_iter()
        .filter(|&col| col != o_symbol)
        .collect();

    let mut merged = Frame::new(
        p_cols
            .iter()
            .map(|&col| profile.columns[col].clone())
            .chain(o_cols.iter().map(|&col| overview.columns[col].clone()))
            .map(|label| Label::from(label.name()))
            .collect(),
    );

    for p_row in 0..profile.len() {
        let Some(symbol) = profile.text(COMPANY_PROFILE.table, p_row, p_symbol)? else {
            continue;
        };
        let Some(o_rows) = by_symbol.get(&symbol) else {
            trace!("no company overview for [{symbol}]; dropped from the merge");
            continue;
        };
        for &o_row in o_rows {
            merged.push_row(
                p_cols
                    .iter()
                    .map(|&col| profile.cell(p_row, col).clone())
                    .chain(o_cols.iter().map(|&col| overview.cell(o_row, col).clone()))
                    .collect(),
            );
        }
    }

    debug!(
        "merged {} company profiles with {} overviews into {} rows",
        profile.len(),
        overview.len(),
        merged.len()
    );
    Ok(merged)
}

fn kept_columns(frame: &Frame, mapping: &schema::Mapping) -> Vec<usize> {
    frame
        .names()
        .enumerate()
        .filter(|(_, name)| mapping.canonical(name).is_some())
        .map(|(col, _)| col)
        .collect()
}

/// Rename a merged company table to the canonical schema and assign `StockKey` by row
/// position (1-based).
pub fn normalize_companies(frame: &Frame) -> Result<Vec<DimCompany>> {
    let mut next = 0;
    normalize_companies_with(frame, |_| {
        next += 1;
        next
    })
}

/// As [`normalize_companies`], with keys taken from (or allocated in) `registry`.
pub fn normalize_companies_stable(
    frame: &Frame,
    registry: &mut KeyTracker<i32, String>,
) -> Result<Vec<DimCompany>> {
    normalize_companies_with(frame, |symbol| registry.transact(symbol.to_string()))
}

fn normalize_companies_with<F>(frame: &Frame, mut assign: F) -> Result<Vec<DimCompany>>
where
    F: FnMut(&str) -> i32,
{
    let table = COMPANY.table;
    COMPANY.validate(frame)?;

    let symbol = frame.require(table, "symbol")?;
    let company_name = frame.require(table, "company_name")?;
    let short_name = frame.require(table, "short_name")?;
    let industry = frame.require(table, "industry")?;
    let company_type = frame.require(table, "company_type")?;
    let stock_rating = frame.require(table, "stock_rating")?;

    let mut companies = Vec::with_capacity(frame.len());
    for row in 0..frame.len() {
        let stock_symbol = frame.text(table, row, symbol)?.ok_or_else(|| EtlError::InvalidCell {
            table,
            field: "symbol".to_string(),
            value: "null".to_string(),
        })?;

        companies.push(DimCompany {
            stock_key: assign(&stock_symbol),
            company_name: frame.text(table, row, company_name)?,
            short_name: frame.text(table, row, short_name)?,
            industry: frame.text(table, row, industry)?,
            company_type: frame.text(table, row, company_type)?,
            stock_rating: frame
                .decimal(table, row, stock_rating)?
                .map(|rating| rating.round_dp(2)),
            stock_symbol,
        });
    }

    Ok(companies)
}

// ratio definitions
// ----------------------------------------------------------------------------

/// Remove a trailing parenthetical unit annotation and surrounding whitespace:
/// `"ROE (%)"` -> `"ROE"`, `"EPS (VND)"` -> `"EPS"`. Parentheses elsewhere are kept:
/// `"(Vay NH+DH)/VCSH"` is unchanged.
pub fn strip_unit(name: &str) -> &str {
    let trimmed = name.trim_end();
    if let Some(inner) = trimmed.strip_suffix(')') {
        if let Some(open) = inner.rfind('(') {
            if !inner[open + 1..].contains(')') {
                return trimmed[..open].trim();
            }
        }
    }
    trimmed.trim()
}

/// Normalize the provider's ratio catalog:
///
/// 1. keep only the allow-listed ratios ([`schema::RATIO_COLUMNS`]);
/// 2. strip the unit annotation from each name;
/// 3. drop duplicate names, keeping the first;
/// 4. assign `RatioKey` as a dense, 1-based sequence over what is left.
///
/// An empty result is returned as such; the caller decides to abort.
pub fn normalize_ratios(frame: &Frame) -> Result<Vec<DimRatio>> {
    let mut next = 0;
    normalize_ratios_with(frame, |_| {
        next += 1;
        next
    })
}

/// As [`normalize_ratios`], with keys taken from (or allocated in) `registry`.
pub fn normalize_ratios_stable(
    frame: &Frame,
    registry: &mut KeyTracker<i32, String>,
) -> Result<Vec<DimRatio>> {
    normalize_ratios_with(frame, |name| registry.transact(name.to_string()))
}

fn normalize_ratios_with<F>(frame: &Frame, mut assign: F) -> Result<Vec<DimRatio>>
where
    F: FnMut(&str) -> i32,
{
    let table = RATIO_CATALOG.table;
    RATIO_CATALOG.validate(frame)?;

    let name = frame.require(table, "name")?;
    let unit = frame.require(table, "unit")?;
    let kind = frame.require(table, "type")?;

    let mut seen = HashSet::new();
    let mut ratios = Vec::new();
    for row in 0..frame.len() {
        let Some(raw_name) = frame.text(table, row, name)? else {
            continue;
        };
        if !schema::is_allowed_ratio(&raw_name) {
            trace!("ratio \"{raw_name}\" is not allow-listed; dropped");
            continue;
        }

        let ratio_name = strip_unit(&raw_name).to_string();
        if !seen.insert(ratio_name.clone()) {
            trace!("duplicate ratio definition \"{ratio_name}\"; keeping the first");
            continue;
        }

        ratios.push(DimRatio {
            ratio_key: assign(&ratio_name),
            unit: frame.text(table, row, unit)?,
            ratio_type: frame.text(table, row, kind)?,
            ratio_name,
        });
    }

    debug!(
        "{} of {} catalog rows kept as ratio definitions",
        ratios.len(),
        frame.len()
    );
    Ok(ratios)
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
