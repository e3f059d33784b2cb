use crate::dimension::{self, DimCompany, DimRatio};
use crate::error::{EtlError, Result};
use crate::extract::{Extract, Extractor};
use crate::fact;
use crate::frame::Frame;
use crate::key_tracker::KeyTracker;
use crate::keys;
use crate::load::{self, LoadReport};
use crate::time::{derive_dim_time, TimeIndex};
use crate::warehouse::Warehouse;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info};

/// How `StockKey` and `RatioKey` are assigned to normalized dimension rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyAssignment {
    /// 1-based row position in this run's input. Reordering the input reassigns keys.
    #[default]
    Positional,
    /// Looked up in, or allocated from, the keys already persisted in the warehouse.
    Registry,
}

/// Everything one pipeline run wrote.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub pipeline: &'static str,
    pub loads: Vec<LoadReport>,
    /// Fact rows dropped by the reshape because no `TimeKey` matched.
    pub unmatched: usize,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} pipeline", self.pipeline)?;
        for load in &self.loads {
            writeln!(f, "  {load}")?;
        }
        write!(f, "  {} fact rows without a matching time key", self.unmatched)
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(PipelineReport),
    /// Nothing to do yet; retry later. Not a failure.
    Skipped(String),
}

/// Companies whose symbol is not yet in `registry`, keyed from its free keys.
fn new_companies(
    companies: &Frame,
    mut registry: KeyTracker<i32, String>,
) -> Result<Vec<DimCompany>> {
    let known: HashSet<String> = registry.bimap.right_values().cloned().collect();
    let companies = dimension::normalize_companies_stable(companies, &mut registry)?
        .into_iter()
        .filter(|company| !known.contains(&company.stock_symbol))
        .collect();
    Ok(companies)
}

fn ensure_rows<T>(rows: &[T], what: &'static str) -> Result<()> {
    if rows.is_empty() {
        error!("no {what}; stopping the pipeline");
        return Err(EtlError::EmptyInput(what));
    }
    Ok(())
}

// quarterly
// ----------------------------------------------------------------------------

/// Company and ratio dimensions, then the financial-ratio facts.
///
/// Every transform runs, and every guard is checked, before the first write.
pub async fn run_quarterly<E>(
    warehouse: &Warehouse,
    extractor: &E,
    assignment: KeyAssignment,
) -> Result<PipelineOutcome>
where
    E: Extractor + ?Sized,
{
    let time = std::time::Instant::now();

    // extract
    let raw = match extractor.quarterly().await {
        Extract::Ready(raw) => raw,
        Extract::NotYetAvailable(reason) => {
            info!("quarterly pipeline skipped: {reason}");
            return Ok(PipelineOutcome::Skipped(reason));
        }
        Extract::Failed(err) => {
            error!(
                "quarterly extraction from {} failed, error({err})",
                extractor.source_name()
            );
            return Err(err);
        }
    };
    ensure_rows(&raw.profile.rows, "company profiles")?;
    ensure_rows(&raw.overview.rows, "company overviews")?;
    ensure_rows(&raw.definitions.rows, "ratio definitions")?;

    // transform: dimensions
    let companies = dimension::merge_company_sources(&raw.overview, &raw.profile)?;
    let (companies, ratios) = match assignment {
        KeyAssignment::Positional => {
            // positional keys only hold for an empty Dim_Company; later symbols take free keys
            let stock_registry = warehouse.stock_key_registry().await?;
            let companies = if stock_registry.is_empty() {
                dimension::normalize_companies(&companies)?
            } else {
                info!("Dim_Company already populated; only new symbols are added");
                new_companies(&companies, stock_registry)?
            };
            let ratios = dimension::normalize_ratios(&raw.definitions)?;
            ensure_rows(&ratios, "allow-listed ratio definitions")?;

            // positional keys cannot be reconciled with a populated Dim_Ratio
            let ratios = if warehouse.ratio_key_registry().await?.is_empty() {
                ratios
            } else {
                info!("Dim_Ratio already populated; ratio definitions not reloaded");
                vec![]
            };
            (companies, ratios)
        }
        KeyAssignment::Registry => {
            let mut stock_registry = warehouse.stock_key_registry().await?;
            let companies = dimension::normalize_companies_stable(&companies, &mut stock_registry)?;

            let mut ratio_registry = warehouse.ratio_key_registry().await?;
            let known: HashSet<String> = ratio_registry.bimap.right_values().cloned().collect();
            let ratios = dimension::normalize_ratios_stable(&raw.definitions, &mut ratio_registry)?;
            ensure_rows(&ratios, "allow-listed ratio definitions")?;

            let ratios: Vec<DimRatio> = ratios
                .into_iter()
                .filter(|ratio| !known.contains(&ratio.ratio_name))
                .collect();
            (companies, ratios)
        }
    };
    debug!(
        "{} companies and {} new ratio definitions normalized",
        companies.len(),
        ratios.len()
    );

    // transform: facts
    let dim_time = warehouse.dim_time().await?;
    if dim_time.is_empty() {
        error!("Dim_Time is empty; run the daily pipeline first");
        return Err(EtlError::EmptyDimension("Dim_Time"));
    }
    let index = TimeIndex::new(&dim_time);

    let table = fact::rename_ratio_table(&fact::assemble_ratio_table(&raw.ratios))?;
    let facts = fact::prepare_fact_ratios(&table, &index);
    ensure_rows(&facts.rows, "ratio facts")?;

    // load
    let mut report = PipelineReport {
        pipeline: "quarterly",
        loads: vec![],
        unmatched: facts.dropped,
    };
    report
        .loads
        .push(load::load_dim_company(warehouse, &companies).await?);
    if !ratios.is_empty() {
        report.loads.push(load::load_dim_ratio(warehouse, &ratios).await?);
    }

    let stock_keys = keys::resolve_stock_keys(warehouse).await?;
    let ratio_keys = keys::resolve_ratio_keys(warehouse).await?;
    report.loads.push(
        load::load_fact_financial_ratios(warehouse, &facts.rows, &stock_keys, &ratio_keys)
            .await?,
    );

    info!("quarterly pipeline finished. {}", crate::time_elapsed(time));
    Ok(PipelineOutcome::Completed(report))
}

// daily
// ----------------------------------------------------------------------------

/// Time dimension and stock-price facts for every session after the last loaded date.
pub async fn run_daily<E>(warehouse: &Warehouse, extractor: &E) -> Result<PipelineOutcome>
where
    E: Extractor + ?Sized,
{
    let time = std::time::Instant::now();

    let since = warehouse
        .last_date()
        .await?
        .and_then(|last| last.succ_opt());
    match since {
        Some(since) => info!("requesting quotes from {since}"),
        None => info!("Dim_Time is empty; requesting every quote"),
    }

    // extract
    let raw = match extractor.daily(since).await {
        Extract::Ready(raw) => raw,
        Extract::NotYetAvailable(reason) => {
            info!("daily pipeline skipped: {reason}");
            return Ok(PipelineOutcome::Skipped(reason));
        }
        Extract::Failed(err) => {
            error!(
                "daily extraction from {} failed, error({err})",
                extractor.source_name()
            );
            return Err(err);
        }
    };

    // transform
    let quotes = fact::parse_quotes(&raw)?;
    let dim_time = derive_dim_time(quotes.iter().map(|quote| quote.date));
    ensure_rows(&dim_time, "Dim_Time rows")?;

    let existing = warehouse.existing_time_keys().await?;
    let new_keys = dim_time
        .iter()
        .filter(|row| !existing.contains(&row.time_key))
        .count();
    if new_keys > 0 {
        info!("{new_keys} new time keys to add to Dim_Time");
    }

    let index = TimeIndex::new(&dim_time);
    let facts = fact::prepare_fact_stock_price(&quotes, &index);
    ensure_rows(&facts.rows, "price facts")?;
    debug!(
        "{} price facts over {} symbols and {} days",
        facts.rows.len(),
        facts
            .rows
            .iter()
            .map(|row| row.stock_symbol.as_str())
            .collect::<HashSet<_>>()
            .len(),
        dim_time.len()
    );

    // resolved before the first write: Dim_Time rows committed without their prices would
    // move the next run's window past those dates
    let stock_keys = keys::resolve_stock_keys(warehouse).await?;

    // load
    let mut report = PipelineReport {
        pipeline: "daily",
        loads: vec![],
        unmatched: facts.dropped,
    };
    report
        .loads
        .push(load::load_dim_time(warehouse, &dim_time).await?);
    report.loads.push(
        load::load_fact_stock_price(warehouse, &facts.rows, &stock_keys).await?,
    );

    info!("daily pipeline finished. {}", crate::time_elapsed(time));
    Ok(PipelineOutcome::Completed(report))
}

#[test]
fn empty_stage_output_is_input_validation() {
    let err = ensure_rows::<u8>(&[], "price facts").unwrap_err();
    assert!(matches!(err, EtlError::EmptyInput("price facts")));
    assert!(err.is_input_validation());
    assert!(ensure_rows(&[1], "price facts").is_ok());
}

#[test]
fn report_lists_every_load() {
    let report = PipelineReport {
        pipeline: "daily",
        loads: vec![LoadReport {
            table: "Dim_Time",
            received: 2,
            inserted: 1,
            ignored: 1,
            unresolved: 0,
        }],
        unmatched: 0,
    };
    assert_eq!(
        report.to_string(),
        "daily pipeline\n  Dim_Time: 2 received, 1 inserted, 1 already present, 0 unresolved\n  0 fact rows without a matching time key"
    );
}
