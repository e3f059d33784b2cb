use crate::db::PgClient;
use crate::dimension::{DimCompany, DimRatio};
use crate::error::Result;
use crate::fact::{PriceFact, RatioFact};
use crate::keys::KeyMap;
use crate::sql;
use crate::time::DimTime;
use crate::warehouse::Warehouse;
use rust_decimal::Decimal;
use std::fmt;
use tokio_postgres::types::ToSql;
use tracing::{debug, error, info, trace, warn};

/// What one load call did to its table.
///
/// `received = inserted + ignored + unresolved`:
/// - `ignored`, rows whose key was already present (insert-or-ignore);
/// - `unresolved`, fact rows whose symbol or ratio name has no surrogate key, never written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub table: &'static str,
    pub received: usize,
    pub inserted: usize,
    pub ignored: usize,
    pub unresolved: usize,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} received, {} inserted, {} already present, {} unresolved",
            self.table, self.received, self.inserted, self.ignored, self.unresolved
        )
    }
}

impl LoadReport {
    fn new(table: &'static str, received: usize, inserted: u64, unresolved: usize) -> Self {
        let inserted = inserted as usize;
        Self {
            table,
            received,
            inserted,
            ignored: received - unresolved - inserted,
            unresolved,
        }
    }

    /// Emit the report as a structured event; unresolved rows raise it to a warning.
    fn emit(&self) {
        if self.unresolved > 0 {
            warn!(
                table = self.table,
                received = self.received,
                inserted = self.inserted,
                ignored = self.ignored,
                unresolved = self.unresolved,
                "{} rows skipped, natural key not found",
                self.unresolved
            );
        }
        info!(
            table = self.table,
            received = self.received,
            inserted = self.inserted,
            ignored = self.ignored,
            unresolved = self.unresolved,
            "load complete"
        );
    }
}

/// A row that knows its own statement parameters, in column order.
trait Row {
    fn params(&self) -> Vec<&(dyn ToSql + Sync)>;
}

impl Row for DimTime {
    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.time_key.0,
            &self.date,
            &self.year,
            &self.quarter,
            &self.month,
            &self.week,
            &self.day,
        ]
    }
}

impl Row for DimCompany {
    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.stock_key,
            &self.stock_symbol,
            &self.company_name,
            &self.short_name,
            &self.industry,
            &self.company_type,
            &self.stock_rating,
        ]
    }
}

impl Row for DimRatio {
    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.ratio_key,
            &self.ratio_name,
            &self.unit,
            &self.ratio_type,
        ]
    }
}

/// `Fact_FinancialRatios` row with every key resolved.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RatioRow {
    pub time_key: i32,
    pub stock_key: i32,
    pub ratio_key: i32,
    pub value: Decimal,
}

impl Row for RatioRow {
    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![&self.time_key, &self.stock_key, &self.ratio_key, &self.value]
    }
}

/// `Fact_StockPrice` row with its `StockKey` resolved.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PriceRow<'a> {
    pub stock_key: i32,
    pub fact: &'a PriceFact,
}

impl Row for PriceRow<'_> {
    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.fact.time_key.0,
            &self.stock_key,
            &self.fact.open,
            &self.fact.high,
            &self.fact.low,
            &self.fact.close,
            &self.fact.volume,
        ]
    }
}

// resolution
// ----------------------------------------------------------------------------

/// Swap symbols and ratio names for their surrogate keys; returns the resolved rows and the
/// number of facts that had no key.
pub(crate) fn resolve_ratio_rows(
    facts: &[RatioFact],
    stock_keys: &KeyMap,
    ratio_keys: &KeyMap,
) -> (Vec<RatioRow>, usize) {
    let rows: Vec<RatioRow> = facts
        .iter()
        .filter_map(|fact| {
            let stock_key = stock_keys.get(&fact.stock_symbol);
            let ratio_key = ratio_keys.get(&fact.ratio_name);
            match (stock_key, ratio_key) {
                (Some(&stock_key), Some(&ratio_key)) => Some(RatioRow {
                    time_key: fact.time_key.0,
                    stock_key,
                    ratio_key,
                    value: fact.value,
                }),
                _ => {
                    trace!(
                        "no key for [{}] {}; ratio fact skipped",
                        fact.stock_symbol,
                        fact.ratio_name
                    );
                    None
                }
            }
        })
        .collect();

    let unresolved = facts.len() - rows.len();
    (rows, unresolved)
}

pub(crate) fn resolve_price_rows<'a>(
    facts: &'a [PriceFact],
    stock_keys: &KeyMap,
) -> (Vec<PriceRow<'a>>, usize) {
    let rows: Vec<PriceRow> = facts
        .iter()
        .filter_map(|fact| match stock_keys.get(&fact.stock_symbol) {
            Some(&stock_key) => Some(PriceRow { stock_key, fact }),
            None => {
                trace!("no key for [{}]; price fact skipped", fact.stock_symbol);
                None
            }
        })
        .collect();

    let unresolved = facts.len() - rows.len();
    (rows, unresolved)
}

// load
// ----------------------------------------------------------------------------

/// Insert every row within one transaction, returning how many rows were written.
///
/// Any failing statement aborts the call; the uncommitted transaction rolls back when
/// dropped and the session goes back to the pool.
async fn insert_all<R: Row>(
    warehouse: &Warehouse,
    table: &'static str,
    stmt: &str,
    rows: &[R],
) -> Result<u64> {
    let time = std::time::Instant::now();

    let mut session = warehouse.session().await?;
    let pg_client: &mut PgClient = &mut session;

    // preprocess pg query as transaction
    let query = pg_client.prepare(stmt).await?;
    let transaction = pg_client.transaction().await?;

    let mut inserted = 0;
    for row in rows {
        inserted += transaction
            .execute(&query, &row.params())
            .await
            .map_err(|err| {
                error!("failed to insert {table} row, error({err})");
                err
            })?;
    }

    transaction.commit().await.map_err(|err| {
        error!("failed to commit transaction for {table}, error({err})");
        err
    })?;

    debug!(
        "{inserted} of {} {table} rows written. {}",
        rows.len(),
        crate::time_elapsed(time)
    );
    Ok(inserted)
}

/// Insert-or-ignore `Dim_Time` on `TimeKey`; reloading present keys is a no-op.
pub async fn load_dim_time(warehouse: &Warehouse, rows: &[DimTime]) -> Result<LoadReport> {
    let table = "Dim_Time";
    let inserted = insert_all(warehouse, table, sql::INSERT_DIM_TIME, rows).await?;

    let report = LoadReport::new(table, rows.len(), inserted, 0);
    report.emit();
    Ok(report)
}

/// Insert-or-ignore `Dim_Company`; a row whose `StockKey` or `StockSymbol` is already present is skipped.
pub async fn load_dim_company(warehouse: &Warehouse, rows: &[DimCompany]) -> Result<LoadReport> {
    let table = "Dim_Company";
    let inserted = insert_all(warehouse, table, sql::INSERT_DIM_COMPANY, rows).await?;

    let report = LoadReport::new(table, rows.len(), inserted, 0);
    report.emit();
    Ok(report)
}

/// Plain insert into `Dim_Ratio`: a `RatioKey` already present fails the call and nothing
/// of it is kept.
pub async fn load_dim_ratio(warehouse: &Warehouse, rows: &[DimRatio]) -> Result<LoadReport> {
    let table = "Dim_Ratio";
    let inserted = insert_all(warehouse, table, sql::INSERT_DIM_RATIO, rows).await?;

    let report = LoadReport::new(table, rows.len(), inserted, 0);
    report.emit();
    Ok(report)
}

/// Append-or-skip `Fact_FinancialRatios`. Facts whose symbol or ratio name is missing from
/// the key maps are not written and are counted as `unresolved`.
pub async fn load_fact_financial_ratios(
    warehouse: &Warehouse,
    facts: &[RatioFact],
    stock_keys: &KeyMap,
    ratio_keys: &KeyMap,
) -> Result<LoadReport> {
    let table = "Fact_FinancialRatios";
    let (rows, unresolved) = resolve_ratio_rows(facts, stock_keys, ratio_keys);
    let inserted = insert_all(warehouse, table, sql::INSERT_FACT_RATIO, &rows).await?;

    let report = LoadReport::new(table, facts.len(), inserted, unresolved);
    report.emit();
    Ok(report)
}

/// Append-or-skip `Fact_StockPrice`; unknown symbols are counted as `unresolved`.
pub async fn load_fact_stock_price(
    warehouse: &Warehouse,
    facts: &[PriceFact],
    stock_keys: &KeyMap,
) -> Result<LoadReport> {
    let table = "Fact_StockPrice";
    let (rows, unresolved) = resolve_price_rows(facts, stock_keys);
    let inserted = insert_all(warehouse, table, sql::INSERT_FACT_PRICE, &rows).await?;

    let report = LoadReport::new(table, facts.len(), inserted, unresolved);
    report.emit();
    Ok(report)
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
