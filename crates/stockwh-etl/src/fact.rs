use crate::error::{EtlError, Result};
use crate::frame::{Frame, Label};
use crate::schema::{self, QUOTE, RATIO_PERIOD, RATIO_SYMBOL, RATIO_TABLE, RATIO_YEAR};
use crate::time::{parse_date, TimeIndex, TimeKey};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

/// Stand-in for a ratio the provider did not report for a (symbol, quarter). Downstream
/// aggregates are not null-safe, so the long table never carries a missing value.
pub const MISSING_VALUE: i64 = -99_999_999;

pub fn missing_value() -> Decimal {
    Decimal::from(MISSING_VALUE)
}

/// Output of a reshape: the rows that resolved to a `TimeKey`, and how many did not.
#[derive(Debug, PartialEq)]
pub struct Reshaped<T> {
    pub rows: Vec<T>,
    pub dropped: usize,
}

impl<T> Reshaped<T> {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Financial ratios
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Stack the per-symbol ratio tables into one table with the canonical header.
///
/// Each provider table has two-level labels, `(category, name)`; a column is kept when its
/// name is an identifier (`CP`, `Năm`, `Kỳ`) or an allow-listed ratio, and is flattened to
/// that name. Desired columns a table lacks are added as all-`null`.
pub fn assemble_ratio_table(frames: &[Frame]) -> Frame {
    let header = schema::ratio_table_header();
    let mut table = Frame::new(header.iter().map(|&name| Label::from(name)).collect());

    for frame in frames {
        let positions: Vec<Option<usize>> =
            header.iter().map(|name| frame.position(name)).collect();

        let missing = positions.iter().filter(|pos| pos.is_none()).count();
        if missing > 0 {
            trace!("ratio table lacks {missing} of {} desired columns", header.len());
        }

        for row in 0..frame.len() {
            table.push_row(
                positions
                    .iter()
                    .map(|pos| match pos {
                        Some(col) => frame.cell(row, *col).clone(),
                        None => serde_json::Value::Null,
                    })
                    .collect(),
            );
        }
    }

    debug!(
        "assembled {} ratio rows from {} tables",
        table.len(),
        frames.len()
    );
    table
}

/// Wide ratio table under canonical names, missing cells filled with [`MISSING_VALUE`].
#[derive(Clone, Debug, PartialEq)]
pub struct RatioTable {
    /// Canonical ratio names, in column order.
    pub ratios: Vec<&'static str>,
    pub rows: Vec<WideRatioRow>,
}

/// One (symbol, year, quarter) of a [`RatioTable`]; `values` is aligned with
/// [`RatioTable::ratios`].
#[derive(Clone, Debug, PartialEq)]
pub struct WideRatioRow {
    pub stock_symbol: String,
    pub year: Option<i32>,
    pub period: Option<i32>,
    pub values: Vec<Decimal>,
}

/// One cell of a [`RatioTable`] after the wide → long reshape.
#[derive(Clone, Debug, PartialEq)]
pub struct LongRatioRow {
    pub stock_symbol: String,
    pub year: Option<i32>,
    pub period: Option<i32>,
    pub ratio_name: &'static str,
    pub value: Decimal,
}

/// A row bound for `Fact_FinancialRatios`, still keyed by natural keys.
#[derive(Clone, Debug, PartialEq)]
pub struct RatioFact {
    pub time_key: TimeKey,
    pub stock_symbol: String,
    pub ratio_name: String,
    pub value: Decimal,
}

/// Rename a ratio table's provider labels through [`schema::RATIO_COLUMNS`] and fill every
/// missing ratio cell with [`MISSING_VALUE`].
///
/// Rows without a symbol cannot reach a fact table and are dropped here.
pub fn rename_ratio_table(frame: &Frame) -> Result<RatioTable> {
    let table = RATIO_TABLE.table;
    RATIO_TABLE.validate(frame)?;

    let symbol = frame.require(table, RATIO_SYMBOL)?;
    let year = frame.require(table, RATIO_YEAR)?;
    let period = frame.require(table, RATIO_PERIOD)?;

    // every non-identifier column is an allow-listed ratio, validation guarantees it
    let columns: Vec<(usize, &'static str)> = frame
        .names()
        .enumerate()
        .filter(|&(col, _)| col != symbol && col != year && col != period)
        .filter_map(|(col, name)| RATIO_TABLE.canonical(name).map(|canonical| (col, canonical)))
        .collect();

    let mut rows = Vec::with_capacity(frame.len());
    let mut symbolless = 0;
    for row in 0..frame.len() {
        let Some(stock_symbol) = frame.text(table, row, symbol)? else {
            symbolless += 1;
            continue;
        };

        let mut values = Vec::with_capacity(columns.len());
        for &(col, _) in &columns {
            values.push(frame.decimal(table, row, col)?.unwrap_or_else(missing_value));
        }

        rows.push(WideRatioRow {
            stock_symbol,
            year: to_i32(frame.int(table, row, year)?, table, RATIO_YEAR)?,
            period: to_i32(frame.int(table, row, period)?, table, RATIO_PERIOD)?,
            values,
        });
    }

    if symbolless > 0 {
        warn!("{symbolless} ratio rows without a symbol dropped");
    }

    Ok(RatioTable {
        ratios: columns.into_iter().map(|(_, canonical)| canonical).collect(),
        rows,
    })
}

fn to_i32(value: Option<i64>, table: &'static str, field: &str) -> Result<Option<i32>> {
    value
        .map(|v| {
            i32::try_from(v).map_err(|_| EtlError::InvalidCell {
                table,
                field: field.to_string(),
                value: v.to_string(),
            })
        })
        .transpose()
}

/// Wide → long: every (row, ratio) pair becomes one row, ratio-major like a dataframe melt.
pub fn melt_ratios(table: &RatioTable) -> Vec<LongRatioRow> {
    let mut long = Vec::with_capacity(table.ratios.len() * table.rows.len());
    for (i, &ratio_name) in table.ratios.iter().enumerate() {
        for row in &table.rows {
            long.push(LongRatioRow {
                stock_symbol: row.stock_symbol.clone(),
                year: row.year,
                period: row.period,
                ratio_name,
                value: row.values[i],
            });
        }
    }
    long
}

/// Reshape a ratio table into fact rows, each borrowing the `TimeKey` its (year, quarter)
/// resolves to in `index`. Rows whose quarter is unknown are dropped.
pub fn prepare_fact_ratios(table: &RatioTable, index: &TimeIndex) -> Reshaped<RatioFact> {
    let long = melt_ratios(table);
    let total = long.len();

    let rows: Vec<RatioFact> = long
        .into_iter()
        .filter_map(|row| {
            let time_key = index.by_quarter(row.year?, row.period?)?;
            Some(RatioFact {
                time_key,
                stock_symbol: row.stock_symbol,
                ratio_name: row.ratio_name.to_string(),
                value: row.value,
            })
        })
        .collect();

    let dropped = total - rows.len();
    debug!(
        "{} ratio facts prepared, {dropped} without a matching quarter",
        rows.len()
    );
    Reshaped { rows, dropped }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Stock prices
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A daily quote under canonical names.
#[derive(Clone, Debug, PartialEq)]
pub struct Quote {
    pub date: NaiveDate,
    pub stock_symbol: String,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<i64>,
}

/// A row bound for `Fact_StockPrice`, still keyed by its symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceFact {
    pub time_key: TimeKey,
    pub stock_symbol: String,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<i64>,
}

/// Read a quote frame into typed quotes; every timestamp is cut down to its date.
pub fn parse_quotes(frame: &Frame) -> Result<Vec<Quote>> {
    let table = QUOTE.table;
    QUOTE.validate(frame)?;

    let time = frame.require(table, "time")?;
    let symbol = frame.require(table, "MaCK")?;
    let open = frame.require(table, "open")?;
    let high = frame.require(table, "high")?;
    let low = frame.require(table, "low")?;
    let close = frame.require(table, "close")?;
    let volume = frame.require(table, "volume")?;

    let required = |row: usize, col: usize| -> Result<String> {
        frame
            .text(table, row, col)?
            .ok_or_else(|| EtlError::InvalidCell {
                table,
                field: frame.columns[col].name().to_string(),
                value: "null".to_string(),
            })
    };

    (0..frame.len())
        .map(|row| {
            Ok(Quote {
                date: parse_date(&required(row, time)?)?,
                stock_symbol: required(row, symbol)?,
                open: frame.decimal(table, row, open)?,
                high: frame.decimal(table, row, high)?,
                low: frame.decimal(table, row, low)?,
                close: frame.decimal(table, row, close)?,
                volume: frame.int(table, row, volume)?,
            })
        })
        .collect()
}

/// Attach the `TimeKey` of each quote's date; quotes on dates missing from `index` are
/// dropped.
pub fn prepare_fact_stock_price(quotes: &[Quote], index: &TimeIndex) -> Reshaped<PriceFact> {
    let rows: Vec<PriceFact> = quotes
        .iter()
        .filter_map(|quote| {
            let Some(time_key) = index.by_date(&quote.date) else {
                trace!(
                    "no time key for {} [{}]; quote dropped",
                    quote.date,
                    quote.stock_symbol
                );
                return None;
            };
            Some(PriceFact {
                time_key,
                stock_symbol: quote.stock_symbol.clone(),
                open: quote.open,
                high: quote.high,
                low: quote.low,
                close: quote.close,
                volume: quote.volume,
            })
        })
        .collect();

    let dropped = quotes.len() - rows.len();
    debug!(
        "{} price facts prepared, {dropped} without a matching date",
        rows.len()
    );
    Reshaped { rows, dropped }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{derive_dim_time, DimTime};
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ratio_frame() -> Frame {
        Frame {
            columns: vec![
                Label::from(("Meta", "CP")),
                Label::from(("Meta", "Năm")),
                Label::from(("Meta", "Kỳ")),
                Label::from(("Chỉ tiêu khả năng sinh lợi", "ROE (%)")),
                Label::from(("Chỉ tiêu định giá", "P/E")),
                Label::from(("Chỉ tiêu định giá", "Vốn điều lệ (Tỷ đồng)")),
            ],
            rows: vec![
                vec![json!("ACB"), json!(2024), json!(2), json!(15.2), json!(null), json!(1)],
                vec![json!("ACB"), json!(2024), json!(1), json!(14.8), json!(7.1), json!(1)],
            ],
        }
    }

    #[test]
    fn assemble_selects_flattens_and_pads() {
        let table = assemble_ratio_table(&[ratio_frame(), ratio_frame()]);
        assert_eq!(table.columns.len(), 37);
        assert_eq!(table.columns[0], Label::from("CP"));
        assert_eq!(table.len(), 4);

        let roe = table.position("ROE (%)").unwrap();
        let pb = table.position("P/B").unwrap();
        assert_eq!(table.cell(0, roe), &json!(15.2));
        assert_eq!(table.cell(0, pb), &json!(null));
        assert!(table.position("Vốn điều lệ (Tỷ đồng)").is_none());
    }

    #[test]
    fn assemble_of_nothing_keeps_the_header() {
        let table = assemble_ratio_table(&[]);
        assert!(table.is_empty());
        assert_eq!(table.columns.len(), 37);
    }

    #[test]
    fn rename_fills_missing_with_sentinel() {
        let table = rename_ratio_table(&assemble_ratio_table(&[ratio_frame()])).unwrap();
        assert_eq!(table.ratios.len(), 34);
        assert_eq!(table.ratios[4], "ROE");

        let row = &table.rows[0];
        assert_eq!(row.stock_symbol, "ACB");
        assert_eq!((row.year, row.period), (Some(2024), Some(2)));
        assert_eq!(row.values[4], Decimal::new(152, 1));

        let pe = table.ratios.iter().position(|&r| r == "P/E").unwrap();
        assert_eq!(row.values[pe], missing_value());
        assert_eq!(table.rows[1].values[pe], Decimal::new(71, 1));
    }

    #[test]
    fn rename_rejects_unknown_ratio_column() {
        let frame = Frame::flat(&["CP", "Năm", "Kỳ", "Vốn điều lệ"], vec![]);
        assert!(matches!(
            rename_ratio_table(&frame),
            Err(EtlError::UnexpectedField { .. })
        ));
    }

    #[test]
    fn melt_is_ratio_major() {
        let frame = Frame::flat(
            &["CP", "Năm", "Kỳ", "ROE (%)", "P/E"],
            vec![
                vec![json!("ACB"), json!(2024), json!(2), json!(15.2), json!(7.1)],
                vec![json!("BID"), json!(2024), json!(2), json!(18.0), json!(null)],
            ],
        );
        let long = melt_ratios(&rename_ratio_table(&frame).unwrap());
        let cells: Vec<_> = long
            .iter()
            .map(|r| (r.stock_symbol.as_str(), r.ratio_name))
            .collect();
        assert_eq!(
            cells,
            vec![("ACB", "ROE"), ("BID", "ROE"), ("ACB", "P/E"), ("BID", "P/E")]
        );
        assert_eq!(long[3].value, missing_value());
    }

    #[test]
    fn ratio_fact_borrows_quarter_time_key() {
        let frame = Frame::flat(
            &["CP", "Năm", "Kỳ", "ROE (%)"],
            vec![vec![json!("ACB"), json!(2024), json!(2), json!(15.2)]],
        );
        let index = TimeIndex::new(&[DimTime::from_date(date(2024, 6, 30))]);

        let facts = prepare_fact_ratios(&rename_ratio_table(&frame).unwrap(), &index);
        assert_eq!(facts.dropped, 0);
        assert_eq!(
            facts.rows,
            vec![RatioFact {
                time_key: TimeKey(20240630),
                stock_symbol: "ACB".to_string(),
                ratio_name: "ROE".to_string(),
                value: Decimal::new(152, 1),
            }]
        );
    }

    #[test]
    fn ratio_rows_without_quarter_are_dropped() {
        let frame = Frame::flat(
            &["CP", "Năm", "Kỳ", "ROE (%)"],
            vec![
                vec![json!("ACB"), json!(2024), json!(2), json!(15.2)],
                vec![json!("ACB"), json!(2019), json!(4), json!(21.0)],
                vec![json!("ACB"), json!(null), json!(4), json!(21.0)],
                vec![json!("ACB"), json!(2024), json!(5), json!(21.0)],
            ],
        );
        let index = TimeIndex::new(&derive_dim_time(vec![date(2024, 4, 2)]));

        let facts = prepare_fact_ratios(&rename_ratio_table(&frame).unwrap(), &index);
        assert_eq!(facts.rows.len(), 1);
        assert_eq!(facts.dropped, 3);
        assert_eq!(facts.rows[0].time_key, TimeKey(20240402));
    }

    fn quote_frame() -> Frame {
        Frame::flat(
            &["time", "MaCK", "open", "high", "low", "close", "volume"],
            vec![
                vec![
                    json!("2024-01-02"),
                    json!("ACB"),
                    json!(24.1),
                    json!(24.6),
                    json!(23.9),
                    json!(24.5),
                    json!(8123400.0),
                ],
                vec![
                    json!("2024-01-03 00:00:00"),
                    json!("ACB"),
                    json!(24.5),
                    json!(24.9),
                    json!(24.2),
                    json!(24.8),
                    json!(null),
                ],
            ],
        )
    }

    #[test]
    fn quotes_parse_to_canonical_rows() {
        let quotes = parse_quotes(&quote_frame()).unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].date, date(2024, 1, 2));
        assert_eq!(quotes[0].stock_symbol, "ACB");
        assert_eq!(quotes[0].close, Some(Decimal::new(245, 1)));
        assert_eq!(quotes[0].volume, Some(8_123_400));
        assert_eq!(quotes[1].date, date(2024, 1, 3));
        assert_eq!(quotes[1].volume, None);
    }

    #[test]
    fn quote_with_bad_date_fails() {
        let mut frame = quote_frame();
        frame.rows[0][0] = json!("02/01/2024");
        assert!(matches!(parse_quotes(&frame), Err(EtlError::InvalidDate(_))));
    }

    #[test]
    fn price_without_time_key_is_dropped() {
        let quotes = parse_quotes(&quote_frame()).unwrap();
        let index = TimeIndex::new(&derive_dim_time(vec![date(2024, 1, 3)]));

        let facts = prepare_fact_stock_price(&quotes, &index);
        assert_eq!(facts.dropped, 1);
        assert_eq!(facts.rows.len(), 1);
        assert_eq!(facts.rows[0].time_key, TimeKey(20240103));
        assert_eq!(facts.rows[0].open, Some(Decimal::new(245, 1)));

        let empty = prepare_fact_stock_price(&quotes[..1], &index);
        assert!(empty.is_empty());
    }
}
