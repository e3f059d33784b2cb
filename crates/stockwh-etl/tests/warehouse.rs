use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use stockwh_etl::dimension::{DimCompany, DimRatio};
use stockwh_etl::extract::{Extract, Extractor, QuarterlyExtract};
use stockwh_etl::fact::PriceFact;
use stockwh_etl::pipeline::{self, KeyAssignment};
use stockwh_etl::time::{derive_dim_time, TimeKey};
use stockwh_etl::{keys, load, Config, EtlError, Frame, Label, PipelineOutcome, Warehouse};

// Each test works in its own schema, dropped and re-created first. Without WAREHOUSE_URL the
// tests return immediately.

async fn warehouse(name: &str) -> Option<Warehouse> {
    dotenv::dotenv().ok();
    let url = dotenv::var("WAREHOUSE_URL").ok()?;

    let schema = format!("stockwh_test_{name}");
    let warehouse = Warehouse::connect(&Config::new(url).with_schema(&schema)).unwrap();
    warehouse
        .session()
        .await
        .unwrap()
        .batch_execute(&format!("DROP SCHEMA IF EXISTS \"{schema}\" CASCADE"))
        .await
        .unwrap();
    warehouse.bootstrap().await.unwrap();
    Some(warehouse)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn company(stock_key: i32, symbol: &str) -> DimCompany {
    DimCompany {
        stock_key,
        stock_symbol: symbol.to_string(),
        company_name: Some(format!("{symbol} Joint Stock Company")),
        short_name: Some(symbol.to_string()),
        industry: Some("Banking".to_string()),
        company_type: Some("NH".to_string()),
        stock_rating: Some(Decimal::new(325, 2)),
    }
}

fn price(day: NaiveDate, symbol: &str) -> PriceFact {
    PriceFact {
        time_key: TimeKey::of(day),
        stock_symbol: symbol.to_string(),
        open: Some(Decimal::new(241, 1)),
        high: Some(Decimal::new(246, 1)),
        low: Some(Decimal::new(239, 1)),
        close: Some(Decimal::new(245, 1)),
        volume: Some(8_123_400),
    }
}

#[tokio::test]
async fn dimension_loads_are_idempotent() {
    let Some(warehouse) = warehouse("idempotent").await else {
        return;
    };

    let days = derive_dim_time(vec![date(2024, 1, 2), date(2024, 1, 3)]);
    let first = load::load_dim_time(&warehouse, &days).await.unwrap();
    let second = load::load_dim_time(&warehouse, &days).await.unwrap();
    assert_eq!((first.inserted, first.ignored), (2, 0));
    assert_eq!((second.inserted, second.ignored), (0, 2));
    assert_eq!(warehouse.dim_time().await.unwrap(), days);
    assert_eq!(warehouse.last_date().await.unwrap(), Some(date(2024, 1, 3)));

    let companies = vec![company(1, "ACB"), company(2, "BID")];
    load::load_dim_company(&warehouse, &companies).await.unwrap();
    let again = load::load_dim_company(&warehouse, &companies).await.unwrap();
    assert_eq!((again.inserted, again.ignored), (0, 2));

    let stock_keys = keys::resolve_stock_keys(&warehouse).await.unwrap();
    assert_eq!(stock_keys.len(), 2);
    assert_eq!(stock_keys.get("BID"), Some(&2));

    warehouse.close();
}

#[tokio::test]
async fn facts_with_unknown_symbols_are_skipped() {
    let Some(warehouse) = warehouse("unresolved").await else {
        return;
    };

    let days = derive_dim_time(vec![date(2024, 1, 2)]);
    load::load_dim_time(&warehouse, &days).await.unwrap();
    load::load_dim_company(&warehouse, &[company(1, "ACB")])
        .await
        .unwrap();
    let stock_keys = keys::resolve_stock_keys(&warehouse).await.unwrap();

    let facts = vec![price(date(2024, 1, 2), "ACB"), price(date(2024, 1, 2), "XYZ")];
    let report = load::load_fact_stock_price(&warehouse, &facts, &stock_keys)
        .await
        .unwrap();
    assert_eq!(report.received, 2);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.unresolved, 1);

    let count: i64 = warehouse
        .session()
        .await
        .unwrap()
        .query_one(r#"SELECT COUNT(*) FROM "Fact_StockPrice""#, &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 1);

    // append-or-skip
    let again = load::load_fact_stock_price(&warehouse, &facts, &stock_keys)
        .await
        .unwrap();
    assert_eq!((again.inserted, again.ignored, again.unresolved), (0, 1, 1));

    warehouse.close();
}

#[tokio::test]
async fn resolvers_require_loaded_dimensions() {
    let Some(warehouse) = warehouse("empty_dims").await else {
        return;
    };

    assert!(matches!(
        keys::resolve_stock_keys(&warehouse).await,
        Err(EtlError::EmptyDimension("Dim_Company"))
    ));
    assert!(matches!(
        keys::resolve_ratio_keys(&warehouse).await,
        Err(EtlError::EmptyDimension("Dim_Ratio"))
    ));

    warehouse.close();
}

#[tokio::test]
async fn ratio_reload_rolls_back() {
    let Some(warehouse) = warehouse("ratio_rerun").await else {
        return;
    };

    let ratios = vec![
        DimRatio {
            ratio_key: 1,
            ratio_name: "ROE".to_string(),
            unit: Some("%".to_string()),
            ratio_type: Some("Profitability".to_string()),
        },
        DimRatio {
            ratio_key: 2,
            ratio_name: "P/E".to_string(),
            unit: None,
            ratio_type: Some("Valuation".to_string()),
        },
    ];
    load::load_dim_ratio(&warehouse, &ratios[..1]).await.unwrap();

    // key 2 goes in first, then key 1 collides; neither is kept
    let reload: Vec<DimRatio> = ratios.iter().rev().cloned().collect();
    let err = load::load_dim_ratio(&warehouse, &reload).await.unwrap_err();
    assert!(matches!(err, EtlError::Postgres(_)));

    let ratio_keys = keys::resolve_ratio_keys(&warehouse).await.unwrap();
    assert_eq!(ratio_keys.len(), 1);
    assert_eq!(ratio_keys.get("ROE"), Some(&1));

    warehouse.close();
}

// pipelines
// ----------------------------------------------------------------------------

/// Extractor over frames held in memory.
struct Memory {
    quarterly: Option<QuarterlyExtract>,
    quotes: Frame,
}

#[async_trait]
impl Extractor for Memory {
    fn source_name(&self) -> &'static str {
        "memory"
    }

    async fn quarterly(&self) -> Extract<QuarterlyExtract> {
        match &self.quarterly {
            Some(extract) => Extract::Ready(extract.clone()),
            None => Extract::NotYetAvailable("quarter not published".to_string()),
        }
    }

    async fn daily(&self, since: Option<NaiveDate>) -> Extract<Frame> {
        let since = since.map(|day| day.to_string()).unwrap_or_default();
        let rows: Vec<Vec<Value>> = self
            .quotes
            .rows
            .iter()
            .filter(|row| row[0].as_str().is_some_and(|day| day >= since.as_str()))
            .cloned()
            .collect();
        if rows.is_empty() {
            return Extract::NotYetAvailable(format!("no quotes since {since}"));
        }
        Extract::Ready(Frame {
            columns: self.quotes.columns.clone(),
            rows,
        })
    }
}

fn quarterly_extract() -> QuarterlyExtract {
    let ratio_table = |rows: Vec<Vec<Value>>| Frame {
        columns: vec![
            Label::from(("Meta", "CP")),
            Label::from(("Meta", "Năm")),
            Label::from(("Meta", "Kỳ")),
            Label::from(("Chỉ tiêu khả năng sinh lợi", "ROE (%)")),
            Label::from(("Chỉ tiêu định giá", "P/E")),
        ],
        rows,
    };

    QuarterlyExtract {
        ratios: vec![
            ratio_table(vec![vec![json!("ACB"), json!(2024), json!(2), json!(15.2), json!(7.1)]]),
            ratio_table(vec![vec![json!("XYZ"), json!(2024), json!(2), json!(9.0), json!(null)]]),
        ],
        overview: Frame::flat(
            &["symbol", "exchange", "short_name", "industry", "company_type", "stock_rating"],
            vec![
                vec![json!("ACB"), json!("HOSE"), json!("ACB"), json!("Ngân hàng"), json!("NH"), json!(3.254)],
                vec![json!("BID"), json!("HOSE"), json!("BIDV"), json!("Ngân hàng"), json!("NH"), json!(null)],
            ],
        ),
        profile: Frame::flat(
            &["symbol", "company_name", "history_dev"],
            vec![
                vec![json!("ACB"), json!("Ngân hàng TMCP Á Châu"), json!("...")],
                vec![json!("BID"), json!("Ngân hàng TMCP Đầu tư và Phát triển Việt Nam"), json!("...")],
            ],
        ),
        definitions: Frame::flat(
            &["name", "unit", "type", "order"],
            vec![
                vec![json!("ROE (%)"), json!("%"), json!("Profitability"), json!(1)],
                vec![json!("P/E"), json!(null), json!("Valuation"), json!(2)],
                vec![json!("Vốn điều lệ"), json!("Tỷ đồng"), json!("Other"), json!(3)],
            ],
        ),
    }
}

fn quotes() -> Frame {
    Frame::flat(
        &["time", "MaCK", "open", "high", "low", "close", "volume"],
        vec![
            vec![json!("2024-07-01"), json!("ACB"), json!(24.1), json!(24.6), json!(23.9), json!(24.5), json!(8123400)],
            vec![json!("2024-07-01"), json!("BID"), json!(45.0), json!(45.5), json!(44.8), json!(45.2), json!(2100000)],
            vec![json!("2024-07-01"), json!("XYZ"), json!(1.0), json!(1.0), json!(1.0), json!(1.0), json!(100)],
        ],
    )
}

fn completed(outcome: PipelineOutcome) -> pipeline::PipelineReport {
    match outcome {
        PipelineOutcome::Completed(report) => report,
        PipelineOutcome::Skipped(reason) => panic!("pipeline skipped: {reason}"),
    }
}

#[tokio::test]
async fn quarterly_then_daily() {
    let Some(warehouse) = warehouse("pipelines").await else {
        return;
    };
    let extractor = Memory {
        quarterly: Some(quarterly_extract()),
        quotes: quotes(),
    };

    // the quarterly pipeline reads its time keys from Dim_Time
    assert!(matches!(
        pipeline::run_quarterly(&warehouse, &extractor, KeyAssignment::Positional).await,
        Err(EtlError::EmptyDimension("Dim_Time"))
    ));
    load::load_dim_time(&warehouse, &derive_dim_time(vec![date(2024, 4, 2), date(2024, 6, 30)]))
        .await
        .unwrap();

    let report = completed(
        pipeline::run_quarterly(&warehouse, &extractor, KeyAssignment::Positional)
            .await
            .unwrap(),
    );
    // 2 symbols x 34 ratios; only ACB's ROE and P/E have both keys
    let facts = report.loads.last().unwrap();
    assert_eq!(facts.table, "Fact_FinancialRatios");
    assert_eq!(facts.received, 68);
    assert_eq!((facts.inserted, facts.unresolved), (2, 66));

    let row = warehouse
        .session()
        .await
        .unwrap()
        .query_one(
            r#"SELECT "TimeKey", "Value" FROM "Fact_FinancialRatios" f
               JOIN "Dim_Ratio" r ON r."RatioKey" = f."RatioKey"
               WHERE r."RatioName" = 'ROE'"#,
            &[],
        )
        .await
        .unwrap();
    assert_eq!(row.get::<_, i32>(0), 20240402);
    assert_eq!(row.get::<_, Decimal>(1), Decimal::new(152, 1));

    // re-run: Dim_Ratio is already populated and is left alone
    let rerun = completed(
        pipeline::run_quarterly(&warehouse, &extractor, KeyAssignment::Registry)
            .await
            .unwrap(),
    );
    assert!(rerun.loads.iter().all(|load| load.table != "Dim_Ratio"));
    assert_eq!(rerun.loads.last().unwrap().ignored, 2);

    // daily picks up after 2024-06-30
    let daily = completed(pipeline::run_daily(&warehouse, &extractor).await.unwrap());
    let prices = daily.loads.last().unwrap();
    assert_eq!((prices.inserted, prices.unresolved), (2, 1));
    assert_eq!(warehouse.last_date().await.unwrap(), Some(date(2024, 7, 1)));

    // nothing newer
    assert!(matches!(
        pipeline::run_daily(&warehouse, &extractor).await.unwrap(),
        PipelineOutcome::Skipped(_)
    ));

    warehouse.close();
}

#[tokio::test]
async fn unpublished_quarter_is_skipped() {
    let Some(warehouse) = warehouse("unpublished").await else {
        return;
    };
    let extractor = Memory {
        quarterly: None,
        quotes: Frame::default(),
    };

    assert!(matches!(
        pipeline::run_quarterly(&warehouse, &extractor, KeyAssignment::Positional)
            .await
            .unwrap(),
        PipelineOutcome::Skipped(_)
    ));
    assert!(matches!(
        pipeline::run_daily(&warehouse, &extractor).await.unwrap(),
        PipelineOutcome::Skipped(_)
    ));

    warehouse.close();
}

#[tokio::test]
async fn daily_waits_for_company_dimension() {
    let Some(warehouse) = warehouse("daily_first").await else {
        return;
    };
    let extractor = Memory {
        quarterly: None,
        quotes: quotes(),
    };

    // nothing is written, so the same window is requested again
    assert!(matches!(
        pipeline::run_daily(&warehouse, &extractor).await,
        Err(EtlError::EmptyDimension("Dim_Company"))
    ));
    assert_eq!(warehouse.last_date().await.unwrap(), None);

    load::load_dim_company(&warehouse, &[company(1, "ACB"), company(2, "BID")])
        .await
        .unwrap();
    let daily = completed(pipeline::run_daily(&warehouse, &extractor).await.unwrap());
    let prices = daily.loads.last().unwrap();
    assert_eq!((prices.inserted, prices.unresolved), (2, 1));

    let count: i64 = warehouse
        .session()
        .await
        .unwrap()
        .query_one(r#"SELECT COUNT(*) FROM "Fact_StockPrice""#, &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 2);

    warehouse.close();
}

#[tokio::test]
async fn positional_rerun_keeps_company_keys() {
    let Some(warehouse) = warehouse("positional_rerun").await else {
        return;
    };
    load::load_dim_time(&warehouse, &derive_dim_time(vec![date(2024, 4, 2)]))
        .await
        .unwrap();

    let mut extractor = Memory {
        quarterly: Some(quarterly_extract()),
        quotes: Frame::default(),
    };
    pipeline::run_quarterly(&warehouse, &extractor, KeyAssignment::Positional)
        .await
        .unwrap();

    // a new listing sorts ahead of the known symbols
    if let Some(extract) = extractor.quarterly.as_mut() {
        extract.overview.rows.insert(
            0,
            vec![json!("AAA"), json!("HOSE"), json!("AAA"), json!("Nhựa"), json!("CT"), json!(2.1)],
        );
        extract.profile.rows.insert(
            0,
            vec![json!("AAA"), json!("Công ty CP Nhựa An Phát Xanh"), json!("...")],
        );
    }
    let rerun = completed(
        pipeline::run_quarterly(&warehouse, &extractor, KeyAssignment::Positional)
            .await
            .unwrap(),
    );
    let companies = &rerun.loads[0];
    assert_eq!(companies.table, "Dim_Company");
    assert_eq!((companies.inserted, companies.ignored), (1, 0));

    let rows: Vec<(i32, String)> = warehouse
        .session()
        .await
        .unwrap()
        .query(
            r#"SELECT "StockKey", "StockSymbol" FROM "Dim_Company" ORDER BY "StockKey""#,
            &[],
        )
        .await
        .unwrap()
        .into_iter()
        .map(|row| (row.get(0), row.get(1)))
        .collect();
    assert_eq!(
        rows,
        vec![
            (1, "ACB".to_string()),
            (2, "BID".to_string()),
            (3, "AAA".to_string())
        ]
    );

    let stock_keys = keys::resolve_stock_keys(&warehouse).await.unwrap();
    assert_eq!(stock_keys.get("BID"), Some(&2));

    let registry = warehouse.stock_key_registry().await.unwrap();
    assert_eq!(registry.see_next_key(), &4);

    // a symbol can only be stored once
    let duplicate = load::load_dim_company(&warehouse, &[company(9, "ACB")])
        .await
        .unwrap();
    assert_eq!((duplicate.inserted, duplicate.ignored), (0, 1));

    warehouse.close();
}
