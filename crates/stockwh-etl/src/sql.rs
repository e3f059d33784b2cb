//////////////////////////////////////////////////////////////////
// schema
//////////////////////////////////////////////////////////////////

/// Warehouse tables, created when absent. Identifiers are quoted: the analytics layer reads
/// them case-sensitively.
pub(crate) static CREATE_TABLES: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS "Dim_Time" (
        "TimeKey"   INTEGER PRIMARY KEY,
        "Date"      DATE NOT NULL,
        "Year"      INTEGER NOT NULL,
        "Quarter"   INTEGER NOT NULL,
        "Month"     INTEGER NOT NULL,
        "Week"      INTEGER NOT NULL,
        "Day"       INTEGER NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS "Dim_Company" (
        "StockKey"      INTEGER PRIMARY KEY,
        "StockSymbol"   VARCHAR(10) NOT NULL UNIQUE,
        "CompanyName"   TEXT,
        "ShortName"     TEXT,
        "Industry"      TEXT,
        "CompanyType"   TEXT,
        "StockRating"   NUMERIC(5, 2)
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS "Dim_Ratio" (
        "RatioKey"      INTEGER PRIMARY KEY,
        "RatioName"     TEXT NOT NULL,
        "Unit"          TEXT,
        "RatioType"     TEXT
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS "Fact_FinancialRatios" (
        "TimeKey"       INTEGER NOT NULL REFERENCES "Dim_Time" ("TimeKey"),
        "StockKey"      INTEGER NOT NULL REFERENCES "Dim_Company" ("StockKey"),
        "RatioKey"      INTEGER NOT NULL REFERENCES "Dim_Ratio" ("RatioKey"),
        "Value"         DECIMAL(20, 4),
        PRIMARY KEY ("TimeKey", "StockKey", "RatioKey")
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS "Fact_StockPrice" (
        "TimeKey"       INTEGER NOT NULL REFERENCES "Dim_Time" ("TimeKey"),
        "StockKey"      INTEGER NOT NULL REFERENCES "Dim_Company" ("StockKey"),
        "Open"          DECIMAL(10, 4),
        "High"          DECIMAL(10, 4),
        "Low"           DECIMAL(10, 4),
        "Close"         DECIMAL(10, 4),
        "Volume"        BIGINT,
        PRIMARY KEY ("TimeKey", "StockKey")
    )"#,
];

//////////////////////////////////////////////////////////////////
// dimensions
//////////////////////////////////////////////////////////////////

pub(crate) static INSERT_DIM_TIME: &str = r#"
    INSERT INTO "Dim_Time" ("TimeKey", "Date", "Year", "Quarter", "Month", "Week", "Day")
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT ("TimeKey") DO NOTHING
"#;

pub(crate) static INSERT_DIM_COMPANY: &str = r#"
    INSERT INTO "Dim_Company" ("StockKey", "StockSymbol", "CompanyName", "ShortName", "Industry", "CompanyType", "StockRating")
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT DO NOTHING
"#;

/// `Dim_Ratio` is written unconditionally; a key collision fails the load.
pub(crate) static INSERT_DIM_RATIO: &str = r#"
    INSERT INTO "Dim_Ratio" ("RatioKey", "RatioName", "Unit", "RatioType")
    VALUES ($1, $2, $3, $4)
"#;

pub(crate) static SELECT_DIM_TIME: &str = r#"
    SELECT "TimeKey", "Date", "Year", "Quarter", "Month", "Week", "Day"
    FROM "Dim_Time"
    ORDER BY "TimeKey"
"#;

pub(crate) static SELECT_LAST_DATE: &str = r#"
    SELECT MAX("Date") FROM "Dim_Time"
"#;

pub(crate) static SELECT_TIME_KEYS: &str = r#"
    SELECT "TimeKey" FROM "Dim_Time"
"#;

/// `(StockKey, StockSymbol)`; the column order [`KeyTracker::pg_fetch`] reads.
///
/// [`KeyTracker::pg_fetch`]: crate::key_tracker::KeyTracker::pg_fetch
pub(crate) static SELECT_STOCK_KEYS: &str = r#"
    SELECT "StockKey", "StockSymbol" FROM "Dim_Company"
    ORDER BY "StockKey"
"#;

/// `(RatioKey, RatioName)`
pub(crate) static SELECT_RATIO_KEYS: &str = r#"
    SELECT "RatioKey", "RatioName" FROM "Dim_Ratio"
    ORDER BY "RatioKey"
"#;

//////////////////////////////////////////////////////////////////
// facts
//////////////////////////////////////////////////////////////////

pub(crate) static INSERT_FACT_RATIO: &str = r#"
    INSERT INTO "Fact_FinancialRatios" ("TimeKey", "StockKey", "RatioKey", "Value")
    VALUES ($1, $2, $3, $4)
    ON CONFLICT ("TimeKey", "StockKey", "RatioKey") DO NOTHING
"#;

pub(crate) static INSERT_FACT_PRICE: &str = r#"
    INSERT INTO "Fact_StockPrice" ("TimeKey", "StockKey", "Open", "High", "Low", "Close", "Volume")
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT ("TimeKey", "StockKey") DO NOTHING
"#;
