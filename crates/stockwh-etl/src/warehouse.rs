use crate::config::Config;
use crate::db::Pool;
use crate::error::Result;
use crate::key_tracker::KeyTracker;
use crate::sql;
use crate::time::{DimTime, TimeKey};
use chrono::NaiveDate;
use deadpool_postgres::{ManagerConfig, Object, PoolConfig, RecyclingMethod, Runtime};
use std::collections::HashSet;
use tokio_postgres::NoTls;
use tracing::{debug, error, trace};

/// Handle on the warehouse database: a connection pool, constructed once per process and
/// shared by every pipeline stage.
///
/// Each load borrows one session from the pool for the whole call and hands it back on every
/// exit path; reads borrow one per query.
#[derive(Clone)]
pub struct Warehouse {
    pool: Pool,
    schema: Option<String>,
}

impl Warehouse {
    /// Build the connection pool. No connection is opened until the first session is taken.
    pub fn connect(config: &Config) -> Result<Self> {
        config.validate()?;

        trace!("creating warehouse connection pool config");
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.url = Some(config.url.clone());
        pg_config.options = config
            .schema
            .as_ref()
            .map(|schema| format!("-c search_path={schema}"));
        pg_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg_config.pool = Some(PoolConfig::new(config.pool_size));

        trace!("creating warehouse connection pool");
        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|err| {
                error!("failed to create warehouse connection pool, error({err})");
                err
            })?;
        debug!("warehouse connection pool established");

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    /// Take a session from the pool; it returns to the pool when dropped.
    pub async fn session(&self) -> Result<Object> {
        let session = self.pool.get().await.map_err(|err| {
            error!("failed to take a warehouse session, error({err})");
            err
        })?;
        Ok(session)
    }

    /// Create the schema (when one is configured) and every warehouse table that is absent.
    pub async fn bootstrap(&self) -> Result<()> {
        let session = self.session().await?;

        if let Some(schema) = &self.schema {
            trace!("creating schema {schema}");
            session
                .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
                .await?;
        }

        for stmt in sql::CREATE_TABLES {
            session.batch_execute(stmt).await.map_err(|err| {
                error!("failed to create warehouse table, error({err})");
                err
            })?;
        }

        debug!("warehouse tables in place");
        Ok(())
    }

    /// Every `Dim_Time` row, ordered by key.
    pub async fn dim_time(&self) -> Result<Vec<DimTime>> {
        let rows = self
            .session()
            .await?
            .query(sql::SELECT_DIM_TIME, &[])
            .await
            .map_err(|err| {
                error!("failed to fetch Dim_Time, error({err})");
                err
            })?
            .into_iter()
            .map(|row| DimTime {
                time_key: TimeKey(row.get(0)),
                date: row.get(1),
                year: row.get(2),
                quarter: row.get(3),
                month: row.get(4),
                week: row.get(5),
                day: row.get(6),
            })
            .collect::<Vec<_>>();

        trace!("{} Dim_Time rows fetched", rows.len());
        Ok(rows)
    }

    /// The latest date in `Dim_Time`; `None` while the table is empty.
    pub async fn last_date(&self) -> Result<Option<NaiveDate>> {
        let row = self
            .session()
            .await?
            .query_one(sql::SELECT_LAST_DATE, &[])
            .await?;
        Ok(row.get(0))
    }

    pub async fn existing_time_keys(&self) -> Result<HashSet<TimeKey>> {
        let keys = self
            .session()
            .await?
            .query(sql::SELECT_TIME_KEYS, &[])
            .await?
            .into_iter()
            .map(|row| TimeKey(row.get(0)))
            .collect();
        Ok(keys)
    }

    /// `StockKey` ↔ `StockSymbol`, as currently persisted.
    pub async fn stock_key_registry(&self) -> Result<KeyTracker<i32, String>> {
        let session = self.session().await?;
        KeyTracker::pg_fetch(&session, sql::SELECT_STOCK_KEYS).await
    }

    /// `RatioKey` ↔ `RatioName`, as currently persisted.
    pub async fn ratio_key_registry(&self) -> Result<KeyTracker<i32, String>> {
        let session = self.session().await?;
        KeyTracker::pg_fetch(&session, sql::SELECT_RATIO_KEYS).await
    }

    /// Close the pool; sessions already taken finish, new ones are refused.
    pub fn close(&self) {
        self.pool.close();
        debug!("warehouse connection pool closed");
    }
}
