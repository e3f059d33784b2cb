use crate::error::{EtlError, Result};
use dotenv::var;
use std::path::PathBuf;
use tracing::trace;

pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Runtime settings, read from the environment (and a `.env` file, when present).
///
/// | variable              | required | default  |
/// |-----------------------|----------|----------|
/// | `WAREHOUSE_URL`       | yes      |          |
/// | `WAREHOUSE_SCHEMA`    | no       | (none)   |
/// | `WAREHOUSE_POOL_SIZE` | no       | 4        |
/// | `DATA_DIR`            | no       | `./data` |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Postgres connection string of the warehouse.
    pub url: String,
    /// Schema the warehouse tables live in; placed first on the `search_path`.
    pub schema: Option<String>,
    pub pool_size: usize,
    /// Root of the extracted provider files.
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let url = var("WAREHOUSE_URL")
            .map_err(|_| EtlError::Config("environment variable WAREHOUSE_URL".to_string()))?;

        let schema = var("WAREHOUSE_SCHEMA").ok().filter(|s| !s.trim().is_empty());

        let pool_size = match var("WAREHOUSE_POOL_SIZE") {
            Ok(size) => size.trim().parse::<usize>().map_err(|_| {
                EtlError::Config(format!("WAREHOUSE_POOL_SIZE is not a count: \"{size}\""))
            })?,
            Err(_) => DEFAULT_POOL_SIZE,
        };

        let data_dir = var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

        let config = Self {
            url,
            schema,
            pool_size,
            data_dir,
        };
        config.validate()?;
        trace!(
            "configuration read; schema {:?}, pool size {}, data dir {}",
            config.schema,
            config.pool_size,
            config.data_dir.display()
        );
        Ok(config)
    }

    /// Reject settings the pool cannot work with.
    ///
    /// The schema name goes into both `CREATE SCHEMA` and the session `search_path`, so it is
    /// limited to lowercase letters, digits and `_`, the names both read the same way.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(EtlError::Config(
                "WAREHOUSE_POOL_SIZE must be at least 1".to_string(),
            ));
        }

        if let Some(schema) = &self.schema {
            let mut chars = schema.chars();
            let valid = chars
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                return Err(EtlError::Config(format!(
                    "WAREHOUSE_SCHEMA must be lowercase letters, digits and '_': \"{schema}\""
                )));
            }
        }
        Ok(())
    }

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            schema: None,
            pool_size: DEFAULT_POOL_SIZE,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pool_is_rejected() {
        let mut config = Config::new("postgres://localhost/warehouse");
        assert!(config.validate().is_ok());

        config.pool_size = 0;
        assert!(matches!(config.validate(), Err(EtlError::Config(_))));
    }

    #[test]
    fn schema_names_read_the_same_quoted_and_unquoted() {
        let config = |schema: &str| Config::new("postgres://localhost/warehouse").with_schema(schema);

        assert!(config("dw").validate().is_ok());
        assert!(config("stockwh_test_2").validate().is_ok());
        assert!(config("_staging").validate().is_ok());

        for bad in ["Dw", "dw-prod", "1dw", "dw\"; DROP", ""] {
            assert!(
                matches!(config(bad).validate(), Err(EtlError::Config(_))),
                "{bad} accepted"
            );
        }
    }
}
