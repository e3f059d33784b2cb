use thiserror::Error;

/// Result type for the transform & load core.
pub type Result<T> = std::result::Result<T, EtlError>;

/// Everything that can abort a pipeline stage.
///
/// Unresolvable natural keys are deliberately absent: fact rows that reference an unknown
/// symbol or ratio are counted in a [`LoadReport`](crate::load::LoadReport), never raised.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Extracted or transformed data was empty where rows are required.
    #[error("no data: {0}")]
    EmptyInput(&'static str),

    /// A dimension table had to be loaded before this step, but holds no rows.
    #[error("dimension table {0} is empty; load dimensions before facts")]
    EmptyDimension(&'static str),

    /// A provider frame lacks a field declared by its mapping.
    #[error("{table}: missing field \"{field}\"")]
    MissingField { table: &'static str, field: String },

    /// A provider frame carries a field its mapping does not declare.
    #[error("{table}: unexpected field \"{field}\"")]
    UnexpectedField { table: &'static str, field: String },

    /// A cell could not be coerced to the canonical type of its field.
    #[error("{table}: invalid value {value} for field \"{field}\"")]
    InvalidCell {
        table: &'static str,
        field: String,
        value: String,
    },

    /// A date string in none of the accepted formats.
    #[error("invalid date \"{0}\"")]
    InvalidDate(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error(transparent)]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),
}

impl EtlError {
    /// Input-validation failures: the stage aborts, and the orchestrator may retry it later.
    pub fn is_input_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput(_)
                | Self::EmptyDimension(_)
                | Self::MissingField { .. }
                | Self::UnexpectedField { .. }
                | Self::InvalidCell { .. }
                | Self::InvalidDate(_)
        )
    }
}
