use crate::error::{EtlError, Result};
use crate::key_tracker::KeyTracker;
use crate::warehouse::Warehouse;
use std::collections::HashMap;
use tracing::{debug, error};

/// Natural key → surrogate key, as read from a dimension table.
pub type KeyMap = HashMap<String, i32>;

/// `StockSymbol` → `StockKey` over the whole of `Dim_Company`.
///
/// An empty `Dim_Company` is [`EtlError::EmptyDimension`]: dimensions are loaded before facts,
/// so this is a configuration problem rather than something to retry.
pub async fn resolve_stock_keys(warehouse: &Warehouse) -> Result<KeyMap> {
    let registry = warehouse.stock_key_registry().await?;
    into_key_map("Dim_Company", registry)
}

/// `RatioName` → `RatioKey` over the whole of `Dim_Ratio`; empty is an error, as above.
pub async fn resolve_ratio_keys(warehouse: &Warehouse) -> Result<KeyMap> {
    let registry = warehouse.ratio_key_registry().await?;
    into_key_map("Dim_Ratio", registry)
}

fn into_key_map(table: &'static str, registry: KeyTracker<i32, String>) -> Result<KeyMap> {
    if registry.is_empty() {
        error!("{table} is empty; load dimensions before facts");
        return Err(EtlError::EmptyDimension(table));
    }

    let map: KeyMap = registry
        .bimap
        .into_iter()
        .map(|(key, name)| (name, key))
        .collect();
    debug!("{} keys resolved from {table}", map.len());
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimap::BiMap;

    #[test]
    fn empty_dimension_is_an_error() {
        let registry = KeyTracker::from(BiMap::new());
        let err = into_key_map("Dim_Company", registry).unwrap_err();
        assert!(matches!(err, EtlError::EmptyDimension("Dim_Company")));
        assert!(err.is_input_validation());
    }

    #[test]
    fn registry_flips_into_lookup() {
        let bimap: BiMap<i32, String> = [(1, "ROE".to_string()), (2, "P/E".to_string())]
            .into_iter()
            .collect();
        let map = into_key_map("Dim_Ratio", KeyTracker::from(bimap)).unwrap();
        assert_eq!(map.get("P/E"), Some(&2));
        assert_eq!(map.len(), 2);
    }
}
