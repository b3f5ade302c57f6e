use crate::domain::asset::{AssetBalance, UniverseRoot};
use crate::domain::ports::AssetClientRef;
use crate::error::{HubError, Result};
use std::collections::{BTreeMap, HashSet};

/// Read-only views over the asset network's balances and catalog.
pub struct Reporter {
    assets: AssetClientRef,
}

impl Reporter {
    pub fn new(assets: AssetClientRef) -> Self {
        Self { assets }
    }

    /// Sums balances per asset id. An empty result means the node holds nothing.
    ///
    /// Grouping is by id so two assets sharing a display name stay apart.
    pub async fn aggregate_balances(&self) -> Result<Vec<AssetBalance>> {
        let balances = self
            .assets
            .list_balances()
            .await
            .map_err(|e| HubError::Network(e.to_string()))?;

        let mut by_id: BTreeMap<String, AssetBalance> = BTreeMap::new();
        for balance in balances {
            by_id
                .entry(balance.asset_id.clone())
                .and_modify(|agg| agg.amount = agg.amount.saturating_add(balance.amount))
                .or_insert(balance);
        }
        Ok(by_id.into_values().collect())
    }

    /// Known assets, one row per id; issuance and transfer roots collapse into one.
    pub async fn list_catalog_assets(&self) -> Result<Vec<UniverseRoot>> {
        let roots = self
            .assets
            .list_universe_roots()
            .await
            .map_err(|e| HubError::Network(e.to_string()))?;

        let mut seen = HashSet::new();
        Ok(roots
            .into_iter()
            .filter(|root| seen.insert(root.asset_id.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulated::SimulatedAssetNetwork;
    use std::sync::Arc;

    fn balance(id: &str, name: &str, amount: u64) -> AssetBalance {
        AssetBalance {
            asset_id: id.into(),
            asset_name: name.into(),
            amount,
        }
    }

    #[tokio::test]
    async fn test_same_name_different_ids_stay_apart() {
        let assets = SimulatedAssetNetwork::new();
        assets
            .set_balances(vec![
                balance("aa", "usd", 5),
                balance("bb", "usd", 7),
                balance("aa", "usd", 1),
            ])
            .await;
        let reporter = Reporter::new(Arc::new(assets));

        let report = reporter.aggregate_balances().await.unwrap();
        assert_eq!(report, vec![balance("aa", "usd", 6), balance("bb", "usd", 7)]);
    }

    #[tokio::test]
    async fn test_catalog_dedupes_roots() {
        let assets = SimulatedAssetNetwork::new();
        let root = |id: &str, name: &str| UniverseRoot {
            asset_id: id.into(),
            asset_name: name.into(),
        };
        assets
            .set_universe_roots(vec![root("aa", "gold"), root("bb", "silver"), root("aa", "gold")])
            .await;
        let reporter = Reporter::new(Arc::new(assets));

        let catalog = reporter.list_catalog_assets().await.unwrap();
        assert_eq!(catalog, vec![root("aa", "gold"), root("bb", "silver")]);
    }
}
