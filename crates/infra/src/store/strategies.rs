use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use boxprice_core::{SiteId, StrategyId, TenantId};
use boxprice_pricing::{PricingStrategy, StrategyConfig, StrategyDefaults, StrategyRevision};

use crate::error::{EngineError, EngineResult, StoreError};

/// Versioned strategies per tenant. Every version ever referenced is retained.
#[derive(Debug, Default)]
pub struct StrategyStore {
    /// Versions in ascending order.
    inner: RwLock<HashMap<(TenantId, StrategyId), Vec<PricingStrategy>>>,
}

impl StrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<(TenantId, StrategyId), Vec<PricingStrategy>>>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Storage("strategy store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<(TenantId, StrategyId), Vec<PricingStrategy>>>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Storage("strategy store lock poisoned".to_string()))
    }

    pub fn create(
        &self,
        tenant_id: TenantId,
        config: &StrategyConfig,
        defaults: StrategyDefaults,
        now: DateTime<Utc>,
    ) -> EngineResult<PricingStrategy> {
        let strategy = PricingStrategy::from_config(StrategyId::new(), tenant_id, config, defaults, now)?;
        self.write()?
            .insert((tenant_id, strategy.strategy_id()), vec![strategy.clone()]);
        Ok(strategy)
    }

    /// Edit the latest version; a referenced version is kept and a successor is appended.
    pub fn revise(
        &self,
        tenant_id: TenantId,
        strategy_id: StrategyId,
        config: &StrategyConfig,
        defaults: StrategyDefaults,
        now: DateTime<Utc>,
    ) -> EngineResult<StrategyRevision> {
        let mut map = self.write()?;
        let versions = map
            .get_mut(&(tenant_id, strategy_id))
            .ok_or_else(|| EngineError::not_found(format!("strategy {strategy_id}")))?;
        let revision = versions
            .last()
            .ok_or_else(|| EngineError::not_found(format!("strategy {strategy_id}")))?
            .revise(config, defaults, now)?;

        match &revision {
            StrategyRevision::InPlace(s) => {
                versions.pop();
                versions.push(s.clone());
            }
            StrategyRevision::NewVersion(s) => versions.push(s.clone()),
        }
        Ok(revision)
    }

    pub fn deactivate(&self, tenant_id: TenantId, strategy_id: StrategyId) -> EngineResult<PricingStrategy> {
        let mut map = self.write()?;
        let latest = map
            .get_mut(&(tenant_id, strategy_id))
            .and_then(|versions| versions.last_mut())
            .ok_or_else(|| EngineError::not_found(format!("strategy {strategy_id}")))?;
        latest.deactivate();
        Ok(latest.clone())
    }

    pub fn get(
        &self,
        tenant_id: TenantId,
        strategy_id: StrategyId,
        version: u32,
    ) -> Result<Option<PricingStrategy>, StoreError> {
        Ok(self.read()?.get(&(tenant_id, strategy_id)).and_then(|versions| {
            versions
                .iter()
                .find(|s| s.strategy_version() == version)
                .cloned()
        }))
    }

    pub fn latest(&self, tenant_id: TenantId, strategy_id: StrategyId) -> Result<Option<PricingStrategy>, StoreError> {
        Ok(self
            .read()?
            .get(&(tenant_id, strategy_id))
            .and_then(|versions| versions.last().cloned()))
    }

    /// Latest version of every strategy of a tenant, oldest first.
    pub fn list(&self, tenant_id: TenantId) -> Result<Vec<PricingStrategy>, StoreError> {
        let mut strategies: Vec<PricingStrategy> = self
            .read()?
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .filter_map(|(_, versions)| versions.last().cloned())
            .collect();
        strategies.sort_by_key(|s| (s.created_at(), s.strategy_id()));
        Ok(strategies)
    }

    /// Strategy governing a site: an active site-specific strategy wins over a tenant-wide
    /// one; among equals, the most recently created.
    pub fn current_for_site(&self, tenant_id: TenantId, site_id: SiteId) -> Result<Option<PricingStrategy>, StoreError> {
        Ok(self
            .list(tenant_id)?
            .into_iter()
            .filter(|s| s.is_active() && s.applies_to_site(site_id))
            .max_by_key(|s| (s.site_id().is_some(), s.created_at(), s.strategy_id())))
    }

    /// Freeze a version once an applied adjustment points at it.
    pub fn mark_referenced(&self, tenant_id: TenantId, strategy_id: StrategyId, version: u32) -> Result<(), StoreError> {
        let mut map = self.write()?;
        let strategy = map
            .get_mut(&(tenant_id, strategy_id))
            .and_then(|versions| versions.iter_mut().find(|s| s.strategy_version() == version))
            .ok_or_else(|| StoreError::NotFound(format!("strategy {strategy_id} v{version}")))?;
        strategy.mark_referenced();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, site_id: Option<SiteId>) -> StrategyConfig {
        StrategyConfig {
            name: name.into(),
            site_id,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn referenced_versions_survive_edits() {
        let store = StrategyStore::new();
        let tenant = TenantId::new();
        let now = Utc::now();
        let v1 = store
            .create(tenant, &config("rules", None), StrategyDefaults::default(), now)
            .unwrap();

        let edited = StrategyConfig {
            price_increase_step: Some(0.08),
            ..config("rules", None)
        };
        let revision = store
            .revise(tenant, v1.strategy_id(), &edited, StrategyDefaults::default(), now)
            .unwrap();
        assert!(matches!(revision, StrategyRevision::InPlace(_)));

        store.mark_referenced(tenant, v1.strategy_id(), 1).unwrap();
        let revision = store
            .revise(tenant, v1.strategy_id(), &config("rules", None), StrategyDefaults::default(), now)
            .unwrap();
        assert_eq!(revision.strategy().strategy_version(), 2);

        let old = store.get(tenant, v1.strategy_id(), 1).unwrap().unwrap();
        assert_eq!(old.price_increase_step(), 0.08);
        let latest = store.latest(tenant, v1.strategy_id()).unwrap().unwrap();
        assert_eq!(latest.strategy_version(), 2);
        assert_eq!(store.list(tenant).unwrap().len(), 1);
    }

    #[test]
    fn site_specific_strategy_wins() {
        let store = StrategyStore::new();
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();
        store
            .create(tenant, &config("tenant-wide", None), StrategyDefaults::default(), now)
            .unwrap();
        let specific = store
            .create(tenant, &config("site", Some(site)), StrategyDefaults::default(), now)
            .unwrap();

        let current = store.current_for_site(tenant, site).unwrap().unwrap();
        assert_eq!(current.strategy_id(), specific.strategy_id());

        let elsewhere = store.current_for_site(tenant, SiteId::new()).unwrap().unwrap();
        assert_eq!(elsewhere.name(), "tenant-wide");

        store.deactivate(tenant, specific.strategy_id()).unwrap();
        let current = store.current_for_site(tenant, site).unwrap().unwrap();
        assert_eq!(current.name(), "tenant-wide");

        assert!(store.current_for_site(TenantId::new(), site).unwrap().is_none());
    }
}
