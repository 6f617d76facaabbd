use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use boxprice_core::{AlertId, DomainResult, SiteId, TenantId};
use boxprice_pricing::{NewAlert, PricingAlert};

use crate::error::{EngineError, EngineResult, StoreError};

/// Alerts per tenant, with deduplication on raise.
#[derive(Debug, Default)]
pub struct AlertStore {
    inner: RwLock<HashMap<TenantId, Vec<PricingAlert>>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<TenantId, Vec<PricingAlert>>>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Storage("alert store lock poisoned".to_string()))
    }

    /// Store the alert unless an unresolved one with the same kind/site/unit exists.
    ///
    /// The check and the insert happen under one lock, so concurrent raisers cannot
    /// both win.
    pub fn raise_if_new(
        &self,
        tenant_id: TenantId,
        alert: NewAlert,
        now: DateTime<Utc>,
    ) -> Result<Option<PricingAlert>, StoreError> {
        let mut map = self.write()?;
        let alerts = map.entry(tenant_id).or_default();
        let key = alert.dedup_key();
        if alerts.iter().any(|a| a.is_unresolved() && a.dedup_key() == key) {
            return Ok(None);
        }
        let stored = PricingAlert::raise(AlertId::new(), tenant_id, alert, now);
        alerts.push(stored.clone());
        Ok(Some(stored))
    }

    pub fn get(&self, tenant_id: TenantId, id: AlertId) -> Result<Option<PricingAlert>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Storage("alert store lock poisoned".to_string()))?;
        Ok(map
            .get(&tenant_id)
            .and_then(|alerts| alerts.iter().find(|a| a.id == id).cloned()))
    }

    /// Apply a lifecycle transition in place.
    pub fn update(
        &self,
        tenant_id: TenantId,
        id: AlertId,
        transition: impl FnOnce(&mut PricingAlert) -> DomainResult<()>,
    ) -> EngineResult<PricingAlert> {
        let mut map = self.write()?;
        let alert = map
            .get_mut(&tenant_id)
            .and_then(|alerts| alerts.iter_mut().find(|a| a.id == id))
            .ok_or_else(|| EngineError::not_found(format!("alert {id}")))?;
        transition(alert)?;
        Ok(alert.clone())
    }

    /// Unresolved alerts, newest first, optionally limited to one site.
    pub fn list_open(&self, tenant_id: TenantId, site_id: Option<SiteId>) -> Result<Vec<PricingAlert>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Storage("alert store lock poisoned".to_string()))?;
        let mut open: Vec<PricingAlert> = map
            .get(&tenant_id)
            .map(|alerts| {
                alerts
                    .iter()
                    .filter(|a| a.is_unresolved())
                    .filter(|a| site_id.is_none() || a.site_id == site_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use boxprice_core::{Money, UserId};
    use boxprice_pricing::{AlertKind, AlertRules};

    use super::*;

    #[test]
    fn unresolved_alert_blocks_duplicates_until_resolved() {
        let store = AlertStore::new();
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();
        let rules = AlertRules::default();

        let first = store
            .raise_if_new(tenant, rules.high_vacancy(site, 0.4, 20).unwrap(), now)
            .unwrap()
            .unwrap();
        assert_eq!(first.kind, AlertKind::HighVacancy);
        assert!(store
            .raise_if_new(tenant, rules.high_vacancy(site, 0.45, 20).unwrap(), now)
            .unwrap()
            .is_none());

        // Another site is another key.
        assert!(store
            .raise_if_new(tenant, rules.high_vacancy(SiteId::new(), 0.4, 20).unwrap(), now)
            .unwrap()
            .is_some());

        store
            .update(tenant, first.id, |a| a.resolve(UserId::new(), now))
            .unwrap();
        assert!(store
            .raise_if_new(tenant, rules.high_vacancy(site, 0.4, 20).unwrap(), now)
            .unwrap()
            .is_some());
    }

    #[test]
    fn list_open_is_tenant_and_site_scoped() {
        let store = AlertStore::new();
        let (tenant, other) = (TenantId::new(), TenantId::new());
        let site = SiteId::new();
        let now = Utc::now();
        let rules = AlertRules::default();
        let drop_alert = rules
            .competitor_change(site, "small", Money::from_major(100.0), Money::from_major(130.0))
            .unwrap();

        store.raise_if_new(tenant, drop_alert.clone(), now).unwrap();
        store.raise_if_new(other, drop_alert, now).unwrap();

        assert_eq!(store.list_open(tenant, Some(site)).unwrap().len(), 1);
        assert!(store.list_open(tenant, Some(SiteId::new())).unwrap().is_empty());

        let id = store.list_open(tenant, None).unwrap()[0].id;
        assert!(store.get(other, id).unwrap().is_none());
        assert!(matches!(
            store.update(other, id, |a| a.mark_read(now)),
            Err(EngineError::Store(StoreError::NotFound(_)))
        ));
    }
}
