//! The money path: units, recommendations, applied adjustments and price history.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{ExpectedVersion, Money, RecommendationId, SiteId, TenantId, UnitId};
use boxprice_pricing::{
    AdjustmentPlan, PriceAdjustment, PriceHistoryEntry, PriceRecommendation, RecommendationStatus,
    UnitRecord,
};

use crate::error::StoreError;

/// Filter for the adjustment audit query. Every bound is optional and inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentQuery {
    #[serde(default)]
    pub site_id: Option<SiteId>,
    #[serde(default)]
    pub unit_id: Option<UnitId>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AdjustmentQuery {
    pub fn for_unit(unit_id: UnitId) -> Self {
        Self {
            unit_id: Some(unit_id),
            ..Self::default()
        }
    }

    pub fn for_site(site_id: SiteId) -> Self {
        Self {
            site_id: Some(site_id),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn matches(&self, adjustment: &PriceAdjustment) -> bool {
        self.site_id.is_none_or(|s| s == adjustment.site_id)
            && self.unit_id.is_none_or(|u| u == adjustment.unit_id)
            && self.from.is_none_or(|from| adjustment.created_at >= from)
            && self.to.is_none_or(|to| adjustment.created_at <= to)
    }
}

/// Transactional store behind every price write.
///
/// `commit` is the only way a unit's price changes: unit, recommendation, adjustment and
/// history entry are written together or not at all, guarded by a compare-and-set on the
/// unit version.
#[async_trait]
pub trait PriceLedger: Send + Sync {
    /// Platform sync. Engine-owned pricing fields of an existing unit are preserved and the
    /// version is bumped so in-flight recommendations go stale.
    async fn upsert_unit(&self, unit: UnitRecord) -> Result<UnitRecord, StoreError>;

    async fn unit(&self, tenant_id: TenantId, unit_id: UnitId) -> Result<Option<UnitRecord>, StoreError>;

    async fn units_for_site(&self, tenant_id: TenantId, site_id: SiteId) -> Result<Vec<UnitRecord>, StoreError>;

    /// Every (tenant, site) pair with at least one unit. Used by the scheduler only.
    async fn site_directory(&self) -> Result<Vec<(TenantId, SiteId)>, StoreError>;

    /// Contract creation: reads the current price and reserves the unit in one step.
    async fn lock_unit_for_contract(&self, tenant_id: TenantId, unit_id: UnitId) -> Result<Money, StoreError>;

    /// Store a new pending recommendation. Older pending recommendations of the same unit
    /// are expired and returned.
    async fn save_recommendation(
        &self,
        rec: PriceRecommendation,
    ) -> Result<Vec<PriceRecommendation>, StoreError>;

    async fn recommendation(
        &self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> Result<Option<PriceRecommendation>, StoreError>;

    /// Most recent recommendation of a unit, any status.
    async fn latest_recommendation(
        &self,
        tenant_id: TenantId,
        unit_id: UnitId,
    ) -> Result<Option<PriceRecommendation>, StoreError>;

    /// Pending recommendations of a tenant (review queue), newest first.
    async fn pending_recommendations(
        &self,
        tenant_id: TenantId,
        site_id: Option<SiteId>,
    ) -> Result<Vec<PriceRecommendation>, StoreError>;

    /// Persist a rejection or expiry. The stored copy must still be pending.
    async fn resolve_recommendation(&self, rec: &PriceRecommendation) -> Result<(), StoreError>;

    async fn commit(&self, plan: &AdjustmentPlan) -> Result<(), StoreError>;

    /// Applied adjustments matching `query`, newest first.
    async fn adjustments(
        &self,
        tenant_id: TenantId,
        query: &AdjustmentQuery,
    ) -> Result<Vec<PriceAdjustment>, StoreError>;

    async fn price_history(
        &self,
        tenant_id: TenantId,
        unit_id: UnitId,
    ) -> Result<Vec<PriceHistoryEntry>, StoreError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    units: HashMap<(TenantId, UnitId), UnitRecord>,
    recommendations: HashMap<(TenantId, RecommendationId), PriceRecommendation>,
    adjustments: Vec<PriceAdjustment>,
    history: Vec<PriceHistoryEntry>,
}

/// In-memory ledger. One mutex over all tables makes `commit` trivially atomic.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPriceLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryPriceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Storage("ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl PriceLedger for InMemoryPriceLedger {
    async fn upsert_unit(&self, mut unit: UnitRecord) -> Result<UnitRecord, StoreError> {
        let mut state = self.lock()?;
        let key = (unit.tenant_id, unit.id);
        match state.units.get(&key) {
            Some(existing) => {
                unit.current_price = existing.current_price;
                unit.anchor_price = existing.anchor_price;
                unit.price_changed_at = existing.price_changed_at;
                unit.last_auto_adjusted_at = existing.last_auto_adjusted_at;
                unit.version = existing.version + 1;
            }
            None => unit.version = 0,
        }
        state.units.insert(key, unit.clone());
        Ok(unit)
    }

    async fn unit(&self, tenant_id: TenantId, unit_id: UnitId) -> Result<Option<UnitRecord>, StoreError> {
        Ok(self.lock()?.units.get(&(tenant_id, unit_id)).cloned())
    }

    async fn units_for_site(&self, tenant_id: TenantId, site_id: SiteId) -> Result<Vec<UnitRecord>, StoreError> {
        let state = self.lock()?;
        let mut units: Vec<UnitRecord> = state
            .units
            .values()
            .filter(|u| u.tenant_id == tenant_id && u.site_id == site_id)
            .cloned()
            .collect();
        units.sort_by_key(|u| u.id);
        Ok(units)
    }

    async fn site_directory(&self) -> Result<Vec<(TenantId, SiteId)>, StoreError> {
        let state = self.lock()?;
        let sites: BTreeSet<(TenantId, SiteId)> = state.units.values().map(|u| (u.tenant_id, u.site_id)).collect();
        Ok(sites.into_iter().collect())
    }

    async fn lock_unit_for_contract(&self, tenant_id: TenantId, unit_id: UnitId) -> Result<Money, StoreError> {
        let mut state = self.lock()?;
        let unit = state
            .units
            .get_mut(&(tenant_id, unit_id))
            .ok_or_else(|| StoreError::NotFound(format!("unit {unit_id}")))?;
        Ok(unit.lock_for_contract())
    }

    async fn save_recommendation(
        &self,
        rec: PriceRecommendation,
    ) -> Result<Vec<PriceRecommendation>, StoreError> {
        if !rec.is_pending() {
            return Err(StoreError::Conflict(format!(
                "recommendation {} is {}, only pending recommendations are saved",
                rec.id,
                rec.status.as_str()
            )));
        }
        let mut state = self.lock()?;
        let key = (rec.tenant_id, rec.id);
        if state.recommendations.contains_key(&key) {
            return Err(StoreError::Conflict(format!("recommendation {} already exists", rec.id)));
        }

        let mut superseded = Vec::new();
        for stored in state.recommendations.values_mut() {
            if stored.tenant_id == rec.tenant_id && stored.unit_id == rec.unit_id && stored.is_pending() {
                stored
                    .mark_expired("superseded by a newer recommendation", rec.created_at)
                    .map_err(|e| StoreError::Conflict(e.to_string()))?;
                superseded.push(stored.clone());
            }
        }
        state.recommendations.insert(key, rec);
        Ok(superseded)
    }

    async fn recommendation(
        &self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> Result<Option<PriceRecommendation>, StoreError> {
        Ok(self.lock()?.recommendations.get(&(tenant_id, id)).cloned())
    }

    async fn latest_recommendation(
        &self,
        tenant_id: TenantId,
        unit_id: UnitId,
    ) -> Result<Option<PriceRecommendation>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .recommendations
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.unit_id == unit_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn pending_recommendations(
        &self,
        tenant_id: TenantId,
        site_id: Option<SiteId>,
    ) -> Result<Vec<PriceRecommendation>, StoreError> {
        let state = self.lock()?;
        let mut recs: Vec<PriceRecommendation> = state
            .recommendations
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.is_pending())
            .filter(|r| site_id.is_none_or(|s| s == r.site_id))
            .cloned()
            .collect();
        recs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(recs)
    }

    async fn resolve_recommendation(&self, rec: &PriceRecommendation) -> Result<(), StoreError> {
        if rec.is_pending() {
            return Err(StoreError::Conflict(format!("recommendation {} is still pending", rec.id)));
        }
        let mut state = self.lock()?;
        let stored = state
            .recommendations
            .get_mut(&(rec.tenant_id, rec.id))
            .ok_or_else(|| StoreError::NotFound(format!("recommendation {}", rec.id)))?;
        if !stored.is_pending() {
            return Err(StoreError::Conflict(format!(
                "recommendation {} is already {}",
                rec.id,
                stored.status.as_str()
            )));
        }
        *stored = rec.clone();
        Ok(())
    }

    async fn commit(&self, plan: &AdjustmentPlan) -> Result<(), StoreError> {
        let tenant_id = plan.unit.tenant_id;
        if plan.adjustment.tenant_id != tenant_id || plan.history.tenant_id != tenant_id {
            return Err(StoreError::TenantIsolation(
                "adjustment plan spans multiple tenants".to_string(),
            ));
        }

        let mut state = self.lock()?;

        // All checks first; nothing is written unless every check passes.
        let current = state
            .units
            .get(&(tenant_id, plan.unit.id))
            .ok_or_else(|| StoreError::NotFound(format!("unit {}", plan.unit.id)))?;
        if !ExpectedVersion::Exact(plan.expected_unit_version).matches(current.version) {
            return Err(StoreError::VersionConflict {
                expected: plan.expected_unit_version,
                actual: current.version,
            });
        }
        if let Some(rec) = &plan.recommendation {
            if rec.tenant_id != tenant_id {
                return Err(StoreError::TenantIsolation(
                    "recommendation belongs to another tenant".to_string(),
                ));
            }
            let stored = state
                .recommendations
                .get(&(tenant_id, rec.id))
                .ok_or_else(|| StoreError::NotFound(format!("recommendation {}", rec.id)))?;
            if stored.status != RecommendationStatus::Pending {
                return Err(StoreError::Conflict(format!(
                    "recommendation {} is already {}",
                    rec.id,
                    stored.status.as_str()
                )));
            }
        }

        state.units.insert((tenant_id, plan.unit.id), plan.unit.clone());
        if let Some(rec) = &plan.recommendation {
            state.recommendations.insert((tenant_id, rec.id), rec.clone());
        }
        state.adjustments.push(plan.adjustment.clone());
        state.history.push(plan.history.clone());
        Ok(())
    }

    async fn adjustments(
        &self,
        tenant_id: TenantId,
        query: &AdjustmentQuery,
    ) -> Result<Vec<PriceAdjustment>, StoreError> {
        let state = self.lock()?;
        let matching = state
            .adjustments
            .iter()
            .rev()
            .filter(|a| a.tenant_id == tenant_id && query.matches(a))
            .cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn price_history(
        &self,
        tenant_id: TenantId,
        unit_id: UnitId,
    ) -> Result<Vec<PriceHistoryEntry>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .history
            .iter()
            .filter(|h| h.tenant_id == tenant_id && h.unit_id == unit_id)
            .cloned()
            .collect())
    }
}
