//! Pricing cycle: evaluate every available unit of a tenant's sites and save (or apply) the
//! resulting recommendations.
//!
//! Sites run in parallel up to `max_parallel_sites`; units within a site run in order. A unit
//! failure never aborts its site and a site failure never aborts the cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use boxprice_core::{AdjustmentId, Money, RecommendationId, SiteId, TenantId, UnitId};
use boxprice_forecast::Forecast;
use boxprice_pricing::{
    ApplyMode, MarketSnapshot, OccupancyCounts, PriceRecommendation, PricingError, PricingEvent, PricingStrategy,
    StrategyEvaluator, UnitRecord, UnitStatus,
};

use crate::collector::MarketDataCollector;
use crate::config::EngineConfig;
use crate::engine::ForecastReader;
use crate::error::{EngineError, StoreError};
use crate::events::EventPublisher;
use crate::executor::PriceAdjustmentExecutor;
use crate::store::{PriceLedger, StrategyStore};

/// Cooperative cancellation, checked between units.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Evaluation kept the current price.
    Unchanged { unit_id: UnitId },
    /// Saved as pending for review (or left pending by the rate limit).
    Recommended {
        unit_id: UnitId,
        recommendation_id: RecommendationId,
        price: Money,
    },
    Applied {
        unit_id: UnitId,
        adjustment_id: AdjustmentId,
        price: Money,
    },
    /// Unit data or strategy cannot be priced.
    Skipped { unit_id: UnitId, reason: String },
    /// Auto-apply refused the recommendation.
    Rejected {
        unit_id: UnitId,
        recommendation_id: RecommendationId,
        reason: String,
    },
    /// The unit kept moving under the cycle.
    Stale { unit_id: UnitId },
    Failed { unit_id: UnitId, error: String },
}

impl UnitOutcome {
    pub fn unit_id(&self) -> UnitId {
        match self {
            UnitOutcome::Unchanged { unit_id }
            | UnitOutcome::Recommended { unit_id, .. }
            | UnitOutcome::Applied { unit_id, .. }
            | UnitOutcome::Skipped { unit_id, .. }
            | UnitOutcome::Rejected { unit_id, .. }
            | UnitOutcome::Stale { unit_id }
            | UnitOutcome::Failed { unit_id, .. } => *unit_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteOutcome {
    pub site_id: SiteId,
    pub units: Vec<UnitOutcome>,
    pub cancelled: bool,
    /// Set when the site could not be evaluated at all.
    pub error: Option<String>,
}

impl SiteOutcome {
    fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            units: Vec::new(),
            cancelled: false,
            error: None,
        }
    }

    fn failed(site_id: SiteId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(site_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub tenant_id: TenantId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub sites: Vec<SiteOutcome>,
}

impl CycleReport {
    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.sites.iter().flat_map(|s| s.units.iter()).filter(|u| pred(u)).count()
    }

    pub fn evaluated(&self) -> usize {
        self.count(|_| true)
    }

    pub fn unchanged(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::Unchanged { .. }))
    }

    pub fn recommended(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::Recommended { .. }))
    }

    pub fn applied(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::Applied { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::Skipped { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::Rejected { .. }))
    }

    pub fn stale(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::Stale { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::Failed { .. }))
    }

    pub fn failed_sites(&self) -> usize {
        self.sites.iter().filter(|s| s.error.is_some()).count()
    }

    pub fn site(&self, site_id: SiteId) -> Option<&SiteOutcome> {
        self.sites.iter().find(|s| s.site_id == site_id)
    }
}

#[derive(Clone)]
pub struct BatchRunner {
    ledger: Arc<dyn PriceLedger>,
    strategies: Arc<StrategyStore>,
    collector: Arc<MarketDataCollector>,
    forecasts: Arc<ForecastReader>,
    executor: Arc<PriceAdjustmentExecutor>,
    publisher: EventPublisher,
    evaluator: StrategyEvaluator,
    max_parallel_sites: usize,
    auto_apply: bool,
}

impl BatchRunner {
    pub fn new(
        ledger: Arc<dyn PriceLedger>,
        strategies: Arc<StrategyStore>,
        collector: Arc<MarketDataCollector>,
        forecasts: Arc<ForecastReader>,
        executor: Arc<PriceAdjustmentExecutor>,
        publisher: EventPublisher,
        config: &EngineConfig,
    ) -> Self {
        Self {
            ledger,
            strategies,
            collector,
            forecasts,
            executor,
            publisher,
            evaluator: StrategyEvaluator::new(config.cycle()),
            max_parallel_sites: config.max_parallel_sites.max(1),
            auto_apply: config.auto_apply,
        }
    }

    /// Apply changed recommendations immediately instead of leaving them for review.
    pub fn with_auto_apply(mut self, auto_apply: bool) -> Self {
        self.auto_apply = auto_apply;
        self
    }

    pub fn auto_apply(&self) -> bool {
        self.auto_apply
    }

    #[instrument(skip(self, tenant_id, site_ids, cancel, now), fields(tenant = %tenant_id, sites = site_ids.len()))]
    pub async fn run_cycle(
        &self,
        tenant_id: TenantId,
        site_ids: &[SiteId],
        cancel: &CancellationFlag,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let permits = Arc::new(Semaphore::new(self.max_parallel_sites));
        let mut handles = Vec::with_capacity(site_ids.len());

        for &site_id in site_ids {
            let runner = self.clone();
            let cancel = cancel.clone();
            let permits = permits.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return SiteOutcome::failed(site_id, "site worker pool closed");
                };
                runner.run_site(tenant_id, site_id, &cancel, now).await
            });
            handles.push((site_id, handle));
        }

        let mut sites = Vec::with_capacity(handles.len());
        for (site_id, handle) in handles {
            match handle.await {
                Ok(outcome) => sites.push(outcome),
                Err(e) => {
                    error!(site = %site_id, error = %e, "site evaluation task failed");
                    sites.push(SiteOutcome::failed(site_id, e.to_string()));
                }
            }
        }

        let report = CycleReport {
            tenant_id,
            started_at: now,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled(),
            sites,
        };
        info!(
            evaluated = report.evaluated(),
            recommended = report.recommended(),
            applied = report.applied(),
            skipped = report.skipped(),
            rejected = report.rejected(),
            stale = report.stale(),
            failed = report.failed(),
            failed_sites = report.failed_sites(),
            cancelled = report.cancelled,
            "pricing cycle finished"
        );
        report
    }

    async fn run_site(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        cancel: &CancellationFlag,
        now: DateTime<Utc>,
    ) -> SiteOutcome {
        if cancel.is_cancelled() {
            return SiteOutcome {
                cancelled: true,
                ..SiteOutcome::new(site_id)
            };
        }

        let strategy = match self.strategies.current_for_site(tenant_id, site_id) {
            Ok(Some(strategy)) => strategy,
            Ok(None) => {
                warn!(tenant = %tenant_id, site = %site_id, "no active strategy governs site");
                return SiteOutcome::failed(site_id, "no active strategy governs this site");
            }
            Err(e) => return SiteOutcome::failed(site_id, e.to_string()),
        };
        let units = match self.ledger.units_for_site(tenant_id, site_id).await {
            Ok(units) => units,
            Err(e) => {
                error!(tenant = %tenant_id, site = %site_id, error = %e, "failed to load site units");
                return SiteOutcome::failed(site_id, e.to_string());
            }
        };

        let mut outcome = SiteOutcome::new(site_id);
        let mut snapshots: HashMap<String, MarketSnapshot> = HashMap::new();

        for unit in units.iter().filter(|u| u.status == UnitStatus::Available) {
            if cancel.is_cancelled() {
                info!(tenant = %tenant_id, site = %site_id, done = outcome.units.len(), "cycle cancelled mid-site");
                outcome.cancelled = true;
                break;
            }

            let snapshot = match snapshots.get(&unit.category) {
                Some(snapshot) => snapshot.clone(),
                None => match self.collector.collect(tenant_id, site_id, &unit.category, now).await {
                    Ok(snapshot) => {
                        snapshots.insert(unit.category.clone(), snapshot.clone());
                        snapshot
                    }
                    Err(e) => {
                        warn!(unit = %unit.id, category = %unit.category, error = %e, "market snapshot failed");
                        outcome.units.push(UnitOutcome::Failed {
                            unit_id: unit.id,
                            error: e.to_string(),
                        });
                        continue;
                    }
                },
            };

            let result = self.price_unit(tenant_id, &strategy, unit.clone(), snapshot, now).await;
            outcome.units.push(result);
        }
        outcome
    }

    async fn price_unit(
        &self,
        tenant_id: TenantId,
        strategy: &PricingStrategy,
        mut unit: UnitRecord,
        mut snapshot: MarketSnapshot,
        now: DateTime<Utc>,
    ) -> UnitOutcome {
        let unit_id = unit.id;
        let mut retried = false;

        loop {
            let forecast = self.forecast(tenant_id, &unit, now);
            let rec = match self.evaluator.evaluate(strategy, &unit, &snapshot, forecast.as_ref(), now) {
                Ok(rec) => rec,
                Err(PricingError::Configuration(reason)) => {
                    warn!(unit = %unit_id, reason = %reason, "unit skipped");
                    return UnitOutcome::Skipped { unit_id, reason };
                }
                Err(e) => {
                    warn!(unit = %unit_id, error = %e, "unit evaluation failed");
                    return UnitOutcome::Failed {
                        unit_id,
                        error: e.to_string(),
                    };
                }
            };

            if !rec.changes_price() {
                debug!(unit = %unit_id, price = %rec.recommended_price, "price unchanged");
                return UnitOutcome::Unchanged { unit_id };
            }

            let recommendation_id = rec.id;
            let price = rec.recommended_price;
            if let Err(e) = self.save(tenant_id, rec, now).await {
                error!(unit = %unit_id, error = %e, "failed to save recommendation");
                return UnitOutcome::Failed {
                    unit_id,
                    error: e.to_string(),
                };
            }
            if !self.auto_apply {
                return UnitOutcome::Recommended {
                    unit_id,
                    recommendation_id,
                    price,
                };
            }

            match self
                .executor
                .apply(tenant_id, recommendation_id, ApplyMode::Auto, now)
                .await
            {
                Ok(applied) => {
                    return UnitOutcome::Applied {
                        unit_id,
                        adjustment_id: applied.adjustment.id,
                        price: applied.adjustment.new_price,
                    };
                }
                Err(EngineError::Pricing(PricingError::ConcurrentModification { .. })) if !retried => {
                    retried = true;
                    match self.refresh(tenant_id, &unit, &snapshot, now).await {
                        Ok(Some((fresh_unit, fresh_snapshot))) => {
                            debug!(unit = %unit_id, version = fresh_unit.version, "unit moved, re-evaluating once");
                            unit = fresh_unit;
                            snapshot = fresh_snapshot;
                        }
                        Ok(None) => return UnitOutcome::Stale { unit_id },
                        Err(e) => {
                            return UnitOutcome::Failed {
                                unit_id,
                                error: e.to_string(),
                            };
                        }
                    }
                }
                Err(EngineError::Pricing(
                    PricingError::ConcurrentModification { .. } | PricingError::RecommendationExpired,
                )) => return UnitOutcome::Stale { unit_id },
                Err(EngineError::Pricing(PricingError::RateLimited(_))) => {
                    debug!(unit = %unit_id, "auto-apply rate limited, recommendation left pending");
                    return UnitOutcome::Recommended {
                        unit_id,
                        recommendation_id,
                        price,
                    };
                }
                Err(EngineError::Pricing(
                    e @ (PricingError::BoundsViolation { .. } | PricingError::Configuration(_)),
                )) => {
                    return UnitOutcome::Rejected {
                        unit_id,
                        recommendation_id,
                        reason: e.to_string(),
                    };
                }
                Err(e) => {
                    return UnitOutcome::Failed {
                        unit_id,
                        error: e.to_string(),
                    };
                }
            }
        }
    }

    fn forecast(&self, tenant_id: TenantId, unit: &UnitRecord, now: DateTime<Utc>) -> Option<Forecast> {
        match self
            .forecasts
            .get_forecast(tenant_id, unit.site_id, &unit.category, now.date_naive(), now)
        {
            Ok(forecast) => forecast,
            Err(e) => {
                warn!(unit = %unit.id, error = %e, "forecast unavailable, pricing on rules only");
                None
            }
        }
    }

    /// Store a pending recommendation and announce the ones it superseded.
    async fn save(&self, tenant_id: TenantId, rec: PriceRecommendation, now: DateTime<Utc>) -> Result<(), StoreError> {
        let superseded = self.ledger.save_recommendation(rec).await?;
        for old in superseded {
            self.publisher.pricing(
                tenant_id,
                PricingEvent::RecommendationExpired {
                    recommendation_id: old.id,
                    unit_id: old.unit_id,
                    occurred_at: now,
                },
            );
        }
        Ok(())
    }

    /// Reload a unit after a lost race. `None` when it is gone or no longer available.
    async fn refresh(
        &self,
        tenant_id: TenantId,
        unit: &UnitRecord,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<(UnitRecord, MarketSnapshot)>, StoreError> {
        let Some(fresh) = self.ledger.unit(tenant_id, unit.id).await? else {
            return Ok(None);
        };
        if fresh.status != UnitStatus::Available {
            return Ok(None);
        }
        let units = self.ledger.units_for_site(tenant_id, unit.site_id).await?;
        let occupancy = OccupancyCounts::from_units(&units, unit.site_id, Some(&unit.category));
        let snapshot = MarketSnapshot::new(
            unit.site_id,
            unit.category.clone(),
            occupancy,
            snapshot.competitor.clone(),
            now,
        );
        Ok(Some((fresh, snapshot)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use boxprice_pricing::{
        AdjustmentPlan, PriceAdjustment, PriceHistoryEntry, RecommendationStatus, StrategyConfig, StrategyDefaults,
    };

    use super::*;
    use crate::engine::PricingEngine;
    use crate::store::{AdjustmentQuery, InMemoryPriceLedger};

    fn now() -> DateTime<Utc> {
        "2026-10-19T02:00:00Z".parse().unwrap()
    }

    fn with_strategy(engine: &PricingEngine, tenant: TenantId) {
        engine
            .strategies()
            .create(
                tenant,
                &StrategyConfig {
                    name: "rules".into(),
                    ..StrategyConfig::default()
                },
                StrategyDefaults::default(),
                now(),
            )
            .unwrap();
    }

    /// `occupied` occupied units plus `available` available ones at base 200.
    async fn seed(engine: &PricingEngine, tenant: TenantId, site: SiteId, occupied: usize, available: usize) -> Vec<UnitRecord> {
        let mut seeded = Vec::new();
        for i in 0..occupied + available {
            let status = if i < occupied {
                UnitStatus::Occupied
            } else {
                UnitStatus::Available
            };
            let unit = UnitRecord::new(UnitId::new(), tenant, site, "small", Money::from_major(200.0), status);
            seeded.push(engine.ledger().upsert_unit(unit).await.unwrap());
        }
        seeded
    }

    #[tokio::test]
    async fn high_occupancy_produces_pending_recommendations() {
        let engine = PricingEngine::in_memory(EngineConfig::default());
        let tenant = TenantId::new();
        let site = SiteId::new();
        with_strategy(&engine, tenant);
        seed(&engine, tenant, site, 9, 1).await;

        let report = engine
            .batch()
            .run_cycle(tenant, &[site], &CancellationFlag::new(), now())
            .await;

        assert_eq!(report.evaluated(), 1);
        assert_eq!(report.recommended(), 1);
        assert!(!report.cancelled);
        let pending = engine.ledger().pending_recommendations(tenant, Some(site)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].recommended_price, Money::from_major(210.0));
    }

    #[tokio::test]
    async fn auto_apply_writes_the_price_once_per_cycle() {
        let engine = PricingEngine::in_memory(EngineConfig::default());
        let tenant = TenantId::new();
        let site = SiteId::new();
        with_strategy(&engine, tenant);
        let units = seed(&engine, tenant, site, 9, 1).await;
        let runner = engine.batch().clone().with_auto_apply(true);

        let report = runner.run_cycle(tenant, &[site], &CancellationFlag::new(), now()).await;
        assert_eq!(report.applied(), 1);
        let unit = engine.ledger().unit(tenant, units[9].id).await.unwrap().unwrap();
        assert_eq!(unit.current_price, Money::from_major(210.0));

        // Same cycle again: the new recommendation is rate limited and stays pending.
        let again = runner.run_cycle(tenant, &[site], &CancellationFlag::new(), now()).await;
        assert_eq!(again.applied(), 0);
        assert_eq!(again.recommended(), 1);
    }

    #[tokio::test]
    async fn a_unit_without_base_price_is_skipped_and_the_rest_continue() {
        let engine = PricingEngine::in_memory(EngineConfig::default());
        let tenant = TenantId::new();
        let site = SiteId::new();
        with_strategy(&engine, tenant);
        seed(&engine, tenant, site, 17, 1).await;
        let broken = engine
            .ledger()
            .upsert_unit(UnitRecord::new(
                UnitId::new(),
                tenant,
                site,
                "small",
                Money::ZERO,
                UnitStatus::Available,
            ))
            .await
            .unwrap();

        let report = engine
            .batch()
            .run_cycle(tenant, &[site], &CancellationFlag::new(), now())
            .await;

        assert_eq!(report.skipped(), 1);
        assert_eq!(report.recommended(), 1);
        let site_outcome = report.site(site).unwrap();
        assert!(site_outcome
            .units
            .iter()
            .any(|u| matches!(u, UnitOutcome::Skipped { unit_id, .. } if *unit_id == broken.id)));
    }

    #[tokio::test]
    async fn sites_without_strategy_fail_alone() {
        let engine = PricingEngine::in_memory(EngineConfig::default());
        let tenant = TenantId::new();
        let priced = SiteId::new();
        with_strategy(&engine, tenant);
        seed(&engine, tenant, priced, 9, 1).await;

        let other_tenant = TenantId::new();
        let report = engine
            .batch()
            .run_cycle(other_tenant, &[priced], &CancellationFlag::new(), now())
            .await;
        assert_eq!(report.failed_sites(), 1);

        let report = engine
            .batch()
            .run_cycle(tenant, &[priced, SiteId::new()], &CancellationFlag::new(), now())
            .await;
        assert_eq!(report.sites.len(), 2);
        assert_eq!(report.recommended(), 1);
        assert_eq!(report.failed_sites(), 0);
    }

    #[tokio::test]
    async fn cancelled_cycle_evaluates_nothing() {
        let engine = PricingEngine::in_memory(EngineConfig::default());
        let tenant = TenantId::new();
        let site = SiteId::new();
        with_strategy(&engine, tenant);
        seed(&engine, tenant, site, 9, 1).await;

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let report = engine.batch().run_cycle(tenant, &[site], &cancel, now()).await;

        assert!(report.cancelled);
        assert!(report.sites.iter().all(|s| s.cancelled));
        assert_eq!(report.evaluated(), 0);
        assert!(engine.ledger().pending_recommendations(tenant, None).await.unwrap().is_empty());
    }

    /// Ledger that lets a platform sync bump the unit version right before each of the first
    /// `races` commits.
    struct RacingLedger {
        inner: InMemoryPriceLedger,
        races: AtomicUsize,
    }

    #[async_trait]
    impl PriceLedger for RacingLedger {
        async fn upsert_unit(&self, unit: UnitRecord) -> Result<UnitRecord, StoreError> {
            self.inner.upsert_unit(unit).await
        }

        async fn unit(&self, tenant_id: TenantId, unit_id: UnitId) -> Result<Option<UnitRecord>, StoreError> {
            self.inner.unit(tenant_id, unit_id).await
        }

        async fn units_for_site(&self, tenant_id: TenantId, site_id: SiteId) -> Result<Vec<UnitRecord>, StoreError> {
            self.inner.units_for_site(tenant_id, site_id).await
        }

        async fn site_directory(&self) -> Result<Vec<(TenantId, SiteId)>, StoreError> {
            self.inner.site_directory().await
        }

        async fn lock_unit_for_contract(&self, tenant_id: TenantId, unit_id: UnitId) -> Result<Money, StoreError> {
            self.inner.lock_unit_for_contract(tenant_id, unit_id).await
        }

        async fn save_recommendation(&self, rec: PriceRecommendation) -> Result<Vec<PriceRecommendation>, StoreError> {
            self.inner.save_recommendation(rec).await
        }

        async fn recommendation(
            &self,
            tenant_id: TenantId,
            id: RecommendationId,
        ) -> Result<Option<PriceRecommendation>, StoreError> {
            self.inner.recommendation(tenant_id, id).await
        }

        async fn latest_recommendation(
            &self,
            tenant_id: TenantId,
            unit_id: UnitId,
        ) -> Result<Option<PriceRecommendation>, StoreError> {
            self.inner.latest_recommendation(tenant_id, unit_id).await
        }

        async fn pending_recommendations(
            &self,
            tenant_id: TenantId,
            site_id: Option<SiteId>,
        ) -> Result<Vec<PriceRecommendation>, StoreError> {
            self.inner.pending_recommendations(tenant_id, site_id).await
        }

        async fn resolve_recommendation(&self, rec: &PriceRecommendation) -> Result<(), StoreError> {
            self.inner.resolve_recommendation(rec).await
        }

        async fn commit(&self, plan: &AdjustmentPlan) -> Result<(), StoreError> {
            let raced = self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if raced {
                let unit = self.inner.unit(plan.unit.tenant_id, plan.unit.id).await?;
                if let Some(unit) = unit {
                    self.inner.upsert_unit(unit).await?;
                }
            }
            self.inner.commit(plan).await
        }

        async fn adjustments(
            &self,
            tenant_id: TenantId,
            query: &AdjustmentQuery,
        ) -> Result<Vec<PriceAdjustment>, StoreError> {
            self.inner.adjustments(tenant_id, query).await
        }

        async fn price_history(
            &self,
            tenant_id: TenantId,
            unit_id: UnitId,
        ) -> Result<Vec<PriceHistoryEntry>, StoreError> {
            self.inner.price_history(tenant_id, unit_id).await
        }
    }

    fn racing_engine(races: usize) -> PricingEngine {
        let ledger = RacingLedger {
            inner: InMemoryPriceLedger::new(),
            races: AtomicUsize::new(races),
        };
        PricingEngine::with_ledger(EngineConfig::default(), Arc::new(ledger))
    }

    #[tokio::test]
    async fn one_lost_race_is_retried_with_fresh_data() {
        let engine = racing_engine(1);
        let tenant = TenantId::new();
        let site = SiteId::new();
        with_strategy(&engine, tenant);
        let units = seed(&engine, tenant, site, 9, 1).await;

        let report = engine
            .batch()
            .clone()
            .with_auto_apply(true)
            .run_cycle(tenant, &[site], &CancellationFlag::new(), now())
            .await;

        assert_eq!(report.applied(), 1);
        let unit = engine.ledger().unit(tenant, units[9].id).await.unwrap().unwrap();
        assert_eq!(unit.current_price, Money::from_major(210.0));
        let first = engine.ledger().adjustments(tenant, &AdjustmentQuery::for_unit(unit.id)).await.unwrap();
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn two_lost_races_leave_the_unit_stale() {
        let engine = racing_engine(2);
        let tenant = TenantId::new();
        let site = SiteId::new();
        with_strategy(&engine, tenant);
        let units = seed(&engine, tenant, site, 9, 1).await;

        let report = engine
            .batch()
            .clone()
            .with_auto_apply(true)
            .run_cycle(tenant, &[site], &CancellationFlag::new(), now())
            .await;

        assert_eq!(report.stale(), 1);
        let unit = engine.ledger().unit(tenant, units[9].id).await.unwrap().unwrap();
        assert_eq!(unit.current_price, Money::from_major(200.0));
        let latest = engine.ledger().latest_recommendation(tenant, unit.id).await.unwrap().unwrap();
        assert_eq!(latest.status, RecommendationStatus::Expired);
    }
}
