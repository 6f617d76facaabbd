//! Price Adjustment Executor: the only writer of unit prices.
//!
//! Every apply re-validates the recommendation against the current unit and strategy, then
//! commits unit, recommendation, adjustment and history in one ledger transaction.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use boxprice_core::{Money, RecommendationId, TenantId, UnitId, UserId};
use boxprice_pricing::{
    AdjustmentPlan, ApplyMode, PriceAdjustment, PriceRecommendation, PricingAlert, PricingError, PricingEvent,
    UnitRecord,
};

use crate::alerting::AlertingService;
use crate::error::{EngineError, EngineResult, StoreError};
use crate::events::EventPublisher;
use crate::store::{PriceLedger, StrategyStore};

/// Result of a committed price change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub adjustment: PriceAdjustment,
    pub unit: UnitRecord,
    /// `large_price_change` alert raised by this write, if any.
    pub alert: Option<PricingAlert>,
}

pub struct PriceAdjustmentExecutor {
    ledger: Arc<dyn PriceLedger>,
    strategies: Arc<StrategyStore>,
    alerting: Arc<AlertingService>,
    publisher: EventPublisher,
    cycle: Duration,
}

impl PriceAdjustmentExecutor {
    pub fn new(
        ledger: Arc<dyn PriceLedger>,
        strategies: Arc<StrategyStore>,
        alerting: Arc<AlertingService>,
        publisher: EventPublisher,
        cycle: Duration,
    ) -> Self {
        Self {
            ledger,
            strategies,
            alerting,
            publisher,
            cycle,
        }
    }

    /// Apply a pending recommendation.
    ///
    /// Stale recommendations (expired, or the unit moved since evaluation) are expired;
    /// out-of-bounds or misconfigured ones are rejected. Rate limiting, missing approval
    /// and non-pending recommendations fail without touching any state.
    #[instrument(skip(self, tenant_id, now), fields(tenant = %tenant_id, recommendation = %recommendation_id))]
    pub async fn apply(
        &self,
        tenant_id: TenantId,
        recommendation_id: RecommendationId,
        mode: ApplyMode,
        now: DateTime<Utc>,
    ) -> EngineResult<ApplyOutcome> {
        let rec = self
            .ledger
            .recommendation(tenant_id, recommendation_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("recommendation {recommendation_id}")))?;
        let unit = self
            .ledger
            .unit(tenant_id, rec.unit_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("unit {}", rec.unit_id)))?;

        let Some(strategy) = self
            .strategies
            .get(tenant_id, rec.strategy_id, rec.strategy_version)?
        else {
            let err = PricingError::configuration(format!(
                "strategy {} v{} no longer exists",
                rec.strategy_id, rec.strategy_version
            ));
            self.refuse(tenant_id, &rec, &err, now).await;
            return Err(err.into());
        };

        let plan = match AdjustmentPlan::for_recommendation(&unit, &rec, &strategy, mode, self.cycle, now) {
            Ok(plan) => plan,
            Err(err) => {
                self.refuse(tenant_id, &rec, &err, now).await;
                return Err(err.into());
            }
        };

        match self.ledger.commit(&plan).await {
            Ok(()) => Ok(self.applied(tenant_id, plan, now)),
            Err(StoreError::VersionConflict { expected, actual }) => {
                let err = PricingError::ConcurrentModification { expected, actual };
                self.refuse(tenant_id, &rec, &err, now).await;
                Err(err.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Staff rejection of a pending recommendation.
    #[instrument(skip(self, tenant_id, reason, now), fields(tenant = %tenant_id, recommendation = %recommendation_id))]
    pub async fn reject(
        &self,
        tenant_id: TenantId,
        recommendation_id: RecommendationId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<PriceRecommendation> {
        let mut rec = self
            .ledger
            .recommendation(tenant_id, recommendation_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("recommendation {recommendation_id}")))?;
        rec.mark_rejected(reason, now)?;
        self.ledger.resolve_recommendation(&rec).await?;
        self.publisher.pricing(
            tenant_id,
            PricingEvent::RecommendationRejected {
                recommendation_id,
                unit_id: rec.unit_id,
                reason: reason.to_string(),
                occurred_at: now,
            },
        );
        info!(unit = %rec.unit_id, reason, "recommendation rejected");
        Ok(rec)
    }

    /// Staff price override. Skips the per-cycle rate limit but not the strategy bounds.
    ///
    /// A concurrent platform write is absorbed by re-reading the unit once.
    #[instrument(skip(self, tenant_id, reason, now), fields(tenant = %tenant_id, unit = %unit_id))]
    pub async fn manual_override(
        &self,
        tenant_id: TenantId,
        unit_id: UnitId,
        price: Money,
        approved_by: Option<UserId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<ApplyOutcome> {
        let approved_by = approved_by.ok_or(PricingError::ApprovalRequired)?;

        let mut retried = false;
        loop {
            let unit = self
                .ledger
                .unit(tenant_id, unit_id)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("unit {unit_id}")))?;
            let strategy = self
                .strategies
                .current_for_site(tenant_id, unit.site_id)?
                .ok_or_else(|| {
                    PricingError::configuration(format!("no active strategy governs site {}", unit.site_id))
                })?;
            let plan = AdjustmentPlan::manual_override(&unit, &strategy, price, approved_by, reason, now)?;

            match self.ledger.commit(&plan).await {
                Ok(()) => return Ok(self.applied(tenant_id, plan, now)),
                Err(StoreError::VersionConflict { .. }) if !retried => {
                    debug!("unit moved during override, retrying once");
                    retried = true;
                }
                Err(StoreError::VersionConflict { expected, actual }) => {
                    return Err(PricingError::ConcurrentModification { expected, actual }.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn applied(&self, tenant_id: TenantId, plan: AdjustmentPlan, now: DateTime<Utc>) -> ApplyOutcome {
        let AdjustmentPlan { unit, adjustment, .. } = plan;

        if let (Some(strategy_id), Some(version)) = (adjustment.strategy_id, adjustment.strategy_version) {
            if let Err(e) = self.strategies.mark_referenced(tenant_id, strategy_id, version) {
                warn!(strategy = %strategy_id, version, error = %e, "failed to freeze strategy version");
            }
        }

        self.publisher.pricing(
            tenant_id,
            PricingEvent::AdjustmentApplied {
                adjustment: adjustment.clone(),
            },
        );
        let alert = self
            .alerting
            .rules()
            .large_price_change(&adjustment)
            .and_then(|a| self.alerting.raise(tenant_id, a, now));

        info!(
            unit = %adjustment.unit_id,
            old_price = %adjustment.old_price,
            new_price = %adjustment.new_price,
            change_pct = adjustment.adjustment_percentage,
            trigger = adjustment.trigger.kind(),
            auto = adjustment.auto_applied(),
            "price adjustment applied"
        );
        ApplyOutcome {
            adjustment,
            unit,
            alert,
        }
    }

    /// Persist the consequence of a refused apply. Errors that leave the recommendation
    /// pending are ignored here.
    async fn refuse(&self, tenant_id: TenantId, rec: &PriceRecommendation, err: &PricingError, now: DateTime<Utc>) {
        match err {
            PricingError::RecommendationExpired | PricingError::ConcurrentModification { .. } => {
                let mut expired = rec.clone();
                if expired.mark_expired(err.to_string(), now).is_err() || !self.resolve(&expired).await {
                    return;
                }
                self.publisher.pricing(
                    tenant_id,
                    PricingEvent::RecommendationExpired {
                        recommendation_id: rec.id,
                        unit_id: rec.unit_id,
                        occurred_at: now,
                    },
                );
                self.alerting
                    .raise(tenant_id, self.alerting.rules().stale_recommendation(rec), now);
                warn!(unit = %rec.unit_id, reason = %err, "recommendation expired before it could be applied");
            }
            PricingError::BoundsViolation { .. } | PricingError::Configuration(_) => {
                let reason = err.to_string();
                let mut rejected = rec.clone();
                if rejected.mark_rejected(reason.clone(), now).is_err() || !self.resolve(&rejected).await {
                    return;
                }
                self.publisher.pricing(
                    tenant_id,
                    PricingEvent::RecommendationRejected {
                        recommendation_id: rec.id,
                        unit_id: rec.unit_id,
                        reason: reason.clone(),
                        occurred_at: now,
                    },
                );
                let alert = match err {
                    PricingError::BoundsViolation { .. } => self.alerting.rules().bounds_violation(rec, &reason),
                    _ => self.alerting.rules().recommendation_rejected(rec, &reason),
                };
                self.alerting.raise(tenant_id, alert, now);
                warn!(unit = %rec.unit_id, code = err.code(), reason, "recommendation rejected");
            }
            PricingError::RateLimited(_)
            | PricingError::ApprovalRequired
            | PricingError::RecommendationNotPending(_)
            | PricingError::Domain(_) => {}
        }
    }

    /// `false` if the stored copy was already resolved or the write failed.
    async fn resolve(&self, rec: &PriceRecommendation) -> bool {
        match self.ledger.resolve_recommendation(rec).await {
            Ok(()) => true,
            Err(StoreError::Conflict(_)) => {
                debug!(recommendation = %rec.id, "recommendation already resolved");
                false
            }
            Err(e) => {
                warn!(recommendation = %rec.id, error = %e, "failed to persist recommendation outcome");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use boxprice_core::SiteId;
    use boxprice_events::{EventBus, EventEnvelope, Subscription};
    use boxprice_pricing::{
        AlertKind, AlertSeverity, CompetitorSignal, MarketSnapshot, OccupancyCounts, PricingStrategy,
        RecommendationStatus, StrategyConfig, StrategyDefaults, StrategyEvaluator, UnitStatus,
    };

    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::PricingEngine;
    use crate::events::EngineEvent;

    struct Fixture {
        engine: PricingEngine,
        tenant: TenantId,
        unit: UnitRecord,
        strategy: PricingStrategy,
        now: DateTime<Utc>,
    }

    async fn fixture() -> Fixture {
        let engine = PricingEngine::in_memory(EngineConfig::default());
        let tenant = TenantId::new();
        let now: DateTime<Utc> = "2026-10-19T02:00:00Z".parse().unwrap();
        let strategy = engine
            .strategies()
            .create(
                tenant,
                &StrategyConfig {
                    name: "rules".into(),
                    ..StrategyConfig::default()
                },
                StrategyDefaults::default(),
                now,
            )
            .unwrap();
        let unit = engine
            .ledger()
            .upsert_unit(UnitRecord::new(
                UnitId::new(),
                tenant,
                SiteId::new(),
                "small",
                Money::from_major(200.0),
                UnitStatus::Available,
            ))
            .await
            .unwrap();
        Fixture {
            engine,
            tenant,
            unit,
            strategy,
            now,
        }
    }

    async fn pending(f: &Fixture, unit: &UnitRecord, occupancy: f64) -> PriceRecommendation {
        let snapshot = MarketSnapshot {
            occupancy_rate: occupancy,
            ..MarketSnapshot::new(
                unit.site_id,
                "small",
                OccupancyCounts::default(),
                CompetitorSignal::InsufficientData { sample_size: 0 },
                f.now,
            )
        };
        let rec = StrategyEvaluator::default()
            .evaluate(&f.strategy, unit, &snapshot, None, f.now)
            .unwrap();
        f.engine.ledger().save_recommendation(rec.clone()).await.unwrap();
        rec
    }

    fn drain(sub: &Subscription<EventEnvelope<EngineEvent>>) -> Vec<String> {
        std::iter::from_fn(|| sub.recv_timeout(StdDuration::from_millis(50)).ok())
            .map(|e| e.event_type().to_string())
            .collect()
    }

    #[tokio::test]
    async fn auto_apply_commits_and_freezes_strategy_version() {
        let f = fixture().await;
        let rec = pending(&f, &f.unit, 0.95).await;
        let feed = f.engine.publisher().bus().subscribe();

        let outcome = f
            .engine
            .executor()
            .apply(f.tenant, rec.id, ApplyMode::Auto, f.now)
            .await
            .unwrap();
        assert_eq!(outcome.unit.current_price, Money::from_major(210.0));
        assert_eq!(outcome.adjustment.old_price, Money::from_major(200.0));
        assert!(outcome.adjustment.auto_applied());
        assert!(outcome.alert.is_none());

        let stored = f.engine.ledger().recommendation(f.tenant, rec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecommendationStatus::Applied);
        let strategy = f.engine.strategies().latest(f.tenant, f.strategy.strategy_id()).unwrap().unwrap();
        assert!(strategy.is_referenced());
        assert_eq!(drain(&feed), vec!["pricing.adjustment.applied"]);

        let again = f.engine.executor().apply(f.tenant, rec.id, ApplyMode::Auto, f.now).await;
        assert!(matches!(
            again,
            Err(EngineError::Pricing(PricingError::RecommendationNotPending(RecommendationStatus::Applied)))
        ));
    }

    #[tokio::test]
    async fn contract_lock_makes_recommendation_stale() {
        let f = fixture().await;
        let rec = pending(&f, &f.unit, 0.95).await;
        f.engine.ledger().lock_unit_for_contract(f.tenant, f.unit.id).await.unwrap();

        let err = f
            .engine
            .executor()
            .apply(f.tenant, rec.id, ApplyMode::Auto, f.now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Pricing(PricingError::ConcurrentModification { expected: 0, actual: 1 })
        ));

        let stored = f.engine.ledger().recommendation(f.tenant, rec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecommendationStatus::Expired);
        let unit = f.engine.ledger().unit(f.tenant, f.unit.id).await.unwrap().unwrap();
        assert_eq!(unit.current_price, Money::from_major(200.0));
        let alerts = f.engine.alerting().list_open(f.tenant, None).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::StaleRecommendation);
    }

    #[tokio::test]
    async fn out_of_bounds_recommendation_is_rejected_with_critical_alert() {
        let f = fixture().await;
        let mut rec = StrategyEvaluator::default()
            .evaluate(
                &f.strategy,
                &f.unit,
                &MarketSnapshot::new(
                    f.unit.site_id,
                    "small",
                    OccupancyCounts::default(),
                    CompetitorSignal::InsufficientData { sample_size: 0 },
                    f.now,
                ),
                None,
                f.now,
            )
            .unwrap();
        rec.recommended_price = Money::from_major(1_000.0);
        f.engine.ledger().save_recommendation(rec.clone()).await.unwrap();

        let err = f
            .engine
            .executor()
            .apply(f.tenant, rec.id, ApplyMode::Manual(Some(UserId::new())), f.now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bounds_violation");

        let stored = f.engine.ledger().recommendation(f.tenant, rec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecommendationStatus::Rejected);
        let alerts = f.engine.alerting().list_open(f.tenant, None).unwrap();
        assert_eq!(alerts[0].kind, AlertKind::BoundsViolation);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        let unit = f.engine.ledger().unit(f.tenant, f.unit.id).await.unwrap().unwrap();
        assert_eq!(unit.version, 0);
    }

    #[tokio::test]
    async fn next_nightly_run_a_little_early_still_auto_applies() {
        let f = fixture().await;
        let executor = f.engine.executor();
        let first = pending(&f, &f.unit, 0.95).await;
        let applied = executor.apply(f.tenant, first.id, ApplyMode::Auto, f.now).await.unwrap();

        let second = pending(&f, &applied.unit, 0.95).await;
        let next_run = f.now + Duration::hours(24) - Duration::milliseconds(1);
        let outcome = executor.apply(f.tenant, second.id, ApplyMode::Auto, next_run).await.unwrap();
        assert!(outcome.unit.current_price > applied.unit.current_price);
        assert_eq!(outcome.unit.last_auto_adjusted_at, Some(next_run));
    }

    #[tokio::test]
    async fn second_auto_apply_in_a_cycle_is_rate_limited_but_override_is_not() {
        let f = fixture().await;
        let first = pending(&f, &f.unit, 0.95).await;
        let executor = f.engine.executor();
        let applied = executor.apply(f.tenant, first.id, ApplyMode::Auto, f.now).await.unwrap();

        let second = pending(&f, &applied.unit, 0.95).await;
        let later = f.now + Duration::hours(1);
        let err = executor.apply(f.tenant, second.id, ApplyMode::Auto, later).await.unwrap_err();
        assert_eq!(err.code(), "rate_limited");
        let stored = f.engine.ledger().recommendation(f.tenant, second.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecommendationStatus::Pending);

        let missing = executor
            .manual_override(f.tenant, f.unit.id, Money::from_major(250.0), None, "promo end", later)
            .await
            .unwrap_err();
        assert_eq!(missing.code(), "approval_required");

        let approver = UserId::new();
        let overridden = executor
            .manual_override(f.tenant, f.unit.id, Money::from_major(250.0), Some(approver), "promo end", later)
            .await
            .unwrap();
        assert_eq!(overridden.adjustment.approved_by(), Some(approver));
        assert_eq!(overridden.unit.current_price, Money::from_major(250.0));
        // 210 -> 250 is above the large-change threshold.
        assert_eq!(overridden.alert.map(|a| a.kind), Some(AlertKind::LargePriceChange));

        let beyond = executor
            .manual_override(f.tenant, f.unit.id, Money::from_major(400.0), Some(approver), "typo", later)
            .await
            .unwrap_err();
        assert_eq!(beyond.code(), "bounds_violation");
    }

    #[tokio::test]
    async fn staff_rejection_publishes_and_is_final() {
        let f = fixture().await;
        let rec = pending(&f, &f.unit, 0.95).await;
        let feed = f.engine.publisher().bus().subscribe();

        let rejected = f
            .engine
            .executor()
            .reject(f.tenant, rec.id, "waiting for new signage", f.now)
            .await
            .unwrap();
        assert_eq!(rejected.status, RecommendationStatus::Rejected);
        assert_eq!(drain(&feed), vec!["pricing.recommendation.rejected"]);
        assert!(f.engine.executor().reject(f.tenant, rec.id, "again", f.now).await.is_err());
    }
}
