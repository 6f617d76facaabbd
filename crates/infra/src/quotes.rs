//! Read side for collaborators: the price a visitor sees and the adjustment audit trail.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use boxprice_core::{DomainError, ExperimentId, Money, RecommendationId, SiteId, TenantId, UnitId};
use boxprice_pricing::{PriceAdjustment, PriceRecommendation, RecommendationStatus, UnitRecord};

use crate::error::{EngineError, EngineResult};
use crate::experiments::ExperimentService;
use crate::store::{AdjustmentQuery, PriceLedger, StrategyStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuoteSource {
    /// The unit's current price.
    Current,
    /// The unit has no usable current price; a pending recommendation stands in.
    Recommended { recommendation_id: RecommendationId },
    Base,
    /// Variant price of a running experiment for this visitor.
    Experiment { experiment_id: ExperimentId, variant: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub unit_id: UnitId,
    pub price: Money,
    pub source: QuoteSource,
    pub quoted_at: DateTime<Utc>,
}

pub struct PriceQuoteService {
    ledger: Arc<dyn PriceLedger>,
    strategies: Arc<StrategyStore>,
    experiments: Arc<ExperimentService>,
}

impl PriceQuoteService {
    pub fn new(ledger: Arc<dyn PriceLedger>, strategies: Arc<StrategyStore>, experiments: Arc<ExperimentService>) -> Self {
        Self {
            ledger,
            strategies,
            experiments,
        }
    }

    /// Price to render for a unit.
    ///
    /// With a visitor and a running experiment on the unit's site, the visitor's variant
    /// price is returned (clamped to the strategy bounds) and the exposure is recorded.
    /// Experiment failures fall back to the plain price; they never fail the quote.
    pub async fn current_or_recommended_price(
        &self,
        tenant_id: TenantId,
        unit_id: UnitId,
        visitor_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<PriceQuote> {
        let unit = self
            .ledger
            .unit(tenant_id, unit_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("unit {unit_id}")))?;

        let (price, source) = self.plain_price(tenant_id, &unit).await?;

        if let Some(visitor_id) = visitor_id.filter(|v| !v.trim().is_empty()) {
            match self.experiment_price(tenant_id, &unit, visitor_id, price, now) {
                Ok(Some(quote)) => return Ok(quote),
                Ok(None) => {}
                Err(e) => {
                    warn!(tenant = %tenant_id, unit = %unit_id, error = %e, "experiment pricing failed, quoting plain price");
                }
            }
        }

        Ok(PriceQuote {
            unit_id,
            price,
            source,
            quoted_at: now,
        })
    }

    async fn plain_price(&self, tenant_id: TenantId, unit: &UnitRecord) -> EngineResult<(Money, QuoteSource)> {
        if unit.current_price.is_positive() {
            return Ok((unit.current_price, QuoteSource::Current));
        }
        if let Some(rec) = self
            .ledger
            .latest_recommendation(tenant_id, unit.id)
            .await?
            .filter(|r| r.status == RecommendationStatus::Pending)
        {
            return Ok((
                rec.recommended_price,
                QuoteSource::Recommended {
                    recommendation_id: rec.id,
                },
            ));
        }
        unit.valid_base_price()
            .map(|base| (base, QuoteSource::Base))
            .ok_or_else(|| DomainError::invariant(format!("unit {} has no price to quote", unit.id)).into())
    }

    fn experiment_price(
        &self,
        tenant_id: TenantId,
        unit: &UnitRecord,
        visitor_id: &str,
        price: Money,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<PriceQuote>> {
        let Some(experiment) = self.experiments.running_for_site(tenant_id, unit.site_id)? else {
            return Ok(None);
        };
        // Without a strategy there are no bounds to keep the variant price inside.
        let Some(strategy) = self.strategies.current_for_site(tenant_id, unit.site_id)? else {
            debug!(site = %unit.site_id, "no strategy governs site, skipping experiment pricing");
            return Ok(None);
        };
        let Some(base) = unit.valid_base_price() else {
            return Ok(None);
        };

        let assigned = self.experiments.record_exposure(
            tenant_id,
            experiment.experiment_id(),
            visitor_id,
            Some(unit.id),
            price,
            strategy.bounds(base),
            now,
        )?;
        Ok(assigned.map(|a| PriceQuote {
            unit_id: unit.id,
            price: a.price,
            source: QuoteSource::Experiment {
                experiment_id: a.experiment_id,
                variant: a.variant,
            },
            quoted_at: now,
        }))
    }

    /// Audit query. A unit or site scope is required.
    pub async fn list_price_adjustments(
        &self,
        tenant_id: TenantId,
        query: &AdjustmentQuery,
    ) -> EngineResult<Vec<PriceAdjustment>> {
        if query.unit_id.is_none() && query.site_id.is_none() {
            return Err(DomainError::validation("a unit_id or site_id scope is required").into());
        }
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(DomainError::validation("period start is after its end").into());
            }
        }
        Ok(self.ledger.adjustments(tenant_id, query).await?)
    }

    /// Review queue.
    pub async fn pending_recommendations(
        &self,
        tenant_id: TenantId,
        site_id: Option<SiteId>,
    ) -> EngineResult<Vec<PriceRecommendation>> {
        Ok(self.ledger.pending_recommendations(tenant_id, site_id).await?)
    }

    pub async fn recommendation(&self, tenant_id: TenantId, id: RecommendationId) -> EngineResult<PriceRecommendation> {
        self.ledger
            .recommendation(tenant_id, id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("recommendation {id}")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use boxprice_core::UserId;
    use boxprice_experiments::ExperimentDefinition;
    use boxprice_pricing::{StrategyConfig, StrategyDefaults, UnitStatus};

    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::PricingEngine;

    async fn unit(engine: &PricingEngine, tenant: TenantId, site: SiteId, current: f64) -> UnitRecord {
        engine
            .ledger()
            .upsert_unit(
                UnitRecord::new(UnitId::new(), tenant, site, "small", Money::from_major(200.0), UnitStatus::Available)
                    .with_current_price(Money::from_major(current)),
            )
            .await
            .unwrap()
    }

    fn strategy(engine: &PricingEngine, tenant: TenantId, now: DateTime<Utc>) {
        engine
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
    }

    #[tokio::test]
    async fn quotes_fall_back_from_current_to_base() {
        let engine = PricingEngine::in_memory(EngineConfig::default());
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();

        let priced = unit(&engine, tenant, site, 215.0).await;
        let quote = engine
            .quotes()
            .current_or_recommended_price(tenant, priced.id, None, now)
            .await
            .unwrap();
        assert_eq!(quote.price, Money::from_major(215.0));
        assert_eq!(quote.source, QuoteSource::Current);

        let unpriced = unit(&engine, tenant, site, 0.0).await;
        let quote = engine
            .quotes()
            .current_or_recommended_price(tenant, unpriced.id, Some("visitor-1"), now)
            .await
            .unwrap();
        assert_eq!(quote.price, Money::from_major(200.0));
        assert_eq!(quote.source, QuoteSource::Base);

        let missing = engine
            .quotes()
            .current_or_recommended_price(TenantId::new(), priced.id, None, now)
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn visitors_in_a_running_experiment_see_clamped_variant_prices() {
        let engine = PricingEngine::in_memory(EngineConfig::default());
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();
        strategy(&engine, tenant, now);
        let unit = unit(&engine, tenant, site, 290.0).await;

        let definition: ExperimentDefinition = serde_json::from_value(serde_json::json!({
            "name": "premium test",
            "variants": [
                { "name": "control", "weight": 50, "price_modifier": 1.0 },
                { "name": "premium", "weight": 50, "price_modifier": 1.2 }
            ]
        }))
        .unwrap();
        let experiment = engine.experiments().create(tenant, definition, now).unwrap();
        engine.experiments().start(tenant, experiment.experiment_id(), now).unwrap();

        for i in 0..40 {
            let visitor = format!("visitor-{i}");
            let first = engine
                .quotes()
                .current_or_recommended_price(tenant, unit.id, Some(&visitor), now)
                .await
                .unwrap();
            let QuoteSource::Experiment { variant, .. } = &first.source else {
                panic!("expected an experiment quote, got {:?}", first.source);
            };
            let expected = if variant == "premium" { 300.0 } else { 290.0 };
            assert_eq!(first.price, Money::from_major(expected));

            let again = engine
                .quotes()
                .current_or_recommended_price(tenant, unit.id, Some(&visitor), now)
                .await
                .unwrap();
            assert_eq!(again.source, first.source);
        }
        let exposures = engine.experiments().exposures(tenant, experiment.experiment_id()).unwrap();
        assert_eq!(exposures.len(), 40);
    }

    #[tokio::test]
    async fn adjustments_require_a_scope() {
        let engine = PricingEngine::in_memory(EngineConfig::default());
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();
        strategy(&engine, tenant, now);
        let unit = unit(&engine, tenant, site, 200.0).await;
        engine
            .executor()
            .manual_override(tenant, unit.id, Money::from_major(220.0), Some(UserId::new()), "pilot", now)
            .await
            .unwrap();

        assert!(engine
            .quotes()
            .list_price_adjustments(tenant, &AdjustmentQuery::default())
            .await
            .is_err());
        let by_site = engine
            .quotes()
            .list_price_adjustments(tenant, &AdjustmentQuery::for_site(site))
            .await
            .unwrap();
        assert_eq!(by_site.len(), 1);
        let outside = AdjustmentQuery::for_unit(unit.id).between(Some(now + Duration::hours(1)), None);
        assert!(engine.quotes().list_price_adjustments(tenant, &outside).await.unwrap().is_empty());

        let pending = engine.quotes().pending_recommendations(tenant, Some(site)).await.unwrap();
        assert!(pending.is_empty());
    }
}
