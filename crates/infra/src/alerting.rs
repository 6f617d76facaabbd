//! Alerting & Reporting: revenue metrics, detection scans, the alert lifecycle and the pricing
//! health summary.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, warn};

use boxprice_core::{AlertId, SiteId, TenantId, UserId};
use boxprice_pricing::{
    AlertRules, NewAlert, OccupancyCounts, PricingAlert, PricingEvent, PricingHealth, RevenueMetricInput,
    RevenueMetricSnapshot, UnitStatus,
};

use crate::engine::ForecastReader;
use crate::error::{EngineError, EngineResult, StoreError};
use crate::events::EventPublisher;
use crate::store::{AlertStore, MetricStore, ObservationStore, PriceLedger, StrategyStore};

/// Days of forecasts averaged into the demand baseline.
const DEMAND_BASELINE_DAYS: i64 = 7;

pub struct AlertingService {
    alerts: Arc<AlertStore>,
    metrics: Arc<MetricStore>,
    ledger: Arc<dyn PriceLedger>,
    strategies: Arc<StrategyStore>,
    observations: Arc<ObservationStore>,
    forecasts: Arc<ForecastReader>,
    publisher: EventPublisher,
    rules: AlertRules,
    cycle: Duration,
}

impl AlertingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        alerts: Arc<AlertStore>,
        metrics: Arc<MetricStore>,
        ledger: Arc<dyn PriceLedger>,
        strategies: Arc<StrategyStore>,
        observations: Arc<ObservationStore>,
        forecasts: Arc<ForecastReader>,
        publisher: EventPublisher,
        rules: AlertRules,
        cycle: Duration,
    ) -> Self {
        Self {
            alerts,
            metrics,
            ledger,
            strategies,
            observations,
            forecasts,
            publisher,
            rules,
            cycle,
        }
    }

    pub fn rules(&self) -> &AlertRules {
        &self.rules
    }

    /// Store and publish an alert unless an unresolved duplicate exists.
    ///
    /// Never fails the caller: a store error is logged and the alert dropped.
    pub fn raise(&self, tenant_id: TenantId, alert: NewAlert, now: DateTime<Utc>) -> Option<PricingAlert> {
        match self.alerts.raise_if_new(tenant_id, alert, now) {
            Ok(Some(stored)) => {
                warn!(
                    tenant = %tenant_id,
                    site = ?stored.site_id,
                    unit = ?stored.unit_id,
                    kind = stored.kind.as_str(),
                    severity = ?stored.severity,
                    "pricing alert raised"
                );
                self.publisher.pricing(
                    tenant_id,
                    PricingEvent::AlertRaised {
                        alert: stored.clone(),
                    },
                );
                Some(stored)
            }
            Ok(None) => {
                debug!(tenant = %tenant_id, "alert suppressed by an unresolved duplicate");
                None
            }
            Err(e) => {
                warn!(tenant = %tenant_id, error = %e, "failed to store alert");
                None
            }
        }
    }

    /// Derive and store the period snapshot; raises `revenue_drop` against the previous one.
    #[instrument(skip(self, input, now), fields(tenant = %tenant_id, site = %input.site_id))]
    pub fn record_metrics(
        &self,
        tenant_id: TenantId,
        input: RevenueMetricInput,
        now: DateTime<Utc>,
    ) -> EngineResult<RevenueMetricSnapshot> {
        let previous = self.metrics.latest_before(tenant_id, input.site_id, input.date);
        let snapshot = RevenueMetricSnapshot::derive(input, previous.as_ref(), now)?;
        if !self.metrics.insert(tenant_id, snapshot.clone()) {
            return Err(StoreError::Conflict(format!(
                "metrics for site {} on {} already recorded",
                snapshot.site_id, snapshot.date
            ))
            .into());
        }
        if let Some(alert) = previous.and_then(|p| self.rules.revenue_drop(&p, &snapshot)) {
            self.raise(tenant_id, alert, now);
        }
        Ok(snapshot)
    }

    /// Run every detection rule for one site and return the alerts actually raised.
    #[instrument(skip(self, tenant_id, site_id, now), fields(tenant = %tenant_id, site = %site_id))]
    pub async fn scan_site(&self, tenant_id: TenantId, site_id: SiteId, now: DateTime<Utc>) -> EngineResult<Vec<PricingAlert>> {
        let units = self.ledger.units_for_site(tenant_id, site_id).await?;
        let strategy = self.strategies.current_for_site(tenant_id, site_id)?;
        let mut candidates: Vec<NewAlert> = Vec::new();

        let site_occupancy = OccupancyCounts::from_units(&units, site_id, None);
        candidates.extend(self.rules.high_vacancy(
            site_id,
            site_occupancy.rate(),
            site_occupancy.available_units,
        ));

        let categories: BTreeSet<&str> = units.iter().map(|u| u.category.as_str()).collect();
        for category in categories {
            let occupancy = OccupancyCounts::from_units(&units, site_id, Some(category)).rate();

            let medians = self.observations.last_two_medians(tenant_id, site_id, category);
            let current_median = medians.last().and_then(|s| s.competitor_median_price());
            if let [previous, current] = medians.as_slice() {
                if let (Some(prev), Some(cur)) = (previous.competitor_median_price(), current.competitor_median_price()) {
                    candidates.extend(self.rules.competitor_change(site_id, category, prev, cur));
                }
            }

            candidates.extend(self.demand_spike(tenant_id, site_id, category, now));

            let Some(strategy) = &strategy else {
                continue;
            };
            let recent = self.observations.recent_occupancy(
                tenant_id,
                site_id,
                category,
                self.rules.underpriced_cycles as usize,
            );
            for unit in units
                .iter()
                .filter(|u| u.category == category && u.status == UnitStatus::Available)
            {
                candidates.extend(self.rules.underpriced(unit, strategy, occupancy, self.cycle, now));
                candidates.extend(self.rules.overpriced(unit, strategy, &recent, current_median));
            }
        }

        if let Some(strategy) = &strategy {
            candidates.extend(self.rules.seasonal_opportunity(site_id, strategy, now));
        }

        Ok(candidates
            .into_iter()
            .filter_map(|alert| self.raise(tenant_id, alert, now))
            .collect())
    }

    /// Today's forecast against the mean of the preceding week's forecasts.
    fn demand_spike(&self, tenant_id: TenantId, site_id: SiteId, category: &str, now: DateTime<Utc>) -> Option<NewAlert> {
        let today = now.date_naive();
        let forecast = match self.forecasts.get_forecast(tenant_id, site_id, category, today, now) {
            Ok(Some(f)) => f,
            Ok(None) => return None,
            Err(e) => {
                warn!(tenant = %tenant_id, site = %site_id, category, error = %e, "forecast read failed");
                return None;
            }
        };

        let history: Vec<f64> = (1..=DEMAND_BASELINE_DAYS)
            .filter_map(|days| {
                self.forecasts
                    .get_forecast(tenant_id, site_id, category, today - Duration::days(days), now)
                    .ok()
                    .flatten()
            })
            .map(|f| f.demand.predicted_demand)
            .collect();
        if history.is_empty() {
            return None;
        }
        let baseline = history.iter().sum::<f64>() / history.len() as f64;
        self.rules.demand_spike(site_id, category, &forecast, baseline)
    }

    pub fn mark_read(&self, tenant_id: TenantId, alert_id: AlertId, now: DateTime<Utc>) -> EngineResult<PricingAlert> {
        self.alerts.update(tenant_id, alert_id, |a| a.mark_read(now))
    }

    pub fn acknowledge(
        &self,
        tenant_id: TenantId,
        alert_id: AlertId,
        user: UserId,
        now: DateTime<Utc>,
    ) -> EngineResult<PricingAlert> {
        let alert = self.alerts.update(tenant_id, alert_id, |a| a.acknowledge(user, now))?;
        self.publisher.pricing(
            tenant_id,
            PricingEvent::AlertAcknowledged {
                alert_id,
                by: user,
                occurred_at: now,
            },
        );
        Ok(alert)
    }

    pub fn resolve(
        &self,
        tenant_id: TenantId,
        alert_id: AlertId,
        user: UserId,
        now: DateTime<Utc>,
    ) -> EngineResult<PricingAlert> {
        let alert = self.alerts.update(tenant_id, alert_id, |a| a.resolve(user, now))?;
        self.publisher.pricing(
            tenant_id,
            PricingEvent::AlertResolved {
                alert_id,
                by: user,
                occurred_at: now,
            },
        );
        Ok(alert)
    }

    pub fn get(&self, tenant_id: TenantId, alert_id: AlertId) -> EngineResult<PricingAlert> {
        self.alerts
            .get(tenant_id, alert_id)?
            .ok_or_else(|| EngineError::not_found(format!("alert {alert_id}")))
    }

    pub fn list_open(&self, tenant_id: TenantId, site_id: Option<SiteId>) -> EngineResult<Vec<PricingAlert>> {
        Ok(self.alerts.list_open(tenant_id, site_id)?)
    }

    /// Unit prices against the latest competitor median of their category.
    pub async fn pricing_health(&self, tenant_id: TenantId, site_id: SiteId) -> EngineResult<PricingHealth> {
        let units = self.ledger.units_for_site(tenant_id, site_id).await?;
        let medians: HashMap<String, _> = self
            .observations
            .latest_snapshots(tenant_id, site_id)
            .into_iter()
            .filter_map(|s| s.competitor_median_price().map(|m| (s.category, m)))
            .collect();
        Ok(PricingHealth::assess(&units, &medians))
    }

    pub fn metrics(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    ) -> Vec<RevenueMetricSnapshot> {
        self.metrics.range(tenant_id, site_id, from, to)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use boxprice_core::{ModelId, Money, UnitId};
    use boxprice_events::EventBus;
    use boxprice_forecast::{DemandForecast, ModelKind, PricingModelLog};
    use boxprice_pricing::{
        AlertKind, AlertSeverity, AlertStatus, CompetitorSignal, MarketSnapshot, StrategyConfig, StrategyDefaults,
        UnitRecord,
    };

    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::PricingEngine;

    fn engine() -> PricingEngine {
        PricingEngine::in_memory(EngineConfig::default())
    }

    async fn seed_units(engine: &PricingEngine, tenant: TenantId, site: SiteId, occupied: usize, total: usize) {
        for i in 0..total {
            let status = if i < occupied {
                UnitStatus::Occupied
            } else {
                UnitStatus::Available
            };
            engine
                .ledger()
                .upsert_unit(UnitRecord::new(
                    UnitId::new(),
                    tenant,
                    site,
                    "small",
                    Money::from_major(100.0),
                    status,
                ))
                .await
                .unwrap();
        }
    }

    fn input(site: SiteId, day: u32, net: f64) -> RevenueMetricInput {
        RevenueMetricInput {
            total_units: 10,
            occupied_units: 8,
            gross_revenue: Money::from_major(net),
            net_revenue: Money::from_major(net),
            ..RevenueMetricInput::new(site, NaiveDate::from_ymd_opt(2026, 10, day).unwrap())
        }
    }

    #[tokio::test]
    async fn revenue_drop_is_raised_against_the_previous_period() {
        let engine = engine();
        let alerting = engine.alerting();
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();

        alerting.record_metrics(tenant, input(site, 1, 10_000.0), now).unwrap();
        let snapshot = alerting.record_metrics(tenant, input(site, 8, 8_000.0), now).unwrap();
        assert_eq!(snapshot.revpau, Some(Money::from_major(800.0)));

        let open = alerting.list_open(tenant, Some(site)).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, AlertKind::RevenueDrop);
        assert_eq!(open[0].severity, AlertSeverity::Critical);

        let duplicate = alerting.record_metrics(tenant, input(site, 8, 8_000.0), now);
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn scan_raises_vacancy_once_and_lifecycle_publishes_events() {
        let engine = engine();
        let alerting = engine.alerting();
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();
        seed_units(&engine, tenant, site, 4, 10).await;
        let feed = engine.publisher().bus().subscribe();

        let raised = alerting.scan_site(tenant, site, now).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, AlertKind::HighVacancy);
        assert_eq!(raised[0].severity, AlertSeverity::Critical);
        assert!(alerting.scan_site(tenant, site, now).await.unwrap().is_empty());

        let user = UserId::new();
        let acked = alerting.acknowledge(tenant, raised[0].id, user, now).unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(acked.acknowledged_by, Some(user));
        alerting.resolve(tenant, raised[0].id, user, now).unwrap();
        assert!(alerting.list_open(tenant, None).unwrap().is_empty());

        let types: Vec<String> = std::iter::from_fn(|| feed.recv_timeout(std::time::Duration::from_millis(100)).ok())
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(
            types,
            vec!["pricing.alert.raised", "pricing.alert.acknowledged", "pricing.alert.resolved"]
        );
    }

    #[tokio::test]
    async fn full_site_with_stale_prices_is_underpriced() {
        let engine = engine();
        let alerting = engine.alerting();
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();
        seed_units(&engine, tenant, site, 9, 10).await;
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

        let raised = alerting.scan_site(tenant, site, now).await.unwrap();
        let underpriced: Vec<_> = raised.iter().filter(|a| a.kind == AlertKind::Underpriced).collect();
        assert_eq!(underpriced.len(), 1);
        assert!(underpriced[0].unit_id.is_some());
        assert!(raised.iter().all(|a| a.kind != AlertKind::HighVacancy));
    }

    fn snapshot(site: SiteId, category: &str, median: f64, at: DateTime<Utc>) -> MarketSnapshot {
        let competitor = CompetitorSignal::Median {
            price: Money::from_major(median),
            sample_size: 3,
        };
        MarketSnapshot::new(site, category, OccupancyCounts::default(), competitor, at)
    }

    fn forecast(tenant: TenantId, site: SiteId, category: &str, model: ModelId, date: NaiveDate, demand: f64) -> DemandForecast {
        DemandForecast {
            tenant_id: tenant,
            site_id: site,
            category: Some(category.into()),
            forecast_date: date,
            model_id: model,
            predicted_demand: demand,
            predicted_conversion: 0.2,
            confidence_lower: demand * 0.9,
            confidence_upper: demand * 1.1,
            recommended_price_modifier: 1.0,
            factors: serde_json::Value::Null,
            generated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn market_and_demand_alerts_are_raised_per_category() {
        let engine = engine();
        let alerting = engine.alerting();
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();
        let categories = ["small", "large"];

        for category in categories {
            engine
                .ledger()
                .upsert_unit(UnitRecord::new(
                    UnitId::new(),
                    tenant,
                    site,
                    category,
                    Money::from_major(100.0),
                    UnitStatus::Occupied,
                ))
                .await
                .unwrap();
            engine.observations().record_snapshot(tenant, snapshot(site, category, 100.0, now));
            engine.observations().record_snapshot(tenant, snapshot(site, category, 150.0, now));
        }

        let model = PricingModelLog {
            id: ModelId::new(),
            tenant_id: tenant,
            model_version: "2026.10".into(),
            kind: ModelKind::DemandPrediction,
            training_accuracy: None,
            validation_accuracy: Some(0.9),
            mae: None,
            rmse: None,
            hyperparameters: serde_json::Value::Null,
            feature_importance: BTreeMap::new(),
            training_samples: 500,
            is_active: true,
            trained_at: now,
        };
        let today = now.date_naive();
        for category in categories {
            engine.forecasts().insert(forecast(tenant, site, category, model.id, today, 20.0));
            for days in 1..=3 {
                engine
                    .forecasts()
                    .insert(forecast(tenant, site, category, model.id, today - Duration::days(days), 10.0));
            }
        }
        engine.models().register(model);

        let raised = alerting.scan_site(tenant, site, now).await.unwrap();
        for kind in [AlertKind::CompetitorChange, AlertKind::DemandSpike] {
            let mut seen: Vec<&str> = raised
                .iter()
                .filter(|a| a.kind == kind)
                .filter_map(|a| a.category.as_deref())
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, vec!["large", "small"], "{kind:?}");
        }

        // A later move in one category is still suppressed while its alert is open.
        engine.observations().record_snapshot(tenant, snapshot(site, "small", 200.0, now));
        let again = alerting.scan_site(tenant, site, now).await.unwrap();
        assert!(again.iter().all(|a| a.kind != AlertKind::CompetitorChange));
    }

    #[tokio::test]
    async fn health_compares_against_latest_median() {
        let engine = engine();
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();
        seed_units(&engine, tenant, site, 0, 2).await;
        let health = engine.alerting().pricing_health(tenant, site).await.unwrap();
        assert_eq!(health.no_market_data, 2);
    }
}
