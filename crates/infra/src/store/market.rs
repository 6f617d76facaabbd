//! Market inputs: competitor observations, collected snapshots, revenue metrics, forecasts and
//! model metadata.

use chrono::NaiveDate;

use boxprice_core::{ModelId, SiteId, TenantId};
use boxprice_forecast::{DemandForecast, ForecastError, ForecastSource, ModelKind, ModelRegistry, PricingModelLog};
use boxprice_pricing::{CompetitorPriceObservation, MarketSnapshot, RevenueMetricSnapshot};

use super::tenant_store::{InMemoryTenantStore, TenantLog, TenantStore};

/// Append-only competitor observations plus the snapshots built from them.
#[derive(Debug, Default)]
pub struct ObservationStore {
    observations: TenantLog<CompetitorPriceObservation>,
    snapshots: TenantLog<MarketSnapshot>,
}

impl ObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, observation: CompetitorPriceObservation) {
        self.observations.append(observation.tenant_id, observation);
    }

    pub fn observations(&self, tenant_id: TenantId, site_id: SiteId, category: &str) -> Vec<CompetitorPriceObservation> {
        self.observations
            .filter(tenant_id, |o| o.site_id == site_id && o.category == category)
    }

    pub fn record_snapshot(&self, tenant_id: TenantId, snapshot: MarketSnapshot) {
        self.snapshots.append(tenant_id, snapshot);
    }

    /// The two most recent snapshots of a site/category that carried a competitor median,
    /// oldest first.
    pub fn last_two_medians(&self, tenant_id: TenantId, site_id: SiteId, category: &str) -> Vec<MarketSnapshot> {
        let with_median = self.snapshots.filter(tenant_id, |s| {
            s.site_id == site_id && s.category == category && s.competitor_median_price().is_some()
        });
        let skip = with_median.len().saturating_sub(2);
        with_median.into_iter().skip(skip).collect()
    }

    /// Occupancy of a site/category over its most recent `n` snapshots, oldest first.
    pub fn recent_occupancy(&self, tenant_id: TenantId, site_id: SiteId, category: &str, n: usize) -> Vec<f64> {
        let rates: Vec<f64> = self
            .snapshots
            .filter(tenant_id, |s| s.site_id == site_id && s.category == category)
            .into_iter()
            .map(|s| s.occupancy_rate)
            .collect();
        let skip = rates.len().saturating_sub(n);
        rates.into_iter().skip(skip).collect()
    }

    /// Most recent snapshot per category of a site.
    pub fn latest_snapshots(&self, tenant_id: TenantId, site_id: SiteId) -> Vec<MarketSnapshot> {
        let mut latest: Vec<MarketSnapshot> = Vec::new();
        for snapshot in self.snapshots.filter(tenant_id, |s| s.site_id == site_id) {
            match latest.iter_mut().find(|s| s.category == snapshot.category) {
                Some(slot) => *slot = snapshot,
                None => latest.push(snapshot),
            }
        }
        latest
    }
}

/// Revenue snapshots, unique per (site, date).
#[derive(Debug, Default)]
pub struct MetricStore {
    inner: InMemoryTenantStore<(SiteId, NaiveDate), RevenueMetricSnapshot>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write-once. Returns `false` if a snapshot for the site and date already exists.
    pub fn insert(&self, tenant_id: TenantId, snapshot: RevenueMetricSnapshot) -> bool {
        self.inner
            .insert_new(tenant_id, (snapshot.site_id, snapshot.date), snapshot)
    }

    pub fn get(&self, tenant_id: TenantId, site_id: SiteId, date: NaiveDate) -> Option<RevenueMetricSnapshot> {
        self.inner.get(tenant_id, &(site_id, date))
    }

    /// Latest snapshot strictly before `date`.
    pub fn latest_before(&self, tenant_id: TenantId, site_id: SiteId, date: NaiveDate) -> Option<RevenueMetricSnapshot> {
        self.inner
            .filter(tenant_id, |(site, d), _| *site == site_id && *d < date)
            .into_iter()
            .max_by_key(|s| s.date)
    }

    /// Snapshots of a site within `[from, to]`, by date.
    pub fn range(&self, tenant_id: TenantId, site_id: SiteId, from: NaiveDate, to: NaiveDate) -> Vec<RevenueMetricSnapshot> {
        let mut snapshots = self
            .inner
            .filter(tenant_id, |(site, d), _| *site == site_id && *d >= from && *d <= to);
        snapshots.sort_by_key(|s| s.date);
        snapshots
    }
}

/// Forecasts as delivered by the training pipeline.
#[derive(Debug, Default)]
pub struct InMemoryForecastStore {
    forecasts: TenantLog<DemandForecast>,
}

impl InMemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, forecast: DemandForecast) {
        self.forecasts.append(forecast.tenant_id, forecast);
    }
}

impl ForecastSource for InMemoryForecastStore {
    fn forecasts_for(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        date: NaiveDate,
    ) -> Result<Vec<DemandForecast>, ForecastError> {
        Ok(self
            .forecasts
            .filter(tenant_id, |f| f.site_id == site_id && f.forecast_date == date))
    }
}

/// Model training logs as delivered by the training pipeline.
#[derive(Debug, Default)]
pub struct InMemoryModelRegistry {
    models: InMemoryTenantStore<ModelId, PricingModelLog>,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, model: PricingModelLog) {
        self.models.upsert(model.tenant_id, model.id, model);
    }
}

impl ModelRegistry for InMemoryModelRegistry {
    fn get(&self, tenant_id: TenantId, model_id: ModelId) -> Option<PricingModelLog> {
        self.models.get(tenant_id, &model_id)
    }

    fn active(&self, tenant_id: TenantId, kind: ModelKind) -> Option<PricingModelLog> {
        self.models
            .filter(tenant_id, |_, m| m.is_active && m.kind == kind)
            .into_iter()
            .max_by_key(|m| m.trained_at)
    }
}
