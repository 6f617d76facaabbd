use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;

use boxprice_core::{SiteId, TenantId};

use crate::forecast::{DemandForecast, Forecast};
use crate::model::ModelRegistry;

/// Tenant scope for a consumer.
///
/// - `Any`: serve reads for any tenant (shared batch worker).
/// - `Tenant`: only serve the given tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TenantScope {
    Any,
    Tenant(TenantId),
}

impl TenantScope {
    pub fn allows(&self, tenant_id: TenantId) -> bool {
        match self {
            TenantScope::Any => true,
            TenantScope::Tenant(t) => *t == tenant_id,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForecastError {
    #[error("tenant scope violation (tenant not allowed by consumer)")]
    TenantScope,

    #[error("forecast source failed: {0}")]
    Source(String),
}

/// Local/cached store of forecasts written by the training pipeline.
pub trait ForecastSource: Send + Sync {
    /// All forecasts for the site and date, any category.
    fn forecasts_for(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        date: NaiveDate,
    ) -> Result<Vec<DemandForecast>, ForecastError>;
}

impl<T: ForecastSource + ?Sized> ForecastSource for std::sync::Arc<T> {
    fn forecasts_for(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        date: NaiveDate,
    ) -> Result<Vec<DemandForecast>, ForecastError> {
        (**self).forecasts_for(tenant_id, site_id, date)
    }
}

/// Read-only view over forecasts whose model is active.
///
/// Never synthesizes a forecast: `Ok(None)` means "fall back to rule-only pricing".
pub struct ForecastConsumer<S, R> {
    scope: TenantScope,
    source: S,
    registry: R,
    max_age: Option<Duration>,
}

impl<S, R> ForecastConsumer<S, R>
where
    S: ForecastSource,
    R: ModelRegistry,
{
    pub fn new(scope: TenantScope, source: S, registry: R) -> Self {
        Self {
            scope,
            source,
            registry,
            max_age: None,
        }
    }

    /// Treat forecasts generated longer than `max_age` before the read as stale.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn scope(&self) -> TenantScope {
        self.scope
    }

    /// Most recent forecast for the target date.
    ///
    /// A category-specific forecast wins over a site-wide one. Forecasts whose model is
    /// unknown or inactive are ignored, as are stale ones.
    pub fn get_forecast(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        category: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<Forecast>, ForecastError> {
        if !self.scope.allows(tenant_id) {
            return Err(ForecastError::TenantScope);
        }

        let candidates = self.source.forecasts_for(tenant_id, site_id, date)?;

        let best = candidates
            .into_iter()
            .filter(|f| f.tenant_id == tenant_id && f.site_id == site_id && f.forecast_date == date)
            .filter(|f| match &f.category {
                Some(c) => c == category,
                None => true,
            })
            .filter(|f| match self.max_age {
                Some(max_age) => now - f.generated_at <= max_age,
                None => true,
            })
            .max_by_key(|f| (f.category.is_some(), f.generated_at));

        let Some(demand) = best else {
            return Ok(None);
        };

        let Some(model) = self.registry.get(tenant_id, demand.model_id) else {
            return Ok(None);
        };
        if !model.is_active {
            return Ok(None);
        }

        Ok(Some(Forecast {
            model_confidence: model.confidence(),
            model_version: model.model_version,
            demand,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use boxprice_core::ModelId;
    use serde_json::Value as JsonValue;

    use super::*;
    use crate::model::{ModelKind, PricingModelLog};

    struct Source(Vec<DemandForecast>);

    impl ForecastSource for Source {
        fn forecasts_for(
            &self,
            _tenant_id: TenantId,
            _site_id: SiteId,
            _date: NaiveDate,
        ) -> Result<Vec<DemandForecast>, ForecastError> {
            Ok(self.0.clone())
        }
    }

    struct Registry(Vec<PricingModelLog>);

    impl ModelRegistry for Registry {
        fn get(&self, tenant_id: TenantId, model_id: ModelId) -> Option<PricingModelLog> {
            self.0
                .iter()
                .find(|m| m.tenant_id == tenant_id && m.id == model_id)
                .cloned()
        }

        fn active(&self, tenant_id: TenantId, kind: ModelKind) -> Option<PricingModelLog> {
            self.0
                .iter()
                .find(|m| m.tenant_id == tenant_id && m.kind == kind && m.is_active)
                .cloned()
        }
    }

    fn model(tenant: TenantId, active: bool) -> PricingModelLog {
        PricingModelLog {
            id: ModelId::new(),
            tenant_id: tenant,
            model_version: "2026.10".into(),
            kind: ModelKind::DemandPrediction,
            training_accuracy: None,
            validation_accuracy: Some(0.8),
            mae: None,
            rmse: None,
            hyperparameters: JsonValue::Null,
            feature_importance: BTreeMap::new(),
            training_samples: 100,
            is_active: active,
            trained_at: Utc::now(),
        }
    }

    fn forecast(
        tenant: TenantId,
        site: SiteId,
        model: &PricingModelLog,
        category: Option<&str>,
        generated_at: DateTime<Utc>,
        modifier: f64,
    ) -> DemandForecast {
        DemandForecast {
            tenant_id: tenant,
            site_id: site,
            category: category.map(str::to_string),
            forecast_date: date(),
            model_id: model.id,
            predicted_demand: 12.0,
            predicted_conversion: 0.3,
            confidence_lower: 9.0,
            confidence_upper: 15.0,
            recommended_price_modifier: modifier,
            factors: JsonValue::Null,
            generated_at,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
    }

    #[test]
    fn returns_most_recent_forecast_for_category() {
        let tenant = TenantId::new();
        let site = SiteId::new();
        let m = model(tenant, true);
        let now = Utc::now();
        let older = forecast(tenant, site, &m, Some("small"), now - Duration::hours(5), 1.02);
        let newer = forecast(tenant, site, &m, Some("small"), now - Duration::hours(1), 1.07);
        let site_wide = forecast(tenant, site, &m, None, now, 0.95);
        let other = forecast(tenant, site, &m, Some("large"), now, 1.30);

        let consumer = ForecastConsumer::new(
            TenantScope::Any,
            Source(vec![older, newer, site_wide, other]),
            Registry(vec![m]),
        );

        let got = consumer
            .get_forecast(tenant, site, "small", date(), now)
            .unwrap()
            .unwrap();
        assert_eq!(got.price_modifier(), 1.07);
        assert_eq!(got.model_confidence, 0.8);
        assert_eq!(got.model_version, "2026.10");
    }

    #[test]
    fn falls_back_to_site_wide_forecast() {
        let tenant = TenantId::new();
        let site = SiteId::new();
        let m = model(tenant, true);
        let now = Utc::now();
        let site_wide = forecast(tenant, site, &m, None, now, 0.95);

        let consumer =
            ForecastConsumer::new(TenantScope::Any, Source(vec![site_wide]), Registry(vec![m]));

        let got = consumer.get_forecast(tenant, site, "xl", date(), now).unwrap();
        assert_eq!(got.map(|f| f.price_modifier()), Some(0.95));
    }

    #[test]
    fn inactive_model_yields_none() {
        let tenant = TenantId::new();
        let site = SiteId::new();
        let m = model(tenant, false);
        let now = Utc::now();
        let f = forecast(tenant, site, &m, Some("small"), now, 1.1);

        let consumer = ForecastConsumer::new(TenantScope::Any, Source(vec![f]), Registry(vec![m]));

        assert_eq!(consumer.get_forecast(tenant, site, "small", date(), now).unwrap(), None);
    }

    #[test]
    fn stale_forecast_yields_none() {
        let tenant = TenantId::new();
        let site = SiteId::new();
        let m = model(tenant, true);
        let now = Utc::now();
        let f = forecast(tenant, site, &m, Some("small"), now - Duration::days(3), 1.1);

        let consumer = ForecastConsumer::new(TenantScope::Any, Source(vec![f]), Registry(vec![m]))
            .with_max_age(Duration::days(1));

        assert_eq!(consumer.get_forecast(tenant, site, "small", date(), now).unwrap(), None);
    }

    #[test]
    fn missing_forecast_is_none_not_synthesized() {
        let tenant = TenantId::new();
        let consumer = ForecastConsumer::new(TenantScope::Any, Source(vec![]), Registry(vec![]));
        let got = consumer
            .get_forecast(tenant, SiteId::new(), "small", date(), Utc::now())
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn scope_rejects_foreign_tenant() {
        let tenant = TenantId::new();
        let consumer = ForecastConsumer::new(
            TenantScope::Tenant(tenant),
            Source(vec![]),
            Registry(vec![]),
        );
        let err = consumer
            .get_forecast(TenantId::new(), SiteId::new(), "small", date(), Utc::now())
            .unwrap_err();
        assert_eq!(err, ForecastError::TenantScope);
    }
}
