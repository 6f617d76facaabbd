//! Experiment Manager: lifecycle commands, visitor assignment, exposures and evaluation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use boxprice_core::{DomainError, ExperimentId, Money, SiteId, TenantId, UnitId};
use boxprice_experiments::{
    CompleteExperiment, CreateExperiment, ExperimentCommand, ExperimentDefinition, ExperimentExposure,
    ExperimentOutcome, PricingExperiment, TransitionExperiment, Variant, VariantStats,
};
use boxprice_pricing::PriceBounds;

use crate::error::{EngineError, EngineResult};
use crate::events::EventPublisher;
use crate::store::{ExperimentStore, ExposureStore};

/// Variant price shown to a visitor, with the stored exposure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedVariant {
    pub experiment_id: ExperimentId,
    pub variant: String,
    pub price: Money,
    pub exposure: ExperimentExposure,
}

pub struct ExperimentService {
    experiments: Arc<ExperimentStore>,
    exposures: Arc<ExposureStore>,
    publisher: EventPublisher,
}

impl ExperimentService {
    pub fn new(experiments: Arc<ExperimentStore>, exposures: Arc<ExposureStore>, publisher: EventPublisher) -> Self {
        Self {
            experiments,
            exposures,
            publisher,
        }
    }

    /// Validate and store a draft. Bad weights or traffic never produce an experiment.
    pub fn create(
        &self,
        tenant_id: TenantId,
        definition: ExperimentDefinition,
        now: DateTime<Utc>,
    ) -> EngineResult<PricingExperiment> {
        let experiment_id = ExperimentId::new();
        let command = ExperimentCommand::Create(CreateExperiment {
            tenant_id,
            experiment_id,
            definition,
            occurred_at: now,
        });
        let experiment = self.execute(tenant_id, experiment_id, &command)?;
        info!(tenant = %tenant_id, experiment = %experiment_id, name = experiment.name(), "experiment created");
        Ok(experiment)
    }

    pub fn start(&self, tenant_id: TenantId, experiment_id: ExperimentId, now: DateTime<Utc>) -> EngineResult<PricingExperiment> {
        self.execute(
            tenant_id,
            experiment_id,
            &ExperimentCommand::Start(transition(tenant_id, experiment_id, now)),
        )
    }

    pub fn pause(&self, tenant_id: TenantId, experiment_id: ExperimentId, now: DateTime<Utc>) -> EngineResult<PricingExperiment> {
        self.execute(
            tenant_id,
            experiment_id,
            &ExperimentCommand::Pause(transition(tenant_id, experiment_id, now)),
        )
    }

    pub fn resume(&self, tenant_id: TenantId, experiment_id: ExperimentId, now: DateTime<Utc>) -> EngineResult<PricingExperiment> {
        self.execute(
            tenant_id,
            experiment_id,
            &ExperimentCommand::Resume(transition(tenant_id, experiment_id, now)),
        )
    }

    pub fn cancel(&self, tenant_id: TenantId, experiment_id: ExperimentId, now: DateTime<Utc>) -> EngineResult<PricingExperiment> {
        self.execute(
            tenant_id,
            experiment_id,
            &ExperimentCommand::Cancel(transition(tenant_id, experiment_id, now)),
        )
    }

    /// Evaluate over the recorded exposures and freeze the outcome.
    #[instrument(skip(self, tenant_id, now), fields(tenant = %tenant_id, experiment = %experiment_id))]
    pub fn complete(
        &self,
        tenant_id: TenantId,
        experiment_id: ExperimentId,
        now: DateTime<Utc>,
    ) -> EngineResult<PricingExperiment> {
        let outcome = self.evaluate(tenant_id, experiment_id, now)?;
        let experiment = self.execute(
            tenant_id,
            experiment_id,
            &ExperimentCommand::Complete(CompleteExperiment {
                tenant_id,
                experiment_id,
                outcome,
                occurred_at: now,
            }),
        )?;
        info!(
            decision = ?experiment.outcome().map(|o| o.decision),
            winner = ?experiment.outcome().and_then(|o| o.winning_variant.as_deref()),
            "experiment completed"
        );
        Ok(experiment)
    }

    /// Current significance result; the frozen one once completed.
    pub fn evaluate(
        &self,
        tenant_id: TenantId,
        experiment_id: ExperimentId,
        now: DateTime<Utc>,
    ) -> EngineResult<ExperimentOutcome> {
        let experiment = self.get(tenant_id, experiment_id)?;
        let exposures = self.exposures.list(tenant_id, experiment_id)?;
        let stats = VariantStats::tally(experiment.variants(), &exposures);
        Ok(experiment.evaluate(stats, now))
    }

    pub fn get(&self, tenant_id: TenantId, experiment_id: ExperimentId) -> EngineResult<PricingExperiment> {
        self.experiments
            .get(tenant_id, experiment_id)?
            .ok_or_else(|| EngineError::not_found(format!("experiment {experiment_id}")))
    }

    pub fn list(&self, tenant_id: TenantId) -> EngineResult<Vec<PricingExperiment>> {
        Ok(self.experiments.list(tenant_id)?)
    }

    /// Variant for a visitor, `None` when the visitor falls outside the traffic share.
    /// Pure hash, no write.
    pub fn assign(
        &self,
        tenant_id: TenantId,
        experiment_id: ExperimentId,
        visitor_id: &str,
    ) -> EngineResult<Option<Variant>> {
        let experiment = self.get(tenant_id, experiment_id)?;
        Ok(experiment.assign(visitor_id)?.cloned())
    }

    /// Earliest-started running experiment covering the site.
    pub fn running_for_site(&self, tenant_id: TenantId, site_id: SiteId) -> EngineResult<Option<PricingExperiment>> {
        Ok(self
            .experiments
            .list(tenant_id)?
            .into_iter()
            .filter(|e| e.is_running() && e.applies_to_site(site_id))
            .min_by_key(|e| (e.started_at(), e.experiment_id())))
    }

    /// Assign the visitor and store the exposure at the variant price, clamped to `bounds`.
    ///
    /// A visitor already exposed keeps the first exposure record.
    #[instrument(skip(self, tenant_id, price, bounds, now), fields(tenant = %tenant_id, experiment = %experiment_id))]
    pub fn record_exposure(
        &self,
        tenant_id: TenantId,
        experiment_id: ExperimentId,
        visitor_id: &str,
        unit_id: Option<UnitId>,
        price: Money,
        bounds: PriceBounds,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<AssignedVariant>> {
        if visitor_id.trim().is_empty() {
            return Err(DomainError::validation("visitor_id cannot be empty").into());
        }
        let experiment = self.get(tenant_id, experiment_id)?;
        let Some(variant) = experiment.assign(visitor_id)? else {
            debug!("visitor outside experiment traffic");
            return Ok(None);
        };
        let shown = variant.price_for(price, bounds.floor, bounds.ceiling);
        let exposure = self.exposures.expose(ExperimentExposure::new(
            experiment_id,
            tenant_id,
            visitor_id,
            &variant.name,
            unit_id,
            shown,
            now,
        ))?;
        Ok(Some(AssignedVariant {
            experiment_id,
            variant: variant.name.clone(),
            price: shown,
            exposure,
        }))
    }

    /// Idempotent: the first conversion of a visitor wins.
    #[instrument(skip(self, tenant_id, revenue, now), fields(tenant = %tenant_id, experiment = %experiment_id))]
    pub fn record_conversion(
        &self,
        tenant_id: TenantId,
        experiment_id: ExperimentId,
        visitor_id: &str,
        revenue: Money,
        now: DateTime<Utc>,
    ) -> EngineResult<ExperimentExposure> {
        if revenue.cents() < 0 {
            return Err(DomainError::validation("conversion revenue cannot be negative").into());
        }
        let (exposure, changed) = self
            .exposures
            .record_conversion(tenant_id, experiment_id, visitor_id, revenue, now)?;
        if !changed {
            debug!("duplicate conversion ignored");
        }
        Ok(exposure)
    }

    pub fn exposures(&self, tenant_id: TenantId, experiment_id: ExperimentId) -> EngineResult<Vec<ExperimentExposure>> {
        Ok(self.exposures.list(tenant_id, experiment_id)?)
    }

    fn execute(
        &self,
        tenant_id: TenantId,
        experiment_id: ExperimentId,
        command: &ExperimentCommand,
    ) -> EngineResult<PricingExperiment> {
        let (experiment, events) = self.experiments.execute(tenant_id, experiment_id, command)?;
        for event in events {
            self.publisher.experiment(tenant_id, event);
        }
        Ok(experiment)
    }
}

fn transition(tenant_id: TenantId, experiment_id: ExperimentId, now: DateTime<Utc>) -> TransitionExperiment {
    TransitionExperiment {
        tenant_id,
        experiment_id,
        occurred_at: now,
    }
}

#[cfg(test)]
mod tests {
    use boxprice_events::EventBus;
    use boxprice_experiments::{ExperimentError, ExperimentStatus, OutcomeDecision};

    use super::*;

    fn service() -> ExperimentService {
        ExperimentService::new(
            Arc::new(ExperimentStore::new()),
            Arc::new(ExposureStore::new()),
            EventPublisher::default(),
        )
    }

    fn definition(traffic: f64) -> ExperimentDefinition {
        serde_json::from_value(serde_json::json!({
            "name": "winter promo",
            "variants": [
                { "name": "control", "weight": 0.5, "price_modifier": 1.0 },
                { "name": "premium", "weight": 0.5, "price_modifier": 1.1 }
            ],
            "traffic_percentage": traffic,
            "min_sample_size": 10
        }))
        .unwrap()
    }

    fn bounds() -> PriceBounds {
        PriceBounds::for_base(Money::from_major(200.0), 0.8, 1.5)
    }

    #[test]
    fn lifecycle_publishes_every_transition() {
        let service = service();
        let feed = service.publisher.bus().subscribe();
        let tenant = TenantId::new();
        let now = Utc::now();

        let experiment = service.create(tenant, definition(100.0), now).unwrap();
        let id = experiment.experiment_id();
        assert_eq!(experiment.status(), ExperimentStatus::Draft);
        assert!(matches!(
            service.assign(tenant, id, "visitor-1"),
            Err(EngineError::Experiment(ExperimentError::NotRunning(ExperimentStatus::Draft)))
        ));

        service.start(tenant, id, now).unwrap();
        service.pause(tenant, id, now).unwrap();
        service.resume(tenant, id, now).unwrap();
        let done = service.complete(tenant, id, now).unwrap();
        assert_eq!(done.status(), ExperimentStatus::Completed);
        assert_eq!(
            done.outcome().map(|o| o.decision),
            Some(OutcomeDecision::InsufficientData)
        );
        assert!(service.cancel(tenant, id, now).is_err());

        let types: Vec<String> = std::iter::from_fn(|| feed.try_recv().ok())
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(types.len(), 5);
    }

    #[test]
    fn invalid_definition_never_creates_an_experiment() {
        let service = service();
        let tenant = TenantId::new();
        let err = service.create(tenant, definition(120.0), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "experiment_configuration_error");
        assert!(service.list(tenant).unwrap().is_empty());
    }

    #[test]
    fn exposure_is_idempotent_and_clamped() {
        let service = service();
        let tenant = TenantId::new();
        let now = Utc::now();
        let id = service.create(tenant, definition(100.0), now).unwrap().experiment_id();
        service.start(tenant, id, now).unwrap();

        let ceiling_price = Money::from_major(290.0);
        let first = service
            .record_exposure(tenant, id, "visitor-42", None, ceiling_price, bounds(), now)
            .unwrap()
            .unwrap();
        let again = service
            .record_exposure(tenant, id, "visitor-42", None, ceiling_price, bounds(), now)
            .unwrap()
            .unwrap();
        assert_eq!(first.variant, again.variant);
        assert_eq!(first.exposure, again.exposure);
        assert!(first.price <= Money::from_major(300.0));
        if first.variant == "premium" {
            assert_eq!(first.price, Money::from_major(300.0));
        }
        assert_eq!(service.exposures(tenant, id).unwrap().len(), 1);

        let converted = service
            .record_conversion(tenant, id, "visitor-42", Money::from_major(290.0), now)
            .unwrap();
        assert!(converted.converted);
        assert!(service
            .record_conversion(tenant, id, "visitor-42", Money::from_cents(-1), now)
            .is_err());
    }

    #[test]
    fn zero_traffic_exposes_nobody() {
        let service = service();
        let tenant = TenantId::new();
        let now = Utc::now();
        let id = service.create(tenant, definition(0.0), now).unwrap().experiment_id();
        service.start(tenant, id, now).unwrap();

        for i in 0..100 {
            let visitor = format!("visitor-{i}");
            assert!(service
                .record_exposure(tenant, id, &visitor, None, Money::from_major(200.0), bounds(), now)
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn running_experiment_is_found_for_its_sites_only() {
        let service = service();
        let tenant = TenantId::new();
        let site = SiteId::new();
        let now = Utc::now();
        let mut scoped = definition(100.0);
        scoped.site_id = Some(site);
        let id = service.create(tenant, scoped, now).unwrap().experiment_id();
        assert!(service.running_for_site(tenant, site).unwrap().is_none());

        service.start(tenant, id, now).unwrap();
        assert_eq!(
            service.running_for_site(tenant, site).unwrap().map(|e| e.experiment_id()),
            Some(id)
        );
        assert!(service.running_for_site(tenant, SiteId::new()).unwrap().is_none());
        assert!(service.running_for_site(TenantId::new(), site).unwrap().is_none());
    }
}
