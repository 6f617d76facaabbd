//! Facts the engine publishes on the in-process bus (alert feed, SSE, dispatchers).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use boxprice_core::{AggregateId, TenantId};
use boxprice_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};
use boxprice_experiments::ExperimentEvent;
use boxprice_pricing::PricingEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Pricing(PricingEvent),
    Experiment(ExperimentEvent),
}

impl Event for EngineEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::Pricing(e) => e.event_type(),
            EngineEvent::Experiment(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            EngineEvent::Pricing(e) => e.version(),
            EngineEvent::Experiment(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::Pricing(e) => e.occurred_at(),
            EngineEvent::Experiment(e) => e.occurred_at(),
        }
    }
}

pub type EngineBus = InMemoryEventBus<EventEnvelope<EngineEvent>>;

/// Publishes already-persisted facts. Bus failures are logged, never propagated.
#[derive(Clone, Default)]
pub struct EventPublisher {
    bus: Arc<EngineBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<EngineBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> Arc<EngineBus> {
        self.bus.clone()
    }

    pub fn pricing(&self, tenant_id: TenantId, event: PricingEvent) {
        let (subject_id, subject_type) = event.subject();
        self.publish(tenant_id, subject_id, subject_type, EngineEvent::Pricing(event));
    }

    pub fn experiment(&self, tenant_id: TenantId, event: ExperimentEvent) {
        let subject_id = AggregateId::from_uuid(*event.experiment_id().as_uuid());
        self.publish(tenant_id, subject_id, "experiments.experiment", EngineEvent::Experiment(event));
    }

    fn publish(&self, tenant_id: TenantId, subject_id: AggregateId, subject_type: &str, event: EngineEvent) {
        let envelope = EventEnvelope::wrap(tenant_id, subject_id, subject_type, event);
        let event_type = envelope.event_type().to_string();
        if let Err(e) = self.bus.publish(envelope) {
            warn!(tenant = %tenant_id, event_type, error = ?e, "event publish failed");
        }
    }
}
