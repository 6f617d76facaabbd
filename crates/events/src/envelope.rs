use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use boxprice_core::{AggregateId, TenantId};

use crate::event::Event;

/// Envelope for an event, carrying tenant + subject metadata.
///
/// `subject_id` identifies what the event is about (unit, alert, experiment) and
/// `subject_type` names its kind, e.g. `"pricing.unit"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    subject_id: AggregateId,
    subject_type: String,

    event_type: String,
    recorded_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        subject_id: AggregateId,
        subject_type: impl Into<String>,
        event_type: impl Into<String>,
        recorded_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            subject_id,
            subject_type: subject_type.into(),
            event_type: event_type.into(),
            recorded_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn subject_id(&self) -> AggregateId {
        self.subject_id
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap an event, taking type name and timestamp from the event itself.
    pub fn wrap(
        tenant_id: TenantId,
        subject_id: AggregateId,
        subject_type: impl Into<String>,
        payload: E,
    ) -> Self {
        Self::new(
            Uuid::now_v7(),
            tenant_id,
            subject_id,
            subject_type,
            payload.event_type(),
            payload.occurred_at(),
            payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        at: DateTime<Utc>,
    }

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            "test.ping"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn wrap_copies_type_and_time_from_event() {
        let at = Utc::now();
        let tenant = TenantId::new();
        let env = EventEnvelope::wrap(tenant, AggregateId::new(), "test.subject", Ping { at });

        assert_eq!(env.event_type(), "test.ping");
        assert_eq!(env.recorded_at(), at);
        assert_eq!(env.tenant_id(), tenant);
        assert_eq!(env.subject_type(), "test.subject");
    }

    #[test]
    fn envelope_json_carries_tenant_and_payload() {
        let at = Utc::now();
        let tenant = TenantId::new();
        let env = EventEnvelope::wrap(tenant, AggregateId::new(), "test.subject", Ping { at });

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["tenant_id"], serde_json::json!(tenant.to_string()));
        assert_eq!(json["event_type"], "test.ping");
        assert!(json["payload"]["at"].is_string());

        let back: EventEnvelope<Ping> = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }
}
