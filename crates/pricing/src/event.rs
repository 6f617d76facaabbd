//! Facts published on the event bus for the alert feed and external dispatchers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{AggregateId, AlertId, RecommendationId, UnitId, UserId};
use boxprice_events::Event;

use crate::adjustment::PriceAdjustment;
use crate::alert::PricingAlert;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PricingEvent {
    AdjustmentApplied {
        adjustment: PriceAdjustment,
    },
    RecommendationRejected {
        recommendation_id: RecommendationId,
        unit_id: UnitId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    RecommendationExpired {
        recommendation_id: RecommendationId,
        unit_id: UnitId,
        occurred_at: DateTime<Utc>,
    },
    AlertRaised {
        alert: PricingAlert,
    },
    AlertAcknowledged {
        alert_id: AlertId,
        by: UserId,
        occurred_at: DateTime<Utc>,
    },
    AlertResolved {
        alert_id: AlertId,
        by: UserId,
        occurred_at: DateTime<Utc>,
    },
}

impl PricingEvent {
    /// Subject of the event and its kind, for the envelope.
    pub fn subject(&self) -> (AggregateId, &'static str) {
        match self {
            PricingEvent::AdjustmentApplied { adjustment } => {
                (AggregateId::from_uuid(*adjustment.unit_id.as_uuid()), "pricing.unit")
            }
            PricingEvent::RecommendationRejected { unit_id, .. }
            | PricingEvent::RecommendationExpired { unit_id, .. } => {
                (AggregateId::from_uuid(*unit_id.as_uuid()), "pricing.unit")
            }
            PricingEvent::AlertRaised { alert } => {
                (AggregateId::from_uuid(*alert.id.as_uuid()), "pricing.alert")
            }
            PricingEvent::AlertAcknowledged { alert_id, .. }
            | PricingEvent::AlertResolved { alert_id, .. } => {
                (AggregateId::from_uuid(*alert_id.as_uuid()), "pricing.alert")
            }
        }
    }
}

impl Event for PricingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PricingEvent::AdjustmentApplied { .. } => "pricing.adjustment.applied",
            PricingEvent::RecommendationRejected { .. } => "pricing.recommendation.rejected",
            PricingEvent::RecommendationExpired { .. } => "pricing.recommendation.expired",
            PricingEvent::AlertRaised { .. } => "pricing.alert.raised",
            PricingEvent::AlertAcknowledged { .. } => "pricing.alert.acknowledged",
            PricingEvent::AlertResolved { .. } => "pricing.alert.resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PricingEvent::AdjustmentApplied { adjustment } => adjustment.created_at,
            PricingEvent::AlertRaised { alert } => alert.created_at,
            PricingEvent::RecommendationRejected { occurred_at, .. }
            | PricingEvent::RecommendationExpired { occurred_at, .. }
            | PricingEvent::AlertAcknowledged { occurred_at, .. }
            | PricingEvent::AlertResolved { occurred_at, .. } => *occurred_at,
        }
    }
}
