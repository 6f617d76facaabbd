use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{ExperimentId, Money, TenantId, UnitId};

/// One visitor's assignment to a variant, keyed by (experiment, visitor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentExposure {
    pub experiment_id: ExperimentId,
    pub tenant_id: TenantId,
    pub visitor_id: String,
    pub variant: String,
    pub unit_id: Option<UnitId>,
    pub price_shown: Money,
    pub exposed_at: DateTime<Utc>,
    pub converted: bool,
    pub converted_at: Option<DateTime<Utc>>,
    pub revenue: Option<Money>,
}

impl ExperimentExposure {
    pub fn new(
        experiment_id: ExperimentId,
        tenant_id: TenantId,
        visitor_id: impl Into<String>,
        variant: impl Into<String>,
        unit_id: Option<UnitId>,
        price_shown: Money,
        exposed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            experiment_id,
            tenant_id,
            visitor_id: visitor_id.into(),
            variant: variant.into(),
            unit_id,
            price_shown,
            exposed_at,
            converted: false,
            converted_at: None,
            revenue: None,
        }
    }

    /// Returns `false` when the conversion was already recorded; the first one wins.
    pub fn record_conversion(&mut self, revenue: Money, at: DateTime<Utc>) -> bool {
        if self.converted {
            return false;
        }
        self.converted = true;
        self.converted_at = Some(at);
        self.revenue = Some(revenue);
        true
    }
}
