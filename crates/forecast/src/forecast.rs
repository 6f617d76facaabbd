use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use boxprice_core::{ModelId, SiteId, TenantId};

/// Externally produced demand prediction for a site (and optionally a unit category) on a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandForecast {
    pub tenant_id: TenantId,
    pub site_id: SiteId,
    /// `None` means the forecast covers every category of the site.
    pub category: Option<String>,
    pub forecast_date: NaiveDate,
    pub model_id: ModelId,

    /// Expected number of inquiries.
    pub predicted_demand: f64,
    /// Expected conversion rate in \[0, 1\].
    pub predicted_conversion: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,

    /// Multiplier over base price the model recommends.
    pub recommended_price_modifier: f64,
    /// What drove the prediction (opaque, kept for explainability).
    #[serde(default)]
    pub factors: JsonValue,

    pub generated_at: DateTime<Utc>,
}

/// A forecast joined with the active model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub demand: DemandForecast,
    pub model_version: String,
    /// Model confidence in \[0, 1\]; the evaluator's blend weight.
    pub model_confidence: f64,
}

impl Forecast {
    pub fn price_modifier(&self) -> f64 {
        self.demand.recommended_price_modifier
    }

    /// Relative width of the prediction interval around the point estimate.
    pub fn interval_width(&self) -> f64 {
        if self.demand.predicted_demand <= 0.0 {
            return 0.0;
        }
        (self.demand.confidence_upper - self.demand.confidence_lower) / self.demand.predicted_demand
    }
}
