use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use boxprice_core::{ModelId, TenantId};

/// What an externally trained model predicts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    DemandPrediction,
    PriceOptimization,
    ChurnRisk,
}

/// Training log entry written by the external pipeline (one per trained model version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingModelLog {
    pub id: ModelId,
    pub tenant_id: TenantId,
    pub model_version: String,
    pub kind: ModelKind,

    pub training_accuracy: Option<f64>,
    pub validation_accuracy: Option<f64>,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,

    #[serde(default)]
    pub hyperparameters: JsonValue,
    #[serde(default)]
    pub feature_importance: BTreeMap<String, f64>,
    pub training_samples: u64,

    pub is_active: bool,
    pub trained_at: DateTime<Utc>,
}

impl PricingModelLog {
    /// Confidence in \[0, 1\] the engine assigns to this model's output.
    ///
    /// Validation accuracy when reported, else training accuracy, else zero
    /// (a model without metrics never clears the ML blending threshold).
    pub fn confidence(&self) -> f64 {
        self.validation_accuracy
            .or(self.training_accuracy)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }

    /// Features ordered by descending importance.
    pub fn top_features(&self, n: usize) -> Vec<(&str, f64)> {
        let mut features: Vec<(&str, f64)> = self
            .feature_importance
            .iter()
            .map(|(name, weight)| (name.as_str(), *weight))
            .collect();
        features.sort_by(|a, b| b.1.total_cmp(&a.1));
        features.truncate(n);
        features
    }
}

/// Lookup of model metadata produced by the training pipeline.
///
/// Implementations are read-only and must not block on network IO.
pub trait ModelRegistry: Send + Sync {
    fn get(&self, tenant_id: TenantId, model_id: ModelId) -> Option<PricingModelLog>;

    /// The single active model of `kind` for a tenant, if any.
    fn active(&self, tenant_id: TenantId, kind: ModelKind) -> Option<PricingModelLog>;
}

impl<T: ModelRegistry + ?Sized> ModelRegistry for std::sync::Arc<T> {
    fn get(&self, tenant_id: TenantId, model_id: ModelId) -> Option<PricingModelLog> {
        (**self).get(tenant_id, model_id)
    }

    fn active(&self, tenant_id: TenantId, kind: ModelKind) -> Option<PricingModelLog> {
        (**self).active(tenant_id, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> PricingModelLog {
        PricingModelLog {
            id: ModelId::new(),
            tenant_id: TenantId::new(),
            model_version: "v3".into(),
            kind: ModelKind::DemandPrediction,
            training_accuracy: Some(0.91),
            validation_accuracy: None,
            mae: None,
            rmse: None,
            hyperparameters: JsonValue::Null,
            feature_importance: BTreeMap::from([
                ("occupancy".to_string(), 0.4),
                ("season".to_string(), 0.25),
                ("weekday".to_string(), 0.1),
            ]),
            training_samples: 5_000,
            is_active: true,
            trained_at: Utc::now(),
        }
    }

    #[test]
    fn confidence_prefers_validation_accuracy() {
        let mut m = log();
        assert_eq!(m.confidence(), 0.91);
        m.validation_accuracy = Some(0.72);
        assert_eq!(m.confidence(), 0.72);
        m.validation_accuracy = None;
        m.training_accuracy = None;
        assert_eq!(m.confidence(), 0.0);
    }

    #[test]
    fn top_features_are_sorted_by_weight() {
        let m = log();
        let top = m.top_features(2);
        assert_eq!(top, vec![("occupancy", 0.4), ("season", 0.25)]);
    }
}
