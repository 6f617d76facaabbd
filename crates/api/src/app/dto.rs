use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};

use boxprice_core::{Money, SiteId, TenantId, UnitId};
use boxprice_experiments::PricingExperiment;
use boxprice_infra::CycleReport;
use boxprice_pricing::{StrategyRevision, UnitRecord, UnitStatus};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Unit as synced from the platform. The engine keeps its own price fields on updates.
#[derive(Debug, Deserialize)]
pub struct UpsertUnitRequest {
    pub site_id: SiteId,
    pub category: String,
    pub base_price: Option<Money>,
    #[serde(default)]
    pub current_price: Option<Money>,
    pub status: UnitStatus,
}

impl UpsertUnitRequest {
    pub fn into_record(self, tenant_id: TenantId, unit_id: UnitId) -> UnitRecord {
        UnitRecord {
            id: unit_id,
            tenant_id,
            site_id: self.site_id,
            category: self.category,
            base_price: self.base_price,
            current_price: self.current_price.or(self.base_price).unwrap_or_default(),
            status: self.status,
            anchor_price: None,
            version: 0,
            price_changed_at: None,
            last_auto_adjusted_at: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CollectRequest {
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub category: String,
    pub date: NaiveDate,
}

#[derive(Debug, Default, Deserialize)]
pub struct SiteFilter {
    pub site_id: Option<SiteId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteQuery {
    pub visitor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub price: Money,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct VisitorRequest {
    pub visitor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ConversionRequest {
    pub visitor_id: String,
    pub revenue: Money,
}

#[derive(Debug, Deserialize)]
pub struct MetricsRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchRunRequest {
    /// Sites to price; every site of the tenant when omitted.
    #[serde(default)]
    pub site_ids: Option<Vec<SiteId>>,
    /// Overrides the configured auto-apply for this run.
    #[serde(default)]
    pub auto_apply: Option<bool>,
}

/// Deserialize a tenant-owned record from a body that omits (or misstates) the tenant.
///
/// `defaults` fill fields the caller may leave out, e.g. `collected_at`.
pub fn with_tenant<T: DeserializeOwned>(
    mut body: JsonValue,
    tenant_id: TenantId,
    defaults: &[(&str, JsonValue)],
) -> Result<T, axum::response::Response> {
    let Some(obj) = body.as_object_mut() else {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "request body must be a JSON object",
        ));
    };
    obj.insert("tenant_id".to_string(), json!(tenant_id));
    for (key, value) in defaults {
        if !obj.contains_key(*key) {
            obj.insert((*key).to_string(), value.clone());
        }
    }
    serde_json::from_value(body)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

pub fn now_json(now: DateTime<Utc>) -> JsonValue {
    json!(now)
}

// -------------------------
// Response mapping
// -------------------------

pub fn experiment_to_json(experiment: &PricingExperiment) -> JsonValue {
    json!({
        "id": experiment.experiment_id(),
        "name": experiment.name(),
        "description": experiment.description(),
        "site_id": experiment.site_id(),
        "status": experiment.status(),
        "variants": experiment.variants(),
        "traffic_percentage": experiment.traffic_percentage(),
        "min_sample_size": experiment.min_sample_size(),
        "confidence_level": experiment.confidence_level(),
        "duration_days": experiment.duration_days(),
        "created_at": experiment.created_at(),
        "started_at": experiment.started_at(),
        "ended_at": experiment.ended_at(),
        "scheduled_end": experiment.scheduled_end(),
        "outcome": experiment.outcome(),
    })
}

pub fn revision_to_json(revision: &StrategyRevision) -> JsonValue {
    json!({
        "strategy": revision.strategy(),
        "new_version": matches!(revision, StrategyRevision::NewVersion(_)),
    })
}

pub fn cycle_report_to_json(report: &CycleReport) -> JsonValue {
    json!({
        "summary": {
            "evaluated": report.evaluated(),
            "unchanged": report.unchanged(),
            "recommended": report.recommended(),
            "applied": report.applied(),
            "skipped": report.skipped(),
            "rejected": report.rejected(),
            "stale": report.stale(),
            "failed": report.failed(),
            "failed_sites": report.failed_sites(),
        },
        "report": report,
    })
}

#[cfg(test)]
mod tests {
    use boxprice_pricing::CompetitorPriceObservation;

    use super::*;

    #[test]
    fn tenant_comes_from_context_not_body() {
        let tenant = TenantId::new();
        let other = TenantId::new();
        let site = SiteId::new();
        let now: DateTime<Utc> = "2026-10-19T08:00:00Z".parse().unwrap();

        let obs: CompetitorPriceObservation = with_tenant(
            json!({
                "tenant_id": other,
                "site_id": site,
                "category": "small",
                "competitor_name": "StoreMore",
                "monthly_price": 19_500,
                "source": "manual",
            }),
            tenant,
            &[("collected_at", now_json(now))],
        )
        .unwrap();
        assert_eq!(obs.tenant_id, tenant);
        assert_eq!(obs.collected_at, now);

        assert!(with_tenant::<CompetitorPriceObservation>(json!([1, 2]), tenant, &[]).is_err());
    }

    #[test]
    fn new_units_start_at_their_base_price() {
        let req: UpsertUnitRequest = serde_json::from_value(json!({
            "site_id": SiteId::new(),
            "category": "small",
            "base_price": 20_000,
            "status": "available",
        }))
        .unwrap();
        let unit = req.into_record(TenantId::new(), UnitId::new());
        assert_eq!(unit.current_price, Money::from_cents(20_000));
        assert_eq!(unit.version, 0);
    }
}
