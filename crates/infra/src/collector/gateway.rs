use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use boxprice_core::{Money, SiteId, TenantId};
use boxprice_pricing::{CompetitorPriceObservation, ObservationSource};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("competitor source timed out after {0:?}")]
    Timeout(Duration),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// External source of competitor rates. The only network-bound dependency of the engine.
#[async_trait]
pub trait CompetitorGateway: Send + Sync {
    async fn fetch_rates(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CompetitorPriceObservation>, GatewayError>;
}

/// Rates service speaking JSON over HTTP:
/// `GET {base}/sites/{site}/competitor-rates?category=..` with an `x-tenant-id` header.
pub struct HttpCompetitorGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpCompetitorGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: Vec<RateRow>,
}

/// Prices in major currency units.
#[derive(Debug, Deserialize)]
struct RateRow {
    competitor_name: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    distance_km: Option<f64>,
    #[serde(default)]
    size_m2: Option<f64>,
    monthly_price: f64,
    #[serde(default)]
    weekly_price: Option<f64>,
    #[serde(default)]
    has_promotion: bool,
    #[serde(default)]
    promotion_details: Option<String>,
    #[serde(default)]
    collected_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl CompetitorGateway for HttpCompetitorGateway {
    async fn fetch_rates(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CompetitorPriceObservation>, GatewayError> {
        let url = format!("{}/sites/{}/competitor-rates", self.base_url, site_id);

        let resp = self
            .client
            .get(&url)
            .query(&[("category", category)])
            .header("x-tenant-id", tenant_id.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout)
                } else {
                    GatewayError::Network(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(GatewayError::BadResponse(format!(
                "competitor source returned {}",
                resp.status()
            )));
        }

        let body: RatesResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        Ok(body
            .rates
            .into_iter()
            .filter(|r| r.monthly_price.is_finite() && r.monthly_price > 0.0 && !r.competitor_name.trim().is_empty())
            .map(|r| CompetitorPriceObservation {
                tenant_id,
                site_id,
                category: category.to_string(),
                competitor_name: r.competitor_name,
                competitor_location: r.location,
                distance_km: r.distance_km,
                size_m2: r.size_m2,
                monthly_price: Money::from_major(r.monthly_price),
                weekly_price: r.weekly_price.filter(|p| p.is_finite() && *p > 0.0).map(Money::from_major),
                has_promotion: r.has_promotion,
                promotion_details: r.promotion_details,
                source: ObservationSource::Api,
                collected_at: r.collected_at.unwrap_or(now),
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Gateway double replaying canned results, optionally after a delay.
    #[derive(Default)]
    pub struct ScriptedGateway {
        results: Mutex<VecDeque<Result<Vec<f64>, GatewayError>>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedGateway {
        pub fn new(results: Vec<Result<Vec<f64>, GatewayError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                ..Self::default()
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompetitorGateway for ScriptedGateway {
        async fn fetch_rates(
            &self,
            tenant_id: TenantId,
            site_id: SiteId,
            category: &str,
            now: DateTime<Utc>,
        ) -> Result<Vec<CompetitorPriceObservation>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::BadResponse("script exhausted".into())));
            next.map(|prices| {
                prices
                    .into_iter()
                    .enumerate()
                    .map(|(i, price)| CompetitorPriceObservation {
                        tenant_id,
                        site_id,
                        category: category.to_string(),
                        competitor_name: format!("competitor-{i}"),
                        competitor_location: None,
                        distance_km: None,
                        size_m2: None,
                        monthly_price: Money::from_major(price),
                        weekly_price: None,
                        has_promotion: false,
                        promotion_details: None,
                        source: ObservationSource::Api,
                        collected_at: now,
                    })
                    .collect()
            })
        }
    }
}
