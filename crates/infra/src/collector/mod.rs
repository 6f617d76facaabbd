//! Market Data Collector: turns units, stored observations and the competitor gateway into
//! canonical per-site, per-category snapshots.

mod gateway;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, warn};

use boxprice_core::{DomainError, SiteId, TenantId};
use boxprice_pricing::{CompetitorPriceObservation, CompetitorSignal, MarketSnapshot, OccupancyCounts};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::retry::RetryPolicy;
use crate::store::{ObservationStore, PriceLedger};

pub use gateway::{CompetitorGateway, GatewayError, HttpCompetitorGateway};

#[cfg(test)]
pub(crate) use gateway::scripted::ScriptedGateway;

pub struct MarketDataCollector {
    ledger: Arc<dyn PriceLedger>,
    observations: Arc<ObservationStore>,
    gateway: Option<Arc<dyn CompetitorGateway>>,
    timeout: StdDuration,
    retry: RetryPolicy,
    window: Duration,
    min_sample: usize,
}

impl MarketDataCollector {
    pub fn new(ledger: Arc<dyn PriceLedger>, observations: Arc<ObservationStore>, config: &EngineConfig) -> Self {
        Self {
            ledger,
            observations,
            gateway: None,
            timeout: config.gateway_timeout(),
            retry: config.gateway_retry(),
            window: config.competitor_window(),
            min_sample: config.min_competitor_sample,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn CompetitorGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn observations(&self) -> &Arc<ObservationStore> {
        &self.observations
    }

    /// Store a manually entered or scraped observation. Observations are never edited.
    pub fn record_observation(&self, observation: CompetitorPriceObservation) -> EngineResult<()> {
        if observation.competitor_name.trim().is_empty() {
            return Err(DomainError::validation("competitor_name cannot be empty").into());
        }
        if observation.category.trim().is_empty() {
            return Err(DomainError::validation("category cannot be empty").into());
        }
        if !observation.monthly_price.is_positive() {
            return Err(DomainError::validation("monthly_price must be positive").into());
        }
        self.observations.record(observation);
        Ok(())
    }

    /// Snapshot of one site/category at `now`.
    ///
    /// Occupancy comes from the unit records. When a gateway is configured it is asked for
    /// fresh rates first; if it keeps failing the snapshot carries no competitor signal
    /// instead of failing.
    #[instrument(skip(self, tenant_id, site_id, now), fields(tenant = %tenant_id, site = %site_id))]
    pub async fn collect(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        category: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<MarketSnapshot> {
        let units = self.ledger.units_for_site(tenant_id, site_id).await?;
        let occupancy = OccupancyCounts::from_units(&units, site_id, Some(category));

        let degraded = match &self.gateway {
            Some(gateway) => match self.fetch_with_retry(gateway.as_ref(), tenant_id, site_id, category, now).await {
                Ok(rates) => {
                    debug!(rates = rates.len(), "competitor rates fetched");
                    for rate in rates {
                        self.observations.record(rate);
                    }
                    false
                }
                Err(e) => {
                    warn!(category, error = %e, "competitor gateway failed, continuing without competitor signal");
                    true
                }
            },
            None => false,
        };

        let competitor = if degraded {
            CompetitorSignal::InsufficientData { sample_size: 0 }
        } else {
            let observations = self.observations.observations(tenant_id, site_id, category);
            CompetitorSignal::from_observations(&observations, now, self.window, self.min_sample)
        };

        let snapshot = MarketSnapshot::new(site_id, category, occupancy, competitor, now);
        self.observations.record_snapshot(tenant_id, snapshot.clone());
        Ok(snapshot)
    }

    /// Snapshots for every category present at a site.
    pub async fn collect_site(
        &self,
        tenant_id: TenantId,
        site_id: SiteId,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<MarketSnapshot>> {
        let categories: BTreeSet<String> = self
            .ledger
            .units_for_site(tenant_id, site_id)
            .await?
            .into_iter()
            .map(|u| u.category)
            .collect();
        let mut snapshots = Vec::with_capacity(categories.len());
        for category in categories {
            snapshots.push(self.collect(tenant_id, site_id, &category, now).await?);
        }
        Ok(snapshots)
    }

    async fn fetch_with_retry(
        &self,
        gateway: &dyn CompetitorGateway,
        tenant_id: TenantId,
        site_id: SiteId,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CompetitorPriceObservation>, GatewayError> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(
                self.timeout,
                gateway.fetch_rates(tenant_id, site_id, category, now),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(self.timeout)),
            };

            match result {
                Ok(rates) => return Ok(rates),
                Err(e) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying competitor gateway");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
