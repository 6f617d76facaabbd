//! Market observations and their per-site, per-category aggregation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{Money, SiteId, TenantId, ValueObject};

use crate::unit::{UnitRecord, UnitStatus};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    Manual,
    Scraping,
    Api,
}

/// Time-stamped competitor price point. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorPriceObservation {
    pub tenant_id: TenantId,
    pub site_id: SiteId,
    pub category: String,
    pub competitor_name: String,
    #[serde(default)]
    pub competitor_location: Option<String>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub size_m2: Option<f64>,
    pub monthly_price: Money,
    #[serde(default)]
    pub weekly_price: Option<Money>,
    #[serde(default)]
    pub has_promotion: bool,
    #[serde(default)]
    pub promotion_details: Option<String>,
    pub source: ObservationSource,
    pub collected_at: DateTime<Utc>,
}

/// Aggregated competitor price, or an explicit absence.
///
/// `InsufficientData` means "no signal", never zero.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompetitorSignal {
    Median { price: Money, sample_size: usize },
    InsufficientData { sample_size: usize },
}

impl CompetitorSignal {
    /// Median of `observations` collected within `window` before `now`, if at least
    /// `min_sample` qualify.
    pub fn from_observations<'a>(
        observations: impl IntoIterator<Item = &'a CompetitorPriceObservation>,
        now: DateTime<Utc>,
        window: Duration,
        min_sample: usize,
    ) -> Self {
        let since = now - window;
        let mut prices: Vec<Money> = observations
            .into_iter()
            .filter(|o| o.collected_at >= since && o.collected_at <= now)
            .map(|o| o.monthly_price)
            .collect();

        let sample_size = prices.len();
        if sample_size == 0 || sample_size < min_sample {
            return CompetitorSignal::InsufficientData { sample_size };
        }

        prices.sort_unstable();
        let mid = sample_size / 2;
        let price = if sample_size % 2 == 1 {
            prices[mid]
        } else {
            let sum = prices[mid - 1].cents() + prices[mid].cents();
            Money::from_cents((sum as f64 / 2.0).round() as i64)
        };
        CompetitorSignal::Median { price, sample_size }
    }

    pub fn median(&self) -> Option<Money> {
        match self {
            CompetitorSignal::Median { price, .. } => Some(*price),
            CompetitorSignal::InsufficientData { .. } => None,
        }
    }

    pub fn sample_size(&self) -> usize {
        match self {
            CompetitorSignal::Median { sample_size, .. }
            | CompetitorSignal::InsufficientData { sample_size } => *sample_size,
        }
    }
}

/// Occupancy of one site/category, maintenance units excluded.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyCounts {
    pub available_units: u32,
    pub occupied_units: u32,
    pub reserved_units: u32,
    pub maintenance_units: u32,
}

impl OccupancyCounts {
    pub fn from_units<'a>(
        units: impl IntoIterator<Item = &'a UnitRecord>,
        site_id: SiteId,
        category: Option<&str>,
    ) -> Self {
        let mut counts = Self::default();
        for unit in units {
            if unit.site_id != site_id {
                continue;
            }
            if category.is_some_and(|c| c != unit.category) {
                continue;
            }
            if !unit.counts_toward_inventory() {
                counts.maintenance_units += 1;
                continue;
            }
            counts.available_units += 1;
            match unit.status {
                UnitStatus::Occupied => counts.occupied_units += 1,
                UnitStatus::Reserved => counts.reserved_units += 1,
                UnitStatus::Available | UnitStatus::Maintenance => {}
            }
        }
        counts
    }

    /// occupied / available, zero for an empty category.
    pub fn rate(&self) -> f64 {
        if self.available_units == 0 {
            0.0
        } else {
            f64::from(self.occupied_units) / f64::from(self.available_units)
        }
    }
}

/// Canonical market view of a site/category at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub site_id: SiteId,
    pub category: String,
    pub occupancy_rate: f64,
    pub occupancy: OccupancyCounts,
    pub competitor: CompetitorSignal,
    pub collected_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(
        site_id: SiteId,
        category: impl Into<String>,
        occupancy: OccupancyCounts,
        competitor: CompetitorSignal,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            site_id,
            category: category.into(),
            occupancy_rate: occupancy.rate(),
            occupancy,
            competitor,
            collected_at,
        }
    }

    pub fn competitor_median_price(&self) -> Option<Money> {
        self.competitor.median()
    }

    pub fn competitor_sample_size(&self) -> usize {
        self.competitor.sample_size()
    }
}

impl ValueObject for MarketSnapshot {}
