//! Tenant-configured pricing strategies.
//!
//! Strategies arrive as loosely-typed JSON ([`StrategyConfig`]) and are validated once into
//! a [`PricingStrategy`]. Everything downstream relies on the validated invariants:
//! `0 < min_price_factor <= 1 <= max_price_factor`, `0 <= low < high <= 1`, positive
//! calendar factors.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use boxprice_core::{AggregateRoot, ModelId, Money, SiteId, StrategyId, TenantId, ValueObject};

use crate::error::{PricingError, PricingResult};

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    OccupancyBased,
    DemandBased,
    Seasonal,
    Competitor,
    MlOptimized,
}

impl StrategyKind {
    pub fn uses_competitor_signal(self) -> bool {
        matches!(self, StrategyKind::Competitor | StrategyKind::MlOptimized)
    }

    pub fn uses_ml_signal(self) -> bool {
        matches!(self, StrategyKind::DemandBased | StrategyKind::MlOptimized)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::OccupancyBased => "occupancy_based",
            StrategyKind::DemandBased => "demand_based",
            StrategyKind::Seasonal => "seasonal",
            StrategyKind::Competitor => "competitor",
            StrategyKind::MlOptimized => "ml_optimized",
        }
    }
}

/// Engine-wide defaults for parameters a tenant may leave unset.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StrategyDefaults {
    pub ml_min_confidence: f64,
    pub competitor_nudge: f64,
}

impl Default for StrategyDefaults {
    fn default() -> Self {
        Self {
            ml_min_confidence: 0.70,
            competitor_nudge: 0.25,
        }
    }
}

/// Raw strategy parameters as edited by tenant staff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default)]
    pub kind: StrategyKind,
    #[serde(default)]
    pub site_id: Option<SiteId>,
    #[serde(default)]
    pub is_active: Option<bool>,

    pub min_price_factor: Option<f64>,
    pub max_price_factor: Option<f64>,
    pub occupancy_threshold_low: Option<f64>,
    pub occupancy_threshold_high: Option<f64>,
    pub price_increase_step: Option<f64>,
    pub price_decrease_step: Option<f64>,

    /// Month key (`"jan"`, `"january"`, `"1"`) to multiplier.
    #[serde(default)]
    pub seasonal_factors: BTreeMap<String, f64>,
    /// Weekday key (`"mon"`, `"monday"`) to multiplier.
    #[serde(default)]
    pub day_of_week_factors: BTreeMap<String, f64>,

    pub ml_model_id: Option<ModelId>,
    pub ml_min_confidence: Option<f64>,
    pub competitor_nudge: Option<f64>,
}

/// Hard price floor and ceiling for one base price.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub floor: Money,
    pub ceiling: Money,
}

impl PriceBounds {
    /// `[ceil(base * min), floor(base * max)]` in cents, so both ends honour the factors exactly.
    pub fn for_base(base: Money, min_factor: f64, max_factor: f64) -> Self {
        Self {
            floor: base.scale_ceil(min_factor),
            ceiling: base.scale_floor(max_factor),
        }
    }

    pub fn contains(&self, price: Money) -> bool {
        self.floor <= price && price <= self.ceiling
    }

    pub fn clamp(&self, price: Money) -> Money {
        price.clamp_to(self.floor, self.ceiling)
    }

    pub fn check(&self, price: Money) -> PricingResult<()> {
        if self.contains(price) {
            Ok(())
        } else {
            Err(PricingError::BoundsViolation {
                price,
                floor: self.floor,
                ceiling: self.ceiling,
            })
        }
    }
}

impl ValueObject for PriceBounds {}

/// Validated, versioned pricing strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingStrategy {
    id: StrategyId,
    tenant_id: TenantId,
    site_id: Option<SiteId>,
    name: String,
    kind: StrategyKind,
    version: u32,
    is_active: bool,

    min_price_factor: f64,
    max_price_factor: f64,
    occupancy_threshold_low: f64,
    occupancy_threshold_high: f64,
    price_increase_step: f64,
    price_decrease_step: f64,

    /// Month number (1-12) to multiplier.
    seasonal_factors: BTreeMap<u32, f64>,
    /// Days from Monday (0-6) to multiplier.
    day_of_week_factors: BTreeMap<u32, f64>,

    ml_model_id: Option<ModelId>,
    ml_min_confidence: f64,
    competitor_nudge: f64,

    /// Set once an applied adjustment references this version.
    referenced: bool,
    created_at: DateTime<Utc>,
}

/// Outcome of editing a strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyRevision {
    /// The version was never referenced and was edited in place.
    InPlace(PricingStrategy),
    /// The version is referenced by an applied adjustment; this is its successor.
    NewVersion(PricingStrategy),
}

impl StrategyRevision {
    pub fn strategy(&self) -> &PricingStrategy {
        match self {
            StrategyRevision::InPlace(s) | StrategyRevision::NewVersion(s) => s,
        }
    }

    pub fn into_strategy(self) -> PricingStrategy {
        match self {
            StrategyRevision::InPlace(s) | StrategyRevision::NewVersion(s) => s,
        }
    }
}

impl PricingStrategy {
    pub const DEFAULT_MIN_PRICE_FACTOR: f64 = 0.80;
    pub const DEFAULT_MAX_PRICE_FACTOR: f64 = 1.50;
    pub const DEFAULT_OCCUPANCY_LOW: f64 = 0.60;
    pub const DEFAULT_OCCUPANCY_HIGH: f64 = 0.85;
    pub const DEFAULT_INCREASE_STEP: f64 = 0.05;
    pub const DEFAULT_DECREASE_STEP: f64 = 0.03;

    /// Validate a config into version 1 of a new strategy.
    pub fn from_config(
        id: StrategyId,
        tenant_id: TenantId,
        config: &StrategyConfig,
        defaults: StrategyDefaults,
        now: DateTime<Utc>,
    ) -> PricingResult<Self> {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(PricingError::configuration("strategy name cannot be empty"));
        }

        let min = config.min_price_factor.unwrap_or(Self::DEFAULT_MIN_PRICE_FACTOR);
        let max = config.max_price_factor.unwrap_or(Self::DEFAULT_MAX_PRICE_FACTOR);
        if !(min.is_finite() && max.is_finite()) || !(0.0 < min && min <= 1.0 && 1.0 <= max) {
            return Err(PricingError::configuration(format!(
                "price factors must satisfy 0 < min <= 1 <= max (got min={min}, max={max})"
            )));
        }

        let low = config.occupancy_threshold_low.unwrap_or(Self::DEFAULT_OCCUPANCY_LOW);
        let high = config.occupancy_threshold_high.unwrap_or(Self::DEFAULT_OCCUPANCY_HIGH);
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
            return Err(PricingError::configuration(format!(
                "occupancy thresholds must satisfy 0 <= low < high <= 1 (got low={low}, high={high})"
            )));
        }

        let increase = config.price_increase_step.unwrap_or(Self::DEFAULT_INCREASE_STEP);
        let decrease = config.price_decrease_step.unwrap_or(Self::DEFAULT_DECREASE_STEP);
        for (label, step) in [("increase", increase), ("decrease", decrease)] {
            if !(0.0..1.0).contains(&step) {
                return Err(PricingError::configuration(format!(
                    "price {label} step must be in [0, 1) (got {step})"
                )));
            }
        }

        let ml_min_confidence = config.ml_min_confidence.unwrap_or(defaults.ml_min_confidence);
        if !(0.0..=1.0).contains(&ml_min_confidence) {
            return Err(PricingError::configuration(
                "ml_min_confidence must be in [0, 1]",
            ));
        }
        let competitor_nudge = config.competitor_nudge.unwrap_or(defaults.competitor_nudge);
        if !(0.0..=1.0).contains(&competitor_nudge) {
            return Err(PricingError::configuration(
                "competitor_nudge must be in [0, 1]",
            ));
        }

        let seasonal_factors = parse_factor_map(&config.seasonal_factors, parse_month_key)?;
        let day_of_week_factors =
            parse_factor_map(&config.day_of_week_factors, parse_weekday_key)?;

        Ok(Self {
            id,
            tenant_id,
            site_id: config.site_id,
            name: name.to_string(),
            kind: config.kind,
            version: 1,
            is_active: config.is_active.unwrap_or(true),
            min_price_factor: min,
            max_price_factor: max,
            occupancy_threshold_low: low,
            occupancy_threshold_high: high,
            price_increase_step: increase,
            price_decrease_step: decrease,
            seasonal_factors,
            day_of_week_factors,
            ml_model_id: config.ml_model_id,
            ml_min_confidence,
            competitor_nudge,
            referenced: false,
            created_at: now,
        })
    }

    /// Apply an edit. Referenced versions are immutable, so the edit becomes a new version.
    pub fn revise(
        &self,
        config: &StrategyConfig,
        defaults: StrategyDefaults,
        now: DateTime<Utc>,
    ) -> PricingResult<StrategyRevision> {
        let mut next = Self::from_config(self.id, self.tenant_id, config, defaults, now)?;
        if self.referenced {
            next.version = self.version + 1;
            Ok(StrategyRevision::NewVersion(next))
        } else {
            next.version = self.version;
            next.created_at = self.created_at;
            Ok(StrategyRevision::InPlace(next))
        }
    }

    pub fn mark_referenced(&mut self) {
        self.referenced = true;
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }

    /// The config that would recreate this strategy (used for display and edits).
    pub fn to_config(&self) -> StrategyConfig {
        StrategyConfig {
            name: self.name.clone(),
            kind: self.kind,
            site_id: self.site_id,
            is_active: Some(self.is_active),
            min_price_factor: Some(self.min_price_factor),
            max_price_factor: Some(self.max_price_factor),
            occupancy_threshold_low: Some(self.occupancy_threshold_low),
            occupancy_threshold_high: Some(self.occupancy_threshold_high),
            price_increase_step: Some(self.price_increase_step),
            price_decrease_step: Some(self.price_decrease_step),
            seasonal_factors: self
                .seasonal_factors
                .iter()
                .map(|(m, f)| (MONTHS[(*m - 1) as usize].to_string(), *f))
                .collect(),
            day_of_week_factors: self
                .day_of_week_factors
                .iter()
                .map(|(d, f)| (WEEKDAYS[*d as usize].to_string(), *f))
                .collect(),
            ml_model_id: self.ml_model_id,
            ml_min_confidence: Some(self.ml_min_confidence),
            competitor_nudge: Some(self.competitor_nudge),
        }
    }

    pub fn strategy_id(&self) -> StrategyId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn site_id(&self) -> Option<SiteId> {
        self.site_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn strategy_version(&self) -> u32 {
        self.version
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn min_price_factor(&self) -> f64 {
        self.min_price_factor
    }

    pub fn max_price_factor(&self) -> f64 {
        self.max_price_factor
    }

    pub fn occupancy_threshold_low(&self) -> f64 {
        self.occupancy_threshold_low
    }

    pub fn occupancy_threshold_high(&self) -> f64 {
        self.occupancy_threshold_high
    }

    pub fn price_increase_step(&self) -> f64 {
        self.price_increase_step
    }

    pub fn price_decrease_step(&self) -> f64 {
        self.price_decrease_step
    }

    pub fn ml_model_id(&self) -> Option<ModelId> {
        self.ml_model_id
    }

    pub fn ml_min_confidence(&self) -> f64 {
        self.ml_min_confidence
    }

    pub fn competitor_nudge(&self) -> f64 {
        self.competitor_nudge
    }

    /// Whether this strategy governs units of `site_id`.
    pub fn applies_to_site(&self, site_id: SiteId) -> bool {
        self.site_id.is_none_or(|s| s == site_id)
    }

    pub fn bounds(&self, base_price: Money) -> PriceBounds {
        PriceBounds::for_base(base_price, self.min_price_factor, self.max_price_factor)
    }

    /// Seasonal multiplier configured for the month of `at`, if any.
    pub fn seasonal_factor(&self, at: DateTime<Utc>) -> Option<f64> {
        self.seasonal_factors.get(&at.month()).copied()
    }

    pub fn seasonal_factor_for_month(&self, month: u32) -> Option<f64> {
        self.seasonal_factors.get(&month).copied()
    }

    /// Day-of-week multiplier configured for the weekday of `at`, if any.
    pub fn day_of_week_factor(&self, at: DateTime<Utc>) -> Option<f64> {
        self.day_of_week_factors
            .get(&at.weekday().num_days_from_monday())
            .copied()
    }
}

impl AggregateRoot for PricingStrategy {
    type Id = StrategyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        u64::from(self.version)
    }
}

/// Lower-case name of a weekday as used in factor maps and audit payloads.
pub fn weekday_name(weekday: Weekday) -> &'static str {
    WEEKDAYS[weekday.num_days_from_monday() as usize]
}

fn parse_factor_map(
    raw: &BTreeMap<String, f64>,
    parse_key: fn(&str) -> Option<u32>,
) -> PricingResult<BTreeMap<u32, f64>> {
    let mut out = BTreeMap::new();
    for (key, factor) in raw {
        let parsed = parse_key(key)
            .ok_or_else(|| PricingError::configuration(format!("unknown calendar key '{key}'")))?;
        if !factor.is_finite() || *factor <= 0.0 {
            return Err(PricingError::configuration(format!(
                "factor for '{key}' must be positive (got {factor})"
            )));
        }
        if out.insert(parsed, *factor).is_some() {
            return Err(PricingError::configuration(format!(
                "calendar key '{key}' duplicates another entry"
            )));
        }
    }
    Ok(out)
}

fn parse_month_key(key: &str) -> Option<u32> {
    let key = key.trim().to_ascii_lowercase();
    if let Ok(n) = key.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    parse_named(&key, &MONTHS).map(|i| i + 1)
}

fn parse_weekday_key(key: &str) -> Option<u32> {
    parse_named(&key.trim().to_ascii_lowercase(), &WEEKDAYS)
}

/// Full name or any prefix of at least three letters.
fn parse_named(key: &str, names: &[&str]) -> Option<u32> {
    if key.len() < 3 {
        return None;
    }
    names
        .iter()
        .position(|name| name.starts_with(key))
        .map(|i| i as u32)
}
