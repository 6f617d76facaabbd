//! Strategy evaluation: signals in, one bounded candidate price out.
//!
//! Order of operations:
//! 1. occupancy step from the unit's anchor price (single increment per cycle)
//! 2. seasonal and day-of-week multipliers
//! 3. competitor nudge toward the median (competitor-aware strategies only)
//! 4. confidence-weighted blend with the ML price (ML-aware strategies only)
//! 5. clamp into `[min_price_factor, max_price_factor] * base_price`, always last

use chrono::{DateTime, Datelike, Duration, Utc};

use boxprice_core::{DomainError, Money, RecommendationId};
use boxprice_forecast::Forecast;

use crate::error::{PricingError, PricingResult};
use crate::market::MarketSnapshot;
use crate::recommendation::{AppliedFactor, PriceRecommendation, RecommendationStatus, StepDirection};
use crate::strategy::{PricingStrategy, weekday_name};
use crate::unit::UnitRecord;

const BASE_CONFIDENCE: f64 = 0.5;
const AGREEING_BONUS: f64 = 0.1;
const DISAGREEING_PENALTY: f64 = 0.05;

/// Pure evaluator. Holds only the cycle length used to stamp `expires_at`.
#[derive(Debug, Copy, Clone)]
pub struct StrategyEvaluator {
    cycle: Duration,
}

impl Default for StrategyEvaluator {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

impl StrategyEvaluator {
    pub fn new(cycle: Duration) -> Self {
        Self { cycle }
    }

    pub fn cycle(&self) -> Duration {
        self.cycle
    }

    pub fn evaluate(
        &self,
        strategy: &PricingStrategy,
        unit: &UnitRecord,
        snapshot: &MarketSnapshot,
        forecast: Option<&Forecast>,
        at: DateTime<Utc>,
    ) -> PricingResult<PriceRecommendation> {
        if unit.tenant_id != strategy.tenant_id() {
            return Err(DomainError::TenantMismatch.into());
        }
        if !strategy.applies_to_site(unit.site_id) {
            return Err(PricingError::configuration(format!(
                "strategy {} does not cover site {}",
                strategy.strategy_id(),
                unit.site_id
            )));
        }

        let base = unit.valid_base_price().ok_or_else(|| {
            PricingError::configuration(format!("unit {} has no positive base price", unit.id))
        })?;
        let bounds = strategy.bounds(base);
        if bounds.floor > bounds.ceiling {
            return Err(PricingError::configuration(format!(
                "empty price range [{}, {}] for base {base}",
                bounds.floor, bounds.ceiling
            )));
        }

        let anchor = bounds.clamp(unit.stepping_anchor().unwrap_or(base));
        let mut factors = Vec::new();

        // 1. Occupancy: one step, never a jump to a target.
        let rate = snapshot.occupancy_rate;
        let step = if rate >= strategy.occupancy_threshold_high() {
            Some((
                StepDirection::Increase,
                strategy.occupancy_threshold_high(),
                strategy.price_increase_step(),
                1.0 + strategy.price_increase_step(),
            ))
        } else if rate <= strategy.occupancy_threshold_low() {
            Some((
                StepDirection::Decrease,
                strategy.occupancy_threshold_low(),
                strategy.price_decrease_step(),
                1.0 - strategy.price_decrease_step(),
            ))
        } else {
            None
        };

        let stepped = match step {
            Some((direction, threshold, step, multiplier)) => {
                let stepped = bounds.clamp(anchor.scale(multiplier));
                factors.push(AppliedFactor::Occupancy {
                    occupancy_rate: rate,
                    threshold,
                    step,
                    direction,
                    ratio: ratio(stepped.cents() as f64, anchor.cents() as f64),
                });
                stepped
            }
            None => anchor,
        };

        let mut price = stepped.cents() as f64;

        // 2. Calendar.
        if let Some(factor) = strategy.seasonal_factor(at) {
            price *= factor;
            factors.push(AppliedFactor::Seasonal {
                month: at.month(),
                ratio: factor,
            });
        }
        if let Some(factor) = strategy.day_of_week_factor(at) {
            price *= factor;
            factors.push(AppliedFactor::DayOfWeek {
                weekday: weekday_name(at.weekday()).to_string(),
                ratio: factor,
            });
        }

        // 3. Competitor nudge; insufficient data is absence, not zero.
        if strategy.kind().uses_competitor_signal() {
            if let Some(median) = snapshot.competitor_median_price() {
                let before = price;
                let nudge = strategy.competitor_nudge();
                price += nudge * (median.cents() as f64 - price);
                factors.push(AppliedFactor::Competitor {
                    median,
                    sample_size: snapshot.competitor_sample_size(),
                    nudge,
                    ratio: ratio(price, before),
                });
            }
        }

        // 4. ML blend, weight = model confidence.
        if let Some(forecast) = forecast.filter(|f| self.ml_usable(strategy, f)) {
            let before = price;
            let weight = forecast.model_confidence;
            let ml_price = base.cents() as f64 * forecast.price_modifier();
            price = weight * ml_price + (1.0 - weight) * price;
            factors.push(AppliedFactor::Ml {
                model_id: forecast.demand.model_id,
                model_version: forecast.model_version.clone(),
                confidence: weight,
                price_modifier: forecast.price_modifier(),
                ml_price: Money::from_cents(ml_price.round() as i64),
                ratio: ratio(price, before),
            });
        }

        // 5. Clamp, always.
        let unclamped = Money::from_cents(price.round() as i64);
        let recommended = bounds.clamp(unclamped);

        let confidence = confidence_score(&factors, recommended.cents() - anchor.cents());

        Ok(PriceRecommendation {
            id: RecommendationId::new(),
            tenant_id: unit.tenant_id,
            unit_id: unit.id,
            site_id: unit.site_id,
            category: unit.category.clone(),
            strategy_id: strategy.strategy_id(),
            strategy_version: strategy.strategy_version(),
            strategy_kind: strategy.kind(),
            base_price: base,
            previous_price: unit.current_price,
            stepped_price: stepped,
            recommended_price: recommended,
            bounds,
            clamped: recommended != unclamped,
            occupancy_rate: rate,
            factors,
            confidence,
            status: RecommendationStatus::Pending,
            status_reason: None,
            unit_version: unit.version,
            created_at: at,
            expires_at: at + self.cycle,
            resolved_at: None,
        })
    }

    fn ml_usable(&self, strategy: &PricingStrategy, forecast: &Forecast) -> bool {
        let wanted = strategy.kind().uses_ml_signal() || strategy.ml_model_id().is_some();
        let modifier = forecast.price_modifier();
        wanted
            && forecast.model_confidence >= strategy.ml_min_confidence()
            && strategy
                .ml_model_id()
                .is_none_or(|id| id == forecast.demand.model_id)
            && modifier.is_finite()
            && modifier > 0.0
    }
}

fn ratio(after: f64, before: f64) -> f64 {
    if before == 0.0 { 1.0 } else { after / before }
}

/// More signals agreeing with the overall move means higher confidence.
fn confidence_score(factors: &[AppliedFactor], net_move_cents: i64) -> f64 {
    let overall = net_move_cents.signum() as i8;
    let (agreeing, disagreeing) = factors.iter().fold((0u32, 0u32), |(a, d), f| {
        match f.direction() {
            0 => (a, d),
            dir if overall != 0 && dir == overall => (a + 1, d),
            _ => (a, d + 1),
        }
    });
    (BASE_CONFIDENCE + AGREEING_BONUS * f64::from(agreeing)
        - DISAGREEING_PENALTY * f64::from(disagreeing))
    .clamp(0.1, 0.95)
}
