//! Price recommendations: candidate prices with the factors that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{ModelId, Money, RecommendationId, SiteId, StrategyId, TenantId, UnitId};

use crate::error::{PricingError, PricingResult};
use crate::strategy::{PriceBounds, StrategyKind};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    Applied,
    Rejected,
    Expired,
}

impl RecommendationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Applied => "applied",
            RecommendationStatus::Rejected => "rejected",
            RecommendationStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDirection {
    Increase,
    Decrease,
}

/// One signal that actually moved the price. `ratio` is price after / price before the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "factor", rename_all = "snake_case")]
pub enum AppliedFactor {
    Occupancy {
        occupancy_rate: f64,
        threshold: f64,
        step: f64,
        direction: StepDirection,
        ratio: f64,
    },
    Seasonal {
        month: u32,
        ratio: f64,
    },
    DayOfWeek {
        weekday: String,
        ratio: f64,
    },
    Competitor {
        median: Money,
        sample_size: usize,
        nudge: f64,
        ratio: f64,
    },
    Ml {
        model_id: ModelId,
        model_version: String,
        confidence: f64,
        price_modifier: f64,
        ml_price: Money,
        ratio: f64,
    },
}

impl AppliedFactor {
    pub fn ratio(&self) -> f64 {
        match self {
            AppliedFactor::Occupancy { ratio, .. }
            | AppliedFactor::Seasonal { ratio, .. }
            | AppliedFactor::DayOfWeek { ratio, .. }
            | AppliedFactor::Competitor { ratio, .. }
            | AppliedFactor::Ml { ratio, .. } => *ratio,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AppliedFactor::Occupancy { .. } => "occupancy",
            AppliedFactor::Seasonal { .. } => "seasonal",
            AppliedFactor::DayOfWeek { .. } => "day_of_week",
            AppliedFactor::Competitor { .. } => "competitor",
            AppliedFactor::Ml { .. } => "ml",
        }
    }

    /// +1 when the factor pushed the price up, -1 when down, 0 when neutral.
    pub fn direction(&self) -> i8 {
        let r = self.ratio();
        if r > 1.0 + 1e-9 {
            1
        } else if r < 1.0 - 1e-9 {
            -1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecommendation {
    pub id: RecommendationId,
    pub tenant_id: TenantId,
    pub unit_id: UnitId,
    pub site_id: SiteId,
    pub category: String,

    pub strategy_id: StrategyId,
    pub strategy_version: u32,
    pub strategy_kind: StrategyKind,

    pub base_price: Money,
    /// Unit price when the recommendation was computed.
    pub previous_price: Money,
    /// Occupancy-stepped price; becomes the unit's anchor when applied.
    pub stepped_price: Money,
    pub recommended_price: Money,
    pub bounds: PriceBounds,
    /// Set when the final clamp changed the price.
    pub clamped: bool,

    pub occupancy_rate: f64,
    pub factors: Vec<AppliedFactor>,
    pub confidence: f64,

    pub status: RecommendationStatus,
    pub status_reason: Option<String>,
    /// Unit version observed at evaluation time (compare-and-swap token).
    pub unit_version: u64,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PriceRecommendation {
    pub fn is_pending(&self) -> bool {
        self.status == RecommendationStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn changes_price(&self) -> bool {
        self.recommended_price != self.previous_price
    }

    pub fn change_percentage(&self) -> f64 {
        self.previous_price.percent_change_to(self.recommended_price)
    }

    pub fn factor(&self, name: &str) -> Option<&AppliedFactor> {
        self.factors.iter().find(|f| f.name() == name)
    }

    /// The factor with the largest relative effect on the price.
    pub fn dominant_factor(&self) -> Option<&AppliedFactor> {
        self.factors
            .iter()
            .filter(|f| f.direction() != 0)
            .max_by(|a, b| a.ratio().ln().abs().total_cmp(&b.ratio().ln().abs()))
    }

    pub fn mark_applied(&mut self, at: DateTime<Utc>) -> PricingResult<()> {
        self.transition(RecommendationStatus::Applied, None, at)
    }

    pub fn mark_rejected(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> PricingResult<()> {
        self.transition(RecommendationStatus::Rejected, Some(reason.into()), at)
    }

    pub fn mark_expired(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> PricingResult<()> {
        self.transition(RecommendationStatus::Expired, Some(reason.into()), at)
    }

    fn transition(
        &mut self,
        to: RecommendationStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> PricingResult<()> {
        if self.status != RecommendationStatus::Pending {
            return Err(PricingError::RecommendationNotPending(self.status));
        }
        self.status = to;
        self.status_reason = reason;
        self.resolved_at = Some(at);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::recommendation;
    use super::*;

    #[test]
    fn applied_recommendation_cannot_be_applied_again() {
        let mut rec = recommendation(200.0, 210.0);
        rec.mark_applied(Utc::now()).unwrap();

        let err = rec.mark_applied(Utc::now()).unwrap_err();
        assert_eq!(
            err,
            PricingError::RecommendationNotPending(RecommendationStatus::Applied)
        );
        assert!(rec.mark_rejected("late", Utc::now()).is_err());
    }

    #[test]
    fn rejection_records_reason() {
        let mut rec = recommendation(200.0, 210.0);
        rec.mark_rejected("bounds_violation", Utc::now()).unwrap();
        assert_eq!(rec.status, RecommendationStatus::Rejected);
        assert_eq!(rec.status_reason.as_deref(), Some("bounds_violation"));
        assert!(rec.resolved_at.is_some());
    }

    #[test]
    fn dominant_factor_is_largest_relative_move() {
        let mut rec = recommendation(200.0, 210.0);
        rec.factors = vec![
            AppliedFactor::Seasonal {
                month: 7,
                ratio: 1.02,
            },
            AppliedFactor::Occupancy {
                occupancy_rate: 0.9,
                threshold: 0.85,
                step: 0.05,
                direction: StepDirection::Increase,
                ratio: 1.05,
            },
            AppliedFactor::DayOfWeek {
                weekday: "sunday".into(),
                ratio: 0.97,
            },
        ];
        assert_eq!(rec.dominant_factor().map(AppliedFactor::name), Some("occupancy"));
        assert_eq!(rec.change_percentage(), 5.0);
    }
}
