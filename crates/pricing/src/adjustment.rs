//! Applied price changes: the audit record and the validated plan that produces it.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{
    AdjustmentId, DomainError, Money, RecommendationId, SiteId, StrategyId, TenantId, UnitId,
    UserId,
};

use crate::error::{PricingError, PricingResult};
use crate::recommendation::{AppliedFactor, PriceRecommendation};
use crate::strategy::{PricingStrategy, StrategyKind};
use crate::unit::UnitRecord;

/// Why a price changed, one payload shape per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum AdjustmentTrigger {
    Occupancy {
        occupancy_rate: f64,
        threshold: Option<f64>,
        step: Option<f64>,
    },
    Demand {
        model_version: String,
        confidence: f64,
        price_modifier: f64,
    },
    Competitor {
        median: Money,
        sample_size: usize,
    },
    Seasonal {
        month: Option<u32>,
        weekday: Option<String>,
        factor: f64,
    },
    Manual {
        reason: String,
    },
    Ml {
        model_version: String,
        confidence: f64,
        price_modifier: f64,
    },
}

impl AdjustmentTrigger {
    pub fn kind(&self) -> &'static str {
        match self {
            AdjustmentTrigger::Occupancy { .. } => "occupancy",
            AdjustmentTrigger::Demand { .. } => "demand",
            AdjustmentTrigger::Competitor { .. } => "competitor",
            AdjustmentTrigger::Seasonal { .. } => "seasonal",
            AdjustmentTrigger::Manual { .. } => "manual",
            AdjustmentTrigger::Ml { .. } => "ml",
        }
    }

    /// Attribute a recommendation to its dominant signal.
    pub fn from_recommendation(rec: &PriceRecommendation) -> Self {
        match rec.dominant_factor() {
            Some(AppliedFactor::Occupancy {
                occupancy_rate,
                threshold,
                step,
                ..
            }) => AdjustmentTrigger::Occupancy {
                occupancy_rate: *occupancy_rate,
                threshold: Some(*threshold),
                step: Some(*step),
            },
            Some(AppliedFactor::Seasonal { month, ratio }) => AdjustmentTrigger::Seasonal {
                month: Some(*month),
                weekday: None,
                factor: *ratio,
            },
            Some(AppliedFactor::DayOfWeek { weekday, ratio }) => AdjustmentTrigger::Seasonal {
                month: None,
                weekday: Some(weekday.clone()),
                factor: *ratio,
            },
            Some(AppliedFactor::Competitor {
                median,
                sample_size,
                ..
            }) => AdjustmentTrigger::Competitor {
                median: *median,
                sample_size: *sample_size,
            },
            Some(AppliedFactor::Ml {
                model_version,
                confidence,
                price_modifier,
                ..
            }) => {
                if rec.strategy_kind == StrategyKind::DemandBased {
                    AdjustmentTrigger::Demand {
                        model_version: model_version.clone(),
                        confidence: *confidence,
                        price_modifier: *price_modifier,
                    }
                } else {
                    AdjustmentTrigger::Ml {
                        model_version: model_version.clone(),
                        confidence: *confidence,
                        price_modifier: *price_modifier,
                    }
                }
            }
            // Only the clamp moved the price (e.g. bounds tightened since the last write).
            None => AdjustmentTrigger::Occupancy {
                occupancy_rate: rec.occupancy_rate,
                threshold: None,
                step: None,
            },
        }
    }
}

/// How a change was authorised.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "approval", rename_all = "snake_case")]
pub enum Approval {
    Auto,
    Manual { approved_by: UserId },
}

/// Requested application mode. `Manual(None)` is rejected with `ApprovalRequired`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyMode {
    Auto,
    Manual(Option<UserId>),
}

/// Immutable audit row of an applied price change. Exactly one per price mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAdjustment {
    pub id: AdjustmentId,
    pub tenant_id: TenantId,
    pub unit_id: UnitId,
    pub site_id: SiteId,
    pub recommendation_id: Option<RecommendationId>,
    pub strategy_id: Option<StrategyId>,
    pub strategy_version: Option<u32>,
    pub old_price: Money,
    pub new_price: Money,
    pub adjustment_percentage: f64,
    pub trigger: AdjustmentTrigger,
    pub approval: Approval,
    pub created_at: DateTime<Utc>,
}

impl PriceAdjustment {
    pub fn auto_applied(&self) -> bool {
        self.approval == Approval::Auto
    }

    pub fn approved_by(&self) -> Option<UserId> {
        match self.approval {
            Approval::Auto => None,
            Approval::Manual { approved_by } => Some(approved_by),
        }
    }
}

/// Training row for the external pipeline, appended with every applied adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub tenant_id: TenantId,
    pub unit_id: UnitId,
    pub site_id: SiteId,
    pub base_price: Money,
    pub calculated_price: Money,
    pub final_price: Money,
    pub occupancy_rate: Option<f64>,
    pub month: u32,
    /// Days from Monday.
    pub day_of_week: u32,
    pub created_at: DateTime<Utc>,
}

/// Everything one price write must persist, all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentPlan {
    /// Unit version the write must still observe.
    pub expected_unit_version: u64,
    pub unit: UnitRecord,
    pub adjustment: PriceAdjustment,
    pub recommendation: Option<PriceRecommendation>,
    pub history: PriceHistoryEntry,
}

impl AdjustmentPlan {
    /// Re-validate a recommendation against the current unit and strategy.
    ///
    /// Nothing from upstream is trusted: status, freshness, unit version, bounds and the
    /// approval are all checked again here.
    pub fn for_recommendation(
        unit: &UnitRecord,
        rec: &PriceRecommendation,
        strategy: &PricingStrategy,
        mode: ApplyMode,
        cycle: Duration,
        now: DateTime<Utc>,
    ) -> PricingResult<Self> {
        if rec.tenant_id != unit.tenant_id || strategy.tenant_id() != unit.tenant_id {
            return Err(DomainError::TenantMismatch.into());
        }
        if rec.unit_id != unit.id {
            return Err(DomainError::invariant("recommendation belongs to another unit").into());
        }
        if rec.strategy_id != strategy.strategy_id()
            || rec.strategy_version != strategy.strategy_version()
        {
            return Err(PricingError::configuration(
                "recommendation was computed with another strategy version",
            ));
        }
        if !rec.is_pending() {
            return Err(PricingError::RecommendationNotPending(rec.status));
        }
        if rec.is_expired_at(now) {
            return Err(PricingError::RecommendationExpired);
        }
        if unit.version != rec.unit_version {
            return Err(PricingError::ConcurrentModification {
                expected: rec.unit_version,
                actual: unit.version,
            });
        }

        let base = unit.valid_base_price().ok_or_else(|| {
            PricingError::configuration(format!("unit {} has no positive base price", unit.id))
        })?;
        strategy.bounds(base).check(rec.recommended_price)?;

        let approval = match mode {
            ApplyMode::Auto => {
                if let Some(last) = unit.last_auto_adjusted_at {
                    if now - last < same_cycle_window(cycle) {
                        return Err(PricingError::RateLimited(unit.id));
                    }
                }
                Approval::Auto
            }
            ApplyMode::Manual(Some(user)) => Approval::Manual { approved_by: user },
            ApplyMode::Manual(None) => return Err(PricingError::ApprovalRequired),
        };

        let mut next_unit = unit.clone();
        next_unit.set_price(
            rec.recommended_price,
            bounds_clamped_anchor(rec),
            approval == Approval::Auto,
            now,
        );

        let mut applied = rec.clone();
        applied.mark_applied(now)?;

        let adjustment = PriceAdjustment {
            id: AdjustmentId::new(),
            tenant_id: unit.tenant_id,
            unit_id: unit.id,
            site_id: unit.site_id,
            recommendation_id: Some(rec.id),
            strategy_id: Some(rec.strategy_id),
            strategy_version: Some(rec.strategy_version),
            old_price: unit.current_price,
            new_price: rec.recommended_price,
            adjustment_percentage: round2(unit.current_price.percent_change_to(rec.recommended_price)),
            trigger: AdjustmentTrigger::from_recommendation(rec),
            approval,
            created_at: now,
        };

        Ok(Self {
            expected_unit_version: unit.version,
            history: history_entry(unit, base, rec.stepped_price, rec.recommended_price, Some(rec.occupancy_rate), now),
            unit: next_unit,
            adjustment,
            recommendation: Some(applied),
        })
    }

    /// Staff override: bypasses the per-cycle rate limit but never the bounds.
    pub fn manual_override(
        unit: &UnitRecord,
        strategy: &PricingStrategy,
        price: Money,
        approved_by: UserId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> PricingResult<Self> {
        if strategy.tenant_id() != unit.tenant_id {
            return Err(DomainError::TenantMismatch.into());
        }
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("override reason cannot be empty").into());
        }

        let base = unit.valid_base_price().ok_or_else(|| {
            PricingError::configuration(format!("unit {} has no positive base price", unit.id))
        })?;
        strategy.bounds(base).check(price)?;

        let mut next_unit = unit.clone();
        next_unit.set_price(price, price, false, now);

        let adjustment = PriceAdjustment {
            id: AdjustmentId::new(),
            tenant_id: unit.tenant_id,
            unit_id: unit.id,
            site_id: unit.site_id,
            recommendation_id: None,
            strategy_id: Some(strategy.strategy_id()),
            strategy_version: Some(strategy.strategy_version()),
            old_price: unit.current_price,
            new_price: price,
            adjustment_percentage: round2(unit.current_price.percent_change_to(price)),
            trigger: AdjustmentTrigger::Manual { reason },
            approval: Approval::Manual { approved_by },
            created_at: now,
        };

        Ok(Self {
            expected_unit_version: unit.version,
            history: history_entry(unit, base, price, price, None, now),
            unit: next_unit,
            adjustment,
            recommendation: None,
        })
    }
}

/// Auto changes closer together than this belong to the same cycle. The next scheduled
/// run may fire slightly less than a full cycle after the previous one.
fn same_cycle_window(cycle: Duration) -> Duration {
    cycle - cycle / 10
}

fn bounds_clamped_anchor(rec: &PriceRecommendation) -> Money {
    rec.bounds.clamp(rec.stepped_price)
}

fn history_entry(
    unit: &UnitRecord,
    base: Money,
    calculated: Money,
    final_price: Money,
    occupancy_rate: Option<f64>,
    now: DateTime<Utc>,
) -> PriceHistoryEntry {
    PriceHistoryEntry {
        tenant_id: unit.tenant_id,
        unit_id: unit.id,
        site_id: unit.site_id,
        base_price: base,
        calculated_price: calculated,
        final_price,
        occupancy_rate,
        month: now.month(),
        day_of_week: now.weekday().num_days_from_monday(),
        created_at: now,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
