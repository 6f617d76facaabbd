//! Pricing alerts and the rules that raise them.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{AlertId, DomainError, DomainResult, Money, SiteId, TenantId, UnitId, UserId};
use boxprice_forecast::Forecast;

use crate::adjustment::PriceAdjustment;
use crate::recommendation::PriceRecommendation;
use crate::reporting::RevenueMetricSnapshot;
use crate::strategy::PricingStrategy;
use crate::unit::UnitRecord;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Underpriced,
    Overpriced,
    HighVacancy,
    RevenueDrop,
    CompetitorChange,
    DemandSpike,
    SeasonalOpportunity,
    BoundsViolation,
    LargePriceChange,
    RecommendationRejected,
    StaleRecommendation,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Underpriced => "underpriced",
            AlertKind::Overpriced => "overpriced",
            AlertKind::HighVacancy => "high_vacancy",
            AlertKind::RevenueDrop => "revenue_drop",
            AlertKind::CompetitorChange => "competitor_change",
            AlertKind::DemandSpike => "demand_spike",
            AlertKind::SeasonalOpportunity => "seasonal_opportunity",
            AlertKind::BoundsViolation => "bounds_violation",
            AlertKind::LargePriceChange => "large_price_change",
            AlertKind::RecommendationRejected => "recommendation_rejected",
            AlertKind::StaleRecommendation => "stale_recommendation",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Read,
    Acknowledged,
    Resolved,
}

/// Kind, site, unit and category: what makes two alerts duplicates.
pub type AlertKey<'a> = (AlertKind, Option<SiteId>, Option<UnitId>, Option<&'a str>);

/// Alert as produced by a rule, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub site_id: Option<SiteId>,
    pub unit_id: Option<UnitId>,
    /// Unit category the alert is about, for rules that run per category.
    #[serde(default)]
    pub category: Option<String>,
    pub title: String,
    pub message: String,
    pub recommended_action: Option<String>,
    pub estimated_revenue_impact: Option<Money>,
}

impl NewAlert {
    fn new(kind: AlertKind, severity: AlertSeverity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            site_id: None,
            unit_id: None,
            category: None,
            title: title.into(),
            message: message.into(),
            recommended_action: None,
            estimated_revenue_impact: None,
        }
    }

    fn site(mut self, site_id: SiteId) -> Self {
        self.site_id = Some(site_id);
        self
    }

    fn unit(mut self, unit_id: UnitId) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    fn action(mut self, action: impl Into<String>) -> Self {
        self.recommended_action = Some(action.into());
        self
    }

    fn impact(mut self, impact: Money) -> Self {
        self.estimated_revenue_impact = Some(impact);
        self
    }

    /// Alerts with the same key are not raised twice while one is unresolved.
    pub fn dedup_key(&self) -> AlertKey<'_> {
        (self.kind, self.site_id, self.unit_id, self.category.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingAlert {
    pub id: AlertId,
    pub tenant_id: TenantId,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub site_id: Option<SiteId>,
    pub unit_id: Option<UnitId>,
    #[serde(default)]
    pub category: Option<String>,
    pub title: String,
    pub message: String,
    pub recommended_action: Option<String>,
    pub estimated_revenue_impact: Option<Money>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<UserId>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PricingAlert {
    pub fn raise(id: AlertId, tenant_id: TenantId, alert: NewAlert, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id,
            kind: alert.kind,
            severity: alert.severity,
            site_id: alert.site_id,
            unit_id: alert.unit_id,
            category: alert.category,
            title: alert.title,
            message: alert.message,
            recommended_action: alert.recommended_action,
            estimated_revenue_impact: alert.estimated_revenue_impact,
            status: AlertStatus::Open,
            created_at: now,
            read_at: None,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
        }
    }

    pub fn dedup_key(&self) -> AlertKey<'_> {
        (self.kind, self.site_id, self.unit_id, self.category.as_deref())
    }

    pub fn is_unresolved(&self) -> bool {
        self.status != AlertStatus::Resolved
    }

    pub fn mark_read(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            AlertStatus::Open => {
                self.status = AlertStatus::Read;
                self.read_at = Some(at);
                Ok(())
            }
            AlertStatus::Read | AlertStatus::Acknowledged => Ok(()),
            AlertStatus::Resolved => Err(DomainError::conflict("alert is resolved")),
        }
    }

    pub fn acknowledge(&mut self, user: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            AlertStatus::Open | AlertStatus::Read => {
                self.status = AlertStatus::Acknowledged;
                self.read_at.get_or_insert(at);
                self.acknowledged_by = Some(user);
                self.acknowledged_at = Some(at);
                Ok(())
            }
            AlertStatus::Acknowledged => Err(DomainError::conflict("alert already acknowledged")),
            AlertStatus::Resolved => Err(DomainError::conflict("alert is resolved")),
        }
    }

    pub fn resolve(&mut self, user: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status == AlertStatus::Resolved {
            return Err(DomainError::conflict("alert already resolved"));
        }
        self.status = AlertStatus::Resolved;
        self.resolved_by = Some(user);
        self.resolved_at = Some(at);
        Ok(())
    }
}

/// Thresholds for the detection rules.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRules {
    pub vacancy_warning_below: f64,
    pub vacancy_critical_below: f64,
    /// Period-over-period net revenue change (percent, negative).
    pub revenue_drop_warning_pct: f64,
    pub revenue_drop_critical_pct: f64,
    pub competitor_change_pct: f64,
    pub seasonal_opportunity_factor: f64,
    /// Confidence-weighted relative demand increase.
    pub demand_spike_threshold: f64,
    pub underpriced_cycles: u32,
    pub large_change_pct: f64,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            vacancy_warning_below: 0.70,
            vacancy_critical_below: 0.50,
            revenue_drop_warning_pct: -5.0,
            revenue_drop_critical_pct: -15.0,
            competitor_change_pct: 10.0,
            seasonal_opportunity_factor: 1.10,
            demand_spike_threshold: 0.20,
            underpriced_cycles: 3,
            large_change_pct: 15.0,
        }
    }
}

impl AlertRules {
    pub fn high_vacancy(&self, site_id: SiteId, occupancy: f64, available_units: u32) -> Option<NewAlert> {
        if available_units == 0 {
            return None;
        }
        let severity = if occupancy < self.vacancy_critical_below {
            AlertSeverity::Critical
        } else if occupancy < self.vacancy_warning_below {
            AlertSeverity::Warning
        } else {
            return None;
        };
        Some(
            NewAlert::new(
                AlertKind::HighVacancy,
                severity,
                "High vacancy",
                format!("Occupancy is {:.1}% across {available_units} units", occupancy * 100.0),
            )
            .site(site_id)
            .action("Consider a promotion or a lower price step for vacant categories"),
        )
    }

    pub fn revenue_drop(
        &self,
        previous: &RevenueMetricSnapshot,
        current: &RevenueMetricSnapshot,
    ) -> Option<NewAlert> {
        let change = previous.net_revenue.percent_change_to(current.net_revenue);
        if !previous.net_revenue.is_positive() {
            return None;
        }
        let severity = if change < self.revenue_drop_critical_pct {
            AlertSeverity::Critical
        } else if change < self.revenue_drop_warning_pct {
            AlertSeverity::Warning
        } else {
            return None;
        };
        Some(
            NewAlert::new(
                AlertKind::RevenueDrop,
                severity,
                "Revenue drop",
                format!(
                    "Net revenue fell {:.1}% ({} -> {}) since {}",
                    -change, previous.net_revenue, current.net_revenue, previous.date
                ),
            )
            .site(current.site_id)
            .impact(current.net_revenue - previous.net_revenue)
            .action("Review recent price adjustments and terminations"),
        )
    }

    /// Occupancy at or above the high threshold while the price has not moved for N cycles.
    pub fn underpriced(
        &self,
        unit: &UnitRecord,
        strategy: &PricingStrategy,
        occupancy: f64,
        cycle: Duration,
        now: DateTime<Utc>,
    ) -> Option<NewAlert> {
        if occupancy < strategy.occupancy_threshold_high() {
            return None;
        }
        let unchanged = match unit.price_changed_at {
            Some(changed) => now - changed >= cycle * self.underpriced_cycles as i32,
            None => true,
        };
        if !unchanged {
            return None;
        }
        let uplift = unit.current_price.scale(strategy.price_increase_step());
        Some(
            NewAlert::new(
                AlertKind::Underpriced,
                AlertSeverity::Warning,
                "Unit may be underpriced",
                format!(
                    "Occupancy {:.1}% but price {} unchanged for {} cycles",
                    occupancy * 100.0,
                    unit.current_price,
                    self.underpriced_cycles
                ),
            )
            .site(unit.site_id)
            .unit(unit.id)
            .category(unit.category.clone())
            .impact(uplift)
            .action("Approve a price increase"),
        )
    }

    /// Occupancy persistently at or below the low threshold with a price above the market median.
    pub fn overpriced(
        &self,
        unit: &UnitRecord,
        strategy: &PricingStrategy,
        recent_occupancy: &[f64],
        competitor_median: Option<Money>,
    ) -> Option<NewAlert> {
        let median = competitor_median?;
        if recent_occupancy.is_empty()
            || recent_occupancy
                .iter()
                .any(|o| *o > strategy.occupancy_threshold_low())
            || unit.current_price <= median
        {
            return None;
        }
        Some(
            NewAlert::new(
                AlertKind::Overpriced,
                AlertSeverity::Warning,
                "Unit may be overpriced",
                format!(
                    "Price {} is above the market median {} while occupancy stays low",
                    unit.current_price, median
                ),
            )
            .site(unit.site_id)
            .unit(unit.id)
            .category(unit.category.clone())
            .impact(median - unit.current_price)
            .action("Align with the market median"),
        )
    }

    pub fn competitor_change(
        &self,
        site_id: SiteId,
        category: &str,
        previous: Money,
        current: Money,
    ) -> Option<NewAlert> {
        let change = previous.percent_change_to(current);
        if !previous.is_positive() || change.abs() <= self.competitor_change_pct {
            return None;
        }
        let severity = if change.abs() > 2.0 * self.competitor_change_pct {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        };
        Some(
            NewAlert::new(
                AlertKind::CompetitorChange,
                severity,
                "Competitor prices moved",
                format!("Median for '{category}' moved {change:+.1}% ({previous} -> {current})"),
            )
            .site(site_id)
            .category(category)
            .action("Review competitor-aware strategies for this category"),
        )
    }

    /// Forecast demand above baseline, weighted by model confidence.
    pub fn demand_spike(
        &self,
        site_id: SiteId,
        category: &str,
        forecast: &Forecast,
        baseline_demand: f64,
    ) -> Option<NewAlert> {
        if baseline_demand <= 0.0 {
            return None;
        }
        let lift = forecast.demand.predicted_demand / baseline_demand - 1.0;
        let weighted = lift * forecast.model_confidence;
        if weighted <= self.demand_spike_threshold {
            return None;
        }
        let severity = if weighted > 2.0 * self.demand_spike_threshold {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        };
        Some(
            NewAlert::new(
                AlertKind::DemandSpike,
                severity,
                "Demand spike expected",
                format!(
                    "Forecast {:.1} '{category}' inquiries on {} vs baseline {baseline_demand:.1} (model {} at {:.0}% confidence)",
                    forecast.demand.predicted_demand,
                    forecast.demand.forecast_date,
                    forecast.model_version,
                    forecast.model_confidence * 100.0
                ),
            )
            .site(site_id)
            .category(category)
            .action("Hold discounts and consider an ML-optimized strategy"),
        )
    }

    pub fn seasonal_opportunity(
        &self,
        site_id: SiteId,
        strategy: &PricingStrategy,
        now: DateTime<Utc>,
    ) -> Option<NewAlert> {
        let factor = strategy.seasonal_factor(now)?;
        if factor <= self.seasonal_opportunity_factor {
            return None;
        }
        Some(
            NewAlert::new(
                AlertKind::SeasonalOpportunity,
                AlertSeverity::Info,
                "Seasonal opportunity",
                format!(
                    "Month {} carries a seasonal factor of {factor:.2} in strategy '{}'",
                    now.month(),
                    strategy.name()
                ),
            )
            .site(site_id)
            .action("Make sure vacant units are listed before peak season"),
        )
    }

    pub fn bounds_violation(&self, rec: &PriceRecommendation, reason: &str) -> NewAlert {
        NewAlert::new(
            AlertKind::BoundsViolation,
            AlertSeverity::Critical,
            "Recommendation outside price bounds",
            format!(
                "Recommendation {} for {} was rejected: {reason}",
                rec.id, rec.recommended_price
            ),
        )
        .site(rec.site_id)
        .unit(rec.unit_id)
        .action("Inspect the strategy configuration; the price was not applied")
    }

    pub fn large_price_change(&self, adjustment: &PriceAdjustment) -> Option<NewAlert> {
        if adjustment.adjustment_percentage.abs() <= self.large_change_pct {
            return None;
        }
        Some(
            NewAlert::new(
                AlertKind::LargePriceChange,
                AlertSeverity::Warning,
                "Large price change",
                format!(
                    "Price moved {:+.2}% ({} -> {}) via {}",
                    adjustment.adjustment_percentage,
                    adjustment.old_price,
                    adjustment.new_price,
                    adjustment.trigger.kind()
                ),
            )
            .site(adjustment.site_id)
            .unit(adjustment.unit_id)
            .impact(adjustment.new_price - adjustment.old_price),
        )
    }

    pub fn recommendation_rejected(&self, rec: &PriceRecommendation, reason: &str) -> NewAlert {
        NewAlert::new(
            AlertKind::RecommendationRejected,
            AlertSeverity::Info,
            "Recommendation rejected",
            format!("Recommendation {} ({}) rejected: {reason}", rec.id, rec.recommended_price),
        )
        .site(rec.site_id)
        .unit(rec.unit_id)
    }

    pub fn stale_recommendation(&self, rec: &PriceRecommendation) -> NewAlert {
        NewAlert::new(
            AlertKind::StaleRecommendation,
            AlertSeverity::Info,
            "Recommendation expired",
            format!(
                "Recommendation {} went stale before it could be applied; the unit will be re-evaluated next cycle",
                rec.id
            ),
        )
        .site(rec.site_id)
        .unit(rec.unit_id)
    }
}
