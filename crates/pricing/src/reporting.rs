//! Revenue metrics (RevPAU / RevPOU) and the pricing health summary.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{DomainError, DomainResult, Money, SiteId};

use crate::unit::UnitRecord;

const BELOW_MARKET_RATIO: f64 = 0.9;
const ABOVE_MARKET_RATIO: f64 = 1.1;

/// Raw period figures for one site, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueMetricInput {
    pub site_id: SiteId,
    pub date: NaiveDate,
    pub total_units: u32,
    pub occupied_units: u32,
    #[serde(default)]
    pub reserved_units: u32,
    pub gross_revenue: Money,
    pub net_revenue: Money,
    /// Sum of current prices of occupied units.
    #[serde(default)]
    pub rent_roll: Money,
    /// Sum of current prices of all non-maintenance units.
    #[serde(default)]
    pub potential_rent: Money,
    #[serde(default)]
    pub billed: Money,
    #[serde(default)]
    pub collected: Money,
    #[serde(default)]
    pub delinquent: Money,
    #[serde(default)]
    pub new_contracts: u32,
    #[serde(default)]
    pub terminated_contracts: u32,
}

impl RevenueMetricInput {
    pub fn new(site_id: SiteId, date: NaiveDate) -> Self {
        Self {
            site_id,
            date,
            total_units: 0,
            occupied_units: 0,
            reserved_units: 0,
            gross_revenue: Money::ZERO,
            net_revenue: Money::ZERO,
            rent_roll: Money::ZERO,
            potential_rent: Money::ZERO,
            billed: Money::ZERO,
            collected: Money::ZERO,
            delinquent: Money::ZERO,
            new_contracts: 0,
            terminated_contracts: 0,
        }
    }
}

/// Immutable per-site, per-date aggregate. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueMetricSnapshot {
    pub site_id: SiteId,
    pub date: NaiveDate,
    pub total_units: u32,
    pub occupied_units: u32,
    pub reserved_units: u32,
    pub physical_occupancy: f64,
    pub economic_occupancy: Option<f64>,
    pub gross_revenue: Money,
    pub net_revenue: Money,
    pub revpau: Option<Money>,
    pub revpou: Option<Money>,
    pub average_rent: Option<Money>,
    pub collection_rate: Option<f64>,
    pub delinquency_rate: Option<f64>,
    pub new_contracts: u32,
    pub terminated_contracts: u32,
    pub churn_rate: Option<f64>,
    /// RevPAU change vs. the previous snapshot, percent.
    pub revpau_change_pct: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl RevenueMetricSnapshot {
    pub fn derive(
        input: RevenueMetricInput,
        previous: Option<&RevenueMetricSnapshot>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if input.occupied_units + input.reserved_units > input.total_units {
            return Err(DomainError::validation(
                "occupied + reserved units exceed total units",
            ));
        }
        if let Some(prev) = previous {
            if prev.site_id != input.site_id {
                return Err(DomainError::invariant("previous snapshot belongs to another site"));
            }
            if prev.date >= input.date {
                return Err(DomainError::invariant("previous snapshot is not earlier"));
            }
        }

        let revpau = per_unit(input.net_revenue, input.total_units);
        let revpou = per_unit(input.net_revenue, input.occupied_units);
        let revpau_change_pct = match (previous.and_then(|p| p.revpau), revpau) {
            (Some(prev), Some(cur)) if prev.is_positive() => Some(prev.percent_change_to(cur)),
            _ => None,
        };

        // Occupancy at period start, approximated from the period's contract flow.
        let start_occupied = i64::from(input.occupied_units) - i64::from(input.new_contracts)
            + i64::from(input.terminated_contracts);

        Ok(Self {
            site_id: input.site_id,
            date: input.date,
            total_units: input.total_units,
            occupied_units: input.occupied_units,
            reserved_units: input.reserved_units,
            physical_occupancy: fraction(input.occupied_units as f64, input.total_units as f64)
                .unwrap_or(0.0),
            economic_occupancy: fraction(
                input.rent_roll.cents() as f64,
                input.potential_rent.cents() as f64,
            ),
            gross_revenue: input.gross_revenue,
            net_revenue: input.net_revenue,
            revpau,
            revpou,
            average_rent: per_unit(input.rent_roll, input.occupied_units),
            collection_rate: fraction(input.collected.cents() as f64, input.billed.cents() as f64),
            delinquency_rate: fraction(input.delinquent.cents() as f64, input.billed.cents() as f64),
            new_contracts: input.new_contracts,
            terminated_contracts: input.terminated_contracts,
            churn_rate: fraction(input.terminated_contracts as f64, start_occupied as f64),
            revpau_change_pct,
            created_at: now,
        })
    }
}

fn per_unit(amount: Money, units: u32) -> Option<Money> {
    (units > 0).then(|| Money::from_cents((amount.cents() as f64 / f64::from(units)).round() as i64))
}

fn fraction(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator > 0.0).then(|| numerator / denominator)
}

/// How a site's prices sit against the competitor median of their category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingHealth {
    pub below_market: u32,
    pub above_market: u32,
    pub in_line: u32,
    pub no_market_data: u32,
}

impl PricingHealth {
    /// `medians` maps category to competitor median; categories without one count as no data.
    pub fn assess<'a>(
        units: impl IntoIterator<Item = &'a UnitRecord>,
        medians: &HashMap<String, Money>,
    ) -> Self {
        let mut health = Self::default();
        for unit in units {
            if !unit.counts_toward_inventory() {
                continue;
            }
            let Some(median) = medians.get(&unit.category) else {
                health.no_market_data += 1;
                continue;
            };
            let price = unit.current_price.cents() as f64;
            let median = median.cents() as f64;
            if price < median * BELOW_MARKET_RATIO {
                health.below_market += 1;
            } else if price > median * ABOVE_MARKET_RATIO {
                health.above_market += 1;
            } else {
                health.in_line += 1;
            }
        }
        health
    }

    pub fn total(&self) -> u32 {
        self.below_market + self.above_market + self.in_line + self.no_market_data
    }
}

#[cfg(test)]
mod tests {
    use boxprice_core::{TenantId, UnitId};

    use super::*;
    use crate::unit::UnitStatus;

    fn input(site: SiteId, day: u32) -> RevenueMetricInput {
        let mut i = RevenueMetricInput::new(site, NaiveDate::from_ymd_opt(2026, 9, day).unwrap());
        i.total_units = 200;
        i.occupied_units = 150;
        i.reserved_units = 10;
        i.gross_revenue = Money::from_major(16_000.0);
        i.net_revenue = Money::from_major(15_000.0);
        i.rent_roll = Money::from_major(15_000.0);
        i.potential_rent = Money::from_major(20_000.0);
        i.billed = Money::from_major(15_000.0);
        i.collected = Money::from_major(13_500.0);
        i.delinquent = Money::from_major(1_500.0);
        i.new_contracts = 10;
        i.terminated_contracts = 5;
        i
    }

    #[test]
    fn derives_revpau_and_revpou() {
        let site = SiteId::new();
        let snap = RevenueMetricSnapshot::derive(input(site, 1), None, Utc::now()).unwrap();

        assert_eq!(snap.revpau, Some(Money::from_major(75.0)));
        assert_eq!(snap.revpou, Some(Money::from_major(100.0)));
        assert_eq!(snap.physical_occupancy, 0.75);
        assert_eq!(snap.economic_occupancy, Some(0.75));
        assert_eq!(snap.average_rent, Some(Money::from_major(100.0)));
        assert_eq!(snap.collection_rate, Some(0.9));
        assert_eq!(snap.delinquency_rate, Some(0.1));
        assert_eq!(snap.churn_rate, Some(5.0 / 145.0));
        assert_eq!(snap.revpau_change_pct, None);
    }

    #[test]
    fn revpau_change_against_previous_snapshot() {
        let site = SiteId::new();
        let prev = RevenueMetricSnapshot::derive(input(site, 1), None, Utc::now()).unwrap();
        let mut next = input(site, 2);
        next.net_revenue = Money::from_major(16_500.0);

        let snap = RevenueMetricSnapshot::derive(next, Some(&prev), Utc::now()).unwrap();
        assert_eq!(snap.revpau, Some(Money::from_major(82.5)));
        assert_eq!(snap.revpau_change_pct, Some(10.0));
    }

    #[test]
    fn empty_site_has_no_per_unit_figures() {
        let snap = RevenueMetricSnapshot::derive(
            RevenueMetricInput::new(SiteId::new(), NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()),
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(snap.revpau, None);
        assert_eq!(snap.revpou, None);
        assert_eq!(snap.physical_occupancy, 0.0);
    }

    #[test]
    fn rejects_inconsistent_counts_and_out_of_order_previous() {
        let site = SiteId::new();
        let mut bad = input(site, 1);
        bad.occupied_units = 250;
        assert!(RevenueMetricSnapshot::derive(bad, None, Utc::now()).is_err());

        let later = RevenueMetricSnapshot::derive(input(site, 5), None, Utc::now()).unwrap();
        assert!(RevenueMetricSnapshot::derive(input(site, 4), Some(&later), Utc::now()).is_err());
    }

    #[test]
    fn health_buckets_units_against_median() {
        let tenant = TenantId::new();
        let site = SiteId::new();
        let mk = |category: &str, price: f64, status| {
            UnitRecord::new(UnitId::new(), tenant, site, category, Money::from_major(price), status)
        };
        let units = vec![
            mk("small", 80.0, UnitStatus::Available),
            mk("small", 100.0, UnitStatus::Occupied),
            mk("small", 125.0, UnitStatus::Available),
            mk("small", 10.0, UnitStatus::Maintenance),
            mk("xl", 300.0, UnitStatus::Available),
        ];
        let medians = HashMap::from([("small".to_string(), Money::from_major(100.0))]);

        let health = PricingHealth::assess(&units, &medians);
        assert_eq!(health.below_market, 1);
        assert_eq!(health.in_line, 1);
        assert_eq!(health.above_market, 1);
        assert_eq!(health.no_market_data, 1);
        assert_eq!(health.total(), 4);
    }
}
