//! Rentable unit (box) as seen by the pricing engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::{AggregateRoot, Money, SiteId, TenantId, UnitId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Available,
    Reserved,
    Occupied,
    Maintenance,
}

/// Unit record owned by the platform; the executor is its only price writer.
///
/// `version` increases on every write so a recommendation can detect that the unit moved
/// under it. `anchor_price` is the occupancy-stepped price before calendar, competitor and
/// ML factors; stepping continues from it so those factors never compound across cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: UnitId,
    pub tenant_id: TenantId,
    pub site_id: SiteId,
    pub category: String,
    pub base_price: Option<Money>,
    pub current_price: Money,
    pub status: UnitStatus,
    #[serde(default)]
    pub anchor_price: Option<Money>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub price_changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_auto_adjusted_at: Option<DateTime<Utc>>,
}

impl UnitRecord {
    pub fn new(
        id: UnitId,
        tenant_id: TenantId,
        site_id: SiteId,
        category: impl Into<String>,
        base_price: Money,
        status: UnitStatus,
    ) -> Self {
        Self {
            id,
            tenant_id,
            site_id,
            category: category.into(),
            base_price: Some(base_price),
            current_price: base_price,
            status,
            anchor_price: None,
            version: 0,
            price_changed_at: None,
            last_auto_adjusted_at: None,
        }
    }

    pub fn with_current_price(mut self, price: Money) -> Self {
        self.current_price = price;
        self
    }

    /// Base price if present and positive.
    pub fn valid_base_price(&self) -> Option<Money> {
        self.base_price.filter(|p| p.is_positive())
    }

    /// Price the next occupancy step starts from.
    pub fn stepping_anchor(&self) -> Option<Money> {
        self.anchor_price
            .filter(|p| p.is_positive())
            .or(Some(self.current_price).filter(|p| p.is_positive()))
            .or(self.valid_base_price())
    }

    pub fn counts_toward_inventory(&self) -> bool {
        self.status != UnitStatus::Maintenance
    }

    pub fn is_occupied(&self) -> bool {
        self.status == UnitStatus::Occupied
    }

    /// Record a price write. Bumps the version.
    pub fn set_price(&mut self, price: Money, anchor: Money, auto: bool, at: DateTime<Utc>) {
        self.current_price = price;
        self.anchor_price = Some(anchor);
        self.price_changed_at = Some(at);
        if auto {
            self.last_auto_adjusted_at = Some(at);
        }
        self.version += 1;
    }

    /// Contract creation locked the current price; any in-flight recommendation is stale.
    pub fn lock_for_contract(&mut self) -> Money {
        self.status = UnitStatus::Reserved;
        self.version += 1;
        self.current_price
    }
}

impl AggregateRoot for UnitRecord {
    type Id = UnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> UnitRecord {
        UnitRecord::new(
            UnitId::new(),
            TenantId::new(),
            SiteId::new(),
            "small",
            Money::from_major(200.0),
            UnitStatus::Available,
        )
    }

    #[test]
    fn anchor_falls_back_to_current_then_base() {
        let mut u = unit();
        assert_eq!(u.stepping_anchor(), Some(Money::from_major(200.0)));

        u.current_price = Money::from_major(210.0);
        assert_eq!(u.stepping_anchor(), Some(Money::from_major(210.0)));

        u.anchor_price = Some(Money::from_major(205.0));
        assert_eq!(u.stepping_anchor(), Some(Money::from_major(205.0)));

        u.anchor_price = None;
        u.current_price = Money::ZERO;
        assert_eq!(u.stepping_anchor(), Some(Money::from_major(200.0)));
    }

    #[test]
    fn set_price_bumps_version_and_tracks_auto_writes() {
        let mut u = unit();
        let at = Utc::now();

        u.set_price(Money::from_major(210.0), Money::from_major(210.0), false, at);
        assert_eq!(u.version(), 1);
        assert_eq!(u.last_auto_adjusted_at, None);

        u.set_price(Money::from_major(215.0), Money::from_major(215.0), true, at);
        assert_eq!(u.version(), 2);
        assert_eq!(u.last_auto_adjusted_at, Some(at));
    }

    #[test]
    fn non_positive_base_is_not_valid() {
        let mut u = unit();
        u.base_price = Some(Money::ZERO);
        assert_eq!(u.valid_base_price(), None);
        u.base_price = None;
        assert_eq!(u.valid_base_price(), None);
    }
}
