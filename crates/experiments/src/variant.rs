use serde::{Deserialize, Serialize};

use boxprice_core::Money;

use crate::error::ExperimentError;

const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierType {
    #[default]
    Multiplier,
    Percentage,
    Fixed,
}

/// Variant as written in an experiment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    pub name: String,
    pub weight: f64,
    pub price_modifier: f64,
    #[serde(default, rename = "type")]
    pub modifier_type: ModifierType,
}

/// How a variant transforms the price a visitor would otherwise see.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PriceModifier {
    /// `price * m`
    Multiplier(f64),
    /// `price * (1 + p / 100)`
    Percentage(f64),
    /// `price + amount`
    Fixed(Money),
}

impl PriceModifier {
    pub fn apply(&self, price: Money) -> Money {
        match self {
            PriceModifier::Multiplier(m) => price.scale(*m),
            PriceModifier::Percentage(p) => price.scale(1.0 + p / 100.0),
            PriceModifier::Fixed(amount) => price + *amount,
        }
    }

    pub fn is_identity(&self) -> bool {
        match self {
            PriceModifier::Multiplier(m) => (*m - 1.0).abs() < f64::EPSILON,
            PriceModifier::Percentage(p) => p.abs() < f64::EPSILON,
            PriceModifier::Fixed(amount) => *amount == Money::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    /// Fraction of in-experiment traffic, the weights of an experiment sum to 1.
    pub weight: f64,
    pub modifier: PriceModifier,
}

impl Variant {
    /// Price shown for this variant, clamped so the bounds hold regardless of the modifier.
    pub fn price_for(&self, price: Money, floor: Money, ceiling: Money) -> Money {
        self.modifier.apply(price).clamp_to(floor, ceiling)
    }
}

/// Validate variant configs. Weights may be fractions summing to 1 or percentages summing to 100.
pub fn validate_variants(configs: &[VariantConfig]) -> Result<Vec<Variant>, ExperimentError> {
    if configs.len() < 2 {
        return Err(ExperimentError::configuration("an experiment needs at least two variants"));
    }

    let mut names = std::collections::HashSet::new();
    for v in configs {
        let name = v.name.trim();
        if name.is_empty() {
            return Err(ExperimentError::configuration("variant name cannot be empty"));
        }
        if !names.insert(name.to_string()) {
            return Err(ExperimentError::configuration(format!("duplicate variant '{name}'")));
        }
        if !v.weight.is_finite() || v.weight <= 0.0 {
            return Err(ExperimentError::configuration(format!(
                "variant '{name}' weight must be positive"
            )));
        }
        if !v.price_modifier.is_finite() {
            return Err(ExperimentError::configuration(format!(
                "variant '{name}' modifier must be finite"
            )));
        }
        let valid_modifier = match v.modifier_type {
            ModifierType::Multiplier => v.price_modifier > 0.0,
            ModifierType::Percentage => v.price_modifier > -100.0,
            ModifierType::Fixed => true,
        };
        if !valid_modifier {
            return Err(ExperimentError::configuration(format!(
                "variant '{name}' modifier {} would make prices non-positive",
                v.price_modifier
            )));
        }
    }

    let sum: f64 = configs.iter().map(|v| v.weight).sum();
    let scale = if (sum - 1.0).abs() <= WEIGHT_TOLERANCE {
        1.0
    } else if (sum - 100.0).abs() <= WEIGHT_TOLERANCE * 100.0 {
        100.0
    } else {
        return Err(ExperimentError::configuration(format!(
            "variant weights must sum to 1.0 or 100 (got {sum})"
        )));
    };

    Ok(configs
        .iter()
        .map(|v| Variant {
            name: v.name.trim().to_string(),
            weight: v.weight / scale,
            modifier: match v.modifier_type {
                ModifierType::Multiplier => PriceModifier::Multiplier(v.price_modifier),
                ModifierType::Percentage => PriceModifier::Percentage(v.price_modifier),
                ModifierType::Fixed => PriceModifier::Fixed(Money::from_major(v.price_modifier)),
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str, weight: f64, modifier: f64, modifier_type: ModifierType) -> VariantConfig {
        VariantConfig {
            name: name.into(),
            weight,
            price_modifier: modifier,
            modifier_type,
        }
    }

    #[test]
    fn percentages_are_normalised_to_fractions() {
        let variants = validate_variants(&[
            cfg("control", 50.0, 1.0, ModifierType::Multiplier),
            cfg("plus10", 50.0, 10.0, ModifierType::Percentage),
        ])
        .unwrap();
        assert_eq!(variants[0].weight, 0.5);
        assert_eq!(variants[1].weight, 0.5);
        assert_eq!(
            variants[1].modifier.apply(Money::from_major(100.0)),
            Money::from_major(110.0)
        );
    }

    #[test]
    fn weights_must_sum_to_one() {
        let err = validate_variants(&[
            cfg("a", 0.5, 1.0, ModifierType::Multiplier),
            cfg("b", 0.4, 1.1, ModifierType::Multiplier),
        ])
        .unwrap_err();
        assert!(matches!(err, ExperimentError::Configuration(_)));
    }

    #[test]
    fn rejects_single_duplicate_or_degenerate_variants() {
        assert!(validate_variants(&[cfg("a", 1.0, 1.0, ModifierType::Multiplier)]).is_err());
        assert!(
            validate_variants(&[
                cfg("a", 0.5, 1.0, ModifierType::Multiplier),
                cfg("a", 0.5, 1.1, ModifierType::Multiplier),
            ])
            .is_err()
        );
        assert!(
            validate_variants(&[
                cfg("a", 0.5, 1.0, ModifierType::Multiplier),
                cfg("b", 0.5, 0.0, ModifierType::Multiplier),
            ])
            .is_err()
        );
    }

    #[test]
    fn fixed_modifier_is_clamped_to_bounds() {
        let v = Variant {
            name: "minus50".into(),
            weight: 0.5,
            modifier: PriceModifier::Fixed(Money::from_major(-50.0)),
        };
        let shown = v.price_for(
            Money::from_major(100.0),
            Money::from_major(80.0),
            Money::from_major(150.0),
        );
        assert_eq!(shown, Money::from_major(80.0));
    }

    #[test]
    fn config_accepts_type_alias_key() {
        let v: VariantConfig =
            serde_json::from_str(r#"{"name":"b","weight":0.5,"price_modifier":5,"type":"fixed"}"#).unwrap();
        assert_eq!(v.modifier_type, ModifierType::Fixed);
    }
}
