//! Significance testing over variant conversion counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use boxprice_core::Money;

use crate::exposure::ExperimentExposure;
use crate::variant::Variant;

/// Observed counts for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub variant: String,
    pub exposures: u64,
    pub conversions: u64,
    pub revenue: Money,
}

impl VariantStats {
    pub fn empty(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            exposures: 0,
            conversions: 0,
            revenue: Money::ZERO,
        }
    }

    pub fn conversion_rate(&self) -> f64 {
        if self.exposures == 0 {
            return 0.0;
        }
        self.conversions as f64 / self.exposures as f64
    }

    /// Revenue per exposure in major units.
    pub fn revenue_per_exposure(&self) -> f64 {
        if self.exposures == 0 {
            return 0.0;
        }
        self.revenue.as_major() / self.exposures as f64
    }

    /// Tally exposures per variant, in variant order. Exposures for unknown variants are ignored.
    pub fn tally<'a>(
        variants: &[Variant],
        exposures: impl IntoIterator<Item = &'a ExperimentExposure>,
    ) -> Vec<VariantStats> {
        let mut stats: Vec<VariantStats> = variants.iter().map(|v| Self::empty(&v.name)).collect();
        for exposure in exposures {
            let Some(s) = stats.iter_mut().find(|s| s.variant == exposure.variant) else {
                continue;
            };
            s.exposures += 1;
            if exposure.converted {
                s.conversions += 1;
                s.revenue = s.revenue + exposure.revenue.unwrap_or(Money::ZERO);
            }
        }
        stats
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeDecision {
    /// Some variant has not reached the minimum sample size.
    InsufficientData,
    /// Samples are sufficient but the difference does not clear the confidence level.
    Inconclusive,
    Winner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentOutcome {
    pub decision: OutcomeDecision,
    pub winning_variant: Option<String>,
    /// Revenue-per-exposure lift of the winner over control, in percent.
    pub revenue_lift: Option<f64>,
    pub p_value: Option<f64>,
    pub variants: Vec<VariantStats>,
    pub evaluated_at: DateTime<Utc>,
}

/// Two-sided p-value of a two-proportion z-test.
pub fn two_proportion_p_value(a: &VariantStats, b: &VariantStats) -> f64 {
    if a.exposures == 0 || b.exposures == 0 {
        return 1.0;
    }
    let (n1, n2) = (a.exposures as f64, b.exposures as f64);
    let pooled = (a.conversions + b.conversions) as f64 / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se == 0.0 {
        return 1.0;
    }
    let z = (a.conversion_rate() - b.conversion_rate()) / se;
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

// Abramowitz & Stegun 7.1.26, |error| < 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Decide an experiment from per-variant stats. The first entry is the control.
///
/// The leader is the variant with the highest conversion rate, ties broken by revenue per
/// exposure. It wins only if its difference against the runner-up clears `confidence_level`.
pub fn evaluate(
    stats: Vec<VariantStats>,
    min_sample_size: u64,
    confidence_level: f64,
    at: DateTime<Utc>,
) -> ExperimentOutcome {
    let undecided = |decision, p_value, variants| ExperimentOutcome {
        decision,
        winning_variant: None,
        revenue_lift: None,
        p_value,
        variants,
        evaluated_at: at,
    };

    if stats.len() < 2 || stats.iter().any(|s| s.exposures < min_sample_size.max(1)) {
        return undecided(OutcomeDecision::InsufficientData, None, stats);
    }

    let mut ranked: Vec<&VariantStats> = stats.iter().collect();
    ranked.sort_by(|a, b| {
        b.conversion_rate()
            .total_cmp(&a.conversion_rate())
            .then(b.revenue_per_exposure().total_cmp(&a.revenue_per_exposure()))
    });
    let (leader, runner_up) = (ranked[0], ranked[1]);
    let p_value = two_proportion_p_value(leader, runner_up);

    if p_value > 1.0 - confidence_level {
        return undecided(OutcomeDecision::Inconclusive, Some(p_value), stats);
    }

    let control_rpe = stats[0].revenue_per_exposure();
    let revenue_lift = (control_rpe > 0.0)
        .then(|| (leader.revenue_per_exposure() - control_rpe) / control_rpe * 100.0);
    let winning_variant = Some(leader.variant.clone());

    ExperimentOutcome {
        decision: OutcomeDecision::Winner,
        winning_variant,
        revenue_lift,
        p_value: Some(p_value),
        variants: stats,
        evaluated_at: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(name: &str, exposures: u64, conversions: u64, revenue: f64) -> VariantStats {
        VariantStats {
            variant: name.into(),
            exposures,
            conversions,
            revenue: Money::from_major(revenue),
        }
    }

    fn now() -> DateTime<Utc> {
        "2026-10-19T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-4);
    }

    #[test]
    fn below_min_sample_is_insufficient() {
        let outcome = evaluate(
            vec![stats("control", 99, 10, 1000.0), stats("plus10", 500, 80, 8800.0)],
            100,
            0.95,
            now(),
        );
        assert_eq!(outcome.decision, OutcomeDecision::InsufficientData);
        assert!(outcome.winning_variant.is_none());
    }

    #[test]
    fn clear_difference_picks_winner_with_lift() {
        // 10% vs 14% over 1000 exposures each: z ~ 2.75, p ~ 0.006
        let outcome = evaluate(
            vec![stats("control", 1000, 100, 10_000.0), stats("plus10", 1000, 140, 15_400.0)],
            100,
            0.95,
            now(),
        );
        assert_eq!(outcome.decision, OutcomeDecision::Winner);
        assert_eq!(outcome.winning_variant.as_deref(), Some("plus10"));
        let p = outcome.p_value.unwrap();
        assert!(p > 0.004 && p < 0.008, "p = {p}");
        // 15.4 vs 10.0 per exposure
        assert!((outcome.revenue_lift.unwrap() - 54.0).abs() < 1e-9);
    }

    #[test]
    fn small_difference_is_inconclusive() {
        let outcome = evaluate(
            vec![stats("control", 1000, 100, 10_000.0), stats("plus10", 1000, 105, 11_550.0)],
            100,
            0.95,
            now(),
        );
        assert_eq!(outcome.decision, OutcomeDecision::Inconclusive);
        assert!(outcome.winning_variant.is_none());
        assert!(outcome.p_value.unwrap() > 0.05);
    }

    #[test]
    fn equal_rates_rank_by_revenue_per_exposure() {
        let a = stats("control", 1000, 100, 10_000.0);
        let b = stats("plus10", 1000, 100, 11_000.0);
        assert_eq!(two_proportion_p_value(&a, &b), 1.0);
        let outcome = evaluate(vec![a, b], 100, 0.95, now());
        // Equal rates never clear significance.
        assert_eq!(outcome.decision, OutcomeDecision::Inconclusive);
    }

    #[test]
    fn tally_counts_only_known_variants() {
        use crate::variant::PriceModifier;
        use boxprice_core::{ExperimentId, TenantId};

        let variants = vec![
            Variant {
                name: "control".into(),
                weight: 0.5,
                modifier: PriceModifier::Multiplier(1.0),
            },
            Variant {
                name: "plus10".into(),
                weight: 0.5,
                modifier: PriceModifier::Multiplier(1.1),
            },
        ];
        let (experiment, tenant) = (ExperimentId::new(), TenantId::new());
        let mut converted = ExperimentExposure::new(
            experiment, tenant, "v-1", "plus10", None, Money::from_major(110.0), now(),
        );
        converted.record_conversion(Money::from_major(110.0), now());
        let exposures = vec![
            ExperimentExposure::new(experiment, tenant, "v-0", "control", None, Money::from_major(100.0), now()),
            converted,
            ExperimentExposure::new(experiment, tenant, "v-2", "retired", None, Money::from_major(90.0), now()),
        ];

        let tallied = VariantStats::tally(&variants, &exposures);
        assert_eq!(tallied[0].exposures, 1);
        assert_eq!(tallied[0].conversions, 0);
        assert_eq!(tallied[1].exposures, 1);
        assert_eq!(tallied[1].conversions, 1);
        assert_eq!(tallied[1].revenue, Money::from_major(110.0));
    }
}
