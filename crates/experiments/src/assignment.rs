//! Deterministic visitor assignment.
//!
//! `u = H(experiment_id ':' visitor_id)` maps the pair to a point of `[0, 1)`. The first
//! `traffic_percentage` of the interval is in the experiment; within it the point is
//! rescaled and matched against cumulative variant weights. Same pair, same variant.

use sha2::{Digest, Sha256};

use boxprice_core::ExperimentId;

use crate::variant::Variant;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Index into the experiment's variants.
    Variant(usize),
    /// Outside the traffic slice: the visitor sees the normal price.
    NotInExperiment,
}

/// Stable point in `[0, 1)` for an (experiment, visitor) pair.
pub fn hash_unit_interval(experiment_id: ExperimentId, visitor_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(experiment_id.as_uuid().as_bytes());
    hasher.update(b":");
    hasher.update(visitor_id.as_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    // 53 bits so the conversion is exact and strictly below 1.0.
    (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
}

pub fn assign(
    experiment_id: ExperimentId,
    visitor_id: &str,
    traffic_percentage: f64,
    variants: &[Variant],
) -> Assignment {
    if variants.is_empty() {
        return Assignment::NotInExperiment;
    }
    let traffic = (traffic_percentage / 100.0).clamp(0.0, 1.0);
    let u = hash_unit_interval(experiment_id, visitor_id);
    if u >= traffic {
        return Assignment::NotInExperiment;
    }

    let v = u / traffic;
    let mut cumulative = 0.0;
    for (i, variant) in variants.iter().enumerate() {
        cumulative += variant.weight;
        if v < cumulative {
            return Assignment::Variant(i);
        }
    }
    // Float residue past the last cumulative weight.
    Assignment::Variant(variants.len() - 1)
}
