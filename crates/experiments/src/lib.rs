//! `boxprice-experiments`: controlled price experiments.
//!
//! - [`PricingExperiment`]: aggregate with a `draft -> running <-> paused -> completed | cancelled`
//!   lifecycle, driven by commands and evolved by events.
//! - [`assignment`]: stateless, hash-based visitor assignment (no lookup, no lock).
//! - [`stats`]: two-proportion z-test and winner selection.

pub mod assignment;
pub mod error;
pub mod experiment;
pub mod exposure;
pub mod stats;
pub mod variant;

pub use assignment::{Assignment, assign};
pub use error::ExperimentError;
pub use experiment::{
    CompleteExperiment, CreateExperiment, ExperimentCommand, ExperimentDefinition, ExperimentEvent,
    ExperimentStatus, PricingExperiment, TransitionExperiment,
};
pub use exposure::ExperimentExposure;
pub use stats::{ExperimentOutcome, OutcomeDecision, VariantStats};
pub use variant::{ModifierType, PriceModifier, Variant, VariantConfig, validate_variants};
