use thiserror::Error;

use boxprice_core::DomainError;

use crate::experiment::ExperimentStatus;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExperimentError {
    /// Invalid definition; rejected before the experiment can ever run.
    #[error("experiment configuration error: {0}")]
    Configuration(String),

    #[error("cannot {action} an experiment in status {from:?}")]
    InvalidTransition {
        from: ExperimentStatus,
        action: &'static str,
    },

    #[error("experiment is not running (status {0:?})")]
    NotRunning(ExperimentStatus),

    /// Completed experiments are immutable.
    #[error("experiment is completed and frozen")]
    Frozen,

    #[error("unknown variant '{0}'")]
    UnknownVariant(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ExperimentError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
