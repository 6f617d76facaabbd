use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use boxprice_core::{ExperimentId, Money, TenantId};
use boxprice_experiments::{ExperimentCommand, ExperimentEvent, ExperimentExposure, PricingExperiment};

use crate::error::{EngineError, EngineResult, StoreError};

type ExperimentKey = (TenantId, ExperimentId);

/// Experiment aggregates per tenant. Commands run under the write lock, so lifecycle
/// transitions of one experiment are serialized.
#[derive(Debug, Default)]
pub struct ExperimentStore {
    inner: RwLock<HashMap<ExperimentKey, PricingExperiment>>,
}

impl ExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ExperimentKey, PricingExperiment>>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Storage("experiment store lock poisoned".to_string()))
    }

    /// Handle and apply a command, returning the emitted events.
    pub fn execute(
        &self,
        tenant_id: TenantId,
        experiment_id: ExperimentId,
        command: &ExperimentCommand,
    ) -> EngineResult<(PricingExperiment, Vec<ExperimentEvent>)> {
        let mut map = self.write()?;
        let key = (tenant_id, experiment_id);
        match map.entry(key) {
            Entry::Vacant(slot) => {
                if !matches!(command, ExperimentCommand::Create(_)) {
                    return Err(EngineError::not_found(format!("experiment {experiment_id}")));
                }
                let mut experiment = PricingExperiment::empty(experiment_id);
                let events = experiment.execute(command)?;
                slot.insert(experiment.clone());
                Ok((experiment, events))
            }
            Entry::Occupied(mut slot) => {
                if matches!(command, ExperimentCommand::Create(_)) {
                    return Err(StoreError::Conflict(format!("experiment {experiment_id} already exists")).into());
                }
                let events = slot.get_mut().execute(command)?;
                Ok((slot.get().clone(), events))
            }
        }
    }

    pub fn get(&self, tenant_id: TenantId, experiment_id: ExperimentId) -> Result<Option<PricingExperiment>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Storage("experiment store lock poisoned".to_string()))?;
        Ok(map.get(&(tenant_id, experiment_id)).cloned())
    }

    /// All experiments of a tenant, oldest first.
    pub fn list(&self, tenant_id: TenantId) -> Result<Vec<PricingExperiment>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Storage("experiment store lock poisoned".to_string()))?;
        let mut experiments: Vec<PricingExperiment> = map
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, e)| e.clone())
            .collect();
        experiments.sort_by_key(|e| (e.created_at(), e.experiment_id()));
        Ok(experiments)
    }
}

/// Exposures keyed by (experiment, visitor). Both writes are idempotent upserts.
#[derive(Debug, Default)]
pub struct ExposureStore {
    inner: RwLock<HashMap<(TenantId, ExperimentId, String), ExperimentExposure>>,
}

impl ExposureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the exposure unless the visitor was already exposed; returns the stored one.
    pub fn expose(&self, exposure: ExperimentExposure) -> Result<ExperimentExposure, StoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Storage("exposure store lock poisoned".to_string()))?;
        let key = (exposure.tenant_id, exposure.experiment_id, exposure.visitor_id.clone());
        Ok(map.entry(key).or_insert(exposure).clone())
    }

    /// Record a conversion; `true` if this call changed anything.
    pub fn record_conversion(
        &self,
        tenant_id: TenantId,
        experiment_id: ExperimentId,
        visitor_id: &str,
        revenue: Money,
        at: DateTime<Utc>,
    ) -> EngineResult<(ExperimentExposure, bool)> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Storage("exposure store lock poisoned".to_string()))?;
        let exposure = map
            .get_mut(&(tenant_id, experiment_id, visitor_id.to_string()))
            .ok_or_else(|| EngineError::not_found(format!("exposure of visitor '{visitor_id}'")))?;
        let changed = exposure.record_conversion(revenue, at);
        Ok((exposure.clone(), changed))
    }

    pub fn list(&self, tenant_id: TenantId, experiment_id: ExperimentId) -> Result<Vec<ExperimentExposure>, StoreError> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::Storage("exposure store lock poisoned".to_string()))?;
        Ok(map
            .iter()
            .filter(|((t, e, _), _)| *t == tenant_id && *e == experiment_id)
            .map(|(_, exposure)| exposure.clone())
            .collect())
    }
}
