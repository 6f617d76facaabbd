//! Background pricing cycle: every `interval` (or on demand) run the batch for every tenant's
//! sites, then the alert scans.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use boxprice_core::{SiteId, TenantId};

use crate::batch::{CancellationFlag, CycleReport};
use crate::config::EngineConfig;
use crate::engine::PricingEngine;
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct PricingCycleScheduler {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub run_on_start: bool,
}

impl Default for PricingCycleScheduler {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
            run_on_start: true,
        }
    }
}

/// Counters for the health endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub cycles_run: u64,
    pub cycles_failed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_reports: Vec<CycleReport>,
}

#[derive(Debug)]
pub struct PricingCycleSchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    trigger: mpsc::Sender<()>,
    cancel: CancellationFlag,
    stats: Arc<Mutex<SchedulerStats>>,
    join: Option<JoinHandle<()>>,
}

impl PricingCycleSchedulerHandle {
    /// Ask for a cycle now. Triggers coalesce: if one is already queued this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    pub fn stats(&self) -> SchedulerStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stop after the unit in flight and wait for the task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "pricing scheduler task failed");
            }
        }
    }
}

impl PricingCycleScheduler {
    pub fn from_config(config: &EngineConfig) -> Self {
        let interval = config
            .cycle()
            .to_std()
            .unwrap_or(Self::default().interval);
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn spawn(&self, engine: Arc<PricingEngine>) -> PricingCycleSchedulerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let cancel = CancellationFlag::new();
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));

        let join = tokio::spawn(scheduler_loop(
            self.clone(),
            engine,
            shutdown_rx,
            trigger_rx,
            cancel.clone(),
            stats.clone(),
        ));

        PricingCycleSchedulerHandle {
            shutdown: Some(shutdown_tx),
            trigger: trigger_tx,
            cancel,
            stats,
            join: Some(join),
        }
    }
}

enum Wake {
    Tick,
    Trigger,
    Retry,
}

async fn scheduler_loop(
    cfg: PricingCycleScheduler,
    engine: Arc<PricingEngine>,
    mut shutdown_rx: oneshot::Receiver<()>,
    mut trigger_rx: mpsc::Receiver<()>,
    cancel: CancellationFlag,
    stats: Arc<Mutex<SchedulerStats>>,
) {
    info!(interval_secs = cfg.interval.as_secs(), "pricing scheduler started");

    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !cfg.run_on_start {
        ticker.tick().await;
    }

    let mut failures: u32 = 0;
    let mut retry_in: Option<Duration> = None;

    loop {
        let wake = match retry_in.take() {
            Some(delay) => tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                _ = tokio::time::sleep(delay) => Wake::Retry,
            },
            None => tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => Wake::Tick,
                msg = trigger_rx.recv() => match msg {
                    Some(()) => Wake::Trigger,
                    None => break,
                },
            },
        };
        // Coalesce triggers that arrived while waiting.
        while trigger_rx.try_recv().is_ok() {}

        let reason = match wake {
            Wake::Tick => "schedule",
            Wake::Trigger => "trigger",
            Wake::Retry => "retry",
        };
        let now = Utc::now();
        match run_all(&engine, &cancel, now).await {
            Ok(reports) => {
                failures = 0;
                info!(reason, tenants = reports.len(), "pricing cycle complete");
                update(&stats, |s| {
                    s.cycles_run += 1;
                    s.last_run_at = Some(now);
                    s.last_error = None;
                    s.last_reports = reports;
                });
            }
            Err(e) => {
                failures += 1;
                warn!(reason, attempt = failures, error = %e, "pricing cycle failed");
                update(&stats, |s| {
                    s.cycles_failed += 1;
                    s.last_error = Some(e.to_string());
                });
                if failures <= cfg.max_retries {
                    retry_in = Some(backoff(cfg.base_backoff, failures));
                } else {
                    failures = 0;
                }
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    info!("pricing scheduler stopped");
}

/// One cycle over every tenant that has units, followed by the alert scans of its sites.
async fn run_all(
    engine: &PricingEngine,
    cancel: &CancellationFlag,
    now: DateTime<Utc>,
) -> Result<Vec<CycleReport>, StoreError> {
    let mut by_tenant: BTreeMap<TenantId, Vec<SiteId>> = BTreeMap::new();
    for (tenant_id, site_id) in engine.ledger().site_directory().await? {
        by_tenant.entry(tenant_id).or_default().push(site_id);
    }

    let mut reports = Vec::with_capacity(by_tenant.len());
    for (tenant_id, sites) in by_tenant {
        if cancel.is_cancelled() {
            break;
        }
        reports.push(engine.batch().run_cycle(tenant_id, &sites, cancel, now).await);
        for site_id in sites {
            if let Err(e) = engine.alerting().scan_site(tenant_id, site_id, now).await {
                warn!(tenant = %tenant_id, site = %site_id, error = %e, "alert scan failed");
            }
        }
    }
    Ok(reports)
}

fn update(stats: &Mutex<SchedulerStats>, f: impl FnOnce(&mut SchedulerStats)) {
    match stats.lock() {
        Ok(mut stats) => f(&mut stats),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped at 10s.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
