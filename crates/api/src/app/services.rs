//! Service wiring: the pricing engine, its optional background scheduler, and the event feed.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::response::sse::Event as SseEvent;
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use boxprice_core::TenantId;
use boxprice_events::EventBus;
use boxprice_infra::{EngineConfig, PricingCycleScheduler, PricingCycleSchedulerHandle, PricingEngine, SchedulerStats};

pub struct AppServices {
    engine: Arc<PricingEngine>,
    scheduler: Mutex<Option<PricingCycleSchedulerHandle>>,
}

impl AppServices {
    /// Services without a background scheduler; cycles run only on request.
    pub fn new(engine: Arc<PricingEngine>) -> Self {
        Self {
            engine,
            scheduler: Mutex::new(None),
        }
    }

    pub fn with_scheduler(self, scheduler: PricingCycleScheduler) -> Self {
        let handle = scheduler.spawn(self.engine.clone());
        if let Ok(mut slot) = self.scheduler.lock() {
            *slot = Some(handle);
        }
        self
    }

    pub fn engine(&self) -> &PricingEngine {
        &self.engine
    }

    pub fn scheduler_stats(&self) -> Option<SchedulerStats> {
        self.scheduler
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|h| h.stats()))
    }

    /// Queue a scheduled cycle; `false` when no scheduler runs.
    pub fn trigger_cycle(&self) -> bool {
        match self.scheduler.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(handle) => {
                    handle.trigger();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub async fn shutdown(&self) {
        let handle = self.scheduler.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

/// Build the engine from the environment and start the scheduler.
///
/// `DATABASE_URL` selects the Postgres price ledger when built with the `postgres` feature.
pub async fn build_services(config: EngineConfig) -> anyhow::Result<AppServices> {
    let scheduler = PricingCycleScheduler::from_config(&config);
    info!(
        interval_secs = scheduler.interval.as_secs(),
        auto_apply = config.auto_apply,
        "pricing scheduler enabled"
    );
    let engine = Arc::new(build_engine(config).await?);
    Ok(AppServices::new(engine).with_scheduler(scheduler))
}

#[cfg(feature = "postgres")]
async fn build_engine(config: EngineConfig) -> anyhow::Result<PricingEngine> {
    use boxprice_infra::store::PostgresPriceLedger;

    match database_url() {
        Some(url) => {
            let ledger = PostgresPriceLedger::connect(&url).await?;
            ledger.ensure_schema().await?;
            info!("using postgres price ledger");
            Ok(PricingEngine::with_ledger(config, Arc::new(ledger)))
        }
        None => {
            info!("DATABASE_URL not set; using in-memory price ledger");
            Ok(PricingEngine::in_memory(config))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_engine(config: EngineConfig) -> anyhow::Result<PricingEngine> {
    if database_url().is_some() {
        warn!("DATABASE_URL ignored: built without the postgres feature");
    }
    Ok(PricingEngine::in_memory(config))
}

fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty())
}

/// Tenant-filtered feed of engine events as SSE frames, with a heartbeat every 15 seconds.
pub fn tenant_event_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> UnboundedReceiverStream<Result<SseEvent, Infallible>> {
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();
    let subscription = services.engine().publisher().bus().subscribe();

    tokio::task::spawn_blocking(move || {
        let mut last_heartbeat = Instant::now();
        loop {
            match subscription.recv_timeout(Duration::from_millis(1000)) {
                Ok(envelope) => {
                    if envelope.tenant_id() != tenant_id {
                        continue;
                    }
                    let data = match serde_json::to_string(&envelope) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(error = %e, "event not serializable, skipped");
                            continue;
                        }
                    };
                    let frame = SseEvent::default()
                        .event(envelope.event_type())
                        .id(envelope.event_id().to_string())
                        .data(data);
                    if tx.send(Ok(frame)).is_err() {
                        break;
                    }
                    last_heartbeat = Instant::now();
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if last_heartbeat.elapsed() > Duration::from_secs(15) {
                        let heartbeat = SseEvent::default().event("heartbeat").data("{}");
                        if tx.send(Ok(heartbeat)).is_err() {
                            break;
                        }
                        last_heartbeat = Instant::now();
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    UnboundedReceiverStream::new(rx)
}
