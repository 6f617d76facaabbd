use std::sync::Arc;

use anyhow::Context;

use boxprice_infra::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    boxprice_observability::init();

    let config = EngineConfig::from_env().context("invalid BOXPRICE_* configuration")?;
    let bind_addr = std::env::var("BOXPRICE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let services = Arc::new(boxprice_api::app::services::build_services(config).await?);
    let app = boxprice_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    services.shutdown().await;
    Ok(())
}
