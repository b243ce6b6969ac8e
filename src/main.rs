use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use story_forge::{AppConfig, ModelRegistry, build_router, model::ModelStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(candidates = ?config.model_candidates, "loading model artifacts");

    let registry = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || ModelRegistry::initialize(config.as_ref())).await?
    };
    if let ModelStatus::Unavailable { failures } = registry.status() {
        tracing::error!(
            attempted = failures.len(),
            "no model could be loaded, story generation will be unavailable"
        );
    }

    let router = build_router(config.clone(), Arc::new(registry));

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "story server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
