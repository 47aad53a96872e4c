pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use crate::core::{config::Settings, redis::RedisHandle, shutdown, state::AppState, telemetry};
use crate::services::external::Capabilities;
use crate::tasks::pool::{JobQueue, JobReceiver};
use crate::tasks::scheduler;

async fn bootstrap(component: &'static str) -> anyhow::Result<(AppState, JobReceiver)> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings, component)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; rate limiting disabled");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let capabilities = Capabilities::from_settings(&settings)?;
    let (jobs, receiver) = JobQueue::bounded(settings.workers().queue_capacity);

    Ok((AppState::new(settings, db_pool, redis, capabilities, jobs), receiver))
}

/// API process. Runs its own task pool so accepted submissions start evaluating
/// without waiting for the worker's redispatch scan.
pub async fn run() -> anyhow::Result<()> {
    let (state, receiver) = bootstrap("api").await?;

    let (trigger, shutdown_rx) = shutdown::channel();
    let pool = scheduler::spawn_pool(&state, receiver, shutdown_rx);

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Bandscore API listening"
    );

    let result = axum::serve(listener, app).with_graceful_shutdown(shutdown::shutdown_signal()).await;

    trigger.trigger();
    scheduler::join_all(pool).await;

    state.redis().disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    let (state, receiver) = bootstrap("worker").await?;

    let result = scheduler::run(state.clone(), receiver).await;

    state.redis().disconnect().await;
    tracing::info!("Redis disconnected");

    result
}
