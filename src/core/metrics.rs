use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe_pipeline_metrics();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe_pipeline_metrics() {
    describe_counter!("attempts_started_total", "Attempts created, by skill");
    describe_counter!("objective_grading_total", "Listening and reading attempts graded");
    describe_counter!("evaluation_jobs_total", "Writing and speaking evaluations, by outcome");
    describe_histogram!(
        "evaluation_duration_seconds",
        Unit::Seconds,
        "Wall time from claim to stored evaluation"
    );
    describe_counter!("sync_deliveries_total", "Progress store deliveries, by outcome");
    describe_counter!("reconciliation_swept_total", "Attempts retried by reconciliation");
    describe_counter!("evaluations_recovered_total", "Stale evaluations marked failed");
    describe_counter!("task_pool_panics_total", "Background jobs that panicked");
    describe_counter!("task_queue_rejected_total", "Jobs rejected because the queue was full");
    describe_gauge!("task_queue_depth", "Jobs waiting in the task queue");
    describe_counter!("http_requests_total", "HTTP requests served, by status class");
}
