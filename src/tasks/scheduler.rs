use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::shutdown;
use crate::core::state::AppState;
use crate::tasks::jobs::PipelineJobs;
use crate::tasks::pool::{self, JobReceiver};
use crate::tasks::{reconciliation, recovery};

const RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) fn spawn_pool(
    state: &AppState,
    receiver: JobReceiver,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let workers = state.settings().workers().pool_size;
    tracing::info!(workers, "Starting task pool");
    pool::spawn_workers(Arc::new(PipelineJobs::new(state.clone())), receiver, workers, shutdown)
}

/// Worker process: task pool plus the periodic reconciliation, stale-evaluation and
/// pending-redispatch loops. Returns after SIGINT/SIGTERM once every loop has stopped.
pub(crate) async fn run(state: AppState, receiver: JobReceiver) -> Result<()> {
    let (trigger, shutdown_rx) = shutdown::channel();

    let mut handles = spawn_pool(&state, receiver, shutdown_rx.clone());
    handles.push(tokio::spawn(reconciliation_loop(state.clone(), shutdown_rx.clone())));
    handles.push(tokio::spawn(stale_evaluation_loop(state.clone(), shutdown_rx.clone())));
    handles.push(tokio::spawn(redispatch_loop(state.clone(), shutdown_rx)));

    shutdown::shutdown_signal().await;
    trigger.trigger();
    join_all(handles).await;

    Ok(())
}

pub(crate) async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }
}

async fn reconciliation_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let seconds = state.settings().reconciliation().interval_seconds;
    let mut tick = interval(Duration::from_secs(seconds));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = reconciliation::run_once(&state).await {
                    tracing::error!(error = %err, "Reconciliation sweep failed");
                }
            }
        }
    }
}

async fn stale_evaluation_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(RECOVERY_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = recovery::recover_stale_evaluations(&state).await {
                    tracing::error!(error = %err, "Stale evaluation recovery failed");
                }
            }
        }
    }
}

async fn redispatch_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(RECOVERY_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = recovery::redispatch_pending(&state).await {
                    tracing::error!(error = %err, "Pending evaluation redispatch failed");
                }
            }
        }
    }
}
