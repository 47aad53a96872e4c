use tokio::signal;
use tokio::sync::watch;

/// Broadcasts shutdown to background loops and pool workers.
pub(crate) struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

pub(crate) fn channel() -> (ShutdownTrigger, watch::Receiver<bool>) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, receiver)
}

impl ShutdownTrigger {
    pub(crate) fn trigger(&self) {
        if self.sender.send(true).is_err() {
            tracing::warn!("No background tasks listening for shutdown");
        }
    }
}

pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_every_receiver() {
        let (trigger, first) = channel();
        let mut second = first.clone();

        trigger.trigger();

        second.changed().await.expect("change observed");
        assert!(*first.borrow());
        assert!(*second.borrow());
    }
}
