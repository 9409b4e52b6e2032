use crate::utils::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Work invoked on every scheduler tick
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    async fn run_periodic(&self) -> Result<()>;
}

/// Running scheduler task; stop it with [`PeriodicHandle::shutdown`]
pub struct PeriodicHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PeriodicHandle {
    /// Stop ticking and wait for the loop to exit.
    ///
    /// A run already in progress is allowed to finish first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            tracing::warn!("Periodic task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Call `task` every `every` until shut down. The first tick fires immediately.
pub fn spawn_periodic<T: PeriodicTask>(task: Arc<T>, every: Duration) -> PeriodicHandle {
    let (tx, mut rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("Starting periodic scheduler, tick every {:?}", every);

        loop {
            tokio::select! {
                biased;
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    if let Err(e) = task.run_periodic().await {
                        tracing::error!("Periodic run failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("Periodic scheduler stopped");
    });

    PeriodicHandle {
        shutdown: Some(tx),
        task: handle,
    }
}
