//! Repeating background tasks
//!
//! Replaces bare `loop { sleep }` background loops with a handle that can be
//! signalled and joined. Tests drive ticks with a paused tokio clock.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub struct RepeatingTask {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    /// Spawn `callback` every `period`. The first run happens one full period
    /// after spawning.
    pub fn spawn<F>(name: impl Into<String>, period: Duration, mut callback: F) -> Self
    where
        F: FnMut() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = %task_name, period_secs = period.as_secs(), "repeating task started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        callback().await;
                    }
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!(task = %task_name, "repeating task stopped");
        });

        RepeatingTask {
            name,
            shutdown_tx,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task to stop and wait for it. A callback already running is
    /// allowed to finish first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            info!(task = %self.name, error = %e, "repeating task ended abnormally");
        }
    }
}
