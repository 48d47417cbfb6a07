//! Background auto-close of expired elections
//!
//! Elections are already closed lazily whenever they are read; the sweeper
//! makes the close happen (and get journaled) close to the deadline even when
//! nobody is looking at the election.

use crate::clock::Clock;
use crate::engine::ElectionController;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Periodically stops auto-close elections whose window has ended
pub struct AutoCloseSweeper {
    controller: Arc<ElectionController>,
    clock: Arc<dyn Clock>,
    interval: std::time::Duration,
    stop_signal: mpsc::Receiver<()>,
}

impl AutoCloseSweeper {
    pub fn new(
        controller: Arc<ElectionController>,
        clock: Arc<dyn Clock>,
        interval: std::time::Duration,
        stop_signal: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            controller,
            clock,
            interval,
            stop_signal,
        }
    }

    /// Start the sweep loop; returns once a stop signal arrives
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.interval);

        tracing::info!(
            "🧹 Auto-close sweeper started (interval: {}s)",
            self.interval.as_secs_f64()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once() {
                        tracing::error!("❌ Auto-close sweep failed: {}", e);
                    }
                }
                _ = self.stop_signal.recv() => {
                    tracing::info!("🛑 Auto-close sweeper stopping");
                    break;
                }
            }
        }

        tracing::info!("✅ Auto-close sweeper stopped");
    }

    fn sweep_once(&self) -> Result<usize> {
        let stopped = self.controller.sweep_expired(self.clock.now())?;
        for id in &stopped {
            tracing::debug!("⌛ Sweeper closed election {}", id);
        }
        Ok(stopped.len())
    }
}

/// Handle to a sweeper running on the tokio runtime
pub struct SweeperHandle {
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Spawn a sweeper onto the current runtime
    pub fn spawn(
        controller: Arc<ElectionController>,
        clock: Arc<dyn Clock>,
        interval: std::time::Duration,
    ) -> Self {
        let (stop, stop_signal) = mpsc::channel(1);
        let sweeper = AutoCloseSweeper::new(controller, clock, interval, stop_signal);
        Self {
            stop,
            task: tokio::spawn(sweeper.run()),
        }
    }

    /// Signal the sweeper and wait for it to finish
    pub async fn shutdown(self) -> Result<()> {
        // A closed channel means the task has already ended
        let _ = self.stop.send(()).await;
        self.task
            .await
            .map_err(|e| crate::Error::internal(format!("sweeper task failed: {e}")))
    }
}
