use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::signal;
use tracing::{error, info};

use crate::config::BridgeConfig;
use crate::process_manager::ProcessManager;
use crate::server::BridgeServer;

/// Owns the network event loop. One cooperative reactor drives both
/// channels; blocking work is pushed onto workers by the components it
/// calls into, never onto the loop itself.
pub struct BridgeRuntime {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl BridgeRuntime {
    /// Runs the bridge on the calling task until ctrl-c.
    pub async fn run_blocking(
        config: BridgeConfig,
        manager: Arc<dyn ProcessManager>,
    ) -> Result<()> {
        let server = BridgeServer::new(config, manager);
        tokio::select! {
            res = server.run_forever() => res,
            _ = signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                Ok(())
            }
        }
    }

    /// Starts the event loop on a dedicated background thread and returns
    /// immediately, so an embedding host never donates its own event loop
    /// or UI thread to the bridge.
    pub fn start_background(
        config: BridgeConfig,
        manager: Arc<dyn ProcessManager>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = std::thread::Builder::new()
            .name("bridge-reactor".to_owned())
            .spawn(move || {
                let outcome = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("failed building bridge reactor runtime")
                    .and_then(|runtime| {
                        let server = BridgeServer::new(config, manager);
                        runtime.block_on(server.run_forever())
                    });
                if let Err(err) = outcome {
                    error!("bridge reactor exited: {err:#}");
                }
                flag.store(false, Ordering::SeqCst);
            })
            .context("failed spawning bridge reactor thread")?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Whether the background event loop is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Waits for the reactor thread. The loop has no shutdown transition,
    /// so this only returns after a bind failure or runtime error.
    pub fn join(mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("bridge reactor thread panicked"))?;
        }
        Ok(())
    }
}
