use crate::config::EngineConfig;
use crate::config_loader::ConfigLoader;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Receiver side of the live configuration.
///
/// Components read `borrow()` at the start of each unit of work, so a reload
/// applies to the next event rather than mid-flight.
pub type SharedConfig = watch::Receiver<Arc<EngineConfig>>;

/// How often the file watcher checks whether anyone still listens.
const SUBSCRIBER_POLL: Duration = Duration::from_millis(250);

pub struct ConfigWatcher {
    tx: watch::Sender<Arc<EngineConfig>>,
}

impl ConfigWatcher {
    /// Creates a new configuration watcher with an initial configuration.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(initial_config: EngineConfig) -> (Self, SharedConfig) {
        let (tx, rx) = watch::channel(Arc::new(initial_config));
        (Self { tx }, rx)
    }

    /// Replaces the live configuration after validating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid; the previous
    /// configuration stays in effect.
    pub fn publish(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.tx.send_replace(Arc::new(config));
        Ok(())
    }

    /// Returns another receiver for the live configuration.
    #[must_use]
    pub fn subscribe(&self) -> SharedConfig {
        self.tx.subscribe()
    }

    /// Watches the configuration file for changes and broadcasts updates.
    ///
    /// Invalid reloads are logged and ignored. Runs until every [`SharedConfig`] receiver has been dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(&self, config_path: impl Into<PathBuf>) -> Result<()> {
        let tx = self.tx.clone();
        let config_path: PathBuf = config_path.into();

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(&config_path, RecursiveMode::NonRecursive)?;

            loop {
                let event = match notify_rx.recv_timeout(SUBSCRIBER_POLL) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        if tx.is_closed() {
                            tracing::debug!("No config subscribers left, stopping watcher");
                            break;
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                if event.kind.is_modify() {
                    tracing::info!(path = %config_path.display(), "Config file changed, reloading...");
                    match ConfigLoader::load_from(&config_path) {
                        Ok(new_config) => {
                            if tx.send(Arc::new(new_config)).is_err() {
                                tracing::debug!("No config subscribers left, stopping watcher");
                                break;
                            }
                            tracing::info!("Config reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload config, keeping previous: {:#}", e);
                        }
                    }
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
