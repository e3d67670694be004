//! Renamer events
//!
//! The renamer reports what it did through a [`Notifier`]. Delivery is fire
//! and forget: a failing notifier is logged and never affects the pass.
//! [`BroadcastNotifier`] fans events out to any number of subscribers.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Something the renamer wants the rest of the system to know
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RenamerEvent {
    /// A release was placed in the library; trailer search and UI refresh hook in here
    Renamed {
        message: String,
        identifier: String,
        quality: String,
        destination_dir: Option<PathBuf>,
        filename: Option<String>,
        renamed_files: Vec<PathBuf>,
    },
    /// A better release already exists, the incoming one was left alone
    RenamingCanceled {
        message: String,
        identifier: String,
    },
}

impl RenamerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Renamed { .. } => "renamer.after",
            Self::RenamingCanceled { .. } => "movie.renaming.canceled",
        }
    }
}

/// Receives renamer events
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: RenamerEvent) -> Result<()>;
}

/// Deliver an event, logging instead of propagating failures
pub async fn notify_logged(notifier: &dyn Notifier, event: RenamerEvent) {
    let name = event.name();
    if let Err(e) = notifier.notify(event).await {
        warn!(event = name, error = %e, "Failed firing renamer event");
    }
}

/// Notifier configuration
#[derive(Debug, Clone)]
pub struct BroadcastNotifierConfig {
    /// Broadcast channel capacity
    pub channel_capacity: usize,
}

impl Default for BroadcastNotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Notifier publishing on a tokio broadcast channel
pub struct BroadcastNotifier {
    event_tx: broadcast::Sender<RenamerEvent>,
}

impl BroadcastNotifier {
    pub fn new(config: BroadcastNotifierConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.channel_capacity);
        Self { event_tx }
    }

    pub fn with_defaults() -> Self {
        Self::new(BroadcastNotifierConfig::default())
    }

    /// Subscribe to renamer events
    pub fn subscribe(&self) -> broadcast::Receiver<RenamerEvent> {
        self.event_tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, event: RenamerEvent) -> Result<()> {
        // No subscribers is not an error
        match self.event_tx.send(event) {
            Ok(receivers) => debug!(receivers, "Broadcast renamer event"),
            Err(_) => debug!("No subscribers for renamer event"),
        }
        Ok(())
    }
}
