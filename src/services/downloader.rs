//! Downloader integration seam
//!
//! The renamer never talks to a download client directly. It asks a
//! [`Downloader`] for the live state of every transfer and sends it the few
//! commands reconciliation needs.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::releases::TORRENT_PROTOCOLS;

/// Live state of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Busy,
    Seeding,
    Failed,
    Completed,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Seeding => "seeding",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

/// A transfer as reported by a downloader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadStatusItem {
    pub id: String,
    /// Name of the downloader reporting the item
    pub downloader: String,
    pub name: String,
    pub status: DownloadState,
    pub folder: Option<PathBuf>,
    /// Seconds left, None when unknown
    pub timeleft: Option<i64>,
    pub seed_ratio: Option<f64>,
}

impl DownloadStatusItem {
    /// Id, downloader and folder are all known
    pub fn is_info_complete(&self) -> bool {
        !self.id.is_empty() && !self.downloader.is_empty() && self.folder.is_some()
    }
}

/// What is known about the download behind an organization pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadInfo {
    /// Explicit release folder to organize
    pub folder: Option<PathBuf>,
    pub id: Option<String>,
    pub downloader: Option<String>,
    /// Filled from the matching release
    pub imdb_id: Option<String>,
    pub quality: Option<String>,
    pub protocol: Option<String>,
}

impl DownloadInfo {
    pub fn for_folder(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: Some(folder.into()),
            ..Default::default()
        }
    }

    pub fn with_download(mut self, id: impl Into<String>, downloader: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self.downloader = Some(downloader.into());
        self
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    /// Source files may still be read by a seeding client
    pub fn is_torrent(&self) -> bool {
        self.protocol
            .as_deref()
            .is_some_and(|p| TORRENT_PROTOCOLS.contains(&p))
    }
}

impl From<&DownloadStatusItem> for DownloadInfo {
    fn from(item: &DownloadStatusItem) -> Self {
        Self {
            folder: item.folder.clone(),
            id: Some(item.id.clone()).filter(|s| !s.is_empty()),
            downloader: Some(item.downloader.clone()).filter(|s| !s.is_empty()),
            ..Default::default()
        }
    }
}

/// A transfer queued by reconciliation, with what to do about it
#[derive(Debug, Clone, PartialEq)]
pub struct ScanItem {
    pub item: DownloadStatusItem,
    /// Pause the transfer while organizing (only honoured when linking)
    pub pause: bool,
    /// Run an organization pass on the transfer's folder
    pub scan: bool,
    /// Tell the downloader it may clean up afterwards
    pub process_complete: bool,
}

/// A download client (or a set of them)
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Status of every transfer; `None` when status reporting is unsupported
    async fn status(&self) -> Result<Option<Vec<DownloadStatusItem>>>;

    /// Remove a failed transfer
    async fn remove_failed(&self, item: &DownloadStatusItem) -> Result<()>;

    /// Pause (`true`) or resume (`false`) a transfer
    async fn pause(&self, item: &DownloadStatusItem, pause: bool) -> Result<()>;

    /// The renamer is done with the transfer; the client may clean up
    async fn process_complete(&self, item: &DownloadStatusItem) -> Result<()>;
}
