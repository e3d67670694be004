//! Media classification seam
//!
//! Turning a folder of files into [`Group`]s (which movie, which quality,
//! which file plays which role) is done by the media scanner. The renamer
//! only consumes its verdict.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use super::downloader::DownloadInfo;
use crate::media::Group;

/// Classifies downloaded files into release groups
#[async_trait]
pub trait MediaScanner: Send + Sync {
    /// Classify `files` (or everything under `folder` when `files` is empty)
    ///
    /// Groups come back in the order they should be processed. Files already
    /// marked with tag files must not be returned.
    async fn scan(
        &self,
        folder: &Path,
        files: &[PathBuf],
        download_info: Option<&DownloadInfo>,
    ) -> Result<Vec<Group>>;
}
