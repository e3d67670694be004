//! Movie library seam
//!
//! Title lookup and adding movies belong to the library service; the
//! renamer asks it to refresh an entry before naming files after it.

use anyhow::Result;
use async_trait::async_trait;

use crate::media::LibraryEntry;

/// Library and searcher operations the renamer relies on
#[async_trait]
pub trait MovieLibrary: Send + Sync {
    /// Refresh (or resolve) a library entry; `None` when it can't be found
    async fn update(&self, identifier: &str) -> Result<Option<LibraryEntry>>;

    /// Start tracking a movie that has files but no movie record yet
    async fn add(&self, identifier: &str, profile_id: Option<i64>) -> Result<()>;

    /// Search for the next best release after a failed download
    async fn try_next_release(&self, movie_id: i64) -> Result<()>;
}
