//! Download reconciliation
//!
//! Matches `snatched`/`seeding` releases against the live transfer list,
//! moves their status along and queues finished transfers for an
//! organization pass.

use tracing::{debug, error, info, warn};

use super::{PassOutcome, Renamer, RenamerError};
use crate::config::FileAction;
use crate::db::releases::INFO_NAME;
use crate::db::{MovieStatus, ReleaseRecord, ReleaseStatus};
use crate::services::downloader::{DownloadInfo, DownloadState, DownloadStatusItem, ScanItem};
use crate::services::naming;
use crate::services::tagger::{self, Tag};

/// What a reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnatchedSummary {
    /// Releases compared against the transfer list
    pub checked: usize,
    /// Releases with a matching transfer
    pub matched: usize,
    /// Transfers handed to an organization pass
    pub scanned: usize,
    /// Transfers the downloader was told to clean up
    pub completed: usize,
    /// A full organization pass was needed
    pub scan_required: bool,
}

/// Status changes are applied while building the plan; scans run after
#[derive(Debug, Default)]
struct ReconcilePlan {
    checked: usize,
    matched: usize,
    items: Vec<ScanItem>,
    scan_required: bool,
}

/// Whether `item` is the transfer behind `release`
fn matches_release(
    release: &ReleaseRecord,
    library_identifier: &str,
    item: &DownloadStatusItem,
) -> bool {
    if let Some(download_id) = release.download_id() {
        return item.id == download_id && release.downloader() == Some(item.downloader.as_str());
    }

    let Some(name) = release.info(INFO_NAME) else {
        return naming::find_imdb_id(&item.name) == Some(library_identifier);
    };

    naming::download_name(name, library_identifier) == item.name
        || item.name.contains(name)
        || naming::find_imdb_id(&item.name) == Some(library_identifier)
}

impl Renamer {
    /// Reconcile stored releases with the download clients
    pub async fn check_snatched(&self) -> Result<PassOutcome<SnatchedSummary>, RenamerError> {
        self.reconcile(true).await
    }

    /// `fire_scan` runs the full pass a missing status asks for; a caller
    /// about to scan anyway passes false.
    pub(super) async fn reconcile(
        &self,
        fire_scan: bool,
    ) -> Result<PassOutcome<SnatchedSummary>, RenamerError> {
        if !self.config.enabled {
            return Ok(PassOutcome::Disabled);
        }

        let Some(_guard) = self.checking_snatched.try_begin() else {
            debug!("Already checking snatched");
            return Ok(PassOutcome::AlreadyRunning);
        };

        let plan = self.reconcile_statuses().await?;
        let mut summary = SnatchedSummary {
            checked: plan.checked,
            matched: plan.matched,
            scan_required: plan.scan_required,
            ..Default::default()
        };

        for scan_item in plan.items {
            let item = &scan_item.item;

            if scan_item.scan {
                let pause = scan_item.pause && self.mover.action() == FileAction::Link;
                if pause {
                    if let Err(e) = self.downloader.pause(item, true).await {
                        warn!(download_id = %item.id, error = %e, "Failed pausing download");
                    }
                }

                let organized = match self.organize(Some(DownloadInfo::from(item))).await {
                    Ok(outcome) => outcome.is_completed(),
                    Err(e) => {
                        error!(download_id = %item.id, error = %e, "Failed renaming download");
                        false
                    }
                };
                if organized {
                    summary.scanned += 1;
                }

                if pause {
                    if let Err(e) = self.downloader.pause(item, false).await {
                        warn!(download_id = %item.id, error = %e, "Failed resuming download");
                    }
                }

                // Files still in place; the next pass picks the transfer up again
                if !organized {
                    continue;
                }
            }

            if scan_item.process_complete {
                if let Some(folder) = item.folder.as_deref() {
                    if tagger::has_tag(folder, Tag::FailedRename) {
                        info!(path = %folder.display(), "Renaming failed, leaving download for inspection");
                        continue;
                    }
                    tagger::untag(folder, Tag::RenamedAlready);
                }

                match self.downloader.process_complete(item).await {
                    Ok(()) => summary.completed += 1,
                    Err(e) => {
                        warn!(download_id = %item.id, error = %e, "Failed telling downloader to clean up")
                    }
                }
            }
        }

        if summary.scan_required && fire_scan {
            info!("Download status unavailable, scanning the whole \"from\" folder");
            self.organize(None).await?;
        }

        Ok(PassOutcome::Completed(summary))
    }

    async fn reconcile_statuses(&self) -> Result<ReconcilePlan, RenamerError> {
        let mut plan = ReconcilePlan::default();

        let releases = self
            .db
            .releases()
            .list_by_status(&[ReleaseStatus::Snatched, ReleaseStatus::Seeding])
            .await
            .map_err(RenamerError::Database)?;
        if releases.is_empty() {
            return Ok(plan);
        }

        info!(count = releases.len(), "Checking status of snatched releases");

        let statuses = match self.downloader.status().await {
            Ok(Some(statuses)) if !statuses.is_empty() => statuses,
            Ok(_) => {
                debug!("Download status functionality is not implemented for active downloaders");
                plan.scan_required = true;
                return Ok(plan);
            }
            Err(e) => {
                error!(error = %e, "Failed getting download status");
                return Ok(plan);
            }
        };

        for release in releases {
            plan.checked += 1;

            let movie = match self.db.movies().get(release.movie_id).await {
                Ok(Some(movie)) => movie,
                Ok(None) => {
                    warn!(release_id = release.id, "Release has no movie");
                    continue;
                }
                Err(e) => return Err(RenamerError::Database(e)),
            };

            let Some(item) = statuses
                .iter()
                .find(|item| matches_release(&release, &movie.library_identifier, item))
            else {
                debug!(release_id = release.id, identifier = %release.identifier, "No download found for release");
                continue;
            };
            plan.matched += 1;

            let timeleft = item
                .timeleft
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            debug!(
                download_id = %item.id,
                name = %item.name,
                status = item.status.as_str(),
                timeleft = %timeleft,
                "Found download for release"
            );

            let movie_done = movie.status == MovieStatus::Done;

            match item.status {
                DownloadState::Busy => {
                    if let Some(folder) = item
                        .folder
                        .as_deref()
                        .filter(|f| f.starts_with(&self.config.from))
                    {
                        if let Err(e) = tagger::tag_dir(folder, Tag::Downloading) {
                            warn!(path = %folder.display(), error = %e, "Failed tagging download folder");
                        }
                    }
                }
                DownloadState::Seeding => {
                    if self.mover.action() != FileAction::Move
                        && !movie_done
                        && item.is_info_complete()
                    {
                        info!(name = %item.name, "Download is seeding, renaming while seeding");
                        untag_downloading(item);
                        self.set_release_status(release.id, ReleaseStatus::Seeding).await?;
                        plan.items.push(ScanItem {
                            item: item.clone(),
                            pause: true,
                            scan: true,
                            process_complete: false,
                        });
                    } else if release.status != ReleaseStatus::Seeding {
                        info!(name = %item.name, "Download is seeding");
                        self.set_release_status(release.id, ReleaseStatus::Seeding).await?;
                    }
                }
                DownloadState::Failed => {
                    info!(name = %item.name, "Download failed");
                    if let Err(e) = self.downloader.remove_failed(item).await {
                        warn!(download_id = %item.id, error = %e, "Failed removing failed download");
                    }
                    self.set_release_status(release.id, ReleaseStatus::Failed).await?;

                    if self.config.next_on_failed {
                        if let Err(e) = self.library.try_next_release(movie.id).await {
                            error!(movie_id = movie.id, error = %e, "Failed searching next release");
                        }
                    }
                }
                DownloadState::Completed => {
                    info!(name = %item.name, "Download completed");
                    if !item.is_info_complete() {
                        plan.scan_required = true;
                        continue;
                    }

                    let (next, scan) = match (release.status == ReleaseStatus::Seeding, movie_done) {
                        (true, true) => (Some(ReleaseStatus::Downloaded), false),
                        (true, false) => (Some(ReleaseStatus::Snatched), true),
                        (false, _) => {
                            untag_downloading(item);
                            (None, true)
                        }
                    };
                    if let Some(next) = next {
                        self.set_release_status(release.id, next).await?;
                    }
                    plan.items.push(ScanItem {
                        item: item.clone(),
                        pause: false,
                        scan,
                        process_complete: true,
                    });
                }
            }
        }

        Ok(plan)
    }

    async fn set_release_status(&self, id: i64, status: ReleaseStatus) -> Result<(), RenamerError> {
        self.db
            .releases()
            .set_status(id, status)
            .await
            .map_err(RenamerError::Database)
    }
}

fn untag_downloading(item: &DownloadStatusItem) {
    if let Some(folder) = item.folder.as_deref() {
        tagger::untag(folder, Tag::Downloading);
    }
}
