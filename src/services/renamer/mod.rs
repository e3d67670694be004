//! Organization engine
//!
//! A pass extracts archives, asks the scanner for release groups and, per
//! group, decides where every file goes, which stored release survives and
//! what gets removed. [`Renamer::check_snatched`] (in `snatched`) keeps
//! release statuses in line with the download clients and feeds finished
//! downloads back into [`Renamer::scan`].
//!
//! Both passes are single-flight: a trigger while the same pass is running
//! returns [`PassOutcome::AlreadyRunning`].

pub mod pass;
pub mod plan;
pub mod retention;
mod snatched;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RenamerConfig;
use crate::db::{CreateRelease, Database, MovieRecord, MovieStatus, ReleaseStatus};
use crate::db::releases::{INFO_DOWNLOAD_ID, INFO_DOWNLOADER, INFO_PROTOCOL};
use crate::media::{FileCategory, Group, LibraryEntry};
use crate::services::downloader::{DownloadInfo, Downloader};
use crate::services::extractor::{ArchiveReader, Extractor, list_files};
use crate::services::library::MovieLibrary;
use crate::services::mover::{self, FileMover};
use crate::services::naming::NamingScheme;
use crate::services::notifications::{self, Notifier, RenamerEvent};
use crate::services::scanner::MediaScanner;
use crate::services::tagger::{self, Tag};

pub use pass::{PassGuard, PassState};
pub use plan::{PlanSettings, RenamePlan};
pub use retention::RetentionVerdict;
pub use snatched::SnatchedSummary;

/// Failures that abort a whole pass
#[derive(Debug, Error)]
pub enum RenamerError {
    #[error("the \"{which}\" folder doesn't exist: {}", path.display())]
    MissingFolder { which: &'static str, path: PathBuf },

    #[error("the \"to\" folder can't be inside the \"from\" folder")]
    DestinationInsideSource,

    #[error("the target folder can't be a renamer root: {}", .0.display())]
    TargetIsRoot(PathBuf),

    #[error("the target folder can't be inside the \"to\" folder: {}", .0.display())]
    TargetInsideDestination(PathBuf),

    #[error("scanner failed: {0:#}")]
    Scanner(anyhow::Error),

    #[error("database error: {0:#}")]
    Database(anyhow::Error),
}

/// How a pass trigger ended
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome<T> {
    /// The renamer is switched off
    Disabled,
    /// The same pass was already running; nothing was done
    AlreadyRunning,
    Completed(T),
}

impl<T> PassOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// What an organization pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSummary {
    pub groups: usize,
    /// Groups skipped as unknown, unresolvable or already tagged
    pub skipped: usize,
    /// Groups left alone because a better release exists
    pub existing: usize,
    pub files_renamed: usize,
    pub files_removed: usize,
    /// Removals and renames that failed
    pub failures: usize,
}

/// External services the renamer drives
#[derive(Clone)]
pub struct Collaborators {
    pub scanner: Arc<dyn MediaScanner>,
    pub library: Arc<dyn MovieLibrary>,
    pub downloader: Arc<dyn Downloader>,
    pub notifier: Arc<dyn Notifier>,
    pub archive_reader: Arc<dyn ArchiveReader>,
}

enum GroupOutcome {
    Skipped,
    Exists,
    Processed {
        renamed: usize,
        removed: usize,
        failures: usize,
    },
}

/// The renamer service
pub struct Renamer {
    config: RenamerConfig,
    db: Database,
    scanner: Arc<dyn MediaScanner>,
    library: Arc<dyn MovieLibrary>,
    downloader: Arc<dyn Downloader>,
    notifier: Arc<dyn Notifier>,
    extractor: Extractor,
    mover: FileMover,
    scheme: NamingScheme,
    renaming: PassState,
    checking_snatched: PassState,
    shutdown: CancellationToken,
}

impl Renamer {
    pub fn new(config: RenamerConfig, db: Database, collaborators: Collaborators) -> Self {
        let mover = FileMover::from_config(&config);
        let extractor = Extractor::new(
            config.from.clone(),
            collaborators.archive_reader,
            mover.clone(),
        );
        let scheme = NamingScheme::from_config(&config);

        Self {
            config,
            db,
            scanner: collaborators.scanner,
            library: collaborators.library,
            downloader: collaborators.downloader,
            notifier: collaborators.notifier,
            extractor,
            mover,
            scheme,
            renaming: PassState::new(),
            checking_snatched: PassState::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RenamerConfig {
        &self.config
    }

    /// Cancel to stop a running pass after the current group
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_renaming(&self) -> bool {
        self.renaming.is_running()
    }

    /// Run an organization pass
    ///
    /// Without a target folder the whole staging root is scanned, after
    /// reconciling download statuses when periodic reconciliation is on.
    pub async fn scan(
        &self,
        info: Option<DownloadInfo>,
    ) -> Result<PassOutcome<ScanSummary>, RenamerError> {
        if !self.config.enabled {
            debug!("Renamer is disabled");
            return Ok(PassOutcome::Disabled);
        }

        if self.renaming.is_running() {
            info!("Renamer is already running, if you see this often, check the logs above for errors");
            return Ok(PassOutcome::AlreadyRunning);
        }

        let target = info.as_ref().and_then(|i| i.folder.clone());
        self.check_preconditions(target.as_deref())?;

        if target.is_none() && self.config.run_every > 0 {
            match self.reconcile(false).await {
                Ok(_) => {}
                Err(e) => error!(error = %e, "Checking snatched releases failed"),
            }
        }

        self.organize(info).await
    }

    /// Fire and forget [`Renamer::scan`]
    pub fn spawn_scan(self: &Arc<Self>, info: Option<DownloadInfo>) -> JoinHandle<()> {
        let renamer = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = renamer.scan(info).await {
                error!(error = %e, "Renamer pass failed");
            }
        })
    }

    /// Fire and forget [`Renamer::check_snatched`]
    pub fn spawn_check_snatched(self: &Arc<Self>) -> JoinHandle<()> {
        let renamer = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = renamer.check_snatched().await {
                error!(error = %e, "Checking snatched releases failed");
            }
        })
    }

    /// Validate the roots and an optional explicit target
    pub fn check_preconditions(&self, target: Option<&Path>) -> Result<(), RenamerError> {
        let from = &self.config.from;
        let to = &self.config.to;

        if !to.is_dir() {
            error!(path = %to.display(), "The \"to\" folder doesn't exist");
            return Err(RenamerError::MissingFolder {
                which: "to",
                path: to.clone(),
            });
        }
        if !from.is_dir() {
            error!(path = %from.display(), "The \"from\" folder doesn't exist");
            return Err(RenamerError::MissingFolder {
                which: "from",
                path: from.clone(),
            });
        }
        if let Some(target) = target {
            if !target.exists() {
                warn!(path = %target.display(), "The target folder doesn't exist");
                return Err(RenamerError::MissingFolder {
                    which: "target",
                    path: target.to_path_buf(),
                });
            }
        }

        if to.starts_with(from) {
            error!(
                from = %from.display(),
                to = %to.display(),
                "The \"to\" folder can't be inside of the \"from\" folder, you'll get an infinite loop"
            );
            return Err(RenamerError::DestinationInsideSource);
        }

        if let Some(target) = target {
            if target == from.as_path() || target == to.as_path() {
                error!(path = %target.display(), "The target folder can't be the \"from\" or \"to\" folder");
                return Err(RenamerError::TargetIsRoot(target.to_path_buf()));
            }
            if target.starts_with(to) {
                error!(path = %target.display(), "The target folder can't be inside of the \"to\" folder");
                return Err(RenamerError::TargetInsideDestination(target.to_path_buf()));
            }
        }

        Ok(())
    }

    /// Claim the renaming latch and process
    async fn organize(
        &self,
        info: Option<DownloadInfo>,
    ) -> Result<PassOutcome<ScanSummary>, RenamerError> {
        let Some(_guard) = self.renaming.try_begin() else {
            info!("Renamer is already running, if you see this often, check the logs above for errors");
            return Ok(PassOutcome::AlreadyRunning);
        };

        let target = info.as_ref().and_then(|i| i.folder.clone());
        self.check_preconditions(target.as_deref())?;

        self.process(info).await.map(PassOutcome::Completed)
    }

    async fn process(&self, mut info: Option<DownloadInfo>) -> Result<ScanSummary, RenamerError> {
        if let Some(info) = info.as_mut() {
            self.extend_download_info(info).await;
        }
        let is_torrent = info.as_ref().is_some_and(DownloadInfo::is_torrent);

        let mut files = Vec::new();
        let mut target_dir = info.as_ref().and_then(|i| i.folder.clone());
        if let Some(target) = target_dir.clone().filter(|t| t.is_file()) {
            target_dir = target.parent().map(Path::to_path_buf);
            files.push(target);
        } else if let Some(target) = target_dir.as_deref() {
            info!(path = %target.display(), "Scanning movie folder");
            files = list_files(target);
        }

        // The release folder itself is part of what gets mirrored and scanned
        let base_folder = target_dir
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf);

        let mut scan_folder = base_folder.clone().unwrap_or_else(|| self.config.from.clone());
        let mut extracted = Vec::new();
        if self.config.unrar {
            let outcome = self
                .extractor
                .extract_files(
                    base_folder.as_deref(),
                    target_dir.as_deref(),
                    files,
                    self.config.cleanup && !is_torrent,
                )
                .await;
            scan_folder = outcome.folder.unwrap_or_else(|| self.config.from.clone());
            target_dir = outcome.movie_folder;
            files = outcome.files;
            extracted = outcome.extracted;
        }

        if target_dir.is_some() && files.is_empty() {
            info!("Nothing to rename in the movie folder");
            return Ok(ScanSummary::default());
        }

        let groups = self
            .scanner
            .scan(&scan_folder, &files, info.as_ref())
            .await
            .map_err(RenamerError::Scanner)?;

        let mut summary = ScanSummary::default();
        for mut group in groups {
            summary.groups += 1;
            group.before_rename = extracted
                .iter()
                .filter(|f| group.files.values().any(|set| set.contains(*f)))
                .cloned()
                .collect();

            match self
                .process_group(&mut group, target_dir.as_deref(), info.as_ref())
                .await
            {
                Ok(GroupOutcome::Skipped) => summary.skipped += 1,
                Ok(GroupOutcome::Exists) => summary.existing += 1,
                Ok(GroupOutcome::Processed {
                    renamed,
                    removed,
                    failures,
                }) => {
                    summary.files_renamed += renamed;
                    summary.files_removed += removed;
                    summary.failures += failures;
                }
                Err(e) => {
                    error!(group = %group.identifier, error = %e, "Failed processing group");
                    summary.skipped += 1;
                }
            }

            if self.shutdown.is_cancelled() {
                info!("Shutting down, stopping renamer after current group");
                break;
            }
        }

        info!(
            groups = summary.groups,
            renamed = summary.files_renamed,
            removed = summary.files_removed,
            failures = summary.failures,
            "Renamer pass finished"
        );
        Ok(summary)
    }

    /// Attach what the stored release knows about a downloader transfer
    async fn extend_download_info(&self, info: &mut DownloadInfo) {
        let (Some(id), Some(downloader)) = (info.id.as_deref(), info.downloader.as_deref()) else {
            return;
        };

        let release = match self.db.releases().find_by_download(id, downloader).await {
            Ok(Some(release)) => release,
            Ok(None) => {
                debug!(download_id = %id, downloader = %downloader, "No release found for download");
                return;
            }
            Err(e) => {
                warn!(download_id = %id, error = %e, "Failed looking up release for download");
                return;
            }
        };

        match self.db.movies().get(release.movie_id).await {
            Ok(movie) => info.imdb_id = movie.map(|m| m.library_identifier),
            Err(e) => warn!(release_id = release.id, error = %e, "Failed loading movie for release"),
        }
        info.quality = Some(release.quality.identifier.clone());
        info.protocol = release.protocol().map(str::to_string);
    }

    /// Whether a previous pass left a marker on this group
    fn is_tagged(&self, group: &Group) -> bool {
        const TAGS: [Tag; 6] = [
            Tag::Unknown,
            Tag::Exists,
            Tag::FailedRemove,
            Tag::FailedRename,
            Tag::RenamedAlready,
            Tag::Downloading,
        ];

        let folders = self.tag_folders(group);

        TAGS.iter().any(|tag| {
            tagger::group_marker_path(group, *tag).is_some_and(|m| m.exists())
                || folders.iter().any(|f| f.join(tag.suffix()).exists())
        })
    }

    /// Folders whose directory tag covers the group: the movie file's folder
    /// and its ancestors below `from`, or up to the release folder when the
    /// files live elsewhere
    fn tag_folders(&self, group: &Group) -> Vec<PathBuf> {
        let Some(folder) = group.first_movie_file().and_then(|m| m.parent()) else {
            return Vec::new();
        };

        let stop = if folder.starts_with(&self.config.from) {
            Some(self.config.from.as_path())
        } else {
            group
                .parentdir
                .as_deref()
                .filter(|p| folder.starts_with(p))
                .unwrap_or(folder)
                .parent()
        };

        folder
            .ancestors()
            .take_while(|dir| Some(*dir) != stop)
            .map(Path::to_path_buf)
            .collect()
    }

    fn tag(&self, group: &Group, tag: Tag) {
        if let Err(e) = tagger::tag_group(group, tag) {
            error!(group = %group.identifier, tag = %tag, error = %e, "Failed tagging group");
        }
    }

    async fn process_group(
        &self,
        group: &mut Group,
        target_dir: Option<&Path>,
        download: Option<&DownloadInfo>,
    ) -> anyhow::Result<GroupOutcome> {
        let is_torrent = download.is_some_and(DownloadInfo::is_torrent);

        if self.is_tagged(group) {
            debug!(group = %group.identifier, "Group is tagged, skipping");
            return Ok(GroupOutcome::Skipped);
        }

        let identifier = group
            .library
            .as_ref()
            .map(|l| l.identifier.clone())
            .filter(|id| !id.is_empty());
        let (Some(identifier), Some(_)) = (identifier, group.title()) else {
            let first = group.first_movie_file().map(|p| p.display().to_string());
            error!(
                group = %group.identifier,
                file = first.as_deref().unwrap_or_default(),
                "Could not determine which movie the files belong to"
            );
            self.tag(group, Tag::Unknown);
            return Ok(GroupOutcome::Skipped);
        };

        let library = match self.library.update(&identifier).await {
            Ok(Some(library)) => library,
            Ok(None) => {
                error!(identifier = %identifier, "Could not load library entry, skipping group");
                return Ok(GroupOutcome::Skipped);
            }
            Err(e) => {
                error!(identifier = %identifier, error = %e, "Failed updating library entry, skipping group");
                return Ok(GroupOutcome::Skipped);
            }
        };
        group.library = Some(library.clone());

        let movies = self.movies_for(group, &library).await?;
        let destination = self.destination_for(&movies).await;

        let plan = plan::plan_group(
            group,
            &library,
            &PlanSettings {
                scheme: &self.scheme,
                destination: &destination,
                cleanup: self.config.cleanup,
                rename_nfo: self.config.rename_nfo,
                move_leftover: self.config.move_leftover,
                is_torrent,
            },
        );

        let mut removals = plan.removals.clone();
        let mut remove_releases = Vec::new();
        let quality = group.meta_data.quality.clone();

        for movie in &movies {
            self.finish_movie(movie, &quality.identifier).await;

            let releases = self
                .db
                .releases()
                .list_for_movie(movie.id)
                .await
                .context("Failed loading releases")?;
            let verdict = retention::evaluate(&releases, &quality);

            for release_id in &verdict.mark_downloaded {
                if let Err(e) = self
                    .db
                    .releases()
                    .set_status(*release_id, ReleaseStatus::Downloaded)
                    .await
                {
                    error!(release_id, error = %e, "Failed marking release as downloaded");
                }
            }

            if let Some(existing) = verdict.existing_wins {
                self.tag(group, Tag::Exists);
                let message = format!(
                    "Renaming of {} ({}) cancelled, exists in {} already.",
                    library.title().unwrap_or_default(),
                    quality.label,
                    existing.label
                );
                notifications::notify_logged(
                    self.notifier.as_ref(),
                    RenamerEvent::RenamingCanceled {
                        message,
                        identifier: identifier.clone(),
                    },
                )
                .await;
                return Ok(GroupOutcome::Exists);
            }

            removals.extend(verdict.remove_files);
            remove_releases.extend(verdict.remove_releases);
        }

        if self.config.cleanup && !self.config.move_leftover {
            debug!(group = %group.identifier, "Removing leftover files");
            for leftover in group.files_of(FileCategory::Leftover) {
                if !is_torrent || group.is_added(leftover) {
                    removals.push(leftover.clone());
                }
            }
        }

        let mut failures = 0;
        let mut removed = 0;
        let mut delete_folders = BTreeSet::new();
        for path in &removals {
            if plan.touches(path) {
                debug!(path = %path.display(), "Not removing file that will be renamed");
                continue;
            }
            if !path.is_file() {
                continue;
            }

            info!(path = %path.display(), "Removing file");
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    removed += 1;
                    if let Some(parent) = path.parent() {
                        if parent != destination
                            && Some(parent) != target_dir
                            && !parent.starts_with(&self.config.from)
                        {
                            delete_folders.insert(parent.to_path_buf());
                        }
                    }
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed removing file");
                    failures += 1;
                    self.tag(group, Tag::FailedRemove);
                }
            }
        }

        for folder in &delete_folders {
            mover::delete_empty_folder(folder, false).await;
        }

        group.renamed_files.clear();
        for (src, dst) in &plan.renames {
            if src == dst {
                continue;
            }
            info!(src = %src.display(), dst = %dst.display(), "Renaming");

            let force = !is_torrent || group.is_added(src);
            let moved = match dst.parent() {
                Some(parent) => match mover::make_dir(parent).await {
                    Ok(()) => self.mover.move_file(src, dst, force).await,
                    Err(e) => Err(e),
                },
                None => self.mover.move_file(src, dst, force).await,
            };

            match moved {
                Ok(()) => group.renamed_files.push(dst.clone()),
                Err(e) => {
                    error!(src = %src.display(), dst = %dst.display(), error = %e, "Failed moving the file");
                    failures += 1;
                    self.tag(group, Tag::FailedRename);
                }
            }
        }

        if is_torrent {
            if let Some(target) = target_dir.filter(|t| t.starts_with(&self.config.from)) {
                if let Err(e) = tagger::tag_dir(target, Tag::RenamedAlready) {
                    error!(path = %target.display(), error = %e, "Failed tagging folder");
                }
            }
        }

        for release_id in remove_releases {
            debug!(release_id, "Removing release");
            if let Err(e) = self.db.releases().delete(release_id).await {
                error!(release_id, error = %e, "Failed removing release");
            }
        }

        group.filename = plan.filename.clone();
        group.destination_dir = plan.destination_dir.clone();
        self.record_release(group, &movies, download).await;

        if !is_torrent && group.dirname.is_some() {
            if let Some(parentdir) = group.parentdir.as_deref() {
                if parentdir != self.config.from && parentdir != self.config.to {
                    info!(path = %parentdir.display(), "Deleting folder");
                    mover::delete_empty_folder(parentdir, true).await;
                }
            }
        }

        let message = format!(
            "Downloaded {} ({})",
            library.title().unwrap_or_default(),
            quality.label
        );
        notifications::notify_logged(
            self.notifier.as_ref(),
            RenamerEvent::Renamed {
                message,
                identifier,
                quality: quality.identifier,
                destination_dir: group.destination_dir.clone(),
                filename: group.filename.clone(),
                renamed_files: group.renamed_files.clone(),
            },
        )
        .await;

        Ok(GroupOutcome::Processed {
            renamed: group.renamed_files.len(),
            removed,
            failures,
        })
    }

    /// Movies for a library entry, adding one when none is tracked yet
    async fn movies_for(
        &self,
        group: &Group,
        library: &LibraryEntry,
    ) -> anyhow::Result<Vec<MovieRecord>> {
        let movies = self.db.movies().list_by_library(&library.identifier).await?;
        if !movies.is_empty() {
            return Ok(movies);
        }

        let profile = self
            .db
            .profiles()
            .find_core_by_label(&group.meta_data.quality.label)
            .await?;
        info!(identifier = %library.identifier, "Adding movie to the library");
        self.library
            .add(&library.identifier, profile.map(|p| p.id))
            .await
            .with_context(|| format!("Failed adding {} to the library", library.identifier))?;

        self.db.movies().list_by_library(&library.identifier).await
    }

    /// Category destination of the first categorized movie, else the default
    async fn destination_for(&self, movies: &[MovieRecord]) -> PathBuf {
        for movie in movies.iter().filter(|m| m.category_id.is_some()) {
            match self.db.movies().category_destination(movie.id).await {
                Ok(Some(destination)) => return PathBuf::from(destination),
                Ok(None) => {}
                Err(e) => warn!(movie_id = movie.id, error = %e, "Failed loading category"),
            }
        }
        self.config.to.clone()
    }

    /// Mark an active movie done when its profile finishes on `quality`
    async fn finish_movie(&self, movie: &MovieRecord, quality: &str) {
        if movie.status != MovieStatus::Active {
            return;
        }
        let Some(profile_id) = movie.profile_id else {
            return;
        };

        let finishes = match self.db.profiles().get(profile_id).await {
            Ok(profile) => profile.is_some_and(|p| p.finishes_on(quality)),
            Err(e) => {
                error!(movie_id = movie.id, error = %e, "Failed loading profile");
                false
            }
        };
        if finishes {
            if let Err(e) = self.db.movies().set_status(movie.id, MovieStatus::Done).await {
                error!(movie_id = movie.id, error = %e, "Failed marking movie finished");
            }
        }
    }

    /// Store the placed files as a done release of the group's movie
    async fn record_release(
        &self,
        group: &Group,
        movies: &[MovieRecord],
        download: Option<&DownloadInfo>,
    ) {
        let Some(movie) = movies.first() else {
            return;
        };
        if group.renamed_files.is_empty() {
            return;
        }

        let info = [
            (INFO_DOWNLOAD_ID, download.and_then(|d| d.id.as_deref())),
            (INFO_DOWNLOADER, download.and_then(|d| d.downloader.as_deref())),
            (INFO_PROTOCOL, download.and_then(|d| d.protocol.as_deref())),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v.to_string())))
        .collect();

        let input = CreateRelease {
            movie_id: movie.id,
            identifier: group.identifier.clone(),
            status: ReleaseStatus::Done,
            quality: group.meta_data.quality.clone(),
            info,
            files: group.renamed_files.clone(),
        };
        if let Err(e) = self.db.releases().create(input).await {
            error!(movie_id = movie.id, error = %e, "Failed storing release");
        }
    }
}
