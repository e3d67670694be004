//! End-to-end renamer passes against a scratch filesystem and an in-memory
//! database, with scripted collaborators.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use assert_matches::assert_matches;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::Notify;

use librarian_renamer::config::{FileAction, RenamerConfig};
use librarian_renamer::db::{
    CreateMovie, CreateProfile, CreateRelease, Database, MovieStatus, ProfileType, ReleaseStatus,
};
use librarian_renamer::media::{FileCategory, Group, LibraryEntry, MetaData, Quality};
use librarian_renamer::services::{
    ArchiveEntry, ArchiveReader, Collaborators, DownloadInfo, DownloadState, DownloadStatusItem,
    Downloader, MediaScanner, MovieLibrary, Notifier, PassOutcome, Renamer, RenamerError,
    RenamerEvent,
};

const UP: &str = "tt1049413";

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeScanner {
    groups: Mutex<Vec<Group>>,
    calls: AtomicUsize,
    /// Folder and files of every call
    seen: Mutex<Vec<(PathBuf, Vec<PathBuf>)>>,
    /// When set, `scan` signals `entered` and waits for `release`
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

#[async_trait]
impl MediaScanner for FakeScanner {
    async fn scan(
        &self,
        folder: &Path,
        files: &[PathBuf],
        _download_info: Option<&DownloadInfo>,
    ) -> Result<Vec<Group>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((folder.to_path_buf(), files.to_vec()));
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        Ok(self.groups.lock().unwrap().clone())
    }
}

struct FakeLibrary {
    db: Database,
    entries: HashMap<String, LibraryEntry>,
    added: Mutex<Vec<(String, Option<i64>)>>,
    next_release: Mutex<Vec<i64>>,
}

#[async_trait]
impl MovieLibrary for FakeLibrary {
    async fn update(&self, identifier: &str) -> Result<Option<LibraryEntry>> {
        Ok(self.entries.get(identifier).cloned())
    }

    async fn add(&self, identifier: &str, profile_id: Option<i64>) -> Result<()> {
        self.added
            .lock()
            .unwrap()
            .push((identifier.to_string(), profile_id));
        self.db
            .movies()
            .create(CreateMovie {
                library_identifier: identifier.to_string(),
                status: MovieStatus::Active,
                profile_id,
                category_id: None,
            })
            .await?;
        Ok(())
    }

    async fn try_next_release(&self, movie_id: i64) -> Result<()> {
        self.next_release.lock().unwrap().push(movie_id);
        Ok(())
    }
}

#[derive(Default)]
struct FakeDownloader {
    statuses: Mutex<Option<Vec<DownloadStatusItem>>>,
    removed: Mutex<Vec<String>>,
    paused: Mutex<Vec<(String, bool)>>,
    completed: Mutex<Vec<String>>,
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn status(&self) -> Result<Option<Vec<DownloadStatusItem>>> {
        Ok(self.statuses.lock().unwrap().clone())
    }

    async fn remove_failed(&self, item: &DownloadStatusItem) -> Result<()> {
        self.removed.lock().unwrap().push(item.id.clone());
        Ok(())
    }

    async fn pause(&self, item: &DownloadStatusItem, pause: bool) -> Result<()> {
        self.paused.lock().unwrap().push((item.id.clone(), pause));
        Ok(())
    }

    async fn process_complete(&self, item: &DownloadStatusItem) -> Result<()> {
        self.completed.lock().unwrap().push(item.id.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<RenamerEvent>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: RenamerEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

struct NoArchives;

#[async_trait]
impl ArchiveReader for NoArchives {
    async fn list_entries(&self, _archive: &Path) -> Result<Vec<ArchiveEntry>> {
        Ok(Vec::new())
    }

    async fn extract_entry(
        &self,
        _archive: &Path,
        _entry: &ArchiveEntry,
        _dest_dir: &Path,
    ) -> Result<()> {
        Ok(())
    }
}

/// Every archive holds a single `up.mkv`
struct SingleMovieArchive;

#[async_trait]
impl ArchiveReader for SingleMovieArchive {
    async fn list_entries(&self, _archive: &Path) -> Result<Vec<ArchiveEntry>> {
        Ok(vec![ArchiveEntry {
            name: "Up.2009/up.mkv".to_string(),
            is_dir: false,
        }])
    }

    async fn extract_entry(
        &self,
        _archive: &Path,
        entry: &ArchiveEntry,
        dest_dir: &Path,
    ) -> Result<()> {
        std::fs::write(dest_dir.join(entry.file_name().unwrap()), "extracted")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _root: TempDir,
    from: PathBuf,
    to: PathBuf,
    db: Database,
    scanner: Arc<FakeScanner>,
    library: Arc<FakeLibrary>,
    downloader: Arc<FakeDownloader>,
    notifier: Arc<RecordingNotifier>,
    archive_reader: Arc<dyn ArchiveReader>,
    config: RenamerConfig,
}

impl Harness {
    async fn new() -> Self {
        Self::with_scanner(FakeScanner::default()).await
    }

    async fn with_scanner(scanner: FakeScanner) -> Self {
        let root = TempDir::new().unwrap();
        let from = root.path().join("downloads");
        let to = root.path().join("movies");
        std::fs::create_dir_all(&from).unwrap();
        std::fs::create_dir_all(&to).unwrap();

        let db = Database::in_memory().await.unwrap();
        let mut entries = HashMap::new();
        entries.insert(
            UP.to_string(),
            LibraryEntry {
                identifier: UP.to_string(),
                titles: vec!["Up".to_string()],
                year: Some(2009),
                mpaa: Some("PG".to_string()),
            },
        );

        let mut config = RenamerConfig::new(&from, &to);
        config.run_every = 0;

        Self {
            _root: root,
            from,
            to,
            library: Arc::new(FakeLibrary {
                db: db.clone(),
                entries,
                added: Mutex::new(Vec::new()),
                next_release: Mutex::new(Vec::new()),
            }),
            db,
            scanner: Arc::new(scanner),
            downloader: Arc::new(FakeDownloader::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            archive_reader: Arc::new(NoArchives),
            config,
        }
    }

    fn renamer(&self) -> Renamer {
        Renamer::new(
            self.config.clone(),
            self.db.clone(),
            Collaborators {
                scanner: self.scanner.clone(),
                library: self.library.clone(),
                downloader: self.downloader.clone(),
                notifier: self.notifier.clone(),
                archive_reader: self.archive_reader.clone(),
            },
        )
    }

    /// A release folder under `from` holding one movie file
    fn download(&self, dirname: &str, file: &str, content: &str) -> Group {
        let dir = self.from.join(dirname);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), content).unwrap();
        self.group_for(dirname, file)
    }

    /// A group for `dirname/file` under `from` without touching the disk
    fn group_for(&self, dirname: &str, file: &str) -> Group {
        let dir = self.from.join(dirname);
        let mut group = Group::new(dirname, MetaData::with_quality(hd()));
        group.library = Some(LibraryEntry {
            identifier: UP.to_string(),
            titles: vec!["Up".to_string()],
            ..Default::default()
        });
        group.dirname = Some(dirname.to_string());
        group.add_file(FileCategory::Movie, dir.join(file));
        group.parentdir = Some(dir);
        group
    }

    fn queue(&self, group: Group) {
        self.scanner.groups.lock().unwrap().push(group);
    }

    async fn movie(&self) -> i64 {
        self.db
            .movies()
            .create(CreateMovie {
                library_identifier: UP.to_string(),
                status: MovieStatus::Active,
                profile_id: None,
                category_id: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn release(
        &self,
        movie_id: i64,
        status: ReleaseStatus,
        quality: Quality,
        info: &[(&str, &str)],
        files: Vec<PathBuf>,
    ) -> i64 {
        self.db
            .releases()
            .create(CreateRelease {
                movie_id,
                identifier: format!("{}.{}", UP, quality.identifier),
                status,
                quality,
                info: info
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                files,
            })
            .await
            .unwrap()
            .id
    }

    fn library_file(&self, name: &str, content: &str) -> PathBuf {
        let dir = self.to.join("Up (2009)");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn hd() -> Quality {
    Quality::new("720p", "720p", 5)
}

fn bluray() -> Quality {
    Quality::new("1080p", "1080p", 3)
}

fn dvdrip() -> Quality {
    Quality::new("dvdrip", "DVD-Rip", 8)
}

fn status_item(id: &str, status: DownloadState, folder: &Path) -> DownloadStatusItem {
    DownloadStatusItem {
        id: id.to_string(),
        downloader: "fake".to_string(),
        name: "Up.2009.720p.BluRay".to_string(),
        status,
        folder: Some(folder.to_path_buf()),
        timeleft: None,
        seed_ratio: None,
    }
}

fn completed<T: std::fmt::Debug>(outcome: PassOutcome<T>) -> T {
    match outcome {
        PassOutcome::Completed(summary) => summary,
        other => panic!("pass did not complete: {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Organization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_group_is_tagged_and_left_alone() {
    let h = Harness::new().await;
    let mut group = h.download("Mystery.2001", "mystery.mkv", "x");
    group.library = None;
    h.queue(group);

    let summary = completed(h.renamer().scan(None).await.unwrap());

    assert_eq!(summary.skipped, 1);
    assert!(h.from.join("Mystery.2001/mystery.mkv").exists());
    assert!(h.from.join("Mystery.2001/mystery.unknown.ignore").exists());
    assert!(std::fs::read_dir(&h.to).unwrap().next().is_none());
}

#[tokio::test]
async fn test_basic_rename_tracks_movie_and_release() {
    let h = Harness::new().await;
    h.db.profiles()
        .create(CreateProfile {
            label: "720p".to_string(),
            core: true,
            types: vec![ProfileType {
                quality_identifier: "720p".to_string(),
                finish: true,
                order: 0,
            }],
        })
        .await
        .unwrap();
    h.queue(h.download("Up.2009.720p.BluRay", "up.mkv", "new"));

    let summary = completed(h.renamer().scan(None).await.unwrap());

    let placed = h.to.join("Up (2009)").join("Up.mkv");
    assert_eq!(summary.files_renamed, 1);
    assert_eq!(std::fs::read_to_string(&placed).unwrap(), "new");
    assert!(!h.from.join("Up.2009.720p.BluRay").exists());

    // Movie added with the core profile for the quality, then finished
    let added = h.library.added.lock().unwrap().clone();
    assert_eq!(added.len(), 1);
    assert!(added[0].1.is_some());
    let movies = h.db.movies().list_by_library(UP).await.unwrap();
    assert_eq!(movies.len(), 1);
    assert_eq!(movies[0].status, MovieStatus::Done);

    let releases = h.db.releases().list_for_movie(movies[0].id).await.unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].status, ReleaseStatus::Done);
    assert_eq!(releases[0].files, vec![placed.clone()]);

    let events = h.notifier.events.lock().unwrap().clone();
    assert_matches!(
        events.as_slice(),
        [RenamerEvent::Renamed { filename: Some(name), renamed_files, .. }]
            if name == "Up" && renamed_files == &vec![placed.clone()]
    );
}

#[tokio::test]
async fn test_better_existing_release_wins() {
    let h = Harness::new().await;
    let movie_id = h.movie().await;
    let existing = h.library_file("Up.mkv", "1080p");
    h.release(movie_id, ReleaseStatus::Done, bluray(), &[], vec![existing.clone()])
        .await;
    h.queue(h.download("Up.2009.720p.BluRay", "up.mkv", "720p"));

    let summary = completed(h.renamer().scan(None).await.unwrap());

    assert_eq!(summary.existing, 1);
    assert_eq!(summary.files_renamed, 0);
    assert!(h.from.join("Up.2009.720p.BluRay/up.mkv").exists());
    assert!(h.from.join("Up.2009.720p.BluRay/up.exists.ignore").exists());
    assert_eq!(std::fs::read_to_string(&existing).unwrap(), "1080p");

    let events = h.notifier.events.lock().unwrap().clone();
    assert_matches!(events.as_slice(), [RenamerEvent::RenamingCanceled { .. }]);
}

#[tokio::test]
async fn test_worse_existing_release_is_replaced() {
    let h = Harness::new().await;
    let movie_id = h.movie().await;
    let old = h.library_file("Up.avi", "dvdrip");
    let old_id = h
        .release(movie_id, ReleaseStatus::Done, dvdrip(), &[], vec![old.clone()])
        .await;
    h.queue(h.download("Up.2009.720p.BluRay", "up.mkv", "720p"));

    let summary = completed(h.renamer().scan(None).await.unwrap());

    assert_eq!(summary.files_removed, 1);
    assert!(!old.exists());
    assert!(h.to.join("Up (2009)/Up.mkv").exists());
    assert!(h.db.releases().get(old_id).await.unwrap().is_none());

    let releases = h.db.releases().list_for_movie(movie_id).await.unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].quality, hd());
}

#[tokio::test]
async fn test_removal_never_hits_a_rename_destination() {
    let h = Harness::new().await;
    let movie_id = h.movie().await;
    // Same quality already placed at the very path the repack goes to
    let placed = h.library_file("Up.mkv", "old");
    h.release(movie_id, ReleaseStatus::Done, hd(), &[], vec![placed.clone()])
        .await;
    h.queue(h.download("Up.2009.720p.PROPER", "up.mkv", "proper"));

    let summary = completed(h.renamer().scan(None).await.unwrap());

    assert_eq!(summary.files_removed, 0);
    assert_eq!(summary.failures, 0);
    assert_eq!(std::fs::read_to_string(&placed).unwrap(), "proper");
}

#[tokio::test]
async fn test_failed_rename_tag_blocks_reprocessing() {
    let h = Harness::new().await;
    h.queue(h.download("Up.2009.720p.BluRay", "up.mkv", "x"));
    std::fs::write(h.from.join("Up.2009.720p.BluRay/up.failed_rename.ignore"), "").unwrap();

    let summary = completed(h.renamer().scan(None).await.unwrap());

    assert_eq!(summary.skipped, 1);
    assert!(h.from.join("Up.2009.720p.BluRay/up.mkv").exists());
    assert!(!h.to.join("Up (2009)").exists());
}

#[tokio::test]
async fn test_second_trigger_while_running_is_dropped() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let h = Harness::with_scanner(FakeScanner {
        gate: Some((entered.clone(), release.clone())),
        ..Default::default()
    })
    .await;
    let renamer = Arc::new(h.renamer());

    let first = {
        let renamer = renamer.clone();
        tokio::spawn(async move { renamer.scan(None).await })
    };
    entered.notified().await;

    assert!(renamer.is_renaming());
    assert_matches!(renamer.scan(None).await, Ok(PassOutcome::AlreadyRunning));

    release.notify_one();
    assert_matches!(first.await.unwrap(), Ok(PassOutcome::Completed(_)));
    assert_eq!(h.scanner.calls.load(Ordering::SeqCst), 1);
    assert!(!renamer.is_renaming());
}

#[tokio::test]
async fn test_disabled_renamer_does_nothing() {
    let mut h = Harness::new().await;
    h.config.enabled = false;
    h.queue(h.download("Up.2009.720p.BluRay", "up.mkv", "x"));

    let renamer = h.renamer();
    assert_matches!(renamer.scan(None).await, Ok(PassOutcome::Disabled));
    assert_matches!(renamer.check_snatched().await, Ok(PassOutcome::Disabled));
    assert_eq!(h.scanner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_preconditions_abort_the_pass() {
    let mut h = Harness::new().await;

    let renamer = h.renamer();
    assert_matches!(
        renamer.scan(Some(DownloadInfo::for_folder(&h.from))).await,
        Err(RenamerError::TargetIsRoot(_))
    );
    let inside = h.to.join("Up (2009)");
    std::fs::create_dir_all(&inside).unwrap();
    assert_matches!(
        renamer.scan(Some(DownloadInfo::for_folder(&inside))).await,
        Err(RenamerError::TargetInsideDestination(_))
    );
    assert_matches!(
        renamer.scan(Some(DownloadInfo::for_folder(h.from.join("gone")))).await,
        Err(RenamerError::MissingFolder { which: "target", .. })
    );

    h.config.to = h.from.join("library");
    std::fs::create_dir_all(&h.config.to).unwrap();
    assert_matches!(
        h.renamer().scan(None).await,
        Err(RenamerError::DestinationInsideSource)
    );

    h.config.to = h.from.with_file_name("missing");
    assert_matches!(
        h.renamer().scan(None).await,
        Err(RenamerError::MissingFolder { which: "to", .. })
    );
    assert_eq!(h.scanner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_archive_in_explicit_folder_extracts_in_place() {
    let mut h = Harness::new().await;
    h.config.unrar = true;
    h.archive_reader = Arc::new(SingleMovieArchive);
    let folder = h.from.join("Up.2009");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("up.rar"), "rar").unwrap();
    h.queue(h.group_for("Up.2009", "up.mkv"));

    let summary = completed(
        h.renamer()
            .scan(Some(DownloadInfo::for_folder(&folder)))
            .await
            .unwrap(),
    );

    assert_eq!(summary.files_renamed, 1);
    assert!(!h.from.join("up.mkv").exists());
    assert_eq!(
        std::fs::read_to_string(h.to.join("Up (2009)/Up.mkv")).unwrap(),
        "extracted"
    );
    let seen = h.scanner.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(h.from.clone(), vec![folder.join("up.mkv")])]);
    assert!(!h.from.join("renamed_already.ignore").exists());
}

#[tokio::test]
async fn test_folder_tag_above_movie_file_is_honoured() {
    let h = Harness::new().await;
    let movie = h.from.join("Up.2009.720p/CD1/up.mkv");
    h.queue(h.download("Up.2009.720p/CD1", "up.mkv", "partial"));
    std::fs::write(h.from.join("Up.2009.720p/downloading.ignore"), "").unwrap();

    let summary = completed(h.renamer().scan(None).await.unwrap());

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.files_renamed, 0);
    assert!(movie.exists());
    assert!(!h.to.join("Up (2009)").exists());
}

#[tokio::test]
async fn test_category_destination_overrides_library_root() {
    let h = Harness::new().await;
    let kids = h.to.with_file_name("kids");
    std::fs::create_dir_all(&kids).unwrap();
    let category = h
        .db
        .categories()
        .create("Kids", Some(kids.to_str().unwrap()))
        .await
        .unwrap();
    h.db.movies()
        .create(CreateMovie {
            library_identifier: UP.to_string(),
            status: MovieStatus::Active,
            profile_id: None,
            category_id: Some(category.id),
        })
        .await
        .unwrap();
    h.queue(h.download("Up.2009.720p.BluRay", "up.mkv", "x"));

    let summary = completed(h.renamer().scan(None).await.unwrap());

    assert_eq!(summary.files_renamed, 1);
    assert!(kids.join("Up (2009)/Up.mkv").exists());
    assert!(!h.to.join("Up (2009)").exists());
}

#[tokio::test]
async fn test_shutdown_stops_between_groups() {
    let h = Harness::new().await;
    h.queue(h.download("Up.2009.720p.BluRay", "up.mkv", "x"));
    let mut second = h.download("Mystery.2001", "mystery.mkv", "y");
    second.library = None;
    h.queue(second);

    let renamer = h.renamer();
    renamer.shutdown_token().cancel();
    let summary = completed(renamer.scan(None).await.unwrap());

    assert_eq!(summary.groups, 1);
    assert!(h.to.join("Up (2009)/Up.mkv").exists());
    assert!(h.from.join("Mystery.2001/mystery.mkv").exists());
    assert!(!h.from.join("Mystery.2001/mystery.unknown.ignore").exists());
}

#[tokio::test]
async fn test_cleanup_removes_leftovers() {
    let mut h = Harness::new().await;
    h.config.cleanup = true;
    let mut group = h.download("Up.2009.720p.BluRay", "up.mkv", "x");
    let leftover = h.from.join("Up.2009.720p.BluRay/sample.txt");
    std::fs::write(&leftover, "sample").unwrap();
    group.add_file(FileCategory::Leftover, &leftover);
    h.queue(group);

    let summary = completed(h.renamer().scan(None).await.unwrap());

    assert_eq!(summary.files_removed, 1);
    assert!(!leftover.exists());
    assert!(h.to.join("Up (2009)/Up.mkv").exists());
}

#[tokio::test]
async fn test_cleanup_keeps_torrent_leftovers() {
    let mut h = Harness::new().await;
    h.config.cleanup = true;
    let mut group = h.download("Up.2009.720p.BluRay", "up.mkv", "x");
    let folder = group.parentdir.clone().unwrap();
    let leftover = folder.join("sample.txt");
    std::fs::write(&leftover, "sample").unwrap();
    group.add_file(FileCategory::Leftover, &leftover);
    h.queue(group);

    let mut info = DownloadInfo::for_folder(&folder);
    info.protocol = Some("torrent".to_string());
    let summary = completed(h.renamer().scan(Some(info)).await.unwrap());

    assert_eq!(summary.files_removed, 0);
    assert!(leftover.exists());
    assert!(h.to.join("Up (2009)/Up.mkv").exists());
    assert!(folder.join("renamed_already.ignore").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_removal_tags_group() {
    use std::os::unix::fs::PermissionsExt;

    let h = Harness::new().await;
    let movie_id = h.movie().await;
    let old_dir = h.to.join("Old");
    std::fs::create_dir_all(&old_dir).unwrap();
    let old = old_dir.join("Up.avi");
    std::fs::write(&old, "dvdrip").unwrap();
    h.release(movie_id, ReleaseStatus::Done, dvdrip(), &[], vec![old.clone()])
        .await;
    std::fs::set_permissions(&old_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

    // Permission bits are not enforced for privileged users
    let write_check = old_dir.join(".write_check");
    if std::fs::write(&write_check, "").is_ok() {
        std::fs::remove_file(&write_check).unwrap();
        std::fs::set_permissions(&old_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    h.queue(h.download("Up.2009.720p.BluRay", "up.mkv", "720p"));
    let summary = completed(h.renamer().scan(None).await.unwrap());
    std::fs::set_permissions(&old_dir, std::fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(summary.failures, 1);
    assert_eq!(summary.files_removed, 0);
    assert!(old.exists());
    assert!(h.to.join("Up (2009)/Up.mkv").exists());
    assert!(
        h.from
            .join("Up.2009.720p.BluRay/up.failed_remove.ignore")
            .exists()
    );
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unmatched_release_keeps_its_status() {
    let h = Harness::new().await;
    let movie_id = h.movie().await;
    let id = h
        .release(movie_id, ReleaseStatus::Snatched, hd(), &[("name", "Cars.2006.720p")], vec![])
        .await;
    *h.downloader.statuses.lock().unwrap() = Some(vec![status_item(
        "other",
        DownloadState::Completed,
        &h.from.join("Something.Else"),
    )]);

    let summary = completed(h.renamer().check_snatched().await.unwrap());

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.matched, 0);
    let release = h.db.releases().get(id).await.unwrap().unwrap();
    assert_eq!(release.status, ReleaseStatus::Snatched);
    assert!(h.downloader.completed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_completed_download_is_organized_and_cleaned_up() {
    let h = Harness::new().await;
    let movie_id = h.movie().await;
    let id = h
        .release(
            movie_id,
            ReleaseStatus::Snatched,
            hd(),
            &[("download_id", "abc"), ("download_downloader", "fake")],
            vec![],
        )
        .await;
    let group = h.download("Up.2009.720p.BluRay", "up.mkv", "x");
    let folder = group.parentdir.clone().unwrap();
    std::fs::write(folder.join("downloading.ignore"), "").unwrap();
    h.queue(group);
    *h.downloader.statuses.lock().unwrap() =
        Some(vec![status_item("abc", DownloadState::Completed, &folder)]);

    let summary = completed(h.renamer().check_snatched().await.unwrap());

    assert_eq!(summary.matched, 1);
    assert_eq!(summary.scanned, 1);
    assert!(h.to.join("Up (2009)/Up.mkv").exists());
    assert_eq!(*h.downloader.completed.lock().unwrap(), vec!["abc".to_string()]);
    assert!(h.downloader.paused.lock().unwrap().is_empty());

    let release = h.db.releases().get(id).await.unwrap().unwrap();
    assert_eq!(release.status, ReleaseStatus::Downloaded);
}

#[tokio::test]
async fn test_seeding_torrent_is_linked_and_tagged() {
    let mut h = Harness::new().await;
    h.config.file_action = FileAction::Link;
    let movie_id = h.movie().await;
    let id = h
        .release(
            movie_id,
            ReleaseStatus::Snatched,
            hd(),
            &[
                ("download_id", "abc"),
                ("download_downloader", "fake"),
                ("protocol", "torrent"),
            ],
            vec![],
        )
        .await;
    let group = h.download("Up.2009.720p.BluRay", "up.mkv", "x");
    let folder = group.parentdir.clone().unwrap();
    h.queue(group);
    *h.downloader.statuses.lock().unwrap() =
        Some(vec![status_item("abc", DownloadState::Seeding, &folder)]);

    let summary = completed(h.renamer().check_snatched().await.unwrap());

    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.completed, 0);
    // Seeding data stays, the library gets a link
    assert!(folder.join("up.mkv").exists());
    assert!(h.to.join("Up (2009)/Up.mkv").exists());
    assert!(folder.join("renamed_already.ignore").exists());
    assert_eq!(
        *h.downloader.paused.lock().unwrap(),
        vec![("abc".to_string(), true), ("abc".to_string(), false)]
    );

    let release = h.db.releases().get(id).await.unwrap().unwrap();
    assert_eq!(release.status, ReleaseStatus::Seeding);
}

#[tokio::test]
async fn test_failed_download_tries_next_release() {
    let h = Harness::new().await;
    let movie_id = h.movie().await;
    let id = h
        .release(
            movie_id,
            ReleaseStatus::Snatched,
            hd(),
            &[("download_id", "abc"), ("download_downloader", "fake")],
            vec![],
        )
        .await;
    *h.downloader.statuses.lock().unwrap() = Some(vec![status_item(
        "abc",
        DownloadState::Failed,
        &h.from.join("Up.2009.720p.BluRay"),
    )]);

    completed(h.renamer().check_snatched().await.unwrap());

    assert_eq!(*h.downloader.removed.lock().unwrap(), vec!["abc".to_string()]);
    assert_eq!(*h.library.next_release.lock().unwrap(), vec![movie_id]);
    let release = h.db.releases().get(id).await.unwrap().unwrap();
    assert_eq!(release.status, ReleaseStatus::Failed);
}

#[tokio::test]
async fn test_busy_download_folder_is_tagged() {
    let h = Harness::new().await;
    let movie_id = h.movie().await;
    h.release(
        movie_id,
        ReleaseStatus::Snatched,
        hd(),
        &[("download_id", "abc"), ("download_downloader", "fake")],
        vec![],
    )
    .await;
    let folder = h.from.join("Up.2009.720p.BluRay");
    std::fs::create_dir_all(&folder).unwrap();
    *h.downloader.statuses.lock().unwrap() =
        Some(vec![status_item("abc", DownloadState::Busy, &folder)]);

    completed(h.renamer().check_snatched().await.unwrap());

    assert!(folder.join("downloading.ignore").exists());
}

#[tokio::test]
async fn test_missing_status_support_forces_full_scan() {
    let h = Harness::new().await;
    let movie_id = h.movie().await;
    h.release(movie_id, ReleaseStatus::Snatched, hd(), &[], vec![])
        .await;

    let summary = completed(h.renamer().check_snatched().await.unwrap());

    assert!(summary.scan_required);
    assert_eq!(h.scanner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_completed_seed_of_finished_movie_is_marked_downloaded() {
    let h = Harness::new().await;
    let movie = h
        .db
        .movies()
        .create(CreateMovie {
            library_identifier: UP.to_string(),
            status: MovieStatus::Done,
            profile_id: None,
            category_id: None,
        })
        .await
        .unwrap();
    let id = h
        .release(
            movie.id,
            ReleaseStatus::Seeding,
            hd(),
            &[("download_id", "abc"), ("download_downloader", "fake")],
            vec![],
        )
        .await;
    let folder = h.from.join("Up.2009.720p.BluRay");
    std::fs::create_dir_all(&folder).unwrap();
    *h.downloader.statuses.lock().unwrap() =
        Some(vec![status_item("abc", DownloadState::Completed, &folder)]);

    let summary = completed(h.renamer().check_snatched().await.unwrap());

    assert_eq!(summary.scanned, 0);
    assert_eq!(h.scanner.calls.load(Ordering::SeqCst), 0);
    assert_eq!(*h.downloader.completed.lock().unwrap(), vec!["abc".to_string()]);
    let release = h.db.releases().get(id).await.unwrap().unwrap();
    assert_eq!(release.status, ReleaseStatus::Downloaded);
}

#[tokio::test]
async fn test_completed_seed_of_unfinished_movie_is_rescanned() {
    let h = Harness::new().await;
    let movie_id = h.movie().await;
    let id = h
        .release(
            movie_id,
            ReleaseStatus::Seeding,
            hd(),
            &[("download_id", "abc"), ("download_downloader", "fake")],
            vec![],
        )
        .await;
    let folder = h.from.join("Up.2009.720p.BluRay");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("up.mkv"), "x").unwrap();
    *h.downloader.statuses.lock().unwrap() =
        Some(vec![status_item("abc", DownloadState::Completed, &folder)]);

    let summary = completed(h.renamer().check_snatched().await.unwrap());

    assert_eq!(summary.scanned, 1);
    assert_eq!(h.scanner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*h.downloader.completed.lock().unwrap(), vec!["abc".to_string()]);
    let release = h.db.releases().get(id).await.unwrap().unwrap();
    assert_eq!(release.status, ReleaseStatus::Snatched);
}
