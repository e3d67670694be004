//! Archive extraction service
//!
//! Finds the first volume of every rar set in a download, extracts it into
//! the mirrored location under the staging root and optionally removes the
//! volumes afterwards. Archives are read through [`ArchiveReader`];
//! [`UnrarCli`] shells out to the `unrar` binary like the rest of the
//! command-line tooling.

use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use super::mover::{FileMover, delete_empty_folder, make_dir};
use super::tagger;

/// Archives touched more recently than this may still be in transfer
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(60);

/// `name.rar`, `name.part01.rar`, `name.part2.rar`, ...
static RAR_VOLUME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<base>.+?)(?:\.part(?P<part>\d+))?\.rar$").unwrap());

/// One entry inside an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive
    pub name: String,
    pub is_dir: bool,
}

impl ArchiveEntry {
    /// Entry name without any directory part
    pub fn file_name(&self) -> Option<&str> {
        self.name.rsplit(['/', '\\']).find(|s| !s.is_empty())
    }
}

/// Reads rar archives
#[async_trait]
pub trait ArchiveReader: Send + Sync {
    /// List every entry of the archive starting at `archive`
    async fn list_entries(&self, archive: &Path) -> Result<Vec<ArchiveEntry>>;

    /// Extract one entry into `dest_dir`, dropping its directory part and
    /// never overwriting an existing file
    async fn extract_entry(&self, archive: &Path, entry: &ArchiveEntry, dest_dir: &Path)
    -> Result<()>;
}

/// [`ArchiveReader`] backed by the `unrar` command-line tool
#[derive(Debug, Clone)]
pub struct UnrarCli {
    binary: String,
}

impl UnrarCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ArchiveReader for UnrarCli {
    async fn list_entries(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let output = Command::new(&self.binary)
            .arg("lt") // Technical listing
            .arg("-y")
            .arg(archive)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run unrar. Is unrar installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("unrar listing failed: {}", stderr);
        }

        Ok(parse_unrar_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn extract_entry(
        &self,
        archive: &Path,
        entry: &ArchiveEntry,
        dest_dir: &Path,
    ) -> Result<()> {
        // unrar treats the destination as a directory only with a trailing separator
        let mut dest = dest_dir.as_os_str().to_owned();
        dest.push(MAIN_SEPARATOR.to_string());

        let output = Command::new(&self.binary)
            .arg("e") // Extract without paths
            .arg("-o-") // Never overwrite
            .arg("-y") // Assume yes on all queries
            .arg("-idq") // Quiet
            .arg(archive)
            .arg(&entry.name)
            .arg(dest)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run unrar. Is unrar installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("unrar failed on {}: {}", entry.name, stderr);
        }

        debug!(archive = %archive.display(), entry = %entry.name, "Extracted archive entry");
        Ok(())
    }
}

/// Parse `unrar lt` output into entries
fn parse_unrar_listing(listing: &str) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    let mut name: Option<String> = None;

    for line in listing.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("Name:") {
            if let Some(previous) = name.take() {
                entries.push(ArchiveEntry {
                    name: previous,
                    is_dir: false,
                });
            }
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Type:") {
            if let Some(current) = name.take() {
                entries.push(ArchiveEntry {
                    name: current,
                    is_dir: value.trim().eq_ignore_ascii_case("directory"),
                });
            }
        }
    }
    if let Some(last) = name {
        entries.push(ArchiveEntry {
            name: last,
            is_dir: false,
        });
    }

    entries
}

/// Base name when `path` is the first volume of a rar set
pub fn first_volume_base(path: &Path) -> Option<String> {
    let name = path.to_str()?;
    let caps = RAR_VOLUME.captures(name)?;
    let is_first = match caps.name("part") {
        None => true,
        Some(part) => part.as_str().parse::<u32>().is_ok_and(|n| n == 1),
    };
    is_first.then(|| caps["base"].to_string())
}

/// Whether `path` is a later volume of the rar set with base name `base`
pub fn is_rest_volume(base: &str, path: &Path) -> bool {
    let Some(name) = path.to_str() else {
        return false;
    };
    let Some(rest) = name.strip_prefix(base).and_then(|r| r.strip_prefix('.')) else {
        return false;
    };

    if let Some(part) = rest
        .strip_prefix("part")
        .and_then(|r| r.strip_suffix(".rar"))
    {
        return !part.is_empty()
            && part.bytes().all(|b| b.is_ascii_digit())
            && part.parse::<u32>().map_or(true, |n| n != 1);
    }

    // Old style volumes: .r00, .s01, ...
    let mut chars = rest.chars();
    matches!(chars.next(), Some('r'..='w'))
        && !chars.as_str().is_empty()
        && chars.as_str().bytes().all(|b| b.is_ascii_digit())
}

/// Result of an extraction pass
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    /// Folder the scanner should look in (None = the whole staging root)
    pub folder: Option<PathBuf>,
    /// Explicit release folder, moved under the staging root if relocated
    pub movie_folder: Option<PathBuf>,
    /// Remaining candidate files, including everything extracted
    pub files: Vec<PathBuf>,
    /// Files created by this pass
    pub extracted: Vec<PathBuf>,
}

/// Extracts rar sets found in downloads
pub struct Extractor {
    /// Staging root extracted files are mirrored under
    from: PathBuf,
    reader: Arc<dyn ArchiveReader>,
    mover: FileMover,
}

impl Extractor {
    pub fn new(from: impl Into<PathBuf>, reader: Arc<dyn ArchiveReader>, mover: FileMover) -> Self {
        Self {
            from: from.into(),
            reader,
            mover,
        }
    }

    /// Extract every archive among `files` (or under `folder` when empty)
    ///
    /// Without an explicit `movie_folder` archives modified within
    /// [`FRESHNESS_WINDOW`] are left alone. One failing archive never stops
    /// the others.
    pub async fn extract_files(
        &self,
        folder: Option<&Path>,
        movie_folder: Option<&Path>,
        files: Vec<PathBuf>,
        cleanup: bool,
    ) -> ExtractionOutcome {
        let folder = folder.unwrap_or(&self.from).to_path_buf();
        let check_file_date = movie_folder.is_none();
        let mut movie_folder = movie_folder.map(Path::to_path_buf);

        let mut files = if files.is_empty() {
            list_files(movie_folder.as_deref().unwrap_or(&folder))
        } else {
            files
        };
        let mut extracted: Vec<PathBuf> = Vec::new();

        let archives: Vec<(PathBuf, String)> = files
            .iter()
            .filter_map(|f| first_volume_base(f).map(|base| (f.clone(), base)))
            .collect();

        for (archive, base) in archives {
            let archive_dir = archive.parent().unwrap_or(&folder).to_path_buf();

            if tagger::has_any_tag(&archive_dir) {
                debug!(archive = %archive.display(), "Folder already tagged, not extracting");
                continue;
            }

            let mut volumes: Vec<PathBuf> = files
                .iter()
                .filter(|f| is_rest_volume(&base, f))
                .cloned()
                .collect();
            volumes.push(archive.clone());

            if check_file_date {
                if let Some(age) = newest_age(&volumes) {
                    let remaining = FRESHNESS_WINDOW.saturating_sub(age);
                    info!(
                        archive = %archive.display(),
                        retry_in_secs = remaining.as_secs(),
                        "Archive seems to be still copying/moving/downloading, ignoring for now"
                    );
                    continue;
                }
            }

            let extract_path = self.from.join(relative_to(&archive_dir, &folder));
            info!(archive = %archive.display(), destination = %extract_path.display(), "Extracting archive");

            match self.extract_archive(&archive, &extract_path).await {
                Ok(created) => extracted.extend(created),
                Err(e) => {
                    error!(archive = %archive.display(), error = %e, "Failed to extract archive");
                    continue;
                }
            }

            for volume in volumes {
                if cleanup {
                    if let Err(e) = tokio::fs::remove_file(&volume).await {
                        error!(path = %volume.display(), error = %e, "Failed to remove archive volume");
                        continue;
                    }
                }
                files.retain(|f| f != &volume);
            }
        }

        // Keep extracted output and the rest of the release together
        if !extracted.is_empty() && !same_path(&folder, &self.from) {
            for leftover in files.clone() {
                let move_to = self.from.join(relative_to(&leftover, &folder));

                let placed = match move_to.parent() {
                    Some(parent) => match make_dir(parent).await {
                        Ok(()) => self.mover.move_file(&leftover, &move_to, cleanup).await,
                        Err(e) => Err(e),
                    },
                    None => Ok(()),
                };

                if let Err(e) = placed {
                    error!(
                        src = %leftover.display(),
                        dst = %move_to.display(),
                        error = %e,
                        "Failed moving left over file"
                    );
                    // Probably collided with an existing file of the same name
                    if !move_to.is_file() {
                        continue;
                    }
                    if cleanup {
                        info!(path = %leftover.display(), "Deleting left over file instead");
                        if let Err(e) = tokio::fs::remove_file(&leftover).await {
                            error!(path = %leftover.display(), error = %e, "Failed to remove left over file");
                        }
                    }
                }

                files.retain(|f| f != &leftover);
                extracted.push(move_to);
            }

            if cleanup {
                if let Some(original) = &movie_folder {
                    debug!(path = %original.display(), "Removing old movie folder");
                    delete_empty_folder(original, true).await;
                }
            }

            movie_folder = movie_folder.map(|mf| self.from.join(relative_to(&mf, &folder)));
            return self.finish(Some(self.from.clone()), movie_folder, files, extracted);
        }

        self.finish(Some(folder), movie_folder, files, extracted)
    }

    fn finish(
        &self,
        folder: Option<PathBuf>,
        movie_folder: Option<PathBuf>,
        mut files: Vec<PathBuf>,
        extracted: Vec<PathBuf>,
    ) -> ExtractionOutcome {
        files.extend(extracted.iter().cloned());

        // Without a release folder the scanner walks the staging root itself
        if movie_folder.is_none() {
            return ExtractionOutcome {
                folder: None,
                movie_folder: None,
                files: Vec::new(),
                extracted,
            };
        }

        ExtractionOutcome {
            folder,
            movie_folder,
            files,
            extracted,
        }
    }

    /// Extract all file entries of one archive, skipping existing targets
    async fn extract_archive(&self, archive: &Path, extract_path: &Path) -> Result<Vec<PathBuf>> {
        make_dir(extract_path).await?;

        let entries = self
            .reader
            .list_entries(archive)
            .await
            .with_context(|| format!("Failed to list {}", archive.display()))?;

        let mut created = Vec::new();
        for entry in entries.iter().filter(|e| !e.is_dir) {
            let Some(name) = entry.file_name() else {
                continue;
            };
            let target = extract_path.join(name);
            if target.is_file() {
                debug!(path = %target.display(), "Already extracted, skipping");
                continue;
            }

            debug!(entry = %entry.name, "Extracting");
            self.reader
                .extract_entry(archive, entry, extract_path)
                .await?;
            created.push(target);
        }

        Ok(created)
    }
}

/// Every file under `dir`
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Age of the most recently touched volume when it falls inside the
/// freshness window. A missing volume counts as brand new.
fn newest_age(volumes: &[PathBuf]) -> Option<Duration> {
    let now = SystemTime::now();
    for volume in volumes {
        let modified = std::fs::metadata(volume)
            .ok()
            .filter(|m| m.is_file())
            .and_then(|m| m.modified().ok());
        let Some(modified) = modified else {
            return Some(Duration::ZERO);
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age < FRESHNESS_WINDOW {
            return Some(age);
        }
    }
    None
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.file_name().map(PathBuf::from).unwrap_or_default())
}

fn same_path(a: &Path, b: &Path) -> bool {
    a.components().eq(b.components())
}
