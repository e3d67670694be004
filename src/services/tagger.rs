//! Directory tagging
//!
//! Outcomes of a renamer pass are recorded on disk as small `.ignore`
//! marker files instead of database flags:
//!
//! - a directory tag is `<dir>/<tag>.ignore`
//! - a group tag is `<first movie file stem>.<tag>.ignore`, written next to
//!   the lexicographically first movie file of the group
//!
//! Lookups and clears walk the whole subtree and match any file ending in
//! `<tag>.ignore`, so a group tag is also found by a directory lookup on the
//! folder that contains it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::media::Group;

/// Marker file extension
pub const IGNORE_EXTENSION: &str = "ignore";

/// Outcome recorded by a marker file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Group could not be matched to a movie
    Unknown,
    /// A better release already exists in the library
    Exists,
    /// Removing a file failed
    FailedRemove,
    /// Moving a file into the library failed
    FailedRename,
    /// Files were placed while the download keeps seeding
    RenamedAlready,
    /// Download is still in progress
    Downloading,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Exists => "exists",
            Self::FailedRemove => "failed_remove",
            Self::FailedRename => "failed_rename",
            Self::RenamedAlready => "renamed_already",
            Self::Downloading => "downloading",
        }
    }

    /// Suffix every marker file for this tag ends with
    pub fn suffix(&self) -> String {
        format!("{}.{}", self.as_str(), IGNORE_EXTENSION)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "exists" => Ok(Self::Exists),
            "failed_remove" => Ok(Self::FailedRemove),
            "failed_rename" => Ok(Self::FailedRename),
            "renamed_already" => Ok(Self::RenamedAlready),
            "downloading" => Ok(Self::Downloading),
            other => bail!("Unknown tag '{}'", other),
        }
    }
}

fn marker_text(tag: Tag) -> String {
    format!(
        "This release was marked as \"{}\" by the renamer.\n\
         While this file exists the renamer leaves the release alone.\n\
         Delete it to let the renamer process the release again.\n",
        tag
    )
}

/// Marker path for a group: beside its first movie file
pub fn group_marker_path(group: &Group, tag: Tag) -> Option<PathBuf> {
    let movie = group.first_movie_file()?;
    let stem = movie.with_extension("");
    let mut name = stem.into_os_string();
    name.push(format!(".{}", tag.suffix()));
    Some(PathBuf::from(name))
}

/// Tag a group. Returns the marker written, if the group has a movie file.
pub fn tag_group(group: &Group, tag: Tag) -> Result<Option<PathBuf>> {
    let Some(marker) = group_marker_path(group, tag) else {
        debug!(group = %group.identifier, tag = %tag, "Group has no movie file to tag");
        return Ok(None);
    };
    write_marker(&marker, tag)?;
    Ok(Some(marker))
}

/// Tag a directory. Non-directories are ignored.
pub fn tag_dir(dir: &Path, tag: Tag) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        debug!(path = %dir.display(), tag = %tag, "Not a directory, not tagging");
        return Ok(None);
    }
    let marker = dir.join(tag.suffix());
    write_marker(&marker, tag)?;
    Ok(Some(marker))
}

fn write_marker(marker: &Path, tag: Tag) -> Result<()> {
    if marker.exists() {
        return Ok(());
    }
    std::fs::write(marker, marker_text(tag))
        .with_context(|| format!("Failed to write tag file {}", marker.display()))?;
    debug!(path = %marker.display(), tag = %tag, "Tagged");
    Ok(())
}

fn markers<'a>(dir: &Path, suffix: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(move |e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(suffix))
        })
        .map(|e| e.into_path())
}

/// Whether any marker for `tag` exists anywhere under `dir`
pub fn has_tag(dir: &Path, tag: Tag) -> bool {
    if !dir.is_dir() {
        return false;
    }
    markers(dir, &tag.suffix()).next().is_some()
}

/// Whether any marker of any kind exists anywhere under `dir`
pub fn has_any_tag(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let suffix = format!(".{}", IGNORE_EXTENSION);
    markers(dir, &suffix).next().is_some()
}

/// Remove every marker for `tag` under `dir`. Returns how many were removed.
pub fn untag(dir: &Path, tag: Tag) -> usize {
    if !dir.is_dir() {
        return 0;
    }
    let suffix = tag.suffix();
    let mut removed = 0;
    for marker in markers(dir, &suffix).collect::<Vec<_>>() {
        match std::fs::remove_file(&marker) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %marker.display(), error = %e, "Failed to remove tag file"),
        }
    }
    if removed > 0 {
        debug!(path = %dir.display(), tag = %tag, removed, "Untagged");
    }
    removed
}

/// Whether `path` is itself a marker file
pub fn is_marker(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == IGNORE_EXTENSION)
}
