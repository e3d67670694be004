//! Release groups produced by the media scanner
//!
//! A [`Group`] is the scanner's verdict on a cluster of files: which movie
//! they belong to, what quality they are, and which role each file plays.
//! The renamer consumes groups and never builds them itself.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Role of a file within a release group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Movie,
    MovieExtra,
    Subtitle,
    SubtitleExtra,
    Nfo,
    Trailer,
    Leftover,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::MovieExtra => "movie_extra",
            Self::Subtitle => "subtitle",
            Self::SubtitleExtra => "subtitle_extra",
            Self::Nfo => "nfo",
            Self::Trailer => "trailer",
            Self::Leftover => "leftover",
        }
    }
}

/// Quality of a release. Lower `order` is better.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality {
    pub identifier: String,
    pub label: String,
    pub order: i64,
}

impl Quality {
    pub fn new(identifier: impl Into<String>, label: impl Into<String>, order: i64) -> Self {
        Self {
            identifier: identifier.into(),
            label: label.into(),
            order,
        }
    }
}

/// Metadata the scanner extracted for a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaData {
    pub quality: Quality,
    pub quality_type: Option<String>,
    pub source: Option<String>,
    /// Release group tag
    pub group: Option<String>,
    pub video: Option<String>,
    pub audio: Option<String>,
    pub resolution_width: Option<u32>,
    pub resolution_height: Option<u32>,
    pub audio_channels: Option<u32>,
}

impl MetaData {
    pub fn with_quality(quality: Quality) -> Self {
        Self {
            quality,
            quality_type: None,
            source: None,
            group: None,
            video: None,
            audio: None,
            resolution_width: None,
            resolution_height: None,
            audio_channels: None,
        }
    }
}

/// Library information for the movie a group was identified as
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryEntry {
    /// IMDB-style identifier (e.g. "tt1049413")
    pub identifier: String,
    /// Known titles, preferred title first
    pub titles: Vec<String>,
    pub year: Option<i32>,
    /// Content rating
    pub mpaa: Option<String>,
}

impl LibraryEntry {
    /// The preferred title, if any non-empty title is known
    pub fn title(&self) -> Option<&str> {
        self.titles
            .iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty())
    }
}

/// A cluster of files the scanner believes is one release of one movie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Scanner's identity key for the group
    pub identifier: String,
    pub library: Option<LibraryEntry>,
    pub meta_data: MetaData,
    pub files: BTreeMap<FileCategory, BTreeSet<PathBuf>>,
    /// Group is a DVD/Blu-ray folder structure
    pub is_dvd: bool,
    /// Name of the folder the release came in
    pub dirname: Option<String>,
    /// Full path of the folder the release came in
    pub parentdir: Option<PathBuf>,
    /// Languages found per subtitle file
    pub subtitle_language: HashMap<PathBuf, Vec<String>>,

    /// Files materialized by the extractor; safe to move outright
    #[serde(default)]
    pub before_rename: Vec<PathBuf>,
    /// Destinations written during this pass
    #[serde(default)]
    pub renamed_files: Vec<PathBuf>,
    /// Rendered movie file name without extension or disc suffix
    #[serde(default)]
    pub filename: Option<String>,
    /// Folder the movie was placed in
    #[serde(default)]
    pub destination_dir: Option<PathBuf>,
}

impl Group {
    pub fn new(identifier: impl Into<String>, meta_data: MetaData) -> Self {
        Self {
            identifier: identifier.into(),
            library: None,
            meta_data,
            files: BTreeMap::new(),
            is_dvd: false,
            dirname: None,
            parentdir: None,
            subtitle_language: HashMap::new(),
            before_rename: Vec::new(),
            renamed_files: Vec::new(),
            filename: None,
            destination_dir: None,
        }
    }

    /// Add a file under a category
    pub fn add_file(&mut self, category: FileCategory, path: impl Into<PathBuf>) {
        self.files.entry(category).or_default().insert(path.into());
    }

    /// Files of one category in lexicographic order
    pub fn files_of(&self, category: FileCategory) -> impl Iterator<Item = &PathBuf> {
        self.files.get(&category).into_iter().flatten()
    }

    pub fn count_of(&self, category: FileCategory) -> usize {
        self.files.get(&category).map_or(0, |f| f.len())
    }

    /// The lexicographically first movie file
    pub fn first_movie_file(&self) -> Option<&PathBuf> {
        self.files_of(FileCategory::Movie).next()
    }

    /// Whether the extractor created this file during the current pass
    pub fn is_added(&self, path: &Path) -> bool {
        self.before_rename.iter().any(|p| p == path)
    }

    pub fn title(&self) -> Option<&str> {
        self.library.as_ref().and_then(|l| l.title())
    }
}
