//! Renamer configuration management

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

/// How files are placed in the library when the download is not force-moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Move the file, removing it from the download folder
    Move,
    /// Copy the file, leaving the original for seeding
    Copy,
    /// Hardlink the file, falling back to copy + symlink
    Link,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Link => "link",
        }
    }
}

impl FromStr for FileAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "move" => Ok(Self::Move),
            "copy" => Ok(Self::Copy),
            "link" | "hardlink" => Ok(Self::Link),
            other => bail!("Unknown file action '{}'", other),
        }
    }
}

/// Renamer configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RenamerConfig {
    /// Master switch; a disabled renamer turns every pass into a no-op
    pub enabled: bool,

    /// Staging root scanned for finished downloads
    pub from: PathBuf,

    /// Library root that organized movies are placed under
    pub to: PathBuf,

    /// Template for the movie folder
    pub folder_name: String,

    /// Template for movie, subtitle and extra file names
    pub file_name: String,

    /// Template for trailer file names
    pub trailer_name: String,

    /// Template for nfo file names
    pub nfo_name: String,

    /// Replaces spaces in file names; empty keeps spaces
    pub separator: String,

    /// Replaces spaces in folder names; empty keeps spaces
    pub folder_separator: String,

    /// Minutes between snatched checks (0 disables)
    pub run_every: u64,

    /// Hours between forced full scans (0 disables)
    pub force_every: u64,

    /// Extract rar archives before scanning
    pub unrar: bool,

    /// Path or name of the unrar binary
    pub unrar_path: String,

    /// Delete files that are not renamed (leftovers, old releases, archives)
    pub cleanup: bool,

    /// Move leftover files next to the movie instead of removing them
    pub move_leftover: bool,

    /// Rename nfo files using `nfo_name`
    pub rename_nfo: bool,

    /// How files are placed when not force-moved
    pub file_action: FileAction,

    /// Ask the searcher for the next release when a download fails
    pub next_on_failed: bool,

    /// Permission bits applied to placed files
    pub file_permission: u32,
}

impl RenamerConfig {
    /// Creates a config with default settings for the given roots
    pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            from: from.into(),
            to: to.into(),
            folder_name: "<namethe> (<year>)".to_string(),
            file_name: "<thename><cd>.<ext>".to_string(),
            trailer_name: "<filename>-trailer.<ext>".to_string(),
            nfo_name: "<filename>.orig.<ext>".to_string(),
            separator: String::new(),
            folder_separator: String::new(),
            run_every: 1,
            force_every: 2,
            unrar: false,
            unrar_path: "unrar".to_string(),
            cleanup: false,
            move_leftover: false,
            rename_nfo: true,
            file_action: FileAction::Link,
            next_on_failed: true,
            file_permission: 0o644,
        }
    }

    /// Load `.env` (if present) and then the process environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from = lookup("RENAMER_FROM").context("RENAMER_FROM is required")?;
        let to = lookup("RENAMER_TO").context("RENAMER_TO is required")?;
        let mut config = Self::new(from, to);

        let flag = |key: &str, default: bool| -> Result<bool> {
            match lookup(key) {
                Some(v) => parse_bool(&v).with_context(|| format!("Invalid {}", key)),
                None => Ok(default),
            }
        };
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(v) => v.trim().parse().with_context(|| format!("Invalid {}", key)),
                None => Ok(default),
            }
        };

        config.enabled = flag("RENAMER_ENABLED", config.enabled)?;
        config.unrar = flag("RENAMER_UNRAR", config.unrar)?;
        config.cleanup = flag("RENAMER_CLEANUP", config.cleanup)?;
        config.move_leftover = flag("RENAMER_MOVE_LEFTOVER", config.move_leftover)?;
        config.rename_nfo = flag("RENAMER_RENAME_NFO", config.rename_nfo)?;
        config.next_on_failed = flag("RENAMER_NEXT_ON_FAILED", config.next_on_failed)?;

        config.run_every = number("RENAMER_RUN_EVERY", config.run_every)?;
        config.force_every = number("RENAMER_FORCE_EVERY", config.force_every)?;

        if let Some(v) = lookup("RENAMER_FOLDER_NAME") {
            config.folder_name = v;
        }
        if let Some(v) = lookup("RENAMER_FILE_NAME") {
            config.file_name = v;
        }
        if let Some(v) = lookup("RENAMER_TRAILER_NAME") {
            config.trailer_name = v;
        }
        if let Some(v) = lookup("RENAMER_NFO_NAME") {
            config.nfo_name = v;
        }
        if let Some(v) = lookup("RENAMER_SEPARATOR") {
            config.separator = v;
        }
        if let Some(v) = lookup("RENAMER_FOLDER_SEPARATOR") {
            config.folder_separator = v;
        }
        if let Some(v) = lookup("RENAMER_UNRAR_PATH") {
            config.unrar_path = v;
        }
        if let Some(v) = lookup("RENAMER_FILE_ACTION") {
            config.file_action = v.parse().context("Invalid RENAMER_FILE_ACTION")?;
        }
        if let Some(v) = lookup("RENAMER_FILE_PERMISSION") {
            config.file_permission = u32::from_str_radix(v.trim().trim_start_matches("0o"), 8)
                .context("Invalid RENAMER_FILE_PERMISSION")?;
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => bail!("'{}' is not a boolean", other),
    }
}
