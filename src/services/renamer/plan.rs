//! Where every file of a group goes
//!
//! Builds the rename map (source -> destination) for one group from the
//! naming templates. Nothing here touches the filesystem.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, error};

use crate::media::{FileCategory, Group, LibraryEntry};
use crate::services::naming::{self, NamingScheme, Tokens};

/// Top-level folders of a DVD or Blu-ray structure, in lookup order
const STRUCTURE_DIRS: &[&str] = &["video_ts", "audio_ts", "bdmv", "certificate"];

/// Settings that shape a plan
#[derive(Debug, Clone, Copy)]
pub struct PlanSettings<'a> {
    pub scheme: &'a NamingScheme,
    /// Library root for this movie (category override or the default)
    pub destination: &'a Path,
    pub cleanup: bool,
    pub rename_nfo: bool,
    pub move_leftover: bool,
    /// The download is still being read by a seeding client
    pub is_torrent: bool,
}

/// Planned filesystem changes for one group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenamePlan {
    pub renames: BTreeMap<PathBuf, PathBuf>,
    pub removals: Vec<PathBuf>,
    /// Rendered movie file name without extension or disc suffix
    pub filename: Option<String>,
    /// Folder the movie goes to
    pub destination_dir: Option<PathBuf>,
    /// DVD files whose structure folder couldn't be found
    pub unplaced: Vec<PathBuf>,
}

impl RenamePlan {
    /// Whether `path` is read or written by a planned rename
    pub fn touches(&self, path: &Path) -> bool {
        self.renames.contains_key(path) || self.renames.values().any(|dst| dst == path)
    }
}

/// Extension without the dot, empty when there is none
pub fn ext_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn strip_ext(name: &str, ext: &str) -> String {
    if ext.is_empty() {
        return name.to_string();
    }
    name.strip_suffix(&format!(".{}", ext))
        .unwrap_or(name)
        .to_string()
}

/// Splice a language code in front of the extension: `Up.srt` -> `Up.en.srt`
fn with_language(name: &str, ext: &str, language: &str) -> String {
    match name.strip_suffix(&format!(".{}", ext)) {
        Some(stem) if !ext.is_empty() => format!("{}.{}.{}", stem, language, ext),
        _ => name.to_string(),
    }
}

/// Path from the first structure folder down, e.g. `VIDEO_TS/VTS_01_1.VOB`
fn dvd_structure_path(path: &Path) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = path.components().collect();
    for top in STRUCTURE_DIRS {
        // Must be a folder, so never the last component
        let found = components[..components.len().saturating_sub(1)]
            .iter()
            .position(|c| c.as_os_str().to_string_lossy().eq_ignore_ascii_case(top));
        if let Some(index) = found {
            return Some(components[index..].iter().collect());
        }
    }
    None
}

/// Tokens shared by every file of a group
pub fn base_tokens(group: &Group, library: &LibraryEntry) -> Tokens {
    let movie_name = naming::clean_title(library.title().unwrap_or_default());
    let name_the = naming::name_the(&movie_name);
    let meta = &group.meta_data;

    let mut tokens = Tokens::new();
    tokens
        .set("ext", "mkv")
        .set("namethe", &name_the)
        .set("thename", &movie_name)
        .set_opt("year", library.year)
        .set_opt("first", name_the.chars().next().map(|c| c.to_uppercase().to_string()))
        .set("quality", &meta.quality.label)
        .set_opt("quality_type", meta.quality_type.as_deref())
        .set_opt("video", meta.video.as_deref())
        .set_opt("audio", meta.audio.as_deref())
        .set_opt("group", meta.group.as_deref())
        .set_opt("source", meta.source.as_deref())
        .set_opt("resolution_width", meta.resolution_width)
        .set_opt("resolution_height", meta.resolution_height)
        .set_opt("audio_channels", meta.audio_channels)
        .set("imdb_id", &library.identifier)
        .set("cd", "")
        .set("cd_nr", "")
        .set_opt("mpaa", library.mpaa.as_deref())
        .set_opt(
            "original_folder",
            group.dirname.as_deref().map(naming::strip_identity_tag),
        );
    tokens
}

/// Build the rename plan for a group
pub fn plan_group(group: &Group, library: &LibraryEntry, settings: &PlanSettings<'_>) -> RenamePlan {
    let scheme = settings.scheme;
    let mut plan = RenamePlan::default();
    let mut tokens = base_tokens(group, library);
    let movie_count = group.count_of(FileCategory::Movie);

    for (category, files) in &group.files {
        let category = *category;

        if category == FileCategory::Nfo && !settings.rename_nfo {
            debug!(group = %group.identifier, "Skipping, renaming of nfo disabled");
            for file in files {
                if settings.cleanup && (!settings.is_torrent || group.is_added(file)) {
                    plan.removals.push(file.clone());
                }
            }
            continue;
        }

        // Only reachable as companions of a subtitle
        if category == FileCategory::SubtitleExtra {
            continue;
        }

        let multiple = files.len() > 1 && !group.is_dvd;
        let mut cd = 1;

        for current in files {
            let ext = ext_of(current);
            tokens
                .set_opt(
                    "original",
                    current.file_stem().map(|s| s.to_string_lossy().into_owned()),
                )
                .set("ext", &ext);
            if multiple {
                tokens.set("cd", format!(" cd{}", cd)).set("cd_nr", cd);
            } else {
                tokens.set("cd", "").set("cd_nr", "");
            }

            let folder_name = scheme.folder(&tokens, false);
            let mut file_name = scheme.file(&tokens, false);
            tokens.set("filename", strip_ext(&file_name, &ext));

            match category {
                FileCategory::Trailer => file_name = scheme.trailer(&tokens),
                FileCategory::Nfo => file_name = scheme.nfo(&tokens),
                _ => {}
            }

            let movie_dir = settings.destination.join(&folder_name);

            if group.is_dvd && category == FileCategory::Movie {
                match dvd_structure_path(current) {
                    Some(structure) => {
                        plan.renames.insert(current.clone(), movie_dir.join(structure));
                    }
                    None => {
                        error!(path = %current.display(), "Could not determine dvd structure");
                        plan.unplaced.push(current.clone());
                    }
                }
            } else {
                match category {
                    FileCategory::Leftover => {
                        if settings.move_leftover {
                            if let Some(name) = current.file_name() {
                                plan.renames.insert(current.clone(), movie_dir.join(name));
                            }
                        }
                    }
                    FileCategory::Subtitle => {}
                    // Companion lookup from the movie file takes precedence
                    FileCategory::MovieExtra => {
                        plan.renames
                            .entry(current.clone())
                            .or_insert_with(|| movie_dir.join(&file_name));
                    }
                    _ => {
                        plan.renames.insert(current.clone(), movie_dir.join(&file_name));
                    }
                }
            }

            match category {
                FileCategory::Subtitle => {
                    let remove_multiple = movie_count == 1;
                    let mut sub_name = scheme.file(&tokens, remove_multiple);

                    let extras = companion_renames(
                        group,
                        FileCategory::SubtitleExtra,
                        current,
                        &tokens,
                        settings,
                        remove_multiple,
                    );

                    // No language when one file carries several
                    if let Some([language]) = group.subtitle_language.get(current).map(Vec::as_slice) {
                        sub_name = with_language(&sub_name, &ext, language);
                    }
                    plan.renames.insert(current.clone(), movie_dir.join(&sub_name));
                    plan.renames.extend(extras);
                }
                FileCategory::Movie => {
                    let extras = companion_renames(
                        group,
                        FileCategory::MovieExtra,
                        current,
                        &tokens,
                        settings,
                        false,
                    );
                    plan.renames.extend(extras);

                    plan.filename = Some(strip_ext(&scheme.file(&tokens, true), &ext));
                    plan.destination_dir = Some(movie_dir.clone());
                }
                _ => {}
            }

            if multiple {
                cd += 1;
            }
        }
    }

    plan
}

/// Files of `category` that share `current`'s name up to its extension
fn companion_renames(
    group: &Group,
    category: FileCategory,
    current: &Path,
    tokens: &Tokens,
    settings: &PlanSettings<'_>,
    remove_multiple: bool,
) -> BTreeMap<PathBuf, PathBuf> {
    let current_str = current.to_string_lossy();
    let ext = ext_of(current);
    let prefix = match current_str.strip_suffix(ext.as_str()) {
        Some(stem) if !ext.is_empty() => stem.to_string(),
        _ => format!("{}.", current_str),
    };

    let mut tokens = tokens.clone();
    let mut renames = BTreeMap::new();
    for extra in group.files_of(category) {
        if !extra.to_string_lossy().starts_with(&prefix) {
            continue;
        }
        tokens.set("ext", ext_of(extra));
        let folder_name = settings.scheme.folder(&tokens, remove_multiple);
        let file_name = settings.scheme.file(&tokens, remove_multiple);
        renames.insert(
            extra.clone(),
            settings.destination.join(folder_name).join(file_name),
        );
    }
    renames
}
