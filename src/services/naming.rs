//! Naming templates for library folders and files
//!
//! Templates are plain strings with `<token>` placeholders, e.g.
//! `"<namethe> (<year>)"` or `"<thename><cd>.<ext>"`. Rendering substitutes
//! every known token (missing values become empty), strips characters that
//! are not allowed in file names, tidies up whitespace left behind by empty
//! tokens and finally swaps spaces for the configured separator.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::RenamerConfig;

/// Characters removed from rendered names
static FORBIDDEN_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\x00:*?"<>|]"#).unwrap());

/// Characters removed from titles before they become tokens (adds path separators)
static FORBIDDEN_TITLE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\x00/\\:*?"<>|]"#).unwrap());

static REPEATED_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

static IMDB_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"tt\d+").unwrap());

static IDENTITY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.cp\(tt\d+\)").unwrap());

/// Longest name handed to a downloader, identity tag included
const DOWNLOAD_NAME_LIMIT: usize = 127;

/// Multi-disc tokens cleared when a name must not carry a disc suffix
const MULTIPLE_TOKENS: &[&str] = &["cd", "cd_nr"];

/// Token table used to render a template
#[derive(Debug, Clone, Default)]
pub struct Tokens {
    values: BTreeMap<String, Option<String>>,
}

impl Tokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a token to a value
    pub fn set(&mut self, name: &str, value: impl ToString) -> &mut Self {
        self.values.insert(name.to_string(), Some(value.to_string()));
        self
    }

    /// Set a token that may have no value; absent values render as ""
    pub fn set_opt<T: ToString>(&mut self, name: &str, value: Option<T>) -> &mut Self {
        self.values
            .insert(name.to_string(), value.map(|v| v.to_string()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_deref())
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &Option<String>)> {
        self.values.iter()
    }
}

/// Render a template against a token table
///
/// `separator` replaces every remaining space; an empty separator keeps
/// spaces. With `remove_multiple` the disc tokens (`cd`, `cd_nr`) render
/// empty regardless of their value.
pub fn render(template: &str, tokens: &Tokens, separator: &str, remove_multiple: bool) -> String {
    let mut replaced = template.to_string();
    for (name, value) in tokens.iter() {
        let value = if remove_multiple && MULTIPLE_TOKENS.contains(&name.as_str()) {
            ""
        } else {
            value.as_deref().unwrap_or("")
        };
        replaced = replaced.replace(&format!("<{}>", name), value);
    }
    if remove_multiple {
        for name in MULTIPLE_TOKENS {
            replaced = replaced.replace(&format!("<{}>", name), "");
        }
    }

    let replaced = FORBIDDEN_CHARS.replace_all(&replaced, "");
    let replaced = replace_doubles(replaced.trim_start_matches(['.', ' ']));
    let replaced = replaced.trim_end_matches(' ');

    if separator.is_empty() {
        replaced.to_string()
    } else {
        replaced.replace(' ', separator)
    }
}

fn replace_doubles(s: &str) -> String {
    REPEATED_SPACES.replace_all(s, " ").replace(" .", ".")
}

/// Remove characters that can't appear in a title used as a path segment
pub fn clean_title(title: &str) -> String {
    FORBIDDEN_TITLE_CHARS.replace_all(title, "").trim().to_string()
}

/// Move a leading "The" to the end: "The Matrix" -> "Matrix, The"
pub fn name_the(title: &str) -> String {
    let title = title.trim();
    match title.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("the ") => {
            format!("{}, The", title[4..].trim())
        }
        _ => title.to_string(),
    }
}

/// First IMDB-style identifier (`tt` followed by digits) in `text`
pub fn find_imdb_id(text: &str) -> Option<&str> {
    IMDB_ID.find(text).map(|m| m.as_str())
}

/// Identity tag appended to download names: `.cp(tt1049413)`
pub fn identity_tag(identifier: &str) -> String {
    if identifier.is_empty() {
        String::new()
    } else {
        format!(".cp({})", identifier)
    }
}

/// Remove identity tags from a folder or release name
pub fn strip_identity_tag(name: &str) -> String {
    IDENTITY_TAG.replace_all(name, "").to_string()
}

/// Name a release is handed to the downloader under
///
/// The sanitized release name is truncated so that it fits, together with
/// the identity tag, in 127 characters.
pub fn download_name(release_name: &str, identifier: &str) -> String {
    let tag = identity_tag(identifier);
    let budget = DOWNLOAD_NAME_LIMIT.saturating_sub(tag.chars().count());
    let truncated: String = release_name.chars().take(budget).collect();
    format!("{}{}", sanitize_filename::sanitize(truncated), tag)
}

/// The configured folder/file templates and separators
#[derive(Debug, Clone)]
pub struct NamingScheme {
    pub folder_name: String,
    pub file_name: String,
    pub trailer_name: String,
    pub nfo_name: String,
    pub separator: String,
    pub folder_separator: String,
}

impl NamingScheme {
    pub fn from_config(config: &RenamerConfig) -> Self {
        Self {
            folder_name: config.folder_name.clone(),
            file_name: config.file_name.clone(),
            trailer_name: config.trailer_name.clone(),
            nfo_name: config.nfo_name.clone(),
            separator: config.separator.clone(),
            folder_separator: config.folder_separator.clone(),
        }
    }

    pub fn folder(&self, tokens: &Tokens, remove_multiple: bool) -> String {
        render(&self.folder_name, tokens, &self.folder_separator, remove_multiple)
    }

    pub fn file(&self, tokens: &Tokens, remove_multiple: bool) -> String {
        render(&self.file_name, tokens, &self.separator, remove_multiple)
    }

    pub fn trailer(&self, tokens: &Tokens) -> String {
        render(&self.trailer_name, tokens, &self.separator, true)
    }

    pub fn nfo(&self, tokens: &Tokens) -> String {
        render(&self.nfo_name, tokens, &self.separator, true)
    }
}
