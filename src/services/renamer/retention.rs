//! Which release stays in the library
//!
//! Qualities are ranked by `order`, lower is better. An incoming release
//! replaces a stored `done` release of worse or equal rank (equal rank is a
//! repack or proper). A stored `done` release of better rank wins and the
//! incoming files are left where they are.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::db::{ReleaseRecord, ReleaseStatus};
use crate::media::Quality;

/// Outcome of comparing an incoming group against one movie's releases
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionVerdict {
    /// Files of replaced releases
    pub remove_files: Vec<PathBuf>,
    /// Replaced release records
    pub remove_releases: Vec<i64>,
    /// Snatched releases confirmed by the incoming files
    pub mark_downloaded: Vec<i64>,
    /// Quality of a stored release that beats the incoming one
    pub existing_wins: Option<Quality>,
}

/// Compare `incoming` against `releases` (in stored order)
///
/// Evaluation stops at the first stored release that wins.
pub fn evaluate(releases: &[ReleaseRecord], incoming: &Quality) -> RetentionVerdict {
    let mut verdict = RetentionVerdict::default();

    for release in releases {
        match release.status {
            ReleaseStatus::Done => {
                if release.quality.order > incoming.order {
                    info!(
                        release_id = release.id,
                        existing = %release.quality.label,
                        incoming = %incoming.label,
                        "Removing lesser quality release"
                    );
                } else if release.quality.order == incoming.order {
                    info!(
                        release_id = release.id,
                        quality = %release.quality.label,
                        "Same quality release already exists, assuming repack"
                    );
                } else {
                    info!(
                        release_id = release.id,
                        existing = %release.quality.label,
                        incoming = %incoming.label,
                        "Better quality release already exists"
                    );
                    verdict.existing_wins = Some(release.quality.clone());
                    break;
                }
                verdict.remove_files.extend(release.files.iter().cloned());
                verdict.remove_releases.push(release.id);
            }
            ReleaseStatus::Snatched if release.quality.identifier == incoming.identifier => {
                debug!(release_id = release.id, "Marking release as downloaded");
                verdict.mark_downloaded.push(release.id);
            }
            _ => {}
        }
    }

    verdict
}
