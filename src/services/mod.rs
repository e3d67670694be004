//! Renamer services and the seams to the rest of the system

pub mod downloader;
pub mod extractor;
pub mod library;
pub mod logging;
pub mod mover;
pub mod naming;
pub mod notifications;
pub mod renamer;
pub mod scanner;
pub mod tagger;

pub use downloader::{DownloadInfo, DownloadState, DownloadStatusItem, Downloader, ScanItem};
pub use extractor::{ArchiveEntry, ArchiveReader, ExtractionOutcome, Extractor, UnrarCli};
pub use library::MovieLibrary;
pub use logging::init_tracing;
pub use mover::FileMover;
pub use naming::{NamingScheme, Tokens};
pub use notifications::{BroadcastNotifier, BroadcastNotifierConfig, Notifier, RenamerEvent};
pub use renamer::{
    Collaborators, PassOutcome, Renamer, RenamerError, ScanSummary, SnatchedSummary,
};
pub use scanner::MediaScanner;
pub use tagger::Tag;
