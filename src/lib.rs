//! Librarian renamer
//!
//! Moves finished downloads into the movie library: extracts archives,
//! names files from templates, keeps the best release of every movie and
//! keeps stored release statuses in line with the download clients.

pub mod config;
pub mod db;
pub mod jobs;
pub mod media;
pub mod services;

pub use config::{FileAction, RenamerConfig};
pub use db::Database;
pub use services::{Collaborators, PassOutcome, Renamer, RenamerError};
