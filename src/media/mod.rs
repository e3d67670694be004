//! Media grouping model shared by the scanner and the renamer

pub mod group;

pub use group::{FileCategory, Group, LibraryEntry, MetaData, Quality};
