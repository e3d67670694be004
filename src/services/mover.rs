//! File placement into the library
//!
//! Moves, copies or links a single file according to the configured
//! [`FileAction`]. A forced move always relocates the file outright; it is
//! used for sources that nothing else is reading (usenet downloads, files the
//! extractor created). Linking prefers a hardlink and falls back to a copy
//! plus a symlink at the original location, so a seeding client keeps reading
//! the same path.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{FileAction, RenamerConfig};

/// errno for "operation not permitted"
const EPERM: i32 = 1;

/// Places files in the library
#[derive(Debug, Clone)]
pub struct FileMover {
    action: FileAction,
    file_permission: u32,
}

impl FileMover {
    pub fn new(action: FileAction, file_permission: u32) -> Self {
        Self {
            action,
            file_permission,
        }
    }

    pub fn from_config(config: &RenamerConfig) -> Self {
        Self::new(config.file_action, config.file_permission)
    }

    pub fn action(&self) -> FileAction {
        self.action
    }

    /// Place `src` at `dst`
    ///
    /// A permission error is tolerated when `dst` ended up in place anyway
    /// (copying onto a filesystem without permission bits); the source is
    /// then removed. Any other I/O error is returned.
    pub async fn move_file(&self, src: &Path, dst: &Path, force: bool) -> Result<()> {
        let action = if force { FileAction::Move } else { self.action };

        debug!(
            src = %src.display(),
            dst = %dst.display(),
            action = action.as_str(),
            forced = force,
            "Placing file"
        );

        let result = match action {
            FileAction::Move => move_outright(src, dst).await,
            FileAction::Copy => copy_file(src, dst).await,
            FileAction::Link => link_or_copy(src, dst).await,
        };

        match result {
            Ok(()) => {
                self.set_permissions(dst).await;
                Ok(())
            }
            Err(e) if e.raw_os_error() == Some(EPERM) && dst.exists() => {
                warn!(
                    src = %src.display(),
                    dst = %dst.display(),
                    "Permission error while placing file, destination exists; removing source"
                );
                tokio::fs::remove_file(src)
                    .await
                    .with_context(|| format!("Failed to remove {}", src.display()))?;
                Ok(())
            }
            Err(e) => Err(e).with_context(|| {
                format!(
                    "Couldn't {} {} to {}",
                    action.as_str(),
                    src.display(),
                    dst.display()
                )
            }),
        }
    }

    async fn set_permissions(&self, path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let permissions = std::fs::Permissions::from_mode(self.file_permission);
            if let Err(e) = tokio::fs::set_permissions(path, permissions).await {
                error!(path = %path.display(), error = %e, "Failed setting permissions for file");
            }
        }
        #[cfg(not(unix))]
        {
            let _ = path;
        }
    }
}

/// Rename, falling back to copy + remove across filesystems
async fn move_outright(src: &Path, dst: &Path) -> io::Result<()> {
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(EPERM) => Err(e),
        Err(e) => {
            debug!(src = %src.display(), error = %e, "Rename failed, copying instead");
            copy_file(src, dst).await?;
            tokio::fs::remove_file(src).await
        }
    }
}

/// Hardlink, falling back to copy + symlink replacement of the source
async fn link_or_copy(src: &Path, dst: &Path) -> io::Result<()> {
    match tokio::fs::hard_link(src, dst).await {
        Ok(()) => return Ok(()),
        Err(e) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                error = %e,
                "Couldn't hardlink file, copying and symlinking instead"
            );
        }
    }

    if same_file(src, dst).await {
        debug!(dst = %dst.display(), "Already linked");
        return Ok(());
    }
    copy_file(src, dst).await?;

    if let Err(e) = replace_with_symlink(src, dst).await {
        error!(
            src = %src.display(),
            dst = %dst.display(),
            error = %e,
            "Couldn't symlink file, copied instead"
        );
    }
    Ok(())
}

/// Copy that refuses to write a file onto itself
async fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    if same_file(src, dst).await {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} and {} are the same file", src.display(), dst.display()),
        ));
    }
    tokio::fs::copy(src, dst).await.map(|_| ())
}

/// Whether both paths resolve to the same file on disk
async fn same_file(a: &Path, b: &Path) -> bool {
    let (Ok(a), Ok(b)) = (tokio::fs::metadata(a).await, tokio::fs::metadata(b).await) else {
        return false;
    };

    same_inode(&a, &b)
}

#[cfg(unix)]
fn same_inode(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_inode(_a: &std::fs::Metadata, _b: &std::fs::Metadata) -> bool {
    false
}

/// Swap `src` for a symlink pointing at `dst`
async fn replace_with_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let mut link = src.as_os_str().to_owned();
    link.push(".link");
    let link = PathBuf::from(link);

    #[cfg(unix)]
    tokio::fs::symlink(dst, &link).await?;
    #[cfg(windows)]
    tokio::fs::symlink_file(dst, &link).await?;

    tokio::fs::remove_file(src).await?;
    tokio::fs::rename(&link, src).await
}

/// Create a directory and any missing parents
pub async fn make_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory {}", path.display()))
}

/// Remove empty sub-directories bottom-up, then `folder` itself
///
/// Best effort: failures are logged at error level when `show_error` is set
/// and at debug level otherwise. Returns whether `folder` was removed.
pub async fn delete_empty_folder(folder: &Path, show_error: bool) -> bool {
    let log_failure = |path: &Path, e: &io::Error| {
        if show_error {
            error!(path = %path.display(), error = %e, "Couldn't remove empty directory");
        } else {
            debug!(path = %path.display(), error = %e, "Couldn't remove empty directory");
        }
    };

    let subdirs: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();

    for dir in subdirs {
        if is_empty_dir(&dir) {
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                log_failure(&dir, &e);
            }
        }
    }

    match tokio::fs::remove_dir(folder).await {
        Ok(()) => {
            info!(path = %folder.display(), "Removed empty folder");
            true
        }
        Err(e) => {
            log_failure(folder, &e);
            false
        }
    }
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("source.mkv");
        std::fs::write(&src, b"movie data").unwrap();
        let dst = temp.path().join("dest.mkv");
        (temp, src, dst)
    }

    #[tokio::test]
    async fn test_forced_move_ignores_action() {
        let (_temp, src, dst) = setup();
        let mover = FileMover::new(FileAction::Copy, 0o644);
        mover.move_file(&src, &dst, true).await.unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"movie data");
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let (_temp, src, dst) = setup();
        let mover = FileMover::new(FileAction::Copy, 0o644);
        mover.move_file(&src, &dst, false).await.unwrap();
        assert!(src.exists());
        assert!(dst.exists());
    }

    #[tokio::test]
    async fn test_move_action() {
        let (_temp, src, dst) = setup();
        let mover = FileMover::new(FileAction::Move, 0o644);
        mover.move_file(&src, &dst, false).await.unwrap();
        assert!(!src.exists());
        assert!(dst.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_link_creates_hardlink() {
        use std::os::unix::fs::MetadataExt;

        let (_temp, src, dst) = setup();
        let mover = FileMover::new(FileAction::Link, 0o644);
        mover.move_file(&src, &dst, false).await.unwrap();
        let src_meta = std::fs::metadata(&src).unwrap();
        let dst_meta = std::fs::metadata(&dst).unwrap();
        assert_eq!(src_meta.ino(), dst_meta.ino());
    }

    #[tokio::test]
    async fn test_link_onto_existing_hardlink_keeps_data() {
        let (_temp, src, dst) = setup();
        std::fs::hard_link(&src, &dst).unwrap();

        let mover = FileMover::new(FileAction::Link, 0o644);
        mover.move_file(&src, &dst, false).await.unwrap();

        assert_eq!(std::fs::read(&src).unwrap(), b"movie data");
        assert_eq!(std::fs::read(&dst).unwrap(), b"movie data");
        assert!(!std::fs::symlink_metadata(&src).unwrap().file_type().is_symlink());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_onto_itself_is_refused() {
        let (_temp, src, dst) = setup();
        std::fs::hard_link(&src, &dst).unwrap();

        let mover = FileMover::new(FileAction::Copy, 0o644);
        assert!(mover.move_file(&src, &dst, false).await.is_err());
        assert_eq!(std::fs::read(&dst).unwrap(), b"movie data");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions_applied() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, src, dst) = setup();
        let mover = FileMover::new(FileAction::Copy, 0o600);
        mover.move_file(&src, &dst, false).await.unwrap();
        let mode = std::fs::metadata(&dst).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_missing_source_errors() {
        let temp = TempDir::new().unwrap();
        let mover = FileMover::new(FileAction::Move, 0o644);
        let result = mover
            .move_file(&temp.path().join("nope"), &temp.path().join("dst"), true)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_empty_folder() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("release");
        std::fs::create_dir_all(root.join("a").join("b")).unwrap();
        std::fs::create_dir_all(root.join("c")).unwrap();

        assert!(delete_empty_folder(&root, false).await);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_delete_empty_folder_keeps_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("release");
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::create_dir_all(root.join("full")).unwrap();
        std::fs::write(root.join("full").join("sample.mkv"), b"x").unwrap();

        assert!(!delete_empty_folder(&root, false).await);
        assert!(!root.join("empty").exists());
        assert!(root.join("full").join("sample.mkv").exists());
    }

    #[tokio::test]
    async fn test_make_dir_nested() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("x").join("y");
        make_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
    }
}
