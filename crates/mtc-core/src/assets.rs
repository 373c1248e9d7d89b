//! Selective asset copy
//!
//! Mirrors the directory tree of a source upload root and copies only the
//! files whose name contains one of the manifest filenames (extension
//! stripped, so resized variants like `logo-150x150.png` come along).
//!
//! The walk is iterative and remembers every directory by canonical path,
//! so a symlink loop ends the first time it comes back around.

use crate::config::AssetsSection;
use crate::error::FilesystemError;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

static EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[^.\s]{3,4}$").expect("extension pattern is valid"));

/// Filename with a trailing 3-4 character extension removed
#[must_use]
pub fn strip_extension(filename: &str) -> &str {
    EXTENSION
        .find(filename)
        .map_or(filename, |m| &filename[..m.start()])
}

/// One asset to carry over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Stored filename
    pub filename: String,
    /// MIME type
    #[serde(default)]
    pub mime_type: String,
}

impl AssetDescriptor {
    /// Create descriptor
    #[must_use]
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Substring a matching file name must contain
    #[inline]
    #[must_use]
    pub fn stem(&self) -> &str {
        strip_extension(&self.filename)
    }
}

/// Logical asset key (`logo`, `favicon`, ...) → descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetManifest(IndexMap<String, AssetDescriptor>);

impl AssetManifest {
    /// Create empty manifest
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With asset
    #[must_use]
    pub fn with_asset(mut self, key: impl Into<String>, asset: AssetDescriptor) -> Self {
        self.0.insert(key.into(), asset);
        self
    }

    /// Descriptor for a key
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AssetDescriptor> {
        self.0.get(key)
    }

    /// Entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AssetDescriptor)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of assets
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the manifest is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Distinct non-empty stems
    ///
    /// An empty stem would match every file, so it is dropped.
    #[must_use]
    pub fn stems(&self) -> Vec<&str> {
        let mut stems: Vec<&str> = Vec::with_capacity(self.0.len());
        for asset in self.0.values() {
            let stem = asset.stem();
            if stem.is_empty() {
                warn!(filename = %asset.filename, "Asset filename has an empty stem, ignoring");
            } else if !stems.contains(&stem) {
                stems.push(stem);
            }
        }
        stems
    }
}

/// Outcome of an asset copy
#[derive(Debug, Default)]
pub struct CopyReport {
    /// Files written, as destination paths
    pub copied: Vec<PathBuf>,
    /// Directories mirrored
    pub directories: usize,
    /// Files present but not in the manifest
    pub ignored: usize,
    /// Directories reached a second time through a link
    pub revisited: usize,
    /// Subtrees or files that failed
    pub failures: Vec<FilesystemError>,
}

impl CopyReport {
    /// Copied file whose name best matches a descriptor
    ///
    /// An exact filename match wins over a resized variant.
    #[must_use]
    pub fn find(&self, asset: &AssetDescriptor) -> Option<&Path> {
        let name_of = |p: &&PathBuf| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let stem = asset.stem();
        self.copied
            .iter()
            .find(|p| name_of(p) == asset.filename)
            .or_else(|| {
                (!stem.is_empty())
                    .then(|| self.copied.iter().find(|p| name_of(p).contains(stem)))
                    .flatten()
            })
            .map(PathBuf::as_path)
    }
}

/// Copies manifest assets between tenant upload roots
#[derive(Debug, Clone)]
pub struct SelectiveAssetCopier {
    exclude_dir: String,
    dir_mode: u32,
}

impl Default for SelectiveAssetCopier {
    fn default() -> Self {
        Self::new(&AssetsSection::default())
    }
}

impl SelectiveAssetCopier {
    /// Create copier from the asset configuration
    #[must_use]
    pub fn new(config: &AssetsSection) -> Self {
        Self {
            exclude_dir: config.exclude_dir.clone(),
            dir_mode: config.dir_mode,
        }
    }

    /// Mode applied to created directories
    #[inline]
    #[must_use]
    pub fn dir_mode(&self) -> u32 {
        self.dir_mode
    }

    /// Copy the manifest's files from `source_root` to `dest_root`
    ///
    /// Re-running overwrites the same files with the same content.
    ///
    /// # Errors
    /// Returns [`FilesystemError`] only if `source_root` cannot be read.
    /// Anything below it is recorded in [`CopyReport::failures`].
    pub async fn copy(
        &self,
        source_root: &Path,
        dest_root: &Path,
        manifest: &AssetManifest,
    ) -> Result<CopyReport, FilesystemError> {
        let root = fs::canonicalize(source_root)
            .await
            .map_err(|e| FilesystemError::read_dir(source_root, e))?;
        if !fs::metadata(&root)
            .await
            .map_err(|e| FilesystemError::metadata(source_root, e))?
            .is_dir()
        {
            return Err(FilesystemError::NotADirectory(source_root.to_path_buf()));
        }
        // Check readability up front so an unreadable root fails the call.
        fs::read_dir(&root)
            .await
            .map_err(|e| FilesystemError::read_dir(source_root, e))?;

        let stems = manifest.stems();
        let mut report = CopyReport::default();
        let mut visited = HashSet::new();
        let mut stack = vec![(source_root.to_path_buf(), dest_root.to_path_buf())];

        while let Some((src, dst)) = stack.pop() {
            let canonical = match fs::canonicalize(&src).await {
                Ok(path) => path,
                Err(e) => {
                    report.failures.push(FilesystemError::metadata(&src, e));
                    continue;
                }
            };
            if !visited.insert(canonical) {
                debug!(path = %src.display(), "Directory already visited, skipping");
                report.revisited += 1;
                continue;
            }

            if let Err(e) = mirror_dir(&dst, self.dir_mode).await {
                warn!(path = %dst.display(), error = %e, "Cannot mirror directory");
                report.failures.push(e);
                continue;
            }
            report.directories += 1;

            if let Err(e) = self
                .copy_dir(&src, &dst, &stems, &mut stack, &mut report)
                .await
            {
                warn!(path = %src.display(), error = %e, "Directory listing failed");
                report.failures.push(e);
            }
        }

        info!(
            source = %source_root.display(),
            dest = %dest_root.display(),
            copied = report.copied.len(),
            failed = report.failures.len(),
            "Assets copied"
        );
        Ok(report)
    }

    /// Copy matching files of one directory and queue its subdirectories
    async fn copy_dir(
        &self,
        src: &Path,
        dst: &Path,
        stems: &[&str],
        stack: &mut Vec<(PathBuf, PathBuf)>,
        report: &mut CopyReport,
    ) -> Result<(), FilesystemError> {
        let mut entries = fs::read_dir(src)
            .await
            .map_err(|e| FilesystemError::read_dir(src, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FilesystemError::read_dir(src, e))?
        {
            let path = entry.path();
            let name = entry.file_name();
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) => {
                    report.failures.push(FilesystemError::metadata(&path, e));
                    continue;
                }
            };

            if metadata.is_dir() {
                if name == self.exclude_dir.as_str() {
                    debug!(path = %path.display(), "Excluded directory");
                    continue;
                }
                stack.push((path, dst.join(&name)));
            } else if metadata.is_file() {
                let lossy = name.to_string_lossy();
                if !stems.iter().any(|stem| lossy.contains(*stem)) {
                    report.ignored += 1;
                    continue;
                }
                let target = dst.join(&name);
                match fs::copy(&path, &target).await {
                    Ok(_) => {
                        debug!(file = %target.display(), "Asset copied");
                        report.copied.push(target);
                    }
                    Err(source) => report.failures.push(FilesystemError::Copy {
                        from: path,
                        to: target,
                        source,
                    }),
                }
            }
        }
        Ok(())
    }
}

/// Create `path` if missing and apply `mode`
async fn mirror_dir(path: &Path, mode: u32) -> Result<(), FilesystemError> {
    match fs::metadata(path).await {
        Ok(m) if m.is_dir() => Ok(()),
        Ok(_) => Err(FilesystemError::NotADirectory(path.to_path_buf())),
        Err(_) => create_dirs(path, mode).await,
    }
}

/// Create `path` and its missing parents, applying `mode` to each one created
async fn create_dirs(path: &Path, mode: u32) -> Result<(), FilesystemError> {
    let mut missing = Vec::new();
    for dir in path.ancestors() {
        if dir.as_os_str().is_empty() || fs::metadata(dir).await.is_ok() {
            break;
        }
        missing.push(dir);
    }
    for dir in missing.into_iter().rev() {
        match fs::create_dir(dir).await {
            Ok(()) => set_mode(dir, mode).await?,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(FilesystemError::create_dir(dir, e)),
        }
    }
    Ok(())
}

/// Whether this process can create files in `dir`
async fn is_writable(dir: &Path) -> bool {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || tempfile::tempfile_in(dir).is_ok())
        .await
        .unwrap_or(false)
}

/// Make sure a destination upload root exists and is writable
///
/// Creates the directory (and missing parents) with `mode` when missing.
/// An existing directory this process cannot write to gets `mode` applied
/// and is checked again.
///
/// # Errors
/// Returns [`FilesystemError::NotADirectory`] if `path` is a file,
/// [`FilesystemError::NotWritable`] if it stays unwritable, or the
/// underlying error if creation or the permission change fails.
pub async fn ensure_writable_dir(path: &Path, mode: u32) -> Result<(), FilesystemError> {
    match fs::metadata(path).await {
        Ok(m) if !m.is_dir() => Err(FilesystemError::NotADirectory(path.to_path_buf())),
        Ok(_) => {
            if is_writable(path).await {
                return Ok(());
            }
            debug!(path = %path.display(), "Relaxing permissions of upload directory");
            set_mode(path, mode).await?;
            if is_writable(path).await {
                Ok(())
            } else {
                Err(FilesystemError::NotWritable(path.to_path_buf()))
            }
        }
        Err(_) => create_dirs(path, mode).await,
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), FilesystemError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| FilesystemError::metadata(path, e))
}

#[cfg(not(unix))]
async fn set_mode(path: &Path, _mode: u32) -> Result<(), FilesystemError> {
    let mut permissions = fs::metadata(path)
        .await
        .map_err(|e| FilesystemError::metadata(path, e))?
        .permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
        .await
        .map_err(|e| FilesystemError::metadata(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn manifest() -> AssetManifest {
        AssetManifest::new()
            .with_asset("logo", AssetDescriptor::new("shop-logo.png", "image/png"))
            .with_asset("favicon", AssetDescriptor::new("icon.webp", "image/webp"))
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, rel.as_bytes()).unwrap();
    }

    #[test]
    fn extension_stripping() {
        assert_eq!(strip_extension("shop-logo.png"), "shop-logo");
        assert_eq!(strip_extension("icon.webp"), "icon");
        assert_eq!(strip_extension("archive.tar.gz"), "archive.tar.gz");
        assert_eq!(strip_extension("notes.markdown"), "notes.markdown");
        assert_eq!(strip_extension("README"), "README");
        assert_eq!(strip_extension(".png"), "");
    }

    #[test]
    fn empty_stems_are_dropped() {
        let manifest = manifest().with_asset("blank", AssetDescriptor::new(".jpeg", "image/jpeg"));
        assert_eq!(manifest.stems(), vec!["shop-logo", "icon"]);
    }

    #[tokio::test]
    async fn copies_only_manifest_files() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "2024/05/shop-logo.png");
        touch(src.path(), "2024/05/shop-logo-150x150.png");
        touch(src.path(), "2024/05/unrelated.png");
        touch(src.path(), "2023/icon.webp");

        let report = SelectiveAssetCopier::default()
            .copy(src.path(), dst.path(), &manifest())
            .await
            .unwrap();

        assert!(dst.path().join("2024/05/shop-logo.png").is_file());
        assert!(dst.path().join("2024/05/shop-logo-150x150.png").is_file());
        assert!(dst.path().join("2023/icon.webp").is_file());
        assert!(!dst.path().join("2024/05/unrelated.png").exists());
        assert_eq!(report.copied.len(), 3);
        assert_eq!(report.ignored, 1);
        assert!(report.failures.is_empty());
        assert_eq!(
            std::fs::read(dst.path().join("2024/05/shop-logo.png")).unwrap(),
            b"2024/05/shop-logo.png"
        );

        let logo = report.find(manifest().get("logo").unwrap()).unwrap();
        assert_eq!(logo, dst.path().join("2024/05/shop-logo.png"));
    }

    #[tokio::test]
    async fn excluded_directory_is_not_traversed() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "sites/7/shop-logo.png");
        touch(src.path(), "shop-logo.png");

        let report = SelectiveAssetCopier::default()
            .copy(src.path(), dst.path(), &manifest())
            .await
            .unwrap();

        assert!(dst.path().join("shop-logo.png").is_file());
        assert!(!dst.path().join("sites").exists());
        assert_eq!(report.copied.len(), 1);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "a/shop-logo.png");
        let copier = SelectiveAssetCopier::default();

        copier.copy(src.path(), dst.path(), &manifest()).await.unwrap();
        let again = copier.copy(src.path(), dst.path(), &manifest()).await.unwrap();
        assert_eq!(again.copied.len(), 1);
        assert_eq!(
            std::fs::read(dst.path().join("a/shop-logo.png")).unwrap(),
            b"a/shop-logo.png"
        );
    }

    #[tokio::test]
    async fn missing_source_root_is_an_error() {
        let dst = TempDir::new().unwrap();
        let err = SelectiveAssetCopier::default()
            .copy(&dst.path().join("absent"), dst.path(), &manifest())
            .await
            .unwrap_err();
        assert!(matches!(err, FilesystemError::ReadDir { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_cycle_terminates() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "a/shop-logo.png");
        std::os::unix::fs::symlink(src.path().join("a"), src.path().join("a/loop")).unwrap();

        let report = SelectiveAssetCopier::default()
            .copy(src.path(), dst.path(), &manifest())
            .await
            .unwrap();

        assert_eq!(report.revisited, 1);
        assert!(dst.path().join("a/shop-logo.png").is_file());
        assert!(!dst.path().join("a/loop/shop-logo.png").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn created_directories_get_configured_mode() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        touch(src.path(), "deep/shop-logo.png");
        let copier = SelectiveAssetCopier::new(&AssetsSection {
            dir_mode: 0o750,
            ..AssetsSection::default()
        });
        copier.copy(src.path(), &dst.path().join("out"), &manifest()).await.unwrap();

        let mode = std::fs::metadata(dst.path().join("out/deep")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[tokio::test]
    async fn ensure_writable_dir_creates_and_rejects_files() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("uploads/sites/5");
        ensure_writable_dir(&target, 0o755).await.unwrap();
        assert!(target.is_dir());
        ensure_writable_dir(&target, 0o755).await.unwrap();

        let file = root.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = ensure_writable_dir(&file, 0o755).await.unwrap_err();
        assert!(matches!(err, FilesystemError::NotADirectory(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn created_parents_get_configured_mode() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        ensure_writable_dir(&root.path().join("uploads/sites/5"), 0o750)
            .await
            .unwrap();

        for dir in ["uploads", "uploads/sites", "uploads/sites/5"] {
            let mode = std::fs::metadata(root.path().join(dir)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o750, "{dir}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn writability_is_checked_by_creating_a_file() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let locked = root.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        // privileged users write regardless of mode bits
        let can_write = std::fs::File::create(locked.join("access-check")).is_ok();
        let _ = std::fs::remove_file(locked.join("access-check"));
        assert_eq!(is_writable(&locked).await, can_write);

        ensure_writable_dir(&locked, 0o755).await.unwrap();
        assert!(is_writable(&locked).await);
    }
}
