//! Clean: metadata-free copies for safe sharing.
//!
//! By default every field is stripped from the copy. A [`KeepPolicy`] can
//! name fields, or a profile of field categories, that survive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result, TransformerError};
use crate::profiles::KeepPolicy;
use crate::transformer::MetadataTransformer;

/// Default output folder, created inside the operated-on directory.
pub const DEFAULT_COPY_FOLDER: &str = "safe_upload";

/// Copies one file into the output folder and strips the copy.
#[derive(Clone)]
pub struct CleanOperation {
    base: PathBuf,
    out_dir: PathBuf,
    keep: KeepPolicy,
    transformer: Arc<dyn MetadataTransformer>,
}

impl CleanOperation {
    pub fn new(
        base: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
        transformer: Arc<dyn MetadataTransformer>,
    ) -> Self {
        Self {
            base: base.into(),
            out_dir: out_dir.into(),
            keep: KeepPolicy::default(),
            transformer,
        }
    }

    pub fn with_keep(mut self, keep: KeepPolicy) -> Self {
        self.keep = keep;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn destination(&self, path: &Path) -> PathBuf {
        destination_for(&self.base, &self.out_dir, path)
    }

    /// Copy `path` and strip the copy, keeping only what the policy names.
    ///
    /// A copy that could not be stripped is deleted again.
    pub fn apply(&self, path: &Path) -> Result<PathBuf> {
        let dest = self.destination(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io_with_path(err, parent))?;
        }
        fs::copy(path, &dest).map_err(|err| Error::io_with_path(err, path))?;

        if let Err(err) = self.strip(&dest) {
            if let Err(remove_err) = fs::remove_file(&dest) {
                warn!(path = %dest.display(), error = %remove_err, "could not remove unstripped copy");
            }
            return Err(err.into());
        }

        debug!(from = %path.display(), to = %dest.display(), "cleaned");
        Ok(dest)
    }

    fn strip(&self, dest: &Path) -> std::result::Result<(), TransformerError> {
        if self.keep.strips_everything() {
            return self.transformer.strip_all(dest);
        }
        let present = self.transformer.list_present_fields(dest)?;
        let keep = self.keep.preserved_fields(&present);
        debug!(path = %dest.display(), kept = keep.len(), "selective strip");
        self.transformer.strip_except(dest, &keep)
    }
}

/// Where the clean copy of `path` goes; subdirectories of `base` are
/// mirrored under `out_dir`.
pub fn destination_for(base: &Path, out_dir: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(base) {
        Ok(relative) if !relative.as_os_str().is_empty() => out_dir.join(relative),
        _ => out_dir.join(path.file_name().unwrap_or(path.as_os_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::Surfaces;
    use crate::profiles::Profile;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    /// Truncates the file to mark it stripped; fails on names containing "corrupt".
    struct Truncator;

    impl MetadataTransformer for Truncator {
        fn strip_all(&self, path: &Path) -> std::result::Result<(), TransformerError> {
            if path.to_string_lossy().contains("corrupt") {
                return Err(TransformerError::Failed {
                    status: String::from("exit status: 1"),
                    stderr: String::from("corrupt image"),
                });
            }
            fs::write(path, b"").map_err(|source| TransformerError::Spawn {
                program: PathBuf::from("truncate"),
                source,
            })
        }
        fn write_caption_metadata(
            &self,
            _: &Path,
            _: &str,
            _: &[String],
            _: &Surfaces,
        ) -> std::result::Result<(), TransformerError> {
            Ok(())
        }
        fn clear_caption_fields(
            &self,
            _: &Path,
            _: &Surfaces,
        ) -> std::result::Result<(), TransformerError> {
            Ok(())
        }
        fn list_present_fields(
            &self,
            _: &Path,
        ) -> std::result::Result<BTreeSet<String>, TransformerError> {
            Ok(BTreeSet::new())
        }
    }

    fn operation(dir: &Path) -> CleanOperation {
        CleanOperation::new(dir, dir.join(DEFAULT_COPY_FOLDER), Arc::new(Truncator))
    }

    #[test]
    fn test_clean_copies_then_strips() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("cat.jpg");
        fs::write(&image, b"exif-laden").unwrap();

        let out = operation(dir.path()).apply(&image).unwrap();
        assert_eq!(out, dir.path().join("safe_upload").join("cat.jpg"));
        assert_eq!(fs::read(&out).unwrap(), b"");
        assert_eq!(fs::read(&image).unwrap(), b"exif-laden");
    }

    #[test]
    fn test_keep_policy_without_matching_fields_strips_everything() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("cat.jpg");
        fs::write(&image, b"exif-laden").unwrap();

        let keep = KeepPolicy {
            profile: Some(Profile::Archive),
            fields: ["EXIF:Artist".to_string()].into(),
        };
        let out = operation(dir.path()).with_keep(keep).apply(&image).unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"");
    }

    #[test]
    fn test_destination_mirrors_subdirectories() {
        let dir = TempDir::new().unwrap();
        let op = operation(dir.path());
        assert_eq!(
            op.destination(&dir.path().join("2024").join("a.png")),
            dir.path().join("safe_upload").join("2024").join("a.png")
        );
        assert_eq!(
            op.destination(Path::new("/elsewhere/b.png")),
            dir.path().join("safe_upload").join("b.png")
        );
    }

    #[test]
    fn test_failed_strip_leaves_no_copy() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("corrupt.jpg");
        fs::write(&image, b"x").unwrap();

        let err = operation(dir.path()).apply(&image).unwrap_err();
        assert!(err.to_string().contains("corrupt image"));
        assert!(!dir.path().join("safe_upload").join("corrupt.jpg").exists());
        assert!(image.exists());
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = operation(dir.path()).apply(&dir.path().join("gone.jpg"));
        assert!(matches!(result, Err(Error::Io { .. })));
    }
}
