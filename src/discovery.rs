//! Enumeration of candidate image files under a root path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::filters::FilterChain;

/// Lower-case extensions treated as images.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "webp", "bmp"];

/// A discovered file and the attributes filters look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Lower-case extension without the dot, empty when there is none.
    pub extension: String,
}

impl FileRecord {
    /// Stat `path` into a record.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified()?,
            extension: extension_of(path).unwrap_or_default(),
        })
    }
}

/// Lower-cased extension of `path`.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Whether `path` has one of the [`SUPPORTED_EXTENSIONS`].
pub fn is_supported(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Lazily enumerate supported image files under `root`.
///
/// A file root yields itself when supported. A directory root is walked in
/// file-name order, descending into subdirectories only when `recursive`.
/// Each call starts a fresh walk.
pub fn enumerate(root: &Path, recursive: bool) -> Result<Enumeration> {
    Enumeration::start(root, recursive, None)
}

/// Iterator returned by [`enumerate`].
///
/// Walk errors (permission denied and the like) surface as
/// [`Error::InvalidPath`] items instead of being skipped.
pub struct Enumeration {
    root: PathBuf,
    inner: Inner,
}

enum Inner {
    Single(Option<PathBuf>),
    Walk {
        walker: walkdir::IntoIter,
        exclude: Option<PathBuf>,
    },
}

impl Enumeration {
    fn start(root: &Path, recursive: bool, exclude: Option<PathBuf>) -> Result<Self> {
        let metadata = fs::metadata(root).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => Error::invalid_path(root, "path does not exist"),
            _ => Error::invalid_path(root, err.to_string()),
        })?;

        let inner = if metadata.is_file() {
            Inner::Single(is_supported(root).then(|| root.to_path_buf()))
        } else if metadata.is_dir() {
            let walker = WalkDir::new(root)
                .min_depth(1)
                .max_depth(if recursive { usize::MAX } else { 1 })
                .sort_by_file_name()
                .into_iter();
            Inner::Walk { walker, exclude }
        } else {
            return Err(Error::invalid_path(
                root,
                "path is neither a file nor a directory",
            ));
        };

        Ok(Self {
            root: root.to_path_buf(),
            inner,
        })
    }
}

impl Iterator for Enumeration {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        let Self { root, inner } = self;
        match inner {
            Inner::Single(path) => path.take().map(Ok),
            Inner::Walk { walker, exclude } => loop {
                let entry = match walker.next()? {
                    Ok(entry) => entry,
                    Err(err) => {
                        let path = err.path().unwrap_or(root.as_path()).to_path_buf();
                        return Some(Err(Error::invalid_path(path, err.to_string())));
                    }
                };

                if entry.file_type().is_dir() {
                    if exclude.as_deref() == Some(entry.path()) {
                        walker.skip_current_dir();
                    }
                    continue;
                }
                if entry.file_type().is_file() && is_supported(entry.path()) {
                    return Some(Ok(entry.into_path()));
                }
            },
        }
    }
}

/// Discovery of filtered image files under one root.
#[derive(Debug, Clone)]
pub struct PathDiscovery {
    root: PathBuf,
    recursive: bool,
    exclude: Option<PathBuf>,
    filters: FilterChain,
}

impl PathDiscovery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: false,
            exclude: None,
            filters: FilterChain::default(),
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Never descend into `dir`.
    pub fn exclude_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exclude = Some(dir.into());
        self
    }

    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unfiltered enumeration, honouring the excluded directory.
    pub fn enumerate(&self) -> Result<Enumeration> {
        Enumeration::start(&self.root, self.recursive, self.exclude.clone())
    }

    /// Every supported file that passes the filter chain.
    pub fn collect(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut rejected = 0usize;
        for path in self.enumerate()? {
            let path = path?;
            if self.filters.matches(&path) {
                files.push(path);
            } else {
                rejected += 1;
            }
        }
        debug!(
            root = %self.root.display(),
            found = files.len(),
            rejected,
            "discovered files"
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"img").unwrap();
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_is_supported_is_case_insensitive() {
        assert!(is_supported(Path::new("a.JPG")));
        assert!(is_supported(Path::new("a.tiff")));
        assert!(is_supported(Path::new("a.bmp")));
        assert!(!is_supported(Path::new("a.gif")));
        assert!(!is_supported(Path::new("a.txt")));
        assert!(!is_supported(Path::new("noext")));
    }

    #[test]
    fn test_missing_root_is_invalid_path() {
        let dir = TempDir::new().unwrap();
        let result = enumerate(&dir.path().join("missing"), false);
        assert!(matches!(result, Err(Error::InvalidPath { .. })));
    }

    #[test]
    fn test_single_file_root() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("cat.jpg");
        let text = dir.path().join("notes.txt");
        touch(&image);
        touch(&text);

        let found: Vec<_> = enumerate(&image, false).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(found, vec![image]);
        assert_eq!(enumerate(&text, false).unwrap().count(), 0);
    }

    #[test]
    fn test_directory_walk_is_sorted_and_filtered_by_extension() {
        let dir = TempDir::new().unwrap();
        for name in ["b.png", "a.jpg", "c.txt", "d.webp"] {
            touch(&dir.path().join(name));
        }
        touch(&dir.path().join("sub").join("e.jpg"));

        let flat: Vec<_> = enumerate(dir.path(), false)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(names(&flat), vec!["a.jpg", "b.png", "d.webp"]);

        let deep: Vec<_> = enumerate(dir.path(), true)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(deep.len(), 4);
        assert!(deep.contains(&dir.path().join("sub").join("e.jpg")));
    }

    #[test]
    fn test_enumeration_is_restartable() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.jpg"));
        let discovery = PathDiscovery::new(dir.path());
        assert_eq!(discovery.enumerate().unwrap().count(), 1);
        assert_eq!(discovery.enumerate().unwrap().count(), 1);
    }

    #[test]
    fn test_excluded_directory_is_skipped() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.jpg"));
        touch(&dir.path().join("safe_upload").join("a.jpg"));

        let files = PathDiscovery::new(dir.path())
            .recursive(true)
            .exclude_dir(dir.path().join("safe_upload"))
            .collect()
            .unwrap();
        assert_eq!(files, vec![dir.path().join("a.jpg")]);
    }

    #[test]
    fn test_file_record_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Photo.JPEG");
        touch(&path);
        let record = FileRecord::from_path(&path).unwrap();
        assert_eq!(record.size, 3);
        assert_eq!(record.extension, "jpeg");
    }
}
