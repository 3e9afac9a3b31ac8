//! Metadata backend capability and its exiftool-backed implementation.
//!
//! The core never edits image containers itself. Everything that touches
//! metadata inside a file goes through [`MetadataTransformer`], and every call
//! is fallible per file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::TransformerError;
use crate::oplog::Surfaces;

/// Groups exiftool reports for every file regardless of embedded metadata.
const SYNTHETIC_GROUPS: &[&str] = &["SourceFile", "ExifTool", "File", "System", "Composite"];

/// XMP titles longer than this are truncated.
const XMP_TITLE_LIMIT: usize = 200;

/// Narrow capability interface consumed by clean, poison, revert and filters.
pub trait MetadataTransformer: Send + Sync {
    /// Remove every metadata field from `path` in place.
    fn strip_all(&self, path: &Path) -> Result<(), TransformerError>;

    /// Remove every metadata field except the `Group:Tag` names in `keep`.
    ///
    /// Backends that cannot copy fields back fall back to [`strip_all`]
    /// only when `keep` is empty, and fail otherwise.
    ///
    /// [`strip_all`]: MetadataTransformer::strip_all
    fn strip_except(&self, path: &Path, keep: &BTreeSet<String>) -> Result<(), TransformerError> {
        if keep.is_empty() {
            return self.strip_all(path);
        }
        Err(TransformerError::Unsupported {
            operation: "selective strip",
        })
    }

    /// Write caption and tags to the metadata surfaces enabled in `surfaces`.
    fn write_caption_metadata(
        &self,
        path: &Path,
        caption: &str,
        tags: &[String],
        surfaces: &Surfaces,
    ) -> Result<(), TransformerError>;

    /// Clear the caption fields (title, description, caption-abstract,
    /// user-comment, keywords/subject) on the surfaces enabled in `surfaces`.
    fn clear_caption_fields(&self, path: &Path, surfaces: &Surfaces)
    -> Result<(), TransformerError>;

    /// Qualified names (`Group:Tag`) of the embedded fields present in `path`.
    fn list_present_fields(&self, path: &Path) -> Result<BTreeSet<String>, TransformerError>;

    /// Whether `path` carries any embedded metadata at all.
    fn presence_probe(&self, path: &Path) -> Result<bool, TransformerError> {
        Ok(!self.list_present_fields(path)?.is_empty())
    }
}

/// Shells out to the `exiftool` command-line program.
///
/// The handle only stores the program path; each call runs its own process,
/// so clones can be handed to independent workers.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Find a working exiftool, preferring an explicitly configured binary.
    pub fn locate(configured: Option<&Path>) -> Option<Self> {
        let program = match configured {
            Some(path) => path.to_path_buf(),
            None => which::which("exiftool").ok()?,
        };
        let tool = Self::new(program);
        match tool.version() {
            Ok(version) => {
                debug!(program = %tool.program.display(), %version, "found exiftool");
                Some(tool)
            }
            Err(err) => {
                debug!(program = %tool.program.display(), error = %err, "exiftool unusable");
                None
            }
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn version(&self) -> Result<String, TransformerError> {
        self.run(&[String::from("-ver")], None)
            .map(|out| out.trim().to_string())
    }

    fn run(&self, args: &[String], path: Option<&Path>) -> Result<String, TransformerError> {
        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(path) = path {
            command.arg(path);
        }

        let output = command.output().map_err(|source| TransformerError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(TransformerError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl MetadataTransformer for ExifTool {
    fn strip_all(&self, path: &Path) -> Result<(), TransformerError> {
        let args = [String::from("-overwrite_original"), String::from("-all=")];
        self.run(&args, Some(path)).map(|_| ())
    }

    fn strip_except(&self, path: &Path, keep: &BTreeSet<String>) -> Result<(), TransformerError> {
        self.run(&strip_except_args(keep), Some(path)).map(|_| ())
    }

    fn write_caption_metadata(
        &self,
        path: &Path,
        caption: &str,
        tags: &[String],
        surfaces: &Surfaces,
    ) -> Result<(), TransformerError> {
        match write_args(caption, tags, surfaces) {
            Some(args) => self.run(&args, Some(path)).map(|_| ()),
            None => Ok(()),
        }
    }

    fn clear_caption_fields(
        &self,
        path: &Path,
        surfaces: &Surfaces,
    ) -> Result<(), TransformerError> {
        match clear_args(surfaces) {
            Some(args) => self.run(&args, Some(path)).map(|_| ()),
            None => Ok(()),
        }
    }

    fn list_present_fields(&self, path: &Path) -> Result<BTreeSet<String>, TransformerError> {
        let args = [String::from("-j"), String::from("-G"), String::from("-m")];
        let stdout = self.run(&args, Some(path))?;
        parse_field_listing(&stdout)
    }
}

/// Arguments that clear everything and copy the `keep` fields back from the
/// original file.
fn strip_except_args(keep: &BTreeSet<String>) -> Vec<String> {
    let mut args = vec![String::from("-overwrite_original"), String::from("-all=")];
    if !keep.is_empty() {
        args.extend(["-tagsFromFile", "@"].map(String::from));
        args.extend(keep.iter().map(|field| format!("-{field}")));
    }
    args
}

/// Arguments writing caption metadata, or `None` when no surface is enabled.
fn write_args(caption: &str, tags: &[String], surfaces: &Surfaces) -> Option<Vec<String>> {
    if !surfaces.any_metadata() {
        return None;
    }

    let mut args = vec![String::from("-overwrite_original")];
    if surfaces.xmp {
        let title: String = caption.chars().take(XMP_TITLE_LIMIT).collect();
        args.push(format!("-XMP-dc:Title={title}"));
        args.push(format!("-XMP-dc:Description={caption}"));
        args.extend(tags.iter().map(|tag| format!("-XMP-dc:Subject+={tag}")));
    }
    if surfaces.iptc {
        args.push(format!("-IPTC:Caption-Abstract={caption}"));
        args.extend(tags.iter().map(|tag| format!("-IPTC:Keywords+={tag}")));
    }
    if surfaces.exif {
        args.push(format!("-EXIF:UserComment={caption}"));
    }
    Some(args)
}

/// Arguments clearing caption metadata, or `None` when no surface is enabled.
fn clear_args(surfaces: &Surfaces) -> Option<Vec<String>> {
    if !surfaces.any_metadata() {
        return None;
    }

    let mut args = vec![String::from("-overwrite_original")];
    if surfaces.xmp {
        args.extend(
            ["-XMP-dc:Title=", "-XMP-dc:Description=", "-XMP-dc:Subject="].map(String::from),
        );
    }
    if surfaces.iptc {
        args.extend(["-IPTC:Caption-Abstract=", "-IPTC:Keywords="].map(String::from));
    }
    if surfaces.exif {
        args.push(String::from("-EXIF:UserComment="));
    }
    Some(args)
}

/// Parse `exiftool -j -G` output into qualified field names.
fn parse_field_listing(stdout: &str) -> Result<BTreeSet<String>, TransformerError> {
    let value: serde_json::Value =
        serde_json::from_str(stdout).map_err(|err| TransformerError::Output {
            reason: err.to_string(),
        })?;

    let object = value
        .as_array()
        .and_then(|files| files.first())
        .and_then(|file| file.as_object())
        .ok_or_else(|| TransformerError::Output {
            reason: String::from("expected a JSON array with one object"),
        })?;

    Ok(object
        .keys()
        .filter(|key| {
            let group = key.split(':').next().unwrap_or_default();
            !SYNTHETIC_GROUPS.contains(&group)
        })
        .cloned()
        .collect())
}
