//! Caption poisoning: misleading captions and tags written to metadata
//! surfaces and sidecar files, plus optional renames.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::oplog::{self, OperationEntry, Surfaces, relative_key};
use crate::transformer::MetadataTransformer;

/// Built-in label flips, in match order.
pub const DEFAULT_MAP: &[(&str, &str)] = &[
    ("cat", "toaster"),
    ("dog", "sedan"),
    ("person", "mailbox"),
    ("car", "microwave"),
    ("tree", "server rack"),
];

/// Vocabulary for `clip_confuse` captions.
pub const COMMON_TOKENS: &[&str] = &[
    "cathedral",
    "pastry",
    "bicycle",
    "nebula",
    "tractor",
    "saxophone",
    "alpaca",
    "motherboard",
    "violin",
    "submarine",
    "orchid",
    "skyscraper",
    "marble",
    "avalanche",
    "pixel",
    "comet",
    "oregano",
    "drone",
    "harbor",
    "magma",
    "accordion",
    "chalk",
    "lighthouse",
    "microscope",
];

const STYLE_BLOAT_CAPTION: &str = "style analog film oil paint hdr macro tilt-shift cyanotype \
    low-poly voxel pixel-art ukiyo-e watercolor neon-noir hyperreal minimalist baroque \
    isometric volumetric";

const CLIP_CONFUSE_TOKENS: usize = 40;
const CLIP_CONFUSE_TAGS: usize = 15;
const RAND_TOKEN_LEN: usize = 6;
const RAND_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Caption generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Swap the subject for an unrelated object.
    #[default]
    #[value(name = "label_flip")]
    LabelFlip,
    /// Random unrelated tokens.
    #[value(name = "clip_confuse")]
    ClipConfuse,
    /// A pile of art-style keywords.
    #[value(name = "style_bloat")]
    StyleBloat,
}

impl Preset {
    pub fn name(self) -> &'static str {
        match self {
            Preset::LabelFlip => "label_flip",
            Preset::ClipConfuse => "clip_confuse",
            Preset::StyleBloat => "style_bloat",
        }
    }

    /// Generate the caption and tags for one file.
    pub fn render<R: Rng + ?Sized>(self, hint: &str, mapping: &LabelMapping, rng: &mut R) -> Caption {
        match self {
            Preset::LabelFlip => label_flip(hint, mapping),
            Preset::ClipConfuse => {
                let doubled: Vec<&str> = COMMON_TOKENS.iter().chain(COMMON_TOKENS).copied().collect();
                let text = doubled
                    .choose_multiple(rng, CLIP_CONFUSE_TOKENS)
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" ");
                let tags = COMMON_TOKENS
                    .choose_multiple(rng, CLIP_CONFUSE_TAGS)
                    .map(|tag| tag.to_string())
                    .collect();
                Caption { text, tags }
            }
            Preset::StyleBloat => Caption {
                text: STYLE_BLOAT_CAPTION.to_string(),
                tags: ["style", "aesthetic", "mixed"].map(String::from).to_vec(),
            },
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn label_flip(hint: &str, mapping: &LabelMapping) -> Caption {
    let hint = hint.to_lowercase();
    let merged = mapping.over_defaults();
    let value = merged
        .iter()
        .find(|(real, _)| hint.contains(real.as_str()))
        .map(|(_, poison)| poison.as_str())
        .or_else(|| mapping.first_value())
        .or_else(|| merged.get("cat"))
        .unwrap_or("toaster");

    Caption {
        text: format!("{value} on a sofa, studio product shot"),
        tags: [value, "appliance", "chrome", "product", "studio"]
            .map(String::from)
            .to_vec(),
    }
}

/// A generated caption and its tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    #[serde(rename = "caption")]
    pub text: String,
    pub tags: Vec<String>,
}

/// Ordered real-label to poison-label mapping.
///
/// Inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMapping {
    pairs: Vec<(String, String)>,
}

impl LabelMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, real: impl Into<String>, poison: impl Into<String>) {
        let (real, poison) = (real.into(), poison.into());
        match self.pairs.iter_mut().find(|(key, _)| *key == real) {
            Some((_, value)) => *value = poison,
            None => self.pairs.push((real, poison)),
        }
    }

    pub fn get(&self, real: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == real)
            .map(|(_, value)| value.as_str())
    }

    pub fn first_value(&self) -> Option<&str> {
        self.pairs.first().map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// [`DEFAULT_MAP`] with this mapping laid over it.
    pub fn over_defaults(&self) -> LabelMapping {
        let mut merged = LabelMapping {
            pairs: DEFAULT_MAP
                .iter()
                .map(|(real, poison)| (real.to_string(), poison.to_string()))
                .collect(),
        };
        for (real, poison) in &self.pairs {
            merged.insert(real.clone(), poison.clone());
        }
        merged
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for LabelMapping {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut mapping = LabelMapping::new();
        for (real, poison) in iter {
            mapping.insert(real, poison);
        }
        mapping
    }
}

/// Load a `real_label,poison_label` CSV.
///
/// A missing file is an empty mapping. Real labels are lower-cased, and rows
/// with either column blank are skipped.
pub fn load_csv_mapping(path: &Path) -> Result<LabelMapping> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(LabelMapping::new()),
        Err(err) => {
            return Err(Error::Mapping {
                path: path.to_path_buf(),
                reason: err.to_string(),
            });
        }
    };
    let mapping_error = |reason: String| Error::Mapping {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes.as_slice());

    let headers = reader
        .headers()
        .map_err(|err| mapping_error(err.to_string()))?
        .clone();
    let column = |name: &str| headers.iter().position(|header| header == name);
    let (Some(real_col), Some(poison_col)) = (column("real_label"), column("poison_label")) else {
        debug!(path = %path.display(), "mapping has no real_label/poison_label columns");
        return Ok(LabelMapping::new());
    };

    let mut mapping = LabelMapping::new();
    for record in reader.records() {
        let record = record.map_err(|err| mapping_error(err.to_string()))?;
        let real = record.get(real_col).unwrap_or_default().to_lowercase();
        let poison = record.get(poison_col).unwrap_or_default();
        if real.is_empty() || poison.is_empty() {
            continue;
        }
        mapping.insert(real, poison);
    }
    Ok(mapping)
}

/// Random `[a-z0-9]` token.
pub fn rand_token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| RAND_ALPHABET[rng.random_range(0..RAND_ALPHABET.len())] as char)
        .collect()
}

/// Rename `path` using a `{stem}`/`{rand}` pattern, keeping the extension.
///
/// Renaming onto an existing file is an error.
pub fn rename_with_pattern<R: Rng + ?Sized>(path: &Path, pattern: &str, rng: &mut R) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = pattern.replace("{stem}", &stem);
    if name.contains("{rand}") {
        name = name.replace("{rand}", &rand_token(rng, RAND_TOKEN_LEN));
    }
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(Error::invalid_argument(
            format!("--rename-pattern {pattern}"),
            "pattern must produce a plain file name",
        ));
    }
    if let Some(ext) = path.extension() {
        name = format!("{name}.{}", ext.to_string_lossy());
    }

    let target = path.with_file_name(&name);
    if target == path {
        return Ok(target);
    }
    oplog::rename_no_clobber(path, &target).map_err(|err| match err.kind() {
        io::ErrorKind::AlreadyExists => Error::invalid_path(&target, "rename target already exists"),
        _ => Error::io_with_path(err, path),
    })?;
    Ok(target)
}

/// `<img>` tag with escaped attributes.
pub fn html_snippet(image_name: &str, alt: &str, title: &str) -> String {
    format!(
        "<img src=\"{}\" alt=\"{}\" title=\"{}\" loading=\"lazy\">",
        escape_attr(image_name),
        escape_attr(alt),
        escape_attr(title)
    )
}

fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Write the sidecars `surfaces` asks for next to `image`.
///
/// Returns the files written.
pub fn write_sidecars(image: &Path, caption: &Caption, surfaces: &Surfaces) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let write = |path: PathBuf, contents: String, written: &mut Vec<PathBuf>| {
        fs::write(&path, contents).map_err(|err| Error::io_with_path(err, &path))?;
        written.push(path);
        Ok::<_, Error>(())
    };

    if surfaces.sidecar || surfaces.json {
        write(image.with_extension("txt"), caption.text.clone(), &mut written)?;
    }
    if surfaces.json {
        let json = serde_json::to_string_pretty(caption).map_err(|err| {
            Error::io_with_path(io::Error::new(io::ErrorKind::InvalidData, err), image)
        })?;
        write(image.with_extension("json"), json, &mut written)?;
    }
    if surfaces.html {
        let name = image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let snippet = html_snippet(&name, &caption.text, &caption.text);
        write(image.with_extension("html"), snippet, &mut written)?;
    }
    Ok(written)
}

/// Per-file generator: deterministic from `seed` and the log key when seeded.
pub fn rng_for(seed: Option<u64>, key: &str) -> StdRng {
    match seed {
        Some(seed) => {
            let mut hasher = Sha256::new();
            hasher.update(seed.to_le_bytes());
            hasher.update(key.as_bytes());
            StdRng::from_seed(hasher.finalize().into())
        }
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Settings shared by every file of a poison run.
#[derive(Debug, Clone, Default)]
pub struct PoisonOptions {
    pub preset: Preset,
    /// Overrides the file stem as the label-flip hint when non-empty.
    pub true_hint: Option<String>,
    pub surfaces: Surfaces,
    pub mapping: LabelMapping,
    pub rename_pattern: Option<String>,
    pub seed: Option<u64>,
}

/// Poisons one file at a time; cheap to clone into workers.
#[derive(Clone)]
pub struct PoisonOperation {
    base: PathBuf,
    options: Arc<PoisonOptions>,
    transformer: Option<Arc<dyn MetadataTransformer>>,
}

impl PoisonOperation {
    /// Fails with [`Error::TransformerUnavailable`] when a metadata surface
    /// is requested without a transformer.
    pub fn new(
        base: impl Into<PathBuf>,
        options: PoisonOptions,
        transformer: Option<Arc<dyn MetadataTransformer>>,
    ) -> Result<Self> {
        if options.surfaces.any_metadata() && transformer.is_none() {
            return Err(Error::TransformerUnavailable);
        }
        Ok(Self {
            base: base.into(),
            options: Arc::new(options),
            transformer,
        })
    }

    /// An operation that only previews captions; `apply` refuses metadata
    /// surfaces.
    pub fn for_preview(base: impl Into<PathBuf>, options: PoisonOptions) -> Self {
        Self {
            base: base.into(),
            options: Arc::new(options),
            transformer: None,
        }
    }

    pub fn options(&self) -> &PoisonOptions {
        &self.options
    }

    /// The caption `apply` would generate for `path`.
    pub fn caption_for(&self, path: &Path) -> Result<Caption> {
        let key = self.key_for(path)?;
        let mut rng = rng_for(self.options.seed, &key);
        Ok(self.render(path, &mut rng))
    }

    /// Poison `path`, returning its log key and entry.
    ///
    /// A failure after a rename moves the file back and removes the
    /// sidecars written so far.
    pub fn apply(&self, path: &Path) -> Result<(String, OperationEntry)> {
        let key = self.key_for(path)?;
        let mut rng = rng_for(self.options.seed, &key);
        let caption = self.render(path, &mut rng);

        let (target, original_name) = match self.options.rename_pattern.as_deref() {
            Some(pattern) => {
                let original = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned());
                (rename_with_pattern(path, pattern, &mut rng)?, original)
            }
            None => (path.to_path_buf(), None),
        };

        let mut written = Vec::new();
        if let Err(err) = self.write_surfaces(&target, &caption, &mut written) {
            self.roll_back(path, &target, &written);
            return Err(err);
        }

        let new_key = relative_key(&target, &self.base)
            .ok_or_else(|| Error::invalid_path(&target, "file is outside the operated-on root"))?;
        debug!(key = %new_key, caption = %caption.text, "poisoned");
        Ok((
            new_key,
            OperationEntry {
                caption: caption.text,
                tags: caption.tags,
                surfaces: self.options.surfaces,
                original_name,
            },
        ))
    }

    fn key_for(&self, path: &Path) -> Result<String> {
        relative_key(path, &self.base)
            .ok_or_else(|| Error::invalid_path(path, "file is outside the operated-on root"))
    }

    fn render(&self, path: &Path, rng: &mut StdRng) -> Caption {
        let hint = match self.options.true_hint.as_deref() {
            Some(hint) if !hint.is_empty() => hint.to_string(),
            _ => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        self.options.preset.render(&hint, &self.options.mapping, rng)
    }

    fn write_surfaces(&self, target: &Path, caption: &Caption, written: &mut Vec<PathBuf>) -> Result<()> {
        let surfaces = &self.options.surfaces;
        written.extend(write_sidecars(target, caption, surfaces)?);
        if surfaces.any_metadata() {
            let transformer = self.transformer.as_deref().ok_or(Error::TransformerUnavailable)?;
            transformer.write_caption_metadata(target, &caption.text, &caption.tags, surfaces)?;
        }
        Ok(())
    }

    fn roll_back(&self, original: &Path, target: &Path, written: &[PathBuf]) {
        for sidecar in written {
            if let Err(err) = fs::remove_file(sidecar) {
                warn!(path = %sidecar.display(), error = %err, "could not remove sidecar");
            }
        }
        if original != target {
            if let Err(err) = oplog::rename_no_clobber(target, original) {
                warn!(path = %target.display(), error = %err, "could not undo rename");
            }
        }
    }
}
