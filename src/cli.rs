//! Command-line argument model for `mm`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::clean::DEFAULT_COPY_FOLDER;
use crate::filters::FilterOptions;
use crate::oplog::Surfaces;
use crate::poison::Preset;
use crate::profiles::{KeepPolicy, Profile};

/// Application version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Binary name.
pub const NAME: &str = "mm";

#[derive(Debug, Parser)]
#[command(
    name = NAME,
    version = VERSION,
    about = "Strip, poison and revert image metadata in bulk"
)]
pub struct Cli {
    /// Show per-file progress and debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,
    /// Only report errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
    /// Show what would happen without touching any file.
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,
    /// Configuration file (default: nearest .mm_config.yaml).
    #[arg(long, global = true, env = "MM_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Copy images into a folder and strip all metadata from the copies.
    Clean(CleanArgs),
    /// Write misleading captions and tags to deter scraping.
    Poison(PoisonArgs),
    /// Undo earlier poison runs using the operation log.
    Revert(RevertArgs),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Clean(_) => "clean",
            Command::Poison(_) => "poison",
            Command::Revert(_) => "revert",
        }
    }
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Image files or directories.
    #[arg(num_args = 1.., required_unless_present_any = ["list_profiles", "preview"])]
    pub paths: Vec<PathBuf>,
    /// Output folder created inside each target directory.
    #[arg(long, default_value = DEFAULT_COPY_FOLDER)]
    pub copy_folder: String,
    /// Keep the field categories this profile preserves.
    #[arg(long, value_enum)]
    pub profile: Option<Profile>,
    /// Keep these fields, e.g. EXIF:Artist.
    #[arg(long, value_name = "FIELD", num_args = 1..)]
    pub preserve_fields: Vec<String>,
    /// List the available profiles and exit.
    #[arg(long)]
    pub list_profiles: bool,
    /// Show which fields of FILE would be kept or removed, then exit.
    #[arg(long, value_name = "FILE")]
    pub preview: Option<PathBuf>,
    #[command(flatten)]
    pub batch: BatchArgs,
    #[command(flatten)]
    pub filters: FilterArgs,
}

#[derive(Debug, Args)]
pub struct PoisonArgs {
    /// Image files or directories.
    #[arg(required = true, num_args = 1..)]
    pub paths: Vec<PathBuf>,
    #[arg(long, value_enum, default_value_t = Preset::LabelFlip)]
    pub preset: Preset,
    /// Subject hint for label_flip instead of the file name.
    #[arg(long, value_name = "TEXT")]
    pub true_hint: Option<String>,
    /// Write XMP title, description and subject.
    #[arg(long)]
    pub xmp: bool,
    /// Write IPTC caption and keywords.
    #[arg(long)]
    pub iptc: bool,
    /// Write the EXIF user comment.
    #[arg(long)]
    pub exif: bool,
    /// Write a <stem>.txt caption sidecar.
    #[arg(long)]
    pub sidecar: bool,
    /// Write a <stem>.json sidecar (implies the .txt sidecar).
    #[arg(long)]
    pub json: bool,
    /// Write a <stem>.html <img> snippet.
    #[arg(long)]
    pub html: bool,
    /// CSV with real_label,poison_label columns.
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
    /// Rename files, e.g. "{stem}_{rand}"; the extension is kept.
    #[arg(long, value_name = "PATTERN")]
    pub rename_pattern: Option<String>,
    /// Seed for reproducible captions and rename tokens.
    #[arg(long)]
    pub seed: Option<u64>,
    #[command(flatten)]
    pub batch: BatchArgs,
    #[command(flatten)]
    pub filters: FilterArgs,
}

impl CleanArgs {
    pub fn keep_policy(&self) -> KeepPolicy {
        KeepPolicy {
            profile: self.profile,
            fields: self.preserve_fields.iter().cloned().collect(),
        }
    }
}

impl PoisonArgs {
    pub fn surfaces(&self) -> Surfaces {
        Surfaces {
            xmp: self.xmp,
            iptc: self.iptc,
            exif: self.exif,
            sidecar: self.sidecar,
            json: self.json,
            html: self.html,
        }
    }
}

#[derive(Debug, Args)]
pub struct RevertArgs {
    /// Directories (or files inside them) holding operation logs.
    #[arg(required = true, num_args = 1..)]
    pub paths: Vec<PathBuf>,
    /// Drop log entries after renaming files back instead of keeping markers.
    #[arg(long)]
    pub drop_markers: bool,
    /// Only remove the sidecars and clear the surfaces each entry records.
    #[arg(long)]
    pub recorded_only: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct BatchArgs {
    /// Only process the top level of each directory.
    #[arg(long)]
    pub no_recursive: bool,
    /// Files per worker chunk.
    #[arg(long, value_name = "N", value_parser = parse_positive)]
    pub batch_size: Option<usize>,
    /// Upper bound on worker threads.
    #[arg(long, value_name = "N", value_parser = parse_positive)]
    pub max_workers: Option<usize>,
}

impl BatchArgs {
    pub fn recursive(&self) -> bool {
        !self.no_recursive
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Size filter: 1MB, 500KB-2MB, >1GB, <500KB.
    #[arg(long, value_name = "EXPR", allow_hyphen_values = true)]
    pub size: Option<String>,
    /// Modification date filter: 2024-01-01, 2024-01-01:2024-12-31, >2024-01-01.
    #[arg(long, value_name = "EXPR")]
    pub date: Option<String>,
    /// Only these extensions.
    #[arg(long, value_name = "EXT", num_args = 1.., value_delimiter = ',')]
    pub formats: Vec<String>,
    /// Only files that carry metadata.
    #[arg(long, conflicts_with = "no_metadata")]
    pub has_metadata: bool,
    /// Only files without metadata.
    #[arg(long)]
    pub no_metadata: bool,
}

impl FilterArgs {
    pub fn to_options(&self) -> FilterOptions {
        let has_metadata = match (self.has_metadata, self.no_metadata) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        FilterOptions {
            size: self.size.clone(),
            date: self.date.clone(),
            formats: self.formats.clone(),
            has_metadata,
        }
    }
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err(String::from("must be at least 1")),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}
