//! Command pipeline: discovery, batch execution and the operation log.
//!
//! The `run_*` functions are the library entry points and work on one root.
//! [`Processor`] wraps them for the command line: it runs each path given in
//! turn (each with its own operation log) and adds dry runs, terminal output
//! and one end-of-run summary over all paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::batch::{BatchExecutor, BatchOptions, BatchResult};
use crate::clean::{CleanOperation, DEFAULT_COPY_FOLDER, destination_for};
use crate::cli::{BatchArgs, CleanArgs, Command, PoisonArgs, RevertArgs};
use crate::config::Config;
use crate::discovery::PathDiscovery;
use crate::error::{Error, Result};
use crate::filters::{FilterChain, FilterOptions};
use crate::oplog::{self, OperationEntry, OperationLog, relative_key};
use crate::poison::{Caption, LabelMapping, PoisonOperation, PoisonOptions, load_csv_mapping};
use crate::profiles::{Category, KeepPolicy, Preview, Profile};
use crate::revert::{PlannedRevert, RevertEngine, RevertOptions, RevertReport, RevertScope};
use crate::terminal::{
    Styled, print_error, print_info, print_success, print_summary, print_warning,
    stdout_supports_color,
};
use crate::transformer::MetadataTransformer;

/// Removed fields listed by a preview before the rest are summarized.
const PREVIEW_REMOVE_LIMIT: usize = 10;

/// Settings for [`run_clean`].
#[derive(Debug, Clone)]
pub struct CleanOptions {
    /// Output folder, relative to the operated-on directory.
    pub copy_folder: String,
    /// Fields that survive the strip.
    pub keep: KeepPolicy,
    pub recursive: bool,
    pub filters: FilterOptions,
    pub batch: BatchOptions,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            copy_folder: String::from(DEFAULT_COPY_FOLDER),
            keep: KeepPolicy::default(),
            recursive: true,
            filters: FilterOptions::default(),
            batch: BatchOptions::default(),
        }
    }
}

/// Settings for [`run_poison`].
#[derive(Debug, Clone)]
pub struct PoisonRunOptions {
    pub poison: PoisonOptions,
    pub recursive: bool,
    pub filters: FilterOptions,
    pub batch: BatchOptions,
}

impl Default for PoisonRunOptions {
    fn default() -> Self {
        Self {
            poison: PoisonOptions::default(),
            recursive: true,
            filters: FilterOptions::default(),
            batch: BatchOptions::default(),
        }
    }
}

/// One successfully poisoned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoisonedFile {
    /// Log key of the file before any rename.
    pub previous_key: String,
    pub key: String,
    pub entry: OperationEntry,
}

/// A file a clean would copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedClean {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Metadata fields currently present, when a transformer could tell.
    pub fields: Option<usize>,
}

/// A file a poison run would touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPoison {
    pub path: PathBuf,
    pub caption: Caption,
}

/// Copy every matching file under `root` into the copy folder and strip the
/// copies.
pub fn run_clean(
    root: &Path,
    options: &CleanOptions,
    transformer: Option<Arc<dyn MetadataTransformer>>,
) -> Result<BatchResult<PathBuf>> {
    let transformer = transformer.ok_or(Error::TransformerUnavailable)?;
    let base = oplog::base_dir(root)?;
    let out_dir = base.join(&options.copy_folder);
    let files = discover(
        root,
        options.recursive,
        &options.filters,
        Some(Arc::clone(&transformer)),
        Some(&out_dir),
    )?;
    info!(root = %root.display(), files = files.len(), out_dir = %out_dir.display(), "clean started");

    let operation = CleanOperation::new(base, out_dir, transformer).with_keep(options.keep.clone());
    let result = BatchExecutor::new(options.batch.clone())
        .process(files, move |path: &Path| operation.apply(path))?;
    info!(successful = result.successful, total = result.total, "clean finished");
    Ok(result)
}

/// Poison every matching file under `root` and record each success in the
/// operation log.
///
/// The log is loaded before any file is touched, so a corrupt log aborts the
/// run up front. It is persisted once, after the batch.
pub fn run_poison(
    root: &Path,
    options: &PoisonRunOptions,
    transformer: Option<Arc<dyn MetadataTransformer>>,
) -> Result<BatchResult<PoisonedFile>> {
    let base = oplog::base_dir(root)?;
    let mut log = OperationLog::load(&base)?;
    let operation = PoisonOperation::new(&base, options.poison.clone(), transformer.clone())?;
    let files = discover(root, options.recursive, &options.filters, transformer, None)?;
    info!(
        root = %root.display(),
        files = files.len(),
        preset = %options.poison.preset,
        "poison started"
    );

    let key_base = base.clone();
    let result = BatchExecutor::new(options.batch.clone()).process(files, move |path: &Path| {
        let (key, entry) = operation.apply(path)?;
        let previous_key = relative_key(path, &key_base).unwrap_or_else(|| key.clone());
        Ok::<_, Error>(PoisonedFile {
            previous_key,
            key,
            entry,
        })
    })?;

    if !result.outputs.is_empty() {
        record_poisoned(&mut log, &result.outputs);
        log.persist(&base)?;
    }
    info!(
        successful = result.successful,
        total = result.total,
        logged = log.len(),
        "poison finished"
    );
    Ok(result)
}

/// Undo every logged poison operation under `root`, returning the number of
/// sidecar files removed.
pub fn run_revert(
    root: &Path,
    options: RevertOptions,
    transformer: Option<Arc<dyn MetadataTransformer>>,
) -> Result<usize> {
    RevertEngine::new(transformer).with_options(options).revert(root)
}

/// Files a clean would copy, and where to.
pub fn plan_clean(
    root: &Path,
    options: &CleanOptions,
    transformer: Option<Arc<dyn MetadataTransformer>>,
) -> Result<Vec<PlannedClean>> {
    let base = oplog::base_dir(root)?;
    let out_dir = base.join(&options.copy_folder);
    let files = discover(
        root,
        options.recursive,
        &options.filters,
        transformer.clone(),
        Some(&out_dir),
    )?;
    Ok(files
        .into_iter()
        .map(|source| PlannedClean {
            destination: destination_for(&base, &out_dir, &source),
            fields: transformer
                .as_deref()
                .and_then(|t| t.list_present_fields(&source).ok())
                .map(|fields| fields.len()),
            source,
        })
        .collect())
}

/// Captions a poison run would write.
pub fn plan_poison(
    root: &Path,
    options: &PoisonRunOptions,
    transformer: Option<Arc<dyn MetadataTransformer>>,
) -> Result<Vec<PlannedPoison>> {
    let base = oplog::base_dir(root)?;
    let operation = PoisonOperation::for_preview(&base, options.poison.clone());
    discover(root, options.recursive, &options.filters, transformer, None)?
        .into_iter()
        .map(|path| {
            let caption = operation.caption_for(&path)?;
            Ok::<_, Error>(PlannedPoison { path, caption })
        })
        .collect()
}

fn discover(
    root: &Path,
    recursive: bool,
    filters: &FilterOptions,
    transformer: Option<Arc<dyn MetadataTransformer>>,
    exclude: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let chain = FilterChain::from_options(filters, transformer)?;
    let mut discovery = PathDiscovery::new(root)
        .recursive(recursive)
        .with_filters(chain);
    if let Some(dir) = exclude {
        discovery = discovery.exclude_dir(dir);
    }
    discovery.collect()
}

/// Fold poisoned files into the log.
///
/// A rename moves the entry to its new key. An earlier `original_name` is
/// carried over so a revert still restores the very first name.
fn record_poisoned(log: &mut OperationLog, poisoned: &[PoisonedFile]) {
    for file in poisoned {
        let mut entry = file.entry.clone();
        let previous = if file.previous_key != file.key {
            log.remove(&file.previous_key)
        } else {
            log.get(&file.key).cloned()
        };
        if let Some(original) = previous.and_then(|previous| previous.original_name) {
            entry.original_name = Some(original);
        }
        log.put(file.key.clone(), entry);
    }
}

/// Kept and removed fields of `file` under `keep`.
pub fn preview_fields(
    file: &Path,
    keep: &KeepPolicy,
    transformer: Option<&dyn MetadataTransformer>,
) -> Result<Preview> {
    if !file.is_file() {
        return Err(Error::invalid_path(file, "preview file not found"));
    }
    let transformer = transformer.ok_or(Error::TransformerUnavailable)?;
    let present = transformer.list_present_fields(file)?;
    Ok(keep.preview(&present))
}

/// Command-line paths in order, without repeats. Every path is checked before
/// any is processed.
fn distinct_roots(paths: &[PathBuf]) -> Result<Vec<&Path>> {
    let mut roots: Vec<&Path> = Vec::with_capacity(paths.len());
    for path in paths {
        oplog::base_dir(path)?;
        if !roots.contains(&path.as_path()) {
            roots.push(path);
        }
    }
    Ok(roots)
}

/// Flags and configuration resolved for one command-line invocation.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub config: Config,
    pub verbose: bool,
    pub quiet: bool,
    pub dry_run: bool,
}

/// Runs one parsed command and reports to the terminal.
pub struct Processor {
    settings: Settings,
    transformer: Option<Arc<dyn MetadataTransformer>>,
    color_enabled: bool,
}

impl Processor {
    pub fn new(settings: Settings, transformer: Option<Arc<dyn MetadataTransformer>>) -> Self {
        Self {
            settings,
            transformer,
            color_enabled: stdout_supports_color(),
        }
    }

    /// Returns `Ok(false)` when some files failed.
    pub fn run(&self, command: &Command) -> Result<bool> {
        info!(command = command.name(), dry_run = self.settings.dry_run, "starting");
        match command {
            Command::Clean(args) => self.clean(args),
            Command::Poison(args) => self.poison(args),
            Command::Revert(args) => self.revert(args),
        }
    }

    fn clean(&self, args: &CleanArgs) -> Result<bool> {
        if args.list_profiles {
            self.list_profiles();
            return Ok(true);
        }
        if let Some(file) = &args.preview {
            let preview = preview_fields(file, &args.keep_policy(), self.transformer.as_deref())?;
            self.describe_preview(file, args.profile, &preview);
            return Ok(true);
        }

        let options = CleanOptions {
            copy_folder: args.copy_folder.clone(),
            keep: args.keep_policy(),
            recursive: args.batch.recursive(),
            filters: args.filters.to_options(),
            batch: self.batch_options(&args.batch, "Cleaning"),
        };
        let roots = distinct_roots(&args.paths)?;

        if self.settings.dry_run {
            let mut plan = Vec::new();
            for root in &roots {
                plan.extend(plan_clean(root, &options, self.transformer.clone())?);
            }
            if plan.is_empty() {
                self.nothing_found();
            }
            for item in &plan {
                let fields = match item.fields {
                    Some(n) => format!(" ({n} metadata field(s))"),
                    None => String::new(),
                };
                print_info(&format!(
                    "Would clean {} {} {}{fields}",
                    self.name(&item.source),
                    Styled::with_color_support("\u{2192}", self.color_enabled).dim(),
                    item.destination.display()
                ));
            }
            return Ok(true);
        }

        let start = Instant::now();
        let mut result = BatchResult::empty();
        for root in &roots {
            result.merge(run_clean(root, &options, self.transformer.clone())?);
        }
        if self.settings.verbose {
            for output in &result.outputs {
                print_success(&format!("Cleaned {}", self.name(output)));
            }
        }
        Ok(self.report("Clean Complete", &result, start))
    }

    fn poison(&self, args: &PoisonArgs) -> Result<bool> {
        let options = PoisonRunOptions {
            poison: PoisonOptions {
                preset: args.preset,
                true_hint: args.true_hint.clone(),
                surfaces: args.surfaces(),
                mapping: self.mapping(args.csv.as_deref()),
                rename_pattern: args.rename_pattern.clone(),
                seed: args.seed,
            },
            recursive: args.batch.recursive(),
            filters: args.filters.to_options(),
            batch: self.batch_options(&args.batch, "Poisoning"),
        };
        let roots = distinct_roots(&args.paths)?;

        if self.settings.dry_run {
            let mut plan = Vec::new();
            for root in &roots {
                plan.extend(plan_poison(root, &options, self.transformer.clone())?);
            }
            if plan.is_empty() {
                self.nothing_found();
            }
            for item in &plan {
                print_info(&format!(
                    "Would poison {}: \"{}\" [{}]",
                    self.name(&item.path),
                    item.caption.text,
                    item.caption.tags.join(", ")
                ));
            }
            return Ok(true);
        }

        let start = Instant::now();
        let mut result = BatchResult::empty();
        for root in &roots {
            result.merge(run_poison(root, &options, self.transformer.clone())?);
        }
        if self.settings.verbose {
            for file in &result.outputs {
                print_success(&format!("Poisoned {}", file.key));
            }
        }
        Ok(self.report("Poison Complete", &result, start))
    }

    fn revert(&self, args: &RevertArgs) -> Result<bool> {
        let mut options = self.settings.config.revert_options();
        if args.drop_markers {
            options.keep_rename_markers = false;
        }
        if args.recorded_only {
            options.scope = RevertScope::Recorded;
        }
        let engine = RevertEngine::new(self.transformer.clone()).with_options(options);
        let roots = distinct_roots(&args.paths)?;

        if self.settings.dry_run {
            let mut plan = Vec::new();
            for root in &roots {
                plan.extend(engine.plan(root)?);
            }
            if plan.is_empty() && !self.settings.quiet {
                print_info("Nothing to revert");
            }
            for item in &plan {
                self.describe_revert(item);
            }
            return Ok(true);
        }

        let mut report = RevertReport::default();
        for root in &roots {
            report.merge(engine.revert_with_report(root)?);
        }
        for warning in &report.warnings {
            print_warning(warning);
        }
        if !self.settings.quiet {
            print_success(&format!(
                "Removed {} sidecar file(s), cleared {} file(s), renamed {} file(s) back",
                report.sidecars_removed, report.cleared, report.renamed
            ));
        }
        Ok(report.renames_failed == 0)
    }

    fn describe_revert(&self, item: &PlannedRevert) {
        if !item.exists {
            print_warning(&format!(
                "{} is missing; its entry would be dropped",
                item.key
            ));
            return;
        }
        for sidecar in &item.sidecars {
            print_info(&format!("Would remove {}", sidecar.display()));
        }
        if item.clear.is_some() {
            print_info(&format!("Would clear caption fields on {}", item.key));
        }
        if let Some(target) = &item.rename_to {
            print_info(&format!(
                "Would rename {} {} {}",
                item.key,
                Styled::with_color_support("\u{2192}", self.color_enabled).dim(),
                self.name(target)
            ));
        }
    }

    fn list_profiles(&self) {
        println!(
            "{}",
            Styled::with_color_support("Available metadata profiles:", self.color_enabled).cyan()
        );
        for profile in Profile::ALL {
            println!();
            println!(
                "{}: {}",
                Styled::with_color_support(profile.name(), self.color_enabled).green(),
                profile.description()
            );
            let categories = |list: &[Category]| {
                list.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
            };
            if !profile.preserve_categories().is_empty() {
                println!("  Preserves: {}", categories(profile.preserve_categories()));
            }
            if !profile.remove_categories().is_empty() {
                println!("  Removes: {}", categories(profile.remove_categories()));
            }
        }
    }

    fn describe_preview(&self, file: &Path, profile: Option<Profile>, preview: &Preview) {
        let styled = |text: String| Styled::with_color_support(text, self.color_enabled);
        println!("{}", styled(format!("Metadata preview for {}", file.display())).cyan());
        if let Some(profile) = profile {
            println!("Profile: {}", profile.title());
        }
        println!();
        println!("Total fields: {}", preview.total());
        println!("{}", styled(format!("Would preserve: {}", preview.preserve.len())).green());
        println!("{}", styled(format!("Would remove: {}", preview.remove.len())).red());
        for field in &preview.preserve {
            println!("  + {field}");
        }
        for field in preview.remove.iter().take(PREVIEW_REMOVE_LIMIT) {
            println!("  - {field}");
        }
        if preview.remove.len() > PREVIEW_REMOVE_LIMIT {
            println!("  ... and {} more", preview.remove.len() - PREVIEW_REMOVE_LIMIT);
        }
    }

    fn batch_options(&self, args: &BatchArgs, label: &str) -> BatchOptions {
        let config = &self.settings.config;
        BatchOptions {
            batch_size: args.batch_size.unwrap_or(config.batch_size).max(1),
            max_workers: args.max_workers.unwrap_or(config.max_workers).max(1),
            progress: config.progress_bar && !self.settings.quiet,
            label: label.to_string(),
            memory_limit_mb: (config.memory_limit_mb > 0).then_some(config.memory_limit_mb),
            pin_workers: false,
        }
    }

    fn mapping(&self, csv: Option<&Path>) -> LabelMapping {
        let Some(path) = csv else {
            return LabelMapping::new();
        };
        match load_csv_mapping(path) {
            Ok(mapping) => mapping,
            Err(err) => {
                warn!(error = %err, "using the built-in label mapping");
                print_warning(&format!("{err}; using the built-in label mapping"));
                LabelMapping::new()
            }
        }
    }

    fn report<T>(&self, title: &str, result: &BatchResult<T>, start: Instant) -> bool {
        if result.total == 0 {
            self.nothing_found();
            return true;
        }
        for error in &result.errors {
            print_error(error);
        }
        for warning in &result.warnings {
            print_warning(warning);
        }
        if !self.settings.quiet {
            print_summary(title, result.successful, result.total, start.elapsed());
        }
        result.all_succeeded()
    }

    fn nothing_found(&self) {
        if !self.settings.quiet {
            print_warning("No supported image files found");
        }
    }

    fn name(&self, path: &Path) -> Styled {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Styled::with_color_support(name, self.color_enabled).blue()
    }
}
