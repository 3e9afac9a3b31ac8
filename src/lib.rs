//! mm - Metadata Multitool
//!
//! Applies reversible metadata transformations to image files in bulk:
//! stripping metadata from copies for safe sharing, or writing misleading
//! captions and tags to deter scraping. Every poison operation is recorded in
//! a per-directory operation log so it can be undone later.
//!
//! # Pipeline
//!
//! - [`discovery::PathDiscovery`] finds supported images and applies the
//!   [`filters::FilterChain`].
//! - [`batch::BatchExecutor`] runs a per-file transform over a bounded
//!   worker pool and aggregates failures instead of aborting.
//! - [`oplog::OperationLog`] records each poisoned file under its
//!   root-relative path.
//! - [`revert::RevertEngine`] removes sidecars, clears caption fields and
//!   renames files back.
//!
//! Metadata inside image containers is read and written through a
//! [`transformer::MetadataTransformer`], by default the `exiftool` program.
//! A clean strips every field unless a [`profiles::KeepPolicy`] names fields
//! or a profile whose categories survive.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use mmt::oplog::Surfaces;
//! use mmt::poison::PoisonOptions;
//! use mmt::processor::{PoisonRunOptions, run_poison, run_revert};
//! use mmt::revert::RevertOptions;
//!
//! let options = PoisonRunOptions {
//!     poison: PoisonOptions {
//!         surfaces: Surfaces { sidecar: true, ..Surfaces::default() },
//!         ..PoisonOptions::default()
//!     },
//!     ..PoisonRunOptions::default()
//! };
//! let result = run_poison(Path::new("photos"), &options, None).unwrap();
//! println!("{}/{} poisoned", result.successful, result.total);
//!
//! let removed = run_revert(Path::new("photos"), RevertOptions::default(), None).unwrap();
//! println!("removed {removed} sidecar file(s)");
//! ```

pub mod batch;
pub mod clean;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filters;
pub mod logging;
pub mod memory;
pub mod oplog;
pub mod parallel;
pub mod poison;
pub mod processor;
pub mod profiles;
pub mod revert;
pub mod terminal;
pub mod transformer;

pub use batch::{BatchExecutor, BatchOptions, BatchResult};
pub use config::Config;
pub use discovery::{FileRecord, PathDiscovery};
pub use error::{Error, LogError, Result, TransformerError};
pub use filters::{FilterChain, Predicate};
pub use oplog::{OperationEntry, OperationLog, Surfaces};
pub use parallel::{WorkerPool, available_parallelism};
pub use poison::{Preset, PoisonOperation, PoisonOptions};
pub use processor::{Processor, run_clean, run_poison, run_revert};
pub use profiles::{Category, KeepPolicy, Profile};
pub use revert::{RevertEngine, RevertOptions, RevertScope};
pub use transformer::{ExifTool, MetadataTransformer};
