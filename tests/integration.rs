//! Integration tests for mm.

use clap::Parser;
use mmt::batch::BatchOptions;
use mmt::cli::Cli;
use mmt::filters::FilterOptions;
use mmt::oplog::{LOG_NAME, OperationLog, Surfaces};
use mmt::poison::{PoisonOptions, Preset};
use mmt::processor::{
    CleanOptions, PoisonRunOptions, Processor, Settings, run_clean, run_poison, run_revert,
};
use mmt::profiles::{KeepPolicy, Profile};
use mmt::revert::{RevertOptions, RevertScope};
use mmt::transformer::MetadataTransformer;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

mod helpers {
    //! A metadata backend that keeps "fields" as `META:` lines inside the
    //! file, so the effect of every call can be read back from disk.

    use mmt::error::TransformerError;
    use mmt::oplog::Surfaces;
    use mmt::transformer::MetadataTransformer;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::{Path, PathBuf};

    pub struct LineTool;

    fn read(path: &Path) -> Result<String, TransformerError> {
        fs::read_to_string(path).map_err(|err| TransformerError::Output {
            reason: err.to_string(),
        })
    }

    fn write(path: &Path, contents: String) -> Result<(), TransformerError> {
        fs::write(path, contents).map_err(|source| TransformerError::Spawn {
            program: PathBuf::from("line-tool"),
            source,
        })
    }

    fn refuse_broken(path: &Path) -> Result<(), TransformerError> {
        if path.to_string_lossy().contains("broken") {
            return Err(TransformerError::Failed {
                status: String::from("exit status: 1"),
                stderr: String::from("file format error"),
            });
        }
        Ok(())
    }

    fn without_fields(text: &str) -> String {
        text.lines()
            .filter(|line| !line.starts_with("META:"))
            .map(|line| format!("{line}\n"))
            .collect()
    }

    impl MetadataTransformer for LineTool {
        fn strip_all(&self, path: &Path) -> Result<(), TransformerError> {
            refuse_broken(path)?;
            write(path, without_fields(&read(path)?))
        }

        fn strip_except(&self, path: &Path, keep: &BTreeSet<String>) -> Result<(), TransformerError> {
            refuse_broken(path)?;
            let text: String = read(path)?
                .lines()
                .filter(|line| match line.strip_prefix("META:") {
                    Some(field) => keep.contains(field.split('=').next().unwrap_or_default()),
                    None => true,
                })
                .map(|line| format!("{line}\n"))
                .collect();
            write(path, text)
        }

        fn write_caption_metadata(
            &self,
            path: &Path,
            caption: &str,
            tags: &[String],
            surfaces: &Surfaces,
        ) -> Result<(), TransformerError> {
            refuse_broken(path)?;
            let mut text = read(path)?;
            if surfaces.xmp {
                text.push_str(&format!("META:XMP:Title={caption}\n"));
                text.push_str(&format!("META:XMP:Subject={}\n", tags.join(",")));
            }
            if surfaces.iptc {
                text.push_str(&format!("META:IPTC:Caption-Abstract={caption}\n"));
            }
            if surfaces.exif {
                text.push_str(&format!("META:EXIF:UserComment={caption}\n"));
            }
            write(path, text)
        }

        fn clear_caption_fields(
            &self,
            path: &Path,
            _: &Surfaces,
        ) -> Result<(), TransformerError> {
            write(path, without_fields(&read(path)?))
        }

        fn list_present_fields(&self, path: &Path) -> Result<BTreeSet<String>, TransformerError> {
            Ok(read(path)?
                .lines()
                .filter_map(|line| line.strip_prefix("META:"))
                .filter_map(|field| field.split('=').next())
                .map(String::from)
                .collect())
        }
    }

    /// Write a fake image carrying the given metadata fields.
    pub fn image(path: &Path, fields: &[&str]) {
        let mut text = String::from("pixels\n");
        for field in fields {
            text.push_str(&format!("META:{field}=x\n"));
        }
        fs::write(path, text).unwrap();
    }
}

fn line_tool() -> Option<Arc<dyn MetadataTransformer>> {
    Some(Arc::new(helpers::LineTool))
}

fn poison_options(surfaces: Surfaces) -> PoisonRunOptions {
    PoisonRunOptions {
        poison: PoisonOptions {
            surfaces,
            ..PoisonOptions::default()
        },
        ..PoisonRunOptions::default()
    }
}

fn sidecar_only() -> Surfaces {
    Surfaces {
        sidecar: true,
        ..Surfaces::default()
    }
}

fn listing(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            (
                path.file_name().unwrap().to_string_lossy().into_owned(),
                fs::read(&path).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

#[test]
fn test_poison_then_revert_removes_sidecar() {
    let dir = TempDir::new().unwrap();
    helpers::image(&dir.path().join("cat.jpg"), &[]);

    let result = run_poison(dir.path(), &poison_options(sidecar_only()), None).unwrap();
    assert_eq!((result.successful, result.total), (1, 1));
    assert_eq!(
        fs::read_to_string(dir.path().join("cat.txt")).unwrap(),
        "toaster on a sofa, studio product shot"
    );
    assert!(OperationLog::load(dir.path()).unwrap().contains("cat.jpg"));

    let removed = run_revert(dir.path(), RevertOptions::default(), None).unwrap();
    assert_eq!(removed, 1);
    assert!(!dir.path().join("cat.txt").exists());
    assert!(dir.path().join("cat.jpg").exists());
    assert!(!OperationLog::load(dir.path()).unwrap().contains("cat.jpg"));
}

#[test]
fn test_rename_round_trip_leaves_marker() {
    let dir = TempDir::new().unwrap();
    helpers::image(&dir.path().join("cat.jpg"), &[]);
    let mut options = poison_options(Surfaces::default());
    options.poison.rename_pattern = Some(String::from("{stem}_toaster"));

    run_poison(dir.path(), &options, None).unwrap();
    let log = OperationLog::load(dir.path()).unwrap();
    let entry = log.get("cat_toaster.jpg").unwrap();
    assert_eq!(entry.original_name.as_deref(), Some("cat.jpg"));
    assert!(!dir.path().join("cat.jpg").exists());

    let removed = run_revert(dir.path(), RevertOptions::default(), None).unwrap();
    assert_eq!(removed, 0);
    assert!(dir.path().join("cat.jpg").exists());
    assert!(!dir.path().join("cat_toaster.jpg").exists());

    let log = OperationLog::load(dir.path()).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log.get("cat.jpg").unwrap().original_name, None);

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join(LOG_NAME)).unwrap()).unwrap();
    assert!(raw["entries"]["cat.jpg"]["original_name"].is_null());
}

#[test]
fn test_rename_round_trip_can_drop_marker() {
    let dir = TempDir::new().unwrap();
    helpers::image(&dir.path().join("dog.jpg"), &[]);
    let mut options = poison_options(Surfaces::default());
    options.poison.rename_pattern = Some(String::from("{stem}_{rand}"));
    run_poison(dir.path(), &options, None).unwrap();

    let revert = RevertOptions {
        keep_rename_markers: false,
        ..RevertOptions::default()
    };
    run_revert(dir.path(), revert, None).unwrap();
    assert!(dir.path().join("dog.jpg").exists());
    assert!(OperationLog::load(dir.path()).unwrap().is_empty());
}

#[test]
fn test_revert_without_log_writes_nothing() {
    let dir = TempDir::new().unwrap();
    helpers::image(&dir.path().join("cat.jpg"), &["XMP:Title"]);
    fs::write(dir.path().join("cat.txt"), "unrelated").unwrap();
    let before = listing(dir.path());

    let removed = run_revert(dir.path(), RevertOptions::default(), line_tool()).unwrap();
    assert_eq!(removed, 0);
    assert_eq!(listing(dir.path()), before);
    assert!(!dir.path().join(LOG_NAME).exists());
}

#[test]
fn test_mixed_failures_regardless_of_workers() {
    for workers in [1, 4] {
        let dir = TempDir::new().unwrap();
        for name in ["a_broken.jpg", "b.jpg", "c_broken.jpg", "d.jpg", "e.jpg"] {
            helpers::image(&dir.path().join(name), &[]);
        }
        let mut options = poison_options(Surfaces {
            xmp: true,
            ..Surfaces::default()
        });
        options.batch = BatchOptions {
            batch_size: 2,
            max_workers: workers,
            pin_workers: true,
            ..BatchOptions::default()
        };

        let result = run_poison(dir.path(), &options, line_tool()).unwrap();
        assert_eq!(result.successful, 3, "workers = {workers}");
        assert_eq!(result.total, 5);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.contains("_broken.jpg: ")));

        let log = OperationLog::load(dir.path()).unwrap();
        assert_eq!(log.len(), 3);
        assert!(!log.contains("a_broken.jpg"));
    }
}

#[test]
fn test_metadata_surfaces_are_cleared_on_revert() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("person.png");
    helpers::image(&image, &[]);
    let options = poison_options(Surfaces {
        xmp: true,
        exif: true,
        ..Surfaces::default()
    });

    run_poison(dir.path(), &options, line_tool()).unwrap();
    let tool = helpers::LineTool;
    let fields = tool.list_present_fields(&image).unwrap();
    assert!(fields.contains("XMP:Title"));
    assert!(fields.contains("EXIF:UserComment"));
    assert!(fs::read_to_string(&image).unwrap().contains("mailbox"));

    run_revert(dir.path(), RevertOptions::default(), line_tool()).unwrap();
    assert!(tool.list_present_fields(&image).unwrap().is_empty());
    assert_eq!(fs::read_to_string(&image).unwrap(), "pixels\n");
}

#[test]
fn test_recorded_scope_leaves_foreign_sidecars() {
    let dir = TempDir::new().unwrap();
    helpers::image(&dir.path().join("tree.jpg"), &[]);
    let options = poison_options(Surfaces {
        json: true,
        ..Surfaces::default()
    });
    run_poison(dir.path(), &options, None).unwrap();
    fs::write(dir.path().join("tree.html"), "<p>mine</p>").unwrap();

    let revert = RevertOptions {
        scope: RevertScope::Recorded,
        ..RevertOptions::default()
    };
    assert_eq!(run_revert(dir.path(), revert, None).unwrap(), 2);
    assert!(!dir.path().join("tree.txt").exists());
    assert!(!dir.path().join("tree.json").exists());
    assert!(dir.path().join("tree.html").exists());
}

#[test]
fn test_seeded_runs_match_across_worker_counts() {
    let captions = |workers: usize| {
        let dir = TempDir::new().unwrap();
        for i in 0..12 {
            helpers::image(&dir.path().join(format!("img_{i:02}.jpg")), &[]);
        }
        let mut options = poison_options(Surfaces::default());
        options.poison.preset = Preset::ClipConfuse;
        options.poison.seed = Some(42);
        options.batch = BatchOptions {
            batch_size: 3,
            max_workers: workers,
            pin_workers: true,
            ..BatchOptions::default()
        };
        run_poison(dir.path(), &options, None).unwrap();
        OperationLog::load(dir.path())
            .unwrap()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.caption.clone(), entry.tags.clone()))
            .collect::<Vec<_>>()
    };

    let sequential = captions(1);
    assert_eq!(sequential.len(), 12);
    assert_eq!(sequential, captions(4));
}

#[test]
fn test_clean_end_to_end() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("2024");
    fs::create_dir(&nested).unwrap();
    helpers::image(&dir.path().join("a.jpg"), &["EXIF:GPSLatitude", "XMP:Creator"]);
    helpers::image(&nested.join("b.webp"), &["EXIF:Model"]);
    helpers::image(&dir.path().join("broken.jpg"), &["EXIF:Model"]);
    fs::write(dir.path().join("notes.md"), "not an image").unwrap();

    let options = CleanOptions::default();
    let result = run_clean(dir.path(), &options, line_tool()).unwrap();
    assert_eq!((result.successful, result.total), (2, 3));
    assert_eq!(result.errors.len(), 1);

    let out = dir.path().join("safe_upload");
    assert_eq!(fs::read_to_string(out.join("a.jpg")).unwrap(), "pixels\n");
    assert_eq!(fs::read_to_string(out.join("2024").join("b.webp")).unwrap(), "pixels\n");
    assert!(!out.join("broken.jpg").exists());
    assert!(fs::read_to_string(dir.path().join("a.jpg")).unwrap().contains("GPSLatitude"));

    // Outputs are never picked up as inputs.
    let again = run_clean(dir.path(), &options, line_tool()).unwrap();
    assert_eq!(again.total, 3);
}

#[test]
fn test_filters_narrow_the_batch() {
    let dir = TempDir::new().unwrap();
    helpers::image(&dir.path().join("small.jpg"), &[]);
    helpers::image(&dir.path().join("tagged.png"), &["XMP:Title"]);
    fs::write(dir.path().join("large.jpg"), vec![b'x'; 4096]).unwrap();

    let mut options = poison_options(sidecar_only());
    options.filters = FilterOptions {
        size: Some(String::from("<1KB")),
        formats: vec![String::from("jpg")],
        ..FilterOptions::default()
    };
    let result = run_poison(dir.path(), &options, None).unwrap();
    assert_eq!(result.total, 1);
    assert!(dir.path().join("small.txt").exists());

    options.filters = FilterOptions {
        has_metadata: Some(true),
        ..FilterOptions::default()
    };
    let result = run_poison(dir.path(), &options, line_tool()).unwrap();
    assert_eq!(result.total, 1);
    assert!(dir.path().join("tagged.txt").exists());
}

#[test]
fn test_missing_root_is_invalid_path() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");
    let result = run_poison(&missing, &poison_options(sidecar_only()), None);
    assert!(matches!(result, Err(mmt::Error::InvalidPath { .. })));
}

#[test]
fn test_nested_files_are_processed_by_default() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("2024").join("june");
    fs::create_dir_all(&nested).unwrap();
    helpers::image(&dir.path().join("top.jpg"), &[]);
    helpers::image(&nested.join("deep.png"), &[]);

    let result = run_poison(dir.path(), &poison_options(sidecar_only()), None).unwrap();
    assert_eq!((result.successful, result.total), (2, 2));
    assert!(nested.join("deep.txt").exists());
    assert!(OperationLog::load(dir.path()).unwrap().contains("2024/june/deep.png"));

    let other = TempDir::new().unwrap();
    fs::create_dir(other.path().join("sub")).unwrap();
    helpers::image(&other.path().join("top.jpg"), &[]);
    helpers::image(&other.path().join("sub").join("deep.jpg"), &[]);
    let mut options = poison_options(sidecar_only());
    options.recursive = false;
    let result = run_poison(other.path(), &options, None).unwrap();
    assert_eq!(result.total, 1);
    assert!(!other.path().join("sub").join("deep.txt").exists());
}

#[test]
fn test_clean_keeps_preserved_fields() {
    let dir = TempDir::new().unwrap();
    helpers::image(
        &dir.path().join("portrait.jpg"),
        &["EXIF:Artist", "EXIF:Orientation", "GPS:GPSLatitude", "EXIF:Model"],
    );

    let options = CleanOptions {
        keep: KeepPolicy {
            profile: Some(Profile::CopyrightOnly),
            fields: ["EXIF:Orientation".to_string()].into(),
        },
        ..CleanOptions::default()
    };
    let result = run_clean(dir.path(), &options, line_tool()).unwrap();
    assert_eq!((result.successful, result.total), (1, 1));

    let copy = dir.path().join("safe_upload").join("portrait.jpg");
    let kept = helpers::LineTool.list_present_fields(&copy).unwrap();
    assert_eq!(
        kept.into_iter().collect::<Vec<_>>(),
        vec!["EXIF:Artist", "EXIF:Orientation"]
    );
    assert!(fs::read_to_string(&copy).unwrap().starts_with("pixels\n"));
    let original = helpers::LineTool
        .list_present_fields(&dir.path().join("portrait.jpg"))
        .unwrap();
    assert_eq!(original.len(), 4);
}

#[test]
fn test_poison_and_revert_several_directories() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    helpers::image(&first.path().join("cat.jpg"), &[]);
    helpers::image(&second.path().join("dog.jpg"), &[]);
    let (a, b) = (
        first.path().to_str().unwrap(),
        second.path().to_str().unwrap(),
    );
    let settings = Settings {
        quiet: true,
        ..Settings::default()
    };

    let cli = Cli::try_parse_from(["mm", "poison", a, b, "--sidecar"]).unwrap();
    let ok = Processor::new(settings.clone(), None).run(&cli.command).unwrap();
    assert!(ok);
    assert!(first.path().join("cat.txt").exists());
    assert!(second.path().join("dog.txt").exists());
    assert!(OperationLog::load(first.path()).unwrap().contains("cat.jpg"));
    assert!(OperationLog::load(second.path()).unwrap().contains("dog.jpg"));
    assert!(!OperationLog::load(first.path()).unwrap().contains("dog.jpg"));

    let cli = Cli::try_parse_from(["mm", "revert", a, b]).unwrap();
    assert!(Processor::new(settings, None).run(&cli.command).unwrap());
    assert!(!first.path().join("cat.txt").exists());
    assert!(!second.path().join("dog.txt").exists());
    assert!(OperationLog::load(first.path()).unwrap().is_empty());
    assert!(OperationLog::load(second.path()).unwrap().is_empty());
}

#[test]
fn test_missing_path_stops_before_any_work() {
    let dir = TempDir::new().unwrap();
    helpers::image(&dir.path().join("cat.jpg"), &[]);
    let missing = dir.path().join("nope");
    let cli = Cli::try_parse_from([
        "mm",
        "poison",
        dir.path().to_str().unwrap(),
        missing.to_str().unwrap(),
        "--sidecar",
    ])
    .unwrap();

    let result = Processor::new(Settings::default(), None).run(&cli.command);
    assert!(matches!(result, Err(mmt::Error::InvalidPath { .. })));
    assert!(!dir.path().join("cat.txt").exists());
}
