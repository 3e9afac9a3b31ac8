//! Composable file predicates and the filter-expression parsers behind the
//! `--size` and `--date` flags.
//!
//! A [`FilterChain`] passes a file only when every predicate accepts it. No
//! predicate ever fails loudly: a stat error, a failed metadata lookup or a panicking
//! custom predicate all exclude the file.

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use tracing::debug;

use crate::discovery::FileRecord;
use crate::error::{Error, Result};
use crate::transformer::MetadataTransformer;

/// Caller-supplied predicate.
pub type CustomPredicate = Arc<dyn Fn(&FileRecord) -> bool + Send + Sync>;

/// Size units, longest suffix first so `KB` is not read as `B`.
const SIZE_UNITS: &[(&str, u64)] = &[
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
    ("B", 1),
];

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One filter criterion.
#[derive(Clone)]
pub enum Predicate {
    /// Inclusive size range in bytes.
    Size { min: Option<u64>, max: Option<u64> },
    /// Inclusive modification-time range.
    Modified {
        min: Option<DateTime<Local>>,
        max: Option<DateTime<Local>>,
    },
    /// Lower-case extensions without the dot.
    Extension(BTreeSet<String>),
    /// Keep files whose metadata presence equals `expected`.
    HasMetadata {
        expected: bool,
        transformer: Arc<dyn MetadataTransformer>,
    },
    Custom(CustomPredicate),
}

impl Predicate {
    /// Extension allow-list; entries may carry a leading dot and any case.
    pub fn extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Predicate::Extension(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        )
    }

    fn matches(&self, record: &FileRecord) -> bool {
        match self {
            Predicate::Size { min, max } => {
                min.is_none_or(|min| record.size >= min) && max.is_none_or(|max| record.size <= max)
            }
            Predicate::Modified { min, max } => {
                let modified = DateTime::<Local>::from(record.modified);
                min.is_none_or(|min| modified >= min) && max.is_none_or(|max| modified <= max)
            }
            Predicate::Extension(allowed) => allowed.contains(&record.extension),
            Predicate::HasMetadata {
                expected,
                transformer,
            } => match transformer.presence_probe(&record.path) {
                Ok(present) => present == *expected,
                Err(err) => {
                    debug!(path = %record.path.display(), error = %err, "metadata lookup failed");
                    false
                }
            },
            Predicate::Custom(predicate) => predicate(record),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Size { min, max } => {
                f.debug_struct("Size").field("min", min).field("max", max).finish()
            }
            Predicate::Modified { min, max } => f
                .debug_struct("Modified")
                .field("min", min)
                .field("max", max)
                .finish(),
            Predicate::Extension(allowed) => f.debug_tuple("Extension").field(allowed).finish(),
            Predicate::HasMetadata { expected, .. } => f
                .debug_struct("HasMetadata")
                .field("expected", expected)
                .finish_non_exhaustive(),
            Predicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// AND-combined list of predicates.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    predicates: Vec<Predicate>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, predicate: Predicate) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Whether `path` passes every predicate.
    pub fn matches(&self, path: &Path) -> bool {
        if self.predicates.is_empty() {
            return true;
        }
        let record = match FileRecord::from_path(path) {
            Ok(record) => record,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "excluding unreadable file");
                return false;
            }
        };
        self.matches_record(&record)
    }

    /// Whether an already-stat'ed record passes every predicate.
    pub fn matches_record(&self, record: &FileRecord) -> bool {
        self.predicates.iter().all(|predicate| {
            panic::catch_unwind(AssertUnwindSafe(|| predicate.matches(record))).unwrap_or(false)
        })
    }

    /// Build a chain from filter flags.
    ///
    /// `--has-metadata`/`--no-metadata` need a transformer; asking for them
    /// without one fails with [`Error::TransformerUnavailable`].
    pub fn from_options(
        options: &FilterOptions,
        transformer: Option<Arc<dyn MetadataTransformer>>,
    ) -> Result<Self> {
        let mut chain = FilterChain::new();
        if let Some(expr) = options.size.as_deref() {
            let (min, max) = parse_size_filter(expr)?;
            chain.push(Predicate::Size { min, max });
        }
        if let Some(expr) = options.date.as_deref() {
            let (min, max) = parse_date_filter(expr)?;
            chain.push(Predicate::Modified { min, max });
        }
        if !options.formats.is_empty() {
            chain.push(Predicate::extensions(&options.formats));
        }
        if let Some(expected) = options.has_metadata {
            let transformer = transformer.ok_or(Error::TransformerUnavailable)?;
            chain.push(Predicate::HasMetadata {
                expected,
                transformer,
            });
        }
        Ok(chain)
    }
}

/// Raw filter flags as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub size: Option<String>,
    pub date: Option<String>,
    pub formats: Vec<String>,
    pub has_metadata: Option<bool>,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self.size.is_none()
            && self.date.is_none()
            && self.formats.is_empty()
            && self.has_metadata.is_none()
    }
}

/// Parse `1MB`, `500KB-2MB`, `>1GB` or `<500KB` into an inclusive byte range.
///
/// An exact size yields the same value for both bounds.
pub fn parse_size_filter(expr: &str) -> Result<(Option<u64>, Option<u64>)> {
    let text = expr.trim().to_ascii_uppercase();
    let invalid = |reason: String| Error::invalid_argument(format!("--size {expr}"), reason);

    let range = if let Some(rest) = text.strip_prefix('>') {
        (Some(parse_size(rest).map_err(invalid)?), None)
    } else if let Some(rest) = text.strip_prefix('<') {
        (None, Some(parse_size(rest).map_err(invalid)?))
    } else if let Some((low, high)) = text.split_once('-') {
        let low = parse_size(low).map_err(invalid)?;
        let high = parse_size(high).map_err(invalid)?;
        if low > high {
            return Err(invalid(String::from("lower bound exceeds upper bound")));
        }
        (Some(low), Some(high))
    } else {
        let size = parse_size(&text).map_err(invalid)?;
        (Some(size), Some(size))
    };
    Ok(range)
}

fn parse_size(text: &str) -> std::result::Result<u64, String> {
    let text = text.trim();
    let (number, multiplier) = SIZE_UNITS
        .iter()
        .find_map(|(suffix, multiplier)| {
            text.strip_suffix(suffix)
                .map(|number| (number.trim(), *multiplier))
        })
        .unwrap_or((text, 1));

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid size '{text}'"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid size '{text}'"));
    }
    Ok((value * multiplier as f64) as u64)
}

/// Which end of a range a date-only value stands for.
#[derive(Clone, Copy)]
enum Edge {
    Start,
    End,
}

/// Parse `2024-01-01`, `2024-01-01 12:00:00`, `2024-01-01:2024-12-31`,
/// `>2024-01-01` or `<2024-12-31` into an inclusive local-time range.
///
/// A date without a time covers the whole day when used as an upper bound or
/// as an exact match.
pub fn parse_date_filter(
    expr: &str,
) -> Result<(Option<DateTime<Local>>, Option<DateTime<Local>>)> {
    let text = expr.trim();
    let invalid = |reason: String| Error::invalid_argument(format!("--date {expr}"), reason);

    if let Some(rest) = text.strip_prefix('>') {
        return Ok((Some(parse_date(rest, Edge::Start).map_err(invalid)?), None));
    }
    if let Some(rest) = text.strip_prefix('<') {
        return Ok((None, Some(parse_date(rest, Edge::End).map_err(invalid)?)));
    }
    if let (Ok(start), Ok(end)) = (parse_date(text, Edge::Start), parse_date(text, Edge::End)) {
        return Ok((Some(start), Some(end)));
    }

    // Times contain colons too, so try every split point.
    for (index, _) in text.match_indices(':') {
        let (low, high) = (&text[..index], &text[index + 1..]);
        if let (Ok(start), Ok(end)) = (parse_date(low, Edge::Start), parse_date(high, Edge::End)) {
            if start > end {
                return Err(invalid(String::from("start date is after end date")));
            }
            return Ok((Some(start), Some(end)));
        }
    }
    Err(invalid(format!(
        "expected {DATE_FORMAT} or {DATETIME_FORMAT}, optionally as a range"
    )))
}

fn parse_date(text: &str, edge: Edge) -> std::result::Result<DateTime<Local>, String> {
    let text = text.trim();
    let naive = match NaiveDateTime::parse_from_str(text, DATETIME_FORMAT) {
        Ok(naive) => naive,
        Err(_) => {
            let date = NaiveDate::parse_from_str(text, DATE_FORMAT)
                .map_err(|_| format!("invalid date '{text}'"))?;
            let time = match edge {
                Edge::Start => date.and_hms_opt(0, 0, 0),
                Edge::End => date.and_hms_nano_opt(23, 59, 59, 999_999_999),
            };
            time.ok_or_else(|| format!("invalid date '{text}'"))?
        }
    };
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| format!("'{text}' does not exist in the local time zone"))
}
