//! Retention sweeps
//!
//! Deletes old segments from the output folder. The folder may be shared
//! with other audio (it defaults to the music library), so only files named
//! like segments are touched, and only the root and its `YYYY/MM/DD`
//! sub-folders are searched. The segment being written is always kept.

use super::encoder::OutputFormat;
use super::segment::FILE_STAMP;
use chrono::NaiveDateTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Segment files removed
    pub deleted: Vec<PathBuf>,
    /// Empty dated folders removed
    pub removed_dirs: Vec<PathBuf>,
    /// Files that could not be removed
    pub failures: usize,
}

pub struct RetentionPolicy {
    max_age: Duration,
}

impl RetentionPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// Files last modified before this instant are expired
    pub fn cutoff(&self, now: SystemTime) -> SystemTime {
        now.checked_sub(self.max_age).unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Sweep `root`, keeping `keep` and anything modified after the cutoff
    pub fn sweep(&self, root: &Path, now: SystemTime, keep: Option<&Path>) -> io::Result<SweepReport> {
        let mut report = SweepReport::default();
        let cutoff = self.cutoff(now);
        sweep_dir(root, 0, cutoff, keep, &mut report)?;

        if !report.deleted.is_empty() {
            tracing::info!(
                "Retention sweep removed {} segment(s) older than {}h",
                report.deleted.len(),
                self.max_age.as_secs() / 3600
            );
        }
        Ok(report)
    }
}

/// Length of a formatted `FILE_STAMP`
const STAMP_LEN: usize = "2024-01-31_23-59-59".len();

/// Whether `path` is named like a segment: `YYYY-MM-DD_HH-MM-SS[_N].ext`
fn is_segment_file(path: &Path) -> bool {
    let known_ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            OutputFormat::ALL
                .iter()
                .any(|format| ext.eq_ignore_ascii_case(format.extension()))
        })
        .unwrap_or(false);
    if !known_ext {
        return false;
    }

    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let (Some(stamp), Some(suffix)) = (stem.get(..STAMP_LEN), stem.get(STAMP_LEN..)) else {
        return false;
    };
    if NaiveDateTime::parse_from_str(stamp, FILE_STAMP).is_err() {
        return false;
    }
    match suffix.strip_prefix('_') {
        None => suffix.is_empty(),
        Some(n) => !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()),
    }
}

/// Whether a folder `depth` levels below the root is part of the dated
/// layout: year, then month, then day
fn is_dated_dir(path: &Path, depth: usize) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let width = match depth {
        0 => 4,
        1 | 2 => 2,
        _ => return false,
    };
    name.len() == width && name.bytes().all(|b| b.is_ascii_digit())
}

fn sweep_dir(
    dir: &Path,
    depth: usize,
    cutoff: SystemTime,
    keep: Option<&Path>,
    report: &mut SweepReport,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if !is_dated_dir(&path, depth) {
                continue;
            }
            sweep_dir(&path, depth + 1, cutoff, keep, report)?;
            // Only prune folders that held segments
            if fs::read_dir(&path)?.next().is_none() && report.touched(&path) {
                match fs::remove_dir(&path) {
                    Ok(()) => report.removed_dirs.push(path),
                    Err(e) => tracing::warn!("Failed to remove empty folder {:?}: {}", path, e),
                }
            }
            continue;
        }

        if !file_type.is_file() || !is_segment_file(&path) || keep == Some(path.as_path()) {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!("Skipping {:?}: {}", path, e);
                continue;
            }
        };

        if modified < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("Deleted expired segment {:?}", path);
                    report.deleted.push(path);
                }
                Err(e) => {
                    tracing::warn!("Failed to delete {:?}: {}", path, e);
                    report.failures += 1;
                }
            }
        }
    }
    Ok(())
}

impl SweepReport {
    /// Whether a deletion happened somewhere under `dir`
    fn touched(&self, dir: &Path) -> bool {
        self.deleted.iter().any(|p| p.starts_with(dir))
            || self.removed_dirs.iter().any(|p| p.starts_with(dir))
    }
}
