//! Compressed report of a run's work directory.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::sink::numbered_path;

const REPORT_PREFIX: &str = "repeat-report-";
const REPORT_EXT: &str = ".tar.zst";
const REPORT_TIMESTAMP: &str = "%Y-%m-%d-%H-%M";

/// SQLite side files that are never archived.
const EXCLUDED_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];

#[derive(Debug, Clone)]
pub struct ReportArchiver {
    results_dir: PathBuf,
}

impl ReportArchiver {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Pack `work_dir` into a zstd-compressed tarball under the results
    /// directory. Entries are rooted at the work directory's own name.
    pub fn archive(&self, work_dir: &Path) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.results_dir)?;

        let base = format!("{REPORT_PREFIX}{}", Local::now().format(REPORT_TIMESTAMP));
        let (path, file) = create_unique(&self.results_dir, &base)?;

        let root = work_dir
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("report"));

        let encoder = zstd::Encoder::new(file, 0)?;
        let mut builder = tar::Builder::new(encoder);
        let mut entries = 0usize;

        for entry in WalkDir::new(work_dir).sort_by_file_name() {
            let entry = entry.map_err(io::Error::other)?;
            let relative = match entry.path().strip_prefix(work_dir) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let name = root.join(relative);

            if entry.file_type().is_dir() {
                builder.append_dir(&name, entry.path())?;
            } else if entry.file_type().is_file() {
                if is_excluded(entry.path()) {
                    debug!(path = %entry.path().display(), "skipping store artifact");
                    continue;
                }
                builder.append_path_with_name(entry.path(), &name)?;
                entries += 1;
            }
        }

        builder.into_inner()?.finish()?;
        info!(path = %path.display(), files = entries, "wrote report archive");
        Ok(path)
    }
}

fn create_unique(dir: &Path, base: &str) -> io::Result<(PathBuf, File)> {
    let mut attempt = 0usize;
    loop {
        let path = numbered_path(dir, base, REPORT_EXT, attempt);
        match File::options().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

fn is_excluded(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}
