//! Runtime binding of a collector definition to its execution context.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use repeat_core::{CollectorDefinition, CommandSource};

use crate::error::SchedulerError;
use crate::sink::ResultSink;

pub struct Task {
    pub definition: CollectorDefinition,
    /// Command line handed to `bash -c`.
    pub command: String,
    pub work_dir: PathBuf,
    pub pgid: i32,
    sink: Arc<dyn ResultSink>,
    runs: AtomicU64,
    in_flight: AtomicBool,
}

impl Task {
    /// Bind `definition` to `work_dir`, writing script bodies out as
    /// executable files.
    pub fn new(
        definition: CollectorDefinition,
        work_dir: &Path,
        pgid: i32,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self, SchedulerError> {
        let command = match &definition.command {
            CommandSource::Command(command) => command.clone(),
            CommandSource::Script(body) => {
                let path = materialize_script(work_dir, body).map_err(|source| SchedulerError::Task {
                    collector: definition.name.clone(),
                    source,
                })?;
                debug!(collector = %definition.name, path = %path.display(), "materialized script");
                path.to_string_lossy().into_owned()
            }
        };

        Ok(Self {
            definition,
            command,
            work_dir: work_dir.to_path_buf(),
            pgid,
            sink,
            runs: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn sink(&self) -> &dyn ResultSink {
        self.sink.as_ref()
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    pub(crate) fn record_run(&self) -> u64 {
        self.runs.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Claim the task for one run. `None` while another run holds it.
    pub fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard { task: self.clone() })
    }
}

/// Releases the task's in-flight flag when dropped.
pub struct RunGuard {
    task: Arc<Task>,
}

impl RunGuard {
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.task.in_flight.store(false, Ordering::SeqCst);
    }
}

fn materialize_script(dir: &Path, body: &str) -> std::io::Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("run-script-")
        .tempfile_in(dir)?;
    file.write_all(body.as_bytes())?;
    file.flush()?;
    std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o700))?;
    // The handle is closed here; executing a file still open for writing fails.
    let (_, path) = file.keep()?;
    Ok(path)
}
