//! Executes one collector run.
//!
//! Commands go through `bash -c` with stderr folded into stdout, run inside
//! the scheduler's work directory and process group, and are killed when
//! their timeout expires. A timed-out run is skipped without error.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::TaskError;
use crate::task::Task;

/// Raw result of executing the subprocess.
#[derive(Debug, PartialEq, Eq)]
pub enum Execution {
    Exited { output: Vec<u8>, code: Option<i32> },
    TimedOut,
}

/// What a run amounted to once policy and sink were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReport {
    Stored,
    TimedOut,
}

pub struct TaskRunner;

impl TaskRunner {
    /// Spawn the task's command and collect its combined output.
    pub async fn execute(task: &Task) -> Result<Execution, TaskError> {
        let script = format!("exec 2>&1\n{}", task.command);
        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(script)
            .current_dir(&task.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        if task.pgid > 0 {
            command.process_group(task.pgid);
        }

        let child = command.spawn().map_err(|source| TaskError::Spawn {
            collector: task.name().to_string(),
            source,
        })?;

        let waited = match task.definition.deadline() {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                // Dropping the future drops the child, which kills it.
                Err(_) => return Ok(Execution::TimedOut),
            },
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|source| TaskError::Wait {
            collector: task.name().to_string(),
            source,
        })?;
        Ok(Execution::Exited {
            output: output.stdout,
            code: output.status.code(),
        })
    }

    /// Execute `task`, apply its exit-code policy and hand accepted output
    /// to its sink.
    pub async fn run(task: &Task) -> Result<RunReport, TaskError> {
        let run = task.record_run();
        debug!(collector = %task.name(), run, "starting run");

        let (output, code) = match Self::execute(task).await? {
            Execution::TimedOut => return Ok(RunReport::TimedOut),
            Execution::Exited { output, code } => (output, code),
        };

        if !task.definition.exit_codes.accepts(code) {
            return Err(TaskError::ExitCode {
                collector: task.name().to_string(),
                code,
            });
        }

        task.sink()
            .store(task.name(), &output)
            .await
            .map_err(|source| TaskError::Sink {
                collector: task.name().to_string(),
                source,
            })?;
        Ok(RunReport::Stored)
    }

    /// [`TaskRunner::run`] with the outcome logged instead of returned.
    pub async fn run_logged(task: &Task) {
        match Self::run(task).await {
            Ok(RunReport::Stored) => debug!(collector = %task.name(), "run stored"),
            Ok(RunReport::TimedOut) => info!(
                collector = %task.name(),
                timeout = ?task.definition.timeout,
                "run timed out, skipping output"
            ),
            Err(e) => error!(collector = %task.name(), error = %e, "run failed"),
        }
    }
}
