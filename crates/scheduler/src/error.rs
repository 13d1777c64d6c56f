use std::io;

use repeat_core::ConfigError;
use repeat_queue::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot determine process group: {0}")]
    ProcessGroup(io::Error),

    #[error("cannot prepare collector {collector}: {source}")]
    Task {
        collector: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("cannot start collector {collector}: {source}")]
    Spawn {
        collector: String,
        #[source]
        source: io::Error,
    },

    #[error("collector {collector} failed while running: {source}")]
    Wait {
        collector: String,
        #[source]
        source: io::Error,
    },

    #[error("collector {collector} exited with {}", describe_exit(.code))]
    ExitCode { collector: String, code: Option<i32> },

    #[error("collector {collector} output not stored: {source}")]
    Sink {
        collector: String,
        #[source]
        source: SinkError,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("write queue is closed")]
    QueueClosed,
}
