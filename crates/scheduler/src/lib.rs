//! Collector scheduling: task lifecycle, subprocess execution, result sinks
//! and the end-of-run report.

pub mod archive;
pub mod error;
pub mod process;
pub mod runner;
pub mod scheduler;
pub mod sink;
pub mod task;

pub use archive::ReportArchiver;
pub use error::{SchedulerError, SinkError, TaskError};
pub use process::ProcessGroup;
pub use runner::{Execution, RunReport, TaskRunner};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use sink::{DatabaseSink, FileSink, ResultSink};
pub use task::{RunGuard, Task};
