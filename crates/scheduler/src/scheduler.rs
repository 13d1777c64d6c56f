//! Periodic dispatch of collectors and the shutdown sequence.
//!
//! Each task gets one dispatch job driving a `tokio::time::interval`. Accepted
//! ticks spawn a run guarded by the task's in-flight flag, so a task never has
//! two runs at once and ticks arriving mid-run are dropped. The write queue
//! consumer runs as its own job and is the only thing touching the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use repeat_core::config::validate_unique;
use repeat_core::{CollectorDefinition, SinkKind};
use repeat_queue::{write_queue, QueueStats, SqliteStore, TableBatcher, WriteConsumer, WriteQueue};

use crate::archive::ReportArchiver;
use crate::error::SchedulerError;
use crate::process::ProcessGroup;
use crate::runner::TaskRunner;
use crate::sink::{DatabaseSink, FileSink, ResultSink};
use crate::task::Task;

const WORK_DIR_PREFIX: &str = "repeat-";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Parent of the per-run work directory.
    pub base_dir: PathBuf,
    /// Where the report archive is written.
    pub results_dir: PathBuf,
    /// Whole-process deadline; `None` runs until signalled.
    pub global_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir(),
            results_dir: PathBuf::from("."),
            global_timeout: None,
        }
    }
}

/// Cheap to clone; all clones drive the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    work_dir: PathBuf,
    process_group: ProcessGroup,
    tasks: IndexMap<String, Arc<Task>>,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    store: SqliteStore,
    queue: WriteQueue,
    consumer: Mutex<Option<WriteConsumer<SqliteStore>>>,
    consumer_job: Mutex<Option<JoinHandle<QueueStats>>>,
    launched: AtomicBool,
    timed_out: AtomicBool,
    stop: watch::Sender<bool>,
    shutdown: OnceCell<Option<PathBuf>>,
}

impl Scheduler {
    /// Validate `definitions`, create the work directory and open the store.
    pub async fn new(
        definitions: Vec<CollectorDefinition>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        validate_unique(&definitions)?;
        for definition in &definitions {
            definition.validate()?;
        }
        let process_group = ProcessGroup::current()?;

        std::fs::create_dir_all(&config.base_dir)?;
        let work_dir = tempfile::Builder::new()
            .prefix(WORK_DIR_PREFIX)
            .tempdir_in(&config.base_dir)?
            .keep();

        match Self::build(definitions, config, work_dir.clone(), process_group).await {
            Ok(scheduler) => {
                info!(
                    work_dir = %work_dir.display(),
                    pgid = process_group.id(),
                    tasks = scheduler.inner.tasks.len(),
                    "scheduler ready"
                );
                Ok(scheduler)
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&work_dir) {
                    warn!(work_dir = %work_dir.display(), error = %cleanup, "cannot remove work directory");
                }
                Err(e)
            }
        }
    }

    async fn build(
        definitions: Vec<CollectorDefinition>,
        config: SchedulerConfig,
        work_dir: PathBuf,
        process_group: ProcessGroup,
    ) -> Result<Self, SchedulerError> {
        let store = SqliteStore::open(&work_dir).await?;

        let batcher = definitions
            .iter()
            .filter(|d| matches!(d.sink, SinkKind::Database(_)))
            .fold(TableBatcher::new(1), |batcher, d| {
                batcher.with_batch_size(d.table_name(), d.batch_size)
            });
        let (queue, consumer) = write_queue(store.clone(), batcher);

        let mut tasks = IndexMap::with_capacity(definitions.len());
        for definition in definitions {
            let sink: Arc<dyn ResultSink> = match &definition.sink {
                SinkKind::File => Arc::new(FileSink::new(&work_dir)),
                SinkKind::Database(mapping) => Arc::new(DatabaseSink::new(
                    definition.table_name(),
                    mapping.clone(),
                    queue.clone(),
                )),
            };
            let task = Task::new(definition, &work_dir, process_group.id(), sink)?;
            tasks.insert(task.name().to_string(), Arc::new(task));
        }

        let (stop, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                work_dir,
                process_group,
                tasks,
                jobs: Mutex::new(HashMap::new()),
                store,
                queue,
                consumer: Mutex::new(Some(consumer)),
                consumer_job: Mutex::new(None),
                launched: AtomicBool::new(false),
                timed_out: AtomicBool::new(false),
                stop,
                shutdown: OnceCell::new(),
            }),
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn work_dir(&self) -> &Path {
        &self.inner.work_dir
    }

    pub fn store(&self) -> &SqliteStore {
        &self.inner.store
    }

    pub fn process_group(&self) -> ProcessGroup {
        self.inner.process_group
    }

    pub fn task(&self, name: &str) -> Option<&Arc<Task>> {
        self.inner.tasks.get(name)
    }

    /// Runs started for `name`, `None` for an unknown task.
    pub fn runs(&self, name: &str) -> Option<u64> {
        self.task(name).map(|t| t.runs())
    }

    /// Whether `name` still has a live dispatch job.
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.lock_jobs()
            .get(name)
            .is_some_and(|job| !job.is_finished())
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Whether shutdown was triggered by the global timeout.
    pub fn timed_out(&self) -> bool {
        self.inner.timed_out.load(Ordering::SeqCst)
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start dispatching every task, the queue consumer and, if configured,
    /// the global timeout watcher. Calling it again does nothing.
    pub fn launch(&self) {
        if self.inner.launched.swap(true, Ordering::SeqCst) || self.is_shut_down() {
            return;
        }

        let consumer = self
            .inner
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(consumer) = consumer {
            let job = tokio::spawn(consumer.run());
            *self.inner.consumer_job.lock().unwrap_or_else(|e| e.into_inner()) = Some(job);
        }

        {
            let mut jobs = self.lock_jobs();
            for (name, task) in &self.inner.tasks {
                jobs.insert(name.clone(), self.spawn_dispatch(task.clone()));
            }
        }

        if let Some(limit) = self.inner.config.global_timeout {
            self.spawn_global_timeout(limit);
        }
        info!(tasks = self.inner.tasks.len(), "scheduler started");
    }

    /// Launch, wait for SIGINT or SIGTERM, then shut down. When the global
    /// timeout ends the run instead, the process group is killed before
    /// this can return.
    pub async fn start(&self) -> Option<PathBuf> {
        self.launch();

        tokio::select! {
            _ = os_signal() => info!("shutdown signal received"),
            _ = stopped(self.inner.stop.subscribe()) => debug!("scheduler stopped"),
        }
        let archived = self.shutdown().await;
        if self.timed_out() {
            // The group kill must land before the caller can exit normally.
            self.kill_group();
        }
        archived
    }

    /// Cancel future dispatch of `name`. Unknown or already removed tasks
    /// are ignored.
    pub fn remove_task(&self, name: &str) {
        if let Some(job) = self.lock_jobs().remove(name) {
            job.abort();
            info!(collector = %name, "removed task");
        }
    }

    /// Stop dispatch, drain the write queue, archive and delete the work
    /// directory. Concurrent and repeated calls share the first call's
    /// result. Returns the archive path when one was written.
    pub async fn shutdown(&self) -> Option<PathBuf> {
        self.inner
            .shutdown
            .get_or_init(|| self.shutdown_once())
            .await
            .clone()
    }

    async fn shutdown_once(&self) -> Option<PathBuf> {
        info!("shutting down");
        self.inner.stop.send_replace(true);

        let jobs: Vec<(String, JoinHandle<()>)> = self.lock_jobs().drain().collect();
        for (name, job) in jobs {
            debug!(collector = %name, "stopping dispatch");
            job.abort();
        }

        self.inner.queue.close();
        let consumer_job = self
            .inner
            .consumer_job
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match consumer_job {
            Some(job) => match job.await {
                Ok(stats) => info!(%stats, "write queue closed"),
                Err(e) => error!(error = %e, "write queue consumer failed"),
            },
            // Never launched: the store is still open.
            None => self.inner.store.pool().close().await,
        }

        let archiver = ReportArchiver::new(&self.inner.config.results_dir);
        let work_dir = self.inner.work_dir.clone();
        let archived = match tokio::task::spawn_blocking(move || archiver.archive(&work_dir)).await {
            Ok(Ok(path)) => Some(path),
            Ok(Err(e)) => {
                error!(error = %e, "cannot archive work directory");
                None
            }
            Err(e) => {
                error!(error = %e, "archive job failed");
                None
            }
        };

        if let Err(e) = tokio::fs::remove_dir_all(&self.inner.work_dir).await {
            warn!(work_dir = %self.inner.work_dir.display(), error = %e, "cannot remove work directory");
        }
        info!("shutdown complete");
        archived
    }

    /// Shut down, then SIGKILL the whole process group, this process included.
    pub async fn handle_global_timeout(&self) {
        warn!("global timeout reached");
        self.inner.timed_out.store(true, Ordering::SeqCst);
        self.shutdown().await;
        self.kill_group();
    }

    fn kill_group(&self) {
        if let Err(e) = self.inner.process_group.kill_all() {
            error!(error = %e, "cannot kill process group");
        }
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    fn spawn_dispatch(&self, task: Arc<Task>) -> JoinHandle<()> {
        let scheduler = self.clone();

        if task.definition.run_once {
            return tokio::spawn(async move {
                if let Some(_guard) = task.try_begin() {
                    TaskRunner::run_logged(&task).await;
                }
                scheduler.remove_task(task.name());
            });
        }

        let period = task.definition.run_every;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if scheduler.is_shut_down() {
                    break;
                }
                let Some(guard) = task.try_begin() else {
                    debug!(collector = %task.name(), "previous run still in flight, dropping tick");
                    continue;
                };
                tokio::spawn(async move {
                    TaskRunner::run_logged(guard.task()).await;
                    drop(guard);
                });
            }
        })
    }

    fn spawn_global_timeout(&self, limit: Duration) {
        let scheduler = self.clone();
        let stop = self.inner.stop.subscribe();
        info!(timeout = ?limit, "global timeout armed");
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => scheduler.handle_global_timeout().await,
                _ = stopped(stop) => {}
            }
        });
    }
}

/// Resolves once shutdown has begun.
async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

/// Wait for SIGINT or SIGTERM.
async fn os_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}
