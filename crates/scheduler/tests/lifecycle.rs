//! End-to-end scheduler behavior with real `bash` subprocesses.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use repeat_core::{
    CollectorDefinition, CommandSource, ConfigError, FieldMapping, FieldSpec, FieldType, SinkKind,
};
use repeat_scheduler::{Scheduler, SchedulerConfig, SchedulerError};

fn config(base: &Path) -> SchedulerConfig {
    SchedulerConfig {
        base_dir: base.join("work"),
        results_dir: base.join("results"),
        global_timeout: None,
    }
}

fn periodic(name: &str, command: &str, every: Duration) -> CollectorDefinition {
    CollectorDefinition::new(name, CommandSource::Command(command.into()), every)
}

fn once(name: &str, command: &str) -> CollectorDefinition {
    let mut definition = periodic(name, command, Duration::ZERO);
    definition.run_once = true;
    definition
}

fn procs_mapping() -> FieldMapping {
    FieldMapping::new(
        ",",
        vec![
            FieldSpec::new("pid", FieldType::Int, 0),
            FieldSpec::new("user", FieldType::String, 1),
        ],
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met within 5s");
}

fn outputs(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(&format!("{prefix}-"))
        })
        .collect()
}

async fn count_rows(scheduler: &Scheduler, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(scheduler.store().pool())
        .await
        .unwrap_or(-1)
}

// ── Construction ─────────────────────────────────────────────────────

#[tokio::test]
async fn run_once_with_period_is_rejected() {
    let base = tempfile::tempdir().unwrap();
    let mut definition = periodic("both", "true", Duration::from_secs(5));
    definition.run_once = true;

    let err = Scheduler::new(vec![definition], config(base.path())).await.err().unwrap();
    assert!(matches!(err, SchedulerError::Config(ConfigError::Invalid { .. })));
}

#[tokio::test]
async fn duplicate_field_names_are_rejected() {
    let base = tempfile::tempdir().unwrap();
    let mut definition = periodic("procs", "true", Duration::from_secs(5));
    definition.sink = SinkKind::Database(FieldMapping::new(
        ",",
        vec![
            FieldSpec::new("pid", FieldType::Int, 0),
            FieldSpec::new("pid", FieldType::Int, 1),
        ],
    ));

    let err = Scheduler::new(vec![definition], config(base.path())).await.err().unwrap();
    assert!(err.to_string().contains("duplicate field name: pid"));
}

#[tokio::test]
async fn duplicate_collector_names_are_rejected() {
    let base = tempfile::tempdir().unwrap();
    let definitions = vec![
        periodic("uptime", "uptime", Duration::from_secs(5)),
        periodic("uptime", "uptime", Duration::from_secs(9)),
    ];

    assert!(Scheduler::new(definitions, config(base.path())).await.is_err());
}

#[tokio::test]
async fn work_dir_is_created_under_base_dir() {
    let base = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(vec![once("x", "true")], config(base.path()))
        .await
        .unwrap();

    let work_dir = scheduler.work_dir();
    assert!(work_dir.starts_with(base.path().join("work")));
    assert!(work_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("repeat-"));
    assert!(work_dir.join("collections.db").exists());

    scheduler.shutdown().await;
}

// ── Dispatch ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_once_task_runs_exactly_once() {
    let base = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(vec![once("hello", "echo hi")], config(base.path()))
        .await
        .unwrap();

    scheduler.launch();
    wait_until(|| !scheduler.is_scheduled("hello")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(scheduler.runs("hello"), Some(1));
    let files = outputs(scheduler.work_dir(), "hello");
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), "hi\n");

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_run_stores_nothing() {
    let base = tempfile::tempdir().unwrap();
    let mut definition = once("slow", "echo started; sleep 5");
    definition.timeout = Duration::from_millis(200);
    let scheduler = Scheduler::new(vec![definition], config(base.path()))
        .await
        .unwrap();

    scheduler.launch();
    wait_until(|| !scheduler.is_scheduled("slow")).await;

    assert_eq!(scheduler.runs("slow"), Some(1));
    assert!(outputs(scheduler.work_dir(), "slow").is_empty());

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_ticks_are_dropped() {
    let base = tempfile::tempdir().unwrap();
    let command = "mkdir lock 2>/dev/null || echo OVERLAP; sleep 0.3; rmdir lock; echo done";
    let scheduler = Scheduler::new(
        vec![periodic("busy", command, Duration::from_millis(50))],
        config(base.path()),
    )
    .await
    .unwrap();

    scheduler.launch();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let runs = scheduler.runs("busy").unwrap();
    assert!((2..=6).contains(&runs), "unexpected run count {runs}");
    for file in outputs(scheduler.work_dir(), "busy") {
        let content = std::fs::read_to_string(&file).unwrap();
        assert!(!content.contains("OVERLAP"), "overlapping run in {}", file.display());
    }

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_task_is_idempotent() {
    let base = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(
        vec![periodic("tick", "true", Duration::from_secs(60))],
        config(base.path()),
    )
    .await
    .unwrap();

    scheduler.launch();
    assert!(scheduler.is_scheduled("tick"));
    scheduler.remove_task("tick");
    scheduler.remove_task("tick");
    scheduler.remove_task("unknown");
    assert!(!scheduler.is_scheduled("tick"));

    scheduler.shutdown().await;
}

// ── Database sink ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn database_task_writes_valid_rows() {
    let base = tempfile::tempdir().unwrap();
    let mut definition = periodic(
        "Procs",
        "printf '1,root\\n2\\n3,daemon\\n'",
        Duration::from_secs(60),
    );
    definition.sink = SinkKind::Database(procs_mapping());
    let scheduler = Scheduler::new(vec![definition], config(base.path()))
        .await
        .unwrap();

    scheduler.launch();
    let mut rows = 0;
    for _ in 0..100 {
        rows = count_rows(&scheduler, "procs").await;
        if rows == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(rows, 2);

    let users: Vec<String> = sqlx::query_scalar("SELECT user FROM procs ORDER BY id")
        .fetch_all(scheduler.store().pool())
        .await
        .unwrap();
    assert_eq!(users, vec!["root", "daemon"]);

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_flushes_partial_batch() {
    let base = tempfile::tempdir().unwrap();
    let mut definition = once("procs", "printf '1,root\\n2,daemon\\n'");
    definition.sink = SinkKind::Database(procs_mapping());
    definition.batch_size = 5;
    let scheduler = Scheduler::new(vec![definition], config(base.path()))
        .await
        .unwrap();

    scheduler.launch();
    wait_until(|| !scheduler.is_scheduled("procs")).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count_rows(&scheduler, "procs").await, 0);

    let archive = scheduler.shutdown().await.unwrap();

    let extracted = tempfile::tempdir().unwrap();
    let decoder = zstd::Decoder::new(File::open(&archive).unwrap()).unwrap();
    tar::Archive::new(decoder).unpack(extracted.path()).unwrap();
    let root = scheduler.work_dir().file_name().unwrap();
    let db = extracted.path().join(root).join("collections.db");

    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}", db.display()))
        .await
        .unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM procs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

// ── Shutdown ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_archives_then_removes_work_dir() {
    let base = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(vec![once("uptime", "echo up")], config(base.path()))
        .await
        .unwrap();

    scheduler.launch();
    wait_until(|| !scheduler.is_scheduled("uptime")).await;

    let (first, second) = tokio::join!(scheduler.shutdown(), scheduler.shutdown());
    let archive = first.unwrap();
    assert_eq!(second, Some(archive.clone()));
    assert!(archive.starts_with(base.path().join("results")));
    assert!(archive.exists());
    assert!(!scheduler.work_dir().exists());
    assert!(scheduler.is_shut_down());

    assert_eq!(scheduler.shutdown().await, Some(archive));
}

#[tokio::test]
async fn shutdown_without_launch_still_archives() {
    let base = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(vec![once("idle", "true")], config(base.path()))
        .await
        .unwrap();

    let archive = scheduler.shutdown().await;
    assert!(archive.is_some());
    assert!(!scheduler.work_dir().exists());
    assert_eq!(scheduler.runs("idle"), Some(0));
}
