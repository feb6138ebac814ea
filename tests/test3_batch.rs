#![cfg(feature = "sqlite")]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::Serialize;
use sql_dal::prelude::*;
use tempfile::{TempDir, tempdir};

#[derive(Debug, Clone, Serialize)]
struct Row {
    id: i64,
    name: String,
}

fn rows(range: std::ops::Range<i64>) -> Vec<Row> {
    range
        .map(|id| Row {
            id,
            name: format!("name-{id}"),
        })
        .collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

const INSERT: &str = "INSERT INTO items (id, name) VALUES (@id, @name)";

async fn new_layer(
    prefix: &str,
    chunk_size: usize,
) -> Result<(TempDir, DataLayer), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let path = dir.path().join(format!("{prefix}.db"));
    let dal = DataLayer::builder(path.to_string_lossy())
        .chunk_size(chunk_size)
        .build()?;
    dal.execute(Command::new(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, source TEXT)",
    ))
    .await?;
    Ok((dir, dal))
}

async fn count(dal: &DataLayer) -> Result<i64, SqlDalError> {
    Ok(dal
        .query_single::<i64>(Command::new("SELECT COUNT(*) FROM items"))
        .await?
        .unwrap_or_default())
}

#[tokio::test]
async fn all_valid_rows_use_one_bulk_command_per_chunk() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, dal) = new_layer("valid", 200).await?;
    let items = rows(0..450);

    let report = dal.execute_batch(INSERT, &items, None).await?;

    assert_eq!(report.success_count, 450);
    assert_eq!(report.failure_count, 0);
    assert!(report.errors.is_empty());
    assert_eq!(report.bulk_commands, 3);
    assert_eq!(report.fallback_chunks, 0);
    assert_eq!(report.rows_affected, 450);
    assert_eq!(report.total(), items.len());
    assert_eq!(count(&dal).await?, 450);
    Ok(())
}

#[tokio::test]
async fn duplicate_name_fails_alone() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let (_dir, dal) = new_layer("dup", 200).await?;
    let items = vec![
        Row {
            id: 1,
            name: "a".into(),
        },
        Row {
            id: 2,
            name: "a".into(),
        },
    ];

    let report = dal.execute_batch(INSERT, &items, None).await?;

    assert_eq!(report.success_count, 1);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(
        report.errors[0].starts_with(r#"error executing for {"id":2,"name":"a"}: "#),
        "unexpected error line: {}",
        report.errors[0]
    );
    assert_eq!(report.fallback_chunks, 1);
    assert_eq!(count(&dal).await?, 1);
    Ok(())
}

#[tokio::test]
async fn one_bad_row_only_affects_its_chunk() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let (_dir, dal) = new_layer("bad_row", 10).await?;
    dal.execute(Command::new(
        "INSERT INTO items (id, name) VALUES (1000, 'name-13')",
    ))
    .await?;
    let items = rows(0..30);

    let report = dal.execute_batch(INSERT, &items, None).await?;

    assert_eq!(report.success_count, 29);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.total(), 30);
    assert_eq!(report.bulk_commands, 3);
    assert_eq!(report.fallback_chunks, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains(r#""id":13"#));
    assert_eq!(count(&dal).await?, 30);
    Ok(())
}

#[tokio::test]
async fn empty_batch_never_opens_a_connection() -> Result<(), Box<dyn std::error::Error>> {
    let dal = DataLayer::builder("/nonexistent-dir/never/created.db").build()?;
    let report = dal.execute_batch::<Row>(INSERT, &[], None).await?;
    assert_eq!(report, BatchResult::default());
    Ok(())
}

#[tokio::test]
async fn unreachable_store_propagates() -> Result<(), Box<dyn std::error::Error>> {
    let dal = DataLayer::builder("/nonexistent-dir/never/created.db").build()?;
    let err = dal
        .execute_batch(INSERT, &rows(0..3), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SqlDalError::ConnectionError(_)));
    Ok(())
}

#[tokio::test]
async fn shared_params_fill_missing_names() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, dal) = new_layer("shared", 4).await?;
    let shared = params! { "source" => "import", "name" => "ignored" };

    let report = dal
        .batch("INSERT INTO items (id, name, source) VALUES (@id, @name, @source)")
        .shared(shared)
        .run(&rows(0..6))
        .await?;
    assert_eq!(report.success_count, 6);
    assert_eq!(report.bulk_commands, 2);

    let sources: Vec<String> = dal
        .query(Command::new("SELECT DISTINCT source FROM items"))
        .await?;
    assert_eq!(sources, vec!["import".to_string()]);
    let names: Vec<String> = dal
        .query(Command::new("SELECT name FROM items WHERE id = @id").param("id", 5))
        .await?;
    assert_eq!(names, vec!["name-5".to_string()]);
    Ok(())
}

#[tokio::test]
async fn zero_chunk_size_is_a_config_error() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, dal) = new_layer("zero", 10).await?;
    let err = dal
        .batch(INSERT)
        .chunk_size(0)
        .run(&rows(0..1))
        .await
        .unwrap_err();
    assert!(matches!(err, SqlDalError::ConfigError(_)));
    Ok(())
}

#[tokio::test]
async fn non_object_items_are_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, dal) = new_layer("scalar", 10).await?;
    let err = dal
        .execute_batch(INSERT, &[1, 2, 3], None)
        .await
        .unwrap_err();
    assert!(matches!(err, SqlDalError::ParameterError(_)));
    assert_eq!(count(&dal).await?, 0);
    Ok(())
}

#[tokio::test]
async fn cancelled_batch_is_not_retried() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, dal) = new_layer("cancel", 10).await?;
    let token = CancellationToken::new();
    token.cancel();

    let err = dal
        .batch(INSERT)
        .cancel(&token)
        .run(&rows(0..25))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(count(&dal).await?, 0);
    Ok(())
}

#[tokio::test]
async fn executor_can_be_reused() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, dal) = new_layer("reuse", 3).await?;
    let writer = dal.batch(INSERT).build()?;

    let first = writer.run(&rows(0..5)).await?;
    let second = writer.run(&rows(3..8)).await?;

    assert_eq!(first.success_count, 5);
    assert_eq!(second.success_count, 3);
    assert_eq!(second.failure_count, 2);
    assert_eq!(second.total(), 5);
    assert_eq!(count(&dal).await?, 8);
    Ok(())
}

#[tokio::test]
async fn statements_returning_rows_are_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, dal) = new_layer("returning", 10).await?;

    let err = dal
        .execute_batch(
            "INSERT INTO items (id, name) VALUES (@id, @name) RETURNING id",
            &rows(0..3),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert_eq!(count(&dal).await?, 0);

    let err = dal
        .execute_batch(
            "INSERT INTO items (id, name) VALUES (@id, @name); SELECT 1",
            &rows(0..3),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert_eq!(count(&dal).await?, 0);
    Ok(())
}

/// Log sink shared between the subscriber and the test.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("log buffer poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[tokio::test]
async fn cancelling_a_running_chunk_rolls_back_without_fallback()
-> Result<(), Box<dyn std::error::Error>> {
    let logs = Captured::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let (_dir, dal) = new_layer("cancel_running", 10).await?;
    // each insert first counts to a billion, so the chunk is still running when the token fires
    let slow = "INSERT INTO items (id, name) SELECT @id, @name WHERE (\
        WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000000) \
        SELECT COUNT(*) FROM c) > 0";
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_secs(30),
        dal.batch(slow).cancel(&token).run(&rows(0..3)),
    )
    .await?;
    let err = outcome.unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(count(&dal).await?, 0);

    let logs = logs.text();
    assert!(logs.contains("writing batch chunk"), "{logs}");
    assert!(!logs.contains("retrying items individually"), "{logs}");
    Ok(())
}

#[derive(Serialize)]
struct Event {
    id: i64,
    name: String,
    at: NaiveDateTime,
}

#[tokio::test]
async fn timestamps_are_stored_alike_on_both_write_paths() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, dal) = new_layer("timestamps", 10).await?;
    dal.execute(Command::new("ALTER TABLE items ADD COLUMN at TEXT"))
        .await?;
    let at = NaiveDateTime::parse_from_str("2024-01-02 03:04:05", "%Y-%m-%d %H:%M:%S")?;

    let report = dal
        .execute_batch(
            "INSERT INTO items (id, name, at) VALUES (@id, @name, @at)",
            &[Event {
                id: 1,
                name: "batch".into(),
                at,
            }],
            None,
        )
        .await?;
    assert!(report.is_clean());
    dal.execute(
        Command::new("INSERT INTO items (id, name, at) VALUES (@id, @name, @at)")
            .param("id", 2)
            .param("name", "command")
            .param("at", at),
    )
    .await?;

    let stored: Vec<String> = dal
        .query(Command::new("SELECT at FROM items ORDER BY id"))
        .await?;
    assert_eq!(stored, vec!["2024-01-02 03:04:05"; 2]);
    Ok(())
}
