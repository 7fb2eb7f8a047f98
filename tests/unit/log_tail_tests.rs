//! Unit tests for incremental conversation-log reading.

use std::io::Write;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use agent_relay::models::event::EventRole;
use agent_relay::models::session::LogCursor;
use agent_relay::tailer::{run_tail, LogTail, TailProgress};

fn append(path: &std::path::Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log");
    file.write_all(text.as_bytes()).expect("append");
}

#[tokio::test]
async fn partial_line_is_held_until_completed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("log.jsonl");
    let mut tail = LogTail::new(LogCursor::at(path.clone(), 0), 64 * 1024);

    append(&path, "{\"role\":\"user\",\"content\":\"one\"}\n{\"role\":\"assistant\"");
    let first = tail.read_available().await;
    assert_eq!(first.len(), 1, "only the complete line is emitted");
    assert_eq!(first[0].content, "one");
    assert!(!tail.cursor().remainder.is_empty());

    append(&path, ",\"content\":\"two\"}\n");
    let second = tail.read_available().await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].role, EventRole::Assistant);
    assert_eq!(second[0].content, "two");
    assert!(tail.cursor().remainder.is_empty());
}

#[tokio::test]
async fn each_line_is_emitted_exactly_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("log.jsonl");
    append(&path, "{\"a\":1}\n{\"b\"");
    let mut tail = LogTail::new(LogCursor::at(path.clone(), 0), 4);

    let mut events = tail.read_available().await;
    append(&path, ":2}\n");
    events.extend(tail.read_available().await);
    events.extend(tail.read_available().await);

    assert_eq!(events.len(), 2, "{events:?}");
    assert!(events.iter().all(|e| e.role == EventRole::Other));
    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(tail.cursor().offset, len);
}

#[tokio::test]
async fn small_read_limit_still_reads_everything() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("log.jsonl");
    for i in 0..20 {
        append(&path, &format!("{{\"role\":\"user\",\"content\":\"line {i}\"}}\n"));
    }
    let mut tail = LogTail::new(LogCursor::at(path.clone(), 0), 7);
    let events = tail.read_available().await;
    assert_eq!(events.len(), 20);
    assert_eq!(events[19].content, "line 19");
}

#[tokio::test]
async fn malformed_lines_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("log.jsonl");
    append(
        &path,
        "not json\n\n{\"role\":\"user\",\"content\":\"kept\"}\n{\"role\":\n{\"role\":\"user\",\"content\":\"also kept\"}\n",
    );
    let mut tail = LogTail::new(LogCursor::at(path, 0), 1024);
    let events = tail.read_available().await;
    let texts: Vec<&str> = events.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(texts, vec!["kept", "also kept"]);
}

#[tokio::test]
async fn missing_file_yields_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut tail = LogTail::new(LogCursor::at(dir.path().join("absent.jsonl"), 0), 1024);
    assert!(tail.read_available().await.is_empty());
    assert_eq!(tail.cursor().offset, 0);
}

#[tokio::test]
async fn saved_offset_skips_already_consumed_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("log.jsonl");
    let first = "{\"role\":\"user\",\"content\":\"old\"}\n";
    append(&path, first);
    append(&path, "{\"role\":\"user\",\"content\":\"new\"}\n");

    let offset = u64::try_from(first.len()).unwrap();
    let mut tail = LogTail::new(LogCursor::at(path, offset), 1024);
    let events = tail.read_available().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].content, "new");
}

#[tokio::test]
async fn run_tail_drains_once_more_after_cancel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("log.jsonl");
    append(&path, "{\"role\":\"user\",\"content\":\"before\"}\n");

    let cancel = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let task = tokio::spawn(run_tail(
        LogTail::new(LogCursor::at(path.clone(), 0), 1024),
        Duration::from_secs(60),
        cancel.clone(),
        TailProgress::default(),
        move |event| {
            let _ = tx.send(event.content);
        },
    ));

    assert_eq!(rx.recv().await.as_deref(), Some("before"));
    append(&path, "{\"role\":\"user\",\"content\":\"after\"}\n");
    cancel.cancel();

    let cursor = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("tail stops promptly")
        .expect("tail task");
    assert_eq!(rx.recv().await.as_deref(), Some("after"));
    assert_eq!(cursor.offset, std::fs::metadata(&path).unwrap().len());
}

#[tokio::test]
async fn progress_survives_an_aborted_tail() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("log.jsonl");
    let first = "{\"role\":\"user\",\"content\":\"seen\"}\n";
    append(&path, first);

    let progress = TailProgress::default();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let task = tokio::spawn(run_tail(
        LogTail::new(LogCursor::at(path.clone(), 0), 1024),
        Duration::from_secs(60),
        CancellationToken::new(),
        progress.clone(),
        move |event| {
            let _ = tx.send(event.content);
        },
    ));
    assert_eq!(rx.recv().await.as_deref(), Some("seen"));

    let consumed = u64::try_from(first.len()).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while progress.snapshot().cursor.offset < consumed {
        assert!(tokio::time::Instant::now() < deadline, "progress never advanced");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    task.abort();

    let saved = progress.snapshot().cursor;
    assert_eq!(saved.offset, consumed);
    append(&path, "{\"role\":\"user\",\"content\":\"fresh\"}\n");
    let events = LogTail::new(saved, 1024).read_available().await;
    let texts: Vec<&str> = events.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(texts, vec!["fresh"], "resuming from saved progress replays nothing");
}
