//! Unit tests for session-index reading and log discovery.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use agent_relay::tailer::{discover, DiscoveryPolicy, SessionIndex};

fn write_index(home: &Path, json: &str) {
    let dir = home.join("sessions");
    std::fs::create_dir_all(&dir).expect("sessions dir");
    std::fs::write(dir.join("index.json"), json).expect("write index");
}

fn quick() -> DiscoveryPolicy {
    DiscoveryPolicy {
        attempts: 3,
        interval: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn missing_or_malformed_index_is_empty() {
    let home = tempfile::tempdir().expect("tempdir");
    let index = SessionIndex::new(home.path().to_path_buf());
    assert!(index.entries().await.is_empty());

    write_index(home.path(), "{ not json");
    assert!(index.entries().await.is_empty());
}

#[tokio::test]
async fn both_index_shapes_are_accepted() {
    let home = tempfile::tempdir().expect("tempdir");
    let index = SessionIndex::new(home.path().to_path_buf());

    write_index(home.path(), r#"[{"id":"a","cwd":"/w"}]"#);
    assert_eq!(index.entries().await.len(), 1);

    write_index(
        home.path(),
        r#"{"sessions":[{"id":"a","cwd":"/w"},{"id":"b","cwd":"/w","log_path":"/logs/b.jsonl"}]}"#,
    );
    let entries = index.entries().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(index.log_path(&entries[0]), home.path().join("sessions").join("a.jsonl"));
    assert_eq!(index.log_path(&entries[1]), Path::new("/logs/b.jsonl"));
    assert!(index.find("b").await.is_some());
    assert!(index.find("zzz").await.is_none());
}

#[tokio::test]
async fn discovers_new_entry_for_the_same_workspace() {
    let home = tempfile::tempdir().expect("tempdir");
    let work = tempfile::tempdir().expect("tempdir");
    let other = tempfile::tempdir().expect("tempdir");
    let index = SessionIndex::new(home.path().to_path_buf());

    write_index(
        home.path(),
        &format!(r#"[{{"id":"old","cwd":"{}"}}]"#, work.path().display()),
    );
    let prior = index.snapshot_ids().await;
    assert_eq!(prior, HashSet::from(["old".to_owned()]));

    write_index(
        home.path(),
        &format!(
            r#"[
                {{"id":"old","cwd":"{w}"}},
                {{"id":"elsewhere","cwd":"{o}","created_at":"2026-01-02T00:00:00Z"}},
                {{"id":"first","cwd":"{w}","created_at":"2026-01-01T00:00:00Z"}},
                {{"id":"second","cwd":"{w}","created_at":"2026-01-01T00:00:05Z"}}
            ]"#,
            w = work.path().display(),
            o = other.path().display()
        ),
    );

    let found = discover(&index, work.path(), &prior, quick(), &CancellationToken::new())
        .await
        .expect("entry discovered");
    assert_eq!(found.id, "second", "newest matching entry wins");
}

#[tokio::test]
async fn discovery_gives_up_after_bounded_attempts() {
    let home = tempfile::tempdir().expect("tempdir");
    let index = SessionIndex::new(home.path().to_path_buf());
    let policy = DiscoveryPolicy {
        attempts: 4,
        interval: Duration::from_millis(25),
    };

    let started = Instant::now();
    let found = discover(&index, Path::new("/nowhere"), &HashSet::new(), policy, &CancellationToken::new()).await;
    assert!(found.is_none());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(75), "waited between attempts: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "bounded: {elapsed:?}");
}

#[tokio::test]
async fn cancellation_checks_the_index_one_last_time() {
    let home = tempfile::tempdir().expect("tempdir");
    let work = tempfile::tempdir().expect("tempdir");
    let index = SessionIndex::new(home.path().to_path_buf());
    let policy = DiscoveryPolicy {
        attempts: 1000,
        interval: Duration::from_secs(60),
    };
    let cancel = CancellationToken::new();

    let task = {
        let index = index.clone();
        let cwd = work.path().to_path_buf();
        let cancel = cancel.clone();
        tokio::spawn(async move { discover(&index, &cwd, &HashSet::new(), policy, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    write_index(
        home.path(),
        &format!(r#"[{{"id":"late","cwd":"{}"}}]"#, work.path().display()),
    );
    cancel.cancel();

    let found = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("discovery stops on cancel")
        .expect("task");
    assert_eq!(found.map(|e| e.id).as_deref(), Some("late"));
}
