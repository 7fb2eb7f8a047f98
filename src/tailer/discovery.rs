//! Session index lookup and new-log discovery.
//!
//! The agent records every run in `<home>/sessions/index.json`. Discovery
//! snapshots the known ids just before launch, then polls the index for a new
//! entry whose working directory matches the session's, with a bounded number
//! of attempts so a run that never writes a log cannot stall the relay.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One entry of the agent's session index.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    /// Agent-side session id.
    pub id: String,
    /// Working directory the run was started in.
    pub cwd: PathBuf,
    /// RFC 3339 creation time.
    #[serde(default)]
    pub created_at: Option<String>,
    /// Log file; relative paths resolve against the `sessions` directory.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Title recorded by the agent.
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IndexFile {
    List(Vec<IndexEntry>),
    Wrapped { sessions: Vec<IndexEntry> },
}

/// Read-only view of the agent's session index.
#[derive(Debug, Clone)]
pub struct SessionIndex {
    home: PathBuf,
}

impl SessionIndex {
    /// Index rooted at the agent home directory.
    #[must_use]
    pub fn new(home: PathBuf) -> Self {
        Self { home }
    }

    /// Directory holding the index and the per-run logs.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }

    /// Path of the index file.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.sessions_dir().join("index.json")
    }

    /// All entries; a missing or unreadable index is treated as empty.
    pub async fn entries(&self) -> Vec<IndexEntry> {
        let path = self.index_path();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), %err, "session index not readable");
                return Vec::new();
            }
        };
        match serde_json::from_str::<IndexFile>(&raw) {
            Ok(IndexFile::List(entries) | IndexFile::Wrapped { sessions: entries }) => entries,
            Err(err) => {
                // The agent may be mid-write; the next poll will see a whole file.
                debug!(path = %path.display(), %err, "session index not parseable yet");
                Vec::new()
            }
        }
    }

    /// Ids currently present in the index.
    pub async fn snapshot_ids(&self) -> HashSet<String> {
        self.entries().await.into_iter().map(|e| e.id).collect()
    }

    /// Look up one entry by id.
    pub async fn find(&self, id: &str) -> Option<IndexEntry> {
        self.entries().await.into_iter().find(|e| e.id == id)
    }

    /// Log file of `entry`.
    #[must_use]
    pub fn log_path(&self, entry: &IndexEntry) -> PathBuf {
        match &entry.log_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.sessions_dir().join(path),
            None => self.sessions_dir().join(format!("{}.jsonl", entry.id)),
        }
    }
}

/// Retry budget for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    /// Index polls before giving up.
    pub attempts: u32,
    /// Delay between polls.
    pub interval: Duration,
}

/// Poll the index for a run started in `cwd` whose id is not in `prior`.
///
/// Gives up after `policy.attempts` polls. When `cancel` fires the index is
/// checked one last time without waiting, so a run that exited between two
/// polls is still found.
pub async fn discover(
    index: &SessionIndex,
    cwd: &Path,
    prior: &HashSet<String>,
    policy: DiscoveryPolicy,
    cancel: &CancellationToken,
) -> Option<IndexEntry> {
    for attempt in 1..=policy.attempts {
        if let Some(entry) = find_new_entry(index, cwd, prior).await {
            info!(agent_session_id = %entry.id, attempt, "conversation log discovered");
            return Some(entry);
        }
        if attempt == policy.attempts {
            break;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return find_new_entry(index, cwd, prior).await;
            }
            () = tokio::time::sleep(policy.interval) => {}
        }
    }
    debug!(cwd = %cwd.display(), attempts = policy.attempts, "no conversation log discovered");
    None
}

async fn find_new_entry(index: &SessionIndex, cwd: &Path, prior: &HashSet<String>) -> Option<IndexEntry> {
    let mut newest: Option<IndexEntry> = None;
    for entry in index.entries().await {
        if prior.contains(&entry.id) || !same_dir(&entry.cwd, cwd).await {
            continue;
        }
        // Later entries (or later timestamps) win if several runs appeared.
        let replace = newest
            .as_ref()
            .map_or(true, |current| entry.created_at >= current.created_at);
        if replace {
            newest = Some(entry);
        }
    }
    newest
}

async fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
