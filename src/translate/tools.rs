//! Static knowledge about agent tool names: kind, display title, and plan
//! projection of todo/notes tools.

use serde_json::Value;

use crate::models::tool_call::ToolKind;
use crate::models::update::{PlanEntry, PlanEntryPriority, PlanEntryStatus};

const TITLE_TARGET_CHARS: usize = 60;

/// Capability kind for a tool name. Unknown names map to [`ToolKind::Other`].
#[must_use]
pub fn kind_for(name: &str) -> ToolKind {
    match name.to_ascii_lowercase().as_str() {
        "read_file" | "read" | "view" | "list_directory" | "ls" | "read_many_files" => ToolKind::Read,
        "grep" | "search" | "glob" | "find_files" | "search_files" | "web_search" | "web_fetch" => {
            ToolKind::Search
        }
        "write_file" | "edit_file" | "replace" | "apply_patch" | "create_file" | "write" | "edit" => {
            ToolKind::Edit
        }
        "move_file" | "rename_file" | "mv" => ToolKind::Move,
        "delete_file" | "remove_file" | "rm" => ToolKind::Delete,
        "run_shell_command" | "shell" | "bash" | "execute" | "run_command" => ToolKind::Execute,
        "think" | "plan" | "notes" | "update_plan" | "todo_write" | "todo" | "update_todos"
        | "write_todos" => ToolKind::Think,
        _ => ToolKind::Other,
    }
}

fn str_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn shorten(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() <= TITLE_TARGET_CHARS && first_line.len() == text.len() {
        return first_line.to_owned();
    }
    let mut short: String = first_line.chars().take(TITLE_TARGET_CHARS - 1).collect();
    short.push('…');
    short
}

/// Display title: the kind's verb plus the most telling argument, or the
/// bare tool name when neither applies.
#[must_use]
pub fn title_for(name: &str, kind: ToolKind, args: &Value) -> String {
    if kind == ToolKind::Move {
        let from = str_arg(args, &["source", "from", "old_path", "path"]);
        let to = str_arg(args, &["destination", "to", "new_path"]);
        if let (Some(from), Some(to)) = (from, to) {
            return format!("Move {from} → {to}");
        }
    }
    let target = str_arg(
        args,
        &["path", "file_path", "query", "pattern", "command", "url", "dir_path"],
    );
    match (kind.verb(), target) {
        (Some(verb), Some(target)) => format!("{verb} {}", shorten(target)),
        (None, Some(target)) if kind == ToolKind::Other => format!("{name}: {}", shorten(target)),
        _ if name.is_empty() => "Tool call".to_owned(),
        _ => name.to_owned(),
    }
}

/// Whether a tool result reads as a failure.
///
/// Case-insensitive search for `error`, `failed` or `exception` anywhere in
/// the text.
#[must_use]
pub fn is_failure_output(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["error", "failed", "exception"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn normalize_status(raw: Option<&str>) -> PlanEntryStatus {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("completed" | "complete" | "done" | "finished" | "cancelled" | "canceled") => {
            PlanEntryStatus::Completed
        }
        Some("in_progress" | "in-progress" | "inprogress" | "active" | "doing" | "running" | "started") => {
            PlanEntryStatus::InProgress
        }
        _ => PlanEntryStatus::Pending,
    }
}

fn normalize_priority(raw: Option<&str>) -> PlanEntryPriority {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("high") => PlanEntryPriority::High,
        Some("low") => PlanEntryPriority::Low,
        _ => PlanEntryPriority::Medium,
    }
}

fn todo_entry(item: &Value) -> Option<PlanEntry> {
    let content = match item {
        Value::String(text) => text.trim(),
        other => str_arg(other, &["content", "description", "task", "title", "text"])?,
    };
    if content.is_empty() {
        return None;
    }
    Some(PlanEntry {
        content: content.to_owned(),
        priority: normalize_priority(item.get("priority").and_then(Value::as_str)),
        status: normalize_status(item.get("status").and_then(Value::as_str)),
    })
}

/// Plan entries implied by a todo-list or notes tool call, if `name` is one.
///
/// Todo tools yield one entry per task; notes tools yield a single entry
/// holding the note text.
#[must_use]
pub fn plan_entries(name: &str, args: &Value) -> Option<Vec<PlanEntry>> {
    match name.to_ascii_lowercase().as_str() {
        "todo_write" | "todo" | "update_todos" | "write_todos" => {
            let items = ["todos", "items", "tasks"]
                .iter()
                .find_map(|key| args.get(*key).and_then(Value::as_array))?;
            Some(items.iter().filter_map(todo_entry).collect())
        }
        "plan" | "notes" | "update_plan" => {
            let text = match args {
                Value::String(text) => text.trim(),
                other => str_arg(other, &["plan", "notes", "content", "text"])?,
            };
            if text.is_empty() {
                return None;
            }
            Some(vec![PlanEntry {
                content: text.to_owned(),
                priority: PlanEntryPriority::Medium,
                status: PlanEntryStatus::InProgress,
            }])
        }
        _ => None,
    }
}
