//! Unit tests for tool kind mapping, failure detection, and plan projection.

use serde_json::json;

use agent_relay::models::tool_call::ToolKind;
use agent_relay::models::update::{PlanEntryPriority, PlanEntryStatus};
use agent_relay::translate::tools::{is_failure_output, kind_for, plan_entries, title_for};

#[test]
fn known_tool_names_map_to_kinds() {
    let table = [
        ("read_file", ToolKind::Read),
        ("list_directory", ToolKind::Read),
        ("grep", ToolKind::Search),
        ("web_search", ToolKind::Search),
        ("write_file", ToolKind::Edit),
        ("Replace", ToolKind::Edit),
        ("move_file", ToolKind::Move),
        ("delete_file", ToolKind::Delete),
        ("run_shell_command", ToolKind::Execute),
        ("bash", ToolKind::Execute),
        ("todo_write", ToolKind::Think),
        ("mystery_tool", ToolKind::Other),
        ("", ToolKind::Other),
    ];
    for (name, kind) in table {
        assert_eq!(kind_for(name), kind, "tool {name:?}");
    }
}

#[test]
fn other_tools_are_titled_with_their_name() {
    assert_eq!(
        title_for("fetch_issue", ToolKind::Other, &json!({"url": "https://example.test/1"})),
        "fetch_issue: https://example.test/1"
    );
    assert_eq!(title_for("", ToolKind::Other, &json!(null)), "Tool call");
}

#[test]
fn failure_pattern_over_fuzz_set() {
    let failing = [
        "error: could not compile",
        "ERROR",
        "Build FAILED after 3s",
        "panicked: NullPointerException at line 4",
        "stderr: some_error_code",
        "exit status: failed",
        "Unhandled Exception",
        "multi\nline\nwith an error inside",
    ];
    let others = [
        "",
        "ok",
        "test result: ok. 12 passed; 0 skipped",
        "wrote 3 files",
        "fn main() {}",
        "errand complete",
        "fail-safe engaged",
        "exceptional performance",
    ];
    for text in failing {
        assert!(is_failure_output(text), "{text:?} should read as a failure");
    }
    for text in others {
        let lower = text.to_lowercase();
        let expected = lower.contains("error") || lower.contains("failed") || lower.contains("exception");
        assert_eq!(is_failure_output(text), expected, "{text:?}");
    }
}

#[test]
fn todo_tools_project_to_plan_entries() {
    let entries = plan_entries(
        "todo_write",
        &json!({
            "todos": [
                {"content": "write the parser", "status": "done", "priority": "high"},
                {"content": "wire it up", "status": "in-progress"},
                {"content": "   "},
                "document it"
            ]
        }),
    )
    .expect("todo tool yields a plan");

    assert_eq!(entries.len(), 3, "blank items are skipped");
    assert_eq!(entries[0].status, PlanEntryStatus::Completed);
    assert_eq!(entries[0].priority, PlanEntryPriority::High);
    assert_eq!(entries[1].status, PlanEntryStatus::InProgress);
    assert_eq!(entries[1].priority, PlanEntryPriority::Medium);
    assert_eq!(entries[2].content, "document it");
    assert_eq!(entries[2].status, PlanEntryStatus::Pending);
}

#[test]
fn notes_tools_project_to_a_single_entry() {
    let entries = plan_entries("update_plan", &json!({"plan": "1. read\n2. fix"})).expect("plan");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "1. read\n2. fix");
    assert_eq!(entries[0].status, PlanEntryStatus::InProgress);
}

#[test]
fn other_tools_have_no_plan() {
    assert!(plan_entries("read_file", &json!({"path": "a"})).is_none());
    assert!(plan_entries("todo_write", &json!({"unrelated": true})).is_none());
}
