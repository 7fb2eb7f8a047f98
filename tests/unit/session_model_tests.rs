//! Unit tests for session state, history, tool-call lifecycle, and prompt
//! flattening.

use std::path::PathBuf;

use agent_relay::models::prompt::prompt_text;
use agent_relay::models::session::{title_from_prompt, Session, TurnRole};
use agent_relay::models::tool_call::{ToolCallRecord, ToolCallStatus, ToolKind};
use agent_relay::models::update::{AvailableCommand, ContentBlock};

fn session() -> Session {
    Session::new(
        PathBuf::from("/work/repo"),
        "code".into(),
        "default".into(),
        vec![AvailableCommand {
            name: "review".into(),
            description: "Review changes".into(),
        }],
    )
}

// ── Fork ────────────────────────────────────────────────────────────────────

#[test]
fn fork_copies_history_by_value() {
    let mut parent = session();
    parent.push_turn(TurnRole::User, "first question");
    parent.push_turn(TurnRole::Assistant, "first answer");
    parent.agent_session_id = Some("agent-1".into());

    let mut child = parent.fork(PathBuf::from("/work/other"));
    assert_ne!(child.id, parent.id);
    assert_eq!(child.history, parent.history);
    assert_eq!(child.cwd, PathBuf::from("/work/other"));
    assert_eq!(child.mode_id, "code");
    assert_eq!(child.commands, parent.commands);
    assert!(child.agent_session_id.is_none(), "run state starts fresh");

    child.push_turn(TurnRole::User, "only in the child");
    child.mode_id = "ask".into();
    child.commands.clear();
    assert_eq!(parent.history.len(), 2, "parent history unaffected");
    assert_eq!(parent.mode_id, "code");
    assert_eq!(parent.commands.len(), 1);

    parent.push_turn(TurnRole::User, "only in the parent");
    assert_eq!(child.history.len(), 3);
    assert_eq!(child.history[2].text, "only in the child");
}

// ── History ─────────────────────────────────────────────────────────────────

#[test]
fn empty_turns_are_not_recorded() {
    let mut s = session();
    s.push_turn(TurnRole::Assistant, "   \n");
    assert!(s.history.is_empty());
}

#[test]
fn transcript_keeps_most_recent_turns_within_bounds() {
    let mut s = session();
    for i in 0..5 {
        s.push_turn(TurnRole::User, &format!("question {i}"));
        s.push_turn(TurnRole::Assistant, &format!("answer {i}"));
    }

    let transcript = s.transcript(2, 10_000).expect("turns fit");
    assert!(transcript.contains("question 4"));
    assert!(transcript.contains("answer 4"));
    assert!(!transcript.contains("question 3"));
    let q = transcript.find("question 4").unwrap();
    let a = transcript.find("answer 4").unwrap();
    assert!(q < a, "rendered oldest first");
}

#[test]
fn transcript_respects_char_budget() {
    let mut s = session();
    s.push_turn(TurnRole::User, &"x".repeat(500));
    s.push_turn(TurnRole::Assistant, "short");

    let transcript = s.transcript(10, 100).expect("the short turn fits");
    assert!(transcript.contains("short"));
    assert!(!transcript.contains("xxxx"));
    assert!(s.transcript(10, 3).is_none());
}

#[test]
fn title_is_first_line_capped_at_80_chars() {
    assert_eq!(title_from_prompt("\n  Fix the parser  \nmore"), Some("Fix the parser".into()));
    assert_eq!(title_from_prompt("   "), None);

    let long = "a".repeat(200);
    let title = title_from_prompt(&long).unwrap();
    assert_eq!(title.chars().count(), 80);
    assert!(title.ends_with('…'));
}

// ── Tool-call lifecycle ─────────────────────────────────────────────────────

#[test]
fn status_is_monotonic() {
    use ToolCallStatus::{Completed, Failed, InProgress, Pending};

    assert!(Pending.can_transition_to(InProgress));
    assert!(Pending.can_transition_to(Completed));
    assert!(InProgress.can_transition_to(Failed));
    assert!(!InProgress.can_transition_to(Pending));
    assert!(!Completed.can_transition_to(InProgress));
    assert!(!Failed.can_transition_to(Completed));
    assert!(!Completed.can_transition_to(Completed));
}

#[test]
fn record_refuses_regression() {
    let mut record = ToolCallRecord::new(
        "c1".into(),
        Some("read_file".into()),
        "Read a.rs".into(),
        ToolKind::Read,
        ToolCallStatus::Pending,
    );
    assert!(record.advance(ToolCallStatus::Completed));
    assert!(!record.advance(ToolCallStatus::InProgress));
    assert_eq!(record.status, ToolCallStatus::Completed);
}

// ── Prompt content ──────────────────────────────────────────────────────────

#[test]
fn prompt_blocks_flatten_to_text() {
    let blocks = vec![
        ContentBlock::text("explain this"),
        ContentBlock::ResourceLink {
            uri: "file:///work/repo/src/main.rs".into(),
            name: Some("main.rs".into()),
        },
    ];
    assert_eq!(prompt_text(&blocks), "explain this\n\n@/work/repo/src/main.rs");
}

#[test]
fn unsupported_content_is_dropped() {
    let blocks: Vec<ContentBlock> = serde_json::from_value(serde_json::json!([
        {"type": "image", "data": "AAAA", "mimeType": "image/png"},
        {"type": "text", "text": "what is in the picture?"}
    ]))
    .expect("content decodes");
    assert_eq!(blocks[0], ContentBlock::Unsupported);
    assert_eq!(prompt_text(&blocks), "what is in the picture?");
}
