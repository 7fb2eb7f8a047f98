//! Unit tests for the conversation-event translator and stdout routing.

use std::path::PathBuf;

use agent_relay::models::event::ConversationEvent;
use agent_relay::models::session::Session;
use agent_relay::models::tool_call::{ToolCallStatus, ToolKind};
use agent_relay::models::update::{ContentBlock, SessionUpdate, ToolCallContent};
use agent_relay::translate::{route_stdout, EventTranslator, NoThoughts, RegexThoughtClassifier};

fn session() -> Session {
    Session::new(PathBuf::from("/work"), "code".into(), "default".into(), Vec::new())
}

fn event(line: &str) -> ConversationEvent {
    ConversationEvent::parse_line(line).expect("valid event line")
}

fn text_of(content: &[ToolCallContent]) -> String {
    content
        .iter()
        .map(|c| match c {
            ToolCallContent::Content {
                content: ContentBlock::Text { text },
            } => text.clone(),
            ToolCallContent::Content { .. } => String::new(),
        })
        .collect()
}

// ── Tool-call lifecycle ─────────────────────────────────────────────────────

#[test]
fn tool_call_start_then_result_completes() {
    let translator = EventTranslator::default();
    let mut s = session();

    let updates = translator.translate(
        &mut s,
        &event(r#"{"role":"assistant","content":"","tool_calls":[{"id":"c1","name":"read_file","arguments":{"path":"src/lib.rs"}}]}"#),
    );
    let [SessionUpdate::ToolCall(call)] = updates.as_slice() else {
        panic!("expected one tool_call, got {updates:?}");
    };
    assert_eq!(call.tool_call_id, "c1");
    assert_eq!(call.title, "Read src/lib.rs");
    assert_eq!(call.kind, ToolKind::Read);
    assert_eq!(call.status, ToolCallStatus::Pending);

    let updates = translator.translate(
        &mut s,
        &event(r#"{"role":"tool","tool_call_id":"c1","name":"read_file","content":"fn main() {}"}"#),
    );
    let [SessionUpdate::ToolCallUpdate(update)] = updates.as_slice() else {
        panic!("expected one tool_call_update, got {updates:?}");
    };
    assert_eq!(update.status, Some(ToolCallStatus::Completed));
    assert_eq!(text_of(update.content.as_deref().unwrap()), "fn main() {}");
    assert_eq!(s.tool_calls["c1"].status, ToolCallStatus::Completed);
}

#[test]
fn arguments_encoded_as_a_string_are_decoded() {
    let translator = EventTranslator::default();
    let mut s = session();
    let updates = translator.translate(
        &mut s,
        &event(r#"{"role":"assistant","tool_calls":[{"id":"c1","name":"grep","arguments":"{\"pattern\":\"TODO\"}"}]}"#),
    );
    let [SessionUpdate::ToolCall(call)] = updates.as_slice() else {
        panic!("expected one tool_call, got {updates:?}");
    };
    assert_eq!(call.title, "Search TODO");
}

#[test]
fn error_text_marks_result_failed() {
    let translator = EventTranslator::default();
    let mut s = session();
    translator.translate(
        &mut s,
        &event(r#"{"role":"assistant","tool_calls":[{"id":"c1","name":"write_file","arguments":{"path":"a"}}]}"#),
    );
    let updates = translator.translate(
        &mut s,
        &event(r#"{"role":"tool","tool_call_id":"c1","content":"Permission denied: write FAILED"}"#),
    );
    let [SessionUpdate::ToolCallUpdate(update)] = updates.as_slice() else {
        panic!("expected one update, got {updates:?}");
    };
    assert_eq!(update.status, Some(ToolCallStatus::Failed));
}

#[test]
fn streaming_output_accumulates_and_clears_on_result() {
    let translator = EventTranslator::default();
    let mut s = session();

    let started = translator.translate(
        &mut s,
        &event(r#"{"role":"assistant","tool_calls":[{"id":"sh","name":"run_shell_command","arguments":{"command":"make"}}]}"#),
    );
    assert!(matches!(
        started.as_slice(),
        [SessionUpdate::ToolCall(call)] if call.status == ToolCallStatus::InProgress
    ));
    assert!(s.streaming.contains("sh"));

    let first = translator.translate(
        &mut s,
        &event(r#"{"role":"tool","tool_call_id":"sh","stream":"stdout","content":"step 1\n"}"#),
    );
    let second = translator.translate(
        &mut s,
        &event(r#"{"role":"tool","tool_call_id":"sh","stream":"stderr","content":"step 2\n"}"#),
    );
    let [SessionUpdate::ToolCallUpdate(second)] = second.as_slice() else {
        panic!("expected one update, got {second:?}");
    };
    assert_eq!(first.len(), 1);
    assert_eq!(text_of(second.content.as_deref().unwrap()), "step 1\nstep 2\n");

    let done = translator.translate(&mut s, &event(r#"{"role":"tool","tool_call_id":"sh","content":""}"#));
    let [SessionUpdate::ToolCallUpdate(done)] = done.as_slice() else {
        panic!("expected one update, got {done:?}");
    };
    assert_eq!(done.status, Some(ToolCallStatus::Completed));
    assert_eq!(text_of(done.content.as_deref().unwrap()), "step 1\nstep 2\n", "buffer used when result is empty");
    assert!(s.tool_calls["sh"].output.is_empty());
    assert!(!s.streaming.contains("sh"));
}

#[test]
fn terminal_output_capability_sends_raw_deltas() {
    let translator = EventTranslator::new(true);
    let mut s = session();
    translator.translate(
        &mut s,
        &event(r#"{"role":"assistant","tool_calls":[{"id":"sh","name":"bash","arguments":{"command":"ls"}}]}"#),
    );

    let updates = translator.translate(
        &mut s,
        &event(r#"{"role":"tool","tool_call_id":"sh","stream":"stdout","content":"a.txt\n"}"#),
    );
    let [SessionUpdate::ToolCallUpdate(update)] = updates.as_slice() else {
        panic!("expected one update, got {updates:?}");
    };
    assert!(update.content.is_none());
    let meta = update.meta.as_ref().expect("terminal meta");
    assert_eq!(meta["terminal_output"]["data"], "a.txt\n");
    assert_eq!(meta["terminal_output"]["stream"], "stdout");

    let updates = translator.translate(&mut s, &event(r#"{"role":"tool","tool_call_id":"sh","content":"a.txt"}"#));
    let [SessionUpdate::ToolCallUpdate(update)] = updates.as_slice() else {
        panic!("expected one update, got {updates:?}");
    };
    assert_eq!(update.meta.as_ref().unwrap()["terminal_exit"]["failed"], false);
}

#[test]
fn output_after_completion_is_ignored() {
    let translator = EventTranslator::default();
    let mut s = session();
    translator.translate(
        &mut s,
        &event(r#"{"role":"assistant","tool_calls":[{"id":"c1","name":"read_file","arguments":{}}]}"#),
    );
    translator.translate(&mut s, &event(r#"{"role":"tool","tool_call_id":"c1","content":"done"}"#));

    let late = translator.translate(
        &mut s,
        &event(r#"{"role":"tool","tool_call_id":"c1","stream":"stdout","content":"late"}"#),
    );
    let duplicate = translator.translate(&mut s, &event(r#"{"role":"tool","tool_call_id":"c1","content":"again"}"#));
    assert!(late.is_empty());
    assert!(duplicate.is_empty());
    assert_eq!(s.tool_calls["c1"].status, ToolCallStatus::Completed);
}

// ── Unknown and missing ids ─────────────────────────────────────────────────

#[test]
fn unknown_id_creates_a_synthetic_record() {
    let translator = EventTranslator::default();
    let mut s = session();

    let updates = translator.translate(
        &mut s,
        &event(r#"{"role":"tool","tool_call_id":"ghost","name":"read_file","content":"contents"}"#),
    );
    assert_eq!(updates.len(), 2, "{updates:?}");
    assert!(matches!(&updates[0], SessionUpdate::ToolCall(call) if call.tool_call_id == "ghost"));
    assert!(matches!(
        &updates[1],
        SessionUpdate::ToolCallUpdate(u) if u.tool_call_id == "ghost" && u.status == Some(ToolCallStatus::Completed)
    ));
    assert!(s.tool_calls.contains_key("ghost"));
}

#[test]
fn missing_id_attaches_to_latest_open_call_with_same_name() {
    let translator = EventTranslator::default();
    let mut s = session();
    translator.translate(
        &mut s,
        &event(
            r#"{"role":"assistant","tool_calls":[
                {"id":"r1","name":"read_file","arguments":{"path":"a"}},
                {"id":"g1","name":"grep","arguments":{"pattern":"x"}},
                {"id":"r2","name":"read_file","arguments":{"path":"b"}}
            ]}"#,
        ),
    );

    let updates = translator.translate(&mut s, &event(r#"{"role":"tool","name":"read_file","content":"B"}"#));
    let [SessionUpdate::ToolCallUpdate(update)] = updates.as_slice() else {
        panic!("expected one update, got {updates:?}");
    };
    assert_eq!(update.tool_call_id, "r2");

    let updates = translator.translate(&mut s, &event(r#"{"role":"tool","name":"read_file","content":"A"}"#));
    assert!(matches!(updates.as_slice(), [SessionUpdate::ToolCallUpdate(u)] if u.tool_call_id == "r1"));
    assert_eq!(s.tool_calls["g1"].status, ToolCallStatus::Pending);
}

#[test]
fn missing_id_without_match_generates_one() {
    let translator = EventTranslator::default();
    let mut s = session();
    let updates = translator.translate(&mut s, &event(r#"{"role":"tool","name":"grep","content":"no hits"}"#));
    let SessionUpdate::ToolCall(call) = &updates[0] else {
        panic!("expected a synthetic tool_call first, got {updates:?}");
    };
    assert!(call.tool_call_id.starts_with("call_"));
    assert_eq!(s.tool_calls.len(), 1);
}

// ── Plans and replay ────────────────────────────────────────────────────────

#[test]
fn todo_tool_also_emits_a_plan() {
    let translator = EventTranslator::default();
    let mut s = session();
    let updates = translator.translate(
        &mut s,
        &event(r#"{"role":"assistant","tool_calls":[{"id":"t","name":"write_todos","arguments":{"todos":["a","b"]}}]}"#),
    );
    assert_eq!(updates.len(), 2);
    assert!(matches!(&updates[1], SessionUpdate::Plan { entries } if entries.len() == 2));
}

#[test]
fn live_translation_ignores_message_text_but_replay_surfaces_it() {
    let translator = EventTranslator::default();
    let mut s = session();
    let user = event(r#"{"role":"user","content":"hi"}"#);
    let reply = event(r#"{"role":"assistant","content":[{"type":"text","text":"hello"}]}"#);

    assert!(translator.translate(&mut s, &user).is_empty());
    assert!(translator.translate(&mut s, &reply).is_empty());

    let replayed: Vec<SessionUpdate> = [user, reply]
        .iter()
        .flat_map(|e| translator.replay(&mut s, e))
        .collect();
    assert_eq!(
        replayed,
        vec![
            SessionUpdate::UserMessageChunk {
                content: ContentBlock::text("hi")
            },
            SessionUpdate::agent_text("hello"),
        ]
    );
}

// ── Stdout routing ──────────────────────────────────────────────────────────

#[test]
fn thought_chunks_route_to_thought_channel() {
    let classifier = RegexThoughtClassifier::new(agent_relay::config::DEFAULT_THOUGHT_PATTERN).unwrap();

    let route = route_stdout(&classifier, "\nThinking: which file holds the parser?\n");
    assert!(route.thought);
    assert_eq!(route.update, SessionUpdate::thought_text("\nThinking: which file holds the parser?\n"));

    let route = route_stdout(&classifier, "I updated src/parser.rs.\n");
    assert!(!route.thought);
    assert_eq!(route.update, SessionUpdate::agent_text("I updated src/parser.rs.\n"));

    let route = route_stdout(&NoThoughts, "Thinking: anything");
    assert!(!route.thought);
}
