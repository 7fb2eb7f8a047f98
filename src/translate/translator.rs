//! Stateful mapping of conversation log events to `session/update`s.
//!
//! Assistant *text* in the log is ignored during a live run because the same
//! words already reached the editor through stdout; the log is the source of
//! truth only for tool-call lifecycle and plans. When a session is loaded
//! from disk there is no stdout, so [`EventTranslator::replay`] surfaces the
//! text as well.

use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::models::event::{ConversationEvent, EventRole, StreamTag, ToolCallDescriptor};
use crate::models::session::Session;
use crate::models::tool_call::{ToolCallRecord, ToolCallStatus};
use crate::models::update::{ContentBlock, SessionUpdate, ToolCall, ToolCallContent, ToolCallUpdate};
use crate::translate::tools;

/// Translates log events for one session, keeping tool-call state on the
/// [`Session`] itself so it survives across runs.
#[derive(Debug, Clone, Default)]
pub struct EventTranslator {
    terminal_output: bool,
}

impl EventTranslator {
    /// `terminal_output` selects raw output deltas (for editors that render
    /// a live terminal) over re-sending the accumulated buffer.
    #[must_use]
    pub fn new(terminal_output: bool) -> Self {
        Self { terminal_output }
    }

    /// Updates for one event observed during a live run.
    pub fn translate(&self, session: &mut Session, event: &ConversationEvent) -> Vec<SessionUpdate> {
        let mut out = Vec::new();
        match event.role {
            EventRole::Assistant => {
                for call in &event.tool_calls {
                    start(session, call, &mut out);
                }
            }
            EventRole::Tool => match event.stream {
                Some(stream) => self.output_delta(session, event, stream, &mut out),
                None => self.result(session, event, &mut out),
            },
            EventRole::User | EventRole::Other => {}
        }
        out
    }

    /// Updates that re-create a recorded conversation in the editor: user and
    /// assistant text as message chunks, plus the tool-call lifecycle.
    pub fn replay(&self, session: &mut Session, event: &ConversationEvent) -> Vec<SessionUpdate> {
        let mut out = Vec::new();
        let text = event.content.trim();
        match event.role {
            EventRole::User if !text.is_empty() => {
                out.push(SessionUpdate::UserMessageChunk {
                    content: ContentBlock::text(text),
                });
            }
            EventRole::Assistant if !text.is_empty() => {
                out.push(SessionUpdate::agent_text(text));
            }
            _ => {}
        }
        out.extend(self.translate(session, event));
        out
    }

    fn output_delta(
        &self,
        session: &mut Session,
        event: &ConversationEvent,
        stream: StreamTag,
        out: &mut Vec<SessionUpdate>,
    ) {
        let id = resolve_id(session, event, out);
        let Some(record) = session.tool_calls.get_mut(&id) else {
            return;
        };
        if record.status.is_terminal() {
            debug!(tool_call_id = %id, "output after completion ignored");
            return;
        }
        record.advance(ToolCallStatus::InProgress);
        session.streaming.insert(id.clone());

        let mut update = ToolCallUpdate::new(&id);
        update.status = Some(ToolCallStatus::InProgress);
        if self.terminal_output {
            update.meta = Some(json!({
                "terminal_output": {
                    "data": event.content,
                    "stream": match stream {
                        StreamTag::Stdout => "stdout",
                        StreamTag::Stderr => "stderr",
                    },
                }
            }));
        } else {
            record.output.push_str(&event.content);
            update.content = Some(vec![ToolCallContent::text(record.output.clone())]);
        }
        out.push(SessionUpdate::ToolCallUpdate(update));
    }

    fn result(&self, session: &mut Session, event: &ConversationEvent, out: &mut Vec<SessionUpdate>) {
        let id = resolve_id(session, event, out);
        let Some(record) = session.tool_calls.get_mut(&id) else {
            return;
        };
        if record.status.is_terminal() {
            debug!(tool_call_id = %id, "duplicate result ignored");
            return;
        }
        let status = if tools::is_failure_output(&event.content) {
            ToolCallStatus::Failed
        } else {
            ToolCallStatus::Completed
        };
        record.advance(status);
        let buffered = std::mem::take(&mut record.output);
        session.streaming.remove(&id);

        let text = if event.content.is_empty() {
            buffered
        } else {
            event.content.clone()
        };
        let mut update = ToolCallUpdate::new(&id);
        update.status = Some(status);
        if !text.is_empty() {
            update.content = Some(vec![ToolCallContent::text(text)]);
        }
        if self.terminal_output {
            update.meta = Some(json!({ "terminal_exit": { "failed": status == ToolCallStatus::Failed } }));
        }
        out.push(SessionUpdate::ToolCallUpdate(update));
    }
}

fn start(session: &mut Session, call: &ToolCallDescriptor, out: &mut Vec<SessionUpdate>) {
    let args = call.arguments_value();
    let kind = tools::kind_for(&call.name);
    let title = tools::title_for(&call.name, kind, &args);
    let id = call
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_id);

    if let Some(existing) = session.tool_calls.get_mut(&id) {
        // Seen before (e.g. synthesised from an earlier output event):
        // refresh the display fields only.
        existing.name = Some(call.name.clone());
        existing.title.clone_from(&title);
        existing.kind = kind;
        let mut update = ToolCallUpdate::new(&id);
        update.title = Some(title);
        update.kind = Some(kind);
        update.raw_input = Some(args.clone());
        out.push(SessionUpdate::ToolCallUpdate(update));
    } else {
        let status = if kind.streams_output() {
            ToolCallStatus::InProgress
        } else {
            ToolCallStatus::Pending
        };
        if kind.streams_output() {
            session.streaming.insert(id.clone());
        }
        let record = ToolCallRecord::new(id.clone(), Some(call.name.clone()), title.clone(), kind, status);
        insert_record(session, record);
        out.push(SessionUpdate::ToolCall(ToolCall {
            tool_call_id: id,
            title,
            kind,
            status,
            content: Vec::new(),
            raw_input: Some(args.clone()),
        }));
    }

    if let Some(entries) = tools::plan_entries(&call.name, &args) {
        out.push(SessionUpdate::Plan { entries });
    }
}

fn generate_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Find the record an output/result event belongs to, creating a synthetic
/// one (and announcing it) when nothing matches.
fn resolve_id(session: &mut Session, event: &ConversationEvent, out: &mut Vec<SessionUpdate>) -> String {
    if let Some(id) = event.tool_call_id.as_deref().filter(|id| !id.is_empty()) {
        if !session.tool_calls.contains_key(id) {
            insert_synthetic(session, id.to_owned(), event.name.as_deref(), out);
        }
        return id.to_owned();
    }

    if let Some(name) = event.name.as_deref() {
        // Prefer a call that is already streaming, then the latest opened.
        let open = session
            .tool_calls
            .values()
            .filter(|r| r.name.as_deref() == Some(name) && !r.status.is_terminal())
            .max_by_key(|r| (session.streaming.contains(&r.id), r.seq))
            .map(|r| r.id.clone());
        if let Some(id) = open {
            return id;
        }
    }

    let id = generate_id();
    insert_synthetic(session, id.clone(), event.name.as_deref(), out);
    id
}

fn insert_synthetic(session: &mut Session, id: String, name: Option<&str>, out: &mut Vec<SessionUpdate>) {
    let name_str = name.unwrap_or_default();
    let kind = tools::kind_for(name_str);
    let title = tools::title_for(name_str, kind, &Value::Null);
    debug!(tool_call_id = %id, tool = name_str, "synthesising tool call for unknown id");
    let record = ToolCallRecord::new(
        id.clone(),
        name.map(str::to_owned),
        title.clone(),
        kind,
        ToolCallStatus::Pending,
    );
    insert_record(session, record);
    out.push(SessionUpdate::ToolCall(ToolCall {
        tool_call_id: id,
        title,
        kind,
        status: ToolCallStatus::Pending,
        content: Vec::new(),
        raw_input: None,
    }));
}

fn insert_record(session: &mut Session, mut record: ToolCallRecord) {
    record.seq = session.tool_calls.len() as u64;
    session.tool_calls.insert(record.id.clone(), record);
}
