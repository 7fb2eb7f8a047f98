//! Unit tests for the per-session ordered update relay.

use std::sync::Arc;

use agent_relay::models::update::SessionUpdate;
use agent_relay::relay::UpdateRelay;

use crate::common::RecordingClient;

#[tokio::test]
async fn updates_arrive_in_enqueue_order() {
    let client = RecordingClient::new();
    let relay = UpdateRelay::spawn("s1", Arc::clone(&client) as _);

    for i in 0..200 {
        relay.send(SessionUpdate::agent_text(format!("{i},")));
    }
    relay.flush().await;

    let expected: String = (0..200).map(|i| format!("{i},")).collect();
    assert_eq!(client.agent_text("s1"), expected);
    assert!(client.notifications().iter().all(|n| n.session_id == "s1"));
}

#[tokio::test]
async fn clones_share_one_queue() {
    let client = RecordingClient::new();
    let relay = UpdateRelay::spawn("s1", Arc::clone(&client) as _);
    let from_tailer = relay.clone();

    relay.send(SessionUpdate::agent_text("a"));
    from_tailer.send(SessionUpdate::agent_text("b"));
    relay.send(SessionUpdate::agent_text("c"));
    from_tailer.flush().await;

    assert_eq!(client.agent_text("s1"), "abc");
}

#[tokio::test]
async fn sessions_do_not_share_queues() {
    let client = RecordingClient::new();
    let one = UpdateRelay::spawn("one", Arc::clone(&client) as _);
    let two = UpdateRelay::spawn("two", Arc::clone(&client) as _);

    one.send(SessionUpdate::agent_text("1"));
    two.send(SessionUpdate::agent_text("2"));
    one.flush().await;
    two.flush().await;

    assert_eq!(client.agent_text("one"), "1");
    assert_eq!(client.agent_text("two"), "2");
}
