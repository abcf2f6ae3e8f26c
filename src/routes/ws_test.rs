use super::*;
use crate::protocol::{Point, Tool};
use crate::state::test_helpers;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn commit_text(x: f64) -> String {
    json!({
        "type": "stroke-commit",
        "points": [{"x": x, "y": x}, {"x": x + 1.0, "y": x + 2.0}],
        "color": "#222222",
        "width": 3,
        "tool": "brush",
    })
    .to_string()
}

async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("receive timed out")
        .expect("channel closed unexpectedly")
}

fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

async fn connect_client(state: &AppState) -> (Uuid, mpsc::Receiver<ServerMessage>) {
    let client_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(64);
    connect(state, client_id, tx).await;
    (client_id, rx)
}

// =============================================================================
// process_inbound_text
// =============================================================================

#[tokio::test]
async fn connect_sends_welcome_roster_replay_and_size() {
    let state = test_helpers::test_app_state();
    let (client_id, mut rx) = connect_client(&state).await;

    let ServerMessage::Welcome { id, name, .. } = recv(&mut rx).await else {
        panic!("expected welcome first");
    };
    assert_eq!(id, client_id);
    assert_eq!(name, "User 1");
    assert!(matches!(recv(&mut rx).await, ServerMessage::RosterUpdate { participants } if participants.len() == 1));
    assert_eq!(recv(&mut rx).await, ServerMessage::FullReplay { actions: Vec::new() });
    assert_eq!(recv(&mut rx).await, ServerMessage::HistorySize { history: 0, redo: 0 });
}

#[tokio::test]
async fn invalid_json_replies_with_error() {
    let state = test_helpers::test_app_state();
    let (client_id, mut rx) = connect_client(&state).await;
    drain(&mut rx);

    let replies = process_inbound_text(&state, client_id, "{oops").await;
    let [ServerMessage::Error { code, .. }] = replies.as_slice() else {
        panic!("expected one error reply, got {replies:?}");
    };
    assert_eq!(code, "E_INVALID_MESSAGE");
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn unknown_tag_is_rejected_without_state_change() {
    let state = test_helpers::test_app_state();
    let (client_id, _rx) = connect_client(&state).await;

    let replies = process_inbound_text(&state, client_id, r#"{"type":"undo"}"#).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(state.canvas.lock().await.history().size().history, 0);
}

#[tokio::test]
async fn stroke_commit_is_stamped_with_author() {
    let state = test_helpers::test_app_state();
    let (alice, mut rx_a) = connect_client(&state).await;
    let (_bob, mut rx_b) = connect_client(&state).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    let replies = process_inbound_text(&state, alice, &commit_text(1.0)).await;
    assert!(replies.is_empty());

    let ServerMessage::StrokeCommitted { action } = recv(&mut rx_b).await else {
        panic!("expected stroke-committed for peer");
    };
    assert_eq!(action.author, alice);
    assert_eq!(action.tool, Tool::Draw);
    assert_eq!(action.points, vec![Point { x: 1.0, y: 1.0 }, Point { x: 2.0, y: 3.0 }]);
    assert_eq!(recv(&mut rx_b).await, ServerMessage::HistorySize { history: 1, redo: 0 });
    assert_eq!(drain(&mut rx_a), vec![ServerMessage::HistorySize { history: 1, redo: 0 }]);
}

#[tokio::test]
async fn undo_redo_broadcast_full_replay() {
    let state = test_helpers::test_app_state();
    let (alice, mut rx_a) = connect_client(&state).await;
    let (bob, mut rx_b) = connect_client(&state).await;

    process_inbound_text(&state, alice, &commit_text(1.0)).await;
    process_inbound_text(&state, bob, &commit_text(5.0)).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    process_inbound_text(&state, bob, r#"{"type":"undo-request"}"#).await;
    for rx in [&mut rx_a, &mut rx_b] {
        let ServerMessage::FullReplay { actions } = recv(rx).await else {
            panic!("expected full-replay");
        };
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].author, alice);
        assert_eq!(recv(rx).await, ServerMessage::HistorySize { history: 1, redo: 1 });
    }

    process_inbound_text(&state, alice, r#"{"type":"redo-request"}"#).await;
    for rx in [&mut rx_a, &mut rx_b] {
        let ServerMessage::FullReplay { actions } = recv(rx).await else {
            panic!("expected full-replay");
        };
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].author, bob);
        assert_eq!(recv(rx).await, ServerMessage::HistorySize { history: 2, redo: 0 });
    }
}

#[tokio::test]
async fn undo_with_nothing_to_undo_broadcasts_nothing() {
    let state = test_helpers::test_app_state();
    let (alice, mut rx_a) = connect_client(&state).await;
    let (_bob, mut rx_b) = connect_client(&state).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    process_inbound_text(&state, alice, r#"{"type":"undo-request"}"#).await;
    process_inbound_text(&state, alice, r#"{"type":"redo-request"}"#).await;
    assert!(drain(&mut rx_a).is_empty());
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn state_request_replies_to_requester_only() {
    let state = test_helpers::test_app_state();
    let (alice, mut rx_a) = connect_client(&state).await;
    let (_bob, mut rx_b) = connect_client(&state).await;
    process_inbound_text(&state, alice, &commit_text(1.0)).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    process_inbound_text(&state, alice, r#"{"type":"state-request"}"#).await;
    let ServerMessage::FullReplay { actions } = recv(&mut rx_a).await else {
        panic!("expected full-replay");
    };
    assert_eq!(actions.len(), 1);
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn clear_request_broadcasts_cleared() {
    let state = test_helpers::test_app_state();
    let (alice, mut rx_a) = connect_client(&state).await;
    let (_bob, mut rx_b) = connect_client(&state).await;
    process_inbound_text(&state, alice, &commit_text(1.0)).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    process_inbound_text(&state, alice, r#"{"type":"clear-request"}"#).await;
    for rx in [&mut rx_a, &mut rx_b] {
        assert_eq!(recv(rx).await, ServerMessage::CanvasCleared);
        assert_eq!(recv(rx).await, ServerMessage::HistorySize { history: 0, redo: 0 });
    }
}

#[tokio::test]
async fn cursor_and_preview_skip_sender_and_history() {
    let state = test_helpers::test_app_state();
    let (alice, mut rx_a) = connect_client(&state).await;
    let (_bob, mut rx_b) = connect_client(&state).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    process_inbound_text(&state, alice, r#"{"type":"cursor-move","x":3.5,"y":4.0}"#).await;
    let preview = json!({
        "type": "stroke-preview",
        "points": [{"x": 0.0, "y": 0.0}],
        "color": "#000000",
        "width": 2,
        "tool": "eraser",
    });
    process_inbound_text(&state, alice, &preview.to_string()).await;

    assert!(matches!(recv(&mut rx_b).await, ServerMessage::CursorMoved { id, .. } if id == alice));
    assert!(matches!(recv(&mut rx_b).await, ServerMessage::StrokePreview { tool: Tool::Erase, .. }));
    assert!(drain(&mut rx_a).is_empty());
    assert_eq!(state.canvas.lock().await.history().size().history, 0);
}

#[tokio::test]
async fn ping_pongs_to_sender_only() {
    let state = test_helpers::test_app_state();
    let (alice, mut rx_a) = connect_client(&state).await;
    let (_bob, mut rx_b) = connect_client(&state).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    process_inbound_text(&state, alice, r#"{"type":"ping","ts":42}"#).await;
    assert_eq!(recv(&mut rx_a).await, ServerMessage::Pong { ts: 42 });
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn disconnect_broadcasts_roster_and_frees_color() {
    let state = test_helpers::test_app_state();
    let (alice, _rx_a) = connect_client(&state).await;
    let (bob, mut rx_b) = connect_client(&state).await;
    drain(&mut rx_b);

    disconnect(&state, alice).await;
    let ServerMessage::RosterUpdate { participants } = recv(&mut rx_b).await else {
        panic!("expected roster-update");
    };
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].id, bob);

    let (carol, _rx_c) = connect_client(&state).await;
    let canvas = state.canvas.lock().await;
    let carol = canvas.participant(carol).expect("carol registered");
    assert_eq!(carol.name, "User 3");
    assert_eq!(carol.color, crate::services::session::PALETTE[0]);
}

#[tokio::test]
async fn lagging_client_is_detached_instead_of_missing_replay() {
    let state = test_helpers::test_app_state();
    let (alice, mut rx_a) = connect_client(&state).await;
    let slow = Uuid::new_v4();
    let (tx, mut rx_slow) = mpsc::channel(4);
    connect(&state, slow, tx).await;
    drain(&mut rx_a);
    drain(&mut rx_slow);

    process_inbound_text(&state, alice, &commit_text(1.0)).await;
    drain(&mut rx_a);
    drain(&mut rx_slow);
    for x in 0..4 {
        process_inbound_text(&state, alice, &json!({"type": "cursor-move", "x": x, "y": 0}).to_string()).await;
    }
    process_inbound_text(&state, alice, r#"{"type":"undo-request"}"#).await;

    let mut received = Vec::new();
    let closed = loop {
        match timeout(Duration::from_millis(500), rx_slow.recv()).await {
            Ok(Some(msg)) => received.push(msg),
            Ok(None) => break true,
            Err(_) => break false,
        }
    };
    assert!(closed, "slow client channel still open");
    assert_eq!(received.len(), 4);
    assert!(received.iter().all(ServerMessage::is_transient));
    assert_eq!(state.canvas.lock().await.client_count(), 1);

    assert!(matches!(recv(&mut rx_a).await, ServerMessage::FullReplay { actions } if actions.is_empty()));
}

#[tokio::test]
async fn send_replies_writes_in_order() {
    let (mut sink, stream) = futures::channel::mpsc::unbounded::<Message>();
    let replies = vec![ServerMessage::Pong { ts: 1 }, ServerMessage::CanvasCleared];

    assert!(send_replies(&mut sink, &replies).await.is_ok());
    drop(sink);

    let sent: Vec<serde_json::Value> = stream
        .map(|msg| match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).expect("valid json"),
            other => panic!("expected text frame, got {other:?}"),
        })
        .collect()
        .await;
    assert_eq!(sent, vec![json!({"type": "pong", "ts": 1}), json!({"type": "canvas-cleared"})]);
}

#[tokio::test]
async fn send_replies_stops_on_failed_write() {
    let (mut sink, stream) = futures::channel::mpsc::unbounded::<Message>();
    drop(stream);

    let replies = vec![ServerMessage::error_from(&ProtocolError::UnsupportedFrame)];
    assert!(send_replies(&mut sink, &replies).await.is_err());
}

// =============================================================================
// END-TO-END
// =============================================================================

async fn spawn_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = crate::routes::app(test_helpers::test_app_state());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    addr
}

async fn ws_connect(addr: std::net::SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("ws connect");
    client
}

async fn ws_recv(client: &mut Client) -> ServerMessage {
    loop {
        let msg = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("ws receive timed out")
            .expect("ws stream ended")
            .expect("ws error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("server message");
        }
    }
}

async fn ws_send(client: &mut Client, text: String) {
    client.send(WsMessage::text(text)).await.expect("ws send");
}

/// Consume the four join messages and return the welcome id.
async fn ws_join(client: &mut Client) -> Uuid {
    let ServerMessage::Welcome { id, .. } = ws_recv(client).await else {
        panic!("expected welcome");
    };
    for _ in 0..3 {
        ws_recv(client).await;
    }
    id
}

#[tokio::test]
async fn e2e_two_clients_draw_and_undo() {
    let addr = spawn_server().await;

    let mut a = ws_connect(addr).await;
    let a_id = ws_join(&mut a).await;

    let mut b = ws_connect(addr).await;
    ws_join(&mut b).await;
    let ServerMessage::RosterUpdate { participants } = ws_recv(&mut a).await else {
        panic!("expected roster-update for A");
    };
    assert_eq!(participants.len(), 2);

    ws_send(&mut a, commit_text(10.0)).await;
    assert_eq!(ws_recv(&mut a).await, ServerMessage::HistorySize { history: 1, redo: 0 });
    let ServerMessage::StrokeCommitted { action } = ws_recv(&mut b).await else {
        panic!("expected stroke-committed for B");
    };
    assert_eq!(action.author, a_id);
    assert_eq!(ws_recv(&mut b).await, ServerMessage::HistorySize { history: 1, redo: 0 });

    ws_send(&mut b, json!({"type": "undo-request"}).to_string()).await;
    for client in [&mut a, &mut b] {
        assert_eq!(ws_recv(client).await, ServerMessage::FullReplay { actions: Vec::new() });
        assert_eq!(ws_recv(client).await, ServerMessage::HistorySize { history: 0, redo: 1 });
    }

    b.close(None).await.expect("close");
    let ServerMessage::RosterUpdate { participants } = ws_recv(&mut a).await else {
        panic!("expected roster-update after B left");
    };
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].id, a_id);
}

#[tokio::test]
async fn e2e_binary_frame_is_rejected() {
    let addr = spawn_server().await;
    let mut a = ws_connect(addr).await;
    ws_join(&mut a).await;

    a.send(WsMessage::binary(vec![1u8, 2, 3])).await.expect("ws send");
    let ServerMessage::Error { code, .. } = ws_recv(&mut a).await else {
        panic!("expected error");
    };
    assert_eq!(code, "E_UNSUPPORTED_FRAME");
}

#[tokio::test]
async fn e2e_late_joiner_receives_existing_history() {
    let addr = spawn_server().await;
    let mut a = ws_connect(addr).await;
    ws_join(&mut a).await;
    ws_send(&mut a, commit_text(1.0)).await;
    ws_send(&mut a, commit_text(2.0)).await;
    ws_recv(&mut a).await;
    ws_recv(&mut a).await;

    let mut late = ws_connect(addr).await;
    assert!(matches!(ws_recv(&mut late).await, ServerMessage::Welcome { .. }));
    assert!(matches!(ws_recv(&mut late).await, ServerMessage::RosterUpdate { .. }));
    let ServerMessage::FullReplay { actions } = ws_recv(&mut late).await else {
        panic!("expected full-replay");
    };
    assert_eq!(actions.len(), 2);
    assert_eq!(ws_recv(&mut late).await, ServerMessage::HistorySize { history: 2, redo: 0 });
}
