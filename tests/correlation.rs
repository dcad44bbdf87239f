//! End-to-end correlation tests over real WebSocket connections.

use std::net::{IpAddr, Ipv4Addr};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use waitsock::{Error, Session, SessionServer, WsServerEngine};

/// Binds a server that answers every request with its own payload.
async fn spawn_echo_server() -> String {
    let server = waitsock::listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
        .await
        .expect("listen should succeed");
    let url = server.ws_url();

    tokio::spawn(async move {
        while let Ok(session) = server.accept().await {
            let mut messages = session.messages().expect("fresh session");
            tokio::spawn(async move {
                while let Some(request) = messages.recv().await {
                    let _ = request.send_no_reply(request.to_value()).await;
                }
            });
        }
    });

    url
}

#[tokio::test]
async fn test_request_reply_round_trip() {
    let url = spawn_echo_server().await;
    let session = waitsock::connect(&url).await.expect("connect");

    let reply = session
        .send(json!({ "test": true }))
        .await
        .expect("reply arrives");

    assert!(reply.get_bool("test"));
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_sequential_requests_on_one_session() {
    let url = spawn_echo_server().await;
    let session = waitsock::connect(&url).await.expect("connect");

    for n in 0..10u64 {
        let reply = session.send(json!({ "n": n })).await.expect("reply");
        assert_eq!(reply.get_u64("n"), n);
    }
}

#[tokio::test]
async fn test_bidirectional_events() {
    let server = waitsock::listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
        .await
        .expect("listen should succeed");

    let client = waitsock::connect(&server.ws_url())
        .await
        .expect("connect should succeed");
    let session = server.accept().await.expect("accept should succeed");

    let mut server_to_client = client.subscribe("sc");
    let mut client_to_server = session.subscribe("cs");

    session
        .send_emit("sc", json!({ "payload": "down" }))
        .await
        .expect("server emit");
    client
        .send_emit("cs", json!({ "payload": "up" }))
        .await
        .expect("client emit");

    let event = server_to_client.recv().await.expect("event delivered");
    assert_eq!(event.event(), Some("sc"));
    assert_eq!(event.get_string("payload"), "down");

    let event = client_to_server.recv().await.expect("event delivered");
    assert_eq!(event.event(), Some("cs"));
    assert_eq!(event.get_string("payload"), "up");
}

#[tokio::test]
async fn test_server_initiated_request() {
    let server = waitsock::listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
        .await
        .expect("listen should succeed");

    let client = waitsock::connect(&server.ws_url())
        .await
        .expect("connect should succeed");
    let session = server.accept().await.expect("accept should succeed");

    // The client answers requests too; which side dialed does not matter
    let mut client_messages = client.messages().expect("lane available");
    let client_task = tokio::spawn(async move {
        let request = client_messages.recv().await.expect("request arrived");
        assert_eq!(request.get_string("op"), "ping");
        request
            .send_no_reply(json!({ "op": "pong" }))
            .await
            .expect("reply sent");
    });

    let reply = session.send(json!({ "op": "ping" })).await.expect("reply");
    assert_eq!(reply.get_string("op"), "pong");

    client_task.await.expect("client task");
}

#[tokio::test]
async fn test_many_clients_one_server() {
    let url = spawn_echo_server().await;

    let mut tasks = Vec::new();
    for n in 0..8u64 {
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let session = waitsock::connect(&url).await.expect("connect");
            let reply = session.send(json!({ "client": n })).await.expect("reply");
            assert_eq!(reply.get_u64("client"), n);
        }));
    }

    for task in tasks {
        task.await.expect("client task");
    }
}

#[tokio::test]
async fn test_undecodable_frames_do_not_kill_connection() {
    let url = spawn_echo_server().await;

    // Raw client: garbage first, then a well-formed request
    let (mut raw, _) = connect_async(&url).await.expect("connect");
    raw.send(Message::Text("this is not json".into()))
        .await
        .expect("garbage sent");
    raw.send(Message::Text("[1,2,3]".into()))
        .await
        .expect("non-object sent");
    raw.send(Message::Text(
        r#"{"op":"probe","waitId":"raw-1"}"#.into(),
    ))
    .await
    .expect("request sent");

    let frame = raw
        .next()
        .await
        .expect("reply frame")
        .expect("clean stream");
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };

    let reply: serde_json::Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(reply["waitId"], json!("raw-1"));
    assert_eq!(reply["op"], json!("probe"));
}

#[tokio::test]
async fn test_binary_frames_with_utf8_payload_decode() {
    let url = spawn_echo_server().await;

    let (mut raw, _) = connect_async(&url).await.expect("connect");
    let payload = br#"{"op":"binary","waitId":"bin-1"}"#.to_vec();
    raw.send(Message::Binary(payload.into()))
        .await
        .expect("binary sent");

    let frame = raw
        .next()
        .await
        .expect("reply frame")
        .expect("clean stream");
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };

    let reply: serde_json::Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(reply["waitId"], json!("bin-1"));
}

#[tokio::test]
async fn test_remote_disconnect_fails_pending_waits() {
    let server = waitsock::listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
        .await
        .expect("listen should succeed");

    let client = waitsock::connect(&server.ws_url())
        .await
        .expect("connect should succeed");
    let session = server.accept().await.expect("accept should succeed");
    let mut messages = session.messages().expect("lane available");

    let sender = client.clone();
    let inflight = tokio::spawn(async move { sender.send(json!({ "q": 1 })).await });

    // Hang up server-side after the request arrived, without answering
    messages.recv().await.expect("request arrived");
    session.close().await.expect("close");

    let err = inflight
        .await
        .expect("task")
        .expect_err("wait must fail when the peer hangs up");
    assert!(matches!(err, Error::ConnectionClosed));
}

#[tokio::test]
async fn test_session_server_with_custom_engine_type() {
    // SessionServer is generic; the WebSocket listener is just one engine
    let server: SessionServer<WsServerEngine> =
        SessionServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

    let client_session: Session = waitsock::connect(&server.ws_url())
        .await
        .expect("connect should succeed");

    let session = server.accept().await.expect("accept should succeed");
    assert!(session.is_open());
    assert!(client_session.is_open());
}
