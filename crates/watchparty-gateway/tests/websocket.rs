//! Integration tests for the WebSocket endpoint against a live gateway.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use watchparty_gateway::{GatewayConfig, GatewayState};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_gateway() -> (SocketAddr, GatewayState) {
    let (app, state) = watchparty_gateway::app(&GatewayConfig::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, state)
}

async fn open(addr: SocketAddr) -> Socket {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn emit(ws: &mut Socket, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn next_event(ws: &mut Socket) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for gateway")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut Socket) {
    let result = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

#[tokio::test]
async fn test_pair_and_relay_over_websocket() {
    let (addr, _state) = spawn_gateway().await;
    let mut x = open(addr).await;
    let mut y = open(addr).await;

    emit(&mut x, json!({ "event": "create-room", "data": { "name": "X" } })).await;
    let created = next_event(&mut x).await;
    assert_eq!(created, json!({ "event": "room-created", "data": { "roomId": "1" } }));

    emit(
        &mut y,
        json!({ "event": "join-room", "data": { "roomId": "1", "name": "Y" } }),
    )
    .await;
    assert_eq!(
        next_event(&mut x).await,
        json!({ "event": "user-joined", "data": { "roomId": "1" } })
    );
    assert_eq!(
        next_event(&mut x).await,
        json!({ "event": "send-offer", "data": { "roomId": "1" } })
    );
    assert_eq!(
        next_event(&mut y).await,
        json!({ "event": "user-joined", "data": { "roomId": "1" } })
    );

    let sdp = json!({ "type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n" });
    emit(
        &mut x,
        json!({ "event": "offer", "data": { "sdp": sdp, "roomId": "1" } }),
    )
    .await;
    assert_eq!(
        next_event(&mut y).await,
        json!({ "event": "offer", "data": { "sdp": sdp, "roomId": "1" } })
    );

    emit(
        &mut y,
        json!({
            "event": "add-ice-candidate",
            "data": { "candidate": { "candidate": "c1", "sdpMid": "0" }, "roomId": "1", "type": "receiver" }
        }),
    )
    .await;
    assert_eq!(
        next_event(&mut x).await,
        json!({
            "event": "add-ice-candidate",
            "data": { "candidate": { "candidate": "c1", "sdpMid": "0" }, "type": "receiver" }
        })
    );
    assert_silent(&mut y).await;
}

#[tokio::test]
async fn test_malformed_frames_do_not_close_connection() {
    let (addr, _state) = spawn_gateway().await;
    let mut z = open(addr).await;

    z.send(Message::Text("{not json".into())).await.unwrap();
    emit(&mut z, json!({ "event": "lobby", "data": {} })).await;

    // A malformed join still gets a user-visible error.
    emit(
        &mut z,
        json!({ "event": "join-room", "data": { "roomId": 999 } }),
    )
    .await;
    assert_eq!(
        next_event(&mut z).await,
        json!({ "event": "room-join-error", "data": { "message": "Room not found or full" } })
    );

    emit(&mut z, json!({ "event": "create-room", "data": {} })).await;
    assert_eq!(next_event(&mut z).await["event"], "room-created");
}

#[tokio::test]
async fn test_disconnect_reclaims_rooms() {
    let (addr, state) = spawn_gateway().await;
    let mut x = open(addr).await;
    let mut y = open(addr).await;

    emit(&mut x, json!({ "event": "create-room", "data": {} })).await;
    next_event(&mut x).await;
    emit(&mut y, json!({ "event": "join-room", "data": { "roomId": "1" } })).await;
    next_event(&mut y).await;
    assert_eq!(state.relay.session_count().await, 1);

    x.close(None).await.unwrap();
    y.close(None).await.unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            if state.relay.session_count().await == 0 && state.active_connections() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("rooms were not reclaimed");
    assert_eq!(state.relay.participant_count().await, 0);
}
