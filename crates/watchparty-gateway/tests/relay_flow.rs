//! Integration tests for room pairing and relay routing.
//!
//! Tests the following:
//! - Full create/join/offer/answer exchange
//! - Join failures (unknown room, sealed room)
//! - At most one winner when joins race on the same room
//! - Per-sender ordering of forwarded messages

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use watchparty_common::{CandidateRole, ClientMessage, ServerMessage};
use watchparty_gateway::{Envelope, ParticipantId, SignalRelay, Signaler};

async fn connect(relay: &SignalRelay) -> (ParticipantId, mpsc::Receiver<ServerMessage>) {
    let id = ParticipantId::new();
    let (tx, rx) = mpsc::channel(64);
    relay.connect(id, Signaler::new(tx)).await;
    (id, rx)
}

async fn send(relay: &SignalRelay, sender: ParticipantId, message: ClientMessage) {
    relay.handle(Envelope::new(sender, message)).await;
}

fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

#[tokio::test]
async fn test_end_to_end_pairing_and_negotiation() {
    let relay = SignalRelay::default();
    let (x, mut x_rx) = connect(&relay).await;
    let (y, mut y_rx) = connect(&relay).await;

    send(&relay, x, ClientMessage::CreateRoom { name: Some("X".into()) }).await;
    assert_eq!(
        drain(&mut x_rx),
        vec![ServerMessage::RoomCreated { room_id: "1".into() }]
    );

    send(
        &relay,
        y,
        ClientMessage::JoinRoom {
            room_id: "1".into(),
            name: Some("Y".into()),
        },
    )
    .await;
    assert_eq!(
        drain(&mut x_rx),
        vec![
            ServerMessage::UserJoined { room_id: "1".into() },
            ServerMessage::SendOffer { room_id: "1".into() },
        ]
    );
    assert_eq!(
        drain(&mut y_rx),
        vec![ServerMessage::UserJoined { room_id: "1".into() }]
    );

    let offer = json!({ "type": "offer", "sdp": "O" });
    send(
        &relay,
        x,
        ClientMessage::Offer {
            sdp: offer.clone(),
            room_id: "1".into(),
        },
    )
    .await;
    assert_eq!(
        drain(&mut y_rx),
        vec![ServerMessage::Offer {
            sdp: offer,
            room_id: "1".into()
        }]
    );

    let answer = json!({ "type": "answer", "sdp": "A" });
    send(
        &relay,
        y,
        ClientMessage::Answer {
            sdp: answer.clone(),
            room_id: "1".into(),
        },
    )
    .await;
    assert_eq!(
        drain(&mut x_rx),
        vec![ServerMessage::Answer {
            sdp: answer,
            room_id: "1".into()
        }]
    );
    assert!(drain(&mut y_rx).is_empty());
}

#[tokio::test]
async fn test_join_nonexistent_room_reports_error() {
    let relay = SignalRelay::default();
    let (z, mut z_rx) = connect(&relay).await;

    send(
        &relay,
        z,
        ClientMessage::JoinRoom {
            room_id: "999".into(),
            name: Some("Z".into()),
        },
    )
    .await;

    assert_eq!(drain(&mut z_rx), vec![ServerMessage::join_error()]);
    assert_eq!(relay.session_count().await, 0);
}

#[tokio::test]
async fn test_third_participant_cannot_join_sealed_room() {
    let relay = SignalRelay::default();
    let (x, mut x_rx) = connect(&relay).await;
    let (y, mut y_rx) = connect(&relay).await;
    let (w, mut w_rx) = connect(&relay).await;

    send(&relay, x, ClientMessage::CreateRoom { name: None }).await;
    send(
        &relay,
        y,
        ClientMessage::JoinRoom {
            room_id: "1".into(),
            name: None,
        },
    )
    .await;
    drain(&mut x_rx);
    drain(&mut y_rx);

    send(
        &relay,
        w,
        ClientMessage::JoinRoom {
            room_id: "1".into(),
            name: Some("W".into()),
        },
    )
    .await;
    assert_eq!(drain(&mut w_rx), vec![ServerMessage::join_error()]);
    assert!(drain(&mut x_rx).is_empty());
    assert!(drain(&mut y_rx).is_empty());

    // Existing pair still routes to each other.
    send(
        &relay,
        y,
        ClientMessage::ScreenShareStatus {
            is_sharing: true,
            room_id: "1".into(),
        },
    )
    .await;
    assert_eq!(
        drain(&mut x_rx),
        vec![ServerMessage::ScreenShareStatus { is_sharing: true }]
    );
    assert!(drain(&mut w_rx).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_have_one_winner() {
    for _ in 0..32 {
        let relay = Arc::new(SignalRelay::default());
        let (creator, _creator_rx) = connect(&relay).await;
        send(&relay, creator, ClientMessage::CreateRoom { name: None }).await;

        let mut joiners = Vec::new();
        for _ in 0..2 {
            joiners.push(connect(&relay).await);
        }

        let handles: Vec<_> = joiners
            .iter()
            .map(|(id, _)| {
                let relay = relay.clone();
                let id = *id;
                tokio::spawn(async move {
                    relay
                        .handle(Envelope::new(
                            id,
                            ClientMessage::JoinRoom {
                                room_id: "1".into(),
                                name: None,
                            },
                        ))
                        .await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut winners = 0;
        let mut losers = 0;
        for (_, rx) in joiners.iter_mut() {
            match drain(rx).as_slice() {
                [ServerMessage::UserJoined { .. }] => winners += 1,
                [ServerMessage::RoomJoinError { .. }] => losers += 1,
                other => panic!("unexpected replies: {other:?}"),
            }
        }
        assert_eq!((winners, losers), (1, 1));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_get_distinct_ids() {
    let relay = Arc::new(SignalRelay::default());
    let mut participants = Vec::new();
    for _ in 0..16 {
        participants.push(connect(&relay).await);
    }

    let handles: Vec<_> = participants
        .iter()
        .map(|(id, _)| {
            let relay = relay.clone();
            let id = *id;
            tokio::spawn(async move {
                relay
                    .handle(Envelope::new(id, ClientMessage::CreateRoom { name: None }))
                    .await;
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut ids = Vec::new();
    for (_, rx) in participants.iter_mut() {
        match drain(rx).as_slice() {
            [ServerMessage::RoomCreated { room_id }] => ids.push(room_id.clone()),
            other => panic!("unexpected replies: {other:?}"),
        }
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16);
}

#[tokio::test]
async fn test_forwarding_preserves_sender_order() {
    let relay = SignalRelay::default();
    let (x, mut x_rx) = connect(&relay).await;
    let (y, mut y_rx) = connect(&relay).await;
    send(&relay, x, ClientMessage::CreateRoom { name: None }).await;
    send(
        &relay,
        y,
        ClientMessage::JoinRoom {
            room_id: "1".into(),
            name: None,
        },
    )
    .await;
    drain(&mut x_rx);
    drain(&mut y_rx);

    for i in 0..10 {
        send(
            &relay,
            x,
            ClientMessage::AddIceCandidate {
                candidate: json!({ "candidate": format!("candidate:{i}") }),
                room_id: "1".into(),
                role: CandidateRole::Sender,
            },
        )
        .await;
    }

    let received: Vec<String> = drain(&mut y_rx)
        .into_iter()
        .map(|message| match message {
            ServerMessage::AddIceCandidate { candidate, role } => {
                assert_eq!(role, CandidateRole::Sender);
                candidate["candidate"].as_str().unwrap().to_string()
            }
            other => panic!("unexpected message: {other:?}"),
        })
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("candidate:{i}")).collect();
    assert_eq!(received, expected);
    assert!(drain(&mut x_rx).is_empty());
}
