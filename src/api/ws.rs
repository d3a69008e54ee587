//! WebSocket session handling
//!
//! An authenticated upgrade attaches `{claims, clientId}` to the socket
//! for its whole life; frame handling only ever consults that
//! attachment, never a shared map, so a resumed worker can pick the
//! socket back up cold. Frames are binary-only and tag-dispatched;
//! every protocol violation closes the socket with the matching code.

use crate::api::auth::Authed;
use crate::constants::{FRAME_SYNC_PULL, FRAME_SYNC_PUSH, MAX_DELTAS_PER_PUSH};
use crate::core::app_state::AppState;
use crate::delta::codec::{self, ClientFrame, SyncResponse};
use crate::gateway::{GatewaySession, SocketAttachment};
use crate::types::error::Error;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Close codes used by the session protocol.
mod close {
    /// Framing or protocol violation
    pub const PROTOCOL: u16 = 1002;
    /// Unsupported data type (text frames)
    pub const UNSUPPORTED: u16 = 1003;
    /// Policy violation (client mismatch, rejected push)
    pub const POLICY: u16 = 1008;
    /// Message too large
    pub const TOO_BIG: u16 = 1009;
}

/// What a frame handler wants done next.
enum FrameAction {
    /// Send a reply frame
    Reply(Bytes),
    /// Close the socket with a code and reason
    Close(u16, String),
}

/// `GET /v1/sync/:gatewayId/ws`
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Path(gateway_id): Path<String>,
    authed: Authed,
    upgrade: WebSocketUpgrade,
) -> Result<Response, crate::api::error::ApiError> {
    authed.require_gateway(&gateway_id)?;
    let session = state.registry.get_or_create(&gateway_id);
    Ok(upgrade.on_upgrade(move |socket| run_socket(session, authed, socket)))
}

/// Drive one attached socket until it closes.
async fn run_socket(session: Arc<GatewaySession>, authed: Authed, socket: WebSocket) {
    let attachment = SocketAttachment {
        client_id: Some(authed.0.client_id.clone()),
        claims: authed.0,
    };
    let (broadcast_tx, mut broadcast_rx) = mpsc::unbounded_channel::<Bytes>();
    let socket_id = session.accept_socket(attachment.clone(), broadcast_tx);

    let (sink, mut stream) = socket.split();
    let sink = Arc::new(Mutex::new(sink));

    // Forward broadcasts queued by peers onto the wire.
    let broadcast_sink = sink.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(frame) = broadcast_rx.recv().await {
            let mut sink = broadcast_sink.lock().await;
            if sink.send(Message::Binary(frame.to_vec())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(gateway = session.gateway_id(), %err, "socket read error");
                break;
            }
        };
        let action = match message {
            Message::Text(_) => Some(FrameAction::Close(
                close::UNSUPPORTED,
                "Binary frames only".to_string(),
            )),
            Message::Binary(frame) => {
                Some(handle_frame(&session, socket_id, &attachment, &frame).await)
            }
            Message::Close(_) => break,
            // Ping/pong are answered by the protocol layer.
            Message::Ping(_) | Message::Pong(_) => None,
        };
        match action {
            Some(FrameAction::Reply(frame)) => {
                let mut sink = sink.lock().await;
                if sink.send(Message::Binary(frame.to_vec())).await.is_err() {
                    break;
                }
            }
            Some(FrameAction::Close(code, reason)) => {
                let mut sink = sink.lock().await;
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: Cow::Owned(reason),
                    })))
                    .await;
                break;
            }
            None => {}
        }
    }

    forwarder.abort();
    session.remove_socket(socket_id);
}

/// Dispatch one binary frame.
async fn handle_frame(
    session: &Arc<GatewaySession>,
    socket_id: u64,
    attachment: &SocketAttachment,
    frame: &[u8],
) -> FrameAction {
    if frame.len() < 2 {
        return FrameAction::Close(close::PROTOCOL, "Message too short".to_string());
    }
    let tag = frame[0];
    let decoded = match codec::decode_client_frame(frame) {
        Ok(decoded) => decoded,
        Err(Error::PayloadTooLarge { .. }) => {
            return FrameAction::Close(close::TOO_BIG, "Message too large".to_string());
        }
        Err(err) => {
            let reason = match tag {
                FRAME_SYNC_PUSH | FRAME_SYNC_PULL => format!("Malformed frame: {err}"),
                other => format!("Unknown message tag: {other:#04x}"),
            };
            return FrameAction::Close(close::PROTOCOL, reason);
        }
    };

    match decoded {
        ClientFrame::Push(push) => {
            if Some(&push.client_id) != attachment.client_id.as_ref() {
                return FrameAction::Close(close::POLICY, "Client ID mismatch".to_string());
            }
            if push.deltas.len() > MAX_DELTAS_PER_PUSH {
                return FrameAction::Close(
                    close::POLICY,
                    format!("push exceeds {MAX_DELTAS_PER_PUSH} deltas"),
                );
            }
            let client_id = push.client_id.clone();
            let outcome = match session.handle_push(push).await {
                Ok(outcome) => outcome,
                Err(err) => return FrameAction::Close(close::POLICY, err.to_string()),
            };

            // Peers hear about the new deltas after the pusher gets its ack.
            if !outcome.deltas.is_empty() {
                let session = session.clone();
                let deltas = outcome.deltas.clone();
                let server_hlc = outcome.server_hlc;
                tokio::spawn(async move {
                    session
                        .broadcast(&deltas, server_hlc, Some(socket_id), Some(&client_id))
                        .await;
                });
            }

            match codec::encode_response(FRAME_SYNC_PUSH, &SyncResponse::ack(outcome.server_hlc)) {
                Ok(frame) => FrameAction::Reply(frame),
                Err(err) => {
                    warn!(gateway = session.gateway_id(), %err, "push ack encode failed");
                    FrameAction::Close(1011, "internal error".to_string())
                }
            }
        }
        ClientFrame::Pull(pull) => {
            let response = match session.handle_pull(pull, Some(&attachment.claims)).await {
                Ok(response) => response,
                Err(err) => return FrameAction::Close(close::POLICY, err.to_string()),
            };
            match codec::encode_response(FRAME_SYNC_PULL, &response) {
                Ok(frame) => FrameAction::Reply(frame),
                Err(err) => {
                    warn!(gateway = session.gateway_id(), %err, "pull reply encode failed");
                    FrameAction::Close(1011, "internal error".to_string())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferLimits;
    use crate::clock::Hlc;
    use crate::constants::{DEFAULT_MAX_BUFFER_AGE_MS, DEFAULT_MAX_BUFFER_BYTES};
    use crate::delta::codec::{encode_frame, SyncPush};
    use crate::storage::MemoryStore;
    use crate::system::usage::UsageSink;
    use crate::types::claims::ResolvedClaims;
    use crate::types::delta::{ColumnDelta, DeltaOp, RowDelta};
    use serde_json::{Map, Value};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn session() -> Arc<GatewaySession> {
        GatewaySession::spawn(
            "gw-ws",
            Arc::new(MemoryStore::new()),
            Arc::new(UsageSink::new(64)),
            BufferLimits {
                max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
                max_buffer_age_ms: DEFAULT_MAX_BUFFER_AGE_MS,
                max_log_size: MAX_DELTAS_PER_PUSH,
                high_watermark_bytes: DEFAULT_MAX_BUFFER_BYTES,
            },
        )
    }

    fn attachment(client: &str) -> SocketAttachment {
        let mut custom = Map::new();
        custom.insert("sub".into(), Value::String(client.into()));
        SocketAttachment {
            claims: ResolvedClaims {
                client_id: client.into(),
                gateway_id: "gw-ws".into(),
                role: "client".into(),
                custom_claims: custom,
            },
            client_id: Some(client.into()),
        }
    }

    fn wall_hlc() -> Hlc {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        Hlc::encode(now, 0)
    }

    fn push_frame(client: &str) -> Vec<u8> {
        let push = SyncPush {
            client_id: client.into(),
            deltas: vec![RowDelta::new(
                DeltaOp::Insert,
                "tasks",
                "r1",
                client,
                vec![ColumnDelta { column: "x".into(), value: Value::Null }],
                wall_hlc(),
            )],
            last_seen_hlc: Hlc::ZERO,
        };
        encode_frame(FRAME_SYNC_PUSH, &push).unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_short_frame_closes_1002() {
        let session = session();
        match handle_frame(&session, 1, &attachment("c1"), &[0x01]).await {
            FrameAction::Close(code, reason) => {
                assert_eq!(code, 1002);
                assert_eq!(reason, "Message too short");
            }
            FrameAction::Reply(_) => panic!("expected close"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tag_closes_1002_with_hex() {
        let session = session();
        match handle_frame(&session, 1, &attachment("c1"), &[0x7f, 0, 0, 0, 0]).await {
            FrameAction::Close(code, reason) => {
                assert_eq!(code, 1002);
                assert!(reason.contains("0x7f"), "{reason}");
            }
            FrameAction::Reply(_) => panic!("expected close"),
        }
    }

    #[tokio::test]
    async fn test_client_mismatch_closes_1008() {
        let session = session();
        let frame = push_frame("other");
        match handle_frame(&session, 1, &attachment("c1"), &frame).await {
            FrameAction::Close(code, reason) => {
                assert_eq!(code, 1008);
                assert_eq!(reason, "Client ID mismatch");
            }
            FrameAction::Reply(_) => panic!("expected close"),
        }
    }

    #[tokio::test]
    async fn test_push_replies_with_ack() {
        let session = session();
        let frame = push_frame("c1");
        match handle_frame(&session, 1, &attachment("c1"), &frame).await {
            FrameAction::Reply(reply) => {
                assert_eq!(reply[0], FRAME_SYNC_PUSH);
                let ack: SyncResponse = crate::delta::codec::decode_body(&reply[1..]).unwrap();
                assert!(ack.deltas.is_empty());
                assert!(ack.server_hlc > Hlc::ZERO);
            }
            FrameAction::Close(code, reason) => panic!("unexpected close {code}: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_pull_replies_with_buffered_deltas() {
        let session = session();
        let push = push_frame("c1");
        handle_frame(&session, 1, &attachment("c1"), &push).await;

        let pull = crate::delta::codec::SyncPull {
            client_id: "c2".into(),
            since_hlc: Hlc::ZERO,
            max_deltas: None,
        };
        let frame = encode_frame(FRAME_SYNC_PULL, &pull).unwrap();
        match handle_frame(&session, 2, &attachment("c2"), &frame).await {
            FrameAction::Reply(reply) => {
                assert_eq!(reply[0], FRAME_SYNC_PULL);
                let response: SyncResponse =
                    crate::delta::codec::decode_body(&reply[1..]).unwrap();
                assert_eq!(response.deltas.len(), 1);
            }
            FrameAction::Close(code, reason) => panic!("unexpected close {code}: {reason}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_push_body_closes() {
        let session = session();
        let mut frame = vec![FRAME_SYNC_PUSH];
        frame.extend_from_slice(&[0, 0, 0, 3, 1, 2, 3]);
        match handle_frame(&session, 1, &attachment("c1"), &frame).await {
            FrameAction::Close(code, _) => assert_eq!(code, 1002),
            FrameAction::Reply(_) => panic!("expected close"),
        }
    }

    #[tokio::test]
    async fn test_oversized_push_frame_closes_1009() {
        use crate::constants::MAX_PUSH_PAYLOAD_BYTES;
        let session = session();
        let push = SyncPush {
            client_id: "x".repeat(MAX_PUSH_PAYLOAD_BYTES + 1),
            deltas: vec![],
            last_seen_hlc: Hlc::ZERO,
        };
        let frame = encode_frame(FRAME_SYNC_PUSH, &push).unwrap();
        match handle_frame(&session, 1, &attachment("c1"), &frame).await {
            FrameAction::Close(code, reason) => {
                assert_eq!(code, 1009);
                assert_eq!(reason, "Message too large");
            }
            FrameAction::Reply(_) => panic!("expected close"),
        }
    }

    #[tokio::test]
    async fn test_oversized_pull_frame_is_served() {
        use crate::constants::MAX_PUSH_PAYLOAD_BYTES;
        let session = session();
        // The size ceiling applies to pushes only; a bulky pull decodes
        // and gets its reply.
        let pull = crate::delta::codec::SyncPull {
            client_id: "x".repeat(MAX_PUSH_PAYLOAD_BYTES + 1),
            since_hlc: Hlc::ZERO,
            max_deltas: None,
        };
        let frame = encode_frame(FRAME_SYNC_PULL, &pull).unwrap();
        match handle_frame(&session, 1, &attachment("c1"), &frame).await {
            FrameAction::Reply(reply) => assert_eq!(reply[0], FRAME_SYNC_PULL),
            FrameAction::Close(code, reason) => panic!("unexpected close {code}: {reason}"),
        }
    }
}
