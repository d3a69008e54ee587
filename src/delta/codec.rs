//! Binary wire codec for sync messages
//!
//! Client frames open with a tag byte (`0x01` push, `0x02` pull, `0x03`
//! broadcast) followed by a length-prefixed MessagePack body carrying
//! the same field set as the JSON dialect. Server replies reuse the tag
//! of the request they answer; broadcasts always carry `0x03`.
//! Checkpoint chunks over HTTP are the bare length-prefixed
//! `SyncResponse` body with no tag.

use crate::clock::Hlc;
use crate::constants::{FRAME_BROADCAST, FRAME_SYNC_PULL, FRAME_SYNC_PUSH, MAX_PUSH_PAYLOAD_BYTES};
use crate::types::delta::RowDelta;
use crate::types::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A client push: deltas to ingest plus the highest HLC the client has seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPush {
    /// Pushing client
    pub client_id: String,
    /// Deltas in client order
    pub deltas: Vec<RowDelta>,
    /// Highest server HLC the client has observed
    #[serde(default)]
    pub last_seen_hlc: Hlc,
}

/// A client pull: request for deltas newer than a watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPull {
    /// Pulling client
    pub client_id: String,
    /// Exclusive lower bound on returned HLCs
    #[serde(default)]
    pub since_hlc: Hlc,
    /// Requested maximum number of deltas
    #[serde(default)]
    pub max_deltas: Option<usize>,
}

/// Server answer to a push or pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Deltas in ascending HLC order (empty for push acks)
    pub deltas: Vec<RowDelta>,
    /// Fresh server HLC observation
    pub server_hlc: Hlc,
    /// Whether more deltas matched beyond the cap
    #[serde(default)]
    pub has_more: bool,
}

/// Server-initiated fan-out of freshly ingested peer deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    /// Deltas already filtered for the receiving session
    pub deltas: Vec<RowDelta>,
    /// Server HLC at broadcast time
    pub server_hlc: Hlc,
}

/// Tagged client frame after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// `0x01`
    Push(SyncPush),
    /// `0x02`
    Pull(SyncPull),
}

/// Serialise a message body: u32 big-endian length + named MessagePack.
pub fn encode_body<T: Serialize>(message: &T) -> Result<Bytes> {
    let body = rmp_serde::to_vec_named(message)?;
    let mut buf = BytesMut::with_capacity(body.len() + 4);
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Decode a length-prefixed body produced by [`encode_body`].
pub fn decode_body<T: DeserializeOwned>(mut bytes: &[u8]) -> Result<T> {
    if bytes.len() < 4 {
        return Err(Error::protocol("body shorter than its length prefix"));
    }
    let declared = bytes.get_u32() as usize;
    if declared != bytes.remaining() {
        return Err(Error::protocol(format!(
            "body length prefix {} does not match payload of {} bytes",
            declared,
            bytes.remaining()
        )));
    }
    Ok(rmp_serde::from_slice(bytes.chunk())?)
}

/// Assemble a tagged frame.
pub fn encode_frame<T: Serialize>(tag: u8, message: &T) -> Result<Bytes> {
    let body = encode_body(message)?;
    let mut buf = BytesMut::with_capacity(body.len() + 1);
    buf.put_u8(tag);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Frame a push acknowledgement or pull result with the request's tag.
pub fn encode_response(tag: u8, response: &SyncResponse) -> Result<Bytes> {
    encode_frame(tag, response)
}

/// Frame a broadcast for WebSocket fan-out.
pub fn encode_broadcast(message: &BroadcastMessage) -> Result<Bytes> {
    encode_frame(FRAME_BROADCAST, message)
}

/// Split a raw frame into tag and body bytes.
///
/// Only rejects frames too short to carry a tag at all; per-tag policy
/// (the push body ceiling) lives in [`decode_client_frame`].
pub fn split_frame(bytes: &[u8]) -> Result<(u8, &[u8])> {
    if bytes.len() < 2 {
        return Err(Error::protocol("Message too short"));
    }
    Ok((bytes[0], &bytes[1..]))
}

/// Decode a tagged client frame.
///
/// Only push bodies carry a size ceiling; pulls decode whatever they
/// were framed with.
pub fn decode_client_frame(bytes: &[u8]) -> Result<ClientFrame> {
    let (tag, body) = split_frame(bytes)?;
    match tag {
        FRAME_SYNC_PUSH => {
            if body.len() > MAX_PUSH_PAYLOAD_BYTES + 4 {
                return Err(Error::PayloadTooLarge {
                    size: body.len().saturating_sub(4),
                    max: MAX_PUSH_PAYLOAD_BYTES,
                });
            }
            Ok(ClientFrame::Push(decode_body(body)?))
        }
        FRAME_SYNC_PULL => Ok(ClientFrame::Pull(decode_body(body)?)),
        other => Err(Error::protocol(format!("Unknown message tag: {other:#04x}"))),
    }
}

impl SyncResponse {
    /// An empty acknowledgement carrying only a server HLC.
    pub fn ack(server_hlc: Hlc) -> Self {
        Self { deltas: Vec::new(), server_hlc, has_more: false }
    }
}
