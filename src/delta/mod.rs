//! Delta processing: wire codec and conflict resolution

/// Binary wire codec for sync messages
pub mod codec;

/// Column-level Last-Write-Wins merge
pub mod lww;

pub use codec::{BroadcastMessage, ClientFrame, SyncPull, SyncPush, SyncResponse};
pub use lww::{pick_winner, resolve, Winner};
