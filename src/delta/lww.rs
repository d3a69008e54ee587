//! Column-level Last-Write-Wins conflict resolution
//!
//! Two deltas for the same row key are merged into one. The HLC picks
//! the winning side, with the lexicographically greater client id
//! breaking exact ties, so the outcome depends on the pair and never on
//! argument order.

use crate::types::delta::{ColumnDelta, DeltaOp, RowDelta};
use crate::types::error::{Error, Result};

/// Which argument of a resolve call won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The first argument
    Local,
    /// The second argument
    Remote,
}

/// Pick the winning side of a conflicting pair.
pub fn pick_winner(local: &RowDelta, remote: &RowDelta) -> Winner {
    if local.hlc != remote.hlc {
        if local.hlc > remote.hlc {
            Winner::Local
        } else {
            Winner::Remote
        }
    } else if local.client_id >= remote.client_id {
        Winner::Local
    } else {
        Winner::Remote
    }
}

/// Merge two deltas for the same row key.
///
/// Tombstones are sticky: when the winning side is a DELETE, the merge
/// is a DELETE regardless of the loser's columns. A losing DELETE is
/// resurrected over by the winning write. When neither side deletes,
/// columns merge per-name with the winner taking contested names; the
/// winner also donates `clientId`, `hlc` and `deltaId`.
pub fn resolve(local: &RowDelta, remote: &RowDelta) -> Result<RowDelta> {
    if local.table != remote.table || local.row_id != remote.row_id {
        return Err(Error::conflict(format!(
            "cannot resolve deltas across rows: {}/{} vs {}/{}",
            local.table, local.row_id, remote.table, remote.row_id
        )));
    }

    let (winner, loser) = match pick_winner(local, remote) {
        Winner::Local => (local, remote),
        Winner::Remote => (remote, local),
    };

    // Tombstone wins outright; a losing tombstone is overwritten whole.
    if winner.op == DeltaOp::Delete {
        return Ok(RowDelta {
            columns: Vec::new(),
            ..winner.clone()
        });
    }
    if loser.op == DeltaOp::Delete {
        return Ok(winner.clone());
    }

    let mut columns: Vec<ColumnDelta> = winner.columns.clone();
    for column in &loser.columns {
        if !columns.iter().any(|c| c.column == column.column) {
            columns.push(column.clone());
        }
    }

    let op = if winner.op == DeltaOp::Insert && loser.op == DeltaOp::Insert {
        DeltaOp::Insert
    } else {
        DeltaOp::Update
    };

    Ok(RowDelta {
        op,
        columns,
        ..winner.clone()
    })
}
