//! Self-describing columnar flush files
//!
//! Layout: a four-byte magic, a length-prefixed JSON header carrying
//! the row count, the cached table schema and the data-column list,
//! then column-major payloads. Row identity columns (op, table, rowId,
//! clientId, deltaId, hlc) are always present; each data column carries
//! a presence bitmap followed by JSON-encoded values, so a column a
//! delta never touched reads back as absent rather than null.
//!
//! The file restores the exact delta list: operations, HLCs and delta
//! ids are stored verbatim, never recomputed on read.

use crate::clock::Hlc;
use crate::types::delta::{ColumnDelta, DeltaOp, RowDelta};
use crate::types::error::{Error, Result};
use crate::types::schema::TableSchema;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// File extension for columnar flush files.
pub const EXT: &str = "col";

/// Content type advertised on put.
pub const CONTENT_TYPE: &str = "application/x-lakegate-columnar";

const MAGIC: &[u8; 4] = b"LGF1";

#[derive(Debug, Serialize, Deserialize)]
struct FileHeader {
    count: u32,
    schema: TableSchema,
    data_columns: Vec<String>,
}

/// Serialise a delta snapshot into a columnar file.
pub fn encode(deltas: &[RowDelta], schema: &TableSchema) -> Result<Bytes> {
    let count = deltas.len() as u32;
    let mut data_columns: Vec<String> = Vec::new();
    for delta in deltas {
        for column in &delta.columns {
            if !data_columns.contains(&column.column) {
                data_columns.push(column.column.clone());
            }
        }
    }

    let header = FileHeader {
        count,
        schema: schema.clone(),
        data_columns: data_columns.clone(),
    };
    let header_json = serde_json::to_vec(&header)?;

    let mut buf = BytesMut::with_capacity(header_json.len() + deltas.len() * 128 + 64);
    buf.put_slice(MAGIC);
    buf.put_u32(header_json.len() as u32);
    buf.put_slice(&header_json);

    for delta in deltas {
        buf.put_u8(op_code(delta.op));
    }
    let string_columns: [fn(&RowDelta) -> &str; 4] = [
        |d| d.table.as_str(),
        |d| d.row_id.as_str(),
        |d| d.client_id.as_str(),
        |d| d.delta_id.as_str(),
    ];
    for accessor in string_columns {
        for delta in deltas {
            put_str(&mut buf, accessor(delta));
        }
    }
    for delta in deltas {
        buf.put_u64(delta.hlc.as_u64());
    }

    for column in &data_columns {
        let mut bitmap = vec![0u8; deltas.len().div_ceil(8)];
        for (i, delta) in deltas.iter().enumerate() {
            if delta.column_value(column).is_some() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.put_slice(&bitmap);
        for delta in deltas {
            if let Some(value) = delta.column_value(column) {
                let encoded = serde_json::to_vec(value)?;
                buf.put_u32(encoded.len() as u32);
                buf.put_slice(&encoded);
            }
        }
    }

    Ok(buf.freeze())
}

/// Restore the delta list from a columnar file.
pub fn decode(bytes: &[u8]) -> Result<(Vec<RowDelta>, TableSchema)> {
    let mut buf = bytes;
    if buf.remaining() < MAGIC.len() + 4 || &buf.chunk()[..MAGIC.len()] != MAGIC {
        return Err(Error::protocol("not a columnar flush file"));
    }
    buf.advance(MAGIC.len());
    let header_len = buf.get_u32() as usize;
    if buf.remaining() < header_len {
        return Err(Error::protocol("columnar header truncated"));
    }
    let header: FileHeader = serde_json::from_slice(&buf.chunk()[..header_len])?;
    buf.advance(header_len);
    let count = header.count as usize;

    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        ensure(buf.remaining() >= 1)?;
        ops.push(decode_op(buf.get_u8())?);
    }
    let tables = get_str_column(&mut buf, count)?;
    let row_ids = get_str_column(&mut buf, count)?;
    let client_ids = get_str_column(&mut buf, count)?;
    let delta_ids = get_str_column(&mut buf, count)?;
    let mut hlcs = Vec::with_capacity(count);
    for _ in 0..count {
        ensure(buf.remaining() >= 8)?;
        hlcs.push(Hlc::from_u64(buf.get_u64()));
    }

    let mut columns: Vec<Vec<ColumnDelta>> = vec![Vec::new(); count];
    for name in &header.data_columns {
        let bitmap_len = count.div_ceil(8);
        ensure(buf.remaining() >= bitmap_len)?;
        let bitmap = buf.chunk()[..bitmap_len].to_vec();
        buf.advance(bitmap_len);
        for (i, row) in columns.iter_mut().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                ensure(buf.remaining() >= 4)?;
                let len = buf.get_u32() as usize;
                ensure(buf.remaining() >= len)?;
                let value = serde_json::from_slice(&buf.chunk()[..len])?;
                buf.advance(len);
                row.push(ColumnDelta { column: name.clone(), value });
            }
        }
    }

    let deltas = (0..count)
        .map(|i| RowDelta {
            op: ops[i],
            table: tables[i].clone(),
            row_id: row_ids[i].clone(),
            client_id: client_ids[i].clone(),
            columns: std::mem::take(&mut columns[i]),
            hlc: hlcs[i],
            delta_id: delta_ids[i].clone(),
        })
        .collect();

    Ok((deltas, header.schema))
}

fn op_code(op: DeltaOp) -> u8 {
    match op {
        DeltaOp::Insert => 0,
        DeltaOp::Update => 1,
        DeltaOp::Delete => 2,
    }
}

fn decode_op(code: u8) -> Result<DeltaOp> {
    match code {
        0 => Ok(DeltaOp::Insert),
        1 => Ok(DeltaOp::Update),
        2 => Ok(DeltaOp::Delete),
        other => Err(Error::protocol(format!("unknown op code {other}"))),
    }
}

fn put_str(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn get_str_column(buf: &mut &[u8], count: usize) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        ensure(buf.remaining() >= 4)?;
        let len = buf.get_u32() as usize;
        ensure(buf.remaining() >= len)?;
        let value = std::str::from_utf8(&buf.chunk()[..len])
            .map_err(|_| Error::protocol("invalid UTF-8 in columnar string"))?
            .to_string();
        buf.advance(len);
        out.push(value);
    }
    Ok(out)
}

fn ensure(ok: bool) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::protocol("columnar file truncated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::schema::{ColumnSchema, ColumnType};
    use serde_json::Value;

    fn schema() -> TableSchema {
        TableSchema {
            table: "tasks".into(),
            columns: vec![
                ColumnSchema { name: "title".into(), column_type: ColumnType::String },
                ColumnSchema { name: "done".into(), column_type: ColumnType::Boolean },
            ],
        }
    }

    fn deltas() -> Vec<RowDelta> {
        vec![
            RowDelta::new(
                DeltaOp::Insert,
                "tasks",
                "r1",
                "c1",
                vec![
                    ColumnDelta { column: "title".into(), value: Value::String("A".into()) },
                    ColumnDelta { column: "done".into(), value: Value::Bool(false) },
                ],
                Hlc::from_u64(100),
            ),
            RowDelta::new(
                DeltaOp::Update,
                "tasks",
                "r2",
                "c2",
                vec![ColumnDelta { column: "title".into(), value: Value::String("B".into()) }],
                Hlc::from_u64(200),
            ),
            RowDelta::new(DeltaOp::Delete, "tasks", "r3", "c1", vec![], Hlc::from_u64(300)),
        ]
    }

    #[test]
    fn test_roundtrip_restores_exact_deltas() {
        let original = deltas();
        let bytes = encode(&original, &schema()).unwrap();
        let (restored, restored_schema) = decode(&bytes).unwrap();
        assert_eq!(restored, original);
        assert_eq!(restored_schema, schema());
    }

    #[test]
    fn test_absent_column_is_absent_not_null() {
        let bytes = encode(&deltas(), &schema()).unwrap();
        let (restored, _) = decode(&bytes).unwrap();
        // r2 never touched "done"; r3 is a tombstone with no columns.
        assert!(restored[1].column_value("done").is_none());
        assert!(restored[2].columns.is_empty());
    }

    #[test]
    fn test_explicit_null_survives() {
        let schema = schema();
        let original = vec![RowDelta::new(
            DeltaOp::Update,
            "tasks",
            "r9",
            "c1",
            vec![ColumnDelta { column: "title".into(), value: Value::Null }],
            Hlc::from_u64(50),
        )];
        let bytes = encode(&original, &schema).unwrap();
        let (restored, _) = decode(&bytes).unwrap();
        assert_eq!(restored[0].column_value("title"), Some(&Value::Null));
    }

    #[test]
    fn test_bad_magic_rejected() {
        assert!(decode(b"nope").is_err());
        assert!(decode(b"").is_err());
    }

    #[test]
    fn test_truncated_file_rejected() {
        let bytes = encode(&deltas(), &schema()).unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(decode(truncated).is_err());
    }

    #[test]
    fn test_empty_snapshot() {
        let bytes = encode(&[], &schema()).unwrap();
        let (restored, _) = decode(&bytes).unwrap();
        assert!(restored.is_empty());
    }
}
