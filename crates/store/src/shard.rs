//! Shard encoding
//!
//! A shard is one Arrow IPC stream holding up to `SHARD_SIZE` rows of a
//! snapshot. The IPC stream framing opens with the continuation marker
//! `0xFFFFFFFF`; freeze's soft validity probe checks those four bytes
//! without decoding the stream.

use arrow::array::RecordBatch;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use cleanslate_core::{CoreError, Result, SnapshotId};
use std::io::Cursor;

/// The 4-byte continuation marker that opens an IPC stream
pub const IPC_CONTINUATION: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Encode one batch as an IPC stream
pub fn encode_ipc(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut bytes, batch.schema().as_ref())
            .map_err(|e| CoreError::serialization(format!("ipc writer: {e}")))?;
        writer
            .write(batch)
            .map_err(|e| CoreError::serialization(format!("ipc write: {e}")))?;
        writer
            .finish()
            .map_err(|e| CoreError::serialization(format!("ipc finish: {e}")))?;
    }
    Ok(bytes)
}

/// Decode every batch of an IPC stream
pub fn decode_ipc(id: &SnapshotId, bytes: &[u8]) -> Result<Vec<RecordBatch>> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)
        .map_err(|e| CoreError::corrupt(id.clone(), format!("ipc stream header: {e}")))?;
    let mut batches = Vec::new();
    for batch in reader {
        batches
            .push(batch.map_err(|e| CoreError::corrupt(id.clone(), format!("ipc batch: {e}")))?);
    }
    Ok(batches)
}

/// True when the first four bytes carry the IPC continuation marker
pub fn has_ipc_continuation(prefix: &[u8]) -> bool {
    prefix.len() >= 4 && prefix[..4] == IPC_CONTINUATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("_cs_id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![100, 200, 300])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let batch = sample_batch();
        let bytes = encode_ipc(&batch).unwrap();
        let back = decode_ipc(&SnapshotId::new("t"), &bytes).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0], batch);
    }

    #[test]
    fn test_stream_opens_with_continuation() {
        let bytes = encode_ipc(&sample_batch()).unwrap();
        assert!(bytes.len() > 8);
        assert!(has_ipc_continuation(&bytes));
    }

    #[test]
    fn test_probe_rejects_short_or_foreign_prefixes() {
        assert!(!has_ipc_continuation(b""));
        assert!(!has_ipc_continuation(&[0xFF, 0xFF]));
        assert!(!has_ipc_continuation(b"PAR1....."));
    }

    #[test]
    fn test_decode_garbage_is_corrupt() {
        let err = decode_ipc(&SnapshotId::new("bad"), b"not an ipc stream").unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_zero_row_batch_roundtrip() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)]));
        let batch = RecordBatch::new_empty(schema);
        let bytes = encode_ipc(&batch).unwrap();
        // Zero-row shards still clear the validity floor.
        assert!(bytes.len() >= 8);
        let back = decode_ipc(&SnapshotId::new("empty"), &bytes).unwrap();
        let rows: usize = back.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 0);
    }
}
