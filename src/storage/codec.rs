//! Snapshot codec for file-based durability.
//!
//! A snapshot is a JSON array of [`DurableRecord`]s. The whole file is
//! rewritten on every flush, so the format carries no framing or versioning.

use crate::storage::{CodecError, DurableRecord, MetricKind};

/// Reversible mapping between a record set and its serialized snapshot bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotCodec;

impl SnapshotCodec {
    /// Encode records into snapshot bytes.
    ///
    /// # Errors
    /// Returns `CodecError::NonFinite` for a gauge holding NaN or infinity,
    /// which JSON cannot represent.
    pub fn encode(records: &[DurableRecord]) -> Result<Vec<u8>, CodecError> {
        if let Some(bad) = records.iter().find(|r| {
            r.kind == MetricKind::Gauge && r.value.is_some_and(|v| !v.is_finite())
        }) {
            return Err(CodecError::NonFinite(bad.id.clone()));
        }

        Ok(serde_json::to_vec(records)?)
    }

    /// Decode snapshot bytes into records.
    ///
    /// Empty or whitespace-only input decodes to an empty set, which is what a
    /// freshly created snapshot file contains.
    pub fn decode(bytes: &[u8]) -> Result<Vec<DurableRecord>, CodecError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_mixed_records() {
        let records = vec![
            DurableRecord::gauge("Alloc", 2048.0),
            DurableRecord::gauge("GCCPUFraction", 0.1 + 0.2),
            DurableRecord::gauge("Tiny", f64::MIN_POSITIVE),
            DurableRecord::counter("PollCount", 3),
            DurableRecord::counter("Negative", i64::MIN),
        ];

        let bytes = SnapshotCodec::encode(&records).unwrap();
        assert_eq!(SnapshotCodec::decode(&bytes).unwrap(), records);
    }

    #[test]
    fn test_roundtrip_empty() {
        let bytes = SnapshotCodec::encode(&[]).unwrap();
        assert_eq!(bytes, b"[]");
        assert!(SnapshotCodec::decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_decode_blank_file() {
        assert!(SnapshotCodec::decode(b"").unwrap().is_empty());
        assert!(SnapshotCodec::decode(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_decode_malformed() {
        let err = SnapshotCodec::decode(b"[{\"id\":\"Alloc\",\"type\":").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn test_encode_rejects_nan() {
        let err = SnapshotCodec::encode(&[DurableRecord::gauge("Broken", f64::NAN)]).unwrap_err();
        assert_eq!(err.to_string(), "gauge 'Broken' has a non-finite value");
    }
}
