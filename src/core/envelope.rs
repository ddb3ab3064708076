//! Wire codec: `{"type", "filename", "data_b64"}` where `data_b64` is
//! `base64(gzip(payload))`.

use crate::domain::model::{Envelope, EnvelopeKind};
use crate::utils::error::{EtlError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    filename: String,
    data_b64: String,
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&envelope.payload)?;
    let compressed = encoder.finish()?;

    let wire = WireMessage {
        kind: envelope.kind.tag().to_string(),
        filename: envelope.filename.clone(),
        data_b64: STANDARD.encode(compressed),
    };
    Ok(serde_json::to_vec(&wire)?)
}

pub fn decode(body: &[u8]) -> Result<Envelope> {
    let wire: WireMessage = serde_json::from_slice(body)
        .map_err(|e| EtlError::malformed(format!("invalid envelope structure: {}", e)))?;

    let kind = EnvelopeKind::from_tag(&wire.kind)
        .ok_or_else(|| EtlError::malformed(format!("unrecognized type tag '{}'", wire.kind)))?;

    let compressed = STANDARD
        .decode(wire.data_b64.as_bytes())
        .map_err(|e| EtlError::malformed(format!("data_b64 is not valid base64: {}", e)))?;

    let mut payload = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut payload)
        .map_err(|e| EtlError::malformed(format!("payload decompression failed: {}", e)))?;

    Ok(Envelope {
        kind,
        filename: wire.filename,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new(
            EnvelopeKind::RawBatch,
            "noshowappointments.csv",
            b"PatientId,Age\n1,30\n2,45\n".to_vec(),
        )
    }

    #[test]
    fn test_round_trip() {
        let envelope = sample();
        let wire = encode(&envelope).unwrap();
        assert_eq!(decode(&wire).unwrap(), envelope);
    }

    #[test]
    fn test_round_trip_empty_and_binary_payloads() {
        for payload in [Vec::new(), vec![0u8, 255, 10, 13, 0x1f, 0x8b]] {
            let envelope = Envelope::new(EnvelopeKind::CleanedBatch, "x", payload);
            assert_eq!(decode(&encode(&envelope).unwrap()).unwrap(), envelope);
        }
    }

    #[test]
    fn test_wire_shape() {
        let wire = encode(&sample()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&wire).unwrap();

        assert_eq!(json["type"], "RawBatch");
        assert_eq!(json["filename"], "noshowappointments.csv");

        let compressed = STANDARD.decode(json["data_b64"].as_str().unwrap()).unwrap();
        // gzip magic
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "Mystery",
            "filename": "a.csv",
            "data_b64": ""
        }))
        .unwrap();

        let err = decode(&body).unwrap_err();
        assert!(matches!(err, EtlError::MalformedEnvelope { .. }));
        assert!(err.to_string().contains("Mystery"));
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let body = br#"{"type": "RawBatch", "data_b64": ""}"#;
        assert!(matches!(decode(body), Err(EtlError::MalformedEnvelope { .. })));

        assert!(matches!(decode(b"not json"), Err(EtlError::MalformedEnvelope { .. })));
    }

    #[test]
    fn test_bad_base64_and_bad_gzip_are_malformed() {
        let bad_b64 = br#"{"type": "RawBatch", "filename": "a", "data_b64": "%%%"}"#;
        assert!(matches!(decode(bad_b64), Err(EtlError::MalformedEnvelope { .. })));

        let not_gzip = serde_json::to_vec(&serde_json::json!({
            "type": "RawBatch",
            "filename": "a.csv",
            "data_b64": STANDARD.encode(b"plain text, not gzip")
        }))
        .unwrap();
        let err = decode(&not_gzip).unwrap_err();
        assert!(err.is_poison());
    }
}
