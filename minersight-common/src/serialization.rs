use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Serialization format for discovery records and telemetry samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, good for debugging).
    #[default]
    Json,

    /// CBOR format (compact binary, better for long-running capture files).
    Cbor,
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Address, TelemetrySample};

    fn sample() -> TelemetrySample {
        let mut sample = TelemetrySample::captured_at(Address::new("10.0.0.21", 4028), 1_700_000_000_000);
        sample.hash_rate_ths = Some(110.25);
        sample.accepted_shares = Some(4821);
        sample.temperature_c = Some(71.0);
        sample
    }

    #[test]
    fn test_json_encoding_is_line_safe() {
        let encoded = encode(&sample(), Format::Json).unwrap();
        assert!(!encoded.contains(&b'\n'));
        assert_eq!(encoded.first(), Some(&b'{'));
    }

    #[test]
    fn test_cbor_roundtrip() {
        let original = sample();

        let encoded = encode(&original, Format::Cbor).unwrap();
        let decoded: TelemetrySample = decode(&encoded, Format::Cbor).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_cbor_is_smaller() {
        let json = encode(&sample(), Format::Json).unwrap();
        let cbor = encode(&sample(), Format::Cbor).unwrap();

        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }
}
