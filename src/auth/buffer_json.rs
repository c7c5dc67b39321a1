//! Binary fields in persisted JSON.
//!
//! Bytes are written as `{ "type": "Buffer", "data": "<base64>" }`. Reading
//! also accepts `data` as an array of byte values, which older files use.
//!
//! Use the module root with `#[serde(with = ...)]` on `Vec<u8>`, [`fixed`]
//! on `[u8; N]` and [`option`] on `Option<Vec<u8>>`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const BUFFER_TAG: &str = "Buffer";

#[derive(Serialize)]
struct BufferOut {
    #[serde(rename = "type")]
    kind: &'static str,
    data: String,
}

#[derive(Deserialize)]
struct BufferIn {
    #[serde(rename = "type")]
    kind: String,
    data: BufferData,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BufferData {
    Base64(String),
    Bytes(Vec<u8>),
}

/// Base64 (standard alphabet, padded) used for buffers and `advSecretKey`.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`encode_base64`].
pub fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    BufferOut {
        kind: BUFFER_TAG,
        data: encode_base64(bytes),
    }
    .serialize(serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let buffer = BufferIn::deserialize(deserializer)?;
    if buffer.kind != BUFFER_TAG {
        return Err(D::Error::custom(format!(
            "expected a Buffer object, found type {:?}",
            buffer.kind
        )));
    }
    match buffer.data {
        BufferData::Base64(text) => decode_base64(&text).map_err(D::Error::custom),
        BufferData::Bytes(bytes) => Ok(bytes),
    }
}

/// Fixed-size arrays, e.g. keys and signatures.
pub mod fixed {
    use super::*;

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        super::serialize(bytes, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let bytes = super::deserialize(deserializer)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {N} bytes, found {len}")))
    }
}

/// Optional buffers; `null` and a missing field both read as `None`.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => super::serialize(bytes, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapped(#[serde(with = "super")] Vec<u8>);

        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "super")]
        blob: Vec<u8>,
        #[serde(with = "super::fixed")]
        key: [u8; 4],
        #[serde(default, with = "super::option")]
        extra: Option<Vec<u8>>,
    }

    #[test]
    fn writes_tagged_base64() {
        let sample = Sample {
            blob: b"hi".to_vec(),
            key: [1, 2, 3, 4],
            extra: None,
        };
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value["blob"], json!({ "type": "Buffer", "data": "aGk=" }));
        assert_eq!(value["extra"], serde_json::Value::Null);
    }

    #[test]
    fn reads_byte_array_form() {
        let value = json!({
            "blob": { "type": "Buffer", "data": [104, 105] },
            "key": { "type": "Buffer", "data": "AQIDBA==" },
            "extra": { "type": "Buffer", "data": "AA==" }
        });
        let sample: Sample = serde_json::from_value(value).unwrap();
        assert_eq!(sample.blob, b"hi");
        assert_eq!(sample.key, [1, 2, 3, 4]);
        assert_eq!(sample.extra, Some(vec![0]));
    }

    #[test]
    fn missing_optional_buffer_is_none() {
        let value = json!({
            "blob": { "type": "Buffer", "data": "" },
            "key": { "type": "Buffer", "data": "AQIDBA==" }
        });
        let sample: Sample = serde_json::from_value(value).unwrap();
        assert!(sample.blob.is_empty());
        assert_eq!(sample.extra, None);
    }

    #[test]
    fn rejects_wrong_length_and_tag() {
        let short = json!({
            "blob": { "type": "Buffer", "data": "" },
            "key": { "type": "Buffer", "data": "AQI=" }
        });
        assert!(serde_json::from_value::<Sample>(short).is_err());

        let untagged = json!({
            "blob": { "type": "Uint8Array", "data": "" },
            "key": { "type": "Buffer", "data": "AQIDBA==" }
        });
        assert!(serde_json::from_value::<Sample>(untagged).is_err());
    }
}
