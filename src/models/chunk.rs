use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub(crate) const FILE_ID: &str = "fileId";
pub(crate) const NUM: &str = "num";

/// One fixed-size slice of a file's content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub file_id: String,
    /// Zero-based position within the file.
    pub num: u64,
    #[serde(with = "base64_data")]
    pub data: Bytes,
}

impl ChunkRecord {
    pub(crate) fn new(file_id: impl Into<String>, num: u64, data: Bytes) -> Self {
        Self {
            id: String::new(),
            file_id: file_id.into(),
            num,
            data,
        }
    }
}

/// Chunk payloads are stored as standard base64 text.
mod base64_data {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map(Bytes::from).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{from_document, to_document};
    use serde_json::json;

    #[test]
    fn test_data_is_base64() {
        let chunk = ChunkRecord::new("f1", 3, Bytes::from_static(b"hello"));
        let doc = to_document(&chunk).unwrap();
        assert_eq!(doc["fileId"], json!("f1"));
        assert_eq!(doc["num"], json!(3));
        assert_eq!(doc["data"], json!("aGVsbG8="));
    }

    #[test]
    fn test_rejects_bad_base64() {
        let doc = json!({"id": "c", "fileId": "f1", "num": 0, "data": "***"})
            .as_object()
            .cloned()
            .unwrap();
        assert!(from_document::<ChunkRecord>(doc).is_err());
    }
}
