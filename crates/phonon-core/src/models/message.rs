use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Payload carried by a queue message.
///
/// Payloads travel as JSON bytes; a body that does not decode is a
/// permanent failure for the consumer.
pub trait JobPayload: Serialize + DeserializeOwned {
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Request to convert one uploaded blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConversionMessage {
    pub user_id: i64,
    pub phrase_id: i64,
    pub input_uri: String,
}

impl JobPayload for AudioConversionMessage {}

/// Request to delete an ephemeral served blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupMessage {
    pub uri: String,
}

impl JobPayload for CleanupMessage {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_message_wire_names() {
        let msg = AudioConversionMessage {
            user_id: 7,
            phrase_id: 3,
            input_uri: "audio/7/3/original.wav".to_string(),
        };
        let json: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["user_id"], 7);
        assert_eq!(json["phrase_id"], 3);
        assert_eq!(json["input_uri"], "audio/7/3/original.wav");
    }

    #[test]
    fn test_malformed_payload_fails_to_decode() {
        assert!(AudioConversionMessage::decode(b"not json").is_err());
        assert!(AudioConversionMessage::decode(br#"{"user_id":"seven"}"#).is_err());
        assert!(CleanupMessage::decode(br#"{}"#).is_err());
    }
}
