//! Wire models shared by every transport implementation.
//!
//! Field names are fixed by the server contract; both sides of the
//! exchange carry their public keys base64-encoded inside the uniform
//! response envelope.

use serde::{Deserialize, Serialize};

/// Client half of the handshake exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Client wall-clock at submission, milliseconds since the epoch.
    pub timestamp: String,
    /// The client identifier; doubles as the conversation identifier.
    pub conversation_id: String,
    /// Base64 public key for the outbound (encode) direction.
    pub client_encoder_public_key: String,
    /// Base64 public key for the inbound (decode) direction.
    pub client_decoder_public_key: String,
}

/// Server half of the handshake exchange, carried in the envelope `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeData {
    /// Server timestamp; parsed as an unsigned integer and used as the
    /// nonce for both transform sessions.
    pub timestamp: String,
    /// Echoed conversation identifier.
    pub conversation_id: String,
    /// Base64 server public key paired with the client encoder.
    pub server_encoder_public_key: String,
    /// Base64 server public key paired with the client decoder.
    pub server_decoder_public_key: String,
}

/// The server's uniform response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    /// Human-readable status message.
    pub message: String,
    /// Whether the request succeeded at the application level.
    pub success: bool,
    /// Server-assigned result code.
    pub result_code: String,
    /// Server-side correlation id for failures.
    pub exception_id: String,
    /// Response payload; absent on failure.
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// A successful envelope wrapping `data`.
    pub fn ok(data: T) -> Self {
        Self {
            message: "Success".to_string(),
            success: true,
            result_code: "000".to_string(),
            exception_id: String::new(),
            data: Some(data),
        }
    }

    /// A failure envelope with a server message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
            result_code: "500".to_string(),
            exception_id: String::new(),
            data: None,
        }
    }
}

/// Current wall-clock in milliseconds since the Unix epoch, as the wire
/// carries it.
pub fn now_millis() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_request_field_names() {
        let request = HandshakeRequest {
            timestamp: "1700000000000".to_string(),
            conversation_id: "client-1".to_string(),
            client_encoder_public_key: "QUJD".to_string(),
            client_decoder_public_key: "REVG".to_string(),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["conversation_id"], "client-1");
        assert_eq!(value["client_encoder_public_key"], "QUJD");
        assert_eq!(value["client_decoder_public_key"], "REVG");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope::ok(HandshakeData {
            timestamp: "42".to_string(),
            conversation_id: "client-1".to_string(),
            server_encoder_public_key: "QUJD".to_string(),
            server_decoder_public_key: "REVG".to_string(),
        });

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope<HandshakeData> = serde_json::from_str(&json).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.data.unwrap().timestamp, "42");
    }

    #[test]
    fn test_failure_envelope_without_data() {
        let json = r#"{"message":"nope","success":false,"result_code":"500","exception_id":"e-1"}"#;
        let parsed: Envelope<String> = serde_json::from_str(json).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.message, "nope");
        assert!(parsed.data.is_none());
    }

    #[test]
    fn test_now_millis_is_numeric() {
        let millis: u64 = now_millis().parse().unwrap();
        assert!(millis > 0);
    }
}
