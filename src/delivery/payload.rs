use crate::feed::FeedPayload;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde_json::{json, Value as JsonValue};

/// JSON text stays structured, other UTF-8 becomes a string, and binary is base64 encoded.
pub fn decode_body(body: &[u8]) -> JsonValue {
    match std::str::from_utf8(body) {
        Ok(text) => serde_json::from_str::<JsonValue>(text)
            .unwrap_or_else(|_| JsonValue::String(text.to_string())),
        Err(_) => JsonValue::String(BASE64_STANDARD.encode(body)),
    }
}

/// Request body posted to the trigger endpoint.
pub fn fire_body(payload: &FeedPayload) -> JsonValue {
    match payload {
        FeedPayload::Message(message) => json!({ "body": decode_body(&message.body) }),
        FeedPayload::FeedError(error) => json!({ "type": "feed_error", "error": error }),
    }
}
