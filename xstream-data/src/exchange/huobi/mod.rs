//! Huobi spans three variants (`huobipro` spot, `huobidm` futures/swap/index)
//! that share a wire format (GZIP frames, responsive ping/pong, a common
//! v1/v2 signing scheme) but differ in URL layout, channel naming and order
//! book merge strategy. The shared mechanics live here; [`pro`] and [`dm`]
//! hold the per-variant adapter.

pub mod dm;
pub mod pro;
pub mod wsreq;

use super::types::KeepaliveAction;
use crate::config::Credentials;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use flate2::read::GzDecoder;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::io::Read;
use xstream_integration::DataError;

/// All Huobi frames, including `ping`/`pong`, arrive GZIP-compressed.
pub fn decode_gzip(bytes: &[u8]) -> Result<Value, DataError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| DataError::Protocol(format!("huobi gzip decode failed: {e}")))?;
    serde_json::from_str(&out).map_err(|e| DataError::Protocol(format!("invalid huobi JSON frame: {e}")))
}

/// Huobi's three ping shapes, one per API generation. The server never
/// sends more than one shape on a given connection, but the keep-alive
/// pre-processor must recognise whichever one shows up.
pub fn on_ping(msg: &Value) -> KeepaliveAction {
    if let Some(ts) = msg.get("ping") {
        return KeepaliveAction::Reply(json!({ "pong": ts }));
    }
    if msg.get("action").and_then(|v| v.as_str()) == Some("ping") {
        let ts = msg.get("data").and_then(|d| d.get("ts")).cloned().unwrap_or(Value::Null);
        return KeepaliveAction::Reply(json!({ "action": "pong", "data": { "ts": ts } }));
    }
    if msg.get("op").and_then(|v| v.as_str()) == Some("ping") {
        let ts = msg.get("ts").cloned().unwrap_or(Value::Null);
        return KeepaliveAction::Reply(json!({ "op": "pong", "ts": ts }));
    }
    KeepaliveAction::Ignore
}

/// The v1 signing scheme shared by huobipro's `/ws/v1` private stream and
/// huobidm: a query string built from `AccessKeyId`/`SignatureMethod`/
/// `SignatureVersion`/`Timestamp`, signed with HMAC-SHA256 over
/// `"{METHOD}\n{HOST}\n{PATH}\n{QUERY}"`, base64-encoded.
pub fn sign_v1(
    credentials: &Credentials,
    method: &str,
    host: &str,
    path: &str,
    now: chrono::DateTime<Utc>,
) -> Result<(String, String), DataError> {
    let timestamp = now.format("%Y-%m-%dT%H:%M:%S").to_string();
    let encode = |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
    let query = format!(
        "AccessKeyId={}&SignatureMethod=HmacSHA256&SignatureVersion=2&Timestamp={}",
        encode(&credentials.api_key),
        encode(&timestamp),
    );
    let payload = format!("{method}\n{host}\n{path}\n{query}");
    let mut mac = Hmac::<Sha256>::new_from_slice(credentials.secret.as_bytes())
        .map_err(|e| DataError::Auth(e.to_string()))?;
    mac.update(payload.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());
    Ok((query, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_ping_market_data_shape() {
        let action = on_ping(&json!({"ping": 12345}));
        assert!(matches!(action, KeepaliveAction::Reply(_)));
        if let KeepaliveAction::Reply(reply) = action {
            assert_eq!(reply["pong"], 12345);
        }
    }

    #[test]
    fn test_on_ping_action_shape() {
        let action = on_ping(&json!({"action": "ping", "data": {"ts": 999}}));
        if let KeepaliveAction::Reply(reply) = action {
            assert_eq!(reply["action"], "pong");
            assert_eq!(reply["data"]["ts"], 999);
        } else {
            panic!("expected Reply");
        }
    }

    #[test]
    fn test_on_ping_ignores_non_ping_frames() {
        assert!(matches!(on_ping(&json!({"ch": "trade"})), KeepaliveAction::Ignore));
    }
}
