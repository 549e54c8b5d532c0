//! Huobipro's spot order book cannot be trusted from the streamed `mbp`
//! feed alone: on a sequence gap the merger must issue a one-off REST-like
//! request over the *same* WebSocket (`req` frames answered by matching
//! `rep` frames) to re-fetch a full depth snapshot. [`HuobiWSReq`] is the
//! piggy-backed request/response layer that makes that possible without a
//! second connection, built on the same [`xstream_integration::Awaitables`]
//! primitive the WSHandler itself uses for task multiplexing.
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use xstream_integration::{Awaitables, DataError};

pub const DEFAULT_WSREQ_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracks in-flight `req`/`rep` exchanges, keyed by the topic string Huobi
/// echoes back unchanged in the matching `rep` frame. At most one request
/// per topic may be outstanding at a time.
#[derive(Debug)]
pub struct HuobiWSReq {
    pending: Awaitables<Value>,
    senders: HashMap<String, oneshot::Sender<Value>>,
    timeout: Duration,
}

impl Default for HuobiWSReq {
    fn default() -> Self {
        Self::new(DEFAULT_WSREQ_TIMEOUT)
    }
}

impl HuobiWSReq {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Awaitables::new(),
            senders: HashMap::new(),
            timeout,
        }
    }

    /// Register `topic` as awaiting a `rep`. The caller is responsible for
    /// actually writing the `{"req": topic, ...}` frame to the socket; this
    /// only tracks the outstanding request so [`Self::on_frame`] has
    /// somewhere to deliver the answer.
    pub fn reserve(&mut self, topic: &str) -> Result<(), DataError> {
        if self.senders.contains_key(topic) {
            return Err(DataError::Duplicate(topic.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        self.senders.insert(topic.to_string(), tx);
        self.pending.create_task(
            async move { rx.await.unwrap_or(Value::Null) },
            Some(topic.to_string()),
        )?;
        Ok(())
    }

    /// Feed every inbound frame through this. Frames that aren't a `rep`
    /// answering a reservation we made are left for the ordinary pipeline
    /// to handle.
    pub fn on_frame(&mut self, frame: &Value) -> bool {
        let Some(topic) = frame.get("rep").and_then(|v| v.as_str()) else {
            return false;
        };
        match self.senders.remove(topic) {
            Some(tx) => {
                let _ = tx.send(frame.clone());
                true
            }
            None => false,
        }
    }

    /// Block until `topic`'s `rep` has arrived (or until the request
    /// timeout elapses).
    pub async fn wait_for(&mut self, topic: &str) -> Result<Value, DataError> {
        loop {
            let result = self.pending.wait(Some(self.timeout)).await?;
            if result.name == topic {
                return Ok(result.value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reserve_then_deliver_matching_reply() {
        let mut wsreq = HuobiWSReq::new(Duration::from_secs(1));
        wsreq.reserve("market.btcusdt.mbp.150").unwrap();

        let delivered = wsreq.on_frame(&json!({"rep": "market.btcusdt.mbp.150", "data": {"seqNum": 1}}));
        assert!(delivered);

        let reply = wsreq.wait_for("market.btcusdt.mbp.150").await.unwrap();
        assert_eq!(reply["data"]["seqNum"], 1);
    }

    #[test]
    fn test_on_frame_ignores_unreserved_topics() {
        let mut wsreq = HuobiWSReq::default();
        assert!(!wsreq.on_frame(&json!({"rep": "market.ethusdt.mbp.150"})));
    }

    #[test]
    fn test_on_frame_ignores_non_rep_frames() {
        let mut wsreq = HuobiWSReq::default();
        wsreq.reserve("market.btcusdt.mbp.150").unwrap();
        assert!(!wsreq.on_frame(&json!({"ch": "market.btcusdt.mbp.150", "tick": {}})));
    }

    #[test]
    fn test_reserve_rejects_duplicate_topic() {
        let mut wsreq = HuobiWSReq::default();
        wsreq.reserve("market.btcusdt.mbp.150").unwrap();
        let err = wsreq.reserve("market.btcusdt.mbp.150").unwrap_err();
        assert!(matches!(err, DataError::Duplicate(_)));
    }
}
