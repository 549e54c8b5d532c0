use super::types::{ConvertedTopic, KeepaliveAction, KeepaliveStyle, LoginOutcome, SubscribeOutcome, WsApiType};
use crate::books::{Level, OrderBook};
use crate::config::Credentials;
use crate::ids::MarketType;
use crate::symbol::Symbol;
use crate::time::{contract_delivery_time, ContractExpiration};
use crate::topic::Topic;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use flate2::read::DeflateDecoder;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::io::Read;
use xstream_integration::DataError;

#[derive(Debug, Clone, Default)]
pub struct Okex {
    pub delivery_hour_utc: u32,
}

impl Okex {
    pub fn convert_symbol(&self, symbol: &Symbol) -> Result<String, DataError> {
        let (base, quote) = symbol.base_quote()?;
        match symbol.market_type {
            MarketType::Spot | MarketType::Margin => Ok(format!("{base}-{quote}")),
            MarketType::Swap => Ok(format!("{base}-{quote}-SWAP")),
            MarketType::Futures => {
                let tag = symbol
                    .contract_expiration()
                    .ok_or_else(|| DataError::InvalidSymbol("futures symbol missing expiration".into()))?;
                let expiration = ContractExpiration::parse(tag)
                    .ok_or_else(|| DataError::InvalidSymbol(format!("unknown expiration tag: {tag}")))?;
                let delivery = contract_delivery_time(expiration, self.delivery_hour_utc, Utc::now());
                Ok(format!("{base}-{quote}-{}", delivery.format("%y%m%d")))
            }
            MarketType::Option => {
                let tag = symbol
                    .contract_expiration()
                    .ok_or_else(|| DataError::InvalidSymbol("option symbol missing strike/side tag".into()))?;
                let (strike, side) = tag
                    .rsplit_once('-')
                    .ok_or_else(|| DataError::InvalidSymbol(format!("malformed option tag: {tag}")))?;
                Ok(format!("{base}-{quote}-{strike}-{side}"))
            }
            MarketType::Index => Ok(format!("{base}-{quote}-INDEX")),
        }
    }

    pub fn convert_topic(&self, topic: &Topic) -> Result<ConvertedTopic, DataError> {
        let instrument = if topic.extrainfo.is_empty() {
            None
        } else {
            let symbol = Symbol::new(topic.exchange_id, topic.market_type, topic.extrainfo.clone());
            Some(self.convert_symbol(&symbol)?)
        };

        let subtypes = topic.subtypes();
        let channel = match topic.maintype() {
            "orderbook" => match subtypes.first().copied() {
                None | Some("5") => "books5",
                Some("full") => "books",
                Some("l2tbt") => "books-l2-tbt",
                Some(other) => return Err(DataError::InvalidTopic(format!("unsupported orderbook level: {other}"))),
            },
            "trade" => "trades",
            "ticker" => "tickers",
            "ohlcv" => {
                let period = subtypes.first().copied().unwrap_or("1m");
                return Ok(ConvertedTopic::plain(format!(
                    "candle{}",
                    period.to_uppercase()
                )));
            }
            "myorder" => "orders",
            "account" => "account",
            "position" => "positions",
            other => return Err(DataError::InvalidTopic(format!("unsupported okex maintype: {other}"))),
        };

        Ok(ConvertedTopic {
            channel: channel.to_string(),
            params: instrument
                .map(|inst| vec![("instId".to_string(), inst)])
                .unwrap_or_default(),
        })
    }

    pub fn wsapi_type(&self, topic: &Topic) -> Result<WsApiType, DataError> {
        const PRIVATE: &[&str] = &["myorder", "account", "position"];
        Ok(if PRIVATE.contains(&topic.maintype()) {
            WsApiType::Private
        } else {
            WsApiType::Public
        })
    }

    pub fn ws_url(&self, wsapi_type: WsApiType) -> &'static str {
        match wsapi_type {
            WsApiType::Private => "wss://ws.okx.com:8443/ws/v5/private",
            _ => "wss://ws.okx.com:8443/ws/v5/public",
        }
    }

    pub fn login_required(&self, wsapi_type: WsApiType) -> bool {
        matches!(wsapi_type, WsApiType::Private)
    }

    pub fn keepalive_style(&self) -> KeepaliveStyle {
        KeepaliveStyle::IdlePing { idle_secs: 10 }
    }

    /// `sign = base64(hmac_sha256(secret, "{timestamp}GET/users/self/verify"))`.
    /// `timestamp` must be within 30s of server time, which the WSHandler
    /// fetches once per connect rather than trusting the local clock.
    pub fn login_command(&self, credentials: &Credentials, server_time: chrono::DateTime<Utc>) -> Result<Value, DataError> {
        let passphrase = credentials
            .password
            .as_ref()
            .ok_or_else(|| DataError::Auth("okex requires a passphrase for private channels".into()))?;
        let timestamp = server_time.timestamp();
        let payload = format!("{timestamp}GET/users/self/verify");
        let mut mac = Hmac::<Sha256>::new_from_slice(credentials.secret.as_bytes())
            .map_err(|e| DataError::Auth(e.to_string()))?;
        mac.update(payload.as_bytes());
        let sign = STANDARD.encode(mac.finalize().into_bytes());

        Ok(json!({
            "op": "login",
            "args": [{
                "apiKey": credentials.api_key,
                "passphrase": passphrase,
                "timestamp": timestamp.to_string(),
                "sign": sign,
            }],
        }))
    }

    pub fn on_login_message(&self, msg: &Value) -> LoginOutcome {
        if msg.get("event").and_then(|v| v.as_str()) != Some("login") {
            return LoginOutcome::Unrelated;
        }
        match msg.get("code").and_then(|v| v.as_str()) {
            Some("0") => LoginOutcome::Success,
            _ => LoginOutcome::Failure(
                msg.get("msg")
                    .and_then(|v| v.as_str())
                    .unwrap_or("okex login rejected")
                    .to_string(),
            ),
        }
    }

    pub fn subscribe_commands(&self, topics: &[ConvertedTopic]) -> Vec<Value> {
        let args: Vec<Value> = topics
            .iter()
            .map(|t| {
                let mut obj = serde_json::Map::new();
                obj.insert("channel".into(), Value::String(t.channel.clone()));
                for (key, value) in &t.params {
                    obj.insert(key.clone(), Value::String(value.clone()));
                }
                Value::Object(obj)
            })
            .collect();
        vec![json!({ "op": "subscribe", "args": args })]
    }

    pub fn on_subscribe_message(&self, msg: &Value) -> SubscribeOutcome {
        match msg.get("event").and_then(|v| v.as_str()) {
            Some("subscribe") => SubscribeOutcome::Acked(
                msg.get("arg")
                    .and_then(|a| a.get("channel"))
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string(),
            ),
            Some("error") => SubscribeOutcome::Failure(
                msg.get("msg").and_then(|v| v.as_str()).unwrap_or("subscribe failed").to_string(),
            ),
            _ => SubscribeOutcome::Unrelated,
        }
    }

    pub fn on_keepalive_message(&self, text: &str) -> KeepaliveAction {
        if text == "pong" {
            KeepaliveAction::Consumed
        } else {
            KeepaliveAction::Ignore
        }
    }

    /// Okex frames are raw-deflate compressed (no zlib/gzip header).
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DataError> {
        let mut decoder = DeflateDecoder::new(bytes);
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|e| DataError::Protocol(format!("okex deflate decode failed: {e}")))?;
        serde_json::from_str(&out).map_err(|e| DataError::Protocol(format!("invalid okex JSON frame: {e}")))
    }
}

/// Snapshot-then-delta merger with an integrity checksum computed over the
/// interleaved top 25 bid/ask rows after every patch.
#[derive(Debug, Clone, Default)]
pub struct OkexOrderBookMerger {
    pub book: Option<OrderBook>,
}

impl OkexOrderBookMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_snapshot(&mut self, bids: Vec<Level>, asks: Vec<Level>, checksum: u32) -> Result<(), DataError> {
        let book = OrderBook::new(bids, asks);
        let computed = Self::checksum(&book);
        if computed != checksum {
            return Err(DataError::Checksum {
                expected: checksum,
                computed,
            });
        }
        self.book = Some(book);
        Ok(())
    }

    pub fn on_update(&mut self, bids: Vec<Level>, asks: Vec<Level>, checksum: u32) -> Result<(), DataError> {
        let book = self
            .book
            .as_mut()
            .ok_or_else(|| DataError::InvalidPatch("okex update received before a snapshot".into()))?;
        book.upsert_bids(bids);
        book.upsert_asks(asks);

        let computed = Self::checksum(book);
        if computed != checksum {
            self.book = None;
            return Err(DataError::Checksum {
                expected: checksum,
                computed,
            });
        }
        Ok(())
    }

    /// CRC32 of `"bidPrice:bidSize:askPrice:askSize:..."` over the top 25
    /// interleaved levels (fewer if the book is thinner), matching Okex's
    /// documented integrity check.
    fn checksum(book: &OrderBook) -> u32 {
        let (bids, asks) = book.top(25);
        let mut parts = Vec::new();
        for i in 0..bids.len().max(asks.len()).min(25) {
            if let Some(bid) = bids.get(i) {
                parts.push(format!("{}:{}", bid.price, bid.amount));
            }
            if let Some(ask) = asks.get(i) {
                parts.push(format!("{}:{}", ask.price, ask.amount));
            }
        }
        let joined = parts.join(":");
        crc32fast::hash(joined.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ExchangeId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_convert_symbol_swap_appends_suffix() {
        let symbol = Symbol::parse("okex:swap:BTC/USDT").unwrap();
        assert_eq!(Okex::default().convert_symbol(&symbol).unwrap(), "BTC-USDT-SWAP");
    }

    #[test]
    fn test_convert_topic_orderbook_full_is_books_channel() {
        let topic = Topic::new(ExchangeId::Okex, MarketType::Swap, "orderbook.full", "BTC-USDT");
        let converted = Okex::default().convert_topic(&topic).unwrap();
        assert_eq!(converted.channel, "books");
    }

    #[test]
    fn test_login_requires_passphrase() {
        let creds = Credentials {
            api_key: "k".into(),
            secret: "s".into(),
            password: None,
        };
        let err = Okex::default().login_command(&creds, Utc::now()).unwrap_err();
        assert!(matches!(err, DataError::Auth(_)));
    }

    #[test]
    fn test_login_ack_success_and_failure() {
        let ex = Okex::default();
        let ok = json!({"event": "login", "code": "0"});
        assert_eq!(ex.on_login_message(&ok), LoginOutcome::Success);

        let bad = json!({"event": "login", "code": "60009", "msg": "bad sign"});
        assert_eq!(ex.on_login_message(&bad), LoginOutcome::Failure("bad sign".into()));
    }

    #[test]
    fn test_merger_rejects_snapshot_with_wrong_checksum() {
        let mut merger = OkexOrderBookMerger::new();
        let err = merger
            .on_snapshot(vec![Level::new(dec!(10), dec!(1))], vec![Level::new(dec!(11), dec!(1))], 0)
            .unwrap_err();
        assert!(matches!(err, DataError::Checksum { .. }));
    }

    #[test]
    fn test_merger_accepts_snapshot_with_matching_checksum() {
        let bids = vec![Level::new(dec!(10), dec!(1))];
        let asks = vec![Level::new(dec!(11), dec!(1))];
        let book = OrderBook::new(bids.clone(), asks.clone());
        let checksum = OkexOrderBookMerger::checksum(&book);

        let mut merger = OkexOrderBookMerger::new();
        merger.on_snapshot(bids, asks, checksum).unwrap();
        assert!(merger.book.is_some());
    }

    #[test]
    fn test_merger_update_before_snapshot_is_invalid_patch() {
        let mut merger = OkexOrderBookMerger::new();
        let err = merger.on_update(vec![], vec![], 0).unwrap_err();
        assert!(matches!(err, DataError::InvalidPatch(_)));
    }
}
