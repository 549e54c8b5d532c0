use super::super::types::{ConvertedTopic, KeepaliveAction, KeepaliveStyle, LoginOutcome, SubscribeOutcome, WsApiType};
use super::{decode_gzip, on_ping, sign_v1};
use crate::books::{Level, OrderBook};
use crate::config::Credentials;
use crate::ids::MarketType;
use crate::symbol::Symbol;
use crate::time::ContractExpiration;
use crate::topic::Topic;
use chrono::Utc;
use serde_json::{json, Value};
use xstream_integration::DataError;

#[derive(Debug, Clone, Copy, Default)]
pub struct Huobidm;

impl Huobidm {
    pub fn convert_symbol(&self, symbol: &Symbol) -> Result<String, DataError> {
        let (base, quote) = symbol.base_quote()?;
        match symbol.market_type {
            MarketType::Swap => Ok(format!("{base}-{quote}")),
            MarketType::SwapUsdt => Ok(format!("{base}-{quote}")),
            MarketType::Futures => {
                // Huobi DM names futures contracts by the relative tag
                // itself (`BTC_CW`, `BTC_NQ`), not a computed delivery date.
                let tag = symbol
                    .contract_expiration()
                    .ok_or_else(|| DataError::InvalidSymbol("futures symbol missing expiration".into()))?;
                ContractExpiration::parse(tag)
                    .ok_or_else(|| DataError::InvalidSymbol(format!("unknown expiration tag: {tag}")))?;
                Ok(format!("{base}_{tag}"))
            }
            MarketType::Index => Ok(format!("{base}-{quote}")),
            other => Err(DataError::InvalidSymbol(format!("huobidm does not support {other}"))),
        }
    }

    pub fn convert_topic(&self, topic: &Topic) -> Result<ConvertedTopic, DataError> {
        let symbol = Symbol::new(topic.exchange_id, topic.market_type, topic.extrainfo.clone());
        let market_id = self.convert_symbol(&symbol)?;
        let subtypes = topic.subtypes();

        let prefix = match topic.market_type {
            MarketType::SwapUsdt => "linear-swap",
            MarketType::Swap => "swap",
            MarketType::Futures => "future",
            MarketType::Index => "index",
            other => return Err(DataError::InvalidTopic(format!("unsupported huobidm market_type: {other}"))),
        };

        let channel = match topic.maintype() {
            "orderbook" => match subtypes.first().copied() {
                None => format!("market.{market_id}.depth.size_20.high_freq"),
                Some("full") => format!("market.{market_id}.depth.step0"),
                Some(other) => return Err(DataError::InvalidTopic(format!("unsupported orderbook level: {other}"))),
            },
            "trade" => format!("market.{market_id}.trade.detail"),
            "ohlcv" => {
                let period = subtypes.first().copied().unwrap_or("1min");
                format!("market.{market_id}.kline.{period}")
            }
            "myorder" => format!("{prefix}.orders.{market_id}"),
            "position" => format!("{prefix}.positions.{market_id}"),
            other => return Err(DataError::InvalidTopic(format!("unsupported huobidm maintype: {other}"))),
        };

        Ok(ConvertedTopic::plain(channel))
    }

    pub fn wsapi_type(&self, topic: &Topic) -> Result<WsApiType, DataError> {
        Ok(match topic.maintype() {
            "myorder" | "position" => WsApiType::Private,
            "index" => WsApiType::Index,
            _ => WsApiType::Market,
        })
    }

    pub fn ws_url(&self, market_type: MarketType, wsapi_type: WsApiType) -> Result<&'static str, DataError> {
        match (market_type, wsapi_type) {
            (MarketType::SwapUsdt, WsApiType::Private) => Ok("wss://api.hbdm.com/linear-swap-notification"),
            (MarketType::SwapUsdt, _) => Ok("wss://api.hbdm.com/linear-swap-ws"),
            (MarketType::Swap, WsApiType::Private) => Ok("wss://api.hbdm.com/swap-notification"),
            (MarketType::Swap, _) => Ok("wss://api.hbdm.com/swap-ws"),
            (MarketType::Futures, WsApiType::Private) => Ok("wss://api.hbdm.com/notification"),
            (MarketType::Futures, _) => Ok("wss://api.hbdm.com/ws"),
            (MarketType::Index, _) => Ok("wss://api.hbdm.com/ws_index"),
            _ => Err(DataError::InvalidTopic("unsupported huobidm market_type".into())),
        }
    }

    pub fn login_required(&self, wsapi_type: WsApiType) -> bool {
        matches!(wsapi_type, WsApiType::Private)
    }

    pub fn keepalive_style(&self) -> KeepaliveStyle {
        KeepaliveStyle::Responsive
    }

    pub fn login_command(&self, credentials: &Credentials, host: &str) -> Result<Value, DataError> {
        let (query, signature) = sign_v1(credentials, "GET", host, "/ws/v1", Utc::now())?;
        let mut frame = serde_json::Map::new();
        frame.insert("op".to_string(), Value::String("auth".to_string()));
        frame.insert("type".to_string(), Value::String("api".to_string()));
        frame.insert("cid".to_string(), Value::String("login".to_string()));
        for (k, v) in query.split('&').filter_map(|pair| pair.split_once('=')) {
            frame.insert(k.to_string(), Value::String(v.to_string()));
        }
        frame.insert("Signature".to_string(), Value::String(signature));
        Ok(Value::Object(frame))
    }

    pub fn on_login_message(&self, msg: &Value) -> LoginOutcome {
        if msg.get("op").and_then(|v| v.as_str()) != Some("auth") {
            return LoginOutcome::Unrelated;
        }
        match msg.get("err-code").and_then(|v| v.as_i64()) {
            Some(0) => LoginOutcome::Success,
            _ => LoginOutcome::Failure(
                msg.get("err-msg").and_then(|v| v.as_str()).unwrap_or("huobidm auth failed").to_string(),
            ),
        }
    }

    pub fn subscribe_commands(&self, topics: &[ConvertedTopic]) -> Vec<Value> {
        topics.iter().map(|t| json!({ "sub": t.channel })).collect()
    }

    pub fn on_subscribe_message(&self, msg: &Value) -> SubscribeOutcome {
        match msg.get("subbed").and_then(|v| v.as_str()) {
            Some(topic) if msg.get("status").and_then(|v| v.as_str()) == Some("ok") => {
                SubscribeOutcome::Acked(topic.to_string())
            }
            Some(_) => SubscribeOutcome::Failure(
                msg.get("err-msg").and_then(|v| v.as_str()).unwrap_or("subscribe failed").to_string(),
            ),
            None => SubscribeOutcome::Unrelated,
        }
    }

    pub fn on_keepalive_message(&self, msg: &Value) -> KeepaliveAction {
        on_ping(msg)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DataError> {
        decode_gzip(bytes)
    }
}

/// Huobidm pushes whole-book snapshots tagged with a monotonically
/// increasing `version`; a patch is only applied if its `version` is
/// exactly one greater than the book's current version.
#[derive(Debug, Clone, Default)]
pub struct HuobidmOrderBookMerger {
    version: Option<u64>,
    pub book: Option<OrderBook>,
}

impl HuobidmOrderBookMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_snapshot(&mut self, bids: Vec<Level>, asks: Vec<Level>, version: u64) {
        self.book = Some(OrderBook::new(bids, asks));
        self.version = Some(version);
    }

    pub fn on_update(&mut self, bids: Vec<Level>, asks: Vec<Level>, version: u64) -> Result<(), DataError> {
        let expected = self
            .version
            .ok_or_else(|| DataError::InvalidPatch("huobidm update received before a snapshot".into()))?
            + 1;
        if version != expected {
            self.book = None;
            self.version = None;
            return Err(DataError::Version {
                expected,
                got: version,
            });
        }
        let book = self.book.as_mut().expect("version set implies book set");
        book.upsert_bids(bids);
        book.upsert_asks(asks);
        self.version = Some(version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ExchangeId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_convert_symbol_swap_uses_dash() {
        let symbol = Symbol::parse("huobidm:swap.usdt:BTC/USDT").unwrap();
        assert_eq!(Huobidm::default().convert_symbol(&symbol).unwrap(), "BTC-USDT");
    }

    #[test]
    fn test_convert_topic_orderbook_full_uses_step0() {
        let topic = Topic::new(ExchangeId::Huobidm, MarketType::SwapUsdt, "orderbook.full", "BTC/USDT");
        let converted = Huobidm::default().convert_topic(&topic).unwrap();
        assert_eq!(converted.channel, "market.BTC-USDT.depth.step0");
    }

    #[test]
    fn test_merger_rejects_non_contiguous_version() {
        let mut merger = HuobidmOrderBookMerger::new();
        merger.on_snapshot(vec![], vec![], 10);
        let err = merger.on_update(vec![], vec![], 12).unwrap_err();
        assert!(matches!(err, DataError::Version { expected: 11, got: 12 }));
    }

    #[test]
    fn test_merger_accepts_contiguous_version() {
        let mut merger = HuobidmOrderBookMerger::new();
        merger.on_snapshot(vec![Level::new(dec!(10), dec!(1))], vec![], 10);
        merger.on_update(vec![Level::new(dec!(10), dec!(5))], vec![], 11).unwrap();
        assert_eq!(merger.book.as_ref().unwrap().bids.levels()[0].amount, dec!(5));
    }
}
