use super::super::types::{ConvertedTopic, KeepaliveAction, KeepaliveStyle, LoginOutcome, SubscribeOutcome, WsApiType};
use super::{decode_gzip, on_ping, sign_v1};
use crate::books::{Level, OrderBook};
use crate::config::Credentials;
use crate::ids::MarketType;
use crate::symbol::Symbol;
use crate::topic::Topic;
use chrono::Utc;
use serde_json::{json, Value};
use xstream_integration::DataError;

#[derive(Debug, Clone, Default)]
pub struct Huobipro;

impl Huobipro {
    pub fn convert_symbol(&self, symbol: &Symbol) -> Result<String, DataError> {
        let (base, quote) = symbol.base_quote()?;
        match symbol.market_type {
            MarketType::Spot | MarketType::Margin => Ok(format!("{base}{quote}").to_lowercase()),
            other => Err(DataError::InvalidSymbol(format!("huobipro only supports spot/margin, got {other}"))),
        }
    }

    pub fn convert_topic(&self, topic: &Topic) -> Result<ConvertedTopic, DataError> {
        let symbol = Symbol::new(topic.exchange_id, topic.market_type, topic.extrainfo.clone());
        let market_id = self.convert_symbol(&symbol)?;
        let subtypes = topic.subtypes();

        let channel = match topic.maintype() {
            "orderbook" => match subtypes.first().copied() {
                None | Some("150") => format!("market.{market_id}.mbp.150"),
                Some("full") | Some("400") => format!("market.{market_id}.mbp.400"),
                Some(other) => return Err(DataError::InvalidTopic(format!("unsupported orderbook depth: {other}"))),
            },
            "trade" => format!("market.{market_id}.trade.detail"),
            "ohlcv" => {
                let period = subtypes.first().copied().unwrap_or("1min");
                format!("market.{market_id}.kline.{period}")
            }
            "ticker" => format!("market.{market_id}.detail"),
            "myorder" => format!("orders#{market_id}"),
            "account" => "accounts".to_string(),
            other => return Err(DataError::InvalidTopic(format!("unsupported huobipro maintype: {other}"))),
        };

        Ok(ConvertedTopic::plain(channel))
    }

    pub fn wsapi_type(&self, topic: &Topic) -> Result<WsApiType, DataError> {
        Ok(match topic.maintype() {
            "myorder" | "account" => WsApiType::Private,
            _ => WsApiType::Market,
        })
    }

    pub fn ws_url(&self, wsapi_type: WsApiType) -> &'static str {
        match wsapi_type {
            WsApiType::Private => "wss://api.huobi.pro/ws/v2",
            _ => "wss://api.huobi.pro/ws",
        }
    }

    pub fn login_required(&self, wsapi_type: WsApiType) -> bool {
        matches!(wsapi_type, WsApiType::Private)
    }

    pub fn keepalive_style(&self) -> KeepaliveStyle {
        KeepaliveStyle::Responsive
    }

    pub fn login_command(&self, credentials: &Credentials) -> Result<Value, DataError> {
        let (query, signature) = sign_v1(credentials, "GET", "api.huobi.pro", "/ws/v2", Utc::now())?;
        let mut params: Vec<(&str, String)> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        params.push(("authType", "api".to_string()));
        let mut data = serde_json::Map::new();
        for (k, v) in params {
            data.insert(k.to_string(), Value::String(v));
        }
        data.insert("signature".to_string(), Value::String(signature));
        Ok(json!({ "action": "req", "ch": "auth", "params": Value::Object(data) }))
    }

    pub fn on_login_message(&self, msg: &Value) -> LoginOutcome {
        if msg.get("ch").and_then(|v| v.as_str()) != Some("auth") {
            return LoginOutcome::Unrelated;
        }
        match msg.get("code").and_then(|v| v.as_i64()) {
            Some(200) => LoginOutcome::Success,
            _ => LoginOutcome::Failure(
                msg.get("message").and_then(|v| v.as_str()).unwrap_or("huobipro auth failed").to_string(),
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

/// The `mbp` feed streams sequential patches with a `prevSeqNum`/`seqNum`
/// pair; a gap means a patch was missed and the book must be re-fetched in
/// full over [`super::wsreq::HuobiWSReq`] before merging can resume.
#[derive(Debug, Clone)]
pub struct HuobiproOrderBookMerger {
    seq_num: Option<u64>,
    pub book: Option<OrderBook>,
}

impl Default for HuobiproOrderBookMerger {
    fn default() -> Self {
        Self {
            seq_num: None,
            book: None,
        }
    }
}

impl HuobiproOrderBookMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A full snapshot fetched via `req`/`rep`, establishing the baseline
    /// `seqNum` patches are then checked against.
    pub fn on_full_refresh(&mut self, bids: Vec<Level>, asks: Vec<Level>, seq_num: u64) {
        self.book = Some(OrderBook::new(bids, asks));
        self.seq_num = Some(seq_num);
    }

    pub fn on_patch(
        &mut self,
        prev_seq_num: u64,
        seq_num: u64,
        bids: Vec<Level>,
        asks: Vec<Level>,
    ) -> Result<(), DataError> {
        let expected = self
            .seq_num
            .ok_or_else(|| DataError::InvalidPatch("huobipro patch received before a full refresh".into()))?;
        if prev_seq_num != expected {
            self.book = None;
            self.seq_num = None;
            return Err(DataError::SeqNum {
                expected,
                got: prev_seq_num,
            });
        }
        let book = self.book.as_mut().expect("seq_num set implies book set");
        book.upsert_bids(bids);
        book.upsert_asks(asks);
        self.seq_num = Some(seq_num);
        Ok(())
    }

    pub fn needs_refresh(&self) -> bool {
        self.book.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ExchangeId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_convert_symbol_lowercases_pair() {
        let symbol = Symbol::parse("huobipro:spot:BTC/USDT").unwrap();
        assert_eq!(Huobipro.convert_symbol(&symbol).unwrap(), "btcusdt");
    }

    #[test]
    fn test_convert_topic_orderbook_default_depth() {
        let topic = Topic::new(ExchangeId::Huobipro, MarketType::Spot, "orderbook", "BTC/USDT");
        let converted = Huobipro.convert_topic(&topic).unwrap();
        assert_eq!(converted.channel, "market.btcusdt.mbp.150");
    }

    #[test]
    fn test_merger_accepts_contiguous_patch() {
        let mut merger = HuobiproOrderBookMerger::new();
        merger.on_full_refresh(vec![Level::new(dec!(10), dec!(1))], vec![Level::new(dec!(11), dec!(1))], 100);
        merger.on_patch(100, 101, vec![Level::new(dec!(10), dec!(2))], vec![]).unwrap();
        assert_eq!(merger.book.as_ref().unwrap().bids.levels()[0].amount, dec!(2));
    }

    #[test]
    fn test_merger_flags_refresh_needed_on_seq_gap() {
        let mut merger = HuobiproOrderBookMerger::new();
        merger.on_full_refresh(vec![], vec![], 100);
        let err = merger.on_patch(105, 106, vec![], vec![]).unwrap_err();
        assert!(matches!(err, DataError::SeqNum { expected: 100, got: 105 }));
        assert!(merger.needs_refresh());
    }
}
