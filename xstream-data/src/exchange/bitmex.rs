use super::types::{ConvertedTopic, KeepaliveAction, KeepaliveStyle, LoginOutcome, SubscribeOutcome, WsApiType};
use crate::books::{merge::merge_side, Level, OrderBook};
use crate::config::Credentials;
use crate::ids::MarketType;
use crate::symbol::Symbol;
use crate::time::{contract_delivery_time, ContractExpiration};
use crate::topic::Topic;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use xstream_integration::DataError;

#[derive(Debug, Clone)]
pub struct Bitmex {
    pub delivery_hour_utc: u32,
    pub testnet: bool,
}

impl Default for Bitmex {
    fn default() -> Self {
        Self {
            delivery_hour_utc: 12,
            testnet: false,
        }
    }
}

fn quarterly_month_code(month: u32) -> Result<char, DataError> {
    match month {
        3 => Ok('H'),
        6 => Ok('M'),
        9 => Ok('U'),
        12 => Ok('Z'),
        other => Err(DataError::InvalidSymbol(format!(
            "bitmex quarterly futures must expire in Mar/Jun/Sep/Dec, got month {other}"
        ))),
    }
}

impl Bitmex {
    pub fn convert_symbol(&self, symbol: &Symbol) -> Result<String, DataError> {
        let (base, quote) = symbol.base_quote()?;
        match symbol.market_type {
            MarketType::Swap => match (base, quote) {
                ("BTC", "USD") => Ok("XBTUSD".to_string()),
                _ => Ok(format!("{base}{quote}")),
            },
            MarketType::Futures => {
                let tag = symbol
                    .contract_expiration()
                    .ok_or_else(|| DataError::InvalidSymbol("futures symbol missing expiration".into()))?;
                let expiration = ContractExpiration::parse(tag)
                    .ok_or_else(|| DataError::InvalidSymbol(format!("unknown expiration tag: {tag}")))?;
                let delivery = contract_delivery_time(expiration, self.delivery_hour_utc, Utc::now());
                let code = quarterly_month_code(delivery.format("%m").to_string().parse().unwrap())?;
                let yy = delivery.format("%y");
                let root = if base == "BTC" { "XBT".to_string() } else { base.to_string() };
                Ok(format!("{root}{code}{yy}"))
            }
            MarketType::Index => Ok(symbol.name.to_string()),
            _ => Err(DataError::InvalidSymbol("bitmex only supports swap/futures/index".into())),
        }
    }

    pub fn convert_topic(&self, topic: &Topic) -> Result<ConvertedTopic, DataError> {
        const ALLOWED: &[&str] = &[
            "orderbook", "trade", "quote", "announcement", "chat", "connected", "funding",
            "instrument", "insurance", "liquidation", "publicnotifications", "settlement",
            "affiliate", "execution", "myorder", "margin", "position", "privatenotifications",
            "transact", "wallet",
        ];
        let maintype = topic.maintype();
        if !ALLOWED.contains(&maintype) {
            return Err(DataError::InvalidTopic(format!("unsupported bitmex maintype: {maintype}")));
        }

        let subtypes = topic.subtypes();
        let base_channel = match maintype {
            "orderbook" => match subtypes.first().copied() {
                None => "orderBook10".to_string(),
                Some("full") => "orderBookL2".to_string(),
                Some("25") => "orderBookL2_25".to_string(),
                Some(other) => return Err(DataError::InvalidTopic(format!("unsupported orderbook level: {other}"))),
            },
            "quote" => match subtypes.first() {
                Some(period) => format!("quoteBin{period}"),
                None => "quote".to_string(),
            },
            "trade" => match subtypes.first() {
                Some(period) => format!("tradeBin{period}"),
                None => "trade".to_string(),
            },
            "myorder" => "order".to_string(),
            other => other.to_string(),
        };

        let channel = if topic.extrainfo.is_empty() {
            base_channel
        } else {
            let symbol = Symbol::new(topic.exchange_id, topic.market_type, topic.extrainfo.clone());
            format!("{base_channel}:{}", self.convert_symbol(&symbol)?)
        };

        Ok(ConvertedTopic::plain(channel))
    }

    pub fn wsapi_type(&self, topic: &Topic) -> Result<WsApiType, DataError> {
        const PRIVATE: &[&str] = &[
            "myorder", "margin", "position", "affiliate", "execution",
            "privatenotifications", "transact", "wallet",
        ];
        Ok(if PRIVATE.contains(&topic.maintype()) {
            WsApiType::Private
        } else {
            WsApiType::Public
        })
    }

    pub fn ws_url(&self) -> &'static str {
        if self.testnet {
            "wss://testnet.bitmex.com/realtime"
        } else {
            "wss://www.bitmex.com/realtime"
        }
    }

    pub fn login_required(&self, wsapi_type: WsApiType) -> bool {
        matches!(wsapi_type, WsApiType::Private)
    }

    pub fn keepalive_style(&self) -> KeepaliveStyle {
        KeepaliveStyle::IdlePing { idle_secs: 5 }
    }

    /// `signature = hex(hmac_sha256(secret, "GET/realtime" + expires))`,
    /// `expires` a Unix timestamp roughly 1000 days in the future.
    pub fn login_command(&self, credentials: &Credentials) -> Result<Value, DataError> {
        let expires = Utc::now().timestamp() + 1000 * 24 * 60 * 60;
        let payload = format!("GET/realtime{expires}");
        let mut mac = Hmac::<Sha256>::new_from_slice(credentials.secret.as_bytes())
            .map_err(|e| DataError::Auth(e.to_string()))?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(json!({
            "op": "authKeyExpires",
            "args": [credentials.api_key, expires, signature],
        }))
    }

    pub fn on_login_message(&self, msg: &Value) -> LoginOutcome {
        let is_auth_ack = msg
            .get("request")
            .and_then(|r| r.get("op"))
            .and_then(|op| op.as_str())
            == Some("authKeyExpires");
        if !is_auth_ack {
            return LoginOutcome::Unrelated;
        }
        match msg.get("success").and_then(|v| v.as_bool()) {
            Some(true) => LoginOutcome::Success,
            _ => LoginOutcome::Failure("bitmex rejected authKeyExpires".into()),
        }
    }

    pub fn subscribe_commands(&self, topics: &[ConvertedTopic]) -> Vec<Value> {
        let args: Vec<String> = topics.iter().map(|t| t.channel.clone()).collect();
        vec![json!({ "op": "subscribe", "args": args })]
    }

    pub fn on_subscribe_message(&self, msg: &Value) -> SubscribeOutcome {
        match msg.get("subscribe").and_then(|v| v.as_str()) {
            Some(topic) => SubscribeOutcome::Acked(topic.to_string()),
            None => SubscribeOutcome::Unrelated,
        }
    }

    pub fn on_keepalive_message(&self, msg: &Value) -> KeepaliveAction {
        if msg.as_str() == Some("pong") {
            KeepaliveAction::Consumed
        } else {
            KeepaliveAction::Ignore
        }
    }

    /// Bitmex sends JSON except for the literal `pong` text reply to our
    /// keep-alive ping.
    pub fn decode(&self, text: &str) -> Result<Value, DataError> {
        if text == "pong" {
            return Ok(Value::String("pong".into()));
        }
        serde_json::from_str(text).map_err(|e| DataError::Protocol(format!("invalid bitmex JSON frame: {e}")))
    }
}

/// Row identity on Bitmex is an opaque integer id rather than a price;
/// `partial` establishes the id→row map, `update`/`delete`/`insert` mutate
/// it, and the sorted [`OrderBook`] view is rebuilt from the map after
/// every mutation.
#[derive(Debug, Clone)]
pub struct BitmexOrderBookMerger {
    rows: HashMap<i64, BitmexRow>,
    pub book: Option<OrderBook>,
}

#[derive(Debug, Clone, Copy)]
struct BitmexRow {
    side_is_sell: bool,
    price: Decimal,
    size: Decimal,
}

impl Default for BitmexOrderBookMerger {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            book: None,
        }
    }
}

impl BitmexOrderBookMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_partial(&mut self, rows: Vec<(i64, bool, Decimal, Decimal)>) {
        self.rows.clear();
        for (id, side_is_sell, price, size) in rows {
            self.rows.insert(id, BitmexRow { side_is_sell, price, size });
        }
        self.rebuild();
    }

    pub fn on_update(&mut self, updates: Vec<(i64, Decimal)>) -> Result<(), DataError> {
        if self.book.is_none() {
            return Ok(()); // ignore until a partial establishes the book
        }
        for (id, size) in updates {
            if let Some(row) = self.rows.get_mut(&id) {
                row.size = size;
            }
        }
        self.rebuild();
        Ok(())
    }

    pub fn on_insert(&mut self, rows: Vec<(i64, bool, Decimal, Decimal)>) {
        if self.book.is_none() {
            return;
        }
        for (id, side_is_sell, price, size) in rows {
            self.rows.insert(id, BitmexRow { side_is_sell, price, size });
        }
        self.rebuild();
    }

    pub fn on_delete(&mut self, ids: Vec<i64>) {
        if self.book.is_none() {
            return;
        }
        for id in ids {
            self.rows.remove(&id);
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let mut bids = Vec::new();
        let mut asks = Vec::new();
        for row in self.rows.values() {
            let level = Level::new(row.price, row.size);
            if row.side_is_sell {
                asks.push(level);
            } else {
                bids.push(level);
            }
        }
        let mut book = OrderBook::new(Vec::new(), Vec::new());
        merge_side(&mut book.bids, bids);
        merge_side(&mut book.asks, asks);
        self.book = Some(book);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ExchangeId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_convert_symbol_btc_swap_is_xbtusd() {
        let symbol = Symbol::parse("bitmex:swap:BTC/USD").unwrap();
        assert_eq!(Bitmex::default().convert_symbol(&symbol).unwrap(), "XBTUSD");
    }

    #[test]
    fn test_convert_topic_orderbook_full_is_l2() {
        let topic = Topic::new(ExchangeId::Bitmex, MarketType::Swap, "orderbook.full", "BTC/USD");
        let converted = Bitmex::default().convert_topic(&topic).unwrap();
        assert_eq!(converted.channel, "orderBookL2:XBTUSD");
    }

    #[test]
    fn test_login_ack_detection() {
        let ex = Bitmex::default();
        let success = json!({"success": true, "request": {"op": "authKeyExpires"}});
        assert_eq!(ex.on_login_message(&success), LoginOutcome::Success);

        let unrelated = json!({"table": "trade"});
        assert_eq!(ex.on_login_message(&unrelated), LoginOutcome::Unrelated);
    }

    #[test]
    fn test_keepalive_consumes_literal_pong() {
        let ex = Bitmex::default();
        assert!(matches!(ex.on_keepalive_message(&json!("pong")), KeepaliveAction::Consumed));
    }

    #[test]
    fn test_order_book_merger_partial_then_update_and_delete() {
        let mut merger = BitmexOrderBookMerger::new();
        merger.on_partial(vec![
            (1, false, dec!(100), dec!(5)),
            (2, true, dec!(101), dec!(3)),
        ]);
        assert_eq!(merger.book.as_ref().unwrap().bids.levels().len(), 1);

        merger.on_update(vec![(1, dec!(9))]).unwrap();
        assert_eq!(merger.book.as_ref().unwrap().bids.levels()[0].amount, dec!(9));

        merger.on_delete(vec![2]);
        assert!(merger.book.as_ref().unwrap().asks.levels().is_empty());
    }

    #[test]
    fn test_order_book_merger_ignores_updates_before_partial() {
        let mut merger = BitmexOrderBookMerger::new();
        merger.on_update(vec![(1, dec!(9))]).unwrap();
        assert!(merger.book.is_none());
    }
}
