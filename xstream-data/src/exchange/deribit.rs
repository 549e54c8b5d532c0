use super::types::{ConvertedTopic, KeepaliveAction, KeepaliveStyle, LoginOutcome, SubscribeOutcome, WsApiType};
use crate::config::Credentials;
use crate::ids::MarketType;
use crate::symbol::Symbol;
use crate::topic::Topic;
use serde_json::{json, Value};
use xstream_integration::DataError;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Deribit has no bespoke order-book merger or multi-stage handshake of its
/// own: the public JSON-RPC feed already streams fully-formed `change`
/// notifications keyed by price, so the shared [`crate::books::merge::merge_side`]
/// primitive applies them directly with no sequencing layer in front of it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deribit;

impl Deribit {
    pub fn convert_symbol(&self, symbol: &Symbol) -> Result<String, DataError> {
        let (base, _quote) = symbol.base_quote()?;
        match symbol.market_type {
            MarketType::Swap => Ok(format!("{base}-PERPETUAL")),
            MarketType::Futures => {
                let tag = symbol
                    .contract_expiration()
                    .ok_or_else(|| DataError::InvalidSymbol("futures symbol missing expiration".into()))?;
                Ok(format!("{base}-{}", Self::month_name_date(tag)?))
            }
            MarketType::Option => {
                let tag = symbol
                    .contract_expiration()
                    .ok_or_else(|| DataError::InvalidSymbol("option symbol missing strike/side tag".into()))?;
                let (date_part, strike_side) = tag
                    .split_once('-')
                    .ok_or_else(|| DataError::InvalidSymbol(format!("malformed option tag: {tag}")))?;
                let (strike, side) = strike_side
                    .rsplit_once('-')
                    .ok_or_else(|| DataError::InvalidSymbol(format!("malformed option tag: {tag}")))?;
                Ok(format!("{base}-{}-{strike}-{side}", Self::month_name_date(date_part)?))
            }
            other => Err(DataError::InvalidSymbol(format!("deribit does not support {other}"))),
        }
    }

    /// `DDMMMYY` date tag, e.g. `25DEC26`, passed through literally (this
    /// is Deribit's native listing format, not a relative CW/NW/CQ/NQ tag).
    fn month_name_date(tag: &str) -> Result<String, DataError> {
        if tag.len() < 5 {
            return Err(DataError::InvalidSymbol(format!("malformed deribit date tag: {tag}")));
        }
        let (day_and_month, year) = tag.split_at(tag.len() - 2);
        let month_part = &day_and_month[day_and_month.len() - 3..];
        if !MONTH_NAMES.contains(&month_part.to_uppercase().as_str()) {
            return Err(DataError::InvalidSymbol(format!("unrecognised month in date tag: {tag}")));
        }
        Ok(format!("{}{}", day_and_month.to_uppercase(), year))
    }

    pub fn convert_topic(&self, topic: &Topic) -> Result<ConvertedTopic, DataError> {
        let symbol = Symbol::new(topic.exchange_id, topic.market_type, topic.extrainfo.clone());
        let instrument = self.convert_symbol(&symbol)?;
        let subtypes = topic.subtypes();

        let channel = match topic.maintype() {
            "orderbook" => {
                let group = subtypes.first().copied().unwrap_or("agg2");
                format!("book.{instrument}.{group}.10.100ms")
            }
            "trade" => format!("trades.{instrument}.100ms"),
            "ticker" => format!("ticker.{instrument}.100ms"),
            "myorder" => format!("user.orders.{instrument}.raw"),
            other => return Err(DataError::InvalidTopic(format!("unsupported deribit maintype: {other}"))),
        };

        Ok(ConvertedTopic::plain(channel))
    }

    pub fn wsapi_type(&self, topic: &Topic) -> Result<WsApiType, DataError> {
        Ok(match topic.maintype() {
            "myorder" => WsApiType::Private,
            _ => WsApiType::Public,
        })
    }

    pub fn ws_url(&self) -> &'static str {
        "wss://www.deribit.com/ws/api/v2"
    }

    pub fn login_required(&self, wsapi_type: WsApiType) -> bool {
        matches!(wsapi_type, WsApiType::Private)
    }

    pub fn keepalive_style(&self) -> KeepaliveStyle {
        KeepaliveStyle::IdlePing { idle_secs: 30 }
    }

    /// JSON-RPC `public/auth` with `grant_type: client_credentials`.
    pub fn login_command(&self, credentials: &Credentials) -> Result<Value, DataError> {
        Ok(json!({
            "jsonrpc": "2.0",
            "id": "login",
            "method": "public/auth",
            "params": {
                "grant_type": "client_credentials",
                "client_id": credentials.api_key,
                "client_secret": credentials.secret,
            },
        }))
    }

    pub fn on_login_message(&self, msg: &Value) -> LoginOutcome {
        if msg.get("id").and_then(|v| v.as_str()) != Some("login") {
            return LoginOutcome::Unrelated;
        }
        if msg.get("result").and_then(|r| r.get("access_token")).is_some() {
            LoginOutcome::Success
        } else {
            LoginOutcome::Failure(
                msg.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("deribit auth failed")
                    .to_string(),
            )
        }
    }

    pub fn subscribe_commands(&self, topics: &[ConvertedTopic]) -> Vec<Value> {
        let channels: Vec<String> = topics.iter().map(|t| t.channel.clone()).collect();
        vec![json!({
            "jsonrpc": "2.0",
            "id": "subscribe",
            "method": "public/subscribe",
            "params": { "channels": channels },
        })]
    }

    pub fn on_subscribe_message(&self, msg: &Value) -> SubscribeOutcome {
        if msg.get("id").and_then(|v| v.as_str()) != Some("subscribe") {
            return SubscribeOutcome::Unrelated;
        }
        match msg.get("result").and_then(|r| r.as_array()) {
            Some(channels) if !channels.is_empty() => {
                SubscribeOutcome::Acked(channels[0].as_str().unwrap_or_default().to_string())
            }
            _ => SubscribeOutcome::Failure(
                msg.get("error").and_then(|e| e.get("message")).and_then(|v| v.as_str()).unwrap_or("subscribe failed").to_string(),
            ),
        }
    }

    pub fn on_keepalive_message(&self, msg: &Value) -> KeepaliveAction {
        if msg.get("method").and_then(|v| v.as_str()) == Some("heartbeat") {
            KeepaliveAction::Reply(json!({
                "jsonrpc": "2.0",
                "method": "public/test",
                "params": {},
            }))
        } else {
            KeepaliveAction::Ignore
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DataError> {
        serde_json::from_slice(bytes).map_err(|e| DataError::Protocol(format!("invalid deribit JSON frame: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ExchangeId;

    #[test]
    fn test_convert_symbol_swap_is_perpetual() {
        let symbol = Symbol::parse("deribit:swap:BTC/USD").unwrap();
        assert_eq!(Deribit.convert_symbol(&symbol).unwrap(), "BTC-PERPETUAL");
    }

    #[test]
    fn test_login_ack_extracts_access_token() {
        let ok = json!({"id": "login", "result": {"access_token": "tok"}});
        assert_eq!(Deribit.on_login_message(&ok), LoginOutcome::Success);
    }

    #[test]
    fn test_on_keepalive_replies_to_heartbeat() {
        let msg = json!({"method": "heartbeat"});
        assert!(matches!(Deribit.on_keepalive_message(&msg), KeepaliveAction::Reply(_)));
    }

    #[test]
    fn test_convert_topic_orderbook_default_group() {
        let topic = Topic::new(ExchangeId::Deribit, MarketType::Swap, "orderbook", "BTC/USD");
        let converted = Deribit.convert_topic(&topic).unwrap();
        assert_eq!(converted.channel, "book.BTC-PERPETUAL.agg2.10.100ms");
    }
}
