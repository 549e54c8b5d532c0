//! Per-exchange adapters.
//!
//! Each exchange is modelled as its own plain struct with inherent methods;
//! [`Exchange`] is a closed sum type over them. A trait-object design was
//! considered and rejected: login/subscribe/keep-alive/url-building
//! signatures differ enough across exchanges (Okex needs server time for
//! its login signature, Huobi DM needs the connecting host, Bitmex has no
//! login at all for market data) that a single trait would either grow a
//! pile of default-Err methods or force every adapter through an
//! over-general context type. A match over six known variants is simpler
//! and just as exhaustive.

pub mod binance;
pub mod bitmex;
pub mod deribit;
pub mod huobi;
pub mod okex;
pub mod types;

use crate::ids::{ExchangeId, MarketType};
use crate::symbol::Symbol;
use crate::topic::Topic;
use chrono::{DateTime, Utc};
use serde_json::Value;
use types::{ConvertedTopic, KeepaliveAction, KeepaliveStyle, LoginOutcome, SubscribeOutcome, WsApiType};
use xstream_integration::DataError;

use crate::config::Credentials;

#[derive(Debug, Clone)]
pub enum Exchange {
    Binance(binance::Binance),
    Bitmex(bitmex::Bitmex),
    Okex(okex::Okex),
    Huobipro(huobi::pro::Huobipro),
    Huobidm(huobi::dm::Huobidm),
    Deribit(deribit::Deribit),
}

/// Context a login command may need beyond the stored credentials: Okex
/// signs against server time (to tolerate local clock drift), Huobi DM
/// signs against the literal host it's connecting to.
#[derive(Debug, Clone)]
pub struct LoginContext {
    pub server_time: DateTime<Utc>,
    pub host: String,
}

impl Exchange {
    pub fn id(&self) -> ExchangeId {
        match self {
            Exchange::Binance(_) => ExchangeId::Binance,
            Exchange::Bitmex(_) => ExchangeId::Bitmex,
            Exchange::Okex(_) => ExchangeId::Okex,
            Exchange::Huobipro(_) => ExchangeId::Huobipro,
            Exchange::Huobidm(_) => ExchangeId::Huobidm,
            Exchange::Deribit(_) => ExchangeId::Deribit,
        }
    }

    pub fn convert_symbol(&self, symbol: &Symbol) -> Result<String, DataError> {
        match self {
            Exchange::Binance(ex) => ex.convert_symbol(symbol),
            Exchange::Bitmex(ex) => ex.convert_symbol(symbol),
            Exchange::Okex(ex) => ex.convert_symbol(symbol),
            Exchange::Huobipro(ex) => ex.convert_symbol(symbol),
            Exchange::Huobidm(ex) => ex.convert_symbol(symbol),
            Exchange::Deribit(ex) => ex.convert_symbol(symbol),
        }
    }

    pub fn convert_topic(&self, topic: &Topic) -> Result<ConvertedTopic, DataError> {
        match self {
            Exchange::Binance(ex) => ex.convert_topic(topic),
            Exchange::Bitmex(ex) => ex.convert_topic(topic),
            Exchange::Okex(ex) => ex.convert_topic(topic),
            Exchange::Huobipro(ex) => ex.convert_topic(topic),
            Exchange::Huobidm(ex) => ex.convert_topic(topic),
            Exchange::Deribit(ex) => ex.convert_topic(topic),
        }
    }

    pub fn wsapi_type(&self, topic: &Topic) -> Result<WsApiType, DataError> {
        match self {
            Exchange::Binance(ex) => ex.wsapi_type(topic),
            Exchange::Bitmex(ex) => ex.wsapi_type(topic),
            Exchange::Okex(ex) => ex.wsapi_type(topic),
            Exchange::Huobipro(ex) => ex.wsapi_type(topic),
            Exchange::Huobidm(ex) => ex.wsapi_type(topic),
            Exchange::Deribit(ex) => ex.wsapi_type(topic),
        }
    }

    /// Every topic in a single connection must resolve to the same
    /// [`WsApiType`] - mixing a private feed into a public-data socket (or
    /// vice versa) is a caller error, not something to silently split.
    pub fn resolve_wsapi_type(&self, topics: &[Topic]) -> Result<WsApiType, DataError> {
        let mut resolved = None;
        for topic in topics {
            let wsapi_type = self.wsapi_type(topic)?;
            match resolved {
                None => resolved = Some(wsapi_type),
                Some(existing) if existing == wsapi_type => {}
                Some(_) => {
                    return Err(DataError::Subscribe(format!(
                        "topics resolve to mixed ws api types; connect them separately: {topic}"
                    )))
                }
            }
        }
        resolved.ok_or_else(|| DataError::Subscribe("no topics given".into()))
    }

    pub fn ws_url(&self, market_type: MarketType, wsapi_type: WsApiType) -> Result<String, DataError> {
        match self {
            Exchange::Binance(ex) => ex.ws_base_url(market_type, wsapi_type).map(str::to_string),
            Exchange::Bitmex(ex) => Ok(ex.ws_url().to_string()),
            Exchange::Okex(ex) => Ok(ex.ws_url(wsapi_type).to_string()),
            Exchange::Huobipro(ex) => Ok(ex.ws_url(wsapi_type).to_string()),
            Exchange::Huobidm(ex) => ex.ws_url(market_type, wsapi_type).map(str::to_string),
            Exchange::Deribit(ex) => Ok(ex.ws_url().to_string()),
        }
    }

    pub fn login_required(&self, wsapi_type: WsApiType) -> bool {
        match self {
            Exchange::Binance(ex) => ex.login_required(wsapi_type),
            Exchange::Bitmex(ex) => ex.login_required(wsapi_type),
            Exchange::Okex(ex) => ex.login_required(wsapi_type),
            Exchange::Huobipro(ex) => ex.login_required(wsapi_type),
            Exchange::Huobidm(ex) => ex.login_required(wsapi_type),
            Exchange::Deribit(ex) => ex.login_required(wsapi_type),
        }
    }

    pub fn keepalive_style(&self, wsapi_type: WsApiType) -> KeepaliveStyle {
        match self {
            Exchange::Binance(ex) => ex.keepalive_style(wsapi_type),
            Exchange::Bitmex(ex) => ex.keepalive_style(),
            Exchange::Okex(ex) => ex.keepalive_style(),
            Exchange::Huobipro(ex) => ex.keepalive_style(),
            Exchange::Huobidm(ex) => ex.keepalive_style(),
            Exchange::Deribit(ex) => ex.keepalive_style(),
        }
    }

    pub fn login_command(&self, credentials: &Credentials, ctx: &LoginContext) -> Result<Value, DataError> {
        match self {
            Exchange::Binance(ex) => ex.login_command(credentials),
            Exchange::Bitmex(ex) => ex.login_command(credentials),
            Exchange::Okex(ex) => ex.login_command(credentials, ctx.server_time),
            Exchange::Huobipro(ex) => ex.login_command(credentials),
            Exchange::Huobidm(ex) => ex.login_command(credentials, &ctx.host),
            Exchange::Deribit(ex) => ex.login_command(credentials),
        }
    }

    pub fn on_login_message(&self, msg: &Value) -> LoginOutcome {
        match self {
            Exchange::Binance(ex) => ex.on_login_message(msg),
            Exchange::Bitmex(ex) => ex.on_login_message(msg),
            Exchange::Okex(ex) => ex.on_login_message(msg),
            Exchange::Huobipro(ex) => ex.on_login_message(msg),
            Exchange::Huobidm(ex) => ex.on_login_message(msg),
            Exchange::Deribit(ex) => ex.on_login_message(msg),
        }
    }

    pub fn subscribe_commands(&self, topics: &[ConvertedTopic]) -> Vec<Value> {
        match self {
            Exchange::Binance(ex) => ex.subscribe_commands(topics),
            Exchange::Bitmex(ex) => ex.subscribe_commands(topics),
            Exchange::Okex(ex) => ex.subscribe_commands(topics),
            Exchange::Huobipro(ex) => ex.subscribe_commands(topics),
            Exchange::Huobidm(ex) => ex.subscribe_commands(topics),
            Exchange::Deribit(ex) => ex.subscribe_commands(topics),
        }
    }

    pub fn on_subscribe_message(&self, msg: &Value) -> SubscribeOutcome {
        match self {
            Exchange::Binance(ex) => ex.on_subscribe_message(msg),
            Exchange::Bitmex(ex) => ex.on_subscribe_message(msg),
            Exchange::Okex(ex) => ex.on_subscribe_message(msg),
            Exchange::Huobipro(ex) => ex.on_subscribe_message(msg),
            Exchange::Huobidm(ex) => ex.on_subscribe_message(msg),
            Exchange::Deribit(ex) => ex.on_subscribe_message(msg),
        }
    }

    pub fn on_keepalive_message(&self, msg: &Value) -> KeepaliveAction {
        match self {
            Exchange::Binance(ex) => ex.on_keepalive_message(msg),
            Exchange::Bitmex(ex) => ex.on_keepalive_message(msg),
            Exchange::Okex(ex) => ex.on_keepalive_message(msg.as_str().unwrap_or_default()),
            Exchange::Huobipro(ex) => ex.on_keepalive_message(msg),
            Exchange::Huobidm(ex) => ex.on_keepalive_message(msg),
            Exchange::Deribit(ex) => ex.on_keepalive_message(msg),
        }
    }

    /// Decode a raw inbound frame to JSON. Okex/Huobi frames are
    /// compressed; Bitmex's literal `pong` text reply isn't JSON at all but
    /// is handled specially by its own `decode`.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DataError> {
        match self {
            Exchange::Binance(ex) => ex.decode(bytes),
            Exchange::Bitmex(ex) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| DataError::Protocol(format!("bitmex frame is not valid UTF-8: {e}")))?;
                ex.decode(text)
            }
            Exchange::Okex(ex) => ex.decode(bytes),
            Exchange::Huobipro(ex) => ex.decode(bytes),
            Exchange::Huobidm(ex) => ex.decode(bytes),
            Exchange::Deribit(ex) => ex.decode(bytes),
        }
    }
}
