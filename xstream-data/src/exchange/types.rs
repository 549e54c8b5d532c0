use chrono::{DateTime, Utc};
use serde_json::Value;

/// Which WebSocket namespace a topic belongs to on exchanges that split
/// public market data from authenticated private feeds (and, for Huobi,
/// further split futures/swap/index into their own namespaces).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WsApiType {
    /// Binance: a single public market stream, no login.
    Public,
    /// Huobi market-data stream.
    Market,
    /// Private/authenticated stream.
    Private,
    /// Huobi spot private over the v2 (`/ws/v2`) path.
    PrivateV2,
    /// Huobi index stream (derived data, no auth).
    Index,
}

/// The result of translating a [`crate::topic::Topic`] into an exchange's
/// native channel: the channel/template string itself, plus any
/// additional query-style parameters that ride alongside it (Huobi
/// encodes some of these as `?key=value` suffixes split off before
/// sending).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedTopic {
    pub channel: String,
    pub params: Vec<(String, String)>,
}

impl ConvertedTopic {
    pub fn plain(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            params: Vec::new(),
        }
    }
}

/// Outcome of inspecting a frame against the exchange's login-ack shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    Failure(String),
    /// The frame wasn't a login ack at all; pass it through.
    Unrelated,
}

/// Outcome of inspecting a frame against the exchange's subscribe-ack
/// shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Acked, identifying which requested topic (by converted channel
    /// string) it corresponds to.
    Acked(String),
    Failure(String),
    Unrelated,
}

/// How an exchange wants its connection kept alive.
#[derive(Debug, Clone, Copy)]
pub enum KeepaliveStyle {
    /// Binance: no in-band keep-alive; a listen key is renewed over REST
    /// every `interval_secs`.
    ListenKeyRenewal { interval_secs: u64 },
    /// Bitmex/Okex: send a literal `ping` text frame whenever the
    /// connection has been idle for `idle_secs`.
    IdlePing { idle_secs: u64 },
    /// Huobi: the server pings, we must echo the matching pong shape.
    Responsive,
}

/// What to do with an inbound frame the keep-alive pre-processor
/// inspected.
#[derive(Debug, Clone)]
pub enum KeepaliveAction {
    /// Not a keep-alive frame; pass it through unchanged.
    Ignore,
    /// A keep-alive frame was consumed (e.g. a `pong`); nothing to send,
    /// don't forward.
    Consumed,
    /// A keep-alive frame was consumed and a reply must be sent back.
    Reply(Value),
}

/// A fatal, non-recoverable frame the exchange sent (explicit error or
/// server-initiated close).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeFault(pub String);

pub(crate) fn now_ts_ms(now: DateTime<Utc>) -> i64 {
    now.timestamp_millis()
}
