use super::types::{ConvertedTopic, KeepaliveAction, KeepaliveStyle, LoginOutcome, SubscribeOutcome, WsApiType};
use crate::books::{Level, OrderBook};
use crate::config::Credentials;
use crate::ids::MarketType;
use crate::symbol::Symbol;
use crate::time::{contract_delivery_time, ContractExpiration};
use crate::topic::Topic;
use chrono::Utc;
use serde_json::{json, Value};
use xstream_integration::{Awaitables, DataError, Session};

/// Binance has no explicit subscribe/login handshake for market data:
/// subscription lives in the URL query string, and private streams are
/// authenticated purely by a listen key baked into the URL path. The
/// keep-alive job is a REST PUT every 20 minutes to renew that key, not an
/// in-band ping.
#[derive(Debug, Clone)]
pub struct Binance {
    pub delivery_hour_utc: u32,
}

impl Default for Binance {
    fn default() -> Self {
        Self { delivery_hour_utc: 8 }
    }
}

impl Binance {
    pub fn convert_symbol(&self, symbol: &Symbol) -> Result<String, DataError> {
        let (base, quote) = symbol.base_quote()?;
        match symbol.market_type {
            MarketType::Spot | MarketType::Margin => Ok(format!("{base}{quote}")),
            MarketType::SwapUsdt => Ok(format!("{base}{quote}")),
            MarketType::Swap => Ok(format!("{base}{quote}_PERP")),
            MarketType::Futures => {
                let tag = symbol.contract_expiration().ok_or_else(|| {
                    DataError::InvalidSymbol("futures symbol missing contract_expiration".into())
                })?;
                let expiration = ContractExpiration::parse(tag)
                    .ok_or_else(|| DataError::InvalidSymbol(format!("unknown expiration tag: {tag}")))?;
                let delivery = contract_delivery_time(expiration, self.delivery_hour_utc, Utc::now());
                Ok(format!("{base}{quote}_{}", delivery.format("%y%m%d")))
            }
            MarketType::Option | MarketType::Index => {
                Err(DataError::InvalidSymbol("binance has no option/index market".into()))
            }
        }
    }

    pub fn convert_topic(&self, topic: &Topic) -> Result<ConvertedTopic, DataError> {
        let symbol = Symbol::new(topic.exchange_id, topic.market_type, topic.extrainfo.clone());
        let market_id = self.convert_symbol(&symbol)?.to_lowercase();
        let subtypes = topic.subtypes();

        let channel = match topic.maintype() {
            "orderbook" => match subtypes.first().copied() {
                None => format!("{market_id}@depth20@100ms"),
                Some("full") => format!("{market_id}@depth@100ms"),
                Some(level) => format!("{market_id}@depth{level}@100ms"),
            },
            "trade" => format!("{market_id}@trade"),
            "aggtrade" => format!("{market_id}@aggTrade"),
            "ohlcv" => {
                let period = subtypes.first().copied().unwrap_or("1m");
                format!("{market_id}@kline_{period}")
            }
            "ticker" => format!("{market_id}@ticker"),
            "miniticker" => format!("{market_id}@miniTicker"),
            other => return Err(DataError::InvalidTopic(format!("unsupported binance maintype: {other}"))),
        };

        Ok(ConvertedTopic::plain(channel))
    }

    pub fn wsapi_type(&self, topic: &Topic) -> Result<WsApiType, DataError> {
        Ok(match topic.maintype() {
            "myorder" | "account" | "balance" => WsApiType::Private,
            _ => WsApiType::Public,
        })
    }

    /// Market data: a single combined-stream URL whose query string lists
    /// every subscribed channel, joined with `/`. Private: the listen key
    /// is appended as a URL path segment once it has been fetched over
    /// REST (handled by the WSHandler, not here).
    pub fn ws_base_url(&self, market_type: MarketType, wsapi_type: WsApiType) -> Result<&'static str, DataError> {
        match (market_type, wsapi_type) {
            (MarketType::Spot | MarketType::Margin, _) => Ok("wss://stream.binance.com:9443"),
            (MarketType::SwapUsdt, _) => Ok("wss://fstream.binance.com"),
            (MarketType::Swap | MarketType::Futures, _) => Ok("wss://dstream.binance.com"),
            _ => Err(DataError::InvalidTopic("unsupported binance market_type".into())),
        }
    }

    pub fn listen_key_rest_url(&self, market_type: MarketType) -> Result<&'static str, DataError> {
        match market_type {
            MarketType::Spot | MarketType::Margin => Ok("https://api.binance.com/api/v3/userDataStream"),
            MarketType::SwapUsdt => Ok("https://fapi.binance.com/fapi/v1/listenKey"),
            MarketType::Swap | MarketType::Futures => Ok("https://dapi.binance.com/dapi/v1/listenKey"),
            _ => Err(DataError::InvalidTopic("unsupported binance market_type".into())),
        }
    }

    pub fn login_required(&self, wsapi_type: WsApiType) -> bool {
        matches!(wsapi_type, WsApiType::Private)
    }

    pub fn keepalive_style(&self, wsapi_type: WsApiType) -> KeepaliveStyle {
        match wsapi_type {
            WsApiType::Private => KeepaliveStyle::ListenKeyRenewal { interval_secs: 20 * 60 },
            _ => KeepaliveStyle::ListenKeyRenewal { interval_secs: u64::MAX },
        }
    }

    pub fn login_command(&self, _credentials: &Credentials) -> Result<Value, DataError> {
        // The listen key itself is the authenticator; no in-band login
        // frame is ever sent once the socket is open at the listen-key URL.
        Err(DataError::Auth("binance authenticates via listen key URL, not a login frame".into()))
    }

    pub fn on_login_message(&self, _msg: &Value) -> LoginOutcome {
        LoginOutcome::Unrelated
    }

    pub fn subscribe_commands(&self, _topics: &[ConvertedTopic]) -> Vec<Value> {
        // Subscription is encoded in the URL; nothing to send.
        Vec::new()
    }

    pub fn on_subscribe_message(&self, _msg: &Value) -> SubscribeOutcome {
        SubscribeOutcome::Unrelated
    }

    pub fn on_keepalive_message(&self, _msg: &Value) -> KeepaliveAction {
        KeepaliveAction::Ignore
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DataError> {
        serde_json::from_slice(bytes)
            .map_err(|e| DataError::Protocol(format!("invalid binance JSON frame: {e}")))
    }

    /// Build the combined-stream query string Binance expects for public
    /// market data: `?streams=a/b/c`.
    pub fn combined_stream_query(channels: &[String]) -> String {
        format!("streams={}", channels.join("/"))
    }

    pub fn listen_key_renew_request(&self, listen_key: &str) -> Value {
        json!({ "listenKey": listen_key })
    }

    /// REST endpoint for the `GET depth?limit=1000` snapshot a
    /// [`BinanceOrderBookMerger`] fetches once per connect.
    pub fn depth_snapshot_url(&self, market_type: MarketType) -> Result<&'static str, DataError> {
        match market_type {
            MarketType::Spot | MarketType::Margin => Ok("https://api.binance.com/api/v3/depth"),
            MarketType::SwapUsdt => Ok("https://fapi.binance.com/fapi/v1/depth"),
            MarketType::Swap | MarketType::Futures => Ok("https://dapi.binance.com/dapi/v1/depth"),
            _ => Err(DataError::InvalidTopic("unsupported binance market_type".into())),
        }
    }
}

/// Limit Binance's diff-depth stream docs recommend requesting for the
/// snapshot that seeds a [`BinanceOrderBookMerger`].
const SNAPSHOT_DEPTH_LIMIT: u32 = 1000;

/// One `depthUpdate` frame off the diff-depth stream: `U`/`u` bracket the
/// update ids this event covers, `pu` (futures/swap only) chains to the
/// previous event's `u`.
#[derive(Debug, Clone)]
pub struct BinanceDepthEvent {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub prev_final_update_id: Option<u64>,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Which field chains successive deltas together: spot/margin streams use
/// `U == lastUpdateId + 1`, USDT/coin futures streams use `pu ==
/// lastUpdateId` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityScheme {
    Spot,
    Futures,
}

/// REST-snapshot-then-WS-delta merger. Deltas arrive and must be buffered
/// in `cache` while the snapshot fetch is still in flight; once it
/// resolves, every cached delta already covered by the snapshot
/// (`u <= lastUpdateId`) is discarded and the rest replayed.
#[derive(Debug, Clone)]
pub struct BinanceOrderBookMerger {
    scheme: ContinuityScheme,
    cache: Vec<BinanceDepthEvent>,
    last_update_id: Option<u64>,
    needs_seed: bool,
    pub book: Option<OrderBook>,
}

impl BinanceOrderBookMerger {
    pub fn new(scheme: ContinuityScheme) -> Self {
        Self {
            scheme,
            cache: Vec::new(),
            last_update_id: None,
            needs_seed: false,
            book: None,
        }
    }

    /// Dispatch the REST snapshot fetch onto the awaitable executor
    /// registry. This is genuinely asynchronous I/O, not CPU-bound work, so
    /// it goes through `create_task` (spawned on the runtime) rather than
    /// `run_in_executor` (the blocking-pool offload the same registry also
    /// offers) - deltas observed on the WebSocket before the task resolves
    /// are buffered by `on_delta` in the meantime.
    pub fn request_snapshot(
        &self,
        awaitables: &mut Awaitables<Result<(u64, Vec<Level>, Vec<Level>), DataError>>,
        exchange: Binance,
        session: Session,
        market_type: MarketType,
        market_id: String,
        name: Option<String>,
    ) -> Result<String, DataError> {
        awaitables.create_task(
            async move { fetch_depth_snapshot(&exchange, &session, market_type, &market_id).await },
            name,
        )
    }

    /// A WS delta arrived. Buffered until a snapshot is installed, applied
    /// (with continuity validation) after.
    pub fn on_delta(&mut self, event: BinanceDepthEvent) -> Result<(), DataError> {
        if self.book.is_none() {
            self.cache.push(event);
            return Ok(());
        }
        self.apply(event)
    }

    /// Install the REST snapshot: discard every buffered delta it already
    /// covers, then replay whatever's left.
    pub fn on_snapshot(&mut self, last_update_id: u64, bids: Vec<Level>, asks: Vec<Level>) -> Result<(), DataError> {
        self.book = Some(OrderBook::new(bids, asks));
        self.last_update_id = Some(last_update_id);
        self.needs_seed = true;

        let cut = self.cache.partition_point(|e| e.final_update_id <= last_update_id);
        let backlog: Vec<_> = self.cache.split_off(cut);
        self.cache.clear();

        for event in backlog {
            self.apply(event)?;
        }
        Ok(())
    }

    fn apply(&mut self, event: BinanceDepthEvent) -> Result<(), DataError> {
        let tracker = self
            .last_update_id
            .expect("apply is only ever called once a snapshot installed a tracker");

        if self.needs_seed {
            self.needs_seed = false;
        } else {
            match self.scheme {
                ContinuityScheme::Spot => {
                    if event.first_update_id != tracker + 1 {
                        self.book = None;
                        self.last_update_id = None;
                        return Err(DataError::InvalidPatch(format!(
                            "binance spot gap: expected U == {}, got {}",
                            tracker + 1,
                            event.first_update_id
                        )));
                    }
                }
                ContinuityScheme::Futures => {
                    let pu = event.prev_final_update_id.ok_or_else(|| {
                        DataError::InvalidPatch("binance futures delta missing pu".into())
                    })?;
                    if pu != tracker {
                        self.book = None;
                        self.last_update_id = None;
                        return Err(DataError::InvalidPatch(format!(
                            "binance futures gap: expected pu == {tracker}, got {pu}"
                        )));
                    }
                }
            }
        }

        let book = self.book.as_mut().expect("book installed alongside last_update_id");
        book.upsert_bids(event.bids);
        book.upsert_asks(event.asks);
        self.last_update_id = Some(event.final_update_id);
        Ok(())
    }
}

/// Fetch and parse the REST depth snapshot, ready to hand to
/// [`BinanceOrderBookMerger::on_snapshot`].
async fn fetch_depth_snapshot(
    exchange: &Binance,
    session: &Session,
    market_type: MarketType,
    market_id: &str,
) -> Result<(u64, Vec<Level>, Vec<Level>), DataError> {
    let url = exchange.depth_snapshot_url(market_type)?;
    let query = [
        ("symbol".to_string(), market_id.to_string()),
        ("limit".to_string(), SNAPSHOT_DEPTH_LIMIT.to_string()),
    ];
    let body = session.request(reqwest::Method::GET, url, None, Some(&query), None).await?;
    let parsed: Value =
        serde_json::from_slice(&body).map_err(|e| DataError::Protocol(format!("invalid binance depth snapshot: {e}")))?;
    parse_depth_snapshot(&parsed)
}

fn parse_depth_snapshot(msg: &Value) -> Result<(u64, Vec<Level>, Vec<Level>), DataError> {
    let last_update_id = msg
        .get("lastUpdateId")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| DataError::Protocol("binance depth snapshot missing lastUpdateId".into()))?;
    let bids = parse_levels(msg.get("bids"))?;
    let asks = parse_levels(msg.get("asks"))?;
    Ok((last_update_id, bids, asks))
}

fn parse_levels(levels: Option<&Value>) -> Result<Vec<Level>, DataError> {
    levels
        .and_then(|v| v.as_array())
        .ok_or_else(|| DataError::Protocol("binance depth snapshot missing levels".into()))?
        .iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| DataError::Protocol("malformed binance depth row".into()))?;
            let price = row
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| DataError::Protocol("malformed binance depth row".into()))?;
            let amount = row
                .get(1)
                .and_then(|v| v.as_str())
                .ok_or_else(|| DataError::Protocol("malformed binance depth row".into()))?;
            Ok(Level::new(
                price.parse().map_err(|e| DataError::Protocol(format!("bad price in depth row: {e}")))?,
                amount.parse().map_err(|e| DataError::Protocol(format!("bad amount in depth row: {e}")))?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ExchangeId;

    fn exchange() -> Binance {
        Binance::default()
    }

    #[test]
    fn test_convert_symbol_spot_concatenates() {
        let symbol = Symbol::parse("binance:spot:BTC/USDT").unwrap();
        assert_eq!(exchange().convert_symbol(&symbol).unwrap(), "BTCUSDT");
    }

    #[test]
    fn test_convert_symbol_usdt_swap_matches_spot_convention() {
        let symbol = Symbol::parse("binance:swap.usdt:BTC/USDT").unwrap();
        assert_eq!(exchange().convert_symbol(&symbol).unwrap(), "BTCUSDT");
    }

    #[test]
    fn test_convert_symbol_coin_swap_has_perp_suffix() {
        let symbol = Symbol::parse("binance:swap:BTC/USD").unwrap();
        assert_eq!(exchange().convert_symbol(&symbol).unwrap(), "BTCUSD_PERP");
    }

    #[test]
    fn test_convert_topic_orderbook_full_uses_100ms_stream() {
        let topic = Topic::new(ExchangeId::Binance, MarketType::Spot, "orderbook.full", "BTC/USDT");
        let converted = exchange().convert_topic(&topic).unwrap();
        assert_eq!(converted.channel, "btcusdt@depth@100ms");
    }

    #[test]
    fn test_convert_topic_orderbook_default_depth() {
        let topic = Topic::new(ExchangeId::Binance, MarketType::Spot, "orderbook", "BTC/USDT");
        let converted = exchange().convert_topic(&topic).unwrap();
        assert_eq!(converted.channel, "btcusdt@depth20@100ms");
    }

    #[test]
    fn test_wsapi_type_private_for_account_channels() {
        let topic = Topic::new(ExchangeId::Binance, MarketType::Spot, "account", "");
        assert_eq!(exchange().wsapi_type(&topic).unwrap(), WsApiType::Private);
    }

    #[test]
    fn test_login_required_only_for_private() {
        let ex = exchange();
        assert!(ex.login_required(WsApiType::Private));
        assert!(!ex.login_required(WsApiType::Public));
    }

    fn delta(first: u64, last: u64, prev: Option<u64>) -> BinanceDepthEvent {
        BinanceDepthEvent {
            first_update_id: first,
            final_update_id: last,
            prev_final_update_id: prev,
            bids: vec![],
            asks: vec![],
        }
    }

    #[test]
    fn test_merger_buffers_deltas_until_snapshot_arrives() {
        let mut merger = BinanceOrderBookMerger::new(ContinuityScheme::Spot);
        merger.on_delta(delta(101, 103, None)).unwrap();
        assert!(merger.book.is_none());
        merger.on_snapshot(100, vec![], vec![]).unwrap();
        assert!(merger.book.is_some());
        assert_eq!(merger.last_update_id, Some(103));
    }

    #[test]
    fn test_merger_discards_cached_deltas_already_covered_by_snapshot() {
        let mut merger = BinanceOrderBookMerger::new(ContinuityScheme::Spot);
        merger.on_delta(delta(90, 95, None)).unwrap();
        merger.on_delta(delta(96, 100, None)).unwrap();
        merger.on_delta(delta(101, 105, None)).unwrap();
        merger.on_snapshot(100, vec![], vec![]).unwrap();
        assert_eq!(merger.last_update_id, Some(105));
    }

    #[test]
    fn test_merger_spot_gap_after_snapshot_is_invalid_patch() {
        let mut merger = BinanceOrderBookMerger::new(ContinuityScheme::Spot);
        merger.on_snapshot(100, vec![], vec![]).unwrap();
        let err = merger.on_delta(delta(102, 103, None)).unwrap_err();
        assert!(matches!(err, DataError::InvalidPatch(_)));
        assert!(merger.book.is_none());
    }

    #[test]
    fn test_merger_spot_accepts_contiguous_delta() {
        let mut merger = BinanceOrderBookMerger::new(ContinuityScheme::Spot);
        merger.on_snapshot(100, vec![], vec![]).unwrap();
        merger.on_delta(delta(101, 103, None)).unwrap();
        merger.on_delta(delta(104, 106, None)).unwrap();
        assert_eq!(merger.last_update_id, Some(106));
    }

    #[test]
    fn test_merger_futures_uses_pu_not_u() {
        let mut merger = BinanceOrderBookMerger::new(ContinuityScheme::Futures);
        merger.on_snapshot(100, vec![], vec![]).unwrap();
        // U is nowhere near 101, but pu == 100 is what futures continuity checks.
        merger.on_delta(delta(500, 600, Some(100))).unwrap();
        assert_eq!(merger.last_update_id, Some(600));

        let err = merger.on_delta(delta(601, 602, Some(999))).unwrap_err();
        assert!(matches!(err, DataError::InvalidPatch(_)));
    }

    #[test]
    fn test_depth_snapshot_url_by_market_type() {
        let ex = exchange();
        assert_eq!(ex.depth_snapshot_url(MarketType::Spot).unwrap(), "https://api.binance.com/api/v3/depth");
        assert_eq!(ex.depth_snapshot_url(MarketType::SwapUsdt).unwrap(), "https://fapi.binance.com/fapi/v1/depth");
        assert_eq!(ex.depth_snapshot_url(MarketType::Swap).unwrap(), "https://dapi.binance.com/dapi/v1/depth");
    }

    #[test]
    fn test_parse_depth_snapshot_reads_ids_and_levels() {
        let msg = json!({
            "lastUpdateId": 160,
            "bids": [["10.0", "1.5"]],
            "asks": [["11.0", "2.0"]],
        });
        let (last_update_id, bids, asks) = parse_depth_snapshot(&msg).unwrap();
        assert_eq!(last_update_id, 160);
        assert_eq!(bids.len(), 1);
        assert_eq!(asks.len(), 1);
    }
}
