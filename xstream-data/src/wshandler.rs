//! The per-connection state machine: connect, authenticate if required,
//! subscribe, then stream decoded frames to the caller until the socket
//! closes or a fatal error occurs.
//!
//! `WSHandler` is generic over [`Transport`] rather than hardwired to a
//! live [`xstream_integration::protocol::websocket::WebSocket`] so the
//! state machine itself - the part worth getting right - can be driven by
//! an in-memory fake in tests without ever opening a socket.
//!
//! Receive, keep-alive, login and subscribe are all selected over a single
//! [`Awaitables`] registry rather than a hand-rolled `tokio::select!` or a
//! bare `tokio::time::timeout(transport.recv())`: the reader half of the
//! transport is moved into a freshly spawned "recv" task each time the
//! previous one resolves (a "hot potato" - the task returns the reader
//! alongside its result so the next task can take it back), and an
//! `IdlePing` exchange registers a sibling "keepalive" task that fires a
//! single tick after the idle window. `Awaitables::wait` races whichever of
//! those is pending and is reused for the handshake's own timeout via its
//! `timeout` parameter, so there is exactly one multiplexing point in this
//! file rather than one per phase.

use crate::config::Credentials;
use crate::exchange::types::{ConvertedTopic, KeepaliveAction, KeepaliveStyle, SubscribeOutcome};
use crate::exchange::types::LoginOutcome;
use crate::exchange::{Exchange, LoginContext};
use crate::ids::MarketType;
use crate::topic::Topic;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use xstream_integration::{Awaitables, CursorList, DataError};

/// The lifecycle a single connection moves through, in order. A handler
/// never goes backwards; a fresh reconnect means a fresh `WSHandler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Connecting,
    Authenticating,
    Subscribing,
    Streaming,
    Closed,
}

/// The write half of a transport. Owned directly by `WSHandler` since
/// sends are synchronous (never contended with the recv task).
#[async_trait]
pub trait TransportWriter: std::fmt::Debug + Send {
    async fn send(&mut self, frame: Value) -> Result<(), DataError>;
}

/// The read half of a transport. Moved by value into each spawned "recv"
/// task rather than borrowed, so a pending receive never blocks a
/// concurrent send through the writer half.
#[async_trait]
pub trait TransportReader: std::fmt::Debug + Send + 'static {
    /// `Ok(None)` means the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, DataError>;
}

/// What a `WSHandler` reads and writes frames through, split into
/// independent reader/writer halves. Implemented for a live WebSocket by
/// [`WebSocketTransport`]; tests implement it over an in-memory pair.
pub trait Transport: std::fmt::Debug + Send {
    type Reader: TransportReader;
    type Writer: TransportWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Default time to wait for a login or subscribe acknowledgement before
/// giving up on the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the scheduler's `Awaitables` registry can resolve to: either the
/// recv task handing back the reader it borrowed plus what it read, or a
/// keep-alive timer firing.
enum SchedulerEvent<R> {
    Frame(R, Result<Option<Vec<u8>>, DataError>),
    KeepaliveTick,
}

/// Spawn a fresh "recv" task taking ownership of `reader`. The task reads
/// exactly one frame and hands the reader back in its result so the caller
/// can immediately respawn it - the reader is never shared or borrowed
/// across tasks, only ever owned by whichever task is currently using it.
fn spawn_recv<R>(awaitables: &mut Awaitables<SchedulerEvent<R>>, mut reader: R) -> Result<String, DataError>
where
    R: TransportReader,
{
    awaitables.create_task(
        async move {
            let result = reader.recv().await;
            SchedulerEvent::Frame(reader, result)
        },
        Some("recv".to_string()),
    )
}

/// Spawn a one-shot "keepalive" task that resolves after `idle` has
/// elapsed. This is a periodic ping, not an idle-reset timer: `Awaitables`
/// has no way to cancel or replace a single named task before it
/// completes, so the tick fires on a fixed cadence from when it's spawned
/// rather than restarting every time a frame arrives.
fn spawn_keepalive_tick<R>(awaitables: &mut Awaitables<SchedulerEvent<R>>, idle: Duration) -> Result<String, DataError>
where
    R: TransportReader,
{
    awaitables.create_task(
        async move {
            tokio::time::sleep(idle).await;
            SchedulerEvent::KeepaliveTick
        },
        Some("keepalive".to_string()),
    )
}

#[derive(Debug)]
pub struct WSHandler<T: Transport> {
    exchange: Exchange,
    writer: T::Writer,
    state: State,
    handshake_timeout: Duration,
    awaitables: Awaitables<SchedulerEvent<T::Reader>>,
}

impl<T: Transport> WSHandler<T> {
    /// Must be called from within a Tokio runtime: the reader half is
    /// handed to a spawned "recv" task immediately so it starts filling
    /// before the caller ever calls [`Self::run`].
    pub fn new(exchange: Exchange, transport: T) -> Self {
        let (reader, writer) = transport.split();
        let mut awaitables = Awaitables::new();
        // infallible: a brand new registry can't already hold a "recv" task.
        spawn_recv(&mut awaitables, reader).expect("fresh registry has no recv task registered");

        Self {
            exchange,
            writer,
            state: State::Init,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            awaitables,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Drive the full handshake (auth if required, then subscribe) and
    /// stream decoded application frames to `tx` until the connection
    /// closes or a fatal error is hit. On any error the handler moves to
    /// [`State::Closed`]; the caller owns reconnect policy.
    pub async fn run(
        &mut self,
        topics: &[Topic],
        credentials: Option<&Credentials>,
        tx: mpsc::Sender<Value>,
    ) -> Result<(), DataError> {
        self.state = State::Connecting;
        let result = self.do_run(topics, credentials, &tx).await;
        self.awaitables.cleanup().await;
        self.state = State::Closed;
        result
    }

    async fn do_run(
        &mut self,
        topics: &[Topic],
        credentials: Option<&Credentials>,
        tx: &mpsc::Sender<Value>,
    ) -> Result<(), DataError> {
        let wsapi_type = self.exchange.resolve_wsapi_type(topics)?;
        let converted: Vec<ConvertedTopic> = topics
            .iter()
            .map(|t| self.exchange.convert_topic(t))
            .collect::<Result<_, _>>()?;

        if self.exchange.login_required(wsapi_type) {
            self.state = State::Authenticating;
            let credentials = credentials
                .ok_or_else(|| DataError::Auth("login required but no credentials supplied".into()))?;
            self.authenticate(credentials).await?;
        }

        self.state = State::Subscribing;
        self.subscribe(&converted).await?;

        self.state = State::Streaming;
        self.stream(wsapi_type, tx).await
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DataError> {
        let ctx = LoginContext {
            server_time: chrono::Utc::now(),
            host: String::new(),
        };
        let login_frame = self.exchange.login_command(credentials, &ctx)?;
        self.writer.send(login_frame).await?;

        loop {
            let frame = self.next_frame().await?;
            if let KeepaliveAction::Reply(reply) = self.exchange.on_keepalive_message(&frame) {
                self.writer.send(reply).await?;
                continue;
            }
            match self.exchange.on_login_message(&frame) {
                LoginOutcome::Success => return Ok(()),
                LoginOutcome::Failure(reason) => return Err(DataError::Auth(reason)),
                LoginOutcome::Unrelated => continue,
            }
        }
    }

    /// Wait for every subscribed channel to be acked. Pending channels are
    /// tracked in a [`CursorList`] so an ack can remove exactly the entry it
    /// satisfies without disturbing the others mid-scan.
    async fn subscribe(&mut self, converted: &[ConvertedTopic]) -> Result<(), DataError> {
        let commands = self.exchange.subscribe_commands(converted);
        if commands.is_empty() {
            // Binance encodes subscription in the connection URL itself and
            // sends no subscribe frame, so there is no ack to wait for.
            return Ok(());
        }
        for command in commands {
            self.writer.send(command).await?;
        }

        let mut pending: CursorList<String> = CursorList::new();
        for topic in converted {
            pending.append(topic.channel.clone());
        }

        while !pending.is_empty() {
            let frame = self.next_frame().await?;
            if let KeepaliveAction::Reply(reply) = self.exchange.on_keepalive_message(&frame) {
                self.writer.send(reply).await?;
                continue;
            }

            match self.exchange.on_subscribe_message(&frame) {
                SubscribeOutcome::Acked(channel) => pending.remove_item(&channel),
                SubscribeOutcome::Failure(reason) => return Err(DataError::Subscribe(reason)),
                SubscribeOutcome::Unrelated => {}
            }
        }
        Ok(())
    }

    async fn stream(&mut self, wsapi_type: crate::exchange::types::WsApiType, tx: &mpsc::Sender<Value>) -> Result<(), DataError> {
        let idle_timeout = match self.exchange.keepalive_style(wsapi_type) {
            KeepaliveStyle::IdlePing { idle_secs } => Some(Duration::from_secs(idle_secs)),
            KeepaliveStyle::Responsive | KeepaliveStyle::ListenKeyRenewal { .. } => None,
        };
        if let Some(idle) = idle_timeout {
            spawn_keepalive_tick(&mut self.awaitables, idle)?;
        }

        loop {
            let outcome = self.awaitables.wait(None).await?;
            match outcome.value {
                SchedulerEvent::KeepaliveTick => {
                    debug!("connection idle past keep-alive window, sending ping");
                    self.writer.send(Value::String("ping".into())).await?;
                    if let Some(idle) = idle_timeout {
                        spawn_keepalive_tick(&mut self.awaitables, idle)?;
                    }
                    continue;
                }
                SchedulerEvent::Frame(reader, result) => {
                    let bytes = match result? {
                        Some(bytes) => bytes,
                        None => {
                            debug!("peer closed the connection");
                            return Ok(());
                        }
                    };
                    spawn_recv(&mut self.awaitables, reader)?;

                    let frame = self.exchange.decode(&bytes)?;
                    match self.exchange.on_keepalive_message(&frame) {
                        KeepaliveAction::Consumed => continue,
                        KeepaliveAction::Reply(reply) => {
                            self.writer.send(reply).await?;
                            continue;
                        }
                        KeepaliveAction::Ignore => {}
                    }

                    if tx.send(frame).await.is_err() {
                        warn!("downstream receiver dropped, stopping stream");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Used only during login/subscribe: a single recv task is ever
    /// registered at this point, so `wait`'s own timeout parameter plays
    /// the role the streaming loop's idle-ping timer plays later.
    async fn next_frame(&mut self) -> Result<Value, DataError> {
        loop {
            let outcome = self.awaitables.wait(Some(self.handshake_timeout)).await?;
            match outcome.value {
                SchedulerEvent::KeepaliveTick => continue,
                SchedulerEvent::Frame(reader, result) => {
                    spawn_recv(&mut self.awaitables, reader)?;
                    let bytes = result?
                        .ok_or_else(|| DataError::Transport("connection closed during handshake".into()))?;
                    return self.exchange.decode(&bytes);
                }
            }
        }
    }
}

/// [`Transport`] over a live WebSocket. Ping/pong/raw frames never reach
/// the application layer; only `Text`/`Binary` payloads and a clean close
/// are surfaced.
#[derive(Debug)]
pub struct WebSocketTransport {
    socket: xstream_integration::protocol::websocket::WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: xstream_integration::protocol::websocket::WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WebSocketTransport {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        use futures_util::StreamExt;
        let (sink, stream) = self.socket.split();
        (WebSocketReader { stream }, WebSocketWriter { sink })
    }
}

#[derive(Debug)]
pub struct WebSocketReader {
    stream: xstream_integration::protocol::websocket::WsStream,
}

#[async_trait]
impl TransportReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, DataError> {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message;
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(DataError::from(error)),
            }
        }
    }
}

#[derive(Debug)]
pub struct WebSocketWriter {
    sink: xstream_integration::protocol::websocket::WsSink,
}

#[async_trait]
impl TransportWriter for WebSocketWriter {
    async fn send(&mut self, frame: Value) -> Result<(), DataError> {
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::Message;
        self.sink
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(DataError::from)
    }
}

/// Figures out which base URL and market type a `WSHandler` should connect
/// to for a batch of topics meant to share one connection, failing if they
/// don't actually agree on a market type.
pub fn resolve_market_type(topics: &[Topic]) -> Result<MarketType, DataError> {
    let mut resolved = None;
    for topic in topics {
        match resolved {
            None => resolved = Some(topic.market_type),
            Some(existing) if existing == topic.market_type => {}
            Some(_) => {
                return Err(DataError::Subscribe(format!(
                    "topics span multiple market types; connect them separately: {topic}"
                )))
            }
        }
    }
    resolved.ok_or_else(|| DataError::Subscribe("no topics given".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::binance::Binance;
    use crate::exchange::bitmex::Bitmex;
    use crate::ids::ExchangeId;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Drives the handler off a scripted, in-memory sequence of inbound
    /// frames and records every outbound one - no socket involved.
    #[derive(Debug)]
    struct FakeTransport {
        inbound: VecDeque<Option<Vec<u8>>>,
        outbound: Arc<Mutex<Vec<Value>>>,
    }

    impl FakeTransport {
        fn new(inbound: Vec<Value>) -> Self {
            let mut queue: VecDeque<Option<Vec<u8>>> =
                inbound.into_iter().map(|v| Some(v.to_string().into_bytes())).collect();
            queue.push_back(None);
            Self {
                inbound: queue,
                outbound: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn outbound(&self) -> Arc<Mutex<Vec<Value>>> {
            self.outbound.clone()
        }
    }

    impl Transport for FakeTransport {
        type Reader = FakeReader;
        type Writer = FakeWriter;

        fn split(self) -> (Self::Reader, Self::Writer) {
            (FakeReader { inbound: self.inbound }, FakeWriter { outbound: self.outbound })
        }
    }

    #[derive(Debug)]
    struct FakeReader {
        inbound: VecDeque<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl TransportReader for FakeReader {
        async fn recv(&mut self) -> Result<Option<Vec<u8>>, DataError> {
            Ok(self.inbound.pop_front().flatten())
        }
    }

    #[derive(Debug)]
    struct FakeWriter {
        outbound: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl TransportWriter for FakeWriter {
        async fn send(&mut self, frame: Value) -> Result<(), DataError> {
            self.outbound.lock().unwrap().push(frame);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_public_stream_requires_no_handshake_and_forwards_frames() {
        let trade = json!({"e": "trade", "s": "BTCUSDT", "p": "100"});
        let transport = FakeTransport::new(vec![trade.clone()]);
        let mut handler = WSHandler::new(Exchange::Binance(Binance::default()), transport);

        let topics = vec![Topic::new(ExchangeId::Binance, MarketType::Spot, "trade", "BTC/USDT")];
        let (tx, mut rx) = mpsc::channel(8);
        handler.run(&topics, None, tx).await.unwrap();

        assert_eq!(handler.state(), State::Closed);
        assert_eq!(rx.recv().await, Some(trade));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_private_stream_without_credentials_fails_fast() {
        let transport = FakeTransport::new(vec![]);
        let mut handler = WSHandler::new(Exchange::Binance(Binance::default()), transport);
        let topics = vec![Topic::new(ExchangeId::Binance, MarketType::Spot, "account", "")];
        let (tx, _rx) = mpsc::channel(8);

        let err = handler.run(&topics, None, tx).await.unwrap_err();
        assert!(matches!(err, DataError::Auth(_)));
    }

    #[tokio::test]
    async fn test_bitmex_subscribe_ack_is_consumed_and_not_forwarded() {
        let ack = json!({"success": true, "subscribe": "trade:XBTUSD"});
        let trade = json!({"table": "trade", "action": "insert", "data": []});
        let transport = FakeTransport::new(vec![ack, trade.clone()]);
        let outbound = {
            let t = &transport;
            t.outbound()
        };
        let mut handler = WSHandler::new(Exchange::Bitmex(Bitmex::default()), transport);

        let topics = vec![Topic::new(ExchangeId::Bitmex, MarketType::Swap, "trade", "BTC/USD")];
        let (tx, mut rx) = mpsc::channel(8);
        handler.run(&topics, None, tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(trade));
        let sent = outbound.lock().unwrap();
        assert!(sent.iter().any(|frame| frame["op"] == "subscribe"));
    }

    #[tokio::test]
    async fn test_bitmex_disconnect_mid_subscribe_is_fatal() {
        // Bitmex's subscribe ack has no explicit failure shape; an
        // unexpected frame is just unrelated, so the real fatal condition
        // is the peer closing the connection before the ack ever arrives.
        let transport = FakeTransport::new(vec![]);
        let mut handler = WSHandler::new(Exchange::Bitmex(Bitmex::default()), transport);
        let topics = vec![Topic::new(ExchangeId::Bitmex, MarketType::Swap, "trade", "BTC/USD")];
        let (tx, _rx) = mpsc::channel(8);

        let err = handler.run(&topics, None, tx).await.unwrap_err();
        assert!(matches!(err, DataError::Transport(_)));
    }

    #[tokio::test]
    async fn test_huobidm_subscribe_failure_is_fatal() {
        use crate::exchange::huobi::dm::Huobidm;
        let failure = json!({"subbed": "market.BTC-USDT.trade.detail", "status": "error", "err-msg": "bad channel"});
        let transport = FakeTransport::new(vec![failure]);
        let mut handler = WSHandler::new(Exchange::Huobidm(Huobidm), transport);
        let topics = vec![Topic::new(ExchangeId::Huobidm, MarketType::SwapUsdt, "trade", "BTC/USDT")];
        let (tx, _rx) = mpsc::channel(8);

        let err = handler.run(&topics, None, tx).await.unwrap_err();
        assert!(matches!(err, DataError::Subscribe(_)));
    }

    #[test]
    fn test_resolve_market_type_rejects_mixed_topics() {
        let topics = vec![
            Topic::new(ExchangeId::Binance, MarketType::Spot, "trade", "BTC/USDT"),
            Topic::new(ExchangeId::Binance, MarketType::Swap, "trade", "BTC/USD"),
        ];
        assert!(resolve_market_type(&topics).is_err());
    }
}
