#![forbid(unsafe_code)]
#![warn(unused, clippy::cognitive_complexity, unused_extern_crates, clippy::unused_self, missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Exchange-specific domain layer built on [`xstream_integration`]'s
//! transport primitives: symbol/topic modelling, order book reconstruction
//! per exchange family, and the adapters that translate between this
//! crate's canonical types and each exchange's wire format.

pub mod books;
pub mod config;
pub mod exchange;
pub mod ids;
pub mod market;
pub mod symbol;
pub mod time;
pub mod topic;
pub mod wshandler;

pub use config::{Config, ConnectionConfig, Credentials};
pub use exchange::{Exchange, LoginContext};
pub use ids::{ExchangeId, MarketType};
pub use market::{Market, MarketMap};
pub use symbol::Symbol;
pub use topic::Topic;
pub use wshandler::WSHandler;
