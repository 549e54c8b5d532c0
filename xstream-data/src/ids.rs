use std::fmt;
use xstream_integration::DataError;

/// The closed set of exchanges this crate speaks to. Modelled as a sum
/// type rather than a runtime registry: every variant has a fixed,
/// statically-known capability set (see [`crate::exchange::Exchange`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExchangeId {
    Binance,
    Bitmex,
    Okex,
    Huobipro,
    Huobidm,
    Deribit,
}

impl ExchangeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bitmex => "bitmex",
            ExchangeId::Okex => "okex",
            ExchangeId::Huobipro => "huobipro",
            ExchangeId::Huobidm => "huobidm",
            ExchangeId::Deribit => "deribit",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DataError> {
        match s {
            "binance" => Ok(ExchangeId::Binance),
            "bitmex" => Ok(ExchangeId::Bitmex),
            "okex" => Ok(ExchangeId::Okex),
            "huobipro" => Ok(ExchangeId::Huobipro),
            "huobidm" => Ok(ExchangeId::Huobidm),
            "deribit" => Ok(ExchangeId::Deribit),
            other => Err(DataError::InvalidSymbol(format!("unknown exchange_id: {other}"))),
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The trading-instrument family a [`crate::symbol::Symbol`] or
/// [`crate::topic::Topic`] belongs to.
///
/// `SwapUsdt` is split out from `Swap` because several exchanges (Binance,
/// Huobi) give USDT-margined perpetuals a distinct URL/channel namespace
/// from coin-margined ones, even though both are "swap" conceptually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarketType {
    Spot,
    Margin,
    Futures,
    Swap,
    SwapUsdt,
    Option,
    Index,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Margin => "margin",
            MarketType::Futures => "futures",
            MarketType::Swap => "swap",
            MarketType::SwapUsdt => "swap.usdt",
            MarketType::Option => "option",
            MarketType::Index => "index",
        }
    }

    /// Parse a market type, canonicalising the `future`/`futures` spelling
    /// drift seen across exchange SDKs to `futures`.
    pub fn parse(s: &str) -> Result<Self, DataError> {
        match s {
            "spot" => Ok(MarketType::Spot),
            "margin" => Ok(MarketType::Margin),
            "future" | "futures" => Ok(MarketType::Futures),
            "swap" => Ok(MarketType::Swap),
            "swap.usdt" | "swap_usdt" => Ok(MarketType::SwapUsdt),
            "option" => Ok(MarketType::Option),
            "index" => Ok(MarketType::Index),
            other => Err(DataError::InvalidSymbol(format!("unknown market_type: {other}"))),
        }
    }

    pub fn is_derivative(&self) -> bool {
        matches!(
            self,
            MarketType::Futures | MarketType::Swap | MarketType::SwapUsdt | MarketType::Option
        )
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
