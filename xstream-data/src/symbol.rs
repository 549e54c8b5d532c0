use crate::ids::{ExchangeId, MarketType};
use smol_str::SmolStr;
use std::fmt;
use xstream_integration::DataError;

/// A canonical, exchange-agnostic instrument identifier.
///
/// `name` carries the base/quote pair and, for derivatives, a contract
/// expiration tag or option strike, always as `BASE/QUOTE` or
/// `BASE/QUOTE.EXTRA`, uppercased. Two `Symbol`s are equal iff the full
/// triple matches - the same `name` under a different `market_type` is a
/// different instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub name: SmolStr,
}

impl Symbol {
    pub fn new(exchange_id: ExchangeId, market_type: MarketType, name: impl Into<SmolStr>) -> Self {
        Self {
            exchange_id,
            market_type,
            name: name.into(),
        }
    }

    /// Parse the `exchange_id:market_type:name` wire form.
    pub fn parse(s: &str) -> Result<Self, DataError> {
        let mut parts = s.splitn(3, ':');
        let (exchange_id, market_type, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(e), Some(m), Some(n)) if !n.is_empty() => (e, m, n),
            _ => return Err(DataError::InvalidSymbol(s.to_string())),
        };
        Ok(Self {
            exchange_id: ExchangeId::parse(exchange_id)?,
            market_type: MarketType::parse(market_type)?,
            name: SmolStr::new(name),
        })
    }

    /// Build a symbol from base/quote (spot-like markets) or base/quote
    /// plus a contract expiration tag (futures/option markets).
    pub fn from_parts(
        exchange_id: ExchangeId,
        market_type: MarketType,
        base: &str,
        quote: &str,
        contract_expiration: Option<&str>,
    ) -> Result<Self, DataError> {
        let name = match market_type {
            MarketType::Spot | MarketType::Margin | MarketType::Swap | MarketType::SwapUsdt => {
                format!("{base}/{quote}").to_uppercase()
            }
            MarketType::Futures | MarketType::Option => {
                let expiration = contract_expiration.ok_or_else(|| {
                    DataError::InvalidSymbol(
                        "futures/option symbol requires a contract_expiration".into(),
                    )
                })?;
                format!("{base}/{quote}.{expiration}").to_uppercase()
            }
            MarketType::Index => format!("{base}/{quote}").to_uppercase(),
        };
        Ok(Self {
            exchange_id,
            market_type,
            name: SmolStr::new(name),
        })
    }

    /// Split `name` into its `(base, quote)` pair, ignoring any trailing
    /// `.EXTRA` contract-expiration suffix.
    pub fn base_quote(&self) -> Result<(&str, &str), DataError> {
        let base_quote_part = self.name.split('.').next().unwrap_or("");
        base_quote_part
            .split_once('/')
            .ok_or_else(|| DataError::InvalidSymbol(format!("no '/' in symbol name: {}", self.name)))
    }

    pub fn base(&self) -> Result<&str, DataError> {
        self.base_quote().map(|(base, _)| base)
    }

    pub fn quote(&self) -> Result<&str, DataError> {
        self.base_quote().map(|(_, quote)| quote)
    }

    /// The `.EXTRA` suffix after the base/quote pair, if present - a
    /// contract expiration tag (`CW`/`NW`/`CQ`/`NQ`/literal date) for
    /// futures, or a `strike-callput` tag for options.
    pub fn contract_expiration(&self) -> Option<&str> {
        let mut parts = self.name.splitn(2, '.');
        parts.next();
        parts.next()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spot_symbol() {
        let symbol = Symbol::parse("binance:spot:BTC/USDT").unwrap();
        assert_eq!(symbol.exchange_id, ExchangeId::Binance);
        assert_eq!(symbol.market_type, MarketType::Spot);
        assert_eq!(symbol.base().unwrap(), "BTC");
        assert_eq!(symbol.quote().unwrap(), "USDT");
        assert_eq!(symbol.contract_expiration(), None);
    }

    #[test]
    fn test_parse_futures_symbol_with_expiration() {
        let symbol = Symbol::parse("okex:futures:BTC/USD.CQ").unwrap();
        assert_eq!(symbol.base().unwrap(), "BTC");
        assert_eq!(symbol.quote().unwrap(), "USD");
        assert_eq!(symbol.contract_expiration(), Some("CQ"));
    }

    #[test]
    fn test_from_parts_uppercases_and_joins() {
        let symbol = Symbol::from_parts(
            ExchangeId::Deribit,
            MarketType::Futures,
            "btc",
            "usd",
            Some("cq"),
        )
        .unwrap();
        assert_eq!(symbol.name.as_str(), "BTC/USD.CQ");
    }

    #[test]
    fn test_futures_symbol_without_expiration_is_invalid() {
        let err = Symbol::from_parts(ExchangeId::Deribit, MarketType::Futures, "BTC", "USD", None)
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidSymbol(_)));
    }

    #[test]
    fn test_malformed_wire_form_is_invalid() {
        assert!(Symbol::parse("binance:spot").is_err());
        assert!(Symbol::parse("binance:spot:").is_err());
    }
}
