use crate::ids::MarketType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use smol_str::SmolStr;
use std::collections::HashMap;
use xstream_integration::DataError;

/// Metadata for a single tradable instrument, loaded once at startup and
/// looked up by the merger/adapter layer when a symbol needs translating
/// to (or validating against) what the exchange actually lists.
#[derive(Debug, Clone)]
pub struct Market {
    pub id: SmolStr,
    pub base: SmolStr,
    pub quote: SmolStr,
    pub market_type: MarketType,
    pub contract_value: Option<Decimal>,
    pub delivery_time: Option<DateTime<Utc>>,
}

/// The set of markets an exchange has loaded, keyed by both its native id
/// and the uppercased `BASE/QUOTE[.EXTRA]` symbol name so callers can look
/// either up.
#[derive(Debug, Clone, Default)]
pub struct MarketMap {
    by_id: HashMap<SmolStr, Market>,
    by_name: HashMap<SmolStr, SmolStr>,
}

impl MarketMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<SmolStr>, market: Market) {
        let name = name.into();
        self.by_name.insert(name, market.id.clone());
        self.by_id.insert(market.id.clone(), market);
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Look up a market by its native exchange id or by symbol name.
    /// Fails with [`DataError::InvalidSymbol`] if nothing was loaded yet or
    /// the key matches nothing.
    pub fn get(&self, key: &str) -> Result<&Market, DataError> {
        if self.by_id.is_empty() {
            return Err(DataError::InvalidSymbol("markets not loaded".into()));
        }
        if let Some(market) = self.by_id.get(key) {
            return Ok(market);
        }
        if let Some(id) = self.by_name.get(key) {
            return Ok(&self.by_id[id]);
        }
        Err(DataError::InvalidSymbol(format!("unknown market: {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_market() -> Market {
        Market {
            id: "btcusdt".into(),
            base: "BTC".into(),
            quote: "USDT".into(),
            market_type: MarketType::Spot,
            contract_value: None,
            delivery_time: None,
        }
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let mut markets = MarketMap::new();
        markets.insert("BTC/USDT", sample_market());

        assert_eq!(markets.get("btcusdt").unwrap().base.as_str(), "BTC");
        assert_eq!(markets.get("BTC/USDT").unwrap().base.as_str(), "BTC");
    }

    #[test]
    fn test_lookup_before_load_fails() {
        let markets = MarketMap::new();
        let err = markets.get("BTC/USDT").unwrap_err();
        assert!(matches!(err, DataError::InvalidSymbol(_)));
    }

    #[test]
    fn test_unknown_symbol_fails_after_load() {
        let mut markets = MarketMap::new();
        markets.insert("BTC/USDT", sample_market());
        assert!(markets.get("ETH/USDT").is_err());
    }

    #[test]
    fn test_contract_value_preserved() {
        let mut market = sample_market();
        market.contract_value = Some(dec!(100));
        let mut markets = MarketMap::new();
        markets.insert("BTC/USDT", market);
        assert_eq!(markets.get("BTC/USDT").unwrap().contract_value, Some(dec!(100)));
    }
}
