use crate::ids::{ExchangeId, MarketType};
use smol_str::SmolStr;
use std::fmt;

/// An exchange-agnostic descriptor of a single subscribable data stream.
///
/// `datatype` is dot-separated (e.g. `orderbook.full`, `ohlcv.1m`); the
/// first segment is the [`Topic::maintype`] and anything after it is the
/// ordered list of [`Topic::subtypes`]. `extrainfo` typically carries a
/// symbol name or currency the maintype is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub exchange_id: ExchangeId,
    pub market_type: MarketType,
    pub datatype: SmolStr,
    pub extrainfo: SmolStr,
}

impl Topic {
    pub fn new(
        exchange_id: ExchangeId,
        market_type: MarketType,
        datatype: impl Into<SmolStr>,
        extrainfo: impl Into<SmolStr>,
    ) -> Self {
        Self {
            exchange_id,
            market_type,
            datatype: datatype.into(),
            extrainfo: extrainfo.into(),
        }
    }

    pub fn maintype(&self) -> &str {
        self.datatype.split('.').next().unwrap_or("")
    }

    pub fn subtypes(&self) -> Vec<&str> {
        let mut parts = self.datatype.split('.');
        parts.next();
        parts.collect()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.exchange_id, self.market_type, self.datatype)?;
        if !self.extrainfo.is_empty() {
            write!(f, ":{}", self.extrainfo)?;
        }
        Ok(())
    }
}
