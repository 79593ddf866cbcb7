use crate::{ExchangeId, FeedError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Canonical symbol
// ---------------------------------------------------------------------------

/// Exchange-independent trading-pair identifier, `BASE/QUOTE[:SETTLE]`.
///
/// One canonical symbol maps to a different wire string on every exchange;
/// the registry owns those derivations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalSymbol {
    pub base: String,
    pub quote: String,
    /// Settlement currency for perpetual/linear contracts, e.g. the
    /// trailing `:USDT` in `BTC/USDT:USDT`.
    pub settle: Option<String>,
}

impl CanonicalSymbol {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
            settle: None,
        }
    }

    /// Parse `BASE/QUOTE` or `BASE/QUOTE:SETTLE`.
    pub fn parse(s: &str) -> Result<Self, FeedError> {
        let (pair, settle) = match s.split_once(':') {
            Some((pair, settle)) if !settle.trim().is_empty() => {
                (pair, Some(settle.trim().to_uppercase()))
            }
            Some((pair, _)) => (pair, None),
            None => (s, None),
        };
        let (base, quote) = pair
            .split_once('/')
            .ok_or_else(|| FeedError::Config(format!("invalid symbol: {s:?}")))?;
        let base = base.trim();
        let quote = quote.trim();
        if base.is_empty() || quote.is_empty() {
            return Err(FeedError::Config(format!("invalid symbol: {s:?}")));
        }
        Ok(Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
            settle,
        })
    }

    /// Canonicalization key for fuzzy lookups: separators stripped,
    /// uppercased, settlement suffix dropped. `BTC/USDT:USDT`, `btc-usdt`
    /// and `BTCUSDT` all collapse to `BTCUSDT`.
    pub fn fuzzy_key(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl std::fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.settle {
            Some(settle) => write!(f, "{}/{}:{}", self.base, self.quote, settle),
            None => write!(f, "{}/{}", self.base, self.quote),
        }
    }
}

/// The single canonicalization function applied at every query boundary.
///
/// Accepts any loosely formatted symbol string and reduces it to the same
/// key space as [`CanonicalSymbol::fuzzy_key`].
pub fn fuzzy_key(input: &str) -> String {
    let pair = input.split(':').next().unwrap_or(input);
    pair.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Derive the wire-format symbol for one exchange.
///
/// Rule table (documented transformation, not inferred at runtime):
/// - Binance: settle suffix dropped, `/` stripped, uppercased.
/// - Bybit: `/` stripped, uppercased.
/// - OKX: `/` replaced with `-`.
pub fn wire_symbol(exchange: ExchangeId, symbol: &CanonicalSymbol) -> String {
    match exchange {
        ExchangeId::Binance | ExchangeId::Bybit => format!("{}{}", symbol.base, symbol.quote),
        ExchangeId::Okx => format!("{}-{}", symbol.base, symbol.quote),
    }
}

/// Bidirectional mapping between canonical symbols and each exchange's
/// wire format.
#[derive(Debug, Clone, Default)]
pub struct SymbolRegistry {
    reverse: HashMap<(ExchangeId, String), CanonicalSymbol>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive and store the wire symbol for `symbol` on `exchange`.
    /// Returns the wire string.
    pub fn register(&mut self, symbol: &CanonicalSymbol, exchange: ExchangeId) -> String {
        let wire = wire_symbol(exchange, symbol);
        self.reverse
            .insert((exchange, wire.clone()), symbol.clone());
        wire
    }

    /// Register `symbol` on every known exchange.
    pub fn register_all(&mut self, symbol: &CanonicalSymbol) {
        for exchange in ExchangeId::ALL {
            self.register(symbol, exchange);
        }
    }

    /// Reverse lookup from a wire symbol. Stream names arrive lowercased
    /// on some feeds, so the lookup is case-insensitive.
    ///
    /// A miss means "drop this message", never a fatal condition.
    pub fn resolve(
        &self,
        exchange: ExchangeId,
        wire: &str,
    ) -> Result<CanonicalSymbol, FeedError> {
        self.reverse
            .get(&(exchange, wire.to_uppercase()))
            .cloned()
            .ok_or_else(|| FeedError::UnknownSymbol {
                exchange,
                wire: wire.to_string(),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}
