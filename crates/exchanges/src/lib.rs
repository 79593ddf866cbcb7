//! Exchange-specific [`StreamDecoder`] implementations.
//!
//! Each decoder owns an immutable snapshot of the symbol registry and is
//! otherwise stateless, so one instance can be shared across every
//! connection shard for its exchange.

pub mod binance;
pub mod bybit;
pub mod okx;

pub use binance::BinanceDecoder;
pub use bybit::BybitDecoder;
pub use okx::OkxDecoder;

use marketfeed_core::{ExchangeId, StreamDecoder, SymbolRegistry};
use std::sync::Arc;

/// Build the decoder for one exchange over a registry snapshot.
pub fn decoder_for(exchange: ExchangeId, registry: Arc<SymbolRegistry>) -> Arc<dyn StreamDecoder> {
    match exchange {
        ExchangeId::Binance => Arc::new(BinanceDecoder::new(registry)),
        ExchangeId::Bybit => Arc::new(BybitDecoder::new(registry)),
        ExchangeId::Okx => Arc::new(OkxDecoder::new(registry)),
    }
}
