use crate::models::*;
use crate::symbol::CanonicalSymbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A decoded, exchange-independent market data event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub exchange: ExchangeId,
    pub symbol: CanonicalSymbol,
    /// Event time, unix milliseconds.
    pub time: i64,
    pub kind: EventKind,
}

/// The payload variants a decoder can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// Last price / 24h change / rolling volume. Updates price state and
    /// the staleness clock, never candle data.
    Ticker(TickerUpdate),
    /// Full OHLCV bucket with an explicit closed flag.
    Kline {
        timeframe: Timeframe,
        candle: Candle,
    },
    /// Mark price update carrying the current funding rate.
    MarkPrice { funding_rate: Decimal },
    /// Open interest update.
    OpenInterest { open_interest: Decimal },
    /// A single forced liquidation order.
    Liquidation {
        side: Side,
        price: Decimal,
        quantity: Decimal,
    },
}

impl NormalizedEvent {
    /// Notional value for liquidation events (`price * quantity`).
    pub fn liquidation_notional(&self) -> Option<Decimal> {
        match &self.kind {
            EventKind::Liquidation {
                price, quantity, ..
            } => Some(*price * *quantity),
            _ => None,
        }
    }
}
