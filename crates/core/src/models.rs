use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// The exchanges the feed knows how to ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeId {
    /// USD-M futures combined streams (kline-capable).
    Binance,
    /// Spot ticker streams.
    Bybit,
    /// Public ticker channels.
    Okx,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 3] = [ExchangeId::Binance, ExchangeId::Bybit, ExchangeId::Okx];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Okx => "okx",
        }
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// Candle bucket duration. Closed set; anything else is rejected at the
/// subscribe boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    H1,
    H4,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M3 => 180_000,
            Timeframe::M5 => 300_000,
            Timeframe::M15 => 900_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 14_400_000,
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = crate::FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "3m" => Ok(Timeframe::M3),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            other => Err(crate::FeedError::Config(format!(
                "unsupported timeframe: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// Trade side (used for liquidation flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

/// A single OHLCV candle for one time bucket.
///
/// Identity is (symbol, timeframe, `open_time`); the candle stays mutable
/// while the bucket is open and is final once the next bucket starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, unix milliseconds.
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Whether the upstream marked this bucket as closed.
    pub closed: bool,
}

/// Latest ticker state for one symbol on one exchange.
///
/// Ticker-only feeds carry no bucket boundaries; this never becomes candle
/// data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub last: Decimal,
    /// 24h change in percent.
    pub change_24h_pct: Decimal,
    /// Rolling 24h base volume.
    pub volume_24h: Decimal,
    pub exchange: ExchangeId,
    /// Event time, unix milliseconds.
    pub time: i64,
}

/// Per-symbol latest derivative metrics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivativeMetrics {
    pub funding_rate: Decimal,
    pub open_interest: Decimal,
    /// Buy-side liquidation notional accumulated since the shard's last
    /// reconnect.
    pub liq_buy_notional: Decimal,
    /// Sell-side liquidation notional accumulated since the shard's last
    /// reconnect.
    pub liq_sell_notional: Decimal,
    /// `sell_notional / max(1, buy_notional)`.
    pub liq_ratio: Decimal,
    /// Unix milliseconds of the most recent update.
    pub last_update: i64,
}

/// Read-side view of a symbol's derivative metrics.
///
/// `NotLive` means "no actionable data" (never registered, nothing received
/// yet, or the record is older than the freshness threshold) and is not an
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricsSnapshot {
    Live(DerivativeMetrics),
    NotLive,
}

impl MetricsSnapshot {
    pub fn is_live(&self) -> bool {
        matches!(self, MetricsSnapshot::Live(_))
    }

    pub fn live(self) -> Option<DerivativeMetrics> {
        match self {
            MetricsSnapshot::Live(m) => Some(m),
            MetricsSnapshot::NotLive => None,
        }
    }
}
