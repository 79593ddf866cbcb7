use marketfeed_core::{
    Candle, CanonicalSymbol, EventKind, ExchangeId, FeedError, NormalizedEvent, Side,
    StreamDecoder, SymbolRegistry, Timeframe, Topic,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

const WS_BASE: &str = "wss://fstream.binance.com/stream";

/// Binance USD-M futures decoder.
///
/// All subscribed streams are multiplexed into a single URL
/// (`/stream?streams=btcusdt@kline_1m/btcusdt@markPrice/…`) and arrive in
/// a combined-stream envelope. This is the only kline-capable feed: its
/// kline payload carries full OHLCV plus an explicit closed-bucket flag.
pub struct BinanceDecoder {
    registry: Arc<SymbolRegistry>,
}

impl BinanceDecoder {
    pub fn new(registry: Arc<SymbolRegistry>) -> Self {
        Self { registry }
    }
}

#[derive(Debug, Deserialize)]
struct CombinedFrame {
    #[allow(dead_code)]
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum StreamEvent {
    #[serde(rename = "kline")]
    Kline {
        #[serde(rename = "E")]
        time: i64,
        #[serde(rename = "s")]
        symbol: String,
        #[serde(rename = "k")]
        kline: KlinePayload,
    },
    #[serde(rename = "markPriceUpdate")]
    MarkPrice {
        #[serde(rename = "E")]
        time: i64,
        #[serde(rename = "s")]
        symbol: String,
        /// Current funding rate.
        #[serde(rename = "r")]
        funding_rate: Decimal,
    },
    #[serde(rename = "openInterest")]
    OpenInterest {
        #[serde(rename = "E")]
        time: i64,
        #[serde(rename = "s")]
        symbol: String,
        #[serde(rename = "o")]
        open_interest: Decimal,
    },
    #[serde(rename = "forceOrder")]
    ForceOrder {
        #[serde(rename = "E")]
        time: i64,
        #[serde(rename = "o")]
        order: ForceOrderPayload,
    },
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    /// Bucket start, unix ms.
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "i")]
    interval: String,
    /// True once the bucket is closed.
    #[serde(rename = "x")]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct ForceOrderPayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "p")]
    price: Decimal,
}

impl BinanceDecoder {
    fn resolve(&self, wire: &str) -> Result<CanonicalSymbol, FeedError> {
        self.registry.resolve(ExchangeId::Binance, wire)
    }
}

impl StreamDecoder for BinanceDecoder {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    fn topics(&self, symbols: &[CanonicalSymbol], timeframes: &[Timeframe]) -> Vec<Topic> {
        let mut topics = Vec::new();
        for symbol in symbols {
            let stream = marketfeed_core::wire_symbol(ExchangeId::Binance, symbol).to_lowercase();
            for tf in timeframes {
                topics.push(Topic::new(format!("{stream}@kline_{tf}"), symbol.clone()));
            }
            topics.push(Topic::new(format!("{stream}@markPrice"), symbol.clone()));
            topics.push(Topic::new(format!("{stream}@openInterest"), symbol.clone()));
            topics.push(Topic::new(format!("{stream}@forceOrder"), symbol.clone()));
        }
        topics
    }

    fn endpoint(&self, topics: &[Topic]) -> String {
        let streams: Vec<&str> = topics.iter().map(|t| t.stream.as_str()).collect();
        format!("{WS_BASE}?streams={}", streams.join("/"))
    }

    fn subscribe_frames(&self, _topics: &[Topic]) -> Vec<String> {
        // Everything is encoded in the connection URL.
        Vec::new()
    }

    fn decode(&self, raw: &str) -> Result<Vec<NormalizedEvent>, FeedError> {
        let frame: CombinedFrame =
            serde_json::from_str(raw).map_err(|e| FeedError::Decode(e.to_string()))?;
        let event: StreamEvent =
            serde_json::from_value(frame.data).map_err(|e| FeedError::Decode(e.to_string()))?;

        let normalized = match event {
            StreamEvent::Kline {
                time,
                symbol,
                kline,
            } => {
                let timeframe: Timeframe = kline.interval.parse().map_err(|_| {
                    FeedError::Decode(format!("unexpected kline interval: {}", kline.interval))
                })?;
                NormalizedEvent {
                    exchange: ExchangeId::Binance,
                    symbol: self.resolve(&symbol)?,
                    time,
                    kind: EventKind::Kline {
                        timeframe,
                        candle: Candle {
                            open_time: kline.open_time,
                            open: kline.open,
                            high: kline.high,
                            low: kline.low,
                            close: kline.close,
                            volume: kline.volume,
                            closed: kline.closed,
                        },
                    },
                }
            }
            StreamEvent::MarkPrice {
                time,
                symbol,
                funding_rate,
            } => NormalizedEvent {
                exchange: ExchangeId::Binance,
                symbol: self.resolve(&symbol)?,
                time,
                kind: EventKind::MarkPrice { funding_rate },
            },
            StreamEvent::OpenInterest {
                time,
                symbol,
                open_interest,
            } => NormalizedEvent {
                exchange: ExchangeId::Binance,
                symbol: self.resolve(&symbol)?,
                time,
                kind: EventKind::OpenInterest { open_interest },
            },
            StreamEvent::ForceOrder { time, order } => {
                let side = if order.side == "BUY" {
                    Side::Buy
                } else {
                    Side::Sell
                };
                NormalizedEvent {
                    exchange: ExchangeId::Binance,
                    symbol: self.resolve(&order.symbol)?,
                    time,
                    kind: EventKind::Liquidation {
                        side,
                        price: order.price,
                        quantity: order.quantity,
                    },
                }
            }
        };
        Ok(vec![normalized])
    }
}
