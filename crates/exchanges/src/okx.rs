use marketfeed_core::{
    CanonicalSymbol, EventKind, ExchangeId, FeedError, NormalizedEvent, StreamDecoder,
    SymbolRegistry, TickerUpdate, Timeframe, Topic,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

const WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// OKX v5 public ticker decoder.
///
/// OKX heartbeats are the literal text frames `ping`/`pong`, not JSON,
/// so those are short-circuited before any parsing.
pub struct OkxDecoder {
    registry: Arc<SymbolRegistry>,
}

impl OkxDecoder {
    pub fn new(registry: Arc<SymbolRegistry>) -> Self {
        Self { registry }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    /// Present on subscription acks and error replies.
    event: Option<String>,
    arg: Option<Arg>,
    #[serde(default)]
    data: Vec<TickerPayload>,
}

#[derive(Debug, Deserialize)]
struct Arg {
    channel: String,
    #[serde(rename = "instId")]
    inst_id: String,
}

#[derive(Debug, Deserialize)]
struct TickerPayload {
    last: Decimal,
    #[serde(rename = "open24h")]
    open_24h: Decimal,
    #[serde(rename = "vol24h")]
    vol_24h: Decimal,
    /// Unix ms, sent as a string.
    ts: String,
}

impl StreamDecoder for OkxDecoder {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    fn topics(&self, symbols: &[CanonicalSymbol], _timeframes: &[Timeframe]) -> Vec<Topic> {
        symbols
            .iter()
            .map(|symbol| {
                let wire = marketfeed_core::wire_symbol(ExchangeId::Okx, symbol);
                Topic::new(wire, symbol.clone())
            })
            .collect()
    }

    fn endpoint(&self, _topics: &[Topic]) -> String {
        WS_URL.to_string()
    }

    fn subscribe_frames(&self, topics: &[Topic]) -> Vec<String> {
        let args: Vec<serde_json::Value> = topics
            .iter()
            .map(|t| serde_json::json!({ "channel": "tickers", "instId": t.stream }))
            .collect();
        vec![serde_json::json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn heartbeat_frame(&self) -> Option<String> {
        Some("ping".to_string())
    }

    fn decode(&self, raw: &str) -> Result<Vec<NormalizedEvent>, FeedError> {
        if raw == "pong" {
            return Ok(Vec::new());
        }
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| FeedError::Decode(e.to_string()))?;
        if envelope.event.is_some() {
            // Subscribe ack or server-side error notice.
            return Ok(Vec::new());
        }
        let Some(arg) = envelope.arg else {
            return Err(FeedError::Decode(format!("unrecognized frame: {raw}")));
        };
        if arg.channel != "tickers" {
            return Err(FeedError::Decode(format!(
                "unexpected channel: {}",
                arg.channel
            )));
        }
        let symbol = self.registry.resolve(ExchangeId::Okx, &arg.inst_id)?;

        let mut events = Vec::with_capacity(envelope.data.len());
        for ticker in envelope.data {
            let time: i64 = ticker
                .ts
                .parse()
                .map_err(|_| FeedError::Decode(format!("bad timestamp: {}", ticker.ts)))?;
            let change_24h_pct = if ticker.open_24h > Decimal::ZERO {
                (ticker.last - ticker.open_24h) / ticker.open_24h * Decimal::ONE_HUNDRED
            } else {
                Decimal::ZERO
            };
            events.push(NormalizedEvent {
                exchange: ExchangeId::Okx,
                symbol: symbol.clone(),
                time,
                kind: EventKind::Ticker(TickerUpdate {
                    last: ticker.last,
                    change_24h_pct,
                    volume_24h: ticker.vol_24h,
                    exchange: ExchangeId::Okx,
                    time,
                }),
            });
        }
        Ok(events)
    }
}
