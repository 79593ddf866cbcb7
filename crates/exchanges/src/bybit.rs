use marketfeed_core::{
    CanonicalSymbol, EventKind, ExchangeId, FeedError, NormalizedEvent, StreamDecoder,
    SymbolRegistry, TickerUpdate, Timeframe, Topic,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;

const WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";

/// Bybit v5 spot ticker decoder.
///
/// Subscriptions go over a JSON control frame after connect, and the
/// server expects an application-level `{"op":"ping"}` heartbeat.
pub struct BybitDecoder {
    registry: Arc<SymbolRegistry>,
}

impl BybitDecoder {
    pub fn new(registry: Arc<SymbolRegistry>) -> Self {
        Self { registry }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    /// Present on subscription acks and pong replies.
    op: Option<String>,
    topic: Option<String>,
    /// Envelope timestamp, unix ms.
    ts: Option<i64>,
    data: Option<TickerPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerPayload {
    symbol: String,
    last_price: Decimal,
    /// 24h change as a fraction, e.g. `-0.0152` for -1.52%.
    #[serde(rename = "price24hPcnt")]
    price_24h_pcnt: Decimal,
    #[serde(rename = "volume24h")]
    volume_24h: Decimal,
}

impl StreamDecoder for BybitDecoder {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    fn topics(&self, symbols: &[CanonicalSymbol], _timeframes: &[Timeframe]) -> Vec<Topic> {
        symbols
            .iter()
            .map(|symbol| {
                let wire = marketfeed_core::wire_symbol(ExchangeId::Bybit, symbol);
                Topic::new(format!("tickers.{wire}"), symbol.clone())
            })
            .collect()
    }

    fn endpoint(&self, _topics: &[Topic]) -> String {
        WS_URL.to_string()
    }

    fn subscribe_frames(&self, topics: &[Topic]) -> Vec<String> {
        let args: Vec<&str> = topics.iter().map(|t| t.stream.as_str()).collect();
        vec![serde_json::json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn heartbeat_frame(&self) -> Option<String> {
        Some(r#"{"op":"ping"}"#.to_string())
    }

    fn decode(&self, raw: &str) -> Result<Vec<NormalizedEvent>, FeedError> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| FeedError::Decode(e.to_string()))?;

        // Subscription acks and pongs carry an "op" field and no topic.
        if envelope.op.is_some() {
            return Ok(Vec::new());
        }
        let (Some(topic), Some(data)) = (envelope.topic, envelope.data) else {
            return Err(FeedError::Decode(format!("unrecognized frame: {raw}")));
        };
        if !topic.starts_with("tickers.") {
            return Err(FeedError::Decode(format!("unexpected topic: {topic}")));
        }

        let symbol = self.registry.resolve(ExchangeId::Bybit, &data.symbol)?;
        let time = envelope.ts.unwrap_or_else(marketfeed_core::now_ms);
        let ticker = TickerUpdate {
            last: data.last_price,
            change_24h_pct: data.price_24h_pcnt * Decimal::ONE_HUNDRED,
            volume_24h: data.volume_24h,
            exchange: ExchangeId::Bybit,
            time,
        };
        Ok(vec![NormalizedEvent {
            exchange: ExchangeId::Bybit,
            symbol,
            time,
            kind: EventKind::Ticker(ticker),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn decoder() -> BybitDecoder {
        let mut registry = SymbolRegistry::new();
        registry.register(
            &CanonicalSymbol::parse("BTC/USDT").unwrap(),
            ExchangeId::Bybit,
        );
        BybitDecoder::new(Arc::new(registry))
    }

    #[test]
    fn test_subscribe_frame_lists_topics() {
        let d = decoder();
        let symbols = [
            CanonicalSymbol::parse("BTC/USDT").unwrap(),
            CanonicalSymbol::parse("ETH/USDT").unwrap(),
        ];
        let topics = d.topics(&symbols, &[]);
        let frames = d.subscribe_frames(&topics);
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["op"], "subscribe");
        assert_eq!(
            frame["args"],
            serde_json::json!(["tickers.BTCUSDT", "tickers.ETHUSDT"])
        );
        assert_eq!(d.endpoint(&topics), "wss://stream.bybit.com/v5/public/spot");
    }

    #[test]
    fn test_decode_ticker() {
        let d = decoder();
        let raw = r#"{"topic":"tickers.BTCUSDT","ts":1700000000123,"type":"snapshot","data":{"symbol":"BTCUSDT","lastPrice":"42150.5","price24hPcnt":"-0.0152","volume24h":"8200.4"}}"#;
        let events = d.decode(raw).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::Ticker(ticker) => {
                assert_eq!(ticker.last, dec!(42150.5));
                // Fractional change is rescaled to percent.
                assert_eq!(ticker.change_24h_pct, dec!(-1.5200));
                assert_eq!(ticker.time, 1_700_000_000_123);
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn test_ack_and_pong_decode_to_nothing() {
        let d = decoder();
        let ack = r#"{"success":true,"ret_msg":"subscribe","op":"subscribe","conn_id":"abc"}"#;
        assert!(d.decode(ack).unwrap().is_empty());
        let pong = r#"{"success":true,"ret_msg":"pong","op":"ping"}"#;
        assert!(d.decode(pong).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_symbol_and_malformed() {
        let d = decoder();
        let raw = r#"{"topic":"tickers.DOGEUSDT","ts":1,"data":{"symbol":"DOGEUSDT","lastPrice":"0.1","price24hPcnt":"0","volume24h":"1"}}"#;
        assert!(matches!(
            d.decode(raw).unwrap_err(),
            FeedError::UnknownSymbol { .. }
        ));
        assert!(matches!(
            d.decode("{{").unwrap_err(),
            FeedError::Decode(_)
        ));
    }
}
