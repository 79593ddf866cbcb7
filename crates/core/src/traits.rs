use crate::events::NormalizedEvent;
use crate::models::{ExchangeId, Timeframe};
use crate::symbol::CanonicalSymbol;
use crate::FeedError;

/// One subscribable stream/channel on an exchange, tied back to the
/// canonical symbol it covers.
///
/// Keeping the symbol here lets the supervisor shard topic lists across
/// connections while still knowing which symbols each shard owns.
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    /// Exchange-specific stream or channel name, e.g. `btcusdt@kline_1m`
    /// or `tickers.BTCUSDT`.
    pub stream: String,
    pub symbol: CanonicalSymbol,
}

impl Topic {
    pub fn new(stream: impl Into<String>, symbol: CanonicalSymbol) -> Self {
        Self {
            stream: stream.into(),
            symbol,
        }
    }
}

/// Exchange-specific frame decoding behind one shared capability.
///
/// The supervisor stays generic: it asks the decoder for topics, the
/// connection endpoint, the post-connect subscribe frames, and the
/// protocol heartbeat, then feeds every received text frame through
/// [`decode`](StreamDecoder::decode). Only the decode step varies per
/// exchange.
pub trait StreamDecoder: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// The streams/channels to subscribe for the given coverage.
    fn topics(&self, symbols: &[CanonicalSymbol], timeframes: &[Timeframe]) -> Vec<Topic>;

    /// Full WebSocket URL for one connection covering `topics`. Feeds that
    /// multiplex streams encode them in the path/query here.
    fn endpoint(&self, topics: &[Topic]) -> String;

    /// JSON control messages to send after connecting. Empty for
    /// path-multiplexed feeds.
    fn subscribe_frames(&self, topics: &[Topic]) -> Vec<String>;

    /// Protocol-level heartbeat frame, if the exchange defines one. When
    /// `None`, the transport falls back to a WebSocket ping.
    fn heartbeat_frame(&self) -> Option<String> {
        None
    }

    /// Parse one raw text frame into zero or more normalized events.
    ///
    /// Subscription acks and heartbeat replies decode to an empty vec.
    /// Errors mean "drop this frame"; they must never tear down the
    /// connection.
    fn decode(&self, raw: &str) -> Result<Vec<NormalizedEvent>, FeedError>;
}
