use marketfeed_core::ExchangeId;
use serde::Deserialize;

/// Tunables for the ingestion layer.
///
/// Plain struct with serde derives; loading it from a file or the
/// environment is the embedding application's job.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Exchanges to ingest from.
    pub exchanges: Vec<ExchangeId>,

    /// Rolling candle window per (symbol, timeframe).
    pub max_candles: usize,

    /// Streams per physical WebSocket connection.
    pub topics_per_connection: usize,

    /// First reconnect delay.
    pub backoff_base_ms: u64,
    /// Reconnect delay ceiling.
    pub backoff_cap_ms: u64,
    /// A connection open at least this long resets the backoff to base.
    pub stability_window_ms: u64,

    /// Heartbeat send interval.
    pub heartbeat_interval_ms: u64,
    /// No inbound traffic for this long counts as a dead connection.
    pub idle_timeout_ms: u64,

    /// Grace period after start during which `is_connected` reports true
    /// regardless of data flow.
    pub warmup_ms: i64,
    /// `is_connected` threshold: newest update must be at most this old.
    pub staleness_ms: i64,
    /// `get_metrics` freshness threshold.
    pub metrics_freshness_ms: i64,

    /// Pause between stop and start on restart.
    pub restart_cooldown_ms: u64,

    /// Route every shard to a fixed endpoint instead of the exchange URL.
    /// Used by integration tests against a local server.
    pub endpoint_override: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            exchanges: ExchangeId::ALL.to_vec(),
            max_candles: 300,
            topics_per_connection: 20,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            stability_window_ms: 30_000,
            heartbeat_interval_ms: 20_000,
            idle_timeout_ms: 60_000,
            warmup_ms: 60_000,
            staleness_ms: 180_000,
            metrics_freshness_ms: 1_800_000,
            restart_cooldown_ms: 2_000,
            endpoint_override: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = FeedConfig::default();
        assert_eq!(cfg.exchanges.len(), 3);
        assert_eq!(cfg.max_candles, 300);
        assert_eq!(cfg.topics_per_connection, 20);
        assert_eq!(cfg.backoff_base_ms, 1_000);
        assert_eq!(cfg.backoff_cap_ms, 30_000);
        assert_eq!(cfg.metrics_freshness_ms, 30 * 60 * 1_000);
        assert!(cfg.endpoint_override.is_none());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let cfg: FeedConfig =
            serde_json::from_str(r#"{"exchanges":["bybit"],"max_candles":50}"#).unwrap();
        assert_eq!(cfg.exchanges, vec![ExchangeId::Bybit]);
        assert_eq!(cfg.max_candles, 50);
        assert_eq!(cfg.staleness_ms, 180_000);
    }
}
