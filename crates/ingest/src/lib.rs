//! Connection supervision and the public read facade.
//!
//! [`MarketFeed`] ties the pieces together: it validates subscriptions,
//! plans connection shards through the [`FeedSupervisor`], and serves
//! reads straight from the shared [`TimeSeriesCache`].

pub mod config;
pub mod monitor;
pub mod shard;
pub mod supervisor;

pub use config::FeedConfig;
pub use monitor::StalenessMonitor;
pub use shard::{ConnectionState, ShardStatus};
pub use supervisor::FeedSupervisor;

use marketfeed_cache::TimeSeriesCache;
use marketfeed_core::{Candle, FeedError, MetricsSnapshot, TickerUpdate, Timeframe};
use std::sync::Arc;

/// The ingestion facade.
///
/// All reads are lock-light cache lookups; all ingestion happens on the
/// supervisor's shard tasks. Holds no durable state: after a stop, a
/// fresh subscribe rebuilds everything.
pub struct MarketFeed {
    cfg: FeedConfig,
    cache: Arc<TimeSeriesCache>,
    supervisor: FeedSupervisor,
    monitor: StalenessMonitor,
}

impl MarketFeed {
    pub fn new(cfg: FeedConfig) -> Self {
        let cache = Arc::new(TimeSeriesCache::new(cfg.max_candles));
        let supervisor = FeedSupervisor::new(cfg.clone(), Arc::clone(&cache));
        let monitor = StalenessMonitor::new(cfg.warmup_ms, cfg.staleness_ms);
        Self {
            cfg,
            cache,
            supervisor,
            monitor,
        }
    }

    /// Add coverage and make sure the feed is running.
    ///
    /// Additive and idempotent. Invalid symbols or timeframes are
    /// rejected here, before any connection is opened; a call that adds
    /// nothing new leaves the running shards untouched.
    pub async fn subscribe(
        &mut self,
        symbols: &[&str],
        timeframes: &[&str],
    ) -> Result<(), FeedError> {
        let grew = self.supervisor.add_coverage(symbols, timeframes)?;
        if self.supervisor.is_running() {
            if grew {
                self.supervisor.replan().await;
            }
        } else {
            self.supervisor.start();
            self.monitor.mark_started();
        }
        Ok(())
    }

    /// Drop coverage and the symbols' cached state.
    pub async fn unsubscribe(&mut self, symbols: &[&str]) -> Result<(), FeedError> {
        let shrank = self.supervisor.remove_coverage(symbols)?;
        if shrank && self.supervisor.is_running() {
            self.supervisor.replan().await;
        }
        Ok(())
    }

    /// Rolling candle window for one (symbol, timeframe). Empty when the
    /// symbol is unknown or nothing has arrived yet.
    pub fn get_cached_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Vec<Candle>, FeedError> {
        let timeframe: Timeframe = timeframe.parse()?;
        let Some(symbol) = self.cache.resolve_query(symbol) else {
            return Ok(Vec::new());
        };
        Ok(self.cache.ohlcv(&symbol, timeframe))
    }

    /// Latest derivative metrics. Accepts loosely formatted symbols
    /// (`BTC/USDT:USDT`, `BTCUSDT`, `btc-usdt`); anything unresolvable,
    /// empty or stale comes back as the not-live sentinel, never an
    /// error.
    pub fn get_metrics(&self, symbol: &str) -> MetricsSnapshot {
        let Some(symbol) = self.cache.resolve_query(symbol) else {
            return MetricsSnapshot::NotLive;
        };
        self.cache
            .metrics(&symbol, marketfeed_core::now_ms(), self.cfg.metrics_freshness_ms)
    }

    /// Latest ticker snapshot for ticker-only feeds.
    pub fn get_ticker(&self, symbol: &str) -> Option<TickerUpdate> {
        let symbol = self.cache.resolve_query(symbol)?;
        self.cache.ticker(&symbol)
    }

    /// Data-flow liveness: warm-up grace after start, then "any tracked
    /// symbol updated recently".
    pub fn is_connected(&self) -> bool {
        self.monitor
            .is_connected(self.cache.last_update_ms(), marketfeed_core::now_ms())
    }

    /// Per-shard connection state and last failure, for observability.
    pub fn shard_states(&self) -> Vec<(String, ConnectionState)> {
        self.supervisor.shard_states()
    }

    /// Stop, cool down, start with the same coverage.
    pub async fn restart(&mut self) {
        self.supervisor.restart().await;
        self.monitor.mark_started();
    }

    /// Graceful shutdown; releases every socket. Cached data stays
    /// readable until the feed is dropped or resubscribed.
    pub async fn stop(&mut self) {
        self.supervisor.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketfeed_core::{EventKind, ExchangeId, NormalizedEvent};
    use rust_decimal_macros::dec;

    fn feed() -> MarketFeed {
        MarketFeed::new(FeedConfig::default())
    }

    #[tokio::test]
    async fn test_subscribe_rejects_bad_input_synchronously() {
        let mut feed = feed();
        assert!(matches!(
            feed.subscribe(&[], &["1m"]).await,
            Err(FeedError::Config(_))
        ));
        assert!(matches!(
            feed.subscribe(&["BTC/USDT"], &["7m"]).await,
            Err(FeedError::Config(_))
        ));
        assert!(matches!(
            feed.subscribe(&["BTCUSDT"], &["1m"]).await,
            Err(FeedError::Config(_))
        ));
        assert!(feed.shard_states().is_empty());
    }

    #[tokio::test]
    async fn test_reads_on_empty_feed() {
        let feed = feed();
        assert_eq!(feed.get_metrics("BTC/USDT"), MetricsSnapshot::NotLive);
        assert!(feed.get_cached_ohlcv("BTC/USDT", "1m").unwrap().is_empty());
        assert!(feed.get_ticker("BTCUSDT").is_none());
        assert!(matches!(
            feed.get_cached_ohlcv("BTC/USDT", "2d"),
            Err(FeedError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_fuzzy_reads_after_ingest() {
        let feed = feed();
        let btc = marketfeed_core::CanonicalSymbol::parse("BTC/USDT:USDT").unwrap();
        feed.cache.track(&btc, &[Timeframe::M1]);
        feed.cache.apply(&NormalizedEvent {
            exchange: ExchangeId::Binance,
            symbol: btc.clone(),
            time: marketfeed_core::now_ms(),
            kind: EventKind::MarkPrice {
                funding_rate: dec!(0.0001),
            },
        });

        // Loose query formats all resolve to the same record.
        for query in ["BTC/USDT:USDT", "BTCUSDT", "btc-usdt"] {
            let snap = feed.get_metrics(query);
            assert_eq!(snap.live().unwrap().funding_rate, dec!(0.0001));
        }
        assert_eq!(feed.get_metrics("XRPUSDT"), MetricsSnapshot::NotLive);
    }
}
