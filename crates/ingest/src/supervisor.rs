use crate::config::FeedConfig;
use crate::shard::{ConnectionState, Shard};
use marketfeed_cache::TimeSeriesCache;
use marketfeed_core::{CanonicalSymbol, FeedError, StreamDecoder, SymbolRegistry, Timeframe, Topic};
use marketfeed_exchanges::decoder_for;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

struct ShardHandle {
    id: String,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

/// Plans connection shards from the subscribed coverage and supervises
/// their tasks.
///
/// Topic lists are chunked at `topics_per_connection` per exchange; each
/// chunk becomes one [`Shard`] on its own task. Subscription changes
/// restart the shard set rather than mutating live subscriptions, so a
/// shard's topic assignment is immutable for its lifetime.
pub struct FeedSupervisor {
    cfg: FeedConfig,
    cache: Arc<TimeSeriesCache>,
    symbols: BTreeSet<CanonicalSymbol>,
    timeframes: BTreeSet<Timeframe>,
    shards: Vec<ShardHandle>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl FeedSupervisor {
    pub fn new(cfg: FeedConfig, cache: Arc<TimeSeriesCache>) -> Self {
        Self {
            cfg,
            cache,
            symbols: BTreeSet::new(),
            timeframes: BTreeSet::new(),
            shards: Vec::new(),
            shutdown_tx: None,
        }
    }

    /// Validate and add coverage. Additive and idempotent; invalid input
    /// is rejected synchronously before any connection work.
    ///
    /// Returns whether the coverage actually grew.
    pub fn add_coverage(
        &mut self,
        symbols: &[&str],
        timeframes: &[&str],
    ) -> Result<bool, FeedError> {
        if symbols.is_empty() {
            return Err(FeedError::Config("no symbols given".into()));
        }
        if timeframes.is_empty() {
            return Err(FeedError::Config("no timeframes given".into()));
        }
        let parsed_symbols = symbols
            .iter()
            .map(|s| CanonicalSymbol::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        let parsed_timeframes = timeframes
            .iter()
            .map(|s| s.parse::<Timeframe>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut grew = false;
        for tf in parsed_timeframes {
            grew |= self.timeframes.insert(tf);
        }
        for symbol in parsed_symbols {
            grew |= self.symbols.insert(symbol);
        }

        let timeframes: Vec<Timeframe> = self.timeframes.iter().copied().collect();
        for symbol in &self.symbols {
            self.cache.track(symbol, &timeframes);
        }
        Ok(grew)
    }

    /// Remove coverage and clear the symbols' cached state. Returns
    /// whether anything was removed.
    pub fn remove_coverage(&mut self, symbols: &[&str]) -> Result<bool, FeedError> {
        let parsed = symbols
            .iter()
            .map(|s| CanonicalSymbol::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        let mut shrank = false;
        for symbol in &parsed {
            if self.symbols.remove(symbol) {
                self.cache.untrack(symbol);
                shrank = true;
            }
        }
        Ok(shrank)
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Spawn one task per planned shard. Idempotent; a no-op with no
    /// coverage.
    pub fn start(&mut self) {
        if self.is_running() || self.symbols.is_empty() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        for plan in self.plan() {
            let (state_tx, state_rx) = Shard::new_state();
            let shard = Shard {
                id: plan.id.clone(),
                endpoint: plan.endpoint,
                subscribe_frames: plan.subscribe_frames,
                symbols: plan.symbols,
                decoder: plan.decoder,
                cache: Arc::clone(&self.cache),
                heartbeat_interval: Duration::from_millis(self.cfg.heartbeat_interval_ms),
                idle_timeout: Duration::from_millis(self.cfg.idle_timeout_ms),
                backoff_base: Duration::from_millis(self.cfg.backoff_base_ms),
                backoff_cap: Duration::from_millis(self.cfg.backoff_cap_ms),
                stability_window: Duration::from_millis(self.cfg.stability_window_ms),
                state_tx,
            };
            let task = tokio::spawn(shard.run(shutdown_rx.clone()));
            self.shards.push(ShardHandle {
                id: plan.id,
                state: state_rx,
                task,
            });
        }
        info!(shards = self.shards.len(), "supervisor started");
        self.shutdown_tx = Some(shutdown_tx);
    }

    /// Signal every shard to stop and wait for the tasks to finish.
    /// Callable from any state.
    pub async fn stop(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = shutdown_tx.send(true);
        for handle in self.shards.drain(..) {
            let _ = handle.task.await;
        }
        info!("supervisor stopped");
    }

    /// Stop, cool down, start.
    pub async fn restart(&mut self) {
        self.stop().await;
        tokio::time::sleep(Duration::from_millis(self.cfg.restart_cooldown_ms)).await;
        self.start();
    }

    /// Stop and start with the current coverage (used after subscription
    /// changes while running).
    pub async fn replan(&mut self) {
        if self.is_running() {
            self.stop().await;
        }
        self.start();
    }

    /// Snapshot of every shard's observable state.
    pub fn shard_states(&self) -> Vec<(String, ConnectionState)> {
        self.shards
            .iter()
            .map(|h| (h.id.clone(), h.state.borrow().clone()))
            .collect()
    }

    fn plan(&self) -> Vec<ShardPlan> {
        let symbols: Vec<CanonicalSymbol> = self.symbols.iter().cloned().collect();
        let timeframes: Vec<Timeframe> = self.timeframes.iter().copied().collect();

        let mut registry = SymbolRegistry::new();
        for symbol in &symbols {
            for exchange in &self.cfg.exchanges {
                registry.register(symbol, *exchange);
            }
        }
        let registry = Arc::new(registry);

        let mut plans = Vec::new();
        for exchange in &self.cfg.exchanges {
            let decoder = decoder_for(*exchange, Arc::clone(&registry));
            let topics = decoder.topics(&symbols, &timeframes);
            let chunk_size = self.cfg.topics_per_connection.max(1);
            for (index, chunk) in topics.chunks(chunk_size).enumerate() {
                plans.push(ShardPlan {
                    id: format!("{exchange}-{index}"),
                    endpoint: self
                        .cfg
                        .endpoint_override
                        .clone()
                        .unwrap_or_else(|| decoder.endpoint(chunk)),
                    subscribe_frames: decoder.subscribe_frames(chunk),
                    symbols: unique_symbols(chunk),
                    decoder: Arc::clone(&decoder),
                });
            }
        }
        plans
    }
}

struct ShardPlan {
    id: String,
    endpoint: String,
    subscribe_frames: Vec<String>,
    symbols: Vec<CanonicalSymbol>,
    decoder: Arc<dyn StreamDecoder>,
}

fn unique_symbols(topics: &[Topic]) -> Vec<CanonicalSymbol> {
    let set: BTreeSet<&CanonicalSymbol> = topics.iter().map(|t| &t.symbol).collect();
    set.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> FeedSupervisor {
        FeedSupervisor::new(FeedConfig::default(), Arc::new(TimeSeriesCache::new(300)))
    }

    #[test]
    fn test_rejects_empty_and_invalid_input() {
        let mut sup = supervisor();
        assert!(matches!(
            sup.add_coverage(&[], &["1m"]),
            Err(FeedError::Config(_))
        ));
        assert!(matches!(
            sup.add_coverage(&["BTC/USDT"], &[]),
            Err(FeedError::Config(_))
        ));
        assert!(matches!(
            sup.add_coverage(&["BTCUSDT"], &["1m"]),
            Err(FeedError::Config(_))
        ));
        assert!(matches!(
            sup.add_coverage(&["BTC/USDT"], &["2d"]),
            Err(FeedError::Config(_))
        ));
        // Nothing was opened or tracked on the rejected calls.
        assert!(sup.shard_states().is_empty());
    }

    #[test]
    fn test_coverage_is_additive_and_idempotent() {
        let mut sup = supervisor();
        assert!(sup.add_coverage(&["BTC/USDT"], &["1m"]).unwrap());
        assert!(!sup.add_coverage(&["BTC/USDT"], &["1m"]).unwrap());
        assert!(sup.add_coverage(&["ETH/USDT"], &["1m"]).unwrap());
        assert!(sup.add_coverage(&["ETH/USDT"], &["5m"]).unwrap());
    }

    #[test]
    fn test_plan_shards_topics_at_chunk_size() {
        let mut cfg = FeedConfig::default();
        cfg.topics_per_connection = 4;
        let mut sup = FeedSupervisor::new(cfg, Arc::new(TimeSeriesCache::new(300)));
        // 3 symbols x (1 kline + 3 derivative streams) = 12 Binance topics,
        // 3 topics each on Bybit and OKX.
        sup.add_coverage(&["BTC/USDT", "ETH/USDT", "SOL/USDT"], &["1m"])
            .unwrap();
        let plans = sup.plan();
        let binance: Vec<_> = plans.iter().filter(|p| p.id.starts_with("binance")).collect();
        assert_eq!(binance.len(), 3);
        assert_eq!(plans.iter().filter(|p| p.id.starts_with("bybit")).count(), 1);
        assert_eq!(plans.iter().filter(|p| p.id.starts_with("okx")).count(), 1);
        assert_eq!(binance[0].id, "binance-0");
        // Each shard knows exactly the symbols its chunk covers.
        for plan in &plans {
            assert!(!plan.symbols.is_empty());
            assert!(plan.symbols.len() <= 3);
        }
    }

    #[test]
    fn test_zero_topics_per_connection_plans_one_topic_shards() {
        let mut cfg = FeedConfig::default();
        cfg.topics_per_connection = 0;
        let mut sup = FeedSupervisor::new(cfg, Arc::new(TimeSeriesCache::new(300)));
        sup.add_coverage(&["BTC/USDT"], &["1m"]).unwrap();
        // Clamped to one topic per shard instead of panicking.
        let plans = sup.plan();
        assert!(!plans.is_empty());
        assert_eq!(
            plans.iter().filter(|p| p.id.starts_with("binance")).count(),
            4
        );
    }

    #[test]
    fn test_endpoint_override_routes_all_shards() {
        let mut cfg = FeedConfig::default();
        cfg.endpoint_override = Some("ws://127.0.0.1:9/".into());
        let mut sup = FeedSupervisor::new(cfg, Arc::new(TimeSeriesCache::new(300)));
        sup.add_coverage(&["BTC/USDT"], &["1m"]).unwrap();
        for plan in sup.plan() {
            assert_eq!(plan.endpoint, "ws://127.0.0.1:9/");
        }
    }

    #[tokio::test]
    async fn test_start_without_coverage_is_a_no_op() {
        let mut sup = supervisor();
        sup.start();
        assert!(!sup.is_running());
        sup.stop().await;
    }
}
