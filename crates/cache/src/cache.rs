use crate::metrics::MetricsRecord;
use crate::series::CandleSeries;
use dashmap::DashMap;
use marketfeed_core::{
    fuzzy_key, Candle, CanonicalSymbol, EventKind, MetricsSnapshot, NormalizedEvent, TickerUpdate,
    Timeframe,
};
use std::sync::atomic::{AtomicI64, Ordering};

/// Shared in-memory read view: rolling candle series per (symbol,
/// timeframe), latest derivative metrics and ticker state per symbol.
///
/// This is the only state shared between shard tasks. `DashMap` keys each
/// entry under its own shard lock, so writers for unrelated symbols never
/// serialize on a global lock, and readers always see whole entries.
pub struct TimeSeriesCache {
    max_candles: usize,
    series: DashMap<(CanonicalSymbol, Timeframe), CandleSeries>,
    metrics: DashMap<CanonicalSymbol, MetricsRecord>,
    tickers: DashMap<CanonicalSymbol, TickerUpdate>,
    /// Fuzzy-match fallback: one canonicalization key space, never a
    /// second cache key space.
    fuzzy: DashMap<String, CanonicalSymbol>,
    /// Unix ms of the most recent successful update across all symbols.
    last_update: AtomicI64,
}

impl TimeSeriesCache {
    pub fn new(max_candles: usize) -> Self {
        Self {
            max_candles: max_candles.max(1),
            series: DashMap::new(),
            metrics: DashMap::new(),
            tickers: DashMap::new(),
            fuzzy: DashMap::new(),
            last_update: AtomicI64::new(0),
        }
    }

    /// Create empty entries for a newly subscribed symbol. Idempotent.
    pub fn track(&self, symbol: &CanonicalSymbol, timeframes: &[Timeframe]) {
        for tf in timeframes {
            self.series
                .entry((symbol.clone(), *tf))
                .or_insert_with(|| CandleSeries::new(self.max_candles));
        }
        self.metrics.entry(symbol.clone()).or_default();
        self.fuzzy.insert(symbol.fuzzy_key(), symbol.clone());
    }

    /// Drop everything cached for a symbol (explicit unsubscribe).
    pub fn untrack(&self, symbol: &CanonicalSymbol) {
        self.series.retain(|(s, _), _| s != symbol);
        self.metrics.remove(symbol);
        self.tickers.remove(symbol);
        self.fuzzy.remove(&symbol.fuzzy_key());
    }

    /// Route one normalized event into the cache. Idempotent in-memory
    /// mutation; bounded work per message.
    pub fn apply(&self, event: &NormalizedEvent) {
        match &event.kind {
            EventKind::Kline { timeframe, candle } => {
                self.upsert_candle(&event.symbol, *timeframe, candle.clone());
            }
            EventKind::Ticker(ticker) => {
                // Monotonic recency: never replace a newer snapshot.
                let mut entry = self
                    .tickers
                    .entry(event.symbol.clone())
                    .or_insert_with(|| ticker.clone());
                if ticker.time >= entry.time {
                    *entry = ticker.clone();
                }
            }
            EventKind::MarkPrice { funding_rate } => {
                self.metrics
                    .entry(event.symbol.clone())
                    .or_default()
                    .apply_mark_price(*funding_rate, event.time);
            }
            EventKind::OpenInterest { open_interest } => {
                self.metrics
                    .entry(event.symbol.clone())
                    .or_default()
                    .apply_open_interest(*open_interest, event.time);
            }
            EventKind::Liquidation { side, .. } => {
                let notional = event
                    .liquidation_notional()
                    .unwrap_or(rust_decimal::Decimal::ZERO);
                self.metrics
                    .entry(event.symbol.clone())
                    .or_default()
                    .apply_liquidation(*side, notional, event.time);
            }
        }
        self.fuzzy
            .entry(event.symbol.fuzzy_key())
            .or_insert_with(|| event.symbol.clone());
        self.last_update.fetch_max(event.time, Ordering::Relaxed);
    }

    /// Overwrite the in-progress bucket or append a new one, then trim to
    /// capacity.
    pub fn upsert_candle(&self, symbol: &CanonicalSymbol, timeframe: Timeframe, candle: Candle) {
        self.series
            .entry((symbol.clone(), timeframe))
            .or_insert_with(|| CandleSeries::new(self.max_candles))
            .upsert(candle);
    }

    /// Ordered snapshot of a series; empty when uninitialized, never
    /// missing.
    pub fn ohlcv(&self, symbol: &CanonicalSymbol, timeframe: Timeframe) -> Vec<Candle> {
        self.series
            .get(&(symbol.clone(), timeframe))
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    /// Resolve a loosely formatted query symbol against tracked symbols:
    /// exact canonical parse first, fuzzy key fallback second.
    pub fn resolve_query(&self, query: &str) -> Option<CanonicalSymbol> {
        if let Ok(symbol) = CanonicalSymbol::parse(query) {
            if self.metrics.contains_key(&symbol) {
                return Some(symbol);
            }
        }
        self.fuzzy.get(&fuzzy_key(query)).map(|e| e.clone())
    }

    /// Latest derivative metrics, or the not-live sentinel when nothing
    /// usable exists. `now` and `freshness_ms` bound how old a record may
    /// be and still count as live.
    pub fn metrics(
        &self,
        symbol: &CanonicalSymbol,
        now: i64,
        freshness_ms: i64,
    ) -> MetricsSnapshot {
        let Some(record) = self.metrics.get(symbol) else {
            return MetricsSnapshot::NotLive;
        };
        let last = record.last_update();
        if last == 0 || now.saturating_sub(last) > freshness_ms {
            return MetricsSnapshot::NotLive;
        }
        MetricsSnapshot::Live(record.snapshot())
    }

    pub fn ticker(&self, symbol: &CanonicalSymbol) -> Option<TickerUpdate> {
        self.tickers.get(symbol).map(|t| t.clone())
    }

    /// Reset cumulative liquidation totals for the given symbols (called
    /// when their shard reconnects).
    pub fn reset_liquidations(&self, symbols: &[CanonicalSymbol]) {
        for symbol in symbols {
            if let Some(mut record) = self.metrics.get_mut(symbol) {
                record.reset_liquidations();
            }
        }
    }

    /// Unix ms of the most recent update across every tracked symbol; 0
    /// when nothing has arrived yet.
    pub fn last_update_ms(&self) -> i64 {
        self.last_update.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.series.clear();
        self.metrics.clear();
        self.tickers.clear();
        self.fuzzy.clear();
        self.last_update.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketfeed_core::{ExchangeId, Side};
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> CanonicalSymbol {
        CanonicalSymbol::parse(s).unwrap()
    }

    fn kline(symbol: &CanonicalSymbol, open_time: i64, close: rust_decimal::Decimal, closed: bool) -> NormalizedEvent {
        NormalizedEvent {
            exchange: ExchangeId::Binance,
            symbol: symbol.clone(),
            time: open_time + 1,
            kind: EventKind::Kline {
                timeframe: Timeframe::M1,
                candle: Candle {
                    open_time,
                    open: dec!(100),
                    high: dec!(110),
                    low: dec!(90),
                    close,
                    volume: dec!(2),
                    closed,
                },
            },
        }
    }

    #[test]
    fn test_in_progress_bucket_then_rollover() {
        let cache = TimeSeriesCache::new(300);
        let btc = sym("BTC/USDT");
        cache.track(&btc, &[Timeframe::M1]);

        // Three updates for the same bucket, then the next bucket opens.
        cache.apply(&kline(&btc, 60_000, dec!(101), false));
        cache.apply(&kline(&btc, 60_000, dec!(102), false));
        cache.apply(&kline(&btc, 60_000, dec!(103), false));
        cache.apply(&kline(&btc, 120_000, dec!(104), false));

        let candles = cache.ohlcv(&btc, Timeframe::M1);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, dec!(103));
        assert_eq!(candles[1].open_time, 120_000);
    }

    #[test]
    fn test_ohlcv_empty_when_uninitialized() {
        let cache = TimeSeriesCache::new(300);
        assert!(cache.ohlcv(&sym("BTC/USDT"), Timeframe::H1).is_empty());
    }

    #[test]
    fn test_metrics_not_live_for_unknown_symbol() {
        let cache = TimeSeriesCache::new(300);
        let snap = cache.metrics(&sym("DOGE/USDT"), 1_000_000, 1_800_000);
        assert_eq!(snap, MetricsSnapshot::NotLive);
    }

    #[test]
    fn test_metrics_not_live_before_first_update() {
        let cache = TimeSeriesCache::new(300);
        let btc = sym("BTC/USDT");
        cache.track(&btc, &[]);
        assert_eq!(
            cache.metrics(&btc, 1_000_000, 1_800_000),
            MetricsSnapshot::NotLive
        );
    }

    #[test]
    fn test_metrics_go_stale_past_freshness() {
        let cache = TimeSeriesCache::new(300);
        let btc = sym("BTC/USDT");
        cache.track(&btc, &[]);
        cache.apply(&NormalizedEvent {
            exchange: ExchangeId::Binance,
            symbol: btc.clone(),
            time: 1_000_000,
            kind: EventKind::MarkPrice {
                funding_rate: dec!(0.0001),
            },
        });

        assert!(cache.metrics(&btc, 1_000_100, 1_800_000).is_live());
        // 30 minutes later the record is no longer actionable.
        assert_eq!(
            cache.metrics(&btc, 1_000_000 + 1_800_001, 1_800_000),
            MetricsSnapshot::NotLive
        );
    }

    #[test]
    fn test_liquidation_flow_through_cache() {
        let cache = TimeSeriesCache::new(300);
        let btc = sym("BTC/USDT");
        cache.track(&btc, &[]);
        for (side, qty) in [(Side::Buy, dec!(10)), (Side::Sell, dec!(5))] {
            cache.apply(&NormalizedEvent {
                exchange: ExchangeId::Binance,
                symbol: btc.clone(),
                time: 2_000,
                kind: EventKind::Liquidation {
                    side,
                    price: dec!(100),
                    quantity: qty,
                },
            });
        }
        let snap = cache.metrics(&btc, 2_500, 1_800_000).live().unwrap();
        assert_eq!(snap.liq_ratio, dec!(0.5));

        cache.reset_liquidations(std::slice::from_ref(&btc));
        let snap = cache.metrics(&btc, 2_500, 1_800_000).live().unwrap();
        assert_eq!(snap.liq_buy_notional, dec!(0));
    }

    #[test]
    fn test_resolve_query_exact_and_fuzzy() {
        let cache = TimeSeriesCache::new(300);
        let btc = sym("BTC/USDT:USDT");
        cache.track(&btc, &[]);
        assert_eq!(cache.resolve_query("BTC/USDT:USDT"), Some(btc.clone()));
        assert_eq!(cache.resolve_query("btc-usdt"), Some(btc.clone()));
        assert_eq!(cache.resolve_query("BTCUSDT"), Some(btc));
        assert_eq!(cache.resolve_query("XRPUSDT"), None);
    }

    #[test]
    fn test_stale_ticker_does_not_replace_newer() {
        let cache = TimeSeriesCache::new(300);
        let btc = sym("BTC/USDT");
        let ticker = |time, last| NormalizedEvent {
            exchange: ExchangeId::Okx,
            symbol: btc.clone(),
            time,
            kind: EventKind::Ticker(TickerUpdate {
                last,
                change_24h_pct: dec!(1),
                volume_24h: dec!(10),
                exchange: ExchangeId::Okx,
                time,
            }),
        };
        cache.apply(&ticker(2_000, dec!(101)));
        cache.apply(&ticker(1_000, dec!(99)));
        assert_eq!(cache.ticker(&btc).unwrap().last, dec!(101));
        assert_eq!(cache.last_update_ms(), 2_000);
    }

    #[test]
    fn test_untrack_removes_all_state() {
        let cache = TimeSeriesCache::new(300);
        let btc = sym("BTC/USDT");
        cache.track(&btc, &[Timeframe::M1]);
        cache.apply(&kline(&btc, 60_000, dec!(1), false));
        cache.untrack(&btc);
        assert!(cache.ohlcv(&btc, Timeframe::M1).is_empty());
        assert_eq!(cache.resolve_query("BTCUSDT"), None);
    }
}
