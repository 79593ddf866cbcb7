use marketfeed_core::Candle;
use std::collections::VecDeque;

/// Rolling, capacity-bounded candle series for one (symbol, timeframe).
///
/// Eviction is pure recency: when an append pushes the series past its
/// capacity, the oldest entries are dropped from the front.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl CandleSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            candles: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Overwrite the in-progress bucket or start a new one.
    ///
    /// If the last stored candle shares `open_time` with the incoming one,
    /// its fields are replaced in place; otherwise the candle is appended
    /// and the front is trimmed down to capacity. Relies on the upstream
    /// delivering non-decreasing timestamps per shard; ties overwrite.
    pub fn upsert(&mut self, candle: Candle) {
        match self.candles.back_mut() {
            Some(last) if last.open_time == candle.open_time => {
                *last = candle;
            }
            _ => {
                self.candles.push_back(candle);
                while self.candles.len() > self.capacity {
                    self.candles.pop_front();
                }
            }
        }
    }

    /// Owned, ordered snapshot of the series.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open_time: i64, close: rust_decimal::Decimal, closed: bool) -> Candle {
        Candle {
            open_time,
            open: dec!(100),
            high: dec!(110),
            low: dec!(90),
            close,
            volume: dec!(1),
            closed,
        }
    }

    #[test]
    fn test_same_bucket_overwrites_in_place() {
        let mut series = CandleSeries::new(10);
        series.upsert(candle(60_000, dec!(101), false));
        series.upsert(candle(60_000, dec!(102), false));
        series.upsert(candle(60_000, dec!(103), false));
        assert_eq!(series.len(), 1);
        assert_eq!(series.last().unwrap().close, dec!(103));
    }

    #[test]
    fn test_new_bucket_appends() {
        let mut series = CandleSeries::new(10);
        series.upsert(candle(60_000, dec!(101), true));
        series.upsert(candle(120_000, dec!(102), false));
        assert_eq!(series.len(), 2);
        assert!(series.snapshot()[0].closed);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut series = CandleSeries::new(3);
        for i in 0..5 {
            series.upsert(candle(i * 60_000, dec!(100), true));
        }
        assert_eq!(series.len(), 3);
        let snapshot = series.snapshot();
        // The two oldest buckets are gone.
        assert_eq!(snapshot[0].open_time, 2 * 60_000);
        assert_eq!(snapshot[2].open_time, 4 * 60_000);
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut series = CandleSeries::new(4);
        for i in 0..100 {
            series.upsert(candle(i * 60_000, dec!(1), true));
            assert!(series.len() <= 4);
        }
    }
}
