use marketfeed_core::{DerivativeMetrics, Side};
use rust_decimal::Decimal;

/// Mutable per-symbol derivative-metrics record, updated in place with
/// monotonic recency.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecord {
    funding_rate: Decimal,
    open_interest: Decimal,
    liq_buy_notional: Decimal,
    liq_sell_notional: Decimal,
    /// Unix ms of the latest update; 0 means nothing has arrived yet.
    last_update: i64,
}

impl MetricsRecord {
    pub fn apply_mark_price(&mut self, funding_rate: Decimal, time: i64) {
        self.funding_rate = funding_rate;
        self.touch(time);
    }

    pub fn apply_open_interest(&mut self, open_interest: Decimal, time: i64) {
        self.open_interest = open_interest;
        self.touch(time);
    }

    /// Accumulate one liquidation order's notional. Totals run since the
    /// shard's last reconnect; the ratio is recomputed on every update.
    pub fn apply_liquidation(&mut self, side: Side, notional: Decimal, time: i64) {
        match side {
            Side::Buy => self.liq_buy_notional += notional,
            Side::Sell => self.liq_sell_notional += notional,
        }
        self.touch(time);
    }

    /// Cumulative liquidation totals reset only when the owning shard
    /// reconnects.
    pub fn reset_liquidations(&mut self) {
        self.liq_buy_notional = Decimal::ZERO;
        self.liq_sell_notional = Decimal::ZERO;
    }

    /// `sell_total / max(1, buy_total)`.
    pub fn liq_ratio(&self) -> Decimal {
        self.liq_sell_notional / self.liq_buy_notional.max(Decimal::ONE)
    }

    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    pub fn snapshot(&self) -> DerivativeMetrics {
        DerivativeMetrics {
            funding_rate: self.funding_rate,
            open_interest: self.open_interest,
            liq_buy_notional: self.liq_buy_notional,
            liq_sell_notional: self.liq_sell_notional,
            liq_ratio: self.liq_ratio(),
            last_update: self.last_update,
        }
    }

    fn touch(&mut self, time: i64) {
        if time > self.last_update {
            self.last_update = time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_liquidation_ratio() {
        let mut record = MetricsRecord::default();
        // One BUY liquidation of 10 units @ $100, one SELL of 5 @ $100.
        record.apply_liquidation(Side::Buy, dec!(10) * dec!(100), 1);
        record.apply_liquidation(Side::Sell, dec!(5) * dec!(100), 2);
        assert_eq!(record.liq_ratio(), dec!(0.5));
    }

    #[test]
    fn test_ratio_denominator_floors_at_one() {
        let mut record = MetricsRecord::default();
        record.apply_liquidation(Side::Sell, dec!(500), 1);
        // No buy-side flow yet: denominator clamps to 1.
        assert_eq!(record.liq_ratio(), dec!(500));
    }

    #[test]
    fn test_reset_clears_totals_only() {
        let mut record = MetricsRecord::default();
        record.apply_mark_price(dec!(0.0001), 5);
        record.apply_liquidation(Side::Buy, dec!(1000), 6);
        record.reset_liquidations();
        let snap = record.snapshot();
        assert_eq!(snap.liq_buy_notional, Decimal::ZERO);
        assert_eq!(snap.funding_rate, dec!(0.0001));
        assert_eq!(snap.last_update, 6);
    }

    #[test]
    fn test_recency_is_monotonic() {
        let mut record = MetricsRecord::default();
        record.apply_open_interest(dec!(50), 100);
        record.apply_mark_price(dec!(0.01), 90);
        assert_eq!(record.last_update(), 100);
    }
}
