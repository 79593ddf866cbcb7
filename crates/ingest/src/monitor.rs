use tracing::warn;

/// Data-flow staleness check behind `is_connected`.
///
/// Socket state alone is a poor liveness signal (a connection can sit
/// open while the exchange sends nothing), so connectivity is defined by
/// data recency: fresh updates within the staleness threshold, with a
/// warm-up grace window after start so a freshly started feed does not
/// report as down before the first message lands.
#[derive(Debug, Clone)]
pub struct StalenessMonitor {
    started_at: i64,
    warmup_ms: i64,
    staleness_ms: i64,
}

impl StalenessMonitor {
    pub fn new(warmup_ms: i64, staleness_ms: i64) -> Self {
        Self {
            started_at: marketfeed_core::now_ms(),
            warmup_ms,
            staleness_ms,
        }
    }

    /// Restart the warm-up window (called when the feed (re)starts).
    pub fn mark_started(&mut self) {
        self.started_at = marketfeed_core::now_ms();
    }

    /// `last_update_ms` is the newest update across all tracked symbols,
    /// 0 when nothing has arrived yet.
    pub fn is_connected(&self, last_update_ms: i64, now: i64) -> bool {
        if now.saturating_sub(self.started_at) <= self.warmup_ms {
            return true;
        }
        if last_update_ms == 0 {
            warn!("no data received since start");
            return false;
        }
        let age = now.saturating_sub(last_update_ms);
        if age > self.staleness_ms {
            warn!(age_ms = age, "feed is stale");
            return false;
        }
        true
    }
}
