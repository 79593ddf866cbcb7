use futures_util::{SinkExt, StreamExt};
use marketfeed_cache::TimeSeriesCache;
use marketfeed_core::{CanonicalSymbol, FailureRecord, FeedError, StreamDecoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of one connection shard.
///
/// `Stopped` is terminal and only ever reached through an explicit stop;
/// every failure routes back through `Backoff` into `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Idle,
    Connecting,
    Open,
    Backoff,
    Stopped,
}

/// Observable state of one shard, published over a `watch` channel so
/// reads never touch the shard task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub status: ShardStatus,
    pub consecutive_failures: u32,
    /// When the current connection opened, unix ms. `None` unless Open.
    pub started_at: Option<i64>,
    /// Delay of the backoff currently in effect.
    pub current_backoff_ms: u64,
    pub last_failure: Option<FailureRecord>,
}

impl ConnectionState {
    fn idle() -> Self {
        Self {
            status: ShardStatus::Idle,
            consecutive_failures: 0,
            started_at: None,
            current_backoff_ms: 0,
            last_failure: None,
        }
    }
}

/// Bounded exponential backoff: doubles per consecutive failure from
/// `base`, never past `cap`.
pub(crate) fn backoff_delay(consecutive_failures: u32, base: Duration, cap: Duration) -> Duration {
    let exp = consecutive_failures.saturating_sub(1).min(16);
    base.saturating_mul(1 << exp).min(cap)
}

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// One physical WebSocket connection and the topics assigned to it.
///
/// A shard is an isolated state machine on its own tokio task: it
/// connects, subscribes, pumps frames into the cache, and reconnects
/// forever until told to stop. Failures on one shard never touch the
/// others; the shared cache is the only cross-task state.
pub(crate) struct Shard {
    pub id: String,
    pub endpoint: String,
    pub subscribe_frames: Vec<String>,
    pub symbols: Vec<CanonicalSymbol>,
    pub decoder: Arc<dyn StreamDecoder>,
    pub cache: Arc<TimeSeriesCache>,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub stability_window: Duration,
    pub state_tx: watch::Sender<ConnectionState>,
}

enum SessionEnd {
    /// Cooperative shutdown observed.
    Shutdown,
    /// Connection lost; `stable` when it had been open past the
    /// stability window.
    Failed { stable: bool },
}

impl Shard {
    pub(crate) fn new_state() -> (watch::Sender<ConnectionState>, watch::Receiver<ConnectionState>) {
        watch::channel(ConnectionState::idle())
    }

    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut failures: u32 = 0;
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            self.set_status(ShardStatus::Connecting, failures);
            info!(shard = %self.id, endpoint = %self.endpoint, "connecting");

            let connected = tokio::select! {
                res = connect_async(self.endpoint.as_str()) => res,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok((stream, _)) => match self.session(stream, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Failed { stable } => {
                        failures = if stable { 1 } else { failures + 1 };
                    }
                },
                Err(err) => {
                    failures += 1;
                    self.record_failure(FeedError::Transport(err.to_string()));
                }
            }

            let delay = backoff_delay(failures, self.backoff_base, self.backoff_cap);
            self.state_tx.send_modify(|s| {
                s.status = ShardStatus::Backoff;
                s.consecutive_failures = failures;
                s.started_at = None;
                s.current_backoff_ms = delay.as_millis() as u64;
            });
            warn!(
                shard = %self.id,
                failures,
                delay_ms = delay.as_millis() as u64,
                "connection lost, backing off"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        self.set_status(ShardStatus::Stopped, failures);
        info!(shard = %self.id, "stopped");
    }

    async fn session(&self, stream: WsStream, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        for frame in &self.subscribe_frames {
            if let Err(err) = write.send(Message::Text(frame.clone())).await {
                self.record_failure(FeedError::Transport(err.to_string()));
                return SessionEnd::Failed { stable: false };
            }
        }

        // Liquidation totals run per connection.
        self.cache.reset_liquidations(&self.symbols);
        self.state_tx.send_modify(|s| {
            s.status = ShardStatus::Open;
            s.started_at = Some(marketfeed_core::now_ms());
            s.current_backoff_ms = 0;
        });
        info!(shard = %self.id, topics = self.subscribe_frames.len(), "open");

        let opened = Instant::now();
        let mut last_rx = Instant::now();
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let stable = || opened.elapsed() >= self.stability_window;
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                _ = heartbeat.tick() => {
                    // Any inbound frame counts as liveness; a silent
                    // connection is treated as dead.
                    if last_rx.elapsed() > self.idle_timeout {
                        self.record_failure(FeedError::Transport("heartbeat window elapsed with no traffic".into()));
                        return SessionEnd::Failed { stable: stable() };
                    }
                    let ping = match self.decoder.heartbeat_frame() {
                        Some(frame) => Message::Text(frame),
                        None => Message::Ping(Vec::new()),
                    };
                    if let Err(err) = write.send(ping).await {
                        self.record_failure(FeedError::Transport(err.to_string()));
                        return SessionEnd::Failed { stable: stable() };
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_rx = Instant::now();
                        match self.decoder.decode(&text) {
                            Ok(events) => {
                                for event in &events {
                                    self.cache.apply(event);
                                }
                            }
                            // Drop the message, keep the connection.
                            Err(err) => self.record_failure(err),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_rx = Instant::now();
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.record_failure(FeedError::Transport("connection closed by peer".into()));
                        return SessionEnd::Failed { stable: stable() };
                    }
                    Some(Ok(_)) => last_rx = Instant::now(),
                    Some(Err(err)) => {
                        self.record_failure(FeedError::Transport(err.to_string()));
                        return SessionEnd::Failed { stable: stable() };
                    }
                }
            }
        }
    }

    fn set_status(&self, status: ShardStatus, failures: u32) {
        self.state_tx.send_modify(|s| {
            s.status = status;
            s.consecutive_failures = failures;
            if status != ShardStatus::Open {
                s.started_at = None;
            }
        });
    }

    fn record_failure(&self, err: FeedError) {
        let record = FailureRecord::new(err.kind(), self.id.clone());
        match &err {
            FeedError::Decode(_) | FeedError::UnknownSymbol { .. } => {
                debug!(shard = %self.id, kind = ?record.kind, error = %err, "frame dropped");
            }
            _ => {
                warn!(shard = %self.id, kind = ?record.kind, error = %err, "shard failure");
            }
        }
        self.state_tx.send_modify(|s| s.last_failure = Some(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(0, base, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, base, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, base, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(6, base, cap), Duration::from_secs(30));
        assert_eq!(backoff_delay(100, base, cap), Duration::from_secs(30));
    }

    #[test]
    fn test_initial_state_is_idle() {
        let (_tx, rx) = Shard::new_state();
        assert_eq!(rx.borrow().status, ShardStatus::Idle);
        assert_eq!(rx.borrow().consecutive_failures, 0);
        assert!(rx.borrow().last_failure.is_none());
    }
}
