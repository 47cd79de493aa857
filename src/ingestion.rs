//! Ingestion Controller (§4.8). Hybrid streaming + polling fan-in onto a
//! single-consumer pipeline task (§5 concurrency resolution: one
//! `mpsc::Sender<Trade>` per controller, trades serialized through one
//! consumer so per-wallet/per-market state never races).
//!
//! The reconnect loop shape and venue kill-switch idiom are grounded on
//! the donor's `scrapers/dome_websocket.rs::run()` and
//! `main.rs::DataSourceKillSwitch`.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::PipelineError;
use crate::models::{Alert, StreamState, Trade};
use crate::pipeline::Pipeline;
use crate::venues::VenueAdapter;

/// Overlap window subtracted from `last_check_time` when deriving the
/// poll cursor (§4.8), so a trade landing right at the edge of one poll
/// window isn't missed by the next.
const POLL_CURSOR_OVERLAP_SECS: i64 = 5;

/// Disables a venue's polling loop after too many consecutive failures,
/// mirroring the donor's `DataSourceKillSwitch` (trip on a failure
/// streak, never auto-recover).
struct VenueKillSwitch {
    name: &'static str,
    failure_threshold: u32,
    consecutive_failures: u32,
    tripped: bool,
}

impl VenueKillSwitch {
    fn new(name: &'static str, failure_threshold: u32) -> Self {
        Self { name, failure_threshold, consecutive_failures: 0, tripped: false }
    }

    fn is_active(&self) -> bool {
        !self.tripped
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold && !self.tripped {
            self.tripped = true;
            warn!(source = self.name, failures = self.consecutive_failures, "venue disabled after consecutive failures");
        }
    }
}

/// Health counters exposed for `/healthz`-style introspection; mirrors
/// the donor's atomics-behind-`Arc` idiom for cross-task status.
pub struct IngestionHealth {
    pub ws_trades_total: AtomicU64,
    pub poll_trades_total: AtomicU64,
    pub alerts_total: AtomicU64,
    pub stream_connected: AtomicBool,
    pub last_check_time: AtomicI64,
    pub stream_state: parking_lot::Mutex<StreamState>,
}

impl Default for IngestionHealth {
    fn default() -> Self {
        Self {
            ws_trades_total: AtomicU64::new(0),
            poll_trades_total: AtomicU64::new(0),
            alerts_total: AtomicU64::new(0),
            stream_connected: AtomicBool::new(false),
            last_check_time: AtomicI64::new(0),
            stream_state: parking_lot::Mutex::new(StreamState::Disconnected),
        }
    }
}

impl IngestionHealth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn touch(&self) {
        self.last_check_time.store(Utc::now().timestamp(), Ordering::Relaxed);
    }
}

/// Orchestrates streaming + polling ingestion for a set of venue
/// adapters, deduplicating trade ids and forwarding every accepted trade
/// through a single consumer task running the per-trade pipeline.
pub struct IngestionController {
    adapters: Vec<Arc<dyn VenueAdapter>>,
    cfg: Arc<Config>,
    health: Arc<IngestionHealth>,
}

impl IngestionController {
    pub fn new(adapters: Vec<Arc<dyn VenueAdapter>>, cfg: Arc<Config>) -> Self {
        Self { adapters, cfg, health: IngestionHealth::new() }
    }

    pub fn health(&self) -> Arc<IngestionHealth> {
        self.health.clone()
    }

    /// Runs ingestion until the process is torn down. Spawns one
    /// streaming task per adapter that supports it, one polling task per
    /// adapter, a maintenance task, and the single pipeline consumer.
    /// Returns once all tasks have been spawned; callers `.await` the
    /// returned join handle set or simply let the process run.
    pub async fn run(self, pipeline: Arc<Pipeline>, alert_sink_fn: impl Fn(Alert) + Send + Sync + 'static) {
        let (tx, rx) = mpsc::unbounded_channel::<Trade>();

        tokio::spawn(consume_trades(rx, pipeline.clone(), self.health.clone(), Arc::new(alert_sink_fn)));

        for adapter in self.adapters.clone() {
            let tx = tx.clone();
            let health = self.health.clone();
            tokio::spawn(async move {
                run_stream_for_adapter(adapter, tx, health).await;
            });
        }

        for adapter in self.adapters.clone() {
            let tx = tx.clone();
            let health = self.health.clone();
            let cfg = self.cfg.clone();
            tokio::spawn(async move {
                run_poll_for_adapter(adapter, tx, health, cfg).await;
            });
        }

        tokio::spawn(run_maintenance(pipeline, self.cfg.clone(), self.health.clone()));
    }
}

async fn run_stream_for_adapter(adapter: Arc<dyn VenueAdapter>, tx: mpsc::UnboundedSender<Trade>, health: Arc<IngestionHealth>) {
    let venue = adapter.venue();
    *health.stream_state.lock() = StreamState::Connecting;
    let Some((mut rx, mut state_rx)) = adapter.stream_trades().await else {
        *health.stream_state.lock() = StreamState::Disconnected;
        return;
    };
    *health.stream_state.lock() = StreamState::Subscribed;
    health.stream_connected.store(true, Ordering::Relaxed);
    info!(venue = venue.as_str(), "stream connected");

    let mut first_trade = true;
    loop {
        tokio::select! {
            trade = rx.recv() => {
                let Some(trade) = trade else { break };
                if first_trade {
                    *health.stream_state.lock() = StreamState::Receiving;
                    first_trade = false;
                }
                health.ws_trades_total.fetch_add(1, Ordering::Relaxed);
                let _ = tx.send(trade);
            }
            state = state_rx.recv() => {
                let Some(state) = state else { continue };
                *health.stream_state.lock() = state;
                if state == StreamState::Disconnected {
                    let err = PipelineError::StreamDisconnect {
                        venue: venue.as_str().to_string(),
                        reason: "reconnect attempts exhausted".to_string(),
                    };
                    if err.is_fatal_for_stream() {
                        health.stream_connected.store(false, Ordering::Relaxed);
                        warn!(venue = venue.as_str(), error = %err, "stream marked dead, falling back to polling only");
                    }
                    break;
                }
            }
        }
    }

    health.stream_connected.store(false, Ordering::Relaxed);
    *health.stream_state.lock() = StreamState::Disconnected;
    warn!(venue = venue.as_str(), "stream channel closed");
}

/// Derives the poll cursor from `health.last_check_time` rather than the
/// previous batch's max trade timestamp (§4.8: `since = last_check_time
/// − 5s`), so a slow venue that omits a trade from one batch still picks
/// it up on the next.
fn poll_cursor(health: &IngestionHealth) -> Option<DateTime<Utc>> {
    let last_check = health.last_check_time.load(Ordering::Relaxed);
    if last_check <= 0 {
        return None;
    }
    Utc.timestamp_opt(last_check, 0)
        .single()
        .map(|ts| ts - chrono::Duration::seconds(POLL_CURSOR_OVERLAP_SECS))
}

async fn run_poll_for_adapter(
    adapter: Arc<dyn VenueAdapter>,
    tx: mpsc::UnboundedSender<Trade>,
    health: Arc<IngestionHealth>,
    cfg: Arc<Config>,
) {
    let venue = adapter.venue();
    let mut switch = VenueKillSwitch::new(venue.as_str(), 10);
    let mut ticker = tokio::time::interval(cfg.poll_interval);

    loop {
        ticker.tick().await;
        if !switch.is_active() {
            continue;
        }
        let since = poll_cursor(&health);
        health.touch();

        match adapter.recent_trades(since, 200).await {
            Ok(trades) => {
                switch.record_success();
                for trade in trades {
                    health.poll_trades_total.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(trade);
                }
            }
            Err(e) => {
                switch.record_failure();
                warn!(venue = venue.as_str(), error = %e, "poll failed");
            }
        }

        if adapter.supports_whale_only_fetch() {
            match adapter.recent_whale_trades(since, cfg.whale_threshold_usd, 200).await {
                Ok(trades) => {
                    for trade in trades {
                        health.poll_trades_total.fetch_add(1, Ordering::Relaxed);
                        let _ = tx.send(trade);
                    }
                }
                Err(e) => warn!(venue = venue.as_str(), error = %e, "whale-only poll failed"),
            }
        }
    }
}

async fn consume_trades(
    mut rx: mpsc::UnboundedReceiver<Trade>,
    pipeline: Arc<Pipeline>,
    health: Arc<IngestionHealth>,
    alert_sink_fn: Arc<dyn Fn(Alert) + Send + Sync>,
) {
    let mut dedup = DedupSet::new(pipeline.cfg().dedup_set_cap, pipeline.cfg().dedup_set_trim_to);
    while let Some(trade) = rx.recv().await {
        if !dedup.insert(&trade.id) {
            continue;
        }
        if let Some(alert) = pipeline.process_trade(trade).await {
            health.alerts_total.fetch_add(1, Ordering::Relaxed);
            alert_sink_fn(alert);
        }
    }
}

async fn run_maintenance(pipeline: Arc<Pipeline>, cfg: Arc<Config>, health: Arc<IngestionHealth>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(3600));
    loop {
        ticker.tick().await;
        health.touch();
        let now = Utc::now();
        let evicted = pipeline.wallet_store().cleanup(now, cfg.max_inactive_days, cfg.min_wallets_before_cleanup);
        if evicted > 0 {
            info!(evicted, "wallet store cleanup evicted inactive profiles");
        }
    }
}

/// A capped FIFO-ish set: once length exceeds `cap`, it is trimmed back
/// down to `trim_to` by dropping the oldest half (§4.8 bounded memory).
struct DedupSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
    trim_to: usize,
}

impl DedupSet {
    fn new(cap: usize, trim_to: usize) -> Self {
        Self { seen: HashSet::new(), order: VecDeque::new(), cap, trim_to }
    }

    /// Returns `true` if `id` was newly inserted (i.e. the trade should
    /// be processed), `false` if it was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > self.cap {
            while self.order.len() > self.trim_to {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_set_rejects_repeat_ids() {
        let mut set = DedupSet::new(10, 5);
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
        assert!(set.insert("b"));
    }

    #[test]
    fn dedup_set_trims_when_cap_exceeded() {
        let mut set = DedupSet::new(4, 2);
        for i in 0..5 {
            set.insert(&i.to_string());
        }
        assert!(set.order.len() <= 2);
    }

    #[test]
    fn venue_kill_switch_trips_after_threshold() {
        let mut switch = VenueKillSwitch::new("test", 3);
        assert!(switch.is_active());
        switch.record_failure();
        switch.record_failure();
        assert!(switch.is_active());
        switch.record_failure();
        assert!(!switch.is_active());
    }
}
