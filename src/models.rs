//! Core data model: Trade, Market, WalletProfile, Alert and friends.
//!
//! Every type here is a plain record (§9 design note): tagged enums for
//! side/severity/alert_type/category/position_action, explicit required
//! fields, no hidden defaults beyond what serde needs for optional wire
//! fields.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Venues this pipeline ingests trades from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Polymarket,
    Kalshi,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Polymarket => "polymarket",
            Venue::Kalshi => "kalshi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Politics,
    Crypto,
    Sports,
    Finance,
    Entertainment,
    Science,
    World,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// §4.6: ≤3 LOW, ≤6 MEDIUM, else HIGH.
    pub fn from_score(score: u8) -> Self {
        if score <= 3 {
            Severity::Low
        } else if score <= 6 {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionAction {
    Opening,
    Adding,
    Closing,
    Reversing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    WhaleTrade,
    UnusualSize,
    NewWallet,
    SmartMoney,
    VipWallet,
    RepeatActor,
    HeavyActor,
    WhaleExit,
    Contrarian,
    ExtremeConfidence,
    ClusterActivity,
    HighImpact,
    EntityActivity,
    FocusedWallet,
}

/// An immutable trade normalized from a venue-native payload (§3, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub venue: Venue,
    pub market_id: String,
    pub trader_id: String,
    /// False for venue-anonymous trades; set by the adapter, not inferred
    /// from `trader_id`'s literal value (§9 design note).
    pub trader_identity_known: bool,
    pub outcome: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub amount_usd: f64,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: Option<String>,
}

impl Trade {
    pub fn is_anonymous(&self) -> bool {
        !self.trader_identity_known
    }
}

/// A mutable, timestamp-versioned market record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub venue: Venue,
    pub question: String,
    pub slug: String,
    pub category: Category,
    pub outcome_prices: HashMap<String, f64>,
    pub volume: f64,
    pub end_time: Option<DateTime<Utc>>,
    pub active: bool,
    pub url: Option<String>,
    /// Sports markets and known high-frequency patterns (e.g. 15-min
    /// BTC up/down) are flagged so the detector battery can elide
    /// alerts on them (§4.2).
    pub is_sports: bool,
    pub is_high_frequency: bool,
    pub updated_at: DateTime<Utc>,
}

/// Per-(market, outcome) share/USD accumulation for one wallet (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionState {
    pub buy_shares: f64,
    pub buy_usd: f64,
    pub sell_shares: f64,
    pub sell_usd: f64,
}

impl PositionState {
    pub fn net_shares(&self) -> f64 {
        self.buy_shares - self.sell_shares
    }
}

/// Rolling per-wallet state (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletProfile {
    pub address: String,
    pub total_trades: u64,
    pub total_volume_usd: f64,
    pub non_sports_volume_usd: f64,
    pub buy_volume_usd: f64,
    pub sell_volume_usd: f64,
    pub total_buys: u64,
    pub total_sells: u64,
    pub large_trades_count: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Ring buffer capped at 100 (§5 bounded memory).
    pub recent_trade_times: VecDeque<DateTime<Utc>>,
    pub markets_traded: HashSet<String>,
    pub positions: HashMap<String, HashMap<String, PositionState>>,
}

pub const TRADE_TIME_RING_CAP: usize = 100;

impl WalletProfile {
    pub fn new(address: String, now: DateTime<Utc>) -> Self {
        Self {
            address,
            total_trades: 0,
            total_volume_usd: 0.0,
            non_sports_volume_usd: 0.0,
            buy_volume_usd: 0.0,
            sell_volume_usd: 0.0,
            total_buys: 0,
            total_sells: 0,
            large_trades_count: 0,
            winning_trades: 0,
            losing_trades: 0,
            first_seen: now,
            last_seen: now,
            recent_trade_times: VecDeque::with_capacity(TRADE_TIME_RING_CAP),
            markets_traded: HashSet::new(),
            positions: HashMap::new(),
        }
    }

    pub fn is_new(&self) -> bool {
        self.total_trades < 5
    }

    pub fn is_whale(&self, whale_volume_usd: f64) -> bool {
        self.total_volume_usd >= whale_volume_usd
    }

    pub fn is_focused(&self) -> bool {
        self.markets_traded.len() <= 3 && self.total_trades >= 5
    }

    pub fn trades_since(&self, since: DateTime<Utc>) -> usize {
        self.recent_trade_times
            .iter()
            .filter(|t| **t >= since)
            .count()
    }

    pub fn is_repeat_actor(&self, now: DateTime<Utc>) -> bool {
        self.trades_since(now - chrono::Duration::hours(1)) >= 3
    }

    pub fn is_heavy_actor(&self, now: DateTime<Utc>) -> bool {
        self.trades_since(now - chrono::Duration::hours(24)) >= 10
    }

    pub fn resolved_trades(&self) -> u64 {
        self.winning_trades + self.losing_trades
    }

    pub fn win_rate(&self) -> f64 {
        let resolved = self.resolved_trades();
        if resolved == 0 {
            0.0
        } else {
            self.winning_trades as f64 / resolved as f64
        }
    }

    pub fn is_smart_money(&self, min_volume_usd: f64, min_win_rate: f64, min_resolved: u64) -> bool {
        self.resolved_trades() >= min_resolved
            && self.win_rate() >= min_win_rate
            && self.total_volume_usd >= min_volume_usd
    }

    pub fn is_vip(&self, min_volume_usd: f64, min_win_rate: f64, min_large_trades: u64) -> bool {
        self.total_volume_usd >= min_volume_usd
            || self.win_rate() >= min_win_rate
            || self.large_trades_count >= min_large_trades
    }
}

/// Per-market rolling trade-size stats snapshot returned by the stats store (§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketStatsSnapshot {
    pub mean: f64,
    pub std_dev: f64,
    pub n: u64,
}

/// A single contributing signal kind on a wallet edge (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSignal {
    SharedFunder,
    TimeCoupled,
    MarketOverlap,
}

/// A decayed, multi-signal edge between two wallets (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEdge {
    pub weight_total: f64,
    pub evidence: HashMap<EdgeSignal, f64>,
    pub evidence_count: HashMap<EdgeSignal, u32>,
    pub last_updated: DateTime<Utc>,
}

/// A materialized Union-Find component of ≥2 wallets (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub wallets: HashSet<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reason: String,
}

/// An immutable, emitted alert (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_types: Vec<AlertType>,
    pub severity: Severity,
    pub severity_score: u8,
    pub trade: Trade,
    pub wallet_profile_snapshot: WalletProfile,
    pub messages: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub percentile: Option<f64>,
    pub market_question: Option<String>,
    pub category: Category,
    pub is_sports: bool,
    pub z_score: Option<f64>,
    pub position_action: PositionAction,
}

/// One detector's raw contribution before consolidation (§4.6).
#[derive(Debug, Clone)]
pub struct Trigger {
    pub alert_type: AlertType,
    pub message: String,
    pub score: u8,
}

/// Connection-state machine for a single streaming venue (§4.8). Shared
/// between `venues` (which drives the transitions from inside its
/// reconnect loop) and `ingestion` (which surfaces it for health
/// introspection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
    Reconnecting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_buckets_match_spec_thresholds() {
        assert_eq!(Severity::from_score(1), Severity::Low);
        assert_eq!(Severity::from_score(3), Severity::Low);
        assert_eq!(Severity::from_score(4), Severity::Medium);
        assert_eq!(Severity::from_score(6), Severity::Medium);
        assert_eq!(Severity::from_score(7), Severity::High);
        assert_eq!(Severity::from_score(10), Severity::High);
    }

    #[test]
    fn wallet_profile_derived_booleans() {
        let now = Utc::now();
        let mut profile = WalletProfile::new("0xabc".into(), now);
        assert!(profile.is_new());
        profile.total_trades = 5;
        assert!(!profile.is_new());
        profile.total_volume_usd = 100_000.0;
        assert!(profile.is_whale(100_000.0));
    }

    #[test]
    fn velocity_from_ring_buffer() {
        let now = Utc::now();
        let mut profile = WalletProfile::new("0xabc".into(), now);
        for i in 0..11 {
            profile
                .recent_trade_times
                .push_back(now - chrono::Duration::minutes(i));
        }
        assert!(profile.is_repeat_actor(now));
        assert!(profile.is_heavy_actor(now));
    }
}
