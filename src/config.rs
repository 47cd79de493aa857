//! Pipeline configuration (§6). Every threshold named in the external
//! interfaces section is a field here, loaded from the environment with
//! the donor's `unwrap_or_else` / `.parse().unwrap_or(default)` fallback
//! chains (`src/models.rs::Config::from_env` in the donor crate).

use std::collections::HashMap;
use std::time::Duration;

use crate::models::Category;

#[derive(Debug, Clone)]
pub struct Config {
    // Venue endpoints
    pub polymarket_base_url: String,
    pub polymarket_ws_url: String,
    pub kalshi_base_url: String,

    // Ingestion
    pub poll_interval: Duration,
    pub ws_reconnect_base_delay: Duration,
    pub ws_reconnect_max_delay: Duration,
    pub ws_max_reconnect_attempts: u32,
    pub dedup_set_cap: usize,
    pub dedup_set_trim_to: usize,

    // Wallet store
    pub max_inactive_days: i64,
    pub min_wallets_before_cleanup: usize,

    // Detector thresholds
    pub whale_threshold_usd: f64,
    pub new_wallet_threshold_usd: f64,
    pub focused_wallet_threshold_usd: f64,
    pub std_multiplier: f64,
    pub min_trades_for_stats: u64,
    pub exclude_sports: bool,
    pub extreme_confidence_high: f64,
    pub extreme_confidence_low: f64,
    pub exit_threshold_usd: f64,
    pub contrarian_threshold_usd: f64,
    pub contrarian_probability_ceiling: f64,
    pub cluster_time_window: Duration,
    pub cluster_min_amount_usd: f64,
    pub high_impact_ratio: f64,
    pub high_impact_min_amount_usd: f64,

    // Gated detectors (Open Question resolution: config booleans, not
    // Cargo feature flags)
    pub enable_whale_exit: bool,
    pub enable_contrarian: bool,
    pub enable_extreme_confidence: bool,
    pub enable_focused_wallet: bool,

    // Smart-money / VIP
    pub smart_money_min_volume_usd: f64,
    pub smart_money_min_win_rate: f64,
    pub smart_money_min_resolved: u64,
    pub vip_min_volume_usd: f64,
    pub vip_min_win_rate: f64,
    pub vip_min_large_trades: u64,
    pub vip_large_trade_threshold_usd: f64,
    pub whale_wallet_volume_usd: f64,

    // Alert consolidator
    pub min_alert_threshold_usd: f64,
    pub crypto_min_threshold_usd: f64,
    pub min_triggers_required: usize,
    pub exempt_alert_types: Vec<crate::models::AlertType>,
    pub crypto_exempt_alert_types: Vec<crate::models::AlertType>,

    // Cluster/entity engine
    pub coord_window: Duration,
    pub overlap_min_common_markets: usize,
    pub overlap_lookback: Duration,
    pub overlap_jaccard_threshold: f64,
    pub entity_edge_threshold: f64,
    pub edge_halflife: Duration,
    pub entity_rebuild_interval: Duration,
    pub market_scale_baseline_usd: f64,
    pub signal_saturation_k: f64,

    // Notification routing (sink-adapter concern; core only carries the map)
    pub category_thread_ids: HashMap<Category, String>,
}

impl Default for Config {
    fn default() -> Self {
        use crate::models::AlertType::*;
        Self {
            polymarket_base_url: "https://gamma-api.polymarket.com".to_string(),
            polymarket_ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws".to_string(),
            kalshi_base_url: "https://api.elections.kalshi.com/trade-api/v2".to_string(),

            poll_interval: Duration::from_secs(30),
            ws_reconnect_base_delay: Duration::from_secs(1),
            ws_reconnect_max_delay: Duration::from_secs(60),
            ws_max_reconnect_attempts: 10,
            dedup_set_cap: 100_000,
            dedup_set_trim_to: 50_000,

            max_inactive_days: 30,
            min_wallets_before_cleanup: 10_000,

            whale_threshold_usd: 10_000.0,
            new_wallet_threshold_usd: 1_000.0,
            focused_wallet_threshold_usd: 2_000.0,
            std_multiplier: 3.0,
            min_trades_for_stats: 100,
            exclude_sports: true,
            extreme_confidence_high: 0.95,
            extreme_confidence_low: 0.05,
            exit_threshold_usd: 5_000.0,
            contrarian_threshold_usd: 3_000.0,
            contrarian_probability_ceiling: 0.15,
            cluster_time_window: Duration::from_secs(300),
            cluster_min_amount_usd: 2_000.0,
            high_impact_ratio: 0.25,
            high_impact_min_amount_usd: 1_000.0,

            enable_whale_exit: false,
            enable_contrarian: false,
            enable_extreme_confidence: false,
            enable_focused_wallet: false,

            smart_money_min_volume_usd: 50_000.0,
            smart_money_min_win_rate: 0.65,
            smart_money_min_resolved: 10,
            vip_min_volume_usd: 250_000.0,
            vip_min_win_rate: 0.75,
            vip_min_large_trades: 20,
            vip_large_trade_threshold_usd: 10_000.0,
            whale_wallet_volume_usd: 100_000.0,

            min_alert_threshold_usd: 500.0,
            crypto_min_threshold_usd: 974.0,
            min_triggers_required: 2,
            exempt_alert_types: vec![WhaleTrade, ClusterActivity, VipWallet, EntityActivity],
            crypto_exempt_alert_types: vec![ClusterActivity, WhaleTrade, SmartMoney, VipWallet],

            coord_window: Duration::from_secs(300),
            overlap_min_common_markets: 3,
            overlap_lookback: Duration::from_secs(24 * 3600),
            overlap_jaccard_threshold: 0.35,
            entity_edge_threshold: 0.75,
            edge_halflife: Duration::from_secs(86_400),
            entity_rebuild_interval: Duration::from_secs(60),
            market_scale_baseline_usd: 50_000.0,
            signal_saturation_k: 0.55,

            category_thread_ids: HashMap::new(),
        }
    }
}

impl Config {
    /// Load overrides from the environment; falls back to `Config::default()`
    /// for anything unset or unparsable, matching the donor's
    /// `Config::from_env` idiom.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        let mut cfg = Self::default();

        macro_rules! env_f64 {
            ($var:literal, $field:ident) => {
                if let Ok(v) = std::env::var($var) {
                    if let Ok(parsed) = v.parse::<f64>() {
                        cfg.$field = parsed;
                    }
                }
            };
        }
        macro_rules! env_u64 {
            ($var:literal, $field:ident) => {
                if let Ok(v) = std::env::var($var) {
                    if let Ok(parsed) = v.parse() {
                        cfg.$field = parsed;
                    }
                }
            };
        }
        macro_rules! env_bool {
            ($var:literal, $field:ident) => {
                if let Ok(v) = std::env::var($var) {
                    if let Ok(parsed) = v.parse::<bool>() {
                        cfg.$field = parsed;
                    }
                }
            };
        }
        macro_rules! env_secs {
            ($var:literal, $field:ident) => {
                if let Ok(v) = std::env::var($var) {
                    if let Ok(parsed) = v.parse::<u64>() {
                        cfg.$field = Duration::from_secs(parsed);
                    }
                }
            };
        }

        if let Ok(v) = std::env::var("POLYMARKET_BASE_URL") {
            cfg.polymarket_base_url = v;
        }
        if let Ok(v) = std::env::var("POLYMARKET_WS_URL") {
            cfg.polymarket_ws_url = v;
        }
        if let Ok(v) = std::env::var("KALSHI_BASE_URL") {
            cfg.kalshi_base_url = v;
        }

        env_secs!("POLL_INTERVAL_SECS", poll_interval);
        env_u64!("WS_MAX_RECONNECT_ATTEMPTS", ws_max_reconnect_attempts);

        env_f64!("WHALE_THRESHOLD_USD", whale_threshold_usd);
        env_f64!("NEW_WALLET_THRESHOLD_USD", new_wallet_threshold_usd);
        env_f64!("FOCUSED_WALLET_THRESHOLD_USD", focused_wallet_threshold_usd);
        env_f64!("STD_MULTIPLIER", std_multiplier);
        env_u64!("MIN_TRADES_FOR_STATS", min_trades_for_stats);
        env_bool!("EXCLUDE_SPORTS", exclude_sports);
        env_f64!("EXTREME_CONFIDENCE_HIGH", extreme_confidence_high);
        env_f64!("EXTREME_CONFIDENCE_LOW", extreme_confidence_low);
        env_f64!("EXIT_THRESHOLD_USD", exit_threshold_usd);
        env_f64!("CONTRARIAN_THRESHOLD_USD", contrarian_threshold_usd);

        env_bool!("ENABLE_WHALE_EXIT", enable_whale_exit);
        env_bool!("ENABLE_CONTRARIAN", enable_contrarian);
        env_bool!("ENABLE_EXTREME_CONFIDENCE", enable_extreme_confidence);
        env_bool!("ENABLE_FOCUSED_WALLET", enable_focused_wallet);

        env_f64!("MIN_ALERT_THRESHOLD_USD", min_alert_threshold_usd);
        env_f64!("CRYPTO_MIN_THRESHOLD_USD", crypto_min_threshold_usd);
        if let Ok(v) = std::env::var("MIN_TRIGGERS_REQUIRED") {
            if let Ok(parsed) = v.parse() {
                cfg.min_triggers_required = parsed;
            }
        }

        env_f64!("ENTITY_EDGE_THRESHOLD", entity_edge_threshold);
        env_secs!("EDGE_HALFLIFE_SECONDS", edge_halflife);
        env_secs!("ENTITY_REBUILD_INTERVAL_SECS", entity_rebuild_interval);

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.whale_threshold_usd, 10_000.0);
        assert_eq!(cfg.min_triggers_required, 2);
        assert_eq!(cfg.entity_edge_threshold, 0.75);
        assert!(!cfg.enable_contrarian);
    }
}
