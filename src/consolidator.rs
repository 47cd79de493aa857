//! Alert Consolidator (§4.7). Structurally grounded on the donor's
//! `signals/correlator.rs::SignalCorrelator` — gather heterogeneous
//! signals, apply a weighted/gated merge, produce one composite output —
//! though the domain logic (per-trade trigger consolidation vs.
//! whale/arbitrage correlation across stored signals) differs entirely.
//!
//! Pure: never emits to a sink. The caller (ingestion controller) is
//! responsible for forwarding the returned `Alert`.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::models::{Alert, Category, PositionAction, Severity, Trade, Trigger, WalletProfile};

pub struct ConsolidationContext<'a> {
    pub wallet_snapshot: &'a WalletProfile,
    pub category: Category,
    pub position_action: PositionAction,
    pub percentile: Option<f64>,
    pub market_question: Option<String>,
    pub z_score: Option<f64>,
    pub now: DateTime<Utc>,
}

pub fn consolidate(trade: &Trade, triggers: &[Trigger], ctx: &ConsolidationContext, cfg: &Config) -> Option<Alert> {
    // Filter: survives if exempt, or amount clears the flat threshold.
    let survivors: Vec<&Trigger> = triggers
        .iter()
        .filter(|t| cfg.exempt_alert_types.contains(&t.alert_type) || trade.amount_usd >= cfg.min_alert_threshold_usd)
        .collect();

    if survivors.is_empty() {
        return None;
    }

    let has_exempt_survivor = survivors.iter().any(|t| cfg.exempt_alert_types.contains(&t.alert_type));

    // Multi-signal gate: unless an exempt trigger survived, require
    // at least `min_triggers_required` surviving triggers.
    if !has_exempt_survivor && survivors.len() < cfg.min_triggers_required {
        return None;
    }

    // Category gate: Crypto markets need either a crypto-exempt trigger,
    // or the trade to clear the (higher) crypto-specific threshold.
    if ctx.category == Category::Crypto {
        let has_crypto_exempt = survivors.iter().any(|t| cfg.crypto_exempt_alert_types.contains(&t.alert_type));
        if !has_crypto_exempt && trade.amount_usd < cfg.crypto_min_threshold_usd {
            return None;
        }
    }

    let severity_score = survivors.iter().map(|t| t.score).max().unwrap_or(1);
    let severity = Severity::from_score(severity_score);
    let alert_types = survivors.iter().map(|t| t.alert_type).collect();
    let messages = survivors.iter().map(|t| t.message.clone()).collect();

    Some(Alert {
        id: uuid::Uuid::new_v4().to_string(),
        alert_types,
        severity,
        severity_score,
        trade: trade.clone(),
        wallet_profile_snapshot: ctx.wallet_snapshot.clone(),
        messages,
        timestamp: ctx.now,
        percentile: ctx.percentile,
        market_question: ctx.market_question.clone(),
        category: ctx.category,
        is_sports: ctx.category == Category::Sports,
        z_score: ctx.z_score,
        position_action: ctx.position_action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertType, Venue};

    fn trade(amount: f64) -> Trade {
        Trade {
            id: "t1".to_string(),
            venue: Venue::Polymarket,
            market_id: "m1".to_string(),
            trader_id: "0xabc".to_string(),
            trader_identity_known: true,
            outcome: "Yes".to_string(),
            side: crate::models::Side::Buy,
            size: amount,
            price: 0.5,
            amount_usd: amount,
            timestamp: Utc::now(),
            tx_hash: None,
        }
    }

    fn base_ctx<'a>(wallet: &'a WalletProfile, now: DateTime<Utc>) -> ConsolidationContext<'a> {
        ConsolidationContext {
            wallet_snapshot: wallet,
            category: Category::Politics,
            position_action: PositionAction::Opening,
            percentile: None,
            market_question: None,
            z_score: None,
            now,
        }
    }

    #[test]
    fn single_non_exempt_trigger_is_suppressed() {
        let now = Utc::now();
        let wallet = WalletProfile::new("0xabc".into(), now);
        let cfg = Config::default();
        let t = trade(1_500.0);
        let triggers = vec![Trigger { alert_type: AlertType::HeavyActor, message: "x".into(), score: 6 }];
        let ctx = base_ctx(&wallet, now);
        assert!(consolidate(&t, &triggers, &ctx, &cfg).is_none());
    }

    #[test]
    fn single_exempt_trigger_survives_alone() {
        let now = Utc::now();
        let wallet = WalletProfile::new("0xabc".into(), now);
        let cfg = Config::default();
        let t = trade(25_000.0);
        let triggers = vec![Trigger { alert_type: AlertType::WhaleTrade, message: "x".into(), score: 8 }];
        let ctx = base_ctx(&wallet, now);
        let alert = consolidate(&t, &triggers, &ctx, &cfg).unwrap();
        assert_eq!(alert.severity_score, 8);
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn severity_score_is_max_of_triggers() {
        let now = Utc::now();
        let wallet = WalletProfile::new("0xabc".into(), now);
        let cfg = Config::default();
        let t = trade(25_000.0);
        let triggers = vec![
            Trigger { alert_type: AlertType::WhaleTrade, message: "x".into(), score: 6 },
            Trigger { alert_type: AlertType::NewWallet, message: "y".into(), score: 9 },
        ];
        let ctx = base_ctx(&wallet, now);
        let alert = consolidate(&t, &triggers, &ctx, &cfg).unwrap();
        assert_eq!(alert.severity_score, 9);
    }

    #[test]
    fn crypto_gate_suppresses_below_threshold_without_crypto_exempt_trigger() {
        let now = Utc::now();
        let wallet = WalletProfile::new("0xabc".into(), now);
        let cfg = Config::default();
        let t = trade(500.0);
        let triggers = vec![
            Trigger { alert_type: AlertType::HeavyActor, message: "x".into(), score: 6 },
            Trigger { alert_type: AlertType::RepeatActor, message: "y".into(), score: 6 },
        ];
        let mut ctx = base_ctx(&wallet, now);
        ctx.category = Category::Crypto;
        assert!(consolidate(&t, &triggers, &ctx, &cfg).is_none());
    }

    #[test]
    fn politics_trade_with_only_heavy_actor_suppressed_by_multisignal_gate() {
        let now = Utc::now();
        let wallet = WalletProfile::new("0xabc".into(), now);
        let cfg = Config::default();
        let t = trade(1_500.0);
        let triggers = vec![Trigger { alert_type: AlertType::HeavyActor, message: "x".into(), score: 6 }];
        let ctx = base_ctx(&wallet, now);
        assert!(consolidate(&t, &triggers, &ctx, &cfg).is_none());
    }
}
