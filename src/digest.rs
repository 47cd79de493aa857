//! Digest Compiler core hooks (§4.9). Interface only: pure aggregation
//! primitives over already-emitted alerts. Scheduling, storage, and
//! delivery are out-of-scope external collaborators (§1, §6); this
//! module exists purely so those collaborators have something pure and
//! testable to call.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{Alert, AlertType, Category, Severity};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DigestSummary {
    pub total_alerts: usize,
    pub by_alert_type: HashMap<AlertType, usize>,
    pub by_category: HashMap<Category, usize>,
    pub by_severity: HashMap<Severity, usize>,
    pub top_wallets_by_alert_count: Vec<(String, usize)>,
}

/// Aggregates `alerts` with `timestamp >= since` into a `DigestSummary`.
pub fn digest_window(alerts: &[Alert], since: DateTime<Utc>) -> DigestSummary {
    let mut summary = DigestSummary::default();
    let mut wallet_counts: HashMap<String, usize> = HashMap::new();

    for alert in alerts.iter().filter(|a| a.timestamp >= since) {
        summary.total_alerts += 1;
        for t in &alert.alert_types {
            *summary.by_alert_type.entry(*t).or_insert(0) += 1;
        }
        *summary.by_category.entry(alert.category).or_insert(0) += 1;
        *summary.by_severity.entry(alert.severity).or_insert(0) += 1;
        *wallet_counts.entry(alert.trade.trader_id.clone()).or_insert(0) += 1;
    }

    let mut top: Vec<(String, usize)> = wallet_counts.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(10);
    summary.top_wallets_by_alert_count = top;

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionAction, Side, Trade, Venue, WalletProfile};

    fn alert(trader: &str, ts: DateTime<Utc>, alert_type: AlertType, category: Category) -> Alert {
        let trade = Trade {
            id: "t1".to_string(),
            venue: Venue::Polymarket,
            market_id: "m1".to_string(),
            trader_id: trader.to_string(),
            trader_identity_known: true,
            outcome: "Yes".to_string(),
            side: Side::Buy,
            size: 1.0,
            price: 0.5,
            amount_usd: 500.0,
            timestamp: ts,
            tx_hash: None,
        };
        Alert {
            id: "a1".to_string(),
            alert_types: vec![alert_type],
            severity: Severity::Medium,
            severity_score: 5,
            trade: trade.clone(),
            wallet_profile_snapshot: WalletProfile::new(trader.to_string(), ts),
            messages: vec!["x".to_string()],
            timestamp: ts,
            percentile: None,
            market_question: None,
            category,
            is_sports: false,
            z_score: None,
            position_action: PositionAction::Opening,
        }
    }

    #[test]
    fn digest_window_excludes_alerts_before_since() {
        let now = Utc::now();
        let alerts = vec![
            alert("0xabc", now - chrono::Duration::hours(2), AlertType::WhaleTrade, Category::Politics),
            alert("0xabc", now, AlertType::WhaleTrade, Category::Politics),
        ];
        let summary = digest_window(&alerts, now - chrono::Duration::hours(1));
        assert_eq!(summary.total_alerts, 1);
    }

    #[test]
    fn top_wallets_ranked_by_alert_count() {
        let now = Utc::now();
        let alerts = vec![
            alert("0xa", now, AlertType::WhaleTrade, Category::Politics),
            alert("0xa", now, AlertType::WhaleTrade, Category::Politics),
            alert("0xb", now, AlertType::WhaleTrade, Category::Politics),
        ];
        let summary = digest_window(&alerts, now - chrono::Duration::hours(1));
        assert_eq!(summary.top_wallets_by_alert_count[0], ("0xa".to_string(), 2));
    }
}
