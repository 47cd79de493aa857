//! Polymarket venue adapter (§4.1, §6). Market metadata comes from the
//! public Gamma API; trades come from the public data-api activity feed
//! and the CLOB websocket. Price/string parsing quirks are grounded on
//! the donor's `scrapers/polymarket_gamma.rs` custom deserializers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::models::{Category, Market, Side, StreamState, Trade, Venue};

use super::VenueAdapter;

const DATA_API_BASE: &str = "https://data-api.polymarket.com";
const MAX_RETRIES: u32 = 5;

fn de_string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Array(arr) => Ok(arr
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()),
        Value::String(s) => serde_json::from_str::<Vec<String>>(&s).map_err(serde::de::Error::custom),
        _ => Ok(Vec::new()),
    }
}

fn de_string_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => s.parse::<f64>().map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GammaMarket {
    #[serde(default)]
    id: Option<String>,
    slug: String,
    #[serde(rename = "conditionId")]
    condition_id: String,
    #[serde(default)]
    question: Option<String>,
    #[serde(rename = "endDateIso", default)]
    end_date_iso: Option<String>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    volume: Option<f64>,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default, deserialize_with = "de_string_vec")]
    outcomes: Vec<String>,
    #[serde(rename = "outcomePrices", default, deserialize_with = "de_string_vec")]
    outcome_prices: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTrade {
    #[serde(rename = "proxyWallet")]
    proxy_wallet: String,
    side: String,
    size: f64,
    price: f64,
    timestamp: i64,
    #[serde(rename = "conditionId")]
    condition_id: String,
    outcome: String,
    #[serde(rename = "transactionHash", default)]
    transaction_hash: Option<String>,
}

#[derive(Debug, Serialize)]
struct WsSubscribe {
    action: &'static str,
    subscriptions: Vec<WsSubscription>,
}

#[derive(Debug, Serialize)]
struct WsSubscription {
    topic: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Builds a globally-unique trade id from the venue-native hash plus a
/// `+size` disambiguator (§4.1 idempotence formula), so two distinct
/// fills sharing one transaction hash (a partial fill split across
/// multiple trade records) don't collapse onto the same dedup id.
fn make_trade_id(tx_hash_or_condition: &str, size: f64) -> String {
    let prefix: String = tx_hash_or_condition.chars().take(16).collect();
    format!("polymarket_{prefix}+{size}")
}

pub struct PolymarketAdapter {
    http: reqwest::Client,
    gamma_base_url: String,
    ws_url: String,
    ws_reconnect_base_delay: Duration,
    ws_reconnect_max_delay: Duration,
    ws_max_reconnect_attempts: u32,
}

impl PolymarketAdapter {
    pub fn new(
        gamma_base_url: String,
        ws_url: String,
        ws_reconnect_base_delay: Duration,
        ws_reconnect_max_delay: Duration,
        ws_max_reconnect_attempts: u32,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            gamma_base_url,
            ws_url,
            ws_reconnect_base_delay,
            ws_reconnect_max_delay,
            ws_max_reconnect_attempts,
        })
    }

    async fn retry_get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, PipelineError> {
        let mut backoff = Duration::from_millis(100);
        for attempt in 1..=MAX_RETRIES {
            let result = self.http.get(url).query(query).send().await;
            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    warn!(attempt, "polymarket rate limited, backing off 60s");
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    warn!(attempt, status = %resp.status(), "polymarket server error, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(16));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(PipelineError::AdapterProtocol {
                        venue: "polymarket".to_string(),
                        message: format!("{status}: {body}"),
                    });
                }
                Err(e) => {
                    if attempt == MAX_RETRIES {
                        return Err(PipelineError::AdapterTransient { venue: "polymarket".to_string(), source: e.into() });
                    }
                    warn!(attempt, error = %e, "polymarket request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(16));
                }
            }
        }
        Err(PipelineError::AdapterTransient {
            venue: "polymarket".to_string(),
            source: anyhow::anyhow!("max retries exceeded"),
        })
    }

    fn to_market(&self, raw: GammaMarket) -> Option<Market> {
        let id = raw.id.unwrap_or_else(|| raw.condition_id.clone());
        let question = raw.question.unwrap_or_default();
        let category = crate::market_cache::infer_category(&question, &raw.slug);
        let end_time = raw
            .end_date_iso
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let mut outcome_prices = std::collections::HashMap::new();
        for (outcome, price) in raw.outcomes.iter().zip(raw.outcome_prices.iter()) {
            if let Ok(p) = price.parse::<f64>() {
                outcome_prices.insert(outcome.clone(), p);
            }
        }

        Some(Market {
            id,
            venue: Venue::Polymarket,
            question,
            slug: raw.slug,
            category,
            outcome_prices,
            volume: raw.volume.unwrap_or(0.0),
            end_time,
            active: raw.active.unwrap_or(true),
            url: None,
            is_sports: category == Category::Sports,
            is_high_frequency: false,
            updated_at: Utc::now(),
        })
    }

    fn to_trade(&self, raw: RawTrade) -> Option<Trade> {
        let side = match raw.side.to_uppercase().as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            _ => return None,
        };
        let amount_usd = raw.size * raw.price;
        let id = make_trade_id(raw.transaction_hash.as_deref().unwrap_or(&raw.condition_id), raw.size);
        Some(Trade {
            id,
            venue: Venue::Polymarket,
            market_id: raw.condition_id,
            trader_id: raw.proxy_wallet.to_lowercase(),
            trader_identity_known: true,
            outcome: raw.outcome,
            side,
            size: raw.size,
            price: raw.price,
            amount_usd,
            timestamp: Utc.timestamp_opt(raw.timestamp, 0).single().unwrap_or_else(Utc::now),
            tx_hash: raw.transaction_hash,
        })
    }
}

#[async_trait]
impl VenueAdapter for PolymarketAdapter {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    fn supports_trader_identity(&self) -> bool {
        true
    }

    async fn list_active_markets(&self, limit: usize) -> Result<Vec<Market>, PipelineError> {
        let limit = limit.min(200);
        let url = format!("{}/markets", self.gamma_base_url);
        let resp = self
            .retry_get(&url, &[("active", "true".to_string()), ("limit", limit.to_string())])
            .await?;
        let body = resp.text().await.map_err(|e| PipelineError::AdapterTransient {
            venue: "polymarket".to_string(),
            source: e.into(),
        })?;
        let raw: Vec<GammaMarket> = serde_json::from_str(&body).map_err(|e| PipelineError::AdapterProtocol {
            venue: "polymarket".to_string(),
            message: e.to_string(),
        })?;
        Ok(raw.into_iter().filter_map(|m| self.to_market(m)).collect())
    }

    async fn recent_trades(&self, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<Trade>, PipelineError> {
        let url = format!("{DATA_API_BASE}/trades");
        let mut query = vec![("limit", limit.to_string())];
        if let Some(since) = since {
            query.push(("after", since.timestamp().to_string()));
        }
        let resp = self.retry_get(&url, &query).await?;
        let body = resp.text().await.map_err(|e| PipelineError::AdapterTransient {
            venue: "polymarket".to_string(),
            source: e.into(),
        })?;
        let raw: Vec<RawTrade> = serde_json::from_str(&body).unwrap_or_else(|e| {
            warn!(error = %e, "polymarket trades parse failed, skipping batch item-by-item not possible from a bare array; returning empty");
            Vec::new()
        });
        Ok(raw.into_iter().filter_map(|t| self.to_trade(t)).collect())
    }

    async fn stream_trades(&self) -> Option<(mpsc::UnboundedReceiver<Trade>, mpsc::UnboundedReceiver<StreamState>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let ws_url = self.ws_url.clone();
        let base_delay = self.ws_reconnect_base_delay;
        let max_delay = self.ws_reconnect_max_delay;
        let max_attempts = self.ws_max_reconnect_attempts;
        tokio::spawn(async move {
            run_stream(ws_url, tx, state_tx, base_delay, max_delay, max_attempts).await;
        });
        Some((rx, state_rx))
    }
}

/// Long-lived websocket reader with exponential reconnect, grounded on
/// the donor's `scrapers/dome_websocket.rs::run()` loop. Reconnect is
/// bounded by `max_attempts` (§4.8, §7 `StreamDisconnect`): once
/// exhausted the loop reports `Disconnected` and gives up, leaving
/// polling as the sole remaining source for this venue.
async fn run_stream(
    ws_url: String,
    tx: mpsc::UnboundedSender<Trade>,
    state_tx: mpsc::UnboundedSender<StreamState>,
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
) {
    let mut backoff = base_delay;
    let mut attempts: u32 = 0;
    loop {
        match connect_and_stream(&ws_url, &tx).await {
            Ok(()) => {
                info!("polymarket stream closed gracefully, reconnecting");
                attempts = 0;
                backoff = base_delay;
            }
            Err(e) => {
                attempts += 1;
                if attempts > max_attempts {
                    warn!(error = %e, attempts, "polymarket stream exhausted reconnect attempts, giving up");
                    let _ = state_tx.send(StreamState::Disconnected);
                    return;
                }
                warn!(error = %e, attempt = attempts, max_attempts, delay = ?backoff, "polymarket stream error, reconnecting");
            }
        }
        if tx.is_closed() {
            return;
        }
        let _ = state_tx.send(StreamState::Reconnecting);
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_delay);
    }
}

async fn connect_and_stream(ws_url: &str, tx: &mpsc::UnboundedSender<Trade>) -> anyhow::Result<()> {
    use futures_util::{SinkExt, StreamExt};

    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url).await?;
    let subscribe = WsSubscribe {
        action: "subscribe",
        subscriptions: vec![WsSubscription { topic: "activity", kind: "trades" }],
    };
    socket.send(Message::Text(serde_json::to_string(&subscribe)?)).await?;

    while let Some(msg) = socket.next().await {
        match msg? {
            Message::Text(text) => {
                if let Some(trade) = parse_ws_trade_message(&text) {
                    let _ = tx.send(trade);
                }
            }
            Message::Ping(payload) => {
                socket.send(Message::Pong(payload)).await?;
            }
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }
    Ok(())
}

fn parse_ws_trade_message(text: &str) -> Option<Trade> {
    let value: Value = serde_json::from_str(text).ok()?;
    let msg_type = value.get("type").and_then(Value::as_str).unwrap_or("");
    let topic = value.get("topic").and_then(Value::as_str).unwrap_or("");
    if msg_type != "trades" && msg_type != "trade" && !topic.contains("trade") {
        debug!(%msg_type, %topic, "ignoring non-trade ws message");
        return None;
    }
    let raw: RawTrade = serde_json::from_value(value.get("payload").cloned().unwrap_or(value)).ok()?;
    let side = match raw.side.to_uppercase().as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        _ => return None,
    };
    Some(Trade {
        id: make_trade_id(raw.transaction_hash.as_deref().unwrap_or_default(), raw.size),
        venue: Venue::Polymarket,
        market_id: raw.condition_id.clone(),
        trader_id: raw.proxy_wallet.to_lowercase(),
        trader_identity_known: true,
        outcome: raw.outcome.clone(),
        side,
        size: raw.size,
        price: raw.price,
        amount_usd: raw.size * raw.price,
        timestamp: Utc.timestamp_opt(raw.timestamp, 0).single().unwrap_or_else(Utc::now),
        tx_hash: raw.transaction_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_message_serialization_matches_protocol() {
        let subscribe = WsSubscribe {
            action: "subscribe",
            subscriptions: vec![WsSubscription { topic: "activity", kind: "trades" }],
        };
        let json = serde_json::to_string(&subscribe).unwrap();
        assert!(json.contains("\"action\":\"subscribe\""));
        assert!(json.contains("\"topic\":\"activity\""));
    }

    #[test]
    fn trade_id_disambiguates_same_hash_partial_fills() {
        let a = make_trade_id("0xdeadbeef", 10.0);
        let b = make_trade_id("0xdeadbeef", 25.0);
        assert_ne!(a, b, "two distinct fills on the same tx hash must not collapse onto one dedup id");
    }

    #[test]
    fn de_string_f64_opt_handles_numeric_and_string_and_empty() {
        #[derive(Deserialize)]
        struct Wrap(#[serde(deserialize_with = "de_string_f64_opt")] Option<f64>);
        let a: Wrap = serde_json::from_str("123.5").unwrap();
        assert_eq!(a.0, Some(123.5));
        let b: Wrap = serde_json::from_str("\"45.0\"").unwrap();
        assert_eq!(b.0, Some(45.0));
        let c: Wrap = serde_json::from_str("\"\"").unwrap();
        assert_eq!(c.0, None);
    }
}
