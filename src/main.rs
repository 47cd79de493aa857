//! Whale-activity detection pipeline binary. Wires venue adapters, the
//! core pipeline and the ingestion controller together; HTTP surface,
//! notification channels and durable storage are out of scope and left
//! to whatever deployment wraps this binary.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whalewatch_core::config::Config;
use whalewatch_core::ingestion::IngestionController;
use whalewatch_core::pipeline::Pipeline;
use whalewatch_core::sinks::{AlertSink, InMemoryAlertStore, NoopAlertSink};
use whalewatch_core::venues::kalshi::KalshiAdapter;
use whalewatch_core::venues::polymarket::PolymarketAdapter;
use whalewatch_core::venues::VenueAdapter;

#[derive(Parser, Debug)]
#[command(name = "whalewatch", about = "Real-time whale-activity detection pipeline")]
struct Cli {
    /// Skip the Polymarket adapter entirely.
    #[arg(long, env = "WHALEWATCH_DISABLE_POLYMARKET")]
    disable_polymarket: bool,

    /// Skip the Kalshi adapter entirely.
    #[arg(long, env = "WHALEWATCH_DISABLE_KALSHI")]
    disable_kalshi: bool,

    /// Seed active markets from each adapter before ingestion starts.
    #[arg(long, default_value_t = 500)]
    seed_markets_limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    if let Err(e) = PrometheusBuilder::new().install() {
        error!(error = %e, "failed to install prometheus metrics recorder, continuing without it");
    }

    let cli = Cli::parse();
    let cfg = Arc::new(Config::from_env()?);

    let mut adapters: Vec<Arc<dyn VenueAdapter>> = Vec::new();
    if !cli.disable_polymarket {
        let adapter = PolymarketAdapter::new(
            cfg.polymarket_base_url.clone(),
            cfg.polymarket_ws_url.clone(),
            cfg.ws_reconnect_base_delay,
            cfg.ws_reconnect_max_delay,
            cfg.ws_max_reconnect_attempts,
        )?;
        adapters.push(Arc::new(adapter));
    }
    if !cli.disable_kalshi {
        let adapter = KalshiAdapter::new(cfg.kalshi_base_url.clone())?;
        adapters.push(Arc::new(adapter));
    }

    let alert_store = Arc::new(InMemoryAlertStore::new());
    let pipeline = Arc::new(Pipeline::new(cfg.clone(), None, Some(alert_store.clone())));

    for adapter in &adapters {
        match adapter.list_active_markets(cli.seed_markets_limit).await {
            Ok(markets) => {
                let count = markets.len();
                for market in markets {
                    pipeline.upsert_market(market);
                }
                info!(venue = adapter.venue().as_str(), count, "seeded active markets");
            }
            Err(e) => error!(venue = adapter.venue().as_str(), error = %e, "failed to seed active markets"),
        }
    }

    let sink = Arc::new(NoopAlertSink);
    let controller = IngestionController::new(adapters, cfg);
    let health = controller.health();

    controller
        .run(pipeline, move |alert| {
            info!(
                alert_id = %alert.id,
                severity = ?alert.severity,
                wallet = %alert.trade.trader_id,
                amount = alert.trade.amount_usd,
                alert_types = ?alert.alert_types,
                "alert emitted"
            );
            let sink = sink.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.emit(&alert).await {
                    error!(error = %e, "alert sink emit failed");
                }
            });
        })
        .await;

    let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(300));
    loop {
        heartbeat.tick().await;
        info!(
            ws_trades = health.ws_trades_total.load(std::sync::atomic::Ordering::Relaxed),
            poll_trades = health.poll_trades_total.load(std::sync::atomic::Ordering::Relaxed),
            alerts = health.alerts_total.load(std::sync::atomic::Ordering::Relaxed),
            stream_connected = health.stream_connected.load(std::sync::atomic::Ordering::Relaxed),
            "ingestion heartbeat"
        );
    }
}

/// Initialize tracing, mirroring the donor's env-filter + fmt layer setup.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "whalewatch_core=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv::dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let fallback = manifest_dir.join(".env");
    if fallback.exists() {
        let _ = dotenv::from_path(&fallback);
    }
}
