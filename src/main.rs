// =============================================================================
// quote-stream — Main Entry Point
// =============================================================================
//
// Connects to the configured quote feed (or the mock feed), subscribes to the
// configured symbols and logs a quote board until Ctrl+C.
// =============================================================================

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quote_stream::{QuoteConfig, QuoteProvider, StaticTokenAuth, WsConnector};

const CONFIG_PATH: &str = "quote_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("quote-stream starting up");

    let config_path = std::env::var("QUOTE_CONFIG").unwrap_or_else(|_| CONFIG_PATH.to_string());
    let mut config = match QuoteConfig::load(&config_path) {
        Ok(config) => config,
        Err(_) if !std::path::Path::new(&config_path).exists() => {
            // First run: leave a template behind for the operator to edit.
            let config = QuoteConfig::default();
            if let Err(e) = config.save(&config_path) {
                warn!(error = %e, path = %config_path, "Failed to write default config");
            }
            config
        }
        Err(e) => {
            warn!(error = %e, path = %config_path, "Failed to load config, using defaults");
            QuoteConfig::default()
        }
    };
    config.apply_env_overrides();

    let symbols = config.symbols.clone();
    let board_interval = config.mock_tick_interval().max(std::time::Duration::from_secs(5));

    info!(
        mock = config.mock_mode,
        stream = %config.default_stream_type,
        url = %config.stream_url,
        symbols = ?symbols,
        "Configuration loaded"
    );

    // ── 2. Provider ──────────────────────────────────────────────────────
    let auth = Arc::new(StaticTokenAuth::from_env("QUOTE_ACCESS_TOKEN"));
    let provider = QuoteProvider::new(config, auth, Arc::new(WsConnector));
    provider.start();

    let _subscription = provider.subscribe_symbols(symbols.as_slice());

    // ── 3. Quote board ───────────────────────────────────────────────────
    let mut status = provider.status_changes();
    let mut board = tokio::time::interval(board_interval);
    let mut executions = provider.executions();

    info!("Streaming quotes. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Shutdown signal received — stopping gracefully");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    error!("status channel closed");
                    break;
                }
                let view = provider.stream_view();
                info!(stream = %view.stream_type, status = %view.status, "connection status changed");
            }
            execution = executions.recv() => {
                if let Ok(execution) = execution {
                    info!(execution = %execution, "execution");
                }
            }
            _ = board.tick() => {
                for symbol in &symbols {
                    match provider.get_quote(symbol) {
                        Some(q) => info!(
                            symbol = %q.symbol,
                            bid = q.bid,
                            ask = q.ask,
                            last = q.last,
                            change_pct = format!("{:+.3}", q.change_percent),
                            spread_bps = format!("{:.1}", q.spread_bps()),
                            "quote"
                        ),
                        None => info!(symbol = %symbol, "no quote yet"),
                    }
                }
            }
        }
    }

    provider.shutdown();
    info!("quote-stream shut down complete.");
    Ok(())
}
