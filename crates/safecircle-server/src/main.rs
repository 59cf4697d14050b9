mod error;
mod http;
mod metrics;
mod seed;
mod state;

use anyhow::Context;
use clap::{Parser, Subcommand};
use safecircle_core::{bearing_degrees, distance_meters, eta_minutes, Coordinate, CoreConfig};
use state::AppState;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "safecircle")]
#[command(about = "Campus emergency response: incidents, helpers and check-in escalation")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// HTTP server address
        #[arg(long, default_value = "127.0.0.1:8080")]
        http: String,
        /// Radius in meters for nearby-helper alerts
        #[arg(long)]
        alert_radius: Option<f64>,
        /// How often running check-ins are advanced (e.g., "1s")
        #[arg(long, default_value = "1s")]
        tick_interval: String,
        /// Start with no demo users or incidents
        #[arg(long)]
        no_seed: bool,
    },
    /// Print distance, bearing and walking ETA between two points
    Distance {
        /// Start point as "lat,lng"
        #[arg(long)]
        from: String,
        /// End point as "lat,lng"
        #[arg(long)]
        to: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Serve {
            http,
            alert_radius,
            tick_interval,
            no_seed,
        } => {
            let mut config = CoreConfig::default();
            if let Some(radius) = alert_radius {
                anyhow::ensure!(
                    radius.is_finite() && radius > 0.0,
                    "alert radius must be positive"
                );
                config.alert_radius_m = radius;
            }
            serve(config, http, tick_interval, !no_seed).await?;
        }
        Commands::Distance { from, to } => {
            let from = parse_point(&from).context("Invalid --from point (e.g., '37.7749,-122.4194')")?;
            let to = parse_point(&to).context("Invalid --to point (e.g., '37.7749,-122.4194')")?;
            let config = CoreConfig::default();
            let distance = distance_meters(&from, &to);
            println!("distance: {:.1} m", distance);
            println!("bearing:  {:.1}°", bearing_degrees(&from, &to));
            println!(
                "eta:      {} min",
                eta_minutes(distance, config.walking_speed_m_per_min)
            );
        }
    }

    Ok(())
}

async fn serve(
    config: CoreConfig,
    http_addr: String,
    tick_interval_str: String,
    seed_demo: bool,
) -> anyhow::Result<()> {
    info!("Starting SafeCircle");
    info!(
        "HTTP: {}, alert radius: {}m",
        http_addr, config.alert_radius_m
    );

    let tick_interval = parse_duration(&tick_interval_str)
        .context("Invalid tick interval format (e.g., '1s', '1m')")?;
    anyhow::ensure!(!tick_interval.is_zero(), "tick interval must be positive");

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;

    let state = AppState::new(config).with_metrics(metrics_handle);
    if seed_demo {
        seed::load(&state).context("Failed to load demo data")?;
    }

    // Check-in ticker
    let ticker_state = state.clone();
    let ticker_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            for incident in ticker_state.tick_checkins() {
                warn!(
                    "Auto-alert {} raised for {}",
                    incident.id, incident.victim
                );
            }
        }
    });

    let app = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", http_addr))?;
    info!("HTTP server listening on http://{}", http_addr);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = ticker_handle => {
            warn!("Check-in ticker task ended");
        }
        _ = server_handle => {
            warn!("HTTP server task ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}

fn parse_point(s: &str) -> anyhow::Result<Coordinate> {
    let (lat, lng) = s
        .split_once(',')
        .context("expected 'lat,lng'")?;
    let point = Coordinate::new(lat.trim().parse()?, lng.trim().parse()?)?;
    Ok(point)
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(ms.parse()?))
    } else if let Some(secs) = s.strip_suffix('s') {
        Ok(Duration::from_secs(secs.parse()?))
    } else if let Some(mins) = s.strip_suffix('m') {
        let secs = mins
            .parse::<u64>()?
            .checked_mul(60)
            .context("duration too large")?;
        Ok(Duration::from_secs(secs))
    } else {
        // Bare number means seconds
        Ok(Duration::from_secs(s.parse()?))
    }
}
