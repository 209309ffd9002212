use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use rxcheckout::config::Config;
use rxcheckout::db::{self, AppState, queries};

const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Parser)]
#[command(name = "rxcheckout", version, about = "Checkout, intake hand-off and payment fan-out server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Delete expired intake submissions, idle sessions and old event ids, then exit
    Purge,
}

fn purge(state: &AppState) {
    let result = state
        .db
        .get()
        .map_err(rxcheckout::error::AppError::from)
        .and_then(|conn| queries::purge_expired(&conn, queries::now()));
    match result {
        Ok(stats) => {
            if stats.intake_submissions + stats.checkout_sessions + stats.processed_events > 0 {
                tracing::info!(
                    intake_submissions = stats.intake_submissions,
                    checkout_sessions = stats.checkout_sessions,
                    processed_events = stats.processed_events,
                    "Purged expired records"
                );
            }
        }
        Err(e) => tracing::error!("Purge failed: {}", e),
    }
    state.limiter.shrink();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rxcheckout=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let addr = config.addr();

    let pool = db::create_pool(&config.database_path)?;
    {
        let conn = pool.get()?;
        db::init_db(&conn)?;
    }

    if config.dev_mode {
        tracing::warn!("Running in dev mode");
    }

    let state = rxcheckout::build_state(config, pool)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Purge => {
            purge(&state);
            Ok(())
        }
        Command::Serve => {
            let purge_state = state.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PURGE_INTERVAL);
                loop {
                    interval.tick().await;
                    purge(&purge_state);
                }
            });

            let app = rxcheckout::app(state);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!("rxcheckout listening on {}", addr);
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
            Ok(())
        }
    }
}
