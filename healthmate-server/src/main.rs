use clap::Parser;
use healthmate_core::HealthmateConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use healthmate_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "healthmate.toml")]
    config: String,

    /// Check the store connection and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (GROQ_API_KEY, HEALTHMATE__DATABASE__URL, ...)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match HealthmateConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        if config.database.backend != "postgres" {
            println!("✅ Store backend '{}' needs no connection", config.database.backend);
            return Ok(());
        }
        let pool = match healthmate_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        };
        match healthmate_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL health check failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Healthmate health check passed");
        return Ok(());
    }

    let state = match HttpState::from_config(&config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start Healthmate: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        store = state.store.name(),
        model = state.completion.model(),
        documents = %config.documents.dir,
        "Healthmate starting"
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, &config.http, tx.subscribe()).await?;

    Ok(())
}
