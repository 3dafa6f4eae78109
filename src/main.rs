use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use baduk_arena_server::config::ServerConfig;
use baduk_arena_server::engine::{Collaborators, MatchEngine};
use baduk_arena_server::game::ai::AiOpponent;
use baduk_arena_server::game::match_result::StoneCountAnalyzer;
use baduk_arena_server::metrics::{self, Metrics};
use baduk_arena_server::net::transport::{Connections, WebTransportServer};
use baduk_arena_server::store::{FileStore, MemoryStore, Persistence};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Baduk Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("Invalid configuration: {}", e);
    }
    info!(
        "Configuration loaded: {}:{}, max_sessions={}",
        config.bind_address, config.port, config.max_sessions
    );

    let store: Arc<dyn Persistence> = match &config.data_dir {
        Some(dir) => Arc::new(FileStore::open(dir)?),
        None => {
            info!("DATA_DIR not set, sessions are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let connections = Arc::new(Connections::new());
    let engine = Arc::new(MatchEngine::new(
        &config,
        Collaborators {
            store,
            registry: connections.clone(),
            analyzer: Arc::new(StoneCountAnalyzer),
            ai: ai_opponent(),
            metrics: metrics.clone(),
        },
    ));

    let server =
        WebTransportServer::new(config.clone(), engine.clone(), connections, metrics).await?;

    info!("Server ready on https://{}", server.bind_addr());
    info!("Certificate hash: {}", server.cert_hash());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    // Flush pending writes before exit
    tokio::task::spawn_blocking(move || engine.shutdown()).await?;
    info!("Server stopped");

    Ok(())
}

#[cfg(feature = "ai_opponent")]
fn ai_opponent() -> Option<Arc<dyn AiOpponent>> {
    Some(Arc::new(baduk_arena_server::game::ai::RandomAi))
}

#[cfg(not(feature = "ai_opponent"))]
fn ai_opponent() -> Option<Arc<dyn AiOpponent>> {
    None
}
