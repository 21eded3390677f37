use econnectone::services::bootstrap::ensure_admin;
use econnectone::{api, config::Config, db::init_db, Repository};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    if let Err(e) = repo.seed_risk_limits(&config.default_limits).await {
        eprintln!("Failed to seed risk limits: {}", e);
        std::process::exit(1);
    }
    if let Some(admin) = &config.bootstrap_admin {
        if let Err(e) = ensure_admin(&repo, admin).await {
            eprintln!("Failed to create bootstrap admin: {}", e);
            std::process::exit(1);
        }
    }

    let addr = SocketAddr::new(config.bind_addr, config.port);
    let app = api::create_router(api::AppState::new(repo, config));

    // Bind to address
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
