use songbox::auth::JwtVerifier;
use songbox::config::Config;
use songbox::db::Database;
use songbox::library::Library;
use songbox::media_store::LocalMediaStore;
use songbox::server::{create_router, AppState};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    if let Err(e) = run().await {
        error!("songbox failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    let database = Database::new(&config.database_path).await?;
    let media = Arc::new(LocalMediaStore::new(&config.upload_dir));
    let verifier = Arc::new(JwtVerifier::new(config.jwt_secret.as_bytes()));

    let bind_addr = config.bind_addr;
    let state = AppState::new(Library::new(database, media), verifier, config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Music API listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
