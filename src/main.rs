use anyhow::{Context, Result};
use axum::{extract::FromRef, Router};
use reqwest::Client;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{config::Settings, fetcher::CarFetcher, firestore::FirestoreStore, sessions::SessionStore};

mod auth_middleware;
mod config;
mod error;
mod fetcher;
mod filters;
mod firestore;
mod listing;
mod models;
mod routes;
mod sessions;

// How often idle listing sessions are swept
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// Shared application state handed to every handler
#[derive(Clone, FromRef)]
pub struct AppState {
    settings: Arc<Settings>,
    http_client: Arc<Client>,
    fetcher: Arc<dyn CarFetcher>,
    firestore: Arc<FirestoreStore>,
    sessions: SessionStore,
}

#[cfg(test)]
impl AppState {
    pub fn for_tests(fetcher: Arc<dyn CarFetcher>) -> Self {
        let settings = Arc::new(Settings::defaults().expect("default settings"));
        AppState {
            firestore: Arc::new(FirestoreStore::new(settings.clone())),
            sessions: SessionStore::new(Duration::from_secs(settings.session_ttl_secs)),
            settings,
            http_client: Arc::new(Client::new()),
            fetcher,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file first. Ignore errors (e.g., file not found)
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "carmarket=info,tower_http=info".into()))
        .with(fmt::layer())
        .init();

    tracing::info!("Initializing car marketplace listing service...");

    let settings = match Settings::new() {
        Ok(s) => {
            tracing::info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };
    if settings.firebase_project_id.is_none() {
        tracing::warn!("APP_FIREBASE_PROJECT_ID is not set; car queries and sign-in will fail.");
    }
    let settings = Arc::new(settings);

    let http_client = Arc::new(
        Client::builder()
            .build()
            .context("Failed to build shared reqwest client")?,
    );

    let firestore = Arc::new(FirestoreStore::new(settings.clone()));
    let sessions = SessionStore::new(Duration::from_secs(settings.session_ttl_secs));
    sessions.spawn_sweeper(SESSION_SWEEP_INTERVAL);

    let app_state = AppState {
        settings: settings.clone(),
        http_client,
        fetcher: firestore.clone(),
        firestore,
        sessions,
    };

    let app: Router = routes::create_router(app_state);

    let addr: SocketAddr = settings
        .server_address
        .parse()
        .with_context(|| format!("Invalid server address format: {}", settings.server_address))?;

    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => {
            tracing::info!("Server listening on {}", addr);
            l
        }
        Err(e) => {
            tracing::error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
