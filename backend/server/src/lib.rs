//! Web front-end for the Trails hiking-route catalog.
//!
//! # General Infrastructure
//! - Browser talks to this server only
//! - Trail metadata lives in the Trails API, reached with the URL stored in the vault
//! - GPX tracks and pictures live in blob storage, reached with the connection string stored in the vault
//! - Nothing is persisted here, every page is built from a fresh API call
//!
//!
//!
//! # Routes
//!
//! Mirrors the `{controller=Trails}/{action=Index}/{id?}` convention, under both `/Trails` and `/trails`.
//!
//! | Route | Verb | Action |
//! |---|---|---|
//! | `/`, `/Trails`, `/Trails/Index` | GET | list |
//! | `/Trails/Details/{id}` | GET | detail page |
//! | `/Trails/Create` | GET, POST | form, then upload + create |
//! | `/Trails/Edit/{id}`, `/Trails/Edit` | GET, POST | form, then upload + update |
//! | `/Trails/Delete/{id}`, `/Trails/Delete` | GET, POST | confirmation, then delete + blob cleanup |
//! | `/Trails/Error` | GET | error page |
//! | `/static/*` | GET | static assets |
//!
//! `id` may also be passed as `?id=`.
//!
//!
//!
//! # Preventing Forged Posts
//!
//! Every rendered form embeds an HMAC signed timestamp, see [`csrf`]. POSTs without a valid,
//! unexpired token are rejected with 400 before anything reaches the API or blob storage.
//!
//!
//!
//! # Setup
//!
//! Secrets, one file each under `SECRETS_DIR` or one secret each in the Key Vault at `VAULT_URL`:
//! - `trailsapiurl`: required
//! - `trails-blob-connectionString`: optional, uploads are ignored without it
//! - `trails-csrf-key`: optional, a per-process key is generated without it
//!
//! Run locally.
//! ```sh
//! mkdir -p secrets && echo http://localhost:5000/api > secrets/trailsapiurl
//! SECRETS_DIR=secrets RUST_ENV=development RUST_LOG=info cargo run -p trails
//! ```
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header::STRICT_TRANSPORT_SECURITY},
    routing::get,
};
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::{net::TcpListener, signal::ctrl_c};
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod csrf;
pub mod error;
pub mod form;
pub mod routes;
pub mod state;
pub mod views;

use config::Config;
use routes::{
    create_form_handler, create_handler, delete_form_handler, delete_form_query_handler,
    delete_handler, details_handler, details_query_handler, edit_form_handler,
    edit_form_query_handler, edit_handler, error_handler, index_handler,
};
use state::AppState;

const HSTS: &str = "max-age=2592000";

fn trail_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index_handler))
        .route("/Index", get(index_handler))
        .route("/Details", get(details_query_handler))
        .route("/Details/{id}", get(details_handler))
        .route("/Create", get(create_form_handler).post(create_handler))
        .route("/Edit", get(edit_form_query_handler).post(edit_handler))
        .route("/Edit/{id}", get(edit_form_handler).post(edit_handler))
        .route("/Delete", get(delete_form_query_handler).post(delete_handler))
        .route("/Delete/{id}", get(delete_form_handler).post(delete_handler))
        .route("/Error", get(error_handler))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let hsts = (!state.config.is_development()).then(|| HeaderValue::from_static(HSTS));

    Router::new()
        .route("/", get(index_handler))
        .nest("/Trails", trail_routes())
        .nest("/trails", trail_routes())
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(SetResponseHeaderLayer::if_not_present(
            STRICT_TRANSPORT_SECURITY,
            hsts,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    info!("Starting server...");
    let app = build_router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
