//! MaiQueue Back binary entrypoint wiring REST, SSE, storage and the game watchdog.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maiqueue_back::{
    config::{AppConfig, StorageBackend},
    dao::entity_store::memory::InMemoryEntityStore,
    routes,
    services::watchdog,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config.clone());

    match config.storage {
        StorageBackend::Memory => {
            info!(branches = config.branches.len(), "using in-memory storage");
            app_state
                .set_store(Arc::new(InMemoryEntityStore::with_branches(
                    config.branches.clone(),
                )))
                .await;
        }
        StorageBackend::Mongo => spawn_mongo_supervisor(app_state.clone(), &config)?,
    }

    tokio::spawn(watchdog::run(app_state.clone()));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Keep a MongoDB store connected in the background, seeding the configured branches on every
/// fresh connection.
#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: SharedState, config: &AppConfig) -> anyhow::Result<()> {
    use maiqueue_back::{
        dao::{
            entity_store::{
                EntityStore,
                mongodb::{MongoConfig, MongoEntityStore},
            },
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    let uri = config.mongo_uri.clone();
    let db_name = config.mongo_db.clone();
    let branches = config.branches.clone();
    info!(database = db_name.as_deref().unwrap_or("maiqueue"), "using MongoDB storage");

    tokio::spawn(storage_supervisor::run(state, move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        let branches = branches.clone();
        async move {
            let mongo_config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
            let store = MongoEntityStore::connect(mongo_config).await?;
            store.seed_branches(&branches).await?;
            Ok::<_, StorageError>(Arc::new(store) as Arc<dyn EntityStore>)
        }
    }));
    Ok(())
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_mongo_supervisor(_state: SharedState, _config: &AppConfig) -> anyhow::Result<()> {
    anyhow::bail!("storage backend `mongo` requires the `mongo-store` feature")
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
