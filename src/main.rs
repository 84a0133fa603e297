//! BidHouse service entry point.
//!
//! Wires settings, stores, the bid engine, the lifecycle scheduler and the
//! HTTP/WebSocket facade together, then runs until SIGINT/SIGTERM.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bidhouse::handlers::{self, AppState};
use bidhouse::services::{BidEngine, BroadcastHub, LifecycleScheduler, PaymentService};
use bidhouse::stores::{
    DurableStore, LiveStore, MemoryDurableStore, MemoryLiveStore, PgDurableStore, RedisLiveStore,
};
use bidhouse::{CoreError, Settings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::load();
    info!(version = bidhouse::VERSION, "starting bidhouse");

    let live = connect_live(&settings).await?;
    let store = connect_durable(&settings).await?;

    let hub = Arc::new(BroadcastHub::default());
    let engine = Arc::new(BidEngine::new(live.clone(), store.clone(), hub.clone()));
    let payments = Arc::new(PaymentService::new(store.clone(), live.clone(), hub.clone()));
    let scheduler = Arc::new(LifecycleScheduler::new(
        store.clone(),
        live.clone(),
        engine.clone(),
        hub.clone(),
        settings.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let state = Arc::new(AppState {
        engine,
        payments,
        store,
        live,
        hub,
    });
    let router = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.http_listen_addr).await?;
    info!(addr = %settings.http_listen_addr, "facade listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    scheduler_task.await.ok();
    info!("bidhouse stopped");
    Ok(())
}

async fn connect_live(settings: &Settings) -> Result<Arc<dyn LiveStore>, CoreError> {
    if settings.live_store_url.starts_with("memory:") {
        info!("using in-process live store");
        return Ok(Arc::new(MemoryLiveStore::new()));
    }
    let store = RedisLiveStore::connect(&settings.live_store_url).await?;
    info!("live store connected");
    Ok(Arc::new(store))
}

async fn connect_durable(settings: &Settings) -> Result<Arc<dyn DurableStore>, CoreError> {
    if settings.durable_store_url.starts_with("memory:") {
        info!("using in-process durable store");
        return Ok(Arc::new(MemoryDurableStore::new()));
    }
    let store = PgDurableStore::connect(&settings.durable_store_url).await?;
    info!("durable store connected");
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
