use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use clap::Parser;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use finsight::{
    config::{CliArgs, Config},
    dispatch::{Dispatcher, RequestContext, ToolCall, ToolResponse},
    sqlite_store::SqliteStore,
    storage::FinanceStore,
};

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn handle_tool_call(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(call): Json<ToolCall>,
) -> Json<ToolResponse> {
    let ctx = RequestContext {
        today: OffsetDateTime::now_utc().date(),
    };
    Json(dispatcher.handle(&ctx, call))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config);

    let store = Arc::new(SqliteStore::new(
        &config.database.path,
        &config.defaults.currency,
    )?);
    store.initialize()?;

    let config = Arc::new(config);
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), config.clone()));

    let app = Router::new()
        .route("/", post(handle_tool_call))
        .with_state(dispatcher);

    let addr = config.listen_addr();
    tracing::info!(%addr, database = %config.database.path, "listening");

    let served = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Close the store whether the server stopped cleanly or not.
    store.close()?;
    served?;
    Ok(())
}
