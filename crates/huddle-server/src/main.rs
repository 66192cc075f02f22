mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_api::AppStateInner;
use huddle_api::files::FileStore;
use huddle_db::Database;
use huddle_gateway::connection::{self, GatewayContext};
use huddle_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and upload root
    let db = Arc::new(Database::open(&config.db_path)?);
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    // Shared state
    let dispatcher = Dispatcher::new(config.fanout);
    info!("Group fan-out mode: {}", dispatcher.mode());
    let app_state = Arc::new(AppStateInner {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        files: FileStore::new(&config.upload_dir),
        jwt_secret: config.jwt_secret.clone(),
    });

    let gateway = GatewayContext {
        dispatcher,
        db,
        jwt_secret: config.jwt_secret.clone(),
    };

    let uploads = ServeDir::new(app_state.files.root());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(huddle_api::router(app_state))
        .merge(ws_route)
        .nest_service("/uploads", uploads)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Huddle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(ctx): State<GatewayContext>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, ctx))
}
