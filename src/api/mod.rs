mod handlers;
mod routes;

use crate::config::Config;
use crate::db::Database;
use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Start the API server
pub async fn start_api_server(db: Arc<Database>) -> Result<()> {
    let config = Config::get();

    // Set up CORS
    let cors = if config.server.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::permissive()
    };

    // Create router with all routes
    let app = Router::new()
        // General routes
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::get_metrics))
        // Inbound platform webhook, routed by external channel id
        .route(
            "/webhook/:line_channel_id",
            post(handlers::webhook::receive_webhook),
        )
        // Scheduler-triggered sweeps
        .route(
            "/internal/sweeps/broadcasts",
            post(handlers::sweeps::run_broadcast_sweep),
        )
        .route("/internal/sweeps/steps", post(handlers::sweeps::run_step_sweep))
        .route(
            "/internal/sweeps/rich-menus",
            post(handlers::sweeps::run_rich_menu_sweep),
        )
        // Operator actions
        .route(
            "/api/channels/:channel_id/users/:user_id/tags/:tag_id",
            post(handlers::users::assign_tag).delete(handlers::users::unassign_tag),
        )
        .route(
            "/api/channels/:channel_id/users/:user_id",
            delete(handlers::users::delete_user),
        )
        .route(
            "/api/channels/:channel_id/scenarios/:scenario_id/start",
            post(handlers::scenarios::manual_start),
        )
        .route(
            "/api/channels/:channel_id/messages/:message_id/send",
            post(handlers::messages::send_message),
        )
        .route(
            "/api/channels/:channel_id/rich-menus/:menu_id/register",
            post(handlers::rich_menus::register_menu),
        )
        .route(
            "/api/channels/:channel_id/rich-menus/:menu_id",
            delete(handlers::rich_menus::delete_menu),
        )
        // Add state and middleware
        .with_state(db.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Get bind address
    let addr = format!("{}:{}", config.server.host, config.server.port).parse::<SocketAddr>()?;

    // Start server
    info!("Starting API server on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
