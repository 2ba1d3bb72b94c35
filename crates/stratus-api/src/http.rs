//! HTTP transport.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check with record counts
//! - `/vpcs`, `/subnets`, `/images`, `/instances` - resource collections
//! - `/{collection}/:id` - single resources
//!
//! The resource routes are also mounted under `/api/v1`.

use crate::handlers::{self, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use stratus_core::LifecycleManager;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

fn resource_routes() -> Router<AppState> {
    Router::new()
        .route("/vpcs", post(handlers::create_vpc).get(handlers::list_vpcs))
        .route(
            "/vpcs/:id",
            get(handlers::get_vpc)
                .put(handlers::update_vpc)
                .delete(handlers::delete_vpc),
        )
        .route(
            "/subnets",
            post(handlers::create_subnet).get(handlers::list_subnets),
        )
        .route(
            "/subnets/:id",
            get(handlers::get_subnet)
                .put(handlers::update_subnet)
                .delete(handlers::delete_subnet),
        )
        .route("/images", post(handlers::create_image).get(handlers::list_images))
        .route(
            "/images/:id",
            get(handlers::get_image).delete(handlers::delete_image),
        )
        .route(
            "/instances",
            post(handlers::create_instance).get(handlers::list_instances),
        )
        .route(
            "/instances/:id",
            get(handlers::get_instance).delete(handlers::delete_instance),
        )
}

/// Build the HTTP router for the control plane.
pub fn build_router(manager: Arc<LifecycleManager>) -> Router {
    tracing::debug!("Building HTTP router");

    Router::new()
        .route("/health", get(handlers::health))
        .merge(resource_routes())
        .nest("/api/v1", resource_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(manager)
}

/// Start the HTTP server.
///
/// Runs until the provided shutdown future resolves.
pub async fn serve(
    manager: Arc<LifecycleManager>,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(manager);

    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
