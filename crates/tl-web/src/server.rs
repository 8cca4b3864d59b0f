use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tl_types::{Result, TeamLinkError};
use tracing::info;

use crate::auth::gateway_auth;
use crate::routes::{self, channels, events, invitations, members, messages};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let uploads = Router::new()
        .route("/api/groups/{group_id}/files", post(messages::upload_file))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes));

    let api = Router::new()
        .route("/api/channels", post(channels::create_channel))
        .route("/api/channels/{channel_id}/archive", post(channels::archive_channel))
        .route("/api/groups/{group_id}/sync", post(channels::sync_group))
        .route(
            "/api/groups/{group_id}/messages",
            get(messages::preview).post(messages::post_message),
        )
        .route(
            "/api/groups/{group_id}/messages/{ts}",
            axum::routing::delete(messages::delete_message),
        )
        .route("/api/groups/{group_id}/cache", post(messages::refresh_cache))
        .route("/api/groups/{group_id}/events", get(events::group_events))
        .route("/api/members/me", get(members::me))
        .route(
            "/api/members/me/identity",
            put(members::link_identity).delete(members::unlink_identity),
        )
        .route("/api/members/me/previews", get(members::my_previews))
        .route(
            "/api/invitations",
            post(invitations::request).get(invitations::list_pending),
        )
        .route("/api/invitations/me", get(invitations::my_status))
        .route(
            "/api/invitations/{member_id}/complete",
            post(invitations::complete),
        )
        .merge(uploads)
        .route_layer(middleware::from_fn_with_state(state.clone(), gateway_auth));

    Router::new()
        .route("/health", get(routes::health))
        .merge(api)
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| TeamLinkError::Config(format!("Failed to bind {addr}: {e}")))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
