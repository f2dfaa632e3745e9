use super::handlers;
use crate::server::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// Image repository API routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/containers/repo",
            get(handlers::list_repos).post(handlers::create_repo),
        )
        .route("/containers/repo/search", post(handlers::search_repos))
        .route("/containers/repo/status", get(handlers::check_repo_status))
        .route("/containers/repo/update", post(handlers::update_repo))
        .route("/containers/repo/del", post(handlers::delete_repos))
        .route("/containers/repo/{id}", get(handlers::get_repo))
}
