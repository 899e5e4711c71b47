use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod refresh;
pub mod repo;
pub mod repo_types;
pub mod users;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::session_routes())
        .merge(users::user_routes())
}
