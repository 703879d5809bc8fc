pub mod dto;
pub mod handlers;
pub mod repo;
pub mod services;
pub mod shopping_list;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::recipe_routes())
        .merge(handlers::list_routes())
}
