use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod jwt;
pub mod password;

pub use jwt::{AuthUser, JwtKeys, MaybeAuthUser};

pub fn router() -> Router<AppState> {
    handlers::token_routes()
}
