use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, MaybeAuthUser},
    error::ApiError,
    pagination::{Page, PageParams},
    state::AppState,
    users::{
        dto::{
            RecipesLimitQuery, RegisterRequest, RegisteredUser, SetPasswordRequest,
            SubscriptionResponse, SubscriptionsQuery, UserResponse,
        },
        repo, services,
    },
};

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register).get(list_users))
        .route("/users/me", get(get_me))
        .route("/users/set_password", post(set_password))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/users/:id", get(get_user))
}

pub fn subscription_routes() -> Router<AppState> {
    Router::new()
        .route("/users/subscriptions", get(list_subscriptions))
        .route(
            "/users/:id/subscribe",
            post(subscribe).delete(unsubscribe),
        )
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisteredUser>), ApiError> {
    let user = services::register(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Query(p): Query<PageParams>,
) -> Result<Json<Page<UserResponse>>, ApiError> {
    let page_size = state.config.page_size;
    let (count, rows) =
        repo::list_profiles(&state.db, viewer, p.limit(page_size), p.offset(page_size)).await?;
    Ok(Json(Page {
        count,
        results: rows.into_iter().map(Into::into).collect(),
    }))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    let profile = repo::profile(&state.db, viewer, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(profile.into()))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserResponse>, ApiError> {
    let profile = repo::profile(&state.db, Some(user_id), user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;
    Ok(Json(profile.into()))
}

#[instrument(skip(state, payload))]
pub async fn set_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<SetPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    services::set_password(&state, user_id, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn subscribe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(author_id): Path<Uuid>,
    Query(q): Query<RecipesLimitQuery>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), ApiError> {
    let body = services::subscribe(&state, user_id, author_id, q.recipes_limit).await?;
    Ok((StatusCode::CREATED, Json(body)))
}

#[instrument(skip(state))]
pub async fn unsubscribe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(author_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    services::unsubscribe(&state, user_id, author_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<SubscriptionsQuery>,
) -> Result<Json<Page<SubscriptionResponse>>, ApiError> {
    Ok(Json(services::subscriptions(&state, user_id, q).await?))
}
