use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, MaybeAuthUser},
    error::ApiError,
    pagination::Page,
    recipes::{
        dto::{RecipeQuery, RecipeRead, RecipeWrite, ShortRecipe},
        repo::RecipeList,
        services, shopping_list,
    },
    state::AppState,
};

pub fn recipe_routes() -> Router<AppState> {
    Router::new()
        .route("/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/recipes/:id",
            get(get_recipe).patch(update_recipe).delete(delete_recipe),
        )
        // base64 images inflate the body
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
}

pub fn list_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/recipes/:id/favorite",
            post(add_favorite).delete(remove_favorite),
        )
        .route(
            "/recipes/:id/shopping_cart",
            post(add_to_cart).delete(remove_from_cart),
        )
        .route("/recipes/download_shopping_cart", get(download_shopping_cart))
}

#[instrument(skip(state))]
pub async fn list_recipes(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Page<RecipeRead>>, ApiError> {
    let query = RecipeQuery::from_pairs(pairs)?;
    Ok(Json(services::list(&state, viewer, query).await?))
}

#[instrument(skip(state))]
pub async fn get_recipe(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<RecipeRead>, ApiError> {
    Ok(Json(services::detail(&state, viewer, id).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<RecipeWrite>,
) -> Result<(StatusCode, Json<RecipeRead>), ApiError> {
    let recipe = services::create(&state, user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

#[instrument(skip(state, payload))]
pub async fn update_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RecipeWrite>,
) -> Result<Json<RecipeRead>, ApiError> {
    Ok(Json(services::update(&state, user_id, id, payload).await?))
}

#[instrument(skip(state))]
pub async fn delete_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    services::delete(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add(
    state: &AppState,
    list: RecipeList,
    user_id: Uuid,
    id: Uuid,
) -> Result<(StatusCode, Json<ShortRecipe>), ApiError> {
    let short = services::add_to_list(state, list, user_id, id).await?;
    Ok((StatusCode::CREATED, Json(short)))
}

async fn remove(
    state: &AppState,
    list: RecipeList,
    user_id: Uuid,
    id: Uuid,
) -> Result<StatusCode, ApiError> {
    services::remove_from_list(state, list, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn add_favorite(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ShortRecipe>), ApiError> {
    add(&state, RecipeList::Favorites, user_id, id).await
}

#[instrument(skip(state))]
pub async fn remove_favorite(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    remove(&state, RecipeList::Favorites, user_id, id).await
}

#[instrument(skip(state))]
pub async fn add_to_cart(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ShortRecipe>), ApiError> {
    add(&state, RecipeList::ShoppingCart, user_id, id).await
}

#[instrument(skip(state))]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    remove(&state, RecipeList::ShoppingCart, user_id, id).await
}

#[instrument(skip(state))]
pub async fn download_shopping_cart(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let body = shopping_list::build(&state.db, user_id).await?;
    let disposition = format!("attachment; filename=\"{}\"", shopping_list::FILE_NAME);
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}
