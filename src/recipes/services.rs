use std::collections::{HashMap, HashSet};

use anyhow::Context;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::RecipeLimits,
    error::ApiError,
    images::services::{self as images, DecodedImage},
    ingredients,
    pagination::Page,
    recipes::{
        dto::{
            IngredientAmount, RecipeIngredientRead, RecipeQuery, RecipeRead, RecipeWrite,
            ShortRecipe,
        },
        repo::{self, RecipeFields, RecipeList, RecipeRow, ShortRecipeRow},
    },
    state::AppState,
    tags,
    users::{self, dto::UserResponse},
};

pub const MAX_NAME_LEN: usize = 200;

/// A write payload that passed validation, image already decoded.
#[derive(Debug)]
pub struct ValidatedRecipe {
    pub name: String,
    pub text: String,
    pub cooking_time: i32,
    pub ingredients: Vec<IngredientAmount>,
    pub tags: Vec<Uuid>,
    pub image: Option<DecodedImage>,
}

impl ValidatedRecipe {
    fn fields(&self) -> RecipeFields<'_> {
        RecipeFields {
            name: &self.name,
            text: &self.text,
            cooking_time: self.cooking_time,
        }
    }
}

fn has_duplicates(ids: impl IntoIterator<Item = Uuid>) -> bool {
    let mut seen = HashSet::new();
    ids.into_iter().any(|id| !seen.insert(id))
}

/// Checks a create/update payload. The image is mandatory only on create.
pub fn validate(
    payload: RecipeWrite,
    limits: &RecipeLimits,
    require_image: bool,
) -> Result<ValidatedRecipe, ApiError> {
    let image = match payload.image.as_deref() {
        Some(raw) => Some(images::decode_data_uri(raw)?),
        None if require_image => return Err(ApiError::validation("image is required")),
        None => None,
    };

    if payload.tags.is_empty() {
        return Err(ApiError::validation("At least one tag is required"));
    }
    if payload.ingredients.is_empty() {
        return Err(ApiError::validation("At least one ingredient is required"));
    }
    if has_duplicates(payload.ingredients.iter().map(|i| i.id)) {
        return Err(ApiError::validation("Ingredients must not repeat"));
    }
    if has_duplicates(payload.tags.iter().copied()) {
        return Err(ApiError::validation("Tags must not repeat"));
    }
    if let Some(bad) = payload
        .ingredients
        .iter()
        .find(|i| i.amount < limits.min_amount)
    {
        return Err(ApiError::validation(format!(
            "Amount of ingredient {} must be at least {}",
            bad.id, limits.min_amount
        )));
    }

    let text = payload.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::validation("Recipe text is required"));
    }
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("Recipe name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::validation(format!(
            "Recipe name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    let cooking_time = payload
        .cooking_time
        .ok_or_else(|| ApiError::validation("cooking_time is required"))?;
    if cooking_time < limits.min_cooking_time {
        return Err(ApiError::validation(format!(
            "cooking_time must be at least {} minutes",
            limits.min_cooking_time
        )));
    }

    Ok(ValidatedRecipe {
        name,
        text,
        cooking_time,
        ingredients: payload.ingredients,
        tags: payload.tags,
        image,
    })
}

async fn check_references(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    recipe: &ValidatedRecipe,
) -> Result<(), ApiError> {
    let ingredient_ids: Vec<Uuid> = recipe.ingredients.iter().map(|i| i.id).collect();
    if let Some(id) = ingredients::repo::missing_tx(tx, &ingredient_ids).await?.first() {
        return Err(ApiError::validation(format!("Unknown ingredient {id}")));
    }
    if let Some(id) = tags::repo::missing_tx(tx, &recipe.tags).await?.first() {
        return Err(ApiError::validation(format!("Unknown tag {id}")));
    }
    Ok(())
}

async fn persist_new(
    state: &AppState,
    author_id: Uuid,
    recipe: &ValidatedRecipe,
    image_key: &str,
) -> Result<Uuid, ApiError> {
    let mut tx = state.db.begin().await.context("begin tx")?;
    check_references(&mut tx, recipe).await?;
    let id = repo::insert_tx(&mut tx, author_id, &recipe.fields(), image_key).await?;
    repo::insert_ingredients_tx(&mut tx, id, &recipe.ingredients).await?;
    repo::insert_tags_tx(&mut tx, id, &recipe.tags).await?;
    tx.commit().await.context("commit tx")?;
    Ok(id)
}

async fn persist_update(
    state: &AppState,
    id: Uuid,
    recipe: &ValidatedRecipe,
    image_key: Option<&str>,
) -> Result<(), ApiError> {
    let mut tx = state.db.begin().await.context("begin tx")?;
    check_references(&mut tx, recipe).await?;
    repo::update_tx(&mut tx, id, &recipe.fields(), image_key).await?;
    repo::clear_associations_tx(&mut tx, id).await?;
    repo::insert_ingredients_tx(&mut tx, id, &recipe.ingredients).await?;
    repo::insert_tags_tx(&mut tx, id, &recipe.tags).await?;
    tx.commit().await.context("commit tx")?;
    Ok(())
}

pub async fn create(
    state: &AppState,
    author_id: Uuid,
    payload: RecipeWrite,
) -> Result<RecipeRead, ApiError> {
    let mut recipe = validate(payload, &state.config.recipes, true)?;
    let image = recipe
        .image
        .take()
        .ok_or_else(|| ApiError::validation("image is required"))?;
    let image_key = images::store_recipe_image(state, image).await?;

    let id = match persist_new(state, author_id, &recipe, &image_key).await {
        Ok(id) => id,
        Err(e) => {
            images::remove_quietly(state, &image_key).await;
            return Err(e);
        }
    };
    info!(recipe_id = %id, author_id = %author_id, "recipe created");

    detail(state, Some(author_id), id).await
}

/// Loads the recipe's author and image, enforcing that `user_id` wrote it.
async fn owned(state: &AppState, user_id: Uuid, id: Uuid) -> Result<ShortRecipeRow, ApiError> {
    let recipe = repo::short(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Recipe not found"))?;
    if recipe.author_id != user_id {
        warn!(recipe_id = %id, user_id = %user_id, "recipe change by non-author");
        return Err(ApiError::Forbidden(
            "Only the author can change this recipe".into(),
        ));
    }
    Ok(recipe)
}

pub async fn update(
    state: &AppState,
    user_id: Uuid,
    id: Uuid,
    payload: RecipeWrite,
) -> Result<RecipeRead, ApiError> {
    let current = owned(state, user_id, id).await?;
    let mut recipe = validate(payload, &state.config.recipes, false)?;

    let new_key = match recipe.image.take() {
        Some(image) => Some(images::store_recipe_image(state, image).await?),
        None => None,
    };

    if let Err(e) = persist_update(state, id, &recipe, new_key.as_deref()).await {
        if let Some(key) = &new_key {
            images::remove_quietly(state, key).await;
        }
        return Err(e);
    }
    if new_key.is_some() {
        images::remove_quietly(state, &current.image_key).await;
    }
    info!(recipe_id = %id, "recipe updated");

    detail(state, Some(user_id), id).await
}

pub async fn delete(state: &AppState, user_id: Uuid, id: Uuid) -> Result<(), ApiError> {
    let current = owned(state, user_id, id).await?;
    repo::delete(&state.db, id).await?;
    images::remove_quietly(state, &current.image_key).await;
    info!(recipe_id = %id, "recipe deleted");
    Ok(())
}

pub async fn detail(state: &AppState, viewer: Option<Uuid>, id: Uuid) -> Result<RecipeRead, ApiError> {
    let row = repo::get(&state.db, viewer, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Recipe not found"))?;
    let mut out = hydrate(state, viewer, vec![row]).await?;
    Ok(out.remove(0))
}

pub async fn list(
    state: &AppState,
    viewer: Option<Uuid>,
    query: RecipeQuery,
) -> Result<Page<RecipeRead>, ApiError> {
    let page_size = state.config.page_size;
    let (count, rows) = repo::list(
        &state.db,
        viewer,
        &query.filter,
        query.page.limit(page_size),
        query.page.offset(page_size),
    )
    .await?;
    let results = hydrate(state, viewer, rows).await?;
    Ok(Page { count, results })
}

/// Attaches tags, ingredient lines, author profiles and image URLs.
async fn hydrate(
    state: &AppState,
    viewer: Option<Uuid>,
    rows: Vec<RecipeRow>,
) -> anyhow::Result<Vec<RecipeRead>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut author_ids: Vec<Uuid> = rows.iter().map(|r| r.author_id).collect();
    author_ids.sort_unstable();
    author_ids.dedup();

    let mut tags_by_recipe: HashMap<Uuid, Vec<_>> = HashMap::new();
    for row in tags::repo::for_recipes(&state.db, &ids).await? {
        tags_by_recipe.entry(row.recipe_id).or_default().push(row.tag);
    }

    let mut lines_by_recipe: HashMap<Uuid, Vec<RecipeIngredientRead>> = HashMap::new();
    for line in repo::ingredients_for_recipes(&state.db, &ids).await? {
        lines_by_recipe
            .entry(line.recipe_id)
            .or_default()
            .push(RecipeIngredientRead {
                id: line.id,
                name: line.name,
                measurement_unit: line.measurement_unit,
                amount: line.amount,
            });
    }

    let authors: HashMap<Uuid, users::repo::ProfileRow> =
        users::repo::profiles_by_ids(&state.db, viewer, &author_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let author = authors
            .get(&row.author_id)
            .cloned()
            .with_context(|| format!("author {} of recipe {} missing", row.author_id, row.id))?;
        out.push(RecipeRead {
            id: row.id,
            tags: tags_by_recipe.remove(&row.id).unwrap_or_default(),
            author: UserResponse::from(author),
            ingredients: lines_by_recipe.remove(&row.id).unwrap_or_default(),
            is_favorited: row.is_favorited,
            is_in_shopping_cart: row.is_in_shopping_cart,
            name: row.name,
            image: images::image_url(state, &row.image_key).await?,
            text: row.text,
            cooking_time: row.cooking_time,
        });
    }
    Ok(out)
}

pub async fn short_recipe(state: &AppState, row: ShortRecipeRow) -> anyhow::Result<ShortRecipe> {
    Ok(ShortRecipe {
        id: row.id,
        image: images::image_url(state, &row.image_key).await?,
        name: row.name,
        cooking_time: row.cooking_time,
    })
}

pub async fn add_to_list(
    state: &AppState,
    list: RecipeList,
    user_id: Uuid,
    recipe_id: Uuid,
) -> Result<ShortRecipe, ApiError> {
    let recipe = repo::short(&state.db, recipe_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Recipe not found"))?;
    if !repo::add_to_list(&state.db, list, user_id, recipe_id).await? {
        return Err(ApiError::validation(format!(
            "Recipe is already in {}",
            list.label()
        )));
    }
    info!(recipe_id = %recipe_id, user_id = %user_id, list = list.label(), "recipe added");
    Ok(short_recipe(state, recipe).await?)
}

pub async fn remove_from_list(
    state: &AppState,
    list: RecipeList,
    user_id: Uuid,
    recipe_id: Uuid,
) -> Result<(), ApiError> {
    if repo::short(&state.db, recipe_id).await?.is_none() {
        return Err(ApiError::not_found("Recipe not found"));
    }
    if !repo::remove_from_list(&state.db, list, user_id, recipe_id).await? {
        return Err(ApiError::validation(format!(
            "Recipe is not in {}",
            list.label()
        )));
    }
    info!(recipe_id = %recipe_id, user_id = %user_id, list = list.label(), "recipe removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqlx::PgPool;

    use super::*;
    use crate::{fixtures, storage::MemoryStorage};

    const PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    fn payload() -> RecipeWrite {
        RecipeWrite {
            ingredients: vec![
                IngredientAmount { id: Uuid::new_v4(), amount: 200 },
                IngredientAmount { id: Uuid::new_v4(), amount: 2 },
            ],
            tags: vec![Uuid::new_v4()],
            image: Some(PNG.into()),
            name: "  Pancakes ".into(),
            text: "Mix and fry.".into(),
            cooking_time: Some(15),
        }
    }

    fn limits() -> RecipeLimits {
        RecipeLimits::default()
    }

    fn rejected(p: RecipeWrite) -> bool {
        matches!(validate(p, &limits(), true), Err(ApiError::Validation(_)))
    }

    #[test]
    fn valid_payload_is_trimmed_and_decoded() {
        let v = validate(payload(), &limits(), true).unwrap();
        assert_eq!(v.name, "Pancakes");
        assert_eq!(v.ingredients.len(), 2);
        assert_eq!(v.image.unwrap().content_type, "image/png");
    }

    #[test]
    fn empty_tags_or_ingredients_are_rejected() {
        let mut p = payload();
        p.tags.clear();
        assert!(rejected(p));

        let mut p = payload();
        p.ingredients.clear();
        assert!(rejected(p));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut p = payload();
        let first = p.ingredients[0];
        p.ingredients.push(IngredientAmount { id: first.id, amount: 5 });
        assert!(rejected(p));

        let mut p = payload();
        let tag = p.tags[0];
        p.tags.push(tag);
        assert!(rejected(p));
    }

    #[test]
    fn text_name_and_image_are_required_on_create() {
        let mut p = payload();
        p.text = "   ".into();
        assert!(rejected(p));

        let mut p = payload();
        p.name = String::new();
        assert!(rejected(p));

        let mut p = payload();
        p.name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(rejected(p));

        let mut p = payload();
        p.image = None;
        assert!(rejected(p));

        let mut p = payload();
        p.image = Some(String::new());
        assert!(rejected(p));
    }

    #[test]
    fn image_is_optional_on_update() {
        let mut p = payload();
        p.image = None;
        let v = validate(p, &limits(), false).unwrap();
        assert!(v.image.is_none());
    }

    #[test]
    fn minimums_come_from_config() {
        let strict = RecipeLimits {
            min_cooking_time: 10,
            min_amount: 5,
        };

        let mut p = payload();
        p.cooking_time = Some(9);
        assert!(validate(p, &strict, true).is_err());

        // second line has amount 2 < 5
        assert!(validate(payload(), &strict, true).is_err());

        let mut p = payload();
        p.cooking_time = Some(0);
        assert!(rejected(p));

        let mut p = payload();
        p.cooking_time = None;
        assert!(rejected(p));

        let mut p = payload();
        p.ingredients[0].amount = 0;
        assert!(rejected(p));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn favorite_and_cart_reject_repeats_and_absent_rows(pool: PgPool) {
        let state = AppState::with_db(pool.clone());
        let author = fixtures::user(&pool, "author").await;
        let reader = fixtures::user(&pool, "reader").await;
        let recipe = fixtures::recipe(&pool, author, "soup", &[]).await;

        for list in [RecipeList::Favorites, RecipeList::ShoppingCart] {
            let short = add_to_list(&state, list, reader, recipe).await.unwrap();
            assert_eq!(short.id, recipe);
            assert!(matches!(
                add_to_list(&state, list, reader, recipe).await,
                Err(ApiError::Validation(_))
            ));

            remove_from_list(&state, list, reader, recipe).await.unwrap();
            assert!(matches!(
                remove_from_list(&state, list, reader, recipe).await,
                Err(ApiError::Validation(_))
            ));
        }

        assert!(matches!(
            add_to_list(&state, RecipeList::Favorites, reader, Uuid::new_v4()).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn viewer_flags_follow_list_membership(pool: PgPool) {
        let state = AppState::with_db(pool.clone());
        let author = fixtures::user(&pool, "author").await;
        let reader = fixtures::user(&pool, "reader").await;
        let recipe = fixtures::recipe(&pool, author, "soup", &[]).await;

        add_to_list(&state, RecipeList::Favorites, reader, recipe).await.unwrap();
        let seen = detail(&state, Some(reader), recipe).await.unwrap();
        assert!(seen.is_favorited);
        assert!(!seen.is_in_shopping_cart);

        let anonymous = detail(&state, None, recipe).await.unwrap();
        assert!(!anonymous.is_favorited);
    }

    async fn write_payload(pool: &PgPool, ingredients: Vec<IngredientAmount>) -> RecipeWrite {
        RecipeWrite {
            ingredients,
            tags: vec![fixtures::tag(pool, "breakfast").await],
            image: Some(PNG.into()),
            name: "Pancakes".into(),
            text: "Mix and fry.".into(),
            cooking_time: Some(15),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_persists_lines_and_tags(pool: PgPool) {
        let storage = Arc::new(MemoryStorage::default());
        let state = AppState::with_pool(pool.clone(), storage.clone());
        let author = fixtures::user(&pool, "author").await;
        let flour = fixtures::ingredient(&pool, "Flour", "g").await;

        let payload = write_payload(&pool, vec![IngredientAmount { id: flour, amount: 200 }]).await;
        let created = create(&state, author, payload).await.unwrap();

        assert_eq!(created.name, "Pancakes");
        assert_eq!(created.author.id, author);
        assert_eq!(created.ingredients.len(), 1);
        assert_eq!(created.ingredients[0].amount, 200);
        assert_eq!(created.tags[0].slug, "breakfast");
        assert_eq!(storage.len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unknown_ingredient_rolls_back_create(pool: PgPool) {
        let storage = Arc::new(MemoryStorage::default());
        let state = AppState::with_pool(pool.clone(), storage.clone());
        let author = fixtures::user(&pool, "author").await;

        let payload =
            write_payload(&pool, vec![IngredientAmount { id: Uuid::new_v4(), amount: 1 }]).await;
        assert!(matches!(
            create(&state, author, payload).await,
            Err(ApiError::Validation(_))
        ));

        let recipes = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM recipes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(recipes, 0);
        assert_eq!(storage.len(), 0, "uploaded image is cleaned up");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unknown_ingredient_leaves_update_untouched(pool: PgPool) {
        let state = AppState::with_db(pool.clone());
        let author = fixtures::user(&pool, "author").await;
        let flour = fixtures::ingredient(&pool, "Flour", "g").await;
        let recipe = fixtures::recipe(&pool, author, "bread", &[(flour, 500)]).await;

        let mut payload =
            write_payload(&pool, vec![IngredientAmount { id: Uuid::new_v4(), amount: 3 }]).await;
        payload.image = None;
        payload.name = "Renamed".into();
        assert!(matches!(
            update(&state, author, recipe, payload).await,
            Err(ApiError::Validation(_))
        ));

        let kept = detail(&state, Some(author), recipe).await.unwrap();
        assert_eq!(kept.name, "bread");
        assert_eq!(kept.ingredients.len(), 1);
        assert_eq!(kept.ingredients[0].id, flour);
        assert_eq!(kept.ingredients[0].amount, 500);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn only_the_author_may_change_a_recipe(pool: PgPool) {
        let state = AppState::with_db(pool.clone());
        let author = fixtures::user(&pool, "author").await;
        let stranger = fixtures::user(&pool, "stranger").await;
        let recipe = fixtures::recipe(&pool, author, "bread", &[]).await;

        assert!(matches!(
            delete(&state, stranger, recipe).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            delete(&state, author, Uuid::new_v4()).await,
            Err(ApiError::NotFound(_))
        ));
        delete(&state, author, recipe).await.unwrap();
        assert!(matches!(
            detail(&state, None, recipe).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
