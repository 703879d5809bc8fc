use anyhow::Context;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::dto::{IngredientAmount, RecipeFilter};

/// Recipe row annotated for a viewer.
#[derive(Debug, Clone, FromRow)]
pub struct RecipeRow {
    pub id: Uuid,
    pub author_id: Uuid,
    pub name: String,
    pub text: String,
    pub cooking_time: i32,
    pub image_key: String,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct ShortRecipeRow {
    pub id: Uuid,
    pub author_id: Uuid,
    pub name: String,
    pub image_key: String,
    pub cooking_time: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct IngredientLineRow {
    pub recipe_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

pub struct RecipeFields<'a> {
    pub name: &'a str,
    pub text: &'a str,
    pub cooking_time: i32,
}

/// Per-user recipe collections sharing the same add/remove semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeList {
    Favorites,
    ShoppingCart,
}

impl RecipeList {
    fn table(self) -> &'static str {
        match self {
            RecipeList::Favorites => "favorites",
            RecipeList::ShoppingCart => "shopping_cart",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RecipeList::Favorites => "favorites",
            RecipeList::ShoppingCart => "shopping cart",
        }
    }
}

fn push_select(qb: &mut QueryBuilder<'_, Postgres>, viewer: Option<Uuid>) {
    qb.push(
        "SELECT r.id, r.author_id, r.name, r.text, r.cooking_time, r.image_key, \
         EXISTS (SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = ",
    )
    .push_bind(viewer)
    .push(
        ") AS is_favorited, \
         EXISTS (SELECT 1 FROM shopping_cart c WHERE c.recipe_id = r.id AND c.user_id = ",
    )
    .push_bind(viewer)
    .push(") AS is_in_shopping_cart FROM recipes r");
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, viewer: Option<Uuid>, filter: &RecipeFilter) {
    qb.push(" WHERE TRUE");
    if let Some(author) = filter.author {
        qb.push(" AND r.author_id = ").push_bind(author);
    }
    if !filter.tags.is_empty() {
        qb.push(
            " AND EXISTS (SELECT 1 FROM recipe_tags rt JOIN tags t ON t.id = rt.tag_id \
             WHERE rt.recipe_id = r.id AND t.slug = ANY(",
        )
        .push_bind(filter.tags.clone())
        .push("))");
    }
    // anonymous viewers bind NULL here, which matches nothing
    if filter.is_favorited {
        qb.push(" AND EXISTS (SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = ")
            .push_bind(viewer)
            .push(")");
    }
    if filter.is_in_shopping_cart {
        qb.push(
            " AND EXISTS (SELECT 1 FROM shopping_cart c WHERE c.recipe_id = r.id AND c.user_id = ",
        )
        .push_bind(viewer)
        .push(")");
    }
}

pub async fn list(
    db: &PgPool,
    viewer: Option<Uuid>,
    filter: &RecipeFilter,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(i64, Vec<RecipeRow>)> {
    let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM recipes r");
    push_filters(&mut count_qb, viewer, filter);
    let count: i64 = count_qb
        .build_query_scalar::<i64>()
        .fetch_one(db)
        .await
        .context("count recipes")?;

    let mut qb = QueryBuilder::<Postgres>::new("");
    push_select(&mut qb, viewer);
    push_filters(&mut qb, viewer, filter);
    qb.push(" ORDER BY r.created_at DESC, r.id LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let rows = qb
        .build_query_as::<RecipeRow>()
        .fetch_all(db)
        .await
        .context("list recipes")?;

    Ok((count, rows))
}

pub async fn get(db: &PgPool, viewer: Option<Uuid>, id: Uuid) -> anyhow::Result<Option<RecipeRow>> {
    let mut qb = QueryBuilder::<Postgres>::new("");
    push_select(&mut qb, viewer);
    qb.push(" WHERE r.id = ").push_bind(id);
    let row = qb
        .build_query_as::<RecipeRow>()
        .fetch_optional(db)
        .await
        .context("get recipe")?;
    Ok(row)
}

pub async fn short(db: &PgPool, id: Uuid) -> anyhow::Result<Option<ShortRecipeRow>> {
    let row = sqlx::query_as::<_, ShortRecipeRow>(
        r#"
        SELECT id, author_id, name, image_key, cooking_time
          FROM recipes
         WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .context("get short recipe")?;
    Ok(row)
}

/// Recipes of the given authors, newest first, at most `per_author` each when set.
pub async fn short_recipes_by_authors(
    db: &PgPool,
    author_ids: &[Uuid],
    per_author: Option<i64>,
) -> anyhow::Result<Vec<ShortRecipeRow>> {
    if author_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, ShortRecipeRow>(
        r#"
        SELECT id, author_id, name, image_key, cooking_time
          FROM (
                SELECT r.id, r.author_id, r.name, r.image_key, r.cooking_time, r.created_at,
                       ROW_NUMBER() OVER (
                           PARTITION BY r.author_id ORDER BY r.created_at DESC, r.id
                       ) AS rn
                  FROM recipes r
                 WHERE r.author_id = ANY($1)
               ) ranked
         WHERE $2::bigint IS NULL OR rn <= $2
         ORDER BY author_id, rn
        "#,
    )
    .bind(author_ids)
    .bind(per_author)
    .fetch_all(db)
    .await
    .context("list recipes by authors")?;
    Ok(rows)
}

pub async fn ingredients_for_recipes(
    db: &PgPool,
    recipe_ids: &[Uuid],
) -> anyhow::Result<Vec<IngredientLineRow>> {
    let rows = sqlx::query_as::<_, IngredientLineRow>(
        r#"
        SELECT ir.recipe_id, i.id, i.name, i.measurement_unit, ir.amount
          FROM ingredient_recipe ir
          JOIN ingredients i ON i.id = ir.ingredient_id
         WHERE ir.recipe_id = ANY($1)
         ORDER BY i.name, i.measurement_unit
        "#,
    )
    .bind(recipe_ids)
    .fetch_all(db)
    .await
    .context("load recipe ingredients")?;
    Ok(rows)
}

// ---- Writes (transactional) ----

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    author_id: Uuid,
    fields: &RecipeFields<'_>,
    image_key: &str,
) -> anyhow::Result<Uuid> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO recipes (author_id, name, text, cooking_time, image_key)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(author_id)
    .bind(fields.name)
    .bind(fields.text)
    .bind(fields.cooking_time)
    .bind(image_key)
    .fetch_one(&mut **tx)
    .await
    .context("insert recipe")?;
    Ok(id)
}

/// Updates the scalar columns; `image_key` of `None` keeps the current image.
pub async fn update_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    fields: &RecipeFields<'_>,
    image_key: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE recipes
           SET name = $2,
               text = $3,
               cooking_time = $4,
               image_key = COALESCE($5, image_key)
         WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(fields.name)
    .bind(fields.text)
    .bind(fields.cooking_time)
    .bind(image_key)
    .execute(&mut **tx)
    .await
    .context("update recipe")?;
    Ok(())
}

pub async fn clear_associations_tx(
    tx: &mut Transaction<'_, Postgres>,
    recipe_id: Uuid,
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tx)
        .await
        .context("clear recipe tags")?;
    sqlx::query("DELETE FROM ingredient_recipe WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tx)
        .await
        .context("clear recipe ingredients")?;
    Ok(())
}

pub async fn insert_ingredients_tx(
    tx: &mut Transaction<'_, Postgres>,
    recipe_id: Uuid,
    lines: &[IngredientAmount],
) -> anyhow::Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut qb =
        QueryBuilder::<Postgres>::new("INSERT INTO ingredient_recipe (recipe_id, ingredient_id, amount) ");
    qb.push_values(lines, |mut b, line| {
        b.push_bind(recipe_id)
            .push_bind(line.id)
            .push_bind(line.amount);
    });
    qb.build()
        .execute(&mut **tx)
        .await
        .context("bulk insert recipe ingredients")?;
    Ok(())
}

pub async fn insert_tags_tx(
    tx: &mut Transaction<'_, Postgres>,
    recipe_id: Uuid,
    tag_ids: &[Uuid],
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO recipe_tags (recipe_id, tag_id)
        SELECT $1, tag_id FROM UNNEST($2::uuid[]) AS t(tag_id)
        "#,
    )
    .bind(recipe_id)
    .bind(tag_ids)
    .execute(&mut **tx)
    .await
    .context("assign recipe tags")?;
    Ok(())
}

pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(id)
        .execute(db)
        .await
        .context("delete recipe")?;
    Ok(())
}

// ---- Favorites / shopping cart ----

/// Get-or-create. `false` means the row already existed.
pub async fn add_to_list(
    db: &PgPool,
    list: RecipeList,
    user_id: Uuid,
    recipe_id: Uuid,
) -> anyhow::Result<bool> {
    let sql = format!(
        "INSERT INTO {} (user_id, recipe_id) VALUES ($1, $2) \
         ON CONFLICT (user_id, recipe_id) DO NOTHING",
        list.table()
    );
    let res = sqlx::query(&sql)
        .bind(user_id)
        .bind(recipe_id)
        .execute(db)
        .await
        .with_context(|| format!("add to {}", list.label()))?;
    Ok(res.rows_affected() == 1)
}

/// `false` means there was nothing to remove.
pub async fn remove_from_list(
    db: &PgPool,
    list: RecipeList,
    user_id: Uuid,
    recipe_id: Uuid,
) -> anyhow::Result<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE user_id = $1 AND recipe_id = $2",
        list.table()
    );
    let res = sqlx::query(&sql)
        .bind(user_id)
        .bind(recipe_id)
        .execute(db)
        .await
        .with_context(|| format!("remove from {}", list.label()))?;
    Ok(res.rows_affected() > 0)
}
