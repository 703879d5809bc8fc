use anyhow::Context;
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub slug: String,
}

/// Tag attached to a recipe; used when hydrating recipe lists.
#[derive(Debug, Clone, FromRow)]
pub struct RecipeTagRow {
    pub recipe_id: Uuid,
    #[sqlx(flatten)]
    pub tag: Tag,
}

pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Tag>> {
    let rows = sqlx::query_as::<_, Tag>("SELECT id, name, color, slug FROM tags ORDER BY name")
        .fetch_all(db)
        .await
        .context("list tags")?;
    Ok(rows)
}

pub async fn get(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Tag>> {
    let row = sqlx::query_as::<_, Tag>("SELECT id, name, color, slug FROM tags WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
        .context("get tag")?;
    Ok(row)
}

pub async fn for_recipes(db: &PgPool, recipe_ids: &[Uuid]) -> anyhow::Result<Vec<RecipeTagRow>> {
    let rows = sqlx::query_as::<_, RecipeTagRow>(
        r#"
        SELECT rt.recipe_id, t.id, t.name, t.color, t.slug
          FROM recipe_tags rt
          JOIN tags t ON t.id = rt.tag_id
         WHERE rt.recipe_id = ANY($1)
         ORDER BY t.name
        "#,
    )
    .bind(recipe_ids)
    .fetch_all(db)
    .await
    .context("load tags for recipes")?;
    Ok(rows)
}

/// Ids from `ids` that do not name an existing tag.
pub async fn missing_tx(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
) -> anyhow::Result<Vec<Uuid>> {
    let missing = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT wanted.id
          FROM UNNEST($1::uuid[]) AS wanted(id)
         WHERE NOT EXISTS (SELECT 1 FROM tags t WHERE t.id = wanted.id)
        "#,
    )
    .bind(ids)
    .fetch_all(&mut **tx)
    .await
    .context("check tag ids")?;
    Ok(missing)
}
