use anyhow::Context;
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Ingredient {
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
}

/// Escapes LIKE wildcards so user input matches literally, then appends `%`.
pub fn prefix_pattern(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

pub async fn list(db: &PgPool, name_prefix: Option<&str>) -> anyhow::Result<Vec<Ingredient>> {
    let pattern = name_prefix
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(prefix_pattern);
    let rows = sqlx::query_as::<_, Ingredient>(
        r#"
        SELECT id, name, measurement_unit
          FROM ingredients
         WHERE $1::text IS NULL OR name ILIKE $1
         ORDER BY name, measurement_unit
        "#,
    )
    .bind(pattern)
    .fetch_all(db)
    .await
    .context("list ingredients")?;
    Ok(rows)
}

pub async fn get(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Ingredient>> {
    let row = sqlx::query_as::<_, Ingredient>(
        "SELECT id, name, measurement_unit FROM ingredients WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .context("get ingredient")?;
    Ok(row)
}

/// Ids from `ids` that do not name an existing ingredient.
pub async fn missing_tx(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
) -> anyhow::Result<Vec<Uuid>> {
    let missing = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT wanted.id
          FROM UNNEST($1::uuid[]) AS wanted(id)
         WHERE NOT EXISTS (SELECT 1 FROM ingredients i WHERE i.id = wanted.id)
        "#,
    )
    .bind(ids)
    .fetch_all(&mut **tx)
    .await
    .context("check ingredient ids")?;
    Ok(missing)
}
