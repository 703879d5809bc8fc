//! Row builders for database-backed tests.

use sqlx::PgPool;
use uuid::Uuid;

pub async fn user(db: &PgPool, username: &str) -> Uuid {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO users (email, username, first_name, last_name, password_hash)
        VALUES ($1, $2, 'Test', 'Cook', 'not-a-real-hash')
        RETURNING id
        "#,
    )
    .bind(format!("{username}@example.com"))
    .bind(username)
    .fetch_one(db)
    .await
    .expect("insert user")
}

pub async fn ingredient(db: &PgPool, name: &str, unit: &str) -> Uuid {
    sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO ingredients (name, measurement_unit) VALUES ($1, $2) RETURNING id",
    )
    .bind(name)
    .bind(unit)
    .fetch_one(db)
    .await
    .expect("insert ingredient")
}

/// One of the seeded tags.
pub async fn tag(db: &PgPool, slug: &str) -> Uuid {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM tags WHERE slug = $1")
        .bind(slug)
        .fetch_one(db)
        .await
        .expect("seeded tag")
}

pub async fn recipe(db: &PgPool, author_id: Uuid, name: &str, lines: &[(Uuid, i32)]) -> Uuid {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO recipes (author_id, name, text, cooking_time, image_key)
        VALUES ($1, $2, 'Cook it.', 10, $3)
        RETURNING id
        "#,
    )
    .bind(author_id)
    .bind(name)
    .bind(format!("recipes/images/{name}.png"))
    .fetch_one(db)
    .await
    .expect("insert recipe");

    for (ingredient_id, amount) in lines {
        sqlx::query("INSERT INTO ingredient_recipe (recipe_id, ingredient_id, amount) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(ingredient_id)
            .bind(amount)
            .execute(db)
            .await
            .expect("insert recipe ingredient");
    }
    id
}

pub async fn add_to_cart(db: &PgPool, user_id: Uuid, recipe_id: Uuid) {
    sqlx::query("INSERT INTO shopping_cart (user_id, recipe_id) VALUES ($1, $2)")
        .bind(user_id)
        .bind(recipe_id)
        .execute(db)
        .await
        .expect("insert cart row");
}
