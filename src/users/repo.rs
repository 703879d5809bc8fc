use anyhow::Context;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String, // argon2
    pub created_at: OffsetDateTime,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password_hash: &'a str,
}

/// A user as seen by a (possibly anonymous) viewer.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

/// A followed author with the number of recipes they published.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    #[sqlx(flatten)]
    pub profile: ProfileRow,
    pub recipes_count: i64,
}

const USER_COLUMNS: &str =
    "id, email, username, first_name, last_name, password_hash, created_at";

// $1 is the viewer (NULL for anonymous)
const PROFILE_SELECT: &str = r#"
    SELECT u.id, u.email, u.username, u.first_name, u.last_name,
           EXISTS (
               SELECT 1 FROM follows f WHERE f.author_id = u.id AND f.user_id = $1
           ) AS is_subscribed
      FROM users u
"#;

impl User {
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    /// Returns which of (email, username) are already registered.
    pub async fn taken(db: &PgPool, email: &str, username: &str) -> anyhow::Result<(bool, bool)> {
        let row = sqlx::query_as::<_, (bool, bool)>(
            r#"
            SELECT EXISTS (SELECT 1 FROM users WHERE email = $1),
                   EXISTS (SELECT 1 FROM users WHERE username = $2)
            "#,
        )
        .bind(email)
        .bind(username)
        .fetch_one(db)
        .await
        .context("check user uniqueness")?;
        Ok(row)
    }

    pub async fn create(db: &PgPool, new: &NewUser<'_>) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, username, first_name, last_name, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(new.email)
        .bind(new.username)
        .bind(new.first_name)
        .bind(new.last_name)
        .bind(new.password_hash)
        .fetch_one(db)
        .await
    }

    pub async fn set_password_hash(db: &PgPool, id: Uuid, hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(db)
            .await
            .context("update password hash")?;
        Ok(())
    }
}

pub async fn profile(
    db: &PgPool,
    viewer: Option<Uuid>,
    id: Uuid,
) -> anyhow::Result<Option<ProfileRow>> {
    let row = sqlx::query_as::<_, ProfileRow>(&format!("{PROFILE_SELECT} WHERE u.id = $2"))
        .bind(viewer)
        .bind(id)
        .fetch_optional(db)
        .await
        .context("load profile")?;
    Ok(row)
}

pub async fn profiles_by_ids(
    db: &PgPool,
    viewer: Option<Uuid>,
    ids: &[Uuid],
) -> anyhow::Result<Vec<ProfileRow>> {
    let rows = sqlx::query_as::<_, ProfileRow>(&format!("{PROFILE_SELECT} WHERE u.id = ANY($2)"))
        .bind(viewer)
        .bind(ids)
        .fetch_all(db)
        .await
        .context("load profiles by ids")?;
    Ok(rows)
}

pub async fn list_profiles(
    db: &PgPool,
    viewer: Option<Uuid>,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(i64, Vec<ProfileRow>)> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(db)
        .await
        .context("count users")?;
    let rows = sqlx::query_as::<_, ProfileRow>(&format!(
        "{PROFILE_SELECT} ORDER BY u.username LIMIT $2 OFFSET $3"
    ))
    .bind(viewer)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .context("list profiles")?;
    Ok((count, rows))
}

// ---- Follows ----

/// Inserts the follow edge. `false` means it already existed.
pub async fn insert_follow(db: &PgPool, user_id: Uuid, author_id: Uuid) -> anyhow::Result<bool> {
    let res = sqlx::query(
        r#"
        INSERT INTO follows (user_id, author_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id, author_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(author_id)
    .execute(db)
    .await
    .context("insert follow")?;
    Ok(res.rows_affected() == 1)
}

/// Deletes the follow edge. `false` means there was none.
pub async fn delete_follow(db: &PgPool, user_id: Uuid, author_id: Uuid) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM follows WHERE user_id = $1 AND author_id = $2")
        .bind(user_id)
        .bind(author_id)
        .execute(db)
        .await
        .context("delete follow")?;
    Ok(res.rows_affected() > 0)
}

const SUBSCRIPTION_SELECT: &str = r#"
    SELECT u.id, u.email, u.username, u.first_name, u.last_name,
           TRUE AS is_subscribed,
           (SELECT COUNT(*) FROM recipes r WHERE r.author_id = u.id) AS recipes_count
      FROM follows f
      JOIN users u ON u.id = f.author_id
     WHERE f.user_id = $1
"#;

pub async fn subscription(
    db: &PgPool,
    user_id: Uuid,
    author_id: Uuid,
) -> anyhow::Result<Option<SubscriptionRow>> {
    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        "{SUBSCRIPTION_SELECT} AND f.author_id = $2"
    ))
    .bind(user_id)
    .bind(author_id)
    .fetch_optional(db)
    .await
    .context("load subscription")?;
    Ok(row)
}

pub async fn list_subscriptions(
    db: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(i64, Vec<SubscriptionRow>)> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM follows WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await
        .context("count subscriptions")?;
    let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
        "{SUBSCRIPTION_SELECT} ORDER BY u.username LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .context("list subscriptions")?;
    Ok((count, rows))
}
