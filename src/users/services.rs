use std::collections::HashMap;

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::password::{check_strength, hash_password, verify_password},
    error::ApiError,
    pagination::{Page, PageParams},
    recipes::{self, repo::ShortRecipeRow},
    state::AppState,
    users::{
        dto::{RegisterRequest, SetPasswordRequest, SubscriptionResponse, SubscriptionsQuery},
        repo::{self, NewUser, SubscriptionRow, User},
    },
};

pub const MAX_NAME_LEN: usize = 150;
const UNIQUE_VIOLATION: &str = "23505";

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn check_name(field: &str, value: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::validation(format!(
            "{field} must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Trims and lower-cases the payload, then checks every field.
pub fn normalize_registration(mut req: RegisterRequest) -> Result<RegisterRequest, ApiError> {
    req.email = req.email.trim().to_lowercase();
    req.username = req.username.trim().to_string();
    req.first_name = req.first_name.trim().to_string();
    req.last_name = req.last_name.trim().to_string();

    if !is_valid_email(&req.email) {
        return Err(ApiError::validation("Invalid email"));
    }
    check_name("username", &req.username)?;
    if !USERNAME_RE.is_match(&req.username) {
        return Err(ApiError::validation(
            "username may contain only letters, digits and @/./+/-/_",
        ));
    }
    check_name("first_name", &req.first_name)?;
    check_name("last_name", &req.last_name)?;
    check_strength(&req.password)?;
    Ok(req)
}

pub async fn register(state: &AppState, req: RegisterRequest) -> Result<User, ApiError> {
    let req = normalize_registration(req)?;

    let (email_taken, username_taken) = User::taken(&state.db, &req.email, &req.username).await?;
    if email_taken {
        warn!(email = %req.email, "email already registered");
        return Err(ApiError::Conflict("Email already registered".into()));
    }
    if username_taken {
        warn!(username = %req.username, "username already taken");
        return Err(ApiError::Conflict("Username already taken".into()));
    }

    let hash = hash_password(&req.password)?;
    let new = NewUser {
        email: &req.email,
        username: &req.username,
        first_name: &req.first_name,
        last_name: &req.last_name,
        password_hash: &hash,
    };
    let user = match User::create(&state.db, &new).await {
        Ok(u) => u,
        Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            return Err(ApiError::Conflict("User already registered".into()));
        }
        Err(e) => return Err(anyhow::Error::new(e).context("create user").into()),
    };

    info!(user_id = %user.id, "user registered");
    Ok(user)
}

pub async fn set_password(
    state: &AppState,
    user_id: Uuid,
    req: SetPasswordRequest,
) -> Result<(), ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;

    if !verify_password(&req.current_password, &user.password_hash)? {
        return Err(ApiError::validation("Invalid current password"));
    }
    check_strength(&req.new_password)?;

    let hash = hash_password(&req.new_password)?;
    User::set_password_hash(&state.db, user_id, &hash).await?;
    info!(user_id = %user_id, "password changed");
    Ok(())
}

pub fn ensure_not_self(user_id: Uuid, author_id: Uuid) -> Result<(), ApiError> {
    if user_id == author_id {
        return Err(ApiError::validation("You cannot subscribe to yourself"));
    }
    Ok(())
}

async fn ensure_user_exists(state: &AppState, id: Uuid) -> Result<(), ApiError> {
    match User::find_by_id(&state.db, id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::not_found("User not found")),
    }
}

pub async fn subscribe(
    state: &AppState,
    user_id: Uuid,
    author_id: Uuid,
    recipes_limit: Option<usize>,
) -> Result<SubscriptionResponse, ApiError> {
    ensure_not_self(user_id, author_id)?;
    ensure_user_exists(state, author_id).await?;

    if !repo::insert_follow(&state.db, user_id, author_id).await? {
        return Err(ApiError::validation("Subscription already exists"));
    }
    info!(user_id = %user_id, author_id = %author_id, "subscribed");

    let row = repo::subscription(&state.db, user_id, author_id)
        .await?
        .context("subscription vanished after insert")?;
    let mut out = with_recipe_previews(state, vec![row], recipes_limit).await?;
    Ok(out.remove(0))
}

pub async fn unsubscribe(state: &AppState, user_id: Uuid, author_id: Uuid) -> Result<(), ApiError> {
    ensure_user_exists(state, author_id).await?;
    if !repo::delete_follow(&state.db, user_id, author_id).await? {
        return Err(ApiError::validation("You are not subscribed to this user"));
    }
    info!(user_id = %user_id, author_id = %author_id, "unsubscribed");
    Ok(())
}

pub async fn subscriptions(
    state: &AppState,
    user_id: Uuid,
    q: SubscriptionsQuery,
) -> Result<Page<SubscriptionResponse>, ApiError> {
    let params = PageParams {
        page: q.page,
        limit: q.limit,
    };
    let page_size = state.config.page_size;
    let (count, rows) = repo::list_subscriptions(
        &state.db,
        user_id,
        params.limit(page_size),
        params.offset(page_size),
    )
    .await?;
    let results = with_recipe_previews(state, rows, q.recipes_limit).await?;
    Ok(Page { count, results })
}

/// Buckets recipes by author, keeping the incoming order within each author.
pub fn group_by_author(recipes: Vec<ShortRecipeRow>) -> HashMap<Uuid, Vec<ShortRecipeRow>> {
    let mut grouped: HashMap<Uuid, Vec<ShortRecipeRow>> = HashMap::new();
    for r in recipes {
        grouped.entry(r.author_id).or_default().push(r);
    }
    grouped
}

async fn with_recipe_previews(
    state: &AppState,
    rows: Vec<SubscriptionRow>,
    recipes_limit: Option<usize>,
) -> anyhow::Result<Vec<SubscriptionResponse>> {
    let author_ids: Vec<Uuid> = rows.iter().map(|r| r.profile.id).collect();
    let per_author = recipes_limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
    let recipes =
        recipes::repo::short_recipes_by_authors(&state.db, &author_ids, per_author).await?;
    let mut previews = group_by_author(recipes);

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut short = Vec::new();
        for r in previews.remove(&row.profile.id).unwrap_or_default() {
            short.push(recipes::services::short_recipe(state, r).await?);
        }
        out.push(SubscriptionResponse {
            user: row.profile.into(),
            recipes: short,
            recipes_count: row.recipes_count,
        });
    }
    Ok(out)
}
