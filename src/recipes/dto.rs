use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, pagination::PageParams, tags::repo::Tag, users::dto::UserResponse};

/// One ingredient line of a recipe write payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct IngredientAmount {
    pub id: Uuid,
    pub amount: i32,
}

/// Flat write shape used by create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeWrite {
    #[serde(default)]
    pub ingredients: Vec<IngredientAmount>,
    #[serde(default)]
    pub tags: Vec<Uuid>,
    pub image: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text: String,
    pub cooking_time: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeIngredientRead {
    pub id: Uuid,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

/// Nested read shape.
#[derive(Debug, Serialize)]
pub struct RecipeRead {
    pub id: Uuid,
    pub tags: Vec<Tag>,
    pub author: UserResponse,
    pub ingredients: Vec<RecipeIngredientRead>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShortRecipe {
    pub id: Uuid,
    pub name: String,
    pub image: String,
    pub cooking_time: i32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecipeFilter {
    pub author: Option<Uuid>,
    pub tags: Vec<String>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

#[derive(Debug, Default)]
pub struct RecipeQuery {
    pub filter: RecipeFilter,
    pub page: PageParams,
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" | "" => Ok(false),
        _ => Err(ApiError::validation(format!("{key} must be 0 or 1"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::validation(format!("{key} must be a number")))
}

impl RecipeQuery {
    /// Builds the query from raw pairs so that `tags` may repeat.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, ApiError> {
        let mut q = RecipeQuery::default();
        for (key, value) in pairs {
            match key.as_str() {
                "author" => {
                    let id = Uuid::parse_str(value.trim())
                        .map_err(|_| ApiError::validation("author must be a user id"))?;
                    q.filter.author = Some(id);
                }
                "tags" => {
                    let slug = value.trim();
                    if !slug.is_empty() && !q.filter.tags.iter().any(|t| t == slug) {
                        q.filter.tags.push(slug.to_string());
                    }
                }
                "is_favorited" => q.filter.is_favorited = parse_flag(&key, &value)?,
                "is_in_shopping_cart" => q.filter.is_in_shopping_cart = parse_flag(&key, &value)?,
                "page" => q.page.page = Some(parse_number(&key, &value)?),
                "limit" => q.page.limit = Some(parse_number(&key, &value)?),
                _ => {}
            }
        }
        Ok(q)
    }
}
