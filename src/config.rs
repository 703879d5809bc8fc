use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Lower bounds enforced on recipe payloads.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RecipeLimits {
    pub min_cooking_time: i32,
    pub min_amount: i32,
}

impl RecipeLimits {
    /// The schema rejects cooking times and amounts below 1, so no lower minimum is allowed.
    pub fn checked(self) -> anyhow::Result<Self> {
        anyhow::ensure!(
            self.min_cooking_time >= 1,
            "RECIPE_MIN_COOKING_TIME must be at least 1, got {}",
            self.min_cooking_time
        );
        anyhow::ensure!(
            self.min_amount >= 1,
            "RECIPE_MIN_AMOUNT must be at least 1, got {}",
            self.min_amount
        );
        Ok(self)
    }
}

impl Default for RecipeLimits {
    fn default() -> Self {
        Self {
            min_cooking_time: 1,
            min_amount: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub minio_region: String,
    pub recipes: RecipeLimits,
    pub page_size: i64,
    pub image_url_ttl_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "recipebook".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "recipebook-users".into()),
            ttl_minutes: parse_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: parse_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let defaults = RecipeLimits::default();
        let recipes = RecipeLimits {
            min_cooking_time: parse_or("RECIPE_MIN_COOKING_TIME", defaults.min_cooking_time),
            min_amount: parse_or("RECIPE_MIN_AMOUNT", defaults.min_amount),
        }
        .checked()?;
        Ok(Self {
            database_url,
            jwt,
            minio_endpoint: required("MINIO_ENDPOINT")?,
            minio_bucket: required("MINIO_BUCKET")?,
            minio_access_key: required("MINIO_ACCESS_KEY")?,
            minio_secret_key: required("MINIO_SECRET_KEY")?,
            minio_region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".into()),
            recipes,
            page_size: parse_or("PAGE_SIZE", 6),
            image_url_ttl_secs: parse_or("IMAGE_URL_TTL_SECS", 30 * 60),
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_on_missing_or_garbage() {
        assert_eq!(parse_or("RECIPEBOOK_TEST_UNSET_VARIABLE", 42i64), 42);
        std::env::set_var("RECIPEBOOK_TEST_GARBAGE_VARIABLE", "not-a-number");
        assert_eq!(parse_or("RECIPEBOOK_TEST_GARBAGE_VARIABLE", 7i32), 7);
        std::env::set_var("RECIPEBOOK_TEST_NUMERIC_VARIABLE", "15");
        assert_eq!(parse_or("RECIPEBOOK_TEST_NUMERIC_VARIABLE", 7i32), 15);
    }

    #[test]
    fn recipe_minimums_below_schema_floor_are_rejected() {
        assert!(RecipeLimits::default().checked().is_ok());
        assert!(RecipeLimits { min_cooking_time: 5, min_amount: 2 }.checked().is_ok());

        let err = RecipeLimits { min_cooking_time: 0, min_amount: 1 }
            .checked()
            .unwrap_err();
        assert!(err.to_string().contains("RECIPE_MIN_COOKING_TIME"));

        let err = RecipeLimits { min_cooking_time: 1, min_amount: 0 }
            .checked()
            .unwrap_err();
        assert!(err.to_string().contains("RECIPE_MIN_AMOUNT"));
    }

    #[test]
    fn required_names_the_missing_key() {
        let err = required("RECIPEBOOK_TEST_REQUIRED_MISSING").unwrap_err();
        assert!(err.to_string().contains("RECIPEBOOK_TEST_REQUIRED_MISSING"));
    }
}
