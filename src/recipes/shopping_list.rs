//! Shopping-list export: every ingredient line of the recipes in a user's cart,
//! grouped by (name, unit) with amounts summed.

use std::collections::BTreeMap;
use std::fmt::Write;

use anyhow::Context;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

pub const FILE_NAME: &str = "shopping_list.txt";
const HEADING: &str = "Shopping list:\n";

#[derive(Debug, Clone, FromRow)]
pub struct CartLine {
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShoppingListItem {
    pub name: String,
    pub measurement_unit: String,
    pub total: i64,
}

/// Ingredient lines of every recipe in the user's cart, one row per line item.
pub async fn cart_lines(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<CartLine>> {
    let rows = sqlx::query_as::<_, CartLine>(
        r#"
        SELECT i.name, i.measurement_unit, ir.amount
          FROM ingredient_recipe ir
          JOIN ingredients i ON i.id = ir.ingredient_id
         WHERE ir.recipe_id IN (SELECT recipe_id FROM shopping_cart WHERE user_id = $1)
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("load shopping cart lines")?;
    Ok(rows)
}

/// Sums amounts per (name, unit), ordered alphabetically by name (ignoring case) then unit.
pub fn aggregate(lines: impl IntoIterator<Item = CartLine>) -> Vec<ShoppingListItem> {
    let mut groups: BTreeMap<(String, String, String), i64> = BTreeMap::new();
    for line in lines {
        let key = (line.name.to_lowercase(), line.name, line.measurement_unit);
        *groups.entry(key).or_insert(0) += i64::from(line.amount);
    }
    groups
        .into_iter()
        .map(|((_, name, measurement_unit), total)| ShoppingListItem {
            name,
            measurement_unit,
            total,
        })
        .collect()
}

pub fn render(items: &[ShoppingListItem]) -> String {
    let mut out = String::from(HEADING);
    for item in items {
        // writing into a String cannot fail
        let _ = writeln!(out, "{}: {}{}.", item.name, item.total, item.measurement_unit);
    }
    out
}

pub async fn build(db: &PgPool, user_id: Uuid) -> anyhow::Result<String> {
    let items = aggregate(cart_lines(db, user_id).await?);
    Ok(render(&items))
}
