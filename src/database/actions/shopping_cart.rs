use sqlx::{Pool, Postgres};

use crate::{
    database::error::query_error,
    error::Error,
    schema::{CartLine, Id},
    shopping_list::aggregate::{aggregate, ShoppingList},
};

/// Every ingredient line of every recipe in the user's cart, cart order first.
pub async fn list_cart_lines(user_id: Id, pool: &Pool<Postgres>) -> Result<Vec<CartLine>, Error> {
    let rows: Vec<CartLine> = sqlx::query_as(
        "
        SELECT i.name AS name, i.measurement_unit AS measurement_unit, ri.amount AS amount
        FROM shopping_cart c
        INNER JOIN recipe_ingredients ri ON ri.recipe_id = c.recipe_id
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE c.user_id = $1
        ORDER BY c.id, ri.id
    ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    Ok(rows)
}

pub async fn aggregate_shopping_list(
    user_id: Id,
    pool: &Pool<Postgres>,
) -> Result<ShoppingList, Error> {
    let lines = list_cart_lines(user_id, pool).await?;
    let list = aggregate(lines);

    log::debug!("Shopping list for user {user_id} has {} items", list.len());
    Ok(list)
}
