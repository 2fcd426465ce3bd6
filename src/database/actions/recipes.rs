use sqlx::{Pool, Postgres, QueryBuilder, Transaction};

use crate::{
    authentication::permissions::ActionType,
    database::{
        actions::{
            ingredients::list_recipe_parts,
            relations::{is_related, Relation},
            tags::list_recipe_tags,
            users::{require_user, user_view},
        },
        error::{query_error, QueryError},
        form::RecipeDraft,
        pagination::{PageContext, PageRequest},
    },
    error::{Error, ValidationErrors},
    jwt::SessionData,
    media::MediaStore,
    schema::{Id, Recipe, RecipeRow},
    views::{RecipeView, ViewerFlags},
};

/// Recipe list filters, all scoped to the viewer where it matters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeFilter {
    pub author: Option<Id>,
    pub tags: Vec<String>,
    pub is_favorited: Option<bool>,
    pub is_in_shopping_cart: Option<bool>,
}

impl RecipeFilter {
    /// Reads `author`, repeated `tags`, `is_favorited` and `is_in_shopping_cart`.
    pub fn from_query(pairs: &[(String, String)]) -> Result<Self, Error> {
        let mut filter = Self::default();
        let mut errors = ValidationErrors::new();

        for (key, value) in pairs {
            match key.as_str() {
                "author" => match value.parse::<Id>() {
                    Ok(author) => filter.author = Some(author),
                    Err(_) => errors.add("author", "Author must be a user id"),
                },
                "tags" => {
                    if !value.is_empty() {
                        filter.tags.push(value.to_owned());
                    }
                }
                "is_favorited" => match parse_flag(value) {
                    Some(flag) => filter.is_favorited = Some(flag),
                    None => errors.add("is_favorited", "Expected 0, 1, true or false"),
                },
                "is_in_shopping_cart" => match parse_flag(value) {
                    Some(flag) => filter.is_in_shopping_cart = Some(flag),
                    None => errors.add("is_in_shopping_cart", "Expected 0, 1, true or false"),
                },
                _ => {}
            }
        }

        errors.into_result()?;
        Ok(filter)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// Anonymous viewers asking for their favorites get nothing; asking for
/// non-favorites is the same as not filtering.
fn push_relation_filter(
    query: &mut QueryBuilder<'_, Postgres>,
    relation: Relation,
    flag: Option<bool>,
    viewer: Option<Id>,
) {
    match (flag, viewer) {
        (None, _) | (Some(false), None) => {}
        (Some(true), None) => {
            query.push(" AND FALSE");
        }
        (Some(flag), Some(user_id)) => {
            query
                .push(if flag { " AND EXISTS" } else { " AND NOT EXISTS" })
                .push(format!(
                    " (SELECT 1 FROM {} x WHERE x.{} = r.id AND x.{} = ",
                    relation.table(),
                    relation.object_column(),
                    relation.subject_column()
                ))
                .push_bind(user_id)
                .push(")");
        }
    }
}

pub async fn get_recipe(id: Id, pool: &Pool<Postgres>) -> Result<Option<Recipe>, Error> {
    let row: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(query_error)?;

    Ok(row)
}

pub async fn require_recipe(id: Id, pool: &Pool<Postgres>) -> Result<Recipe, Error> {
    get_recipe(id, pool)
        .await?
        .ok_or_else(|| Error::not_found("Recipe"))
}

/// Loads a recipe the session may modify: its own, or any for admins.
pub async fn get_recipe_mut(
    id: Id,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<Recipe, Error> {
    let recipe = require_recipe(id, pool).await?;
    session.authenticate(ActionType::ManageOwnRecipes)?;

    match session.authenticate(ActionType::ManageAllRecipes) {
        Ok(_) => Ok(recipe),
        Err(_) => {
            if recipe.author_id != session.user_id {
                Err(Error::Unauthorized(String::from(
                    "Only the author can change this recipe",
                )))
            } else {
                Ok(recipe)
            }
        }
    }
}

pub async fn recipe_view(
    recipe: Recipe,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<RecipeView, Error> {
    let author = require_user(pool, recipe.author_id).await?;
    let author = user_view(author, viewer, pool).await?;
    let tags = list_recipe_tags(recipe.id, pool).await?;
    let ingredients = list_recipe_parts(recipe.id, pool).await?;

    let flags = ViewerFlags {
        is_favorited: is_related(pool, Relation::Favorite, viewer, recipe.id).await?,
        is_in_shopping_cart: is_related(pool, Relation::Cart, viewer, recipe.id).await?,
    };

    Ok(RecipeView::new(recipe, author, tags, ingredients, flags))
}

fn push_recipe_filters(
    query: &mut QueryBuilder<Postgres>,
    filter: &RecipeFilter,
    viewer: Option<Id>,
) {
    if let Some(author) = filter.author {
        query.push(" AND r.author_id = ").push_bind(author);
    }
    if !filter.tags.is_empty() {
        query
            .push(
                " AND EXISTS (SELECT 1 FROM recipe_tags rt INNER JOIN tags t ON t.id = rt.tag_id \
                 WHERE rt.recipe_id = r.id AND t.slug = ANY(",
            )
            .push_bind(filter.tags.clone())
            .push("))");
    }
    push_relation_filter(query, Relation::Favorite, filter.is_favorited, viewer);
    push_relation_filter(query, Relation::Cart, filter.is_in_shopping_cart, viewer);
}

pub async fn fetch_recipes(
    filter: &RecipeFilter,
    page: PageRequest,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<PageContext<RecipeView>, Error> {
    let mut query: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT r.*, COUNT(*) OVER() AS count FROM recipes r WHERE TRUE");
    push_recipe_filters(&mut query, filter, viewer);
    query
        .push(" ORDER BY r.id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows: Vec<RecipeRow> = query
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(query_error)?;

    let total_count = match rows.first() {
        Some(row) => row.count,
        None if page.page > 1 => count_recipes(filter, viewer, pool).await?,
        None => 0,
    };
    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        results.push(recipe_view(row.into(), viewer, pool).await?);
    }

    Ok(PageContext::from_rows(results, total_count, page))
}

/// Total for a page past the end, where the window count has no row to ride on.
async fn count_recipes(
    filter: &RecipeFilter,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<i64, Error> {
    let mut query: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM recipes r WHERE TRUE");
    push_recipe_filters(&mut query, filter, viewer);

    query
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .map_err(query_error)
}

async fn find_recipe(
    author_id: Id,
    name: &str,
    exclude: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<Option<Id>, Error> {
    let row: Option<(Id,)> = sqlx::query_as(
        "SELECT id FROM recipes WHERE author_id = $1 AND name = $2 AND id IS DISTINCT FROM $3",
    )
    .bind(author_id)
    .bind(name)
    .bind(exclude)
    .fetch_optional(pool)
    .await
    .map_err(query_error)?;

    Ok(row.map(|r| r.0))
}

fn write_error(e: sqlx::Error) -> Error {
    let e = QueryError::from(e);
    if e.is_unique_violation() {
        Error::DuplicateRecipeName
    } else {
        e.into()
    }
}

/// Unknown tag or ingredient ids are reported as field errors.
async fn check_references(
    draft: &RecipeDraft,
    tr: &mut Transaction<'_, Postgres>,
) -> Result<(), Error> {
    let mut errors = ValidationErrors::new();

    let known_tags: Vec<(Id,)> = sqlx::query_as("SELECT id FROM tags WHERE id = ANY($1)")
        .bind(&draft.tags)
        .fetch_all(&mut **tr)
        .await
        .map_err(query_error)?;
    for id in &draft.tags {
        if !known_tags.iter().any(|(known,)| known == id) {
            errors.add("tags", format!("Tag {id} does not exist"));
        }
    }

    let ingredient_ids: Vec<Id> = draft.ingredients.iter().map(|(id, _)| *id).collect();
    let known_ingredients: Vec<(Id,)> =
        sqlx::query_as("SELECT id FROM ingredients WHERE id = ANY($1)")
            .bind(&ingredient_ids)
            .fetch_all(&mut **tr)
            .await
            .map_err(query_error)?;
    for id in &ingredient_ids {
        if !known_ingredients.iter().any(|(known,)| known == id) {
            errors.add("ingredients", format!("Ingredient {id} does not exist"));
        }
    }

    errors.into_result()
}

/// Replaces the tag and ingredient rows of a recipe, keeping the submitted order.
async fn write_recipe_parts(
    recipe_id: Id,
    draft: &RecipeDraft,
    tr: &mut Transaction<'_, Postgres>,
) -> Result<(), Error> {
    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tr)
        .await
        .map_err(query_error)?;

    sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
        .bind(recipe_id)
        .execute(&mut **tr)
        .await
        .map_err(query_error)?;

    sqlx::query(
        "
        INSERT INTO recipe_tags (recipe_id, tag_id)
        SELECT $1, t.tag_id
        FROM UNNEST($2::int4[]) WITH ORDINALITY AS t(tag_id, position)
        ORDER BY t.position
    ",
    )
    .bind(recipe_id)
    .bind(&draft.tags)
    .execute(&mut **tr)
    .await
    .map_err(query_error)?;

    let (ids, amounts): (Vec<Id>, Vec<i32>) = draft.ingredients.iter().copied().unzip();
    sqlx::query(
        "
        INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount)
        SELECT $1, t.ingredient_id, t.amount
        FROM UNNEST($2::int4[], $3::int4[]) WITH ORDINALITY AS t(ingredient_id, amount, position)
        ORDER BY t.position
    ",
    )
    .bind(recipe_id)
    .bind(ids)
    .bind(amounts)
    .execute(&mut **tr)
    .await
    .map_err(query_error)?;

    Ok(())
}

async fn insert_recipe(
    draft: &RecipeDraft,
    author_id: Id,
    image: &str,
    pool: &Pool<Postgres>,
) -> Result<Recipe, Error> {
    let mut tr = pool.begin().await.map_err(query_error)?;

    check_references(draft, &mut tr).await?;

    let recipe: Recipe = sqlx::query_as(
        "
        INSERT INTO recipes (author_id, name, text, cooking_time, image)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
    ",
    )
    .bind(author_id)
    .bind(&draft.name)
    .bind(&draft.text)
    .bind(draft.cooking_time)
    .bind(image)
    .fetch_one(&mut *tr)
    .await
    .map_err(write_error)?;

    write_recipe_parts(recipe.id, draft, &mut tr).await?;

    tr.commit().await.map_err(query_error)?;
    Ok(recipe)
}

/// Stores the image, then writes the recipe with all of its tag and
/// ingredient rows in one transaction.
pub async fn create_recipe(
    draft: RecipeDraft,
    author_id: Id,
    media: &MediaStore,
    pool: &Pool<Postgres>,
) -> Result<Recipe, Error> {
    let image = draft
        .image
        .as_ref()
        .ok_or_else(|| Error::from(ValidationErrors::single("image", "This field is required.")))?;

    if find_recipe(author_id, &draft.name, None, pool).await?.is_some() {
        return Err(Error::DuplicateRecipeName);
    }

    let path = media.save(image).await?;
    match insert_recipe(&draft, author_id, &path, pool).await {
        Ok(recipe) => {
            log::info!("Recipe {} created by user {author_id}", recipe.id);
            Ok(recipe)
        }
        Err(e) => {
            media.remove(&path).await;
            Err(e)
        }
    }
}

async fn replace_recipe(
    recipe: &Recipe,
    draft: &RecipeDraft,
    image: &str,
    pool: &Pool<Postgres>,
) -> Result<Recipe, Error> {
    let mut tr = pool.begin().await.map_err(query_error)?;

    check_references(draft, &mut tr).await?;

    let updated: Recipe = sqlx::query_as(
        "
        UPDATE recipes SET name = $1, text = $2, cooking_time = $3, image = $4
        WHERE id = $5
        RETURNING *
    ",
    )
    .bind(&draft.name)
    .bind(&draft.text)
    .bind(draft.cooking_time)
    .bind(image)
    .bind(recipe.id)
    .fetch_one(&mut *tr)
    .await
    .map_err(write_error)?;

    write_recipe_parts(recipe.id, draft, &mut tr).await?;

    tr.commit().await.map_err(query_error)?;
    Ok(updated)
}

pub async fn update_recipe(
    recipe: Recipe,
    draft: RecipeDraft,
    media: &MediaStore,
    pool: &Pool<Postgres>,
) -> Result<Recipe, Error> {
    if find_recipe(recipe.author_id, &draft.name, Some(recipe.id), pool)
        .await?
        .is_some()
    {
        return Err(Error::DuplicateRecipeName);
    }

    let new_image = match &draft.image {
        Some(image) => Some(media.save(image).await?),
        None => None,
    };
    let image = new_image.as_deref().unwrap_or(&recipe.image);

    match replace_recipe(&recipe, &draft, image, pool).await {
        Ok(updated) => {
            if new_image.is_some() {
                media.remove(&recipe.image).await;
            }
            log::info!("Recipe {} updated", recipe.id);
            Ok(updated)
        }
        Err(e) => {
            if let Some(path) = &new_image {
                media.remove(path).await;
            }
            Err(e)
        }
    }
}

/// Junction, favorite and cart rows go with the recipe through ON DELETE CASCADE.
pub async fn delete_recipe(
    recipe: Recipe,
    media: &MediaStore,
    pool: &Pool<Postgres>,
) -> Result<(), Error> {
    sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(recipe.id)
        .execute(pool)
        .await
        .map_err(query_error)?;

    media.remove(&recipe.image).await;
    log::info!("Recipe {} deleted", recipe.id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use claims::assert_ok;

    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn filter_reads_repeated_tags_and_flags() {
        let filter = assert_ok!(RecipeFilter::from_query(&pairs(&[
            ("tags", "breakfast"),
            ("tags", "lunch"),
            ("author", "3"),
            ("is_favorited", "1"),
            ("is_in_shopping_cart", "false"),
            ("page", "2"),
        ])));

        assert_eq!(filter.tags, vec!["breakfast", "lunch"]);
        assert_eq!(filter.author, Some(3));
        assert_eq!(filter.is_favorited, Some(true));
        assert_eq!(filter.is_in_shopping_cart, Some(false));
    }

    #[test]
    fn filter_rejects_garbage() {
        let result = RecipeFilter::from_query(&pairs(&[("author", "me"), ("is_favorited", "yes")]));
        match result {
            Err(Error::Validation(errors)) => {
                assert!(errors.contains("author"));
                assert!(errors.contains("is_favorited"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn anonymous_favorites_filter_matches_nothing() {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT 1 FROM recipes r WHERE TRUE");
        push_relation_filter(&mut query, Relation::Favorite, Some(true), None);
        assert!(query.into_sql().ends_with("AND FALSE"));

        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT 1 FROM recipes r WHERE TRUE");
        push_relation_filter(&mut query, Relation::Cart, Some(false), None);
        assert_eq!(query.into_sql(), "SELECT 1 FROM recipes r WHERE TRUE");
    }

    #[test]
    fn viewer_filters_use_relation_table() {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT 1 FROM recipes r WHERE TRUE");
        push_relation_filter(&mut query, Relation::Cart, Some(false), Some(4));

        assert!(query.into_sql().contains(
            "AND NOT EXISTS (SELECT 1 FROM shopping_cart x WHERE x.recipe_id = r.id AND x.user_id = $1)"
        ));
    }
}
