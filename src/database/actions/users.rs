use crate::{
    authentication::{
        cryptography::{hash_password, verify_password},
        jwt::{generate_jwt_session, SessionKey},
    },
    database::{
        actions::relations::{is_related, Relation},
        error::{query_error, QueryError},
        form::Registration,
        pagination::{PageContext, PageRequest},
    },
    error::{Error, ValidationErrors},
    schema::{Id, Recipe, User, UserRow},
    views::{ShortRecipeView, SubscriptionView, UserView},
};

use sqlx::{postgres::PgArguments, query::QueryScalar, Pool, Postgres};

pub async fn get_user(pool: &Pool<Postgres>, username: &str) -> Result<Option<User>, Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await
        .map_err(query_error)?;

    Ok(row)
}

pub async fn get_user_by_id(pool: &Pool<Postgres>, user_id: Id) -> Result<Option<User>, Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(query_error)?;

    Ok(row)
}

pub async fn require_user(pool: &Pool<Postgres>, user_id: Id) -> Result<User, Error> {
    get_user_by_id(pool, user_id)
        .await?
        .ok_or_else(|| Error::not_found("User"))
}

/// Creates a user with a hashed password.
pub async fn register_user(
    registration: Registration,
    pool: &Pool<Postgres>,
) -> Result<User, Error> {
    let password = hash_password(&registration.password)?;

    let result: Result<User, sqlx::Error> = sqlx::query_as(
        "
        INSERT INTO users (email, username, first_name, last_name, password)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *;
    ",
    )
    .bind(&registration.email)
    .bind(&registration.username)
    .bind(&registration.first_name)
    .bind(&registration.last_name)
    .bind(password)
    .fetch_one(pool)
    .await;

    match result {
        Ok(user) => {
            log::info!("Registered user {}", registration.username);
            Ok(user)
        }
        Err(e) => {
            let e = QueryError::from(e);
            if e.is_unique_violation() {
                Err(ValidationErrors::single(
                    "username",
                    "A user with that username or email already exists.",
                )
                .into())
            } else {
                Err(e.into())
            }
        }
    }
}

pub async fn login_user(
    username: &str,
    password: &str,
    key: &SessionKey,
    pool: &Pool<Postgres>,
) -> Result<String, Error> {
    let invalid = || Error::from(ValidationErrors::single("non_field_errors", "Invalid credentials"));

    let user = get_user(pool, username).await?.ok_or_else(invalid)?;
    if !verify_password(password, &user.password)? {
        return Err(invalid());
    }

    generate_jwt_session(&user, key)
}

pub async fn user_view(
    user: User,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<UserView, Error> {
    let is_subscribed = is_related(pool, Relation::Follow, viewer, user.id).await?;

    Ok(UserView::new(user, is_subscribed))
}

pub async fn fetch_users(
    page: PageRequest,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<PageContext<UserView>, Error> {
    let rows: Vec<UserRow> =
        sqlx::query_as("SELECT u.*, COUNT(*) OVER() AS count FROM users u ORDER BY u.id LIMIT $1 OFFSET $2")
            .bind(page.limit)
            .bind(page.offset())
            .fetch_all(pool)
            .await
            .map_err(query_error)?;

    let total_count = match rows.first() {
        Some(row) => row.count,
        None if page.page > 1 => {
            count_rows(sqlx::query_scalar("SELECT COUNT(*) FROM users"), pool).await?
        }
        None => 0,
    };
    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        results.push(user_view(row.into(), viewer, pool).await?);
    }

    Ok(PageContext::from_rows(results, total_count, page))
}

pub async fn subscription_view(
    author: User,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<SubscriptionView, Error> {
    let recipes: Vec<Recipe> = sqlx::query_as(
        "SELECT * FROM recipes WHERE author_id = $1 ORDER BY id DESC LIMIT $2",
    )
    .bind(author.id)
    .bind(recipes_limit.filter(|l| *l >= 0))
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recipes WHERE author_id = $1")
        .bind(author.id)
        .fetch_one(pool)
        .await
        .map_err(query_error)?;

    Ok(SubscriptionView {
        user: UserView::new(author, true),
        recipes: recipes.into_iter().map(ShortRecipeView::from).collect(),
        recipes_count: count.0,
    })
}

/// Authors the viewer follows, newest subscription first.
pub async fn fetch_subscriptions(
    follower_id: Id,
    page: PageRequest,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<PageContext<SubscriptionView>, Error> {
    let rows: Vec<UserRow> = sqlx::query_as(
        "
        SELECT u.*, COUNT(*) OVER() AS count
        FROM follows f
        INNER JOIN users u ON u.id = f.following_id
        WHERE f.follower_id = $1
        ORDER BY f.id DESC
        LIMIT $2 OFFSET $3
    ",
    )
    .bind(follower_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .map_err(query_error)?;

    let total_count = match rows.first() {
        Some(row) => row.count,
        None if page.page > 1 => {
            let query = sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE follower_id = $1")
                .bind(follower_id);
            count_rows(query, pool).await?
        }
        None => 0,
    };
    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        results.push(subscription_view(row.into(), recipes_limit, pool).await?);
    }

    Ok(PageContext::from_rows(results, total_count, page))
}

async fn count_rows<'q>(
    query: QueryScalar<'q, Postgres, i64, PgArguments>,
    pool: &Pool<Postgres>,
) -> Result<i64, Error> {
    query.fetch_one(pool).await.map_err(query_error)
}
