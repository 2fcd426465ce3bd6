use std::{convert::Infallible, sync::Arc};

use serde::Serialize;
use serde_json::json;
use warp::{
    http::{header, Response, StatusCode},
    reject::Rejection,
    reply::{self, Reply},
};

use crate::{
    authentication::permissions::ActionType,
    constants::{SESSION_COOKIE, SHOPPING_LIST_FILENAME},
    database::{
        actions::{
            ingredients, recipes,
            recipes::RecipeFilter,
            relations::{self, Relation},
            shopping_cart, tags, users,
        },
        form::{FormMode, LoginForm, RecipeForm, RegisterForm},
        pagination::PageRequest,
    },
    error::Error,
    jwt::SessionData,
    schema::Id,
    shopping_list::document,
    state::AppState,
    views::{IngredientView, ShortRecipeView, UserView},
};

pub type Query = Vec<(String, String)>;

fn param<'a>(query: &'a Query, key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn page_request(query: &Query) -> PageRequest {
    PageRequest::from_params(param(query, "page"), param(query, "limit"))
}

/// Negative or unparseable limits mean no limit.
fn recipes_limit(query: &Query) -> Option<i64> {
    param(query, "recipes_limit")
        .and_then(|l| l.parse::<i64>().ok())
        .filter(|l| *l >= 0)
}

fn created<T: Serialize>(value: &T) -> reply::WithStatus<reply::Json> {
    reply::with_status(reply::json(value), StatusCode::CREATED)
}

fn detail(message: &str) -> reply::Json {
    reply::json(&json!({ "detail": message }))
}

fn viewer(session: &Option<SessionData>) -> Option<Id> {
    session.as_ref().map(|s| s.user_id)
}

pub async fn login(form: LoginForm, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let token = users::login_user(&form.username, &form.password, &state.session_key, &state.pool)
        .await?;
    log::info!("User {} logged in", form.username);

    let cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        state.session_key.lifetime().num_seconds()
    );
    Ok(reply::with_header(
        reply::json(&json!({ "auth_token": token })),
        "set-cookie",
        cookie,
    ))
}

pub async fn logout(session: SessionData) -> Result<impl Reply, Rejection> {
    log::info!("User {} logged out", session.username);

    Ok(reply::with_header(
        reply::with_status(reply::reply(), StatusCode::NO_CONTENT),
        "set-cookie",
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    ))
}

pub async fn list_users(
    session: Option<SessionData>,
    query: Query,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let page = users::fetch_users(page_request(&query), viewer(&session), &state.pool).await?;
    Ok(reply::json(&page))
}

pub async fn register(form: RegisterForm, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let registration = form.validate()?;
    let user = users::register_user(registration, &state.pool).await?;
    Ok(created(&UserView::new(user, false)))
}

pub async fn me(session: SessionData, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let user = users::require_user(&state.pool, session.user_id).await?;
    let view = users::user_view(user, Some(session.user_id), &state.pool).await?;
    Ok(reply::json(&view))
}

pub async fn get_user(
    id: Id,
    session: Option<SessionData>,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let user = users::require_user(&state.pool, id).await?;
    let view = users::user_view(user, viewer(&session), &state.pool).await?;
    Ok(reply::json(&view))
}

pub async fn subscriptions(
    session: SessionData,
    query: Query,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let page = users::fetch_subscriptions(
        session.user_id,
        page_request(&query),
        recipes_limit(&query),
        &state.pool,
    )
    .await?;
    Ok(reply::json(&page))
}

pub async fn subscribe(
    id: Id,
    session: SessionData,
    query: Query,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    session.authenticate(ActionType::ManageOwnRelations)?;
    relations::check_self_reference(Relation::Follow, session.user_id, id)?;

    let author = users::require_user(&state.pool, id).await?;
    relations::create(&state.pool, Relation::Follow, session.user_id, author.id).await?;

    let view = users::subscription_view(author, recipes_limit(&query), &state.pool).await?;
    Ok(created(&view))
}

pub async fn unsubscribe(
    id: Id,
    session: SessionData,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    session.authenticate(ActionType::ManageOwnRelations)?;

    let author = users::require_user(&state.pool, id).await?;
    relations::remove(&state.pool, Relation::Follow, session.user_id, author.id).await?;

    Ok(detail("Unsubscribed"))
}

pub async fn list_tags(state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    Ok(reply::json(&tags::list_tags(&state.pool).await?))
}

pub async fn get_tag(id: Id, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let tag = tags::get_tag(id, &state.pool)
        .await?
        .ok_or_else(|| Error::not_found("Tag"))?;
    Ok(reply::json(&tag))
}

pub async fn list_ingredients(query: Query, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let rows = ingredients::search_ingredients(param(&query, "name"), &state.pool).await?;
    let views: Vec<IngredientView> = rows.into_iter().map(IngredientView::from).collect();
    Ok(reply::json(&views))
}

pub async fn get_ingredient(id: Id, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let ingredient = ingredients::get_ingredient(id, &state.pool)
        .await?
        .ok_or_else(|| Error::not_found("Ingredient"))?;
    Ok(reply::json(&IngredientView::from(ingredient)))
}

pub async fn list_recipes(
    session: Option<SessionData>,
    query: Query,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let filter = RecipeFilter::from_query(&query)?;
    let page =
        recipes::fetch_recipes(&filter, page_request(&query), viewer(&session), &state.pool)
            .await?;
    Ok(reply::json(&page))
}

pub async fn get_recipe(
    id: Id,
    session: Option<SessionData>,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let recipe = recipes::require_recipe(id, &state.pool).await?;
    let view = recipes::recipe_view(recipe, viewer(&session), &state.pool).await?;
    Ok(reply::json(&view))
}

pub async fn create_recipe(
    session: SessionData,
    form: RecipeForm,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    session.authenticate(ActionType::CreateRecipes)?;
    let draft = form.validate(FormMode::Create)?;

    let recipe = recipes::create_recipe(draft, session.user_id, &state.media, &state.pool).await?;
    let view = recipes::recipe_view(recipe, Some(session.user_id), &state.pool).await?;
    Ok(created(&view))
}

pub async fn update_recipe(
    id: Id,
    session: SessionData,
    form: RecipeForm,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let draft = form.validate(FormMode::Update)?;
    let recipe = recipes::get_recipe_mut(id, &session, &state.pool).await?;

    let recipe = recipes::update_recipe(recipe, draft, &state.media, &state.pool).await?;
    let view = recipes::recipe_view(recipe, Some(session.user_id), &state.pool).await?;
    Ok(reply::json(&view))
}

pub async fn delete_recipe(
    id: Id,
    session: SessionData,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let recipe = recipes::get_recipe_mut(id, &session, &state.pool).await?;
    recipes::delete_recipe(recipe, &state.media, &state.pool).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Favorite and cart additions answer with the short recipe form.
pub async fn add_to(
    relation: Relation,
    id: Id,
    session: SessionData,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    session.authenticate(ActionType::ManageOwnRelations)?;

    let recipe = recipes::require_recipe(id, &state.pool).await?;
    relations::create(&state.pool, relation, session.user_id, recipe.id).await?;

    Ok(created(&ShortRecipeView::from(recipe)))
}

pub async fn remove_from(
    relation: Relation,
    id: Id,
    session: SessionData,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    session.authenticate(ActionType::ManageOwnRelations)?;

    let recipe = recipes::require_recipe(id, &state.pool).await?;
    relations::remove(&state.pool, relation, session.user_id, recipe.id).await?;

    Ok(detail(match relation {
        Relation::Favorite => "Recipe removed from favorites",
        _ => "Recipe removed from the shopping cart",
    }))
}

pub async fn download_shopping_cart(
    session: SessionData,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let list = shopping_cart::aggregate_shopping_list(session.user_id, &state.pool).await?;
    let body = document::render(&list, &state.list_font)?;

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={SHOPPING_LIST_FILENAME}"),
        )
        .body(body)
        .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(response)
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, body) = if let Some(e) = err.find::<Error>() {
        match e {
            Error::Validation(errors) => (e.status(), json!({ "errors": errors })),
            Error::Internal(info) => {
                log::error!("{info}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "Internal server error" }),
                )
            }
            _ if e.is_conflict() => {
                log::debug!("Conflicting request: {e}");
                (e.status(), json!({ "detail": e.to_string() }))
            }
            _ => (e.status(), json!({ "detail": e.to_string() })),
        }
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, json!({ "detail": "Not found." }))
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, json!({ "detail": e.to_string() }))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, json!({ "detail": e.to_string() }))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            json!({ "detail": "Request body is too large" }),
        )
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (
            StatusCode::LENGTH_REQUIRED,
            json!({ "detail": "Content-Length header is required" }),
        )
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            json!({ "detail": "Expected a JSON body" }),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "detail": "Method not allowed." }),
        )
    } else {
        log::error!("Unhandled rejection: {err:?}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "detail": "Internal server error" }),
        )
    };

    Ok(reply::with_status(reply::json(&body), status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(raw: &[(&str, &str)]) -> Query {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn page_params_are_read_from_query() {
        let page = page_request(&query(&[("page", "3"), ("limit", "500")]));
        assert_eq!(page.page, 3);
        assert_eq!(page.limit, 100);
    }

    #[test]
    fn recipes_limit_ignores_garbage() {
        assert_eq!(recipes_limit(&query(&[("recipes_limit", "2")])), Some(2));
        assert_eq!(recipes_limit(&query(&[("recipes_limit", "-1")])), None);
        assert_eq!(recipes_limit(&query(&[("recipes_limit", "many")])), None);
        assert_eq!(recipes_limit(&query(&[])), None);
    }

    #[tokio::test]
    async fn internal_errors_are_not_leaked() {
        let response = handle_rejection(Error::Internal("password=hunter2".into()).into())
            .await
            .unwrap()
            .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = warp::hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert!(!String::from_utf8_lossy(&body).contains("hunter2"));
    }

    #[tokio::test]
    async fn conflicts_are_bad_requests_with_detail() {
        let response = handle_rejection(Error::DuplicateRecipeName.into())
            .await
            .unwrap()
            .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = warp::hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["detail"], Error::DuplicateRecipeName.to_string());
    }
}
