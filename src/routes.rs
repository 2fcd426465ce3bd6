use std::{convert::Infallible, sync::Arc};

use warp::{reject::Rejection, reply::Reply, Filter};

use crate::{
    database::{
        actions::relations::Relation,
        form::{LoginForm, RecipeForm, RegisterForm},
    },
    handlers::{self, Query},
    jwt::SessionData,
    middleware::{with_possible_session, with_session},
    schema::Id,
    state::AppState,
};

const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn query() -> impl Filter<Extract = (Query,), Error = Rejection> + Clone {
    warp::query::<Query>()
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// The whole API plus uploaded media, with errors rendered as JSON.
pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let api = auth_routes(state.clone())
        .or(user_routes(state.clone()))
        .or(tag_routes(state.clone()))
        .or(ingredient_routes(state.clone()))
        .or(recipe_routes(state.clone()));

    let media = warp::path("media")
        .and(warp::get())
        .and(warp::fs::dir(state.media.root().clone()));

    api.or(media)
        .recover(handlers::handle_rejection)
        .with(warp::log("foodgram::http"))
}

fn auth_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let login = warp::path!("api" / "auth" / "token" / "login")
        .and(warp::post())
        .and(json_body::<LoginForm>())
        .and(with_state(state.clone()))
        .and_then(handlers::login);

    let logout = warp::path!("api" / "auth" / "token" / "logout")
        .and(warp::post())
        .and(with_session(state.session_key.clone()))
        .and_then(handlers::logout);

    login.or(logout)
}

fn user_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let key = state.session_key.clone();

    let list = warp::path!("api" / "users")
        .and(warp::get())
        .and(with_possible_session(key.clone()))
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::list_users);

    let register = warp::path!("api" / "users")
        .and(warp::post())
        .and(json_body::<RegisterForm>())
        .and(with_state(state.clone()))
        .and_then(handlers::register);

    let me = warp::path!("api" / "users" / "me")
        .and(warp::get())
        .and(with_session(key.clone()))
        .and(with_state(state.clone()))
        .and_then(handlers::me);

    let subscriptions = warp::path!("api" / "users" / "subscriptions")
        .and(warp::get())
        .and(with_session(key.clone()))
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::subscriptions);

    let detail = warp::path!("api" / "users" / Id)
        .and(warp::get())
        .and(with_possible_session(key.clone()))
        .and(with_state(state.clone()))
        .and_then(handlers::get_user);

    let subscribe = warp::path!("api" / "users" / Id / "subscribe")
        .and(warp::post())
        .and(with_session(key.clone()))
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::subscribe);

    let unsubscribe = warp::path!("api" / "users" / Id / "subscribe")
        .and(warp::delete())
        .and(with_session(key))
        .and(with_state(state))
        .and_then(handlers::unsubscribe);

    list.or(register)
        .or(me)
        .or(subscriptions)
        .or(detail)
        .or(subscribe)
        .or(unsubscribe)
}

fn tag_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list = warp::path!("api" / "tags")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::list_tags);

    let detail = warp::path!("api" / "tags" / Id)
        .and(warp::get())
        .and(with_state(state))
        .and_then(handlers::get_tag);

    list.or(detail)
}

fn ingredient_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list = warp::path!("api" / "ingredients")
        .and(warp::get())
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::list_ingredients);

    let detail = warp::path!("api" / "ingredients" / Id)
        .and(warp::get())
        .and(with_state(state))
        .and_then(handlers::get_ingredient);

    list.or(detail)
}

fn recipe_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let key = state.session_key.clone();

    let list = warp::path!("api" / "recipes")
        .and(warp::get())
        .and(with_possible_session(key.clone()))
        .and(query())
        .and(with_state(state.clone()))
        .and_then(handlers::list_recipes);

    let create = warp::path!("api" / "recipes")
        .and(warp::post())
        .and(with_session(key.clone()))
        .and(json_body::<RecipeForm>())
        .and(with_state(state.clone()))
        .and_then(handlers::create_recipe);

    let download = warp::path!("api" / "recipes" / "download_shopping_cart")
        .and(warp::get())
        .and(with_session(key.clone()))
        .and(with_state(state.clone()))
        .and_then(handlers::download_shopping_cart);

    let detail = warp::path!("api" / "recipes" / Id)
        .and(warp::get())
        .and(with_possible_session(key.clone()))
        .and(with_state(state.clone()))
        .and_then(handlers::get_recipe);

    let update = warp::path!("api" / "recipes" / Id)
        .and(warp::patch())
        .and(with_session(key.clone()))
        .and(json_body::<RecipeForm>())
        .and(with_state(state.clone()))
        .and_then(handlers::update_recipe);

    let delete = warp::path!("api" / "recipes" / Id)
        .and(warp::delete())
        .and(with_session(key.clone()))
        .and(with_state(state.clone()))
        .and_then(handlers::delete_recipe);

    list.or(create)
        .or(download)
        .or(detail)
        .or(update)
        .or(delete)
        .or(relation_routes("favorite", Relation::Favorite, state.clone()))
        .or(relation_routes("shopping_cart", Relation::Cart, state))
}

/// POST adds the recipe to the relation, DELETE takes it out.
fn relation_routes(
    segment: &'static str,
    relation: Relation,
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let key = state.session_key.clone();

    let add = warp::path!("api" / "recipes" / Id / ..)
        .and(warp::path(segment))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_session(key.clone()))
        .and(with_state(state.clone()))
        .and_then(move |id: Id, session: SessionData, state: Arc<AppState>| {
            handlers::add_to(relation, id, session, state)
        });

    let remove = warp::path!("api" / "recipes" / Id / ..)
        .and(warp::path(segment))
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_session(key))
        .and(with_state(state))
        .and_then(move |id: Id, session: SessionData, state: Arc<AppState>| {
            handlers::remove_from(relation, id, session, state)
        });

    add.or(remove)
}
