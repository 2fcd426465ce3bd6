use warp::{reject::Rejection, Filter};

use crate::{constants::SESSION_COOKIE, error::Error};

use super::jwt::{verify_jwt_session, SessionData, SessionKey};

/// Accepts `Token <jwt>` and `Bearer <jwt>`.
pub fn token_from_header(header: &str) -> Option<String> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer") {
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    } else {
        None
    }
}

/// Raw token from the `Authorization` header, falling back to the session cookie.
fn session_token() -> impl Filter<Extract = (Option<String>,), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE)
        .and(warp::header::optional::<String>("authorization"))
        .map(|cookie: Option<String>, header: Option<String>| {
            header.as_deref().and_then(token_from_header).or(cookie)
        })
}

pub fn with_session(
    key: SessionKey,
) -> impl Filter<Extract = (SessionData,), Error = Rejection> + Clone {
    session_token().and_then(move |token: Option<String>| {
        let key = key.clone();
        async move { authenticate(token, &key).map_err(Rejection::from) }
    })
}

fn authenticate(token: Option<String>, key: &SessionKey) -> Result<SessionData, Error> {
    let token = token.ok_or_else(|| {
        Error::InvalidSession(String::from(
            "Authentication credentials were not provided",
        ))
    })?;

    verify_jwt_session(&token, key).map(SessionData::from)
}

/// Anonymous callers, and callers with a stale token, come through as `None`.
pub fn with_possible_session(
    key: SessionKey,
) -> impl Filter<Extract = (Option<SessionData>,), Error = Rejection> + Clone {
    session_token().map(move |token: Option<String>| {
        token.and_then(|token| match verify_jwt_session(&token, &key) {
            Ok(data) => Some(SessionData::from(data)),
            Err(e) => {
                log::debug!("Ignoring session: {e}");
                None
            }
        })
    })
}
