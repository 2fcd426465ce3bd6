use chrono::Duration;
use chrono::Local;
use hmac::{Hmac, Mac};
use jwt::SignWithKey;
use jwt::VerifyWithKey;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;

use crate::database::schema::{Id, User, UserRole};
use crate::error::Error;

use super::permissions::ActionType;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtSessionData {
    pub user_id: Id,
    pub username: String,
    pub role: UserRole,
    iat: i64,
    exp: i64,
}

impl JwtSessionData {
    pub fn new(id: Id, username: String, role: UserRole, lifetime: Duration) -> Self {
        let now = Local::now();
        let iat = now.timestamp();
        let exp = (now + lifetime).timestamp();

        Self {
            user_id: id,
            username,
            role,
            iat,
            exp,
        }
    }
}

/// The authenticated caller, passed explicitly to every operation that needs it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionData {
    pub user_id: Id,
    pub username: String,
    pub role: UserRole,
    pub is_admin: bool,
}

impl SessionData {
    pub fn authenticate(&self, action: ActionType) -> Result<(), Error> {
        if !action.authenticate(self) {
            return Err(Error::Unauthorized(String::from(
                "You don't have permission to perform this action",
            )));
        }
        Ok(())
    }
}

impl From<JwtSessionData> for SessionData {
    fn from(value: JwtSessionData) -> Self {
        SessionData {
            username: value.username,
            user_id: value.user_id,
            is_admin: value.role == UserRole::Admin,
            role: value.role,
        }
    }
}

/// HMAC key and token lifetime used to sign and verify sessions.
#[derive(Clone)]
pub struct SessionKey {
    key: Hmac<Sha256>,
    lifetime: Duration,
}

impl SessionKey {
    pub fn new(secret: &[u8], lifetime: Duration) -> Result<Self, Error> {
        let key: Hmac<Sha256> = Hmac::new_from_slice(secret)
            .map_err(|e| Error::Internal(format!("Invalid session secret: {e}")))?;

        Ok(Self { key, lifetime })
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

pub fn generate_jwt_session(user: &User, key: &SessionKey) -> Result<String, Error> {
    let claims = JwtSessionData::new(
        user.id,
        user.username.to_owned(),
        user.role.to_owned(),
        key.lifetime,
    );

    claims
        .sign_with_key(&key.key)
        .map_err(|e| Error::Internal(format!("Could not sign session: {e}")))
}

pub fn verify_jwt_session(token: &str, key: &SessionKey) -> Result<JwtSessionData, Error> {
    let session: JwtSessionData = token
        .verify_with_key(&key.key)
        .map_err(|_| Error::InvalidSession(String::from("Invalid session; Invalid token")))?;

    let now = Local::now().timestamp();
    if (session.exp - now).is_negative() {
        return Err(Error::InvalidSession(String::from(
            "Invalid session; Token expired",
        )));
    }

    Ok(session)
}
