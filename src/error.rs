use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use warp::http::StatusCode;

/// Field name mapped to every message collected for that field.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request")]
    Validation(ValidationErrors),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    NoOpDelete(String),

    #[error("You already have a recipe with this name")]
    DuplicateRecipeName,

    #[error("You can't subscribe to yourself")]
    SelfReferenceNotAllowed,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    InvalidSession(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_)
            | Error::AlreadyExists(_)
            | Error::NoOpDelete(_)
            | Error::DuplicateRecipeName
            | Error::SelfReferenceNotAllowed => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::FORBIDDEN,
            Error::InvalidSession(_) => StatusCode::UNAUTHORIZED,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for the idempotency family: repeated create, no-op delete,
    /// duplicate recipe name.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::AlreadyExists(_) | Error::NoOpDelete(_) | Error::DuplicateRecipeName
        )
    }
}

impl warp::reject::Reject for Error {}

impl From<ValidationErrors> for Error {
    fn from(value: ValidationErrors) -> Self {
        Error::Validation(value)
    }
}
