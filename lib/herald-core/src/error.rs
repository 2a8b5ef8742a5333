use std::fmt::{Display, Formatter};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictField {
    Username,
    Email,
}

impl Display for ConflictField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictField::Username => f.write_str("username"),
            ConflictField::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("{0} is already taken")]
    Conflict(ConflictField),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid credentials")]
    BadCredential,
    #[error("unauthorized access")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("corrupt persisted state: {0}")]
    CorruptState(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation { field, reason: reason.into() }
    }

    /// Text shown to the person using the dashboard. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { field, reason } => format!("Invalid {field}: {reason}"),
            Error::Conflict(field) => format!("This {field} is already taken"),
            Error::NotFound(what) => format!("The requested {what} was not found"),
            Error::BadCredential => "Invalid username or password".to_owned(),
            Error::Unauthorized => "You are not allowed to do this".to_owned(),
            Error::Forbidden(reason) => format!("Not allowed: {reason}"),
            Error::CorruptState(_) => "Your session was reset, please log in again".to_owned(),
            Error::Internal(_) => "Something went wrong, please try again".to_owned(),
        }
    }
}
