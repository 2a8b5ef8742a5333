use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use anyhow::{bail, Context};
use argon2::{
    Argon2,
    password_hash::{PasswordHasher, PasswordVerifier, rand_core::OsRng, SaltString},
};
use thiserror::Error;

use herald_core::async_result;
use herald_core::authorization::AuthService;
use herald_core::IdentityId;

/// Where password hashes live. Backends implement this next to their identity storage.
pub trait AuthStorage: 'static + Send + Sync + Clone {
    type Error: 'static + std::error::Error + Send + Sync;

    fn fetch_authentication(&self, user_id: &IdentityId) -> async_result!(Option<AuthenticationInfo>);
    /// Stores the hash, returning the one it replaced.
    fn update_authentication(&self, user_id: &IdentityId, auth_info: AuthenticationInfo) -> async_result!(Option<AuthenticationInfo>);
    fn remove_authentication(&self, user_id: &IdentityId) -> async_result!(Option<AuthenticationInfo>);
}

#[derive(Debug)]
pub struct AuthServiceError(anyhow::Error);

impl From<anyhow::Error> for AuthServiceError {
    fn from(value: anyhow::Error) -> Self {
        Self(value)
    }
}

impl Display for AuthServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::error::Error for AuthServiceError {}

/// Argon2 credentials over any [`AuthStorage`].
#[derive(Clone)]
pub struct Argon2Auth<A> {
    storage: A,
}

impl<A> Argon2Auth<A> {
    pub fn new(storage: A) -> Self {
        Self { storage }
    }
}

impl<A: AuthStorage> AuthService for Argon2Auth<A> {
    type Error = AuthServiceError;

    async fn verify_user(&self, user_id: &IdentityId, password: String) -> Result<bool, Self::Error> {
        let auth_info = match self.storage
            .fetch_authentication(user_id).await
            .with_context(|| format!("Couldn't fetch authentication for {user_id}"))? {
            Some(auth_info) => auth_info,
            None => return Ok(false),
        };

        let handle = tokio::task::spawn_blocking(move || {
            let password_hash = auth_info.phc_string().password_hash();
            Argon2::default().verify_password(password.as_bytes(), &password_hash).is_ok()
        });

        let res = handle.await.context("Password verification thread failed")?;
        Ok(res)
    }

    async fn create_user(&self, user_id: &IdentityId, password: String) -> Result<(), Self::Error> {
        let handle = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            let password_hash = match Argon2::default().hash_password(password.as_bytes(), &salt) {
                Ok(hash) => hash,
                Err(e) => bail!("Couldn't hash password: {e}"),
            };
            Ok(AuthenticationInfo::from(password_hash))
        });

        let auth_info = handle.await.context("Password hash generation thread failed")??;
        self.storage
            .update_authentication(user_id, auth_info).await
            .with_context(|| format!("Couldn't update authentication for {user_id}"))?;
        Ok(())
    }

    async fn remove_user(&self, user_id: &IdentityId) -> Result<(), Self::Error> {
        self.storage
            .remove_authentication(user_id).await
            .with_context(|| format!("Couldn't remove authentication for {user_id}"))?;
        Ok(())
    }
}

/// A password hash in PHC string form (`$argon2id$v=19$...`).
#[derive(Clone)]
pub struct AuthenticationInfo {
    phc_string: password_hash::PasswordHashString,
}

impl AuthenticationInfo {
    pub fn phc_string(&self) -> &password_hash::PasswordHashString {
        &self.phc_string
    }
}

impl PartialEq for AuthenticationInfo {
    fn eq(&self, other: &Self) -> bool {
        self.phc_string.as_str() == other.phc_string.as_str()
    }
}

impl Debug for AuthenticationInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationInfo").finish_non_exhaustive()
    }
}

impl Display for AuthenticationInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.phc_string.as_str())
    }
}

impl<'a> From<password_hash::PasswordHash<'a>> for AuthenticationInfo {
    fn from(value: password_hash::PasswordHash<'a>) -> Self {
        AuthenticationInfo { phc_string: value.into() }
    }
}

impl From<password_hash::PasswordHashString> for AuthenticationInfo {
    fn from(value: password_hash::PasswordHashString) -> Self {
        AuthenticationInfo { phc_string: value }
    }
}

impl FromStr for AuthenticationInfo {
    type Err = AuthenticationInfoParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match password_hash::PasswordHashString::new(s) {
            Ok(phc_string) => Ok(AuthenticationInfo { phc_string }),
            Err(_) => Err(AuthenticationInfoParsingError::IncorrectPHCString),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthenticationInfoParsingError {
    #[error("Incorrect phc string")]
    IncorrectPHCString,
}
