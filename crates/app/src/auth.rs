use std::{sync::Arc, time::Duration};

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;
use url::form_urlencoded;
use yatube_core::User;

use crate::error::AppError;
use crate::router::AppState;

pub const SESSION_COOKIE: &str = "yatube_session";
pub const LOGIN_PATH: &str = "/auth/login/";

/// Issues and verifies `<user_id>.<issued_at>.<hmac>` session tokens.
#[derive(Clone)]
pub struct SessionSigner {
    secret: Arc<[u8]>,
    max_age: Duration,
}

impl SessionSigner {
    pub fn new(secret: Vec<u8>, max_age: Duration) -> Self {
        Self {
            secret: Arc::from(secret.into_boxed_slice()),
            max_age,
        }
    }

    pub fn issue(&self, user_id: i64, now: DateTime<Utc>) -> Result<String, SessionError> {
        let payload = format!("{user_id}.{}", now.timestamp());
        let signature = self.sign(&payload)?;
        Ok(format!("{payload}.{}", hex::encode(signature)))
    }

    /// Returns the user id carried by a valid, unexpired token.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<i64, SessionError> {
        let (payload, signature_hex) = token.rsplit_once('.').ok_or(SessionError::Malformed)?;
        let (user_part, issued_part) = payload.split_once('.').ok_or(SessionError::Malformed)?;
        let user_id: i64 = user_part.parse().map_err(|_| SessionError::Malformed)?;
        let issued_at: i64 = issued_part.parse().map_err(|_| SessionError::Malformed)?;
        let provided = hex::decode(signature_hex).map_err(|_| SessionError::Malformed)?;

        let expected = self.sign(payload)?;
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(SessionError::BadSignature);
        }

        let age = now.timestamp().saturating_sub(issued_at);
        if age < 0 || age as u64 >= self.max_age.as_secs() {
            return Err(SessionError::Expired);
        }
        Ok(user_id)
    }

    /// Cookie carrying a freshly issued token.
    pub fn cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build()
    }

    fn sign(&self, payload: &str) -> Result<Vec<u8>, SessionError> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.secret).map_err(|_| SessionError::KeyInit)?;
        mac.update(payload.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Cookie that clears the session on the client.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session token is malformed")]
    Malformed,
    #[error("session signature mismatch")]
    BadSignature,
    #[error("session has expired")]
    Expired,
    #[error("failed to initialize session signer")]
    KeyInit,
}

/// Builds the login redirect target preserving the original path.
pub fn login_url(next: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(next.as_bytes()).collect();
    format!("{LOGIN_PATH}?next={}", encoded.replace("%2F", "/"))
}

/// Accepts only local absolute paths as post-login redirect targets.
pub fn safe_next(next: &str) -> Option<&str> {
    let local = next.starts_with('/') && !next.starts_with("//") && !next.contains('\\');
    local.then_some(next)
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("stored password hash is invalid: {0}")]
    InvalidHash(String),
}

pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| PasswordError::Hash(err.to_string()))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|err| PasswordError::InvalidHash(err.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(PasswordError::Hash(err.to_string())),
    }
}

/// The signed-in user, if any.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(resolved) = parts.extensions.get::<CurrentUser>() {
            return Ok(resolved.clone());
        }

        let jar = CookieJar::from_headers(&parts.headers);
        let user = match jar.get(SESSION_COOKIE) {
            None => None,
            Some(cookie) => match state.sessions().verify(cookie.value(), state.now()) {
                Ok(user_id) => state.storage().users().find_by_id(user_id).await?,
                Err(err) => {
                    debug!(stage = "auth", error = %err, "ignoring session cookie");
                    None
                }
            },
        };

        let current = CurrentUser(user);
        parts.extensions.insert(current.clone());
        Ok(current)
    }
}

/// Extractor for handlers that need a signed-in user; otherwise redirects to login.
#[derive(Debug, Clone)]
pub struct RequireUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for RequireUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        match user {
            Some(user) => Ok(Self(user)),
            None => {
                let next = parts
                    .uri
                    .path_and_query()
                    .map(|value| value.as_str().to_string())
                    .unwrap_or_else(|| "/".to_string());
                Err(AppError::LoginRequired { next })
            }
        }
    }
}
