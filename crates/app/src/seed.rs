//! Idempotent creation of a starter group and account.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task;
use yatube_core::forms::{is_valid_slug, is_valid_username, GROUP_TITLE_MAX_LEN};
use yatube_storage::{Database, GroupError, NewGroup, NewUser, UserError};

use crate::auth::{hash_password, PasswordError};

#[derive(Debug, Clone)]
pub struct GroupSeed {
    pub slug: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct UserSeed {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("'{0}' is not a valid slug: use letters, digits, '-' and '_'")]
    InvalidSlug(String),
    #[error("group title exceeds {} characters", GROUP_TITLE_MAX_LEN)]
    TitleTooLong,
    #[error("'{0}' is not a valid username")]
    InvalidUsername(String),
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error("password hashing task failed: {0}")]
    Join(#[from] task::JoinError),
}

/// Creates the group unless its slug is already taken.
pub async fn seed_group(database: &Database, seed: &GroupSeed) -> Result<SeedOutcome, SeedError> {
    if !is_valid_slug(&seed.slug) {
        return Err(SeedError::InvalidSlug(seed.slug.clone()));
    }
    if seed.title.chars().count() > GROUP_TITLE_MAX_LEN {
        return Err(SeedError::TitleTooLong);
    }

    let created = database
        .groups()
        .create(&NewGroup {
            title: &seed.title,
            slug: &seed.slug,
            description: &seed.description,
        })
        .await;
    match created {
        Ok(_) => Ok(SeedOutcome::Created),
        Err(GroupError::SlugTaken) => Ok(SeedOutcome::AlreadyExists),
        Err(err) => Err(err.into()),
    }
}

/// Creates the account unless the username is already taken.
pub async fn seed_user(
    database: &Database,
    seed: &UserSeed,
    joined: DateTime<Utc>,
) -> Result<SeedOutcome, SeedError> {
    if !is_valid_username(&seed.username) {
        return Err(SeedError::InvalidUsername(seed.username.clone()));
    }

    let password = seed.password.clone();
    let password_hash = task::spawn_blocking(move || hash_password(&password)).await??;
    let created = database
        .users()
        .create(&NewUser {
            username: &seed.username,
            first_name: "",
            last_name: "",
            password_hash: &password_hash,
            date_joined: joined,
        })
        .await;
    match created {
        Ok(_) => Ok(SeedOutcome::Created),
        Err(UserError::UsernameTaken) => Ok(SeedOutcome::AlreadyExists),
        Err(err) => Err(err.into()),
    }
}
