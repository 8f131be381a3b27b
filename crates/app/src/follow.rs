use axum::{
    extract::{Path, State},
    response::Response,
};
use metrics::counter;
use tracing::{debug, info};
use yatube_storage::FollowOutcome;

use crate::auth::RequireUser;
use crate::error::{redirect_found, AppError};
use crate::posts::profile_url;
use crate::router::AppState;

/// Subscribes the signed-in user to an author; repeats and self-follows are no-ops.
pub async fn profile_follow(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let author = state
        .storage()
        .users()
        .find_by_username(&username)
        .await?
        .ok_or(AppError::NotFound)?;

    if author.id == user.id {
        debug!(stage = "follow", user = %user, "self-follow ignored");
    } else {
        match state.storage().follows().follow(user.id, author.id).await? {
            FollowOutcome::Created => {
                counter!("follow_changes_total", "action" => "follow").increment(1);
                info!(stage = "follow", follower = %user, author = %author, "follow created");
            }
            FollowOutcome::AlreadyFollowing => {
                debug!(stage = "follow", follower = %user, author = %author, "already following");
            }
        }
    }
    Ok(redirect_found(&profile_url(&author.username)))
}

pub async fn profile_unfollow(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let author = state
        .storage()
        .users()
        .find_by_username(&username)
        .await?
        .ok_or(AppError::NotFound)?;

    if state.storage().follows().unfollow(user.id, author.id).await? {
        counter!("follow_changes_total", "action" => "unfollow").increment(1);
        info!(stage = "follow", follower = %user, author = %author, "follow removed");
    }
    Ok(redirect_found(&profile_url(&author.username)))
}
