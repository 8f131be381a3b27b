use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use thiserror::Error;
use tracing::error;
use yatube_storage::{CommentError, FollowError, GroupError, PostError, UserError};

use crate::auth::{login_url, PasswordError, SessionError};
use crate::media::MediaError;
use crate::templates::{NotFoundTemplate, ServerErrorTemplate};

/// Failure modes of a request handler, each mapped to an HTTP response.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("resource not found")]
    NotFound,
    #[error("authentication required for {next}")]
    LoginRequired { next: String },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Post(#[from] PostError),
    #[error(transparent)]
    Comment(#[from] CommentError),
    #[error(transparent)]
    Follow(#[from] FollowError),
    #[error("failed to render template: {0}")]
    Template(#[from] askama::Error),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("unexpected error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => html_page(StatusCode::NOT_FOUND, NotFoundTemplate { viewer: None }),
            Self::LoginRequired { next } => redirect_found(&login_url(&next)),
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail).into_response(),
            other => {
                error!(stage = "http", error = %other, "request failed");
                html_page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ServerErrorTemplate { viewer: None },
                )
            }
        }
    }
}

fn html_page<T: Template>(status: StatusCode, template: T) -> Response {
    match template.render() {
        Ok(body) => (status, Html(body)).into_response(),
        Err(err) => {
            error!(stage = "http", error = %err, "failed to render error page");
            let reason = status.canonical_reason().unwrap_or("error");
            (status, reason.to_string()).into_response()
        }
    }
}

/// Issues a `302 Found` redirect.
pub fn redirect_found(location: &str) -> Response {
    let mut response = Redirect::temporary(location).into_response();
    *response.status_mut() = StatusCode::FOUND;
    response
}
