use axum::{
    extract::{Path, Query, State},
    response::Html,
};
use serde::Deserialize;
use tracing::debug;
use yatube_core::{FeedScope, Page, Paginator, Post};

use crate::auth::{CurrentUser, RequireUser};
use crate::error::AppError;
use crate::router::AppState;
use crate::templates::{
    render, FeedPage, FollowTemplate, GroupListTemplate, IndexTemplate, ProfileTemplate,
};

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<String>,
}

/// Counts the scope, resolves the requested page and loads its posts.
pub(crate) async fn load_feed(
    state: &AppState,
    scope: FeedScope,
    requested: Option<&str>,
) -> Result<Page<Post>, AppError> {
    let posts = state.storage().posts();
    let paginator = Paginator::for_feed(posts.count(scope).await?);
    let window = paginator.get_page(requested);
    let items = posts.list_page(scope, &window).await?;
    debug!(
        stage = "feed",
        scope = scope.as_str(),
        page = window.number,
        pages = window.num_pages,
        items = items.len(),
        "feed page loaded"
    );
    Ok(window.with_items(items))
}

pub async fn index(
    State(state): State<AppState>,
    CurrentUser(viewer): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let FeedPage { posts, page } = load_feed(&state, FeedScope::All, query.page.as_deref())
        .await?
        .into();
    render(&IndexTemplate {
        viewer,
        posts,
        page,
    })
}

pub async fn group_posts(
    State(state): State<AppState>,
    CurrentUser(viewer): CurrentUser,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let group = state
        .storage()
        .groups()
        .find_by_slug(&slug)
        .await?
        .ok_or(AppError::NotFound)?;
    let FeedPage { posts, page } =
        load_feed(&state, FeedScope::Group(group.id), query.page.as_deref())
            .await?
            .into();
    render(&GroupListTemplate {
        viewer,
        group,
        posts,
        page,
    })
}

pub async fn profile(
    State(state): State<AppState>,
    CurrentUser(viewer): CurrentUser,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let author = state
        .storage()
        .users()
        .find_by_username(&username)
        .await?
        .ok_or(AppError::NotFound)?;

    let feed = load_feed(&state, FeedScope::Author(author.id), query.page.as_deref()).await?;
    let posts_count = feed.count;

    let (following, can_follow) = match &viewer {
        Some(user) if user.id != author.id => (
            state
                .storage()
                .follows()
                .is_following(user.id, author.id)
                .await?,
            true,
        ),
        _ => (false, false),
    };

    let FeedPage { posts, page } = feed.into();
    render(&ProfileTemplate {
        viewer,
        author_username: author.username.clone(),
        author_name: author.full_name(),
        posts_count,
        following,
        can_follow,
        posts,
        page,
    })
}

pub async fn follow_index(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, AppError> {
    let FeedPage { posts, page } =
        load_feed(&state, FeedScope::FollowedBy(user.id), query.page.as_deref())
            .await?
            .into();
    render(&FollowTemplate {
        viewer: Some(user),
        posts,
        page,
    })
}
