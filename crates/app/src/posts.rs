use axum::{
    async_trait,
    extract::{multipart::MultipartError, FromRequest, Multipart, Path, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use metrics::counter;
use tokio::task;
use tracing::{debug, info, warn};
use url::form_urlencoded;
use yatube_core::{
    forms::{
        validate_comment, validate_post, CommentFormInput, FieldErrors, ImageUpload, PostDraft,
        PostFormInput, COMMENT_TEXT_FIELD, MSG_FILE_TOO_LARGE, POST_GROUP_FIELD,
        POST_IMAGE_FIELD, POST_TEXT_FIELD,
    },
    FeedScope, Group, User,
};
use yatube_storage::{NewComment, NewPost, PostUpdate};

use crate::auth::{CurrentUser, RequireUser};
use crate::error::{redirect_found, AppError};
use crate::router::AppState;
use crate::templates::{
    render, CommentView, PostCard, PostDetailTemplate, PostFormTemplate, PostFormView,
};

/// Path ids that are not integers cannot name a post.
fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse().map_err(|_| AppError::NotFound)
}

pub(crate) fn post_url(id: i64) -> String {
    format!("/posts/{id}/")
}

pub(crate) fn profile_url(username: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(username.as_bytes()).collect();
    format!("/profile/{encoded}/")
}

/// Post form fields submitted either as `multipart/form-data` or urlencoded.
#[derive(Debug, Default)]
pub struct PostSubmission {
    pub input: PostFormInput,
    pub image: Option<ImageUpload>,
    /// The body ran past the upload limit before it was fully read.
    pub oversized: bool,
}

impl PostSubmission {
    /// Keeps the fields read before the upload limit was hit.
    fn cut_off(mut self, err: MultipartError) -> Result<Self, AppError> {
        if err.status() != StatusCode::PAYLOAD_TOO_LARGE {
            return Err(AppError::BadRequest(err.body_text()));
        }
        self.image = None;
        self.oversized = true;
        Ok(self)
    }
}

#[async_trait]
impl<S> FromRequest<S> for PostSubmission
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if !is_multipart {
            return match Form::<PostFormInput>::from_request(req, state).await {
                Ok(Form(input)) => Ok(Self {
                    input,
                    ..Self::default()
                }),
                Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => Ok(Self {
                    oversized: true,
                    ..Self::default()
                }),
                Err(err) => Err(AppError::BadRequest(err.body_text())),
            };
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|err| AppError::BadRequest(err.body_text()))?;
        let mut submission = Self::default();
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(err) => return submission.cut_off(err),
            };
            let name = field.name().unwrap_or_default().to_string();
            if name == POST_IMAGE_FIELD.name {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(err) => return submission.cut_off(err),
                };
                // Browsers send an empty, unnamed part when no file was chosen.
                if !(filename.is_empty() && bytes.is_empty()) {
                    submission.image = Some(ImageUpload {
                        filename,
                        bytes: bytes.to_vec(),
                    });
                }
                continue;
            }

            let value = match field.text().await {
                Ok(value) => value,
                Err(err) => return submission.cut_off(err),
            };
            if name == POST_TEXT_FIELD.name {
                submission.input.text = value;
            } else if name == POST_GROUP_FIELD.name {
                submission.input.group = value;
            }
        }
        Ok(submission)
    }
}

/// Validates a submission on the blocking pool; image checks decode the upload.
async fn clean_submission(
    submission: PostSubmission,
    groups: &[Group],
) -> Result<(PostFormInput, Result<PostDraft, FieldErrors>), AppError> {
    let choices: Vec<i64> = groups.iter().map(|group| group.id).collect();
    let PostSubmission {
        input,
        image,
        oversized,
    } = submission;

    task::spawn_blocking(move || {
        let mut cleaned = validate_post(&input, image, &choices);
        if oversized {
            let mut errors = cleaned.err().unwrap_or_default();
            errors.add(POST_IMAGE_FIELD.name, MSG_FILE_TOO_LARGE);
            cleaned = Err(errors);
        }
        (input, cleaned)
    })
    .await
    .map_err(|err| AppError::Internal(err.to_string()))
}

async fn group_choices(state: &AppState) -> Result<Vec<Group>, AppError> {
    Ok(state.storage().groups().list_all().await?)
}

pub async fn post_detail(
    State(state): State<AppState>,
    CurrentUser(viewer): CurrentUser,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&raw_id)?;
    let post = state
        .storage()
        .posts()
        .find(id)
        .await?
        .ok_or(AppError::NotFound)?;

    let author_posts_count = state
        .storage()
        .posts()
        .count(FeedScope::Author(post.author.id))
        .await?;
    let comments = state.storage().comments().list_for_post(post.id).await?;
    let can_edit = viewer.as_ref().is_some_and(|user| post.is_authored_by(user));

    let page = render(&PostDetailTemplate {
        viewer,
        post: PostCard::from(&post),
        author_posts_count,
        can_edit,
        comments: comments.iter().map(CommentView::from).collect(),
        comment_field: COMMENT_TEXT_FIELD,
    })?;
    Ok(page.into_response())
}

pub async fn post_create_form(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Response, AppError> {
    let groups = group_choices(&state).await?;
    let form = PostFormView::new(&groups, "", None);
    Ok(render(&PostFormTemplate::create(user, form))?.into_response())
}

pub async fn post_create(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    submission: PostSubmission,
) -> Result<Response, AppError> {
    let groups = group_choices(&state).await?;
    if submission.oversized {
        warn!(stage = "posts", user = %user, "post submission exceeded upload limit");
    }

    let (input, cleaned) = clean_submission(submission, &groups).await?;
    let draft = match cleaned {
        Ok(draft) => draft,
        Err(errors) => {
            debug!(stage = "posts", user = %user, "rejected new post");
            let form = PostFormView::rejected(&groups, &input, &errors);
            return Ok(render(&PostFormTemplate::create(user, form))?.into_response());
        }
    };

    let image = match &draft.image {
        Some(image) => Some(state.media().save_post_image(image).await?),
        None => None,
    };
    let post_id = state
        .storage()
        .posts()
        .create(&NewPost {
            text: &draft.text,
            pub_date: state.now(),
            author_id: user.id,
            group_id: draft.group_id,
            image: image.as_deref(),
        })
        .await?;

    counter!("posts_created_total").increment(1);
    info!(stage = "posts", post_id, author = %user, has_image = image.is_some(), "post created");
    Ok(redirect_found(&profile_url(&user.username)))
}

pub async fn post_edit_form(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&raw_id)?;
    let post = state
        .storage()
        .posts()
        .find(id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !post.is_authored_by(&user) {
        return Ok(redirect_found(&post_url(post.id)));
    }

    let groups = group_choices(&state).await?;
    let form = PostFormView::new(&groups, &post.text, post.group.as_ref().map(|group| group.id))
        .with_current_image(post.image.as_deref());
    Ok(render(&PostFormTemplate::edit(user, post.id, form))?.into_response())
}

pub async fn post_edit(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(raw_id): Path<String>,
    submission: PostSubmission,
) -> Result<Response, AppError> {
    let id = parse_id(&raw_id)?;
    let post = state
        .storage()
        .posts()
        .find(id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !post.is_authored_by(&user) {
        debug!(stage = "posts", post_id = post.id, user = %user, "edit by non-author ignored");
        return Ok(redirect_found(&post_url(post.id)));
    }

    let groups = group_choices(&state).await?;
    let (input, cleaned) = clean_submission(submission, &groups).await?;
    let draft = match cleaned {
        Ok(draft) => draft,
        Err(errors) => {
            let form = PostFormView::rejected(&groups, &input, &errors)
                .with_current_image(post.image.as_deref());
            return Ok(render(&PostFormTemplate::edit(user, post.id, form))?.into_response());
        }
    };

    let image = match &draft.image {
        Some(image) => Some(state.media().save_post_image(image).await?),
        None => None,
    };
    state
        .storage()
        .posts()
        .update(
            post.id,
            &PostUpdate {
                text: &draft.text,
                group_id: draft.group_id,
                image: image.as_deref(),
            },
        )
        .await?;

    counter!("posts_updated_total").increment(1);
    info!(stage = "posts", post_id = post.id, author = %user, "post updated");
    Ok(redirect_found(&post_url(post.id)))
}

/// Stores a valid comment; invalid submissions are dropped silently.
pub async fn add_comment(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(raw_id): Path<String>,
    form: Option<Form<CommentFormInput>>,
) -> Result<Response, AppError> {
    let input = form.map(|Form(input)| input).unwrap_or_default();
    store_comment(&state, &user, &raw_id, input).await
}

/// GET carries no form; the query string is never read as one.
pub async fn comment_without_form(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    store_comment(&state, &user, &raw_id, CommentFormInput::default()).await
}

async fn store_comment(
    state: &AppState,
    user: &User,
    raw_id: &str,
    input: CommentFormInput,
) -> Result<Response, AppError> {
    let id = parse_id(raw_id)?;
    let post = state
        .storage()
        .posts()
        .find(id)
        .await?
        .ok_or(AppError::NotFound)?;

    match validate_comment(&input) {
        Ok(text) => {
            let comment_id = state
                .storage()
                .comments()
                .create(&NewComment {
                    post_id: post.id,
                    author_id: user.id,
                    text: &text,
                    created: state.now(),
                })
                .await?;
            counter!("comments_created_total", "result" => "created").increment(1);
            info!(stage = "posts", post_id = post.id, comment_id, author = %user, "comment added");
        }
        Err(_) => {
            counter!("comments_created_total", "result" => "rejected").increment(1);
            debug!(stage = "posts", post_id = post.id, author = %user, "empty comment dropped");
        }
    }
    Ok(redirect_found(&post_url(post.id)))
}
