use askama::Template;
use axum::response::Html;
use yatube_core::{
    forms::{
        FieldErrors, FieldMeta, PostFormInput, SignupFormInput, POST_GROUP_FIELD,
        POST_IMAGE_FIELD, POST_TEXT_FIELD,
    },
    Comment, Group, Page, Post, User,
};

use crate::error::AppError;
use crate::media::MediaStore;

const DATE_FORMAT: &str = "%d %b %Y %H:%M";

pub fn render<T: Template>(template: &T) -> Result<Html<String>, AppError> {
    Ok(Html(template.render()?))
}

#[derive(Debug, Clone)]
pub struct GroupLink {
    pub title: String,
    pub slug: String,
}

impl From<&Group> for GroupLink {
    fn from(group: &Group) -> Self {
        Self {
            title: group.title.clone(),
            slug: group.slug.clone(),
        }
    }
}

/// Post as shown in listings and on the detail page.
#[derive(Debug, Clone)]
pub struct PostCard {
    pub id: i64,
    pub text: String,
    pub excerpt: String,
    pub pub_date: String,
    pub author_username: String,
    pub author_name: String,
    pub group: Option<GroupLink>,
    pub image_url: Option<String>,
}

impl From<&Post> for PostCard {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id,
            text: post.text.clone(),
            excerpt: post.to_string(),
            pub_date: post.pub_date.format(DATE_FORMAT).to_string(),
            author_username: post.author.username.clone(),
            author_name: post.author.full_name(),
            group: post.group.as_ref().map(GroupLink::from),
            image_url: post.image.as_deref().map(MediaStore::url),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageLink {
    pub number: u64,
    pub current: bool,
}

/// Pagination controls for a feed page.
#[derive(Debug, Clone)]
pub struct PageNav {
    pub number: u64,
    pub num_pages: u64,
    pub has_previous: bool,
    pub has_next: bool,
    pub previous: u64,
    pub next: u64,
    pub links: Vec<PageLink>,
}

impl PageNav {
    pub fn show(&self) -> bool {
        self.num_pages > 1
    }
}

/// Loaded feed page split into cards and controls.
pub struct FeedPage {
    pub posts: Vec<PostCard>,
    pub page: PageNav,
}

impl From<Page<Post>> for FeedPage {
    fn from(page: Page<Post>) -> Self {
        let nav = PageNav {
            number: page.number,
            num_pages: page.num_pages,
            has_previous: page.has_previous(),
            has_next: page.has_next(),
            previous: page.previous_page_number(),
            next: page.next_page_number(),
            links: page
                .page_range()
                .into_iter()
                .map(|number| PageLink {
                    number,
                    current: number == page.number,
                })
                .collect(),
        };
        Self {
            posts: page.items.iter().map(PostCard::from).collect(),
            page: nav,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommentView {
    pub author_username: String,
    pub author_name: String,
    pub text: String,
    pub created: String,
}

impl From<&Comment> for CommentView {
    fn from(comment: &Comment) -> Self {
        Self {
            author_username: comment.author.username.clone(),
            author_name: comment.author.full_name(),
            text: comment.text.clone(),
            created: comment.created.format(DATE_FORMAT).to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupChoice {
    pub id: i64,
    pub title: String,
    pub selected: bool,
}

/// Post form state: submitted values plus per-field errors.
#[derive(Debug, Clone, Default)]
pub struct PostFormView {
    pub text: String,
    pub text_errors: Vec<String>,
    pub group_errors: Vec<String>,
    pub image_errors: Vec<String>,
    pub groups: Vec<GroupChoice>,
    pub current_image: Option<String>,
}

impl PostFormView {
    pub fn new(groups: &[Group], text: &str, selected: Option<i64>) -> Self {
        Self {
            text: text.to_string(),
            groups: groups
                .iter()
                .map(|group| GroupChoice {
                    id: group.id,
                    title: group.title.clone(),
                    selected: Some(group.id) == selected,
                })
                .collect(),
            ..Self::default()
        }
    }

    /// Rebuilds the form from a rejected submission.
    pub fn rejected(groups: &[Group], input: &PostFormInput, errors: &FieldErrors) -> Self {
        let selected = input.group.trim().parse::<i64>().ok();
        Self {
            text_errors: errors.get(POST_TEXT_FIELD.name).to_vec(),
            group_errors: errors.get(POST_GROUP_FIELD.name).to_vec(),
            image_errors: errors.get(POST_IMAGE_FIELD.name).to_vec(),
            ..Self::new(groups, &input.text, selected)
        }
    }

    pub fn with_current_image(mut self, image: Option<&str>) -> Self {
        self.current_image = image.map(MediaStore::url);
        self
    }
}

#[derive(Template)]
#[template(path = "posts/index.html")]
pub struct IndexTemplate {
    pub viewer: Option<User>,
    pub posts: Vec<PostCard>,
    pub page: PageNav,
}

#[derive(Template)]
#[template(path = "posts/group_list.html")]
pub struct GroupListTemplate {
    pub viewer: Option<User>,
    pub group: Group,
    pub posts: Vec<PostCard>,
    pub page: PageNav,
}

#[derive(Template)]
#[template(path = "posts/profile.html")]
pub struct ProfileTemplate {
    pub viewer: Option<User>,
    pub author_username: String,
    pub author_name: String,
    pub posts_count: u64,
    pub following: bool,
    pub can_follow: bool,
    pub posts: Vec<PostCard>,
    pub page: PageNav,
}

#[derive(Template)]
#[template(path = "posts/follow.html")]
pub struct FollowTemplate {
    pub viewer: Option<User>,
    pub posts: Vec<PostCard>,
    pub page: PageNav,
}

#[derive(Template)]
#[template(path = "posts/post_detail.html")]
pub struct PostDetailTemplate {
    pub viewer: Option<User>,
    pub post: PostCard,
    pub author_posts_count: u64,
    pub can_edit: bool,
    pub comments: Vec<CommentView>,
    pub comment_field: FieldMeta,
}

#[derive(Template)]
#[template(path = "posts/create_post.html")]
pub struct PostFormTemplate {
    pub viewer: Option<User>,
    pub is_edit: bool,
    pub post_id: i64,
    pub form: PostFormView,
    pub text_field: FieldMeta,
    pub group_field: FieldMeta,
    pub image_field: FieldMeta,
}

impl PostFormTemplate {
    pub fn create(viewer: User, form: PostFormView) -> Self {
        Self::build(viewer, false, 0, form)
    }

    pub fn edit(viewer: User, post_id: i64, form: PostFormView) -> Self {
        Self::build(viewer, true, post_id, form)
    }

    fn build(viewer: User, is_edit: bool, post_id: i64, form: PostFormView) -> Self {
        Self {
            viewer: Some(viewer),
            is_edit,
            post_id,
            form,
            text_field: POST_TEXT_FIELD,
            group_field: POST_GROUP_FIELD,
            image_field: POST_IMAGE_FIELD,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignupFormView {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub username_errors: Vec<String>,
    pub first_name_errors: Vec<String>,
    pub last_name_errors: Vec<String>,
    pub password1_errors: Vec<String>,
    pub password2_errors: Vec<String>,
}

impl SignupFormView {
    /// Echoes the submitted names back; passwords are never re-rendered.
    pub fn rejected(input: &SignupFormInput, errors: &FieldErrors) -> Self {
        Self {
            username: input.username.clone(),
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
            username_errors: errors.get("username").to_vec(),
            first_name_errors: errors.get("first_name").to_vec(),
            last_name_errors: errors.get("last_name").to_vec(),
            password1_errors: errors.get("password1").to_vec(),
            password2_errors: errors.get("password2").to_vec(),
        }
    }
}

#[derive(Template)]
#[template(path = "users/signup.html")]
pub struct SignupTemplate {
    pub viewer: Option<User>,
    pub form: SignupFormView,
}

#[derive(Template)]
#[template(path = "users/login.html")]
pub struct LoginTemplate {
    pub viewer: Option<User>,
    pub username: String,
    pub next: String,
    pub errors: Vec<String>,
}

impl LoginTemplate {
    pub fn with_errors(username: &str, next: &str, errors: &FieldErrors) -> Self {
        let mut messages = errors.non_field().to_vec();
        messages.extend(errors.get("username").iter().cloned());
        messages.extend(errors.get("password").iter().cloned());
        Self {
            viewer: None,
            username: username.to_string(),
            next: next.to_string(),
            errors: messages,
        }
    }
}

#[derive(Template)]
#[template(path = "users/logged_out.html")]
pub struct LoggedOutTemplate {
    pub viewer: Option<User>,
}

#[derive(Template)]
#[template(path = "core/404.html")]
pub struct NotFoundTemplate {
    pub viewer: Option<User>,
}

#[derive(Template)]
#[template(path = "core/500.html")]
pub struct ServerErrorTemplate {
    pub viewer: Option<User>,
}
