use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use yatube_core::{FeedScope, Group, User};
use yatube_storage::{Database, NewGroup, NewPost, NewUser};

use crate::auth::{hash_password, SessionSigner, SESSION_COOKIE};
use crate::cache::PageCache;
use crate::media::{MediaStore, DEFAULT_UPLOAD_LIMIT};
use crate::router::{app_router, AppState};
use crate::telemetry;

pub const SMALL_GIF: &[u8] = b"GIF89a\x02\x00\x01\x00\x80\x00\x00\x00\x00\x00\xff\xff\xff!\xf9\x04\x00\x00\x00\x00\x00,\x00\x00\x00\x00\x02\x00\x01\x00\x00\x02\x02\x0c\n\x00;";

const PLACEHOLDER_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHQ$placeholder";
const MULTIPART_BOUNDARY: &str = "yatube-test-boundary";

/// Application wired to a throwaway database and media root.
pub struct TestContext {
    pub state: AppState,
    dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::build(None, DEFAULT_UPLOAD_LIMIT).await
    }

    pub async fn with_clock(clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self::build(Some(clock), DEFAULT_UPLOAD_LIMIT).await
    }

    pub async fn with_upload_limit(bytes: usize) -> Self {
        Self::build(None, bytes).await
    }

    async fn build(
        clock: Option<Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>>,
        upload_limit: usize,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");

        let state = AppState::new(
            telemetry::init_metrics().expect("metrics init"),
            database,
            SessionSigner::new(b"test-session-secret".to_vec(), Duration::from_secs(3600)),
            PageCache::new(Duration::from_secs(20)),
            MediaStore::new(dir.path().join("media")).with_upload_limit(upload_limit),
        );
        let state = match clock {
            Some(clock) => state.with_clock(clock),
            None => state,
        };
        Self { state, dir }
    }

    pub fn app(&self) -> Router {
        app_router(self.state.clone())
    }

    pub fn media_path(&self, relative: &str) -> PathBuf {
        self.dir.path().join("media").join(relative)
    }

    /// Creates an account with a placeholder hash; it cannot sign in.
    pub async fn create_user(&self, username: &str) -> User {
        self.insert_user(username, PLACEHOLDER_HASH).await
    }

    pub async fn create_user_with_password(&self, username: &str, password: &str) -> User {
        let hash = hash_password(password).expect("hash");
        self.insert_user(username, &hash).await
    }

    async fn insert_user(&self, username: &str, password_hash: &str) -> User {
        self.state
            .storage()
            .users()
            .create(&NewUser {
                username,
                first_name: "",
                last_name: "",
                password_hash,
                date_joined: self.state.now(),
            })
            .await
            .expect("create user")
    }

    pub async fn create_group(&self, slug: &str, title: &str) -> Group {
        self.state
            .storage()
            .groups()
            .create(&NewGroup {
                title,
                slug,
                description: "Test group",
            })
            .await
            .expect("create group")
    }

    pub async fn create_post(&self, author: &User, text: &str, group: Option<&Group>) -> i64 {
        self.state
            .storage()
            .posts()
            .create(&NewPost {
                text,
                pub_date: self.state.now(),
                author_id: author.id,
                group_id: group.map(|group| group.id),
                image: None,
            })
            .await
            .expect("create post")
    }

    pub async fn post_count(&self) -> u64 {
        self.state
            .storage()
            .posts()
            .count(FeedScope::All)
            .await
            .expect("count posts")
    }

    pub async fn comment_count(&self) -> u64 {
        self.state
            .storage()
            .comments()
            .count()
            .await
            .expect("count comments")
    }

    pub async fn follow_count(&self) -> u64 {
        self.state
            .storage()
            .follows()
            .count()
            .await
            .expect("count follows")
    }

    /// `Cookie` header value carrying a valid session for `user`.
    pub fn session_cookie(&self, user: &User) -> String {
        let token = self
            .state
            .sessions()
            .issue(user.id, self.state.now())
            .expect("issue session");
        format!("{SESSION_COOKIE}={token}")
    }

    fn request(
        &self,
        method: &str,
        uri: &str,
        user: Option<&User>,
    ) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(uri);
        match user {
            Some(user) => builder.header(header::COOKIE, self.session_cookie(user)),
            None => builder,
        }
    }

    pub async fn get(&self, uri: &str, user: Option<&User>) -> Response {
        let request = self
            .request("GET", uri, user)
            .body(Body::empty())
            .expect("request");
        self.app().oneshot(request).await.expect("response")
    }

    pub async fn get_with_cookie(&self, uri: &str, cookie: &str) -> Response {
        let request = Request::builder()
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .expect("request");
        self.app().oneshot(request).await.expect("response")
    }

    pub async fn post_form(
        &self,
        uri: &str,
        user: Option<&User>,
        fields: &[(&str, &str)],
    ) -> Response {
        let body = serde_urlencoded::to_string(fields).expect("encode form");
        let request = self
            .request("POST", uri, user)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .expect("request");
        self.app().oneshot(request).await.expect("response")
    }

    /// Posts `multipart/form-data` with text fields and an optional file part.
    pub async fn post_multipart(
        &self,
        uri: &str,
        user: Option<&User>,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
    ) -> Response {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((name, filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

        let request = self
            .request("POST", uri, user)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request");
        self.app().oneshot(request).await.expect("response")
    }
}

pub async fn body_text(response: Response) -> String {
    let collected = response
        .into_body()
        .collect()
        .await
        .expect("body should read");
    String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8")
}

pub fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// `SMALL_GIF` followed by zero padding up to `len` bytes; still decodes.
pub fn padded_gif(len: usize) -> Vec<u8> {
    let mut bytes = SMALL_GIF.to_vec();
    bytes.resize(len.max(SMALL_GIF.len()), 0);
    bytes
}

/// Number of post cards rendered on a page.
pub fn count_posts(body: &str) -> usize {
    body.matches(r#"<article class="post">"#).count()
}
