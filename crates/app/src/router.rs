use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{services::ServeDir, trace::TraceLayer};
use yatube_storage::Database;

use crate::auth::SessionSigner;
use crate::cache::{cache_index_page, PageCache};
use crate::error::AppError;
use crate::media::MediaStore;
use crate::{accounts, feed, follow, posts, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    sessions: SessionSigner,
    page_cache: PageCache,
    media: MediaStore,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        sessions: SessionSigner,
        page_cache: PageCache,
        media: MediaStore,
    ) -> Self {
        Self {
            metrics,
            storage,
            sessions,
            page_cache,
            media,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn sessions(&self) -> &SessionSigner {
        &self.sessions
    }

    pub fn page_cache(&self) -> &PageCache {
        &self.page_cache
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    let index = get(feed::index).route_layer(middleware::from_fn_with_state(
        state.clone(),
        cache_index_page,
    ));
    let media = ServeDir::new(state.media().root());
    let upload_limit = state.media().upload_limit();

    Router::new()
        .route("/", index)
        .route("/group/:slug/", get(feed::group_posts))
        .route("/profile/:username/", get(feed::profile))
        .route("/follow/", get(feed::follow_index))
        .route("/profile/:username/follow/", get(follow::profile_follow))
        .route("/profile/:username/unfollow/", get(follow::profile_unfollow))
        .route("/posts/:id/", get(posts::post_detail))
        .route(
            "/create/",
            get(posts::post_create_form)
                .post(posts::post_create)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/posts/:id/edit/",
            get(posts::post_edit_form)
                .post(posts::post_edit)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/posts/:id/comment/",
            get(posts::comment_without_form).post(posts::add_comment),
        )
        .route(
            "/auth/signup/",
            get(accounts::signup_form).post(accounts::signup),
        )
        .route(
            "/auth/login/",
            get(accounts::login_form).post(accounts::login),
        )
        .route(
            "/auth/logout/",
            get(accounts::logout).post(accounts::logout),
        )
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .nest_service("/media", media)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn not_found() -> AppError {
    AppError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::test_support::{body_text, count_posts, TestContext, SMALL_GIF};

    #[tokio::test]
    async fn healthz_returns_ok() {
        let ctx = TestContext::new().await;
        let response = ctx.get("/healthz", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let ctx = TestContext::new().await;
        let response = ctx.get("/metrics", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn unknown_path_renders_not_found_page() {
        let ctx = TestContext::new().await;
        let response = ctx.get("/unexisting_page/", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("Page not found"));
    }

    #[tokio::test]
    async fn media_files_are_served() {
        let ctx = TestContext::new().await;
        let dir = ctx.media_path("posts");
        std::fs::create_dir_all(&dir).expect("media dir");
        std::fs::write(dir.join("small.gif"), SMALL_GIF).expect("write");

        let response = ctx.get("/media/posts/small.gif", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/gif"
        );
    }

    #[tokio::test]
    async fn index_is_cached_until_cleared() {
        let ctx = TestContext::new().await;
        let author = ctx.create_user("leo").await;
        ctx.create_post(&author, "Before caching", None).await;

        let first = body_text(ctx.get("/", None).await).await;
        assert_eq!(count_posts(&first), 1);

        ctx.create_post(&author, "Written after caching", None).await;
        let cached = body_text(ctx.get("/", None).await).await;
        assert_eq!(first, cached);

        ctx.state.page_cache().clear();
        let fresh = body_text(ctx.get("/", None).await).await;
        assert_ne!(first, fresh);
        assert!(fresh.contains("Written after caching"));
        assert_eq!(count_posts(&fresh), 2);
    }

    #[tokio::test]
    async fn cache_is_kept_per_viewer() {
        let ctx = TestContext::new().await;
        let reader = ctx.create_user("mia").await;

        let guest = body_text(ctx.get("/", None).await).await;
        let signed_in = body_text(ctx.get("/", Some(&reader)).await).await;
        assert!(!guest.contains("Signed in as mia"));
        assert!(signed_in.contains("Signed in as mia"));
    }

    #[tokio::test]
    async fn post_dates_come_from_state_clock() {
        let fixed = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
        let ctx = TestContext::with_clock(Arc::new(move || fixed)).await;
        let author = ctx.create_user("leo").await;

        let response = ctx
            .post_form("/create/", Some(&author), &[("text", "Dated post")])
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let body = body_text(ctx.get("/profile/leo/", None).await).await;
        assert!(body.contains("17 May 2024 09:30"));
    }
}
