use std::time::Duration;

use axum::{
    body::{self, Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use moka::future::Cache;
use tracing::{debug, error};

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::router::AppState;

pub const INDEX_CACHE_PREFIX: &str = "index_page";
const MAX_CACHED_PAGES: u64 = 1_000;

/// Rendered response body kept by the page cache.
#[derive(Debug, Clone)]
pub struct CachedPage {
    content_type: Option<HeaderValue>,
    body: Bytes,
}

impl CachedPage {
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        if let Some(value) = self.content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        response
    }
}

/// Whole-page cache with a fixed time-to-live and no other invalidation.
#[derive(Clone)]
pub struct PageCache {
    pages: Cache<String, CachedPage>,
}

impl PageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pages: Cache::builder()
                .max_capacity(MAX_CACHED_PAGES)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Responses differ per viewer (navigation shows the signed-in user).
    pub fn key(prefix: &str, viewer: Option<i64>, path_and_query: &str) -> String {
        match viewer {
            Some(id) => format!("{prefix}:user-{id}:{path_and_query}"),
            None => format!("{prefix}:anonymous:{path_and_query}"),
        }
    }

    pub async fn get(&self, key: &str) -> Option<CachedPage> {
        self.pages.get(key).await
    }

    pub async fn insert(&self, key: String, page: CachedPage) {
        self.pages.insert(key, page).await;
    }

    /// Drops every cached page; the next request renders afresh.
    pub fn clear(&self) {
        self.pages.invalidate_all();
    }
}

/// Middleware serving the main feed from [`PageCache`] for the configured TTL.
pub async fn cache_index_page(
    State(state): State<AppState>,
    CurrentUser(viewer): CurrentUser,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let key = PageCache::key(
        INDEX_CACHE_PREFIX,
        viewer.as_ref().map(|user| user.id),
        &path_and_query,
    );

    if let Some(page) = state.page_cache().get(&key).await {
        counter!("page_cache_requests_total", "result" => "hit").increment(1);
        debug!(stage = "cache", %key, "serving cached page");
        return page.into_response();
    }
    counter!("page_cache_requests_total", "result" => "miss").increment(1);

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(stage = "cache", error = %err, "failed to buffer response body");
            return AppError::Internal(err.to_string()).into_response();
        }
    };

    state
        .page_cache()
        .insert(
            key,
            CachedPage {
                content_type: parts.headers.get(header::CONTENT_TYPE).cloned(),
                body: bytes.clone(),
            },
        )
        .await;

    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &'static str) -> CachedPage {
        CachedPage {
            content_type: None,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn keys_separate_viewers_and_pages() {
        let anon = PageCache::key(INDEX_CACHE_PREFIX, None, "/");
        let user = PageCache::key(INDEX_CACHE_PREFIX, Some(3), "/");
        let page_two = PageCache::key(INDEX_CACHE_PREFIX, None, "/?page=2");
        assert_eq!(anon, "index_page:anonymous:/");
        assert_ne!(anon, user);
        assert_ne!(anon, page_two);
    }

    #[tokio::test]
    async fn clear_drops_entries() {
        let cache = PageCache::new(Duration::from_secs(20));
        cache.insert("k".into(), page("first")).await;
        assert_eq!(cache.get("k").await.unwrap().body(), "first");

        cache.clear();
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = PageCache::new(Duration::from_millis(100));
        cache.insert("k".into(), page("body")).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cache.get("k").await.is_none());
    }
}
