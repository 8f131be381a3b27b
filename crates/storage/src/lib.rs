use std::{borrow::Cow, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Row, SqlitePool,
};
use thiserror::Error;

use yatube_core::{Comment, FeedScope, Follow, Group, PageWindow, Post, User};

const SQLITE_UNIQUE_VIOLATION: &str = "2067";
const SQLITE_FOREIGN_KEY_VIOLATION: &str = "787";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Every pooled connection enforces foreign keys and uses WAL journaling.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for accounts.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for post groups.
    pub fn groups(&self) -> GroupRepository {
        GroupRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for posts and feeds.
    pub fn posts(&self) -> PostRepository {
        PostRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for comments.
    pub fn comments(&self) -> CommentRepository {
        CommentRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for follow edges.
    pub fn follows(&self) -> FollowRepository {
        FollowRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn violation_code(err: &sqlx::Error) -> Option<Cow<'_, str>> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code(),
        _ => None,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    violation_code(err).as_deref() == Some(SQLITE_UNIQUE_VIOLATION)
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    violation_code(err).as_deref() == Some(SQLITE_FOREIGN_KEY_VIOLATION)
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    first_name: String,
    last_name: String,
    date_joined: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> User {
        User {
            id: self.id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            date_joined: self.date_joined,
        }
    }
}

/// Repository for platform accounts.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Inserts a new account; usernames are unique.
    ///
    /// Inserts go through `execute` so the row is committed before the call returns.
    pub async fn create(&self, record: &NewUser<'_>) -> Result<User, UserError> {
        let result = sqlx::query(
            "INSERT INTO users (username, first_name, last_name, password_hash, date_joined) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.username)
        .bind(record.first_name)
        .bind(record.last_name)
        .bind(record.password_hash)
        .bind(to_rfc3339(record.date_joined))
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                UserError::UsernameTaken
            } else {
                UserError::Database(err)
            }
        })?;

        Ok(User {
            id: result.last_insert_rowid(),
            username: record.username.to_string(),
            first_name: record.first_name.to_string(),
            last_name: record.last_name.to_string(),
            date_joined: record.date_joined,
        })
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, first_name, last_name, date_joined FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserRow::into_domain))
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, first_name, last_name, date_joined FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserRow::into_domain))
    }

    /// Loads an account together with its stored password hash.
    pub async fn fetch_credentials(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>, UserError> {
        let row = sqlx::query(
            "SELECT id, username, first_name, last_name, date_joined, password_hash \
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user = User {
            id: row.get("id"),
            username: row.get("username"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            date_joined: row.get("date_joined"),
        };
        Ok(Some((user, row.get("password_hash"))))
    }
}

/// Data required to create an account.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password_hash: &'a str,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("a user with that username already exists")]
    UsernameTaken,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for post groups.
#[derive(Clone)]
pub struct GroupRepository {
    pool: SqlitePool,
}

impl GroupRepository {
    pub async fn create(&self, record: &NewGroup<'_>) -> Result<Group, GroupError> {
        let result = sqlx::query(
            "INSERT INTO post_groups (title, slug, description) VALUES (?, ?, ?)",
        )
        .bind(record.title)
        .bind(record.slug)
        .bind(record.description)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                GroupError::SlugTaken
            } else {
                GroupError::Database(err)
            }
        })?;

        Ok(Group {
            id: result.last_insert_rowid(),
            title: record.title.to_string(),
            slug: record.slug.to_string(),
            description: record.description.to_string(),
        })
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Group>, GroupError> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT id, title, slug, description FROM post_groups WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GroupRow::into_domain))
    }

    /// Lists every group ordered by title; used for form choices.
    pub async fn list_all(&self) -> Result<Vec<Group>, GroupError> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT id, title, slug, description FROM post_groups ORDER BY title, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GroupRow::into_domain).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GroupRow {
    id: i64,
    title: String,
    slug: String,
    description: String,
}

impl GroupRow {
    fn into_domain(self) -> Group {
        Group {
            id: self.id,
            title: self.title,
            slug: self.slug,
            description: self.description,
        }
    }
}

pub struct NewGroup<'a> {
    pub title: &'a str,
    pub slug: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("a group with that slug already exists")]
    SlugTaken,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const POST_SELECT: &str = r#"
SELECT p.id,
       p.text,
       p.pub_date,
       p.image,
       u.id          AS author_id,
       u.username    AS author_username,
       u.first_name  AS author_first_name,
       u.last_name   AS author_last_name,
       u.date_joined AS author_date_joined,
       g.id          AS group_id,
       g.title       AS group_title,
       g.slug        AS group_slug,
       g.description AS group_description
  FROM posts AS p
  JOIN users AS u ON u.id = p.author_id
  LEFT JOIN post_groups AS g ON g.id = p.group_id
"#;

const FEED_ORDER: &str = " ORDER BY p.pub_date DESC, p.id DESC";

/// Returns the WHERE clause restricting a feed and its single bound id, if any.
fn scope_filter(scope: FeedScope) -> (&'static str, Option<i64>) {
    match scope {
        FeedScope::All => ("", None),
        FeedScope::Group(id) => (" WHERE p.group_id = ?", Some(id)),
        FeedScope::Author(id) => (" WHERE p.author_id = ?", Some(id)),
        FeedScope::FollowedBy(id) => (
            " WHERE p.author_id IN (SELECT author_id FROM follows WHERE user_id = ?)",
            Some(id),
        ),
    }
}

/// Post row joined with its author and group.
#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    id: i64,
    text: String,
    pub_date: DateTime<Utc>,
    image: Option<String>,
    author_id: i64,
    author_username: String,
    author_first_name: String,
    author_last_name: String,
    author_date_joined: DateTime<Utc>,
    group_id: Option<i64>,
    group_title: Option<String>,
    group_slug: Option<String>,
    group_description: Option<String>,
}

impl PostRow {
    fn into_domain(self) -> Post {
        let group = match (self.group_id, self.group_title, self.group_slug) {
            (Some(id), Some(title), Some(slug)) => Some(Group {
                id,
                title,
                slug,
                description: self.group_description.unwrap_or_default(),
            }),
            _ => None,
        };
        Post {
            id: self.id,
            text: self.text,
            pub_date: self.pub_date,
            image: self.image,
            author: User {
                id: self.author_id,
                username: self.author_username,
                first_name: self.author_first_name,
                last_name: self.author_last_name,
                date_joined: self.author_date_joined,
            },
            group,
        }
    }
}

/// Repository for posts and the feeds built from them.
#[derive(Clone)]
pub struct PostRepository {
    pool: SqlitePool,
}

impl PostRepository {
    /// Inserts a post and returns its id.
    pub async fn create(&self, record: &NewPost<'_>) -> Result<i64, PostError> {
        let result = sqlx::query(
            "INSERT INTO posts (text, pub_date, author_id, group_id, image) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.text)
        .bind(to_rfc3339(record.pub_date))
        .bind(record.author_id)
        .bind(record.group_id)
        .bind(record.image)
        .execute(&self.pool)
        .await
        .map_err(PostError::from_sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// Updates text and group; the image is replaced only when a new one is given.
    pub async fn update(&self, id: i64, changes: &PostUpdate<'_>) -> Result<(), PostError> {
        let result = sqlx::query(
            "UPDATE posts \
             SET text = ?, group_id = ?, image = COALESCE(?, image) \
             WHERE id = ?",
        )
        .bind(changes.text)
        .bind(changes.group_id)
        .bind(changes.image)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(PostError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(PostError::NotFound);
        }
        Ok(())
    }

    pub async fn find(&self, id: i64) -> Result<Option<Post>, PostError> {
        let sql = format!("{POST_SELECT} WHERE p.id = ?");
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PostRow::into_domain))
    }

    /// Counts the posts a feed covers.
    pub async fn count(&self, scope: FeedScope) -> Result<u64, PostError> {
        let (filter, param) = scope_filter(scope);
        let sql = format!("SELECT COUNT(*) FROM posts AS p{filter}");
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(value) = param {
            query = query.bind(value);
        }
        let count = query.fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    /// Loads one page of a feed, newest first.
    pub async fn list_page(
        &self,
        scope: FeedScope,
        window: &PageWindow,
    ) -> Result<Vec<Post>, PostError> {
        let (filter, param) = scope_filter(scope);
        let sql = format!("{POST_SELECT}{filter}{FEED_ORDER} LIMIT ? OFFSET ?");
        let mut query = sqlx::query_as::<_, PostRow>(&sql);
        if let Some(value) = param {
            query = query.bind(value);
        }
        let rows = query
            .bind(window.limit as i64)
            .bind(window.offset as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(PostRow::into_domain).collect())
    }
}

pub struct NewPost<'a> {
    pub text: &'a str,
    pub pub_date: DateTime<Utc>,
    pub author_id: i64,
    pub group_id: Option<i64>,
    pub image: Option<&'a str>,
}

pub struct PostUpdate<'a> {
    pub text: &'a str,
    pub group_id: Option<i64>,
    pub image: Option<&'a str>,
}

#[derive(Debug, Error)]
pub enum PostError {
    #[error("post not found")]
    NotFound,
    #[error("referenced author or group does not exist")]
    MissingReference,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PostError {
    fn from_sqlx(err: sqlx::Error) -> Self {
        if is_foreign_key_violation(&err) {
            Self::MissingReference
        } else {
            Self::Database(err)
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CommentRow {
    id: i64,
    post_id: i64,
    text: String,
    created: DateTime<Utc>,
    author_id: i64,
    author_username: String,
    author_first_name: String,
    author_last_name: String,
    author_date_joined: DateTime<Utc>,
}

impl CommentRow {
    fn into_domain(self) -> Comment {
        Comment {
            id: self.id,
            post_id: self.post_id,
            text: self.text,
            created: self.created,
            author: User {
                id: self.author_id,
                username: self.author_username,
                first_name: self.author_first_name,
                last_name: self.author_last_name,
                date_joined: self.author_date_joined,
            },
        }
    }
}

/// Repository for comments.
#[derive(Clone)]
pub struct CommentRepository {
    pool: SqlitePool,
}

impl CommentRepository {
    pub async fn create(&self, record: &NewComment<'_>) -> Result<i64, CommentError> {
        let result = sqlx::query(
            "INSERT INTO comments (post_id, author_id, text, created) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(record.post_id)
        .bind(record.author_id)
        .bind(record.text)
        .bind(to_rfc3339(record.created))
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                CommentError::MissingReference
            } else {
                CommentError::Database(err)
            }
        })?;
        Ok(result.last_insert_rowid())
    }

    /// Lists a post's comments in the order they were written.
    pub async fn list_for_post(&self, post_id: i64) -> Result<Vec<Comment>, CommentError> {
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
SELECT c.id,
       c.post_id,
       c.text,
       c.created,
       u.id          AS author_id,
       u.username    AS author_username,
       u.first_name  AS author_first_name,
       u.last_name   AS author_last_name,
       u.date_joined AS author_date_joined
  FROM comments AS c
  JOIN users AS u ON u.id = c.author_id
 WHERE c.post_id = ?
 ORDER BY c.created ASC, c.id ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CommentRow::into_domain).collect())
    }

    pub async fn count(&self) -> Result<u64, CommentError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

pub struct NewComment<'a> {
    pub post_id: i64,
    pub author_id: i64,
    pub text: &'a str,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CommentError {
    #[error("referenced post or author does not exist")]
    MissingReference,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for follow edges.
#[derive(Clone)]
pub struct FollowRepository {
    pool: SqlitePool,
}

impl FollowRepository {
    /// Creates the `user_id → author_id` edge unless it already exists.
    pub async fn follow(&self, user_id: i64, author_id: i64) -> Result<FollowOutcome, FollowError> {
        let result = sqlx::query(
            "INSERT INTO follows (user_id, author_id) VALUES (?, ?) \
             ON CONFLICT(user_id, author_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(author_id)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            FollowOutcome::AlreadyFollowing
        } else {
            FollowOutcome::Created
        })
    }

    /// Removes the edge; returns `false` when there was nothing to remove.
    pub async fn unfollow(&self, user_id: i64, author_id: i64) -> Result<bool, FollowError> {
        let result = sqlx::query("DELETE FROM follows WHERE user_id = ? AND author_id = ?")
            .bind(user_id)
            .bind(author_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find(
        &self,
        user_id: i64,
        author_id: i64,
    ) -> Result<Option<Follow>, FollowError> {
        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            "SELECT id, user_id, author_id FROM follows WHERE user_id = ? AND author_id = ?",
        )
        .bind(user_id)
        .bind(author_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, user_id, author_id)| Follow {
            id,
            user_id,
            author_id,
        }))
    }

    pub async fn is_following(&self, user_id: i64, author_id: i64) -> Result<bool, FollowError> {
        Ok(self.find(user_id, author_id).await?.is_some())
    }

    pub async fn count(&self) -> Result<u64, FollowError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follows")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

/// Result of a follow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Created,
    AlreadyFollowing,
}

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
