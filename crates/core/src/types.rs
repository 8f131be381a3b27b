use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of characters of a post's text used for its display form.
pub const POST_DISPLAY_LEN: usize = 15;

/// Registered platform account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub date_joined: DateTime<Utc>,
}

impl User {
    /// Returns "first last" when a name is on file, otherwise the username.
    pub fn full_name(&self) -> String {
        let joined = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let joined = joined.trim();
        if joined.is_empty() {
            self.username.clone()
        } else {
            joined.to_string()
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// Named category posts can be filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// A post joined with its author and optional group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: i64,
    pub text: String,
    pub pub_date: DateTime<Utc>,
    /// Media-root relative path, e.g. `posts/cat.gif`.
    pub image: Option<String>,
    pub author: User,
    pub group: Option<Group>,
}

impl Post {
    pub fn is_authored_by(&self, user: &User) -> bool {
        self.author.id == user.id
    }
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.text.chars().take(POST_DISPLAY_LEN).collect();
        f.write_str(&short)
    }
}

/// Comment left on a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author: User,
    pub text: String,
    pub created: DateTime<Utc>,
}

/// Directed subscription edge: `user_id` follows `author_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Follow {
    pub id: i64,
    pub user_id: i64,
    pub author_id: i64,
}

/// Selects which posts a feed lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    All,
    Group(i64),
    Author(i64),
    FollowedBy(i64),
}

impl FeedScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Group(_) => "group",
            Self::Author(_) => "author",
            Self::FollowedBy(_) => "follow",
        }
    }
}
