//! Domain records, form validation and pagination for the blog.
//!
//! Nothing in this crate performs I/O; storage and HTTP layers build on it.

pub mod forms;
pub mod pagination;
pub mod types;

pub use pagination::{Page, PageWindow, Paginator, POSTS_PER_PAGE};
pub use types::{Comment, FeedScope, Follow, Group, Post, User};
