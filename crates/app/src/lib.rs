//! HTTP layer of the Yatube blog: routing, sessions, page cache and handlers.

pub mod accounts;
pub mod auth;
pub mod cache;
pub mod error;
pub mod feed;
pub mod follow;
pub mod media;
pub mod posts;
pub mod router;
pub mod seed;
pub mod telemetry;
pub mod templates;

#[cfg(test)]
mod test_support;
