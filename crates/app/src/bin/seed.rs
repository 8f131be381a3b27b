//! Seeds a group and/or an account from environment variables.
//! Run with: cargo run --bin seed

use std::env;

use chrono::Utc;
use yatube_app::seed::{seed_group, seed_user, GroupSeed, SeedOutcome, UserSeed};
use yatube_storage::Database;
use yatube_util::{database_url, load_env_file};

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();

    let url = database_url();
    println!("Connecting to {url}...");
    let database = Database::connect(&url).await?;
    database.run_migrations().await?;

    match (var("SEED_GROUP_SLUG"), var("SEED_GROUP_TITLE")) {
        (Some(slug), Some(title)) => {
            let seed = GroupSeed {
                slug,
                title,
                description: var("SEED_GROUP_DESCRIPTION").unwrap_or_default(),
            };
            match seed_group(&database, &seed).await? {
                SeedOutcome::Created => {
                    println!("Created group '{}' at /group/{}/", seed.title, seed.slug)
                }
                SeedOutcome::AlreadyExists => {
                    println!("Group '{}' already exists, skipping", seed.slug)
                }
            }
        }
        (None, None) => println!("SEED_GROUP_SLUG/SEED_GROUP_TITLE not set, no group seeded"),
        _ => return Err("SEED_GROUP_SLUG and SEED_GROUP_TITLE must be set together".into()),
    }

    match (var("SEED_USERNAME"), var("SEED_PASSWORD")) {
        (Some(username), Some(password)) => {
            let seed = UserSeed { username, password };
            match seed_user(&database, &seed, Utc::now()).await? {
                SeedOutcome::Created => println!("Created user '{}'", seed.username),
                SeedOutcome::AlreadyExists => {
                    println!("User '{}' already exists, skipping", seed.username)
                }
            }
        }
        (None, None) => println!("SEED_USERNAME/SEED_PASSWORD not set, no user seeded"),
        _ => return Err("SEED_USERNAME and SEED_PASSWORD must be set together".into()),
    }

    Ok(())
}
