use bcrypt::{hash, verify};
use once_cell::sync::Lazy;
use rand::Rng;

use crate::error::AppError;
use crate::repository::Repository;
use crate::session::Identity;

pub use bcrypt::DEFAULT_COST;

/// Checked against when the email is unknown, so both failures cost one bcrypt run.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash("course-portal-absent-user", DEFAULT_COST).ok());

pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    Ok(hash(password, cost)?)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    verify(password, hash).unwrap_or(false)
}

/// Hashes on the blocking pool; bcrypt would otherwise stall a runtime worker.
pub async fn hash_password_blocking(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password, cost)).await?
}

async fn verify_password_blocking(password: &str, hash: Option<String>) -> Result<bool, AppError> {
    let password = password.to_string();
    let matched = tokio::task::spawn_blocking(move || match hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                verify_password(&password, dummy);
            }
            false
        }
    })
    .await?;
    Ok(matched)
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Unknown email and wrong password fail identically, in message and in cost.
/// The store is only held for the lookup; verification runs off the runtime.
pub async fn authenticate(
    repo: &Repository,
    email: &str,
    password: &str,
) -> Result<Identity, AppError> {
    let user = repo.find_user_by_email(email.trim()).await?;
    let stored_hash = user.as_ref().map(|u| u.password_hash.clone());

    if !verify_password_blocking(password, stored_hash).await? {
        return Err(AppError::InvalidCredentials);
    }
    let user = user.ok_or(AppError::InvalidCredentials)?;

    Ok(Identity {
        user_id: user.id,
        display_name: user.name,
        role: user.role,
    })
}
