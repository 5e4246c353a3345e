//! Out-of-band creation of the demo accounts. There is no self-registration.

use std::io;

use crate::auth::hash_password_blocking;
use crate::config::DatabaseLocation;
use crate::error::AppError;
use crate::models::{NewUser, Role};
use crate::repository::Repository;

pub struct SeedUser {
    pub name: &'static str,
    pub email: &'static str,
    pub password: &'static str,
    pub role: Role,
}

pub const DEMO_USERS: [SeedUser; 2] = [
    SeedUser {
        name: "Profesor Admin",
        email: "profesor@email.com",
        password: "admin123",
        role: Role::Instructor,
    },
    SeedUser {
        name: "Alumno Ejemplo",
        email: "alumno@email.com",
        password: "alumno123",
        role: Role::Student,
    },
];

/// Inserts each user whose email is not present yet; returns the emails created.
pub async fn seed_users(
    repo: &Repository,
    users: &[SeedUser],
    cost: u32,
) -> Result<Vec<&'static str>, AppError> {
    let mut created = Vec::new();
    for user in users {
        if repo.find_user_by_email(user.email).await?.is_some() {
            tracing::info!(email = user.email, "user already present, skipping");
            continue;
        }
        let password_hash = hash_password_blocking(user.password, cost).await?;
        let id = repo
            .create_user(&NewUser {
                name: user.name,
                email: user.email,
                password_hash: &password_hash,
                role: user.role,
            })
            .await?;
        tracing::info!(id, email = user.email, role = user.role.as_str(), "user created");
        created.push(user.email);
    }
    Ok(created)
}

/// Deletes a file-backed database. Returns whether anything was removed;
/// networked and in-memory stores are left alone.
pub fn reset_database(location: &DatabaseLocation) -> io::Result<bool> {
    let DatabaseLocation::File(path) = location else {
        return Ok(false);
    };
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
