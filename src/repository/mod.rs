//! Content repository: users, announcements, materials and submissions.
//!
//! [`Repository`] fronts whichever store `DATABASE_URL` selected. Both
//! backends apply the same validation, ordering and upload unit of work,
//! so handlers never see which one is behind it.

pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use crate::config::DatabaseLocation;
use crate::db::{establish_connection, DbConnection};
use crate::error::AppError;
use crate::models::{
    Announcement, Material, NewAnnouncement, NewMaterial, NewSubmission, NewUser, Submission,
    SubmissionWithStudent, User,
};
use crate::storage::StagedUpload;

pub use self::postgres::PgStore;

/// Rejects blank required text.
pub fn require(field: &'static str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation { field });
    }
    Ok(())
}

#[derive(Clone)]
pub enum Repository {
    Sqlite(DbConnection),
    Postgres(Arc<PgStore>),
}

impl Repository {
    pub async fn open(location: &DatabaseLocation) -> Result<Self, AppError> {
        match location {
            DatabaseLocation::File(path) => {
                Ok(Repository::Sqlite(establish_connection(Some(path))?))
            }
            DatabaseLocation::Memory => Ok(Repository::Sqlite(establish_connection(None)?)),
            DatabaseLocation::Postgres(url) => {
                Ok(Repository::Postgres(Arc::new(PgStore::connect(url).await?)))
            }
        }
    }

    pub fn in_memory() -> Result<Self, AppError> {
        Ok(Repository::Sqlite(establish_connection(None)?))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Repository::Sqlite(_) => "sqlite",
            Repository::Postgres(_) => "postgres",
        }
    }

    pub async fn create_user(&self, user: &NewUser<'_>) -> Result<i64, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::create_user(&conn, user)
            }
            Repository::Postgres(pg) => pg.create_user(user).await,
        }
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::find_user_by_email(&conn, email)
            }
            Repository::Postgres(pg) => pg.find_user_by_email(email).await,
        }
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<User>, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::find_user(&conn, id)
            }
            Repository::Postgres(pg) => pg.find_user(id).await,
        }
    }

    pub async fn create_announcement(
        &self,
        announcement: &NewAnnouncement<'_>,
    ) -> Result<i64, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::create_announcement(&conn, announcement)
            }
            Repository::Postgres(pg) => pg.create_announcement(announcement).await,
        }
    }

    pub async fn list_announcements(&self) -> Result<Vec<Announcement>, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::list_announcements(&conn)
            }
            Repository::Postgres(pg) => pg.list_announcements().await,
        }
    }

    pub async fn list_materials(&self) -> Result<Vec<Material>, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::list_materials(&conn)
            }
            Repository::Postgres(pg) => pg.list_materials().await,
        }
    }

    pub async fn find_material_by_stored_name(
        &self,
        stored_filename: &str,
    ) -> Result<Option<Material>, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::find_material_by_stored_name(&conn, stored_filename)
            }
            Repository::Postgres(pg) => pg.find_material_by_stored_name(stored_filename).await,
        }
    }

    /// Newest first. Only instructor-facing callers should pass `None`.
    pub async fn list_submissions(
        &self,
        student_id: Option<i64>,
    ) -> Result<Vec<Submission>, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::list_submissions(&conn, student_id)
            }
            Repository::Postgres(pg) => pg.list_submissions(student_id).await,
        }
    }

    pub async fn list_submissions_with_students(
        &self,
    ) -> Result<Vec<SubmissionWithStudent>, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::list_submissions_with_students(&conn)
            }
            Repository::Postgres(pg) => pg.list_submissions_with_students().await,
        }
    }

    pub async fn find_submission_by_stored_name(
        &self,
        stored_filename: &str,
    ) -> Result<Option<Submission>, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let conn = db.lock().await;
                sqlite::find_submission_by_stored_name(&conn, stored_filename)
            }
            Repository::Postgres(pg) => pg.find_submission_by_stored_name(stored_filename).await,
        }
    }

    /// Records a material and moves its staged file into place, or neither.
    pub async fn create_material_upload(
        &self,
        title: &str,
        description: Option<&str>,
        staged: &mut StagedUpload,
    ) -> Result<i64, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let mut conn = db.lock().await;
                sqlite::insert_with_upload(&mut conn, staged, |conn, staged| {
                    let file_path = staged.final_path().to_string_lossy();
                    sqlite::create_material(
                        conn,
                        &NewMaterial {
                            title,
                            description,
                            original_filename: staged.original_filename(),
                            stored_filename: staged.stored_filename(),
                            file_path: &file_path,
                        },
                    )
                })
            }
            Repository::Postgres(pg) => pg.create_material_upload(title, description, staged).await,
        }
    }

    /// Records a submission and moves its staged file into place, or neither.
    pub async fn create_submission_upload(
        &self,
        student_id: i64,
        title: &str,
        staged: &mut StagedUpload,
    ) -> Result<i64, AppError> {
        match self {
            Repository::Sqlite(db) => {
                let mut conn = db.lock().await;
                sqlite::insert_with_upload(&mut conn, staged, |conn, staged| {
                    let file_path = staged.final_path().to_string_lossy();
                    sqlite::create_submission(
                        conn,
                        &NewSubmission {
                            student_id,
                            title,
                            original_filename: staged.original_filename(),
                            stored_filename: staged.stored_filename(),
                            file_path: &file_path,
                        },
                    )
                })
            }
            Repository::Postgres(pg) => {
                pg.create_submission_upload(student_id, title, staged).await
            }
        }
    }
}
