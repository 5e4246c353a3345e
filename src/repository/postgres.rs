//! PostgreSQL backend for the content repository.
//!
//! One client connection is shared by the whole process. Reads run
//! concurrently under the read lock; uploads take the write lock so that no
//! other statement lands inside their transaction.

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, GenericClient, NoTls, Row, Transaction};

use super::require;
use crate::error::AppError;
use crate::models::{
    Announcement, Material, NewAnnouncement, NewMaterial, NewSubmission, NewUser, Role,
    Submission, SubmissionWithStudent, User,
};
use crate::storage::StagedUpload;

const USER_COLUMNS: &str = "id, name, email, password_hash, role";
const MATERIAL_COLUMNS: &str =
    "id, title, description, original_filename, stored_filename, file_path";
const SUBMISSION_COLUMNS: &str =
    "s.id, s.student_id, s.title, s.original_filename, s.stored_filename, s.file_path, s.submitted_at";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL CHECK (role IN ('estudiante', 'profesor'))
    );

    CREATE TABLE IF NOT EXISTS announcements (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE IF NOT EXISTS materials (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        original_filename TEXT NOT NULL,
        stored_filename TEXT NOT NULL UNIQUE,
        file_path TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS submissions (
        id BIGSERIAL PRIMARY KEY,
        student_id BIGINT NOT NULL REFERENCES users (id),
        title TEXT NOT NULL,
        original_filename TEXT NOT NULL,
        stored_filename TEXT NOT NULL UNIQUE,
        file_path TEXT NOT NULL,
        submitted_at TIMESTAMPTZ NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_submissions_student
        ON submissions (student_id, submitted_at);
"#;

pub struct PgStore {
    client: RwLock<Client>,
    schema: Option<String>,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        Self::open(url, None).await
    }

    /// Connects with every table living in `schema`, created on demand.
    /// Lets several stores share one database without seeing each other.
    pub async fn connect_in_schema(url: &str, schema: &str) -> Result<Self, AppError> {
        if schema.is_empty()
            || !schema
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(AppError::Validation { field: "schema" });
        }
        Self::open(url, Some(schema)).await
    }

    async fn open(url: &str, schema: Option<&str>) -> Result<Self, AppError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection closed");
            }
        });

        if let Some(schema) = schema {
            client
                .batch_execute(&*format!(
                    "CREATE SCHEMA IF NOT EXISTS {0}; SET search_path TO {0}",
                    schema
                ))
                .await?;
        }
        client.batch_execute(SCHEMA).await?;

        Ok(Self {
            client: RwLock::new(client),
            schema: schema.map(str::to_string),
        })
    }

    /// Drops the private schema created by [`PgStore::connect_in_schema`].
    pub async fn drop_schema(self) -> Result<(), AppError> {
        if let Some(schema) = &self.schema {
            let client = self.client.read().await;
            client
                .batch_execute(&*format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
                .await?;
        }
        Ok(())
    }

    pub async fn create_user(&self, user: &NewUser<'_>) -> Result<i64, AppError> {
        let client = self.client.read().await;
        create_user(&*client, user).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let client = self.client.read().await;
        let row = client
            .query_opt(
                &*format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS),
                &[&email],
            )
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let client = self.client.read().await;
        find_user(&*client, id).await
    }

    pub async fn create_announcement(
        &self,
        announcement: &NewAnnouncement<'_>,
    ) -> Result<i64, AppError> {
        require("title", announcement.title)?;
        require("body", announcement.body)?;

        let client = self.client.read().await;
        let row = client
            .query_one(
                "INSERT INTO announcements (title, body, created_at)
                 VALUES ($1, $2, $3) RETURNING id",
                &[&announcement.title, &announcement.body, &Utc::now()],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    pub async fn list_announcements(&self) -> Result<Vec<Announcement>, AppError> {
        let client = self.client.read().await;
        let rows = client
            .query(
                "SELECT id, title, body, created_at FROM announcements
                 ORDER BY created_at DESC, id DESC",
                &[],
            )
            .await?;
        let announcements = rows
            .iter()
            .map(|row| -> Result<Announcement, tokio_postgres::Error> {
                Ok(Announcement {
                    id: row.try_get(0)?,
                    title: row.try_get(1)?,
                    body: row.try_get(2)?,
                    created_at: row.try_get(3)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(announcements)
    }

    pub async fn list_materials(&self) -> Result<Vec<Material>, AppError> {
        let client = self.client.read().await;
        let rows = client
            .query(
                &*format!("SELECT {} FROM materials ORDER BY id DESC", MATERIAL_COLUMNS),
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(material_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn find_material_by_stored_name(
        &self,
        stored_filename: &str,
    ) -> Result<Option<Material>, AppError> {
        let client = self.client.read().await;
        let row = client
            .query_opt(
                &*format!(
                    "SELECT {} FROM materials WHERE stored_filename = $1",
                    MATERIAL_COLUMNS
                ),
                &[&stored_filename],
            )
            .await?;
        Ok(row.as_ref().map(material_from_row).transpose()?)
    }

    pub async fn list_submissions(
        &self,
        student_id: Option<i64>,
    ) -> Result<Vec<Submission>, AppError> {
        let client = self.client.read().await;
        let rows = client
            .query(
                &*format!(
                    "SELECT {} FROM submissions s
                     WHERE ($1::BIGINT IS NULL OR s.student_id = $1)
                     ORDER BY s.submitted_at DESC, s.id DESC",
                    SUBMISSION_COLUMNS
                ),
                &[&student_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(submission_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn list_submissions_with_students(
        &self,
    ) -> Result<Vec<SubmissionWithStudent>, AppError> {
        let client = self.client.read().await;
        let rows = client
            .query(
                &*format!(
                    "SELECT {}, u.name FROM submissions s
                     JOIN users u ON u.id = s.student_id
                     ORDER BY s.submitted_at DESC, s.id DESC",
                    SUBMISSION_COLUMNS
                ),
                &[],
            )
            .await?;
        let submissions = rows
            .iter()
            .map(|row| -> Result<SubmissionWithStudent, tokio_postgres::Error> {
                Ok(SubmissionWithStudent {
                    submission: submission_from_row(row)?,
                    student_name: row.try_get(7)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(submissions)
    }

    pub async fn find_submission_by_stored_name(
        &self,
        stored_filename: &str,
    ) -> Result<Option<Submission>, AppError> {
        let client = self.client.read().await;
        let row = client
            .query_opt(
                &*format!(
                    "SELECT {} FROM submissions s WHERE s.stored_filename = $1",
                    SUBMISSION_COLUMNS
                ),
                &[&stored_filename],
            )
            .await?;
        Ok(row.as_ref().map(submission_from_row).transpose()?)
    }

    pub async fn create_material_upload(
        &self,
        title: &str,
        description: Option<&str>,
        staged: &mut StagedUpload,
    ) -> Result<i64, AppError> {
        let mut client = self.client.write().await;
        let tx = client.transaction().await?;
        let file_path = staged.final_path().to_string_lossy().into_owned();
        let id = create_material(
            &tx,
            &NewMaterial {
                title,
                description,
                original_filename: staged.original_filename(),
                stored_filename: staged.stored_filename(),
                file_path: &file_path,
            },
        )
        .await?;
        finish_upload(tx, staged).await?;
        Ok(id)
    }

    pub async fn create_submission_upload(
        &self,
        student_id: i64,
        title: &str,
        staged: &mut StagedUpload,
    ) -> Result<i64, AppError> {
        let mut client = self.client.write().await;
        let tx = client.transaction().await?;
        let file_path = staged.final_path().to_string_lossy().into_owned();
        let id = create_submission(
            &tx,
            &NewSubmission {
                student_id,
                title,
                original_filename: staged.original_filename(),
                stored_filename: staged.stored_filename(),
                file_path: &file_path,
            },
        )
        .await?;
        finish_upload(tx, staged).await?;
        Ok(id)
    }
}

fn user_from_row(row: &Row) -> Result<User, tokio_postgres::Error> {
    Ok(User {
        id: row.try_get(0)?,
        name: row.try_get(1)?,
        email: row.try_get(2)?,
        password_hash: row.try_get(3)?,
        role: row.try_get(4)?,
    })
}

fn material_from_row(row: &Row) -> Result<Material, tokio_postgres::Error> {
    Ok(Material {
        id: row.try_get(0)?,
        title: row.try_get(1)?,
        description: row.try_get(2)?,
        original_filename: row.try_get(3)?,
        stored_filename: row.try_get(4)?,
        file_path: row.try_get(5)?,
    })
}

fn submission_from_row(row: &Row) -> Result<Submission, tokio_postgres::Error> {
    Ok(Submission {
        id: row.try_get(0)?,
        student_id: row.try_get(1)?,
        title: row.try_get(2)?,
        original_filename: row.try_get(3)?,
        stored_filename: row.try_get(4)?,
        file_path: row.try_get(5)?,
        submitted_at: row.try_get(6)?,
    })
}

async fn create_user<C: GenericClient + Sync>(
    client: &C,
    user: &NewUser<'_>,
) -> Result<i64, AppError> {
    require("name", user.name)?;
    require("email", user.email)?;

    let inserted = client
        .query_one(
            "INSERT INTO users (name, email, password_hash, role)
             VALUES ($1, $2, $3, $4) RETURNING id",
            &[&user.name, &user.email, &user.password_hash, &user.role.as_str()],
        )
        .await;
    match inserted {
        Ok(row) => Ok(row.try_get(0)?),
        Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
            Err(AppError::Validation { field: "email" })
        }
        Err(e) => Err(e.into()),
    }
}

async fn find_user<C: GenericClient + Sync>(client: &C, id: i64) -> Result<Option<User>, AppError> {
    let row = client
        .query_opt(
            &*format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS),
            &[&id],
        )
        .await?;
    Ok(row.as_ref().map(user_from_row).transpose()?)
}

async fn create_material<C: GenericClient + Sync>(
    client: &C,
    material: &NewMaterial<'_>,
) -> Result<i64, AppError> {
    require("title", material.title)?;
    require("filename", material.stored_filename)?;
    require("path", material.file_path)?;
    let description = material.description.filter(|d| !d.trim().is_empty());

    let row = client
        .query_one(
            "INSERT INTO materials (title, description, original_filename, stored_filename, file_path)
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
            &[
                &material.title,
                &description,
                &material.original_filename,
                &material.stored_filename,
                &material.file_path,
            ],
        )
        .await?;
    Ok(row.try_get(0)?)
}

async fn create_submission<C: GenericClient + Sync>(
    client: &C,
    submission: &NewSubmission<'_>,
) -> Result<i64, AppError> {
    require("title", submission.title)?;
    require("filename", submission.stored_filename)?;
    require("path", submission.file_path)?;

    match find_user(client, submission.student_id).await? {
        Some(user) if user.role == Role::Student => {}
        _ => {
            return Err(AppError::ReferentialIntegrity {
                student_id: submission.student_id,
            })
        }
    }

    let row = client
        .query_one(
            "INSERT INTO submissions
                (student_id, title, original_filename, stored_filename, file_path, submitted_at)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            &[
                &submission.student_id,
                &submission.title,
                &submission.original_filename,
                &submission.stored_filename,
                &submission.file_path,
                &Utc::now(),
            ],
        )
        .await?;
    Ok(row.try_get(0)?)
}

/// Moves the file into place, then commits. A failed commit takes the file back out.
async fn finish_upload(tx: Transaction<'_>, staged: &mut StagedUpload) -> Result<(), AppError> {
    staged.commit()?;
    if let Err(e) = tx.commit().await {
        staged.revert();
        return Err(e.into());
    }
    Ok(())
}
