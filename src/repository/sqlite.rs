//! SQLite backend for the content repository.
//!
//! Every function takes a plain `&Connection` so callers can run it either
//! directly or inside a `rusqlite::Transaction` (which derefs to one).

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::require;
use crate::db::{now_timestamp, timestamp_column};
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

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
    })
}

fn material_from_row(row: &Row<'_>) -> rusqlite::Result<Material> {
    Ok(Material {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        original_filename: row.get(3)?,
        stored_filename: row.get(4)?,
        file_path: row.get(5)?,
    })
}

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<Submission> {
    Ok(Submission {
        id: row.get(0)?,
        student_id: row.get(1)?,
        title: row.get(2)?,
        original_filename: row.get(3)?,
        stored_filename: row.get(4)?,
        file_path: row.get(5)?,
        submitted_at: timestamp_column(row, 6)?,
    })
}

pub fn create_user(conn: &Connection, user: &NewUser<'_>) -> Result<i64, AppError> {
    require("name", user.name)?;
    require("email", user.email)?;
    if find_user_by_email(conn, user.email)?.is_some() {
        return Err(AppError::Validation { field: "email" });
    }

    conn.execute(
        "INSERT INTO users (name, email, password_hash, role) VALUES (?, ?, ?, ?)",
        params![user.name, user.email, user.password_hash, user.role],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, AppError> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS),
            [email],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn find_user(conn: &Connection, id: i64) -> Result<Option<User>, AppError> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
            [id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn create_announcement(
    conn: &Connection,
    announcement: &NewAnnouncement<'_>,
) -> Result<i64, AppError> {
    require("title", announcement.title)?;
    require("body", announcement.body)?;

    conn.execute(
        "INSERT INTO announcements (title, body, created_at) VALUES (?, ?, ?)",
        params![announcement.title, announcement.body, now_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Newest first; rows created within the same microsecond fall back to id order.
pub fn list_announcements(conn: &Connection) -> Result<Vec<Announcement>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, body, created_at FROM announcements
         ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Announcement {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            created_at: timestamp_column(row, 3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn create_material(conn: &Connection, material: &NewMaterial<'_>) -> Result<i64, AppError> {
    require("title", material.title)?;
    require("filename", material.stored_filename)?;
    require("path", material.file_path)?;
    let description = material.description.filter(|d| !d.trim().is_empty());

    conn.execute(
        "INSERT INTO materials (title, description, original_filename, stored_filename, file_path)
         VALUES (?, ?, ?, ?, ?)",
        params![
            material.title,
            description,
            material.original_filename,
            material.stored_filename,
            material.file_path
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recently inserted first (id order, not time order).
pub fn list_materials(conn: &Connection) -> Result<Vec<Material>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM materials ORDER BY id DESC",
        MATERIAL_COLUMNS
    ))?;
    let rows = stmt.query_map([], material_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn find_material_by_stored_name(
    conn: &Connection,
    stored_filename: &str,
) -> Result<Option<Material>, AppError> {
    let material = conn
        .query_row(
            &format!(
                "SELECT {} FROM materials WHERE stored_filename = ?",
                MATERIAL_COLUMNS
            ),
            [stored_filename],
            material_from_row,
        )
        .optional()?;
    Ok(material)
}

pub fn create_submission(
    conn: &Connection,
    submission: &NewSubmission<'_>,
) -> Result<i64, AppError> {
    require("title", submission.title)?;
    require("filename", submission.stored_filename)?;
    require("path", submission.file_path)?;

    match find_user(conn, submission.student_id)? {
        Some(user) if user.role == Role::Student => {}
        _ => {
            return Err(AppError::ReferentialIntegrity {
                student_id: submission.student_id,
            })
        }
    }

    conn.execute(
        "INSERT INTO submissions
            (student_id, title, original_filename, stored_filename, file_path, submitted_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            submission.student_id,
            submission.title,
            submission.original_filename,
            submission.stored_filename,
            submission.file_path,
            now_timestamp()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Newest first. Only instructor-facing callers should pass `None`.
pub fn list_submissions(
    conn: &Connection,
    student_id: Option<i64>,
) -> Result<Vec<Submission>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM submissions s
         WHERE (?1 IS NULL OR s.student_id = ?1)
         ORDER BY s.submitted_at DESC, s.id DESC",
        SUBMISSION_COLUMNS
    ))?;
    let rows = stmt.query_map([student_id], submission_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_submissions_with_students(
    conn: &Connection,
) -> Result<Vec<SubmissionWithStudent>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {}, u.name FROM submissions s
         JOIN users u ON u.id = s.student_id
         ORDER BY s.submitted_at DESC, s.id DESC",
        SUBMISSION_COLUMNS
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok(SubmissionWithStudent {
            submission: submission_from_row(row)?,
            student_name: row.get(7)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn find_submission_by_stored_name(
    conn: &Connection,
    stored_filename: &str,
) -> Result<Option<Submission>, AppError> {
    let submission = conn
        .query_row(
            &format!(
                "SELECT {} FROM submissions s WHERE s.stored_filename = ?",
                SUBMISSION_COLUMNS
            ),
            [stored_filename],
            submission_from_row,
        )
        .optional()?;
    Ok(submission)
}

/// Inserts the row and moves the staged file into place as one unit.
/// A failed insert rolls back and leaves the staged file to be discarded on drop.
pub fn insert_with_upload<F>(
    conn: &mut Connection,
    staged: &mut StagedUpload,
    insert: F,
) -> Result<i64, AppError>
where
    F: FnOnce(&Connection, &StagedUpload) -> Result<i64, AppError>,
{
    let tx = conn.transaction()?;
    let id = insert(&tx, staged)?;
    staged.commit()?;
    if let Err(e) = tx.commit() {
        staged.revert();
        return Err(e.into());
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::policy::ResourceKind;
    use crate::storage::FileStore;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn add_user(conn: &Connection, email: &str, role: Role) -> i64 {
        create_user(
            conn,
            &NewUser {
                name: email,
                email,
                password_hash: "x",
                role,
            },
        )
        .unwrap()
    }

    fn add_submission(conn: &Connection, student_id: i64, stored: &str) -> i64 {
        create_submission(
            conn,
            &NewSubmission {
                student_id,
                title: "TP1",
                original_filename: "hw1.pdf",
                stored_filename: stored,
                file_path: stored,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let conn = test_conn();
        add_user(&conn, "a@example.com", Role::Student);
        let err = create_user(
            &conn,
            &NewUser {
                name: "Other",
                email: "a@example.com",
                password_hash: "y",
                role: Role::Instructor,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { field: "email" }));
    }

    #[test]
    fn test_find_user_round_trips_role() {
        let conn = test_conn();
        let id = add_user(&conn, "prof@example.com", Role::Instructor);
        let user = find_user(&conn, id).unwrap().unwrap();
        assert_eq!(user.role, Role::Instructor);
        assert!(find_user_by_email(&conn, "nobody@example.com")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_empty_announcement_inserts_nothing() {
        let conn = test_conn();
        let err = create_announcement(&conn, &NewAnnouncement { title: "", body: "x" })
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { field: "title" }));
        let err = create_announcement(&conn, &NewAnnouncement { title: "x", body: "  " })
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { field: "body" }));
        assert!(list_announcements(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_announcements_newest_first() {
        let conn = test_conn();
        let first = create_announcement(&conn, &NewAnnouncement { title: "a", body: "1" }).unwrap();
        let second = create_announcement(&conn, &NewAnnouncement { title: "b", body: "2" }).unwrap();
        let ids: Vec<i64> = list_announcements(&conn).unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn test_materials_by_id_desc_and_optional_description() {
        let conn = test_conn();
        let first = create_material(
            &conn,
            &NewMaterial {
                title: "Syllabus",
                description: Some(""),
                original_filename: "s.pdf",
                stored_filename: "1.pdf",
                file_path: "uploads/materiales/1.pdf",
            },
        )
        .unwrap();
        let second = create_material(
            &conn,
            &NewMaterial {
                title: "Slides",
                description: Some("week 1"),
                original_filename: "w1.pdf",
                stored_filename: "2.pdf",
                file_path: "uploads/materiales/2.pdf",
            },
        )
        .unwrap();
        let materials = list_materials(&conn).unwrap();
        assert_eq!(materials[0].id, second);
        assert_eq!(materials[1].id, first);
        assert_eq!(materials[0].description.as_deref(), Some("week 1"));
        assert_eq!(materials[1].description, None);
        assert_eq!(
            find_material_by_stored_name(&conn, "2.pdf").unwrap().unwrap().id,
            second
        );
    }

    #[test]
    fn test_submission_requires_existing_student() {
        let conn = test_conn();
        let prof = add_user(&conn, "prof@example.com", Role::Instructor);
        for student_id in [prof, 999] {
            let err = create_submission(
                &conn,
                &NewSubmission {
                    student_id,
                    title: "TP1",
                    original_filename: "hw1.pdf",
                    stored_filename: "x.pdf",
                    file_path: "x.pdf",
                },
            )
            .unwrap_err();
            assert!(matches!(err, AppError::ReferentialIntegrity { .. }));
        }
        assert!(list_submissions(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_list_submissions_filters_and_orders() {
        let conn = test_conn();
        let a = add_user(&conn, "a@example.com", Role::Student);
        let b = add_user(&conn, "b@example.com", Role::Student);
        let a1 = add_submission(&conn, a, "a1");
        let b1 = add_submission(&conn, b, "b1");
        let a2 = add_submission(&conn, a, "a2");

        let all: Vec<i64> = list_submissions(&conn, None).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(all, vec![a2, b1, a1]);

        let only_a = list_submissions(&conn, Some(a)).unwrap();
        assert!(only_a.iter().all(|s| s.student_id == a));
        assert_eq!(only_a.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a2, a1]);
    }

    #[test]
    fn test_instructor_listing_carries_student_names() {
        let conn = test_conn();
        let a = add_user(&conn, "a@example.com", Role::Student);
        add_submission(&conn, a, "a1");
        let rows = list_submissions_with_students(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_name, "a@example.com");
        assert_eq!(
            find_submission_by_stored_name(&conn, "a1").unwrap().unwrap().student_id,
            a
        );
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_row_and_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("uploads"));
        store.init().await.unwrap();
        let mut conn = test_conn();

        let mut staged = store
            .stage(ResourceKind::Submission, b"orphan?", "hw1.pdf", Some(999))
            .await
            .unwrap();
        let final_path = staged.final_path().to_path_buf();
        let err = insert_with_upload(&mut conn, &mut staged, |conn, staged| {
            let file_path = staged.final_path().to_string_lossy();
            create_submission(
                conn,
                &NewSubmission {
                    student_id: 999,
                    title: "TP1",
                    original_filename: staged.original_filename(),
                    stored_filename: staged.stored_filename(),
                    file_path: &file_path,
                },
            )
        })
        .unwrap_err();
        assert!(matches!(err, AppError::ReferentialIntegrity { student_id: 999 }));
        drop(staged);

        assert!(list_submissions(&conn, None).unwrap().is_empty());
        assert!(!final_path.exists());
        for sub in ["entregas", "materiales", ".staging"] {
            let mut entries = std::fs::read_dir(dir.path().join("uploads").join(sub)).unwrap();
            assert!(entries.next().is_none(), "{} is not empty", sub);
        }
    }

    #[tokio::test]
    async fn test_successful_insert_commits_row_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("uploads"));
        store.init().await.unwrap();
        let mut conn = test_conn();

        let mut staged = store
            .stage(ResourceKind::Material, b"slides", "week1.pdf", None)
            .await
            .unwrap();
        let id = insert_with_upload(&mut conn, &mut staged, |conn, staged| {
            let file_path = staged.final_path().to_string_lossy();
            create_material(
                conn,
                &NewMaterial {
                    title: "Week 1",
                    description: None,
                    original_filename: staged.original_filename(),
                    stored_filename: staged.stored_filename(),
                    file_path: &file_path,
                },
            )
        })
        .unwrap();

        let material = find_material_by_stored_name(&conn, staged.stored_filename())
            .unwrap()
            .unwrap();
        assert_eq!(material.id, id);
        assert_eq!(std::fs::read(staged.final_path()).unwrap(), b"slides");
    }
}
