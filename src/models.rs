use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Access class of a user. Stored with the course's historical labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "estudiante")]
    Student,
    #[serde(rename = "profesor")]
    Instructor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "estudiante",
            Role::Instructor => "profesor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "estudiante" => Some(Role::Student),
            "profesor" => Some(Role::Instructor),
            _ => None,
        }
    }

    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Role::Student => "/dashboard_estudiante",
            Role::Instructor => "/dashboard_profesor",
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Role::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown role `{}`", s).into()))
    }
}

impl<'a> tokio_postgres::types::FromSql<'a> for Role {
    fn from_sql(
        ty: &tokio_postgres::types::Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let s = <&str as tokio_postgres::types::FromSql>::from_sql(ty, raw)?;
        Role::parse(s).ok_or_else(|| format!("unknown role `{}`", s).into())
    }

    fn accepts(ty: &tokio_postgres::types::Type) -> bool {
        <&str as tokio_postgres::types::FromSql>::accepts(ty)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewAnnouncement<'a> {
    pub title: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub original_filename: String,
    pub stored_filename: String,
    #[serde(skip_serializing)]
    pub file_path: String,
}

#[derive(Debug)]
pub struct NewMaterial<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub original_filename: &'a str,
    pub stored_filename: &'a str,
    pub file_path: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub student_id: i64,
    pub title: String,
    pub original_filename: String,
    pub stored_filename: String,
    #[serde(skip_serializing)]
    pub file_path: String,
    pub submitted_at: DateTime<Utc>,
}

/// Instructor-facing row: the submission plus its author's display name.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionWithStudent {
    #[serde(flatten)]
    pub submission: Submission,
    pub student_name: String,
}

#[derive(Debug)]
pub struct NewSubmission<'a> {
    pub student_id: i64,
    pub title: &'a str,
    pub original_filename: &'a str,
    pub stored_filename: &'a str,
    pub file_path: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_labels() {
        assert_eq!(Role::parse("profesor"), Some(Role::Instructor));
        assert_eq!(Role::parse("estudiante"), Some(Role::Student));
        assert_eq!(Role::parse("admin"), None);
        assert_eq!(Role::Instructor.as_str(), "profesor");
        assert_eq!(
            serde_json::to_string(&Role::Student).unwrap(),
            "\"estudiante\""
        );
    }

    #[test]
    fn test_material_hides_server_path() {
        let material = Material {
            id: 1,
            title: "Syllabus".into(),
            description: None,
            original_filename: "syllabus.pdf".into(),
            stored_filename: "abc.pdf".into(),
            file_path: "/srv/uploads/materiales/abc.pdf".into(),
        };
        let json = serde_json::to_value(&material).unwrap();
        assert!(json.get("file_path").is_none());
        assert_eq!(json["stored_filename"], "abc.pdf");
    }
}
