use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::session::FlashCategory;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("authentication required")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("missing or invalid field `{field}`")]
    Validation { field: &'static str },
    #[error("no file was supplied")]
    EmptyFilename,
    #[error("student {student_id} does not exist")]
    ReferentialIntegrity { student_id: i64 },
    #[error("resource not found")]
    NotFound,
    #[error("invalid resource kind `{kind}`")]
    InvalidResourceKind { kind: String },
    #[error("malformed multipart form: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    /// Fatal errors abort the request with a 500; everything else becomes a flash.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Postgres(_)
                | AppError::Io(_)
                | AppError::Hash(_)
                | AppError::Task(_)
        )
    }

    pub fn flash_category(&self) -> FlashCategory {
        match self {
            AppError::Unauthenticated
            | AppError::Validation { .. }
            | AppError::EmptyFilename
            | AppError::Multipart(_) => FlashCategory::Warning,
            _ => FlashCategory::Danger,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidCredentials => "Email o contraseña incorrectos.".to_string(),
            AppError::Unauthenticated => {
                "Por favor, inicie sesión para acceder a esta página.".to_string()
            }
            AppError::Forbidden => "No tiene permiso para acceder a este recurso.".to_string(),
            AppError::Validation { field } => {
                format!("El campo '{}' es obligatorio o no es válido.", field)
            }
            AppError::EmptyFilename => "Debe seleccionar un archivo.".to_string(),
            AppError::ReferentialIntegrity { .. } => {
                "El estudiante indicado no existe.".to_string()
            }
            AppError::NotFound => "El archivo solicitado no existe.".to_string(),
            AppError::InvalidResourceKind { .. } => "Carpeta no válida.".to_string(),
            AppError::Multipart(_) => "El formulario enviado no es válido.".to_string(),
            AppError::Database(_)
            | AppError::Postgres(_)
            | AppError::Io(_)
            | AppError::Hash(_)
            | AppError::Task(_) => {
                "Error interno del servidor.".to_string()
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials | AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Validation { .. }
            | AppError::EmptyFilename
            | AppError::InvalidResourceKind { .. }
            | AppError::Multipart(_) => StatusCode::BAD_REQUEST,
            AppError::ReferentialIntegrity { .. } => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Database(_)
            | AppError::Postgres(_)
            | AppError::Io(_)
            | AppError::Hash(_)
            | AppError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_fatal() {
            tracing::error!(error = %self, "request failed");
        }
        (self.status(), self.user_message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failures_are_fatal() {
        let err = AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.is_fatal());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!AppError::Forbidden.is_fatal());
    }

    #[test]
    fn test_flash_categories() {
        assert_eq!(AppError::EmptyFilename.flash_category(), FlashCategory::Warning);
        assert_eq!(AppError::Unauthenticated.flash_category(), FlashCategory::Warning);
        assert_eq!(AppError::Forbidden.flash_category(), FlashCategory::Danger);
        assert_eq!(
            AppError::InvalidCredentials.flash_category(),
            FlashCategory::Danger
        );
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = AppError::Validation { field: "title" };
        assert!(err.user_message().contains("title"));
        assert_eq!(err.to_string(), "missing or invalid field `title`");
    }
}
