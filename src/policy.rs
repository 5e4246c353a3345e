//! Access decisions for dashboards and downloads.
//!
//! Pure functions over the caller's identity; handlers call these before
//! touching the repository or the file store.

use crate::error::AppError;
use crate::models::Role;
use crate::session::Identity;

/// The two upload subtrees, named by their URL segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Material,
    Submission,
}

impl ResourceKind {
    pub fn from_segment(segment: &str) -> Result<Self, AppError> {
        match segment {
            "materiales" => Ok(ResourceKind::Material),
            "entregas" => Ok(ResourceKind::Submission),
            other => Err(AppError::InvalidResourceKind {
                kind: other.to_string(),
            }),
        }
    }

    pub fn segment(&self) -> &'static str {
        match self {
            ResourceKind::Material => "materiales",
            ResourceKind::Submission => "entregas",
        }
    }
}

/// A downloadable resource together with whatever ownership it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Material,
    Submission { student_id: i64 },
}

/// Exact role match; an instructor is not implicitly a student.
pub fn can_access_dashboard(identity: Option<&Identity>, role: Role) -> Result<&Identity, AppError> {
    let identity = identity.ok_or(AppError::Unauthenticated)?;
    if identity.role != role {
        return Err(AppError::Forbidden);
    }
    Ok(identity)
}

pub fn can_download(identity: Option<&Identity>, resource: Resource) -> Result<(), AppError> {
    let identity = identity.ok_or(AppError::Unauthenticated)?;
    match (resource, identity.role) {
        (Resource::Material, _) => Ok(()),
        (Resource::Submission { .. }, Role::Instructor) => Ok(()),
        (Resource::Submission { student_id }, Role::Student) if student_id == identity.user_id => {
            Ok(())
        }
        (Resource::Submission { .. }, Role::Student) => Err(AppError::Forbidden),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: i64, role: Role) -> Identity {
        Identity {
            user_id,
            display_name: format!("user-{}", user_id),
            role,
        }
    }

    #[test]
    fn test_resource_kind_segments() {
        assert_eq!(
            ResourceKind::from_segment("materiales").unwrap(),
            ResourceKind::Material
        );
        assert_eq!(
            ResourceKind::from_segment("entregas").unwrap(),
            ResourceKind::Submission
        );
        assert!(matches!(
            ResourceKind::from_segment("../etc"),
            Err(AppError::InvalidResourceKind { .. })
        ));
    }

    #[test]
    fn test_dashboard_role_is_exact_match() {
        let student = identity(1, Role::Student);
        let prof = identity(2, Role::Instructor);
        assert!(can_access_dashboard(Some(&student), Role::Student).is_ok());
        assert!(can_access_dashboard(Some(&prof), Role::Instructor).is_ok());
        assert!(matches!(
            can_access_dashboard(Some(&student), Role::Instructor),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            can_access_dashboard(Some(&prof), Role::Student),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            can_access_dashboard(None, Role::Student),
            Err(AppError::Unauthenticated)
        ));
    }

    #[test]
    fn test_materials_open_to_everyone_logged_in() {
        assert!(can_download(Some(&identity(1, Role::Student)), Resource::Material).is_ok());
        assert!(can_download(Some(&identity(2, Role::Instructor)), Resource::Material).is_ok());
        assert!(matches!(
            can_download(None, Resource::Material),
            Err(AppError::Unauthenticated)
        ));
    }

    #[test]
    fn test_submission_owner_and_instructors_only() {
        let owned = Resource::Submission { student_id: 7 };
        assert!(can_download(Some(&identity(7, Role::Student)), owned).is_ok());
        assert!(can_download(Some(&identity(1, Role::Instructor)), owned).is_ok());
        assert!(matches!(
            can_download(Some(&identity(8, Role::Student)), owned),
            Err(AppError::Forbidden)
        ));
    }
}
