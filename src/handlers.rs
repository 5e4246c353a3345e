use crate::error::AppError;
use crate::models::{Announcement, Material, NewAnnouncement, Role, Submission, SubmissionWithStudent};
use crate::policy::{self, Resource, ResourceKind};
use crate::server::AppState;
use crate::session::{session_cookie, Flash, FlashCategory, Identity, RequestContext};
use crate::{auth, repository};
use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

const INSTRUCTOR_HOME: &str = "/dashboard_profesor";
const STUDENT_HOME: &str = "/dashboard_estudiante";

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
pub struct AnnouncementForm {
    #[serde(default, alias = "titulo")]
    title: String,
    #[serde(default, alias = "contenido")]
    body: String,
}

#[derive(Serialize)]
pub struct LoginPage {
    user: Option<Identity>,
    flashes: Vec<Flash>,
}

#[derive(Serialize)]
pub struct InstructorDashboard {
    user: Identity,
    flashes: Vec<Flash>,
    announcements: Vec<Announcement>,
    materials: Vec<Material>,
}

#[derive(Serialize)]
pub struct StudentDashboard {
    user: Identity,
    flashes: Vec<Flash>,
    announcements: Vec<Announcement>,
    materials: Vec<Material>,
    submissions: Vec<Submission>,
}

#[derive(Serialize)]
pub struct SubmissionsPage {
    user: Identity,
    flashes: Vec<Flash>,
    submissions: Vec<SubmissionWithStudent>,
}

#[derive(Default)]
struct UploadForm {
    title: String,
    description: Option<String>,
    file: Option<(String, Bytes)>,
}

async fn redirect_with_flash(
    state: &AppState,
    ctx: &RequestContext,
    to: &str,
    flash: Flash,
) -> Response {
    let token = state.sessions.push_flash(ctx.token(), flash).await;
    (
        [(header::SET_COOKIE, session_cookie(&token))],
        Redirect::to(to),
    )
        .into_response()
}

/// Turns a failed request into a redirect plus flash. Store failures stay fatal.
async fn recover(state: &AppState, ctx: &RequestContext, err: AppError, fallback: &str) -> Response {
    if err.is_fatal() {
        return err.into_response();
    }
    let to = match &err {
        AppError::Unauthenticated => "/login",
        AppError::Forbidden => ctx.home_path(),
        _ => fallback,
    };
    let flash = Flash::new(err.flash_category(), err.user_message());
    redirect_with_flash(state, ctx, to, flash).await
}

pub async fn index(ctx: RequestContext) -> Redirect {
    Redirect::to(ctx.home_path())
}

pub async fn login_page(State(state): State<AppState>, ctx: RequestContext) -> Json<LoginPage> {
    let flashes = state.sessions.take_flashes(ctx.token()).await;
    Json(LoginPage {
        user: ctx.identity,
        flashes,
    })
}

pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Form(login_data): Form<LoginForm>,
) -> Response {
    match auth::authenticate(&state.repo, &login_data.email, &login_data.password).await {
        Ok(identity) => {
            let to = identity.role.dashboard_path();
            info!(
                user_id = identity.user_id,
                role = identity.role.as_str(),
                "login succeeded"
            );
            let token = state.sessions.login(ctx.token(), identity).await;
            (
                [(header::SET_COOKIE, session_cookie(&token))],
                Redirect::to(to),
            )
                .into_response()
        }
        Err(err) => {
            if matches!(err, AppError::InvalidCredentials) {
                warn!(email = %login_data.email, "login failed");
            }
            recover(&state, &ctx, err, "/login").await
        }
    }
}

pub async fn logout(State(state): State<AppState>, ctx: RequestContext) -> Response {
    if let Some(token) = ctx.token() {
        state.sessions.logout(token).await;
    }
    if let Some(identity) = ctx.identity() {
        info!(user_id = identity.user_id, "logged out");
    }
    let fresh = RequestContext::default();
    let flash = Flash::new(FlashCategory::Success, "Ha cerrado sesión exitosamente.");
    redirect_with_flash(&state, &fresh, "/login", flash).await
}

async fn load_instructor_dashboard(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<InstructorDashboard, AppError> {
    let user = policy::can_access_dashboard(ctx.identity(), Role::Instructor)?.clone();
    let announcements = state.repo.list_announcements().await?;
    let materials = state.repo.list_materials().await?;
    let flashes = state.sessions.take_flashes(ctx.token()).await;
    Ok(InstructorDashboard {
        user,
        flashes,
        announcements,
        materials,
    })
}

pub async fn instructor_dashboard(State(state): State<AppState>, ctx: RequestContext) -> Response {
    match load_instructor_dashboard(&state, &ctx).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => recover(&state, &ctx, err, "/login").await,
    }
}

async fn load_instructor_submissions(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<SubmissionsPage, AppError> {
    let user = policy::can_access_dashboard(ctx.identity(), Role::Instructor)?.clone();
    let submissions = state.repo.list_submissions_with_students().await?;
    let flashes = state.sessions.take_flashes(ctx.token()).await;
    Ok(SubmissionsPage {
        user,
        flashes,
        submissions,
    })
}

pub async fn instructor_submissions(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Response {
    match load_instructor_submissions(&state, &ctx).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => recover(&state, &ctx, err, INSTRUCTOR_HOME).await,
    }
}

async fn load_student_dashboard(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<StudentDashboard, AppError> {
    let user = policy::can_access_dashboard(ctx.identity(), Role::Student)?.clone();
    let announcements = state.repo.list_announcements().await?;
    let materials = state.repo.list_materials().await?;
    let submissions = state.repo.list_submissions(Some(user.user_id)).await?;
    let flashes = state.sessions.take_flashes(ctx.token()).await;
    Ok(StudentDashboard {
        user,
        flashes,
        announcements,
        materials,
        submissions,
    })
}

pub async fn student_dashboard(State(state): State<AppState>, ctx: RequestContext) -> Response {
    match load_student_dashboard(&state, &ctx).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => recover(&state, &ctx, err, "/login").await,
    }
}

async fn create_announcement(
    state: &AppState,
    ctx: &RequestContext,
    form: &AnnouncementForm,
) -> Result<i64, AppError> {
    policy::can_access_dashboard(ctx.identity(), Role::Instructor)?;
    state
        .repo
        .create_announcement(&NewAnnouncement {
            title: form.title.trim(),
            body: form.body.trim(),
        })
        .await
}

pub async fn publish_announcement(
    State(state): State<AppState>,
    ctx: RequestContext,
    Form(form): Form<AnnouncementForm>,
) -> Response {
    match create_announcement(&state, &ctx, &form).await {
        Ok(id) => {
            info!(id, "announcement published");
            let flash = Flash::new(FlashCategory::Success, "Anuncio publicado con éxito.");
            redirect_with_flash(&state, &ctx, INSTRUCTOR_HOME, flash).await
        }
        Err(err) => recover(&state, &ctx, err, INSTRUCTOR_HOME).await,
    }
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" | "titulo" => form.title = field.text().await?,
            "description" | "descripcion" => form.description = Some(field.text().await?),
            "file" | "archivo" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                if !filename.is_empty() {
                    form.file = Some((filename, data));
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn store_material(
    state: &AppState,
    ctx: &RequestContext,
    multipart: Multipart,
) -> Result<(i64, String), AppError> {
    policy::can_access_dashboard(ctx.identity(), Role::Instructor)?;
    let form = read_upload_form(multipart).await?;
    let (filename, data) = form.file.ok_or(AppError::EmptyFilename)?;
    repository::require("title", &form.title)?;

    let mut staged = state
        .files
        .stage(ResourceKind::Material, &data, &filename, None)
        .await?;
    let description = form.description.as_deref().map(str::trim);
    let id = state
        .repo
        .create_material_upload(form.title.trim(), description, &mut staged)
        .await?;
    Ok((id, staged.stored_filename().to_string()))
}

pub async fn publish_material(
    State(state): State<AppState>,
    ctx: RequestContext,
    multipart: Multipart,
) -> Response {
    match store_material(&state, &ctx, multipart).await {
        Ok((id, stored_filename)) => {
            info!(id, stored_filename = %stored_filename, "material uploaded");
            let flash = Flash::new(FlashCategory::Success, "Material subido con éxito.");
            redirect_with_flash(&state, &ctx, INSTRUCTOR_HOME, flash).await
        }
        Err(err) => recover(&state, &ctx, err, INSTRUCTOR_HOME).await,
    }
}

async fn store_submission(
    state: &AppState,
    ctx: &RequestContext,
    multipart: Multipart,
) -> Result<(i64, String), AppError> {
    let student_id = policy::can_access_dashboard(ctx.identity(), Role::Student)?.user_id;
    let form = read_upload_form(multipart).await?;
    let (filename, data) = form.file.ok_or(AppError::EmptyFilename)?;
    repository::require("title", &form.title)?;

    let mut staged = state
        .files
        .stage(ResourceKind::Submission, &data, &filename, Some(student_id))
        .await?;
    let id = state
        .repo
        .create_submission_upload(student_id, form.title.trim(), &mut staged)
        .await?;
    Ok((id, staged.stored_filename().to_string()))
}

pub async fn submit_assignment(
    State(state): State<AppState>,
    ctx: RequestContext,
    multipart: Multipart,
) -> Response {
    match store_submission(&state, &ctx, multipart).await {
        Ok((id, stored_filename)) => {
            info!(id, stored_filename = %stored_filename, "submission received");
            let flash = Flash::new(
                FlashCategory::Success,
                "Trabajo práctico enviado con éxito.",
            );
            redirect_with_flash(&state, &ctx, STUDENT_HOME, flash).await
        }
        Err(err) => recover(&state, &ctx, err, STUDENT_HOME).await,
    }
}

async fn serve_download(
    state: &AppState,
    ctx: &RequestContext,
    kind: &str,
    filename: &str,
) -> Result<Response, AppError> {
    let identity = ctx.identity().ok_or(AppError::Unauthenticated)?;
    let kind = ResourceKind::from_segment(kind)?;

    let (resource, original_filename) = match kind {
        ResourceKind::Material => {
            let material = state
                .repo
                .find_material_by_stored_name(filename)
                .await?
                .ok_or(AppError::NotFound)?;
            (Resource::Material, material.original_filename)
        }
        ResourceKind::Submission => {
            let submission = state
                .repo
                .find_submission_by_stored_name(filename)
                .await?
                .ok_or(AppError::NotFound)?;
            (
                Resource::Submission {
                    student_id: submission.student_id,
                },
                submission.original_filename,
            )
        }
    };
    policy::can_download(Some(identity), resource)?;

    let file = state.files.read_upload(kind, filename).await?;
    let mime_type = mime_guess::from_path(&original_filename).first_or_octet_stream();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, mime_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", original_filename),
            ),
        ],
        body,
    )
        .into_response())
}

pub async fn download(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((kind, filename)): Path<(String, String)>,
) -> Response {
    match serve_download(&state, &ctx, &kind, &filename).await {
        Ok(response) => response,
        Err(err) => {
            if matches!(err, AppError::Forbidden) {
                warn!(
                    kind = %kind,
                    filename = %filename,
                    user_id = ?ctx.identity().map(|i| i.user_id),
                    "download denied"
                );
            }
            recover(&state, &ctx, err, "/").await
        }
    }
}
