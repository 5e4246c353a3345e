use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::handlers;
use crate::repository::Repository;
use crate::session::{SessionStore, ANONYMOUS_SESSION_TTL, MAX_ANONYMOUS_SESSIONS};
use crate::storage::FileStore;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub repo: Repository,
    pub files: FileStore,
    pub sessions: SessionStore,
}

impl FromRef<AppState> for SessionStore {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let repo = Repository::open(&config.database)
        .await
        .with_context(|| format!("failed to open database {}", config.database))?;
    let files = FileStore::new(&config.upload_root);
    files.init().await.with_context(|| {
        format!(
            "failed to prepare upload root {}",
            config.upload_root.display()
        )
    })?;
    Ok(AppState {
        repo,
        files,
        sessions: SessionStore::with_limits(
            config.session_ttl,
            ANONYMOUS_SESSION_TTL,
            MAX_ANONYMOUS_SESSIONS,
        ),
    })
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/login", get(handlers::login_page).post(handlers::login))
        .route("/logout", get(handlers::logout))
        .route("/dashboard_profesor", get(handlers::instructor_dashboard))
        .route("/publicar_anuncio", post(handlers::publish_announcement))
        .route("/subir_material", post(handlers::publish_material))
        .route("/ver_entregas_profesor", get(handlers::instructor_submissions))
        .route("/dashboard_estudiante", get(handlers::student_dashboard))
        .route("/subir_entrega", post(handlers::submit_assignment))
        .route("/download/:kind/:filename", get(handlers::download))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        database = %config.database,
        upload_root = %config.upload_root.display(),
        max_upload_bytes = config.max_upload_bytes,
        session_ttl_secs = config.session_ttl.as_secs(),
        "starting course portal"
    );

    let state = build_state(&config).await?;
    let app = router(state, config.max_upload_bytes);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Server running on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
