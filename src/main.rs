use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use course_portal::config::{
    Config, DatabaseLocation, DEFAULT_BIND_ADDR, DEFAULT_MAX_UPLOAD_BYTES,
    DEFAULT_SESSION_TTL_SECS, DEFAULT_UPLOAD_ROOT,
};
use course_portal::repository::Repository;
use course_portal::{auth, logger, seed, server};

#[derive(Parser, Debug)]
#[command(name = "course-portal", version, about = "Course announcements, materials and submissions")]
struct Args {
    /// postgres://..., sqlite:<path>, sqlite::memory: or a bare path; defaults to instance/curso.db
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[arg(long, env = "UPLOAD_ROOT", default_value = DEFAULT_UPLOAD_ROOT, global = true)]
    upload_root: PathBuf,

    #[arg(long, env = "BIND_ADDR", default_value = DEFAULT_BIND_ADDR, global = true)]
    bind: SocketAddr,

    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES, global = true)]
    max_upload_bytes: usize,

    /// Idle lifetime of a logged-in session
    #[arg(long, env = "SESSION_TTL_SECS", default_value_t = DEFAULT_SESSION_TTL_SECS, global = true)]
    session_ttl_secs: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create the demo instructor and student accounts
    Seed {
        /// Delete the local database file first
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init_logging();
    let args = Args::parse();

    let config = Config::new(
        args.database_url.as_deref(),
        args.upload_root,
        args.bind,
        args.max_upload_bytes,
    )?
    .with_session_ttl_secs(args.session_ttl_secs)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => server::run(config).await,
        Command::Seed { reset } => run_seed(&config, reset).await,
    }
}

async fn run_seed(config: &Config, reset: bool) -> Result<()> {
    if config.database == DatabaseLocation::Memory {
        tracing::warn!("seeding an in-memory database; nothing will persist");
    }
    if reset && seed::reset_database(&config.database).context("failed to remove database")? {
        tracing::info!("previous database removed");
    }

    let repo = Repository::open(&config.database)
        .await
        .with_context(|| format!("failed to open database {}", config.database))?;
    let created = seed::seed_users(&repo, &seed::DEMO_USERS, auth::DEFAULT_COST).await?;
    tracing::info!(created = created.len(), "database seeding complete");
    Ok(())
}
