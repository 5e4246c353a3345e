use tracing_subscriber::{fmt, EnvFilter};

/// Dependencies stay at `warn`; this crate logs at `LOG_LEVEL` (default `info`).
const DEFAULT_DIRECTIVES: &str = "warn,course_portal=info";

/// `RUST_LOG` wins outright. Otherwise `LOG_LEVEL` only raises or lowers our own output.
fn filter_directives(rust_log: Option<String>, log_level: Option<String>) -> String {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return directives;
    }
    match log_level.map(|l| l.trim().to_lowercase()) {
        Some(level) if !level.is_empty() => format!("warn,course_portal={}", level),
        _ => DEFAULT_DIRECTIVES.to_string(),
    }
}

pub fn init_logging() {
    let directives = filter_directives(
        std::env::var("RUST_LOG").ok(),
        std::env::var("LOG_LEVEL").ok(),
    );
    let filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    fmt().with_env_filter(filter).with_target(false).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scopes_info_to_this_crate() {
        assert_eq!(filter_directives(None, None), "warn,course_portal=info");
        assert_eq!(filter_directives(None, Some(" ".into())), DEFAULT_DIRECTIVES);
    }

    #[test]
    fn test_log_level_only_touches_this_crate() {
        assert_eq!(
            filter_directives(None, Some("DEBUG".into())),
            "warn,course_portal=debug"
        );
    }

    #[test]
    fn test_rust_log_overrides_everything() {
        assert_eq!(
            filter_directives(Some("tower_http=trace".into()), Some("debug".into())),
            "tower_http=trace"
        );
    }
}
