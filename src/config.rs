use std::env;
use std::path::PathBuf;

pub const LOG_ENV: &str = "TIMETABLED_LOG";
pub const WORKSPACE_ENV: &str = "TIMETABLED_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// `tracing` filter directive, e.g. `info` or `timetabled=debug`.
    pub log_filter: String,
    /// Workspace opened before the first request, if set.
    pub workspace: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_filter = lookup(LOG_ENV)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let workspace = lookup(WORKSPACE_ENV)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        Self {
            log_filter,
            workspace,
        }
    }
}
