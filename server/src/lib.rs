//! A small HTTP origin that speaks the dialect `gridfs` expects: HTML
//! directory indexes with size and mtime attributes, ranged GET, ranged and
//! truncating PUT, DELETE and MOVE. Used as a reference server and as the
//! fixture for the client's integration tests.

pub mod handlers;

use axum::{Router, routing::get};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone)]
pub struct OriginState {
    /// Directory whose contents are served.
    pub root: PathBuf,
    /// URL path prefixes answered with 403.
    pub forbidden: Vec<String>,
}

impl OriginState {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            forbidden: Vec::new(),
        }
    }

    pub fn forbid(mut self, prefix: impl Into<String>) -> Self {
        self.forbidden.push(prefix.into());
        self
    }

    pub fn is_forbidden(&self, path: &str) -> bool {
        self.forbidden.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Local path for a decoded URL path; `None` if it tries to leave the root.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
        (!escapes).then(|| self.root.join(relative))
    }
}

pub fn router(state: OriginState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .fallback(handlers::dispatch)
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
}

/// Serves until the listener fails.
pub async fn serve(listener: tokio::net::TcpListener, state: OriginState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_stays_inside_the_root() {
        let state = OriginState::new("/srv/data");
        assert_eq!(state.resolve("/a/b.txt"), Some(PathBuf::from("/srv/data/a/b.txt")));
        assert_eq!(state.resolve("/dir/"), Some(PathBuf::from("/srv/data/dir")));
        assert_eq!(state.resolve("/"), Some(PathBuf::from("/srv/data")));
        assert_eq!(state.resolve("/a/../../etc/passwd"), None);
    }

    #[test]
    fn forbidden_prefixes() {
        let state = OriginState::new("/srv").forbid("/private");
        assert!(state.is_forbidden("/private/x"));
        assert!(!state.is_forbidden("/public/private"));
    }
}
