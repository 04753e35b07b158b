//! Static file serving, usable as the app's fallback handler.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use tracing::debug;
use wafer_http::Response;

use crate::handler::{Handler, HandlerResult, RequestContext};

/// Serves files below a root directory. Request paths are resolved
/// relative to the root; anything that would escape it is treated as
/// missing. Directory requests fall back to `index.html`.
pub struct StaticFiles {
    root: PathBuf,
    index: String,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), index: "index.html".to_string() }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = sanitize(request_path)?;
        let mut path = self.root.join(relative);
        if request_path.ends_with('/') || request_path == "/" {
            path.push(&self.index);
        }
        Some(path)
    }
}

/// Normalizes a request path into a safe relative path, or `None` when it
/// steps outside the root.
fn sanitize(request_path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

#[async_trait]
impl Handler for StaticFiles {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> HandlerResult {
        if ctx.request.method() != Method::GET && ctx.request.method() != Method::HEAD {
            return Ok(Response::status(StatusCode::NOT_FOUND));
        }

        let Some(path) = self.resolve(ctx.request.path()) else {
            debug!(path = ctx.request.path(), "rejected unsafe static path");
            return Ok(Response::status(StatusCode::NOT_FOUND));
        };

        match tokio::fs::read(&path).await {
            Ok(data) => {
                let filename =
                    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                Ok(Response::file(filename, Bytes::from(data), true))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Response::status(StatusCode::NOT_FOUND))
            }
            Err(e) => Err(e.into()),
        }
    }
}
