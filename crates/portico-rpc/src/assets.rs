// crates/portico-rpc/src/assets.rs
//
// Static documentation assets: `/swagger.json` and `/swagger-ui/*`, served
// from a directory on disk.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use http::{header, HeaderValue, Method, Response, StatusCode};
use http_body_util::Full;

use crate::router::{SWAGGER_JSON_PATH, SWAGGER_UI_PREFIX};

/// File server rooted at a directory.
#[derive(Debug, Clone)]
pub struct StaticAssets {
    root: PathBuf,
}

impl StaticAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request path to a file under the root.
    ///
    /// Returns `None` for paths outside the asset prefixes and for any path
    /// with a `..` segment.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        if path != SWAGGER_JSON_PATH && !path.starts_with(SWAGGER_UI_PREFIX) {
            return None;
        }
        let relative = path.trim_start_matches('/');
        if relative
            .split('/')
            .any(|segment| segment == ".." || segment.contains('\\'))
        {
            return None;
        }
        let mut resolved = self.root.join(relative);
        if path.ends_with('/') {
            resolved.push("index.html");
        }
        Some(resolved)
    }

    /// Serve a GET or HEAD for `path`.
    pub async fn serve(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        if method != Method::GET && method != Method::HEAD {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }
        let Some(file) = self.resolve(path) else {
            return plain(StatusCode::NOT_FOUND, "not found");
        };

        match tokio::fs::read(&file).await {
            Ok(contents) => {
                let body = if method == Method::HEAD {
                    Bytes::new()
                } else {
                    Bytes::from(contents)
                };
                let mut response = Response::new(Full::new(body));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(mime_type(&file)),
                );
                response
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                plain(StatusCode::NOT_FOUND, "not found")
            }
            Err(e) => {
                tracing::warn!("Failed to read asset {}: {}", file.display(), e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, "failed to read asset")
            }
        }
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Content type by file extension.
fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript",
        Some("json") | Some("map") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
