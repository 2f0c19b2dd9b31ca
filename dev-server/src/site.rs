//! Virtual-host routing and static files
//!
//! The site for a request is the second-to-last label of the TLS server
//! name (`blog.test` and `www.blog.test` both map to `blog`). Its files live
//! in `<sites>/<site>/public`.

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use thiserror::Error;

/// Document root directory inside each site
pub const PUBLIC_DIR: &str = "public";
/// Extension of scripts that are executed by a FastCGI backend, never served raw
const SCRIPT_EXTENSION: &str = "php";

#[derive(Debug, Error)]
pub enum StaticFileError {
    #[error("No site for server name: {0}")]
    UnknownSite(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Script requires a FastCGI backend: {0}")]
    Script(String),

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file ready to be served
#[derive(Debug, Clone)]
pub struct StaticFile {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub size: u64,
}

/// Site name for a TLS server name, if it has at least two labels
pub fn site_for_server_name(server_name: &str) -> Option<&str> {
    let labels: Vec<&str> = server_name.trim_end_matches('.').split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    Some(labels[labels.len() - 2]).filter(|site| !site.is_empty())
}

/// Maps (server name, request path) to a file under the sites directory.
#[derive(Debug, Clone)]
pub struct SiteRouter {
    sites_dir: PathBuf,
}

impl SiteRouter {
    pub fn new(sites_dir: impl Into<PathBuf>) -> Self {
        Self {
            sites_dir: sites_dir.into(),
        }
    }

    pub fn sites_dir(&self) -> &Path {
        &self.sites_dir
    }

    /// Document root for a server name
    pub fn document_root(&self, server_name: &str) -> Result<PathBuf, StaticFileError> {
        let site = site_for_server_name(server_name)
            .ok_or_else(|| StaticFileError::UnknownSite(server_name.to_string()))?;
        Ok(self.sites_dir.join(site).join(PUBLIC_DIR))
    }

    /// Resolve a request path to a file
    pub fn resolve(
        &self,
        server_name: &str,
        request_path: &str,
    ) -> Result<StaticFile, StaticFileError> {
        let root = self.document_root(server_name)?;
        let clean_path = normalize_path(request_path)?;

        let canonical = root
            .join(&clean_path)
            .canonicalize()
            .map_err(|_| StaticFileError::NotFound(request_path.to_string()))?;
        let root_canonical = root
            .canonicalize()
            .map_err(|_| StaticFileError::NotFound(request_path.to_string()))?;

        // Symlinks may still point outside the root.
        if !canonical.starts_with(&root_canonical) {
            return Err(StaticFileError::PathTraversal(request_path.to_string()));
        }

        let target = if canonical.is_dir() {
            canonical.join("index.html")
        } else {
            canonical
        };
        if !target.is_file() {
            return Err(StaticFileError::NotFound(request_path.to_string()));
        }

        let extension = target
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if extension == SCRIPT_EXTENSION {
            return Err(StaticFileError::Script(request_path.to_string()));
        }

        let size = std::fs::metadata(&target)?.len();

        Ok(StaticFile {
            path: target,
            content_type: mime_type(&extension),
            size,
        })
    }
}

/// Strip the leading slash, percent-decode, and reject traversal
fn normalize_path(path: &str) -> Result<String, StaticFileError> {
    let decoded = percent_decode_str(path.trim_start_matches('/'))
        .decode_utf8()
        .map_err(|_| StaticFileError::InvalidPath(path.to_string()))?;

    if decoded.contains('\0') {
        return Err(StaticFileError::InvalidPath("null byte in path".to_string()));
    }
    if decoded.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(StaticFileError::PathTraversal(path.to_string()));
    }

    Ok(decoded.into_owned())
}

fn mime_type(extension: &str) -> &'static str {
    match extension {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "webmanifest" => "application/manifest+json",
        _ => "application/octet-stream",
    }
}
