//! HTTP/1 serving on decrypted connections

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::site::{SiteRouter, StaticFileError};

/// Serve one connection until the client closes it.
///
/// `server_name` is the SNI hostname the TLS handshake completed for.
pub async fn serve_connection<S>(
    stream: S,
    server_name: Option<String>,
    router: Arc<SiteRouter>,
) -> Result<(), hyper::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let server_name: Arc<str> = Arc::from(server_name.unwrap_or_default());
    let service = service_fn(move |req: Request<Incoming>| {
        let router = Arc::clone(&router);
        let server_name = Arc::clone(&server_name);
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        async move { Ok::<_, Infallible>(handle(&router, &server_name, &method, &path).await) }
    });

    http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
}

/// Build the response for a single request
pub async fn handle(
    router: &SiteRouter,
    server_name: &str,
    method: &Method,
    path: &str,
) -> Response<Full<Bytes>> {
    if method != Method::GET && method != Method::HEAD {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    let file = match router.resolve(server_name, path) {
        Ok(file) => file,
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(host = %server_name, path = %path, "Failed to serve file: {}", e);
            } else {
                tracing::debug!(host = %server_name, path = %path, "{}", e);
            }
            return text_response(status, status.canonical_reason().unwrap_or("Error"));
        }
    };

    let body = if method == Method::HEAD {
        Bytes::new()
    } else {
        match tokio::fs::read(&file.path).await {
            Ok(contents) => Bytes::from(contents),
            Err(e) => {
                tracing::error!(path = %file.path.display(), "Failed to read file: {}", e);
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        }
    };

    let mut response = Response::new(Full::new(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(file.content_type));
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(file.size));
    response
}

fn status_for(error: &StaticFileError) -> StatusCode {
    match error {
        StaticFileError::UnknownSite(_)
        | StaticFileError::NotFound(_)
        | StaticFileError::Script(_) => StatusCode::NOT_FOUND,
        StaticFileError::PathTraversal(_) => StatusCode::FORBIDDEN,
        StaticFileError::InvalidPath(_) => StatusCode::BAD_REQUEST,
        StaticFileError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(format!("{}\n", message))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
