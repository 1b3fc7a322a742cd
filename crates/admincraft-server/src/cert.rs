//! `/cert` endpoint: lets clients fetch the server's public certificate so
//! they can trust a self-signed `wss` endpoint.

use std::path::Path;

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::warn;

/// Stream the certificate at `path`, or 404 when TLS is off or the file is missing.
pub async fn serve_certificate(path: Option<&Path>) -> Response {
    let Some(path) = path else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "certificate unavailable");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let headers = [
        (header::CONTENT_TYPE, "application/x-x509-ca-cert"),
        (header::CONTENT_DISPOSITION, "attachment; filename=\"server.crt\""),
    ];
    (headers, Body::from_stream(ReaderStream::new(file))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_is_not_found() {
        let resp = serve_certificate(None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let resp = serve_certificate(Some(Path::new("/nonexistent/server.crt"))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn streams_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.crt");
        std::fs::write(&path, "-----BEGIN CERTIFICATE-----\nMIIB\n").unwrap();

        let resp = serve_certificate(Some(&path)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/x-x509-ca-cert"
        );
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert!(body.starts_with(b"-----BEGIN CERTIFICATE-----"));
    }
}
