//! HTTP surface: `/file/download` and `/file/download-page`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header::RANGE;
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::config::Config;
use crate::remote::{self, RemoteSource};
use crate::{fixture, LocalFile, RangeTransfer, TransferError, TransferResult};

const DOWNLOAD_PAGE: &str = include_str!("../assets/download-page.html");

/// Shared per-process state. Immutable; requests share nothing mutable.
#[derive(Debug, Clone)]
pub struct AppState {
    config: Arc<Config>,
    client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> reqwest::Result<AppState> {
        let client = config.upstream.client()?;
        Ok(AppState { config: Arc::new(config), client })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadQuery {
    pub url: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/file/download", get(download))
        .route("/file/download-page", get(download_page))
        .with_state(state)
}

async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Response {
    let result = match query.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => download_remote(&state, url, &headers).await,
        None => download_local(&state, &headers).await,
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(error = %e, status = %e.status(), "download rejected");
            e.into_response()
        }
    }
}

async fn download_local(state: &AppState, headers: &HeaderMap) -> TransferResult<Response> {
    let path = &state.config.file;
    tracing::info!(path = %path.display(), range = ?headers.get(RANGE), "local download");

    if let Some(size) = state.config.fill_missing_bytes {
        fixture::ensure_filler(path, size).await?;
    }

    let source = match LocalFile::load(path).await {
        Ok(source) => source,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(TransferError::NotFound),
        Err(e) => return Err(e.into()),
    };

    let response = RangeTransfer::from_headers(headers, source).try_respond().await?;
    Ok(response.into_response())
}

async fn download_remote(state: &AppState, url: &str, headers: &HeaderMap) -> TransferResult<Response> {
    let url = remote::parse_url(url)?;
    tracing::info!(%url, range = ?headers.get(RANGE), "remote download");

    let source = RemoteSource::probe(
        state.client.clone(),
        url,
        state.config.upstream.head_timeout(),
    )
    .await;

    let response = RangeTransfer::from_headers(headers, source).try_respond().await?;
    Ok(response.into_response())
}

async fn download_page() -> Html<&'static str> {
    Html(DOWNLOAD_PAGE)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, StatusCode};

    use super::*;

    fn state(file: &str) -> AppState {
        let config = Config { file: file.into(), ..Config::default() };
        AppState::new(config).unwrap()
    }

    fn query(url: Option<&str>) -> Query<DownloadQuery> {
        Query(DownloadQuery { url: url.map(str::to_owned) })
    }

    fn range(header: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static(header));
        headers
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_download_local_range() {
        let response = download(State(state("test/fixture.txt")), query(None), range("bytes=0-4")).await;

        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        assert_eq!("bytes 0-4/54", response.headers().get("Content-Range").unwrap());
        assert_eq!("Hello", body_string(response).await);
    }

    #[tokio::test]
    async fn test_download_local_unsatisfiable() {
        let response = download(State(state("test/fixture.txt")), query(None), range("bytes=54-")).await;

        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, response.status());
        assert_eq!("bytes */54", response.headers().get("Content-Range").unwrap());
    }

    #[tokio::test]
    async fn test_download_local_unsupported_unit() {
        let response = download(State(state("test/fixture.txt")), query(None), range("lines=0-4")).await;

        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, response.status());
        assert_eq!("bytes */54", response.headers().get("Content-Range").unwrap());
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let response = download(State(state("test/does-not-exist.bin")), query(None), HeaderMap::new()).await;

        assert_eq!(StatusCode::NOT_FOUND, response.status());
    }

    #[tokio::test]
    async fn test_download_invalid_url() {
        let response = download(
            State(state("test/fixture.txt")),
            query(Some("ftp://example.com/a.bin")),
            HeaderMap::new(),
        )
        .await;

        assert_eq!(StatusCode::BAD_REQUEST, response.status());
    }

    #[tokio::test]
    async fn test_empty_url_serves_local_file() {
        let response = download(State(state("test/fixture.txt")), query(Some("  ")), HeaderMap::new()).await;

        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("54", response.headers().get("Content-Length").unwrap());
    }

    #[tokio::test]
    async fn test_download_page() {
        let response = download_page().await.into_response();

        assert_eq!(StatusCode::OK, response.status());
        assert!(response.headers().get("Content-Type").unwrap().to_str().unwrap().starts_with("text/html"));
        assert!(body_string(response).await.contains("/file/download?url="));
    }
}
