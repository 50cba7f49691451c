//! Resource loading: the `fetch` surface of the host model.

use log::{debug, trace};
use reqwest::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use url::Url;

/// `fetch(url, { mode })`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMode {
    /// The response must allow the page origin when it is cross-origin.
    Cors,
    /// An engine-level load, as for `<link rel=stylesheet>` without
    /// `crossorigin`. Always readable by the engine.
    NoCors,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Network(String),
    Status(u16),
    CorsBlocked,
    UnsupportedScheme(String),
    NotFound,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Network(message) => write!(f, "network error: {}", message),
            FetchError::Status(status) => write!(f, "unexpected status {}", status),
            FetchError::CorsBlocked => f.write_str("blocked by CORS policy"),
            FetchError::UnsupportedScheme(scheme) => write!(f, "unsupported scheme `{}`", scheme),
            FetchError::NotFound => f.write_str("resource not found"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Whether two URLs share an origin. `file:` URLs are treated as one
/// origin so local pages can read their local stylesheets.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    if a.scheme() == "file" && b.scheme() == "file" {
        return true;
    }
    a.origin() == b.origin()
}

pub trait Fetcher {
    /// Load `url` as text on behalf of the page at `page_url`.
    fn fetch(
        &self,
        url: &Url,
        mode: RequestMode,
        page_url: &Url,
    ) -> impl Future<Output = Result<String, FetchError>>;
}

/// Loads `http(s)` resources with reqwest and `file` resources from disk.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher::default()
    }

    async fn fetch_http(
        &self,
        url: &Url,
        mode: RequestMode,
        page_url: &Url,
    ) -> Result<String, FetchError> {
        let cross_origin = !same_origin(url, page_url);
        let page_origin = page_url.origin().ascii_serialization();
        let mut request = self.client.get(url.clone());
        if mode == RequestMode::Cors && cross_origin {
            request = request.header(ORIGIN, page_origin.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if mode == RequestMode::Cors && cross_origin {
            let allowed = response
                .headers()
                .get(ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|value| value.to_str().ok())
                .map(|value| value == "*" || value == page_origin)
                .unwrap_or(false);
            if !allowed {
                return Err(FetchError::CorsBlocked);
            }
        }
        response
            .text()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        mode: RequestMode,
        page_url: &Url,
    ) -> Result<String, FetchError> {
        trace!("fetching {} ({:?})", url, mode);
        let result = match url.scheme() {
            "http" | "https" => self.fetch_http(url, mode, page_url).await,
            "file" => {
                if mode == RequestMode::Cors && !same_origin(url, page_url) {
                    return Err(FetchError::CorsBlocked);
                }
                let path = url
                    .to_file_path()
                    .map_err(|()| FetchError::UnsupportedScheme("file".to_string()))?;
                tokio::fs::read_to_string(&path).await.map_err(|err| {
                    if err.kind() == std::io::ErrorKind::NotFound {
                        FetchError::NotFound
                    } else {
                        FetchError::Network(err.to_string())
                    }
                })
            }
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        };
        if let Err(err) = &result {
            debug!("fetch of {} failed: {}", url, err);
        }
        result
    }
}

#[derive(Debug, Clone)]
struct StaticResource {
    body: String,
    allow_cors: bool,
}

/// In-memory resources keyed by absolute URL.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    resources: HashMap<String, StaticResource>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        StaticFetcher::default()
    }

    /// Add a resource that does not send CORS headers.
    pub fn with(mut self, url: &str, body: &str) -> Self {
        self.insert(url, body, false);
        self
    }

    /// Add a resource served with `Access-Control-Allow-Origin: *`.
    pub fn with_cors(mut self, url: &str, body: &str) -> Self {
        self.insert(url, body, true);
        self
    }

    pub fn insert(&mut self, url: &str, body: &str, allow_cors: bool) {
        let key = Url::parse(url)
            .map(String::from)
            .unwrap_or_else(|_| url.to_string());
        self.resources.insert(
            key,
            StaticResource {
                body: body.to_string(),
                allow_cors,
            },
        );
    }
}

impl Fetcher for StaticFetcher {
    async fn fetch(
        &self,
        url: &Url,
        mode: RequestMode,
        page_url: &Url,
    ) -> Result<String, FetchError> {
        let resource = self.resources.get(url.as_str()).ok_or(FetchError::NotFound)?;
        if mode == RequestMode::Cors && !same_origin(url, page_url) && !resource.allow_cors {
            debug!("fetch of {} failed: {}", url, FetchError::CorsBlocked);
            return Err(FetchError::CorsBlocked);
        }
        Ok(resource.body.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(text: &str) -> Url {
        Url::parse(text).unwrap()
    }

    #[tokio::test]
    async fn test_static_fetcher_cors_rules() {
        let page = url("https://site.test/index.html");
        let fetcher = StaticFetcher::new()
            .with("https://site.test/a.css", "a{}")
            .with("https://cdn.test/b.css", "b{}")
            .with_cors("https://cors.test/c.css", "c{}");

        let same = fetcher.fetch(&url("https://site.test/a.css"), RequestMode::Cors, &page).await;
        assert_eq!(same, Ok("a{}".to_string()));

        let blocked = fetcher.fetch(&url("https://cdn.test/b.css"), RequestMode::Cors, &page).await;
        assert_eq!(blocked, Err(FetchError::CorsBlocked));

        let engine_load = fetcher.fetch(&url("https://cdn.test/b.css"), RequestMode::NoCors, &page).await;
        assert_eq!(engine_load, Ok("b{}".to_string()));

        let allowed = fetcher.fetch(&url("https://cors.test/c.css"), RequestMode::Cors, &page).await;
        assert_eq!(allowed, Ok("c{}".to_string()));

        let missing = fetcher.fetch(&url("https://site.test/none.css"), RequestMode::NoCors, &page).await;
        assert_eq!(missing, Err(FetchError::NotFound));
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_unknown_schemes() {
        let page = url("https://site.test/");
        let result = HttpFetcher::new()
            .fetch(&url("data:text/css,a{}"), RequestMode::NoCors, &page)
            .await;
        assert_eq!(result, Err(FetchError::UnsupportedScheme("data".to_string())));
    }

    #[test]
    fn test_same_origin() {
        assert!(same_origin(&url("https://a.test/x.css"), &url("https://a.test/")));
        assert!(!same_origin(&url("https://a.test/"), &url("http://a.test/")));
        assert!(same_origin(&url("file:///tmp/a.css"), &url("file:///home/b.html")));
    }
}
