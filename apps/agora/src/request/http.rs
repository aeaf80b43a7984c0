use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::SET_COOKIE;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::{FetchError, Fetcher};
use crate::resources::{ApiRequest, ApiResponse, Method};

/// [`Fetcher`] over reqwest. Keeps the server's session cookie between calls,
/// and between runs when given a cookie file.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    jar: Arc<Jar>,
    cookie_file: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(api_url: &str) -> Self {
        // dial 127.0.0.1, never ::1
        let server = api_url.replace("localhost", "127.0.0.1");
        let server = if server.starts_with("http://") || server.starts_with("https://") {
            server
        } else {
            format!("http://{server}")
        };
        let base_url = server.trim_end_matches('/').to_owned();

        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .cookie_provider(jar.clone())
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url,
            jar,
            cookie_file: None,
        }
    }

    /// Seeds the cookie jar from `path` and rewrites the file whenever the
    /// server sets or expires a cookie.
    pub fn with_cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match fs::read_to_string(&path) {
            Ok(header) => self.restore_cookies(&header),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(target: "agora::request", path = %path.display(), error = %err, "unreadable cookie file"),
        }
        self.cookie_file = Some(path);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `Cookie` header the next call to the server would carry.
    pub fn cookie_header(&self) -> Option<String> {
        let url = self.origin()?;
        let header = self.jar.cookies(&url)?;
        header.to_str().ok().map(str::to_owned)
    }

    fn restore_cookies(&self, header: &str) {
        let Some(url) = self.origin() else { return };
        for cookie in header.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            self.jar.add_cookie_str(cookie, &url);
        }
    }

    fn origin(&self) -> Option<Url> {
        Url::parse(&format!("{}/", self.base_url)).ok()
    }

    fn persist_cookies(&self, path: &Path) {
        let written = match self.cookie_header() {
            Some(header) => write_private(path, &header),
            None => match fs::remove_file(path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            },
        };
        match written {
            Ok(()) => debug!(target: "agora::request", path = %path.display(), "session cookie saved"),
            Err(err) => warn!(target: "agora::request", path = %path.display(), error = %err, "could not save session cookie"),
        }
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// Writes `contents` readable by the owner only.
fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &ApiRequest) -> Result<ApiResponse, FetchError> {
        let url = self.url_for(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| FetchError::Connect(err.to_string()))?;
        let status = response.status().as_u16();
        if response.headers().contains_key(SET_COOKIE) {
            if let Some(path) = &self.cookie_file {
                self.persist_cookies(path);
            }
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchError::Body(err.to_string()))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            // plain-text error pages still carry a useful message
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok(ApiResponse { status, body })
    }
}
