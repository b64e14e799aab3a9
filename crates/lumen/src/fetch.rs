use std::time::Duration;

use crate::error::{Error, Result};

const USER_AGENT: &str = "Lumen/1.0";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Network seam used for dev-server and URL sources.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// GETs `url` and returns the body as text.
    ///
    /// Transport failures and non-success statuses are both reported as
    /// [`Error::Network`].
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct FetchConfig {
    pub proxy: Option<String>,
    pub timeout: Option<Duration>,
}

impl FetchConfig {
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// # Errors
    /// Returns an error if the proxy URL is invalid or the TLS backend fails to initialise.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT));
        if let Some(proxy_str) = &self.proxy {
            let proxy =
                reqwest::Proxy::all(proxy_str).map_err(|e| Error::Config(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(|e| Error::Config(e.to_string()))
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// # Errors
    /// See [`FetchConfig::build_client`].
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: config.build_client()?,
        })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::network(url, e))?;
        response.text().await.map_err(|e| Error::network(url, e))
    }
}
