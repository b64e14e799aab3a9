//! Script source descriptors and their resolution to text.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    fetch::Fetcher,
};

/// Logical path reported for embedded assets that were not given one.
pub const DEFAULT_ASSET_PATH: &str = "assets/index.js";
pub const DEFAULT_DEV_SERVER: &str = "http://localhost:3000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    EmbeddedAsset,
    FilePath,
    Url,
    NamedResource,
    InlineText,
}

impl SourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddedAsset => "embedded-asset",
            Self::FilePath => "file-path",
            Self::Url => "url",
            Self::NamedResource => "named-resource",
            Self::InlineText => "inline-text",
        }
    }

    /// Kinds backed by something on the local filesystem.
    pub const fn is_watchable(self) -> bool {
        !matches!(self, Self::Url | Self::InlineText)
    }
}

/// Asset compiled into (or handed over by) the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedAsset {
    pub text: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevServer {
    pub enabled: bool,
    pub base_url: String,
    /// Suffix appended to `base_url` to form the entry URL.
    pub entry: String,
}

impl Default for DevServer {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_DEV_SERVER.to_string(),
            entry: String::new(),
        }
    }
}

impl DevServer {
    pub fn entry_url(&self) -> String {
        format!("{}{}", self.base_url, self.entry)
    }

    fn is_usable(&self) -> bool {
        self.enabled && !self.base_url.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub inline_text: Option<String>,
    #[serde(default)]
    pub asset: Option<EmbeddedAsset>,
    #[serde(default)]
    pub dev_server: Option<DevServer>,
    /// Reload when the backing file changes.
    #[serde(default)]
    pub watch: bool,
}

impl SourceDescriptor {
    fn new(kind: SourceKind, location: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            inline_text: None,
            asset: None,
            dev_server: None,
            watch: false,
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(SourceKind::FilePath, path)
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::new(SourceKind::Url, url)
    }

    pub fn resource(name: impl Into<String>) -> Self {
        Self::new(SourceKind::NamedResource, name)
    }

    pub fn inline(text: impl Into<String>) -> Self {
        Self {
            inline_text: Some(text.into()),
            ..Self::new(SourceKind::InlineText, "")
        }
    }

    pub fn embedded(text: impl Into<String>, path: Option<String>) -> Self {
        Self {
            asset: Some(EmbeddedAsset {
                text: text.into(),
                path,
            }),
            ..Self::new(SourceKind::EmbeddedAsset, "")
        }
    }

    #[must_use]
    pub fn with_dev_server(mut self, dev_server: DevServer) -> Self {
        self.dev_server = Some(dev_server);
        self
    }

    #[must_use]
    pub const fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Entry URL of the dev server when the override is enabled and usable.
    pub fn dev_server_url(&self) -> Option<String> {
        self.dev_server
            .as_ref()
            .filter(|d| d.is_usable())
            .map(DevServer::entry_url)
    }
}

/// Outcome of one resolve attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub text: String,
    pub is_from_dev_server: bool,
}

impl ResolvedSource {
    pub fn local(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_from_dev_server: false,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Named resources: entries registered by the host first, then files under `root`.
#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    entries: HashMap<String, String>,
    root: Option<PathBuf>,
}

impl ResourceStore {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            entries: HashMap::new(),
            root,
        }
    }

    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.entries.insert(name.into(), text.into());
        self
    }

    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        if self.entries.contains_key(name) {
            return None;
        }
        self.root.as_ref().map(|root| root.join(name))
    }

    fn load(&self, name: &str) -> Result<Option<String>> {
        if let Some(text) = self.entries.get(name) {
            return Ok(Some(text.clone()));
        }
        match self.path_of(name) {
            Some(path) => read_optional(&path),
            None => Ok(None),
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Pure location lookup used by watchers and the `location` bridge.
pub fn resolved_location(descriptor: &SourceDescriptor) -> String {
    match descriptor.kind {
        SourceKind::FilePath | SourceKind::Url | SourceKind::NamedResource => {
            descriptor.location.clone()
        }
        SourceKind::EmbeddedAsset => descriptor
            .asset
            .as_ref()
            .and_then(|a| a.path.clone())
            .unwrap_or_else(|| DEFAULT_ASSET_PATH.to_string()),
        SourceKind::InlineText => String::new(),
    }
}

pub struct SourceResolver {
    fetcher: Arc<dyn Fetcher>,
    resources: ResourceStore,
}

impl SourceResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, resources: ResourceStore) -> Self {
        Self { fetcher, resources }
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Whether resolving `descriptor` has to go through the network.
    pub fn needs_network(descriptor: &SourceDescriptor, prefer_dev_server: bool) -> bool {
        descriptor.kind == SourceKind::Url
            || (prefer_dev_server && descriptor.dev_server_url().is_some())
    }

    /// Filesystem path backing the descriptor, if any.
    pub fn watch_path(&self, descriptor: &SourceDescriptor) -> Option<PathBuf> {
        if !descriptor.kind.is_watchable() {
            return None;
        }
        let location = resolved_location(descriptor);
        if location.trim().is_empty() {
            return None;
        }
        match descriptor.kind {
            SourceKind::NamedResource => self.resources.path_of(&location),
            _ => Some(PathBuf::from(location)),
        }
    }

    /// Resolves `descriptor` to text. `Ok(None)` means the source does not exist.
    ///
    /// With `prefer_dev_server`, a usable dev-server override is tried first;
    /// when that fetch fails the non-dev-server path runs exactly once.
    ///
    /// # Errors
    /// Returns [`Error::Network`] when a `url` source cannot be fetched and
    /// [`Error::Io`] for unreadable files.
    pub async fn resolve(
        &self,
        descriptor: &SourceDescriptor,
        prefer_dev_server: bool,
    ) -> Result<Option<ResolvedSource>> {
        if prefer_dev_server && let Some(url) = descriptor.dev_server_url() {
            match self.fetcher.fetch_text(&url).await {
                Ok(text) => {
                    return Ok(Some(ResolvedSource {
                        text,
                        is_from_dev_server: true,
                    }));
                }
                Err(err) => {
                    warn!(%url, error = %err, "Dev server seems to be unreachable; falling back to the original script");
                }
            }
        }

        if descriptor.kind == SourceKind::Url {
            let text = self.fetcher.fetch_text(&descriptor.location).await?;
            return Ok(Some(ResolvedSource::local(text)));
        }
        self.resolve_local(descriptor)
    }

    /// Synchronous resolution for kinds that never touch the network.
    ///
    /// # Errors
    /// Returns [`Error::Io`] for unreadable files and [`Error::Network`] if
    /// called with a `url` descriptor.
    pub fn resolve_local(&self, descriptor: &SourceDescriptor) -> Result<Option<ResolvedSource>> {
        let text = match descriptor.kind {
            SourceKind::EmbeddedAsset => descriptor.asset.as_ref().map(|a| a.text.clone()),
            SourceKind::FilePath => read_optional(Path::new(&descriptor.location))?,
            SourceKind::NamedResource => self.resources.load(&descriptor.location)?,
            SourceKind::InlineText => descriptor.inline_text.clone(),
            SourceKind::Url => {
                return Err(Error::network(
                    descriptor.location.clone(),
                    "url sources must be resolved asynchronously",
                ));
            }
        };

        if text.is_none() {
            debug!(
                kind = descriptor.kind.as_str(),
                location = %descriptor.location,
                "Script source not found"
            );
        }
        Ok(text.map(ResolvedSource::local))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FailingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::network(url, "connection refused"))
        }
    }

    fn resolver() -> (SourceResolver, Arc<FailingFetcher>) {
        let fetcher = Arc::new(FailingFetcher {
            calls: AtomicUsize::new(0),
        });
        let resolver = SourceResolver::new(
            fetcher.clone(),
            ResourceStore::default().with_entry("react/index.js", "render();"),
        );
        (resolver, fetcher)
    }

    #[tokio::test]
    async fn inline_text_is_returned_verbatim() {
        let (resolver, _) = resolver();
        let text = "  let a = 1;\n\n";
        let resolved = resolver
            .resolve(&SourceDescriptor::inline(text), true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved, ResolvedSource::local(text));
    }

    #[tokio::test]
    async fn missing_file_is_not_an_error() {
        let (resolver, _) = resolver();
        let resolved = resolver
            .resolve(&SourceDescriptor::file("/definitely/not/here.js"), false)
            .await
            .unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn dev_server_failure_falls_back_once() {
        let (resolver, fetcher) = resolver();
        let descriptor = SourceDescriptor::resource("react/index.js").with_dev_server(DevServer {
            base_url: "http://127.0.0.1:9".into(),
            ..DevServer::default()
        });

        for round in 1..=3 {
            let resolved = resolver.resolve(&descriptor, true).await.unwrap().unwrap();
            assert_eq!(resolved, ResolvedSource::local("render();"));
            assert_eq!(fetcher.calls.load(Ordering::SeqCst), round);
        }
    }

    #[tokio::test]
    async fn url_failure_is_reported_as_network_error() {
        let (resolver, _) = resolver();
        let err = resolver
            .resolve(&SourceDescriptor::url("http://127.0.0.1:9/app.js"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
    }

    #[test]
    fn blank_dev_server_is_ignored() {
        let descriptor = SourceDescriptor::file("app.js").with_dev_server(DevServer {
            base_url: "  ".into(),
            ..DevServer::default()
        });
        assert_eq!(descriptor.dev_server_url(), None);
        assert!(!SourceResolver::needs_network(&descriptor, true));
    }

    #[test]
    fn resolved_location_per_kind() {
        assert_eq!(resolved_location(&SourceDescriptor::file("a/b.js")), "a/b.js");
        assert_eq!(
            resolved_location(&SourceDescriptor::url("http://x/app.js")),
            "http://x/app.js"
        );
        assert_eq!(
            resolved_location(&SourceDescriptor::embedded("x", None)),
            DEFAULT_ASSET_PATH
        );
        assert_eq!(
            resolved_location(&SourceDescriptor::embedded("x", Some("ui/main.js".into()))),
            "ui/main.js"
        );
        assert_eq!(resolved_location(&SourceDescriptor::inline("x")), "");
    }

    #[test]
    fn descriptor_deserializes_from_yaml() {
        let descriptor: SourceDescriptor = serde_yaml::from_str(
            "kind: file-path\nlocation: app.js\nwatch: true\ndev_server:\n  enabled: false\n",
        )
        .unwrap();
        assert_eq!(descriptor.kind, SourceKind::FilePath);
        assert!(descriptor.watch);
        let dev = descriptor.dev_server.unwrap();
        assert!(!dev.enabled);
        assert_eq!(dev.base_url, DEFAULT_DEV_SERVER);
    }
}
