//! Change detection for script sources.
//!
//! Watchers hand every raw notification to their callback. Bursts (editors
//! often write a file several times per save) are collapsed by the caller.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    error::Result,
    fetch::Fetcher,
    source::{SourceDescriptor, SourceResolver},
};

enum WatchPrimitive {
    #[cfg(feature = "watch")]
    Native(notify::RecommendedWatcher),
    Poll(JoinHandle<()>),
}

struct WatchInner {
    location: String,
    disposed: Arc<AtomicBool>,
    primitive: Mutex<Option<WatchPrimitive>>,
}

impl WatchInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.primitive.lock().take() {
            #[cfg(feature = "watch")]
            Some(WatchPrimitive::Native(watcher)) => drop(watcher),
            Some(WatchPrimitive::Poll(task)) => task.abort(),
            None => {}
        }
        debug!(location = %self.location, "Stopped watching script source");
    }
}

impl Drop for WatchInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Cancelable subscription on a source location.
///
/// Clones share the subscription; dropping the last clone disposes it.
#[derive(Clone)]
pub struct WatchHandle {
    inner: Arc<WatchInner>,
}

impl WatchHandle {
    fn new(location: String, disposed: Arc<AtomicBool>, primitive: WatchPrimitive) -> Self {
        Self {
            inner: Arc::new(WatchInner {
                location,
                disposed,
                primitive: Mutex::new(Some(primitive)),
            }),
        }
    }

    /// Stops delivery. Safe to call any number of times.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn location(&self) -> &str {
        &self.inner.location
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("location", &self.inner.location)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

pub struct ChangeWatcher {
    resolver: Arc<SourceResolver>,
    runtime: Handle,
    poll_interval: Duration,
}

impl ChangeWatcher {
    pub const fn new(resolver: Arc<SourceResolver>, runtime: Handle, poll_interval: Duration) -> Self {
        Self {
            resolver,
            runtime,
            poll_interval,
        }
    }

    /// Watches the filesystem location backing `descriptor`.
    ///
    /// Returns `Ok(None)` for kinds without a local backing file or when the
    /// resolved location is blank.
    ///
    /// # Errors
    /// Returns an error if the native watcher cannot be installed.
    pub fn watch<F>(&self, descriptor: &SourceDescriptor, on_change: F) -> Result<Option<WatchHandle>>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let Some(path) = self.resolver.watch_path(descriptor) else {
            return Ok(None);
        };
        watch_file(path, on_change)
    }

    /// Polls a dev-server URL and reports bodies that differ from the last one seen.
    pub fn watch_dev_server<F>(&self, url: String, initial: String, on_change: F) -> WatchHandle
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let disposed = Arc::new(AtomicBool::new(false));
        let task = self.runtime.spawn(poll_dev_server(
            Arc::clone(self.resolver.fetcher()),
            url.clone(),
            initial,
            self.poll_interval,
            Arc::clone(&disposed),
            on_change,
        ));
        info!(%url, "Polling dev server for changes");
        WatchHandle::new(url, disposed, WatchPrimitive::Poll(task))
    }
}

async fn poll_dev_server<F>(
    fetcher: Arc<dyn Fetcher>,
    url: String,
    mut last: String,
    period: Duration,
    disposed: Arc<AtomicBool>,
    on_change: F,
) where
    F: Fn(String) + Send + Sync + 'static,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        match fetcher.fetch_text(&url).await {
            Ok(text) if text != last => {
                if disposed.load(Ordering::Acquire) {
                    return;
                }
                last.clone_from(&text);
                on_change(text);
            }
            Ok(_) => {}
            Err(err) => debug!(%url, error = %err, "Dev server poll failed"),
        }
    }
}

#[cfg(feature = "watch")]
fn watch_file<F>(path: PathBuf, on_change: F) -> Result<Option<WatchHandle>>
where
    F: Fn(String) + Send + Sync + 'static,
{
    use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};

    let Some(file_name) = path.file_name().map(ToOwned::to_owned) else {
        return Ok(None);
    };
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let disposed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&disposed);
    let target = path.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    debug!(path = %target.display(), error = %err, "File watcher error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            if !event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(file_name.as_os_str()))
            {
                return;
            }
            if flag.load(Ordering::Acquire) {
                return;
            }
            match std::fs::read_to_string(&target) {
                Ok(text) => on_change(text),
                Err(err) => debug!(path = %target.display(), error = %err, "Changed file is not readable yet"),
            }
        },
        Config::default(),
    )?;
    watcher.watch(&directory, RecursiveMode::NonRecursive)?;

    info!(path = %path.display(), "Watching script source");
    Ok(Some(WatchHandle::new(
        path.display().to_string(),
        disposed,
        WatchPrimitive::Native(watcher),
    )))
}

#[cfg(not(feature = "watch"))]
#[allow(clippy::unnecessary_wraps)]
fn watch_file<F>(path: PathBuf, _on_change: F) -> Result<Option<WatchHandle>>
where
    F: Fn(String) + Send + Sync + 'static,
{
    debug!(path = %path.display(), "File watching is not compiled in");
    Ok(None)
}

/// Disposes and clears an optional handle.
pub fn dispose(handle: &mut Option<WatchHandle>) {
    if let Some(handle) = handle.take() {
        handle.dispose();
    }
}
