//! Lifecycle of the embedded runtime.
//!
//! Every start, reload and debounced change produces a new [`Generation`]:
//! the previous engine, its timers, its watch subscription and the host UI
//! tree are torn down before anything of the new one is created.

use std::{cell::RefCell, fmt, rc::Rc, sync::Arc, time::Instant};

use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::{
    bootstrap::{EngineBootstrapper, embed},
    bridge::{
        ConsoleSink, Globals, Host, HostSurface, LocalStorage, Location, TracingConsole,
        install_event_listener, install_globals, location,
    },
    config::RuntimeConfig,
    dispatch::{Debounce, DispatchQueue, Dispatcher, Generation, HostEvent},
    engine::{EngineRegistry, GuestEngine, ReadyCallback, SharedScheduler},
    error::{Error, ErrorKind, Result},
    fetch::{Fetcher, HttpFetcher},
    source::{ResolvedSource, ResourceStore, SourceDescriptor, SourceResolver, resolved_location},
    watch::{self, ChangeWatcher, WatchHandle},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Idle,
    Starting,
    Running,
    Reloading,
    Stopped,
    /// The last generation failed. `start` and `reload` are still accepted.
    Failed,
}

/// Script executed before the main script, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preload {
    pub name: String,
    pub text: String,
}

impl Preload {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::new(
            path.display().to_string(),
            std::fs::read_to_string(path)?,
        ))
    }
}

/// Host callback invoked after the main script, before guest
/// `DOMContentLoaded` listeners.
pub type ReadyHook = Rc<dyn Fn()>;

/// Summary of the last failed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub generation: Generation,
    pub kind: ErrorKind,
    pub message: String,
}

struct Session {
    descriptor: SourceDescriptor,
    preload: Rc<[Preload]>,
    ready: Option<ReadyHook>,
    /// Cleared for the rest of the generation once the dev server failed.
    /// Every start and reload tries the dev server again.
    prefer_dev_server: bool,
}

#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    resources: Option<ResourceStore>,
    console: Option<Rc<dyn ConsoleSink>>,
    registry: EngineRegistry,
    runtime: Option<Handle>,
    globals: Globals,
}

impl RuntimeBuilder {
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default `reqwest`-based fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Named resources. Defaults to files under `resources_dir`.
    #[must_use]
    pub fn resources(mut self, resources: ResourceStore) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Destination of guest console output. Defaults to [`TracingConsole`].
    #[must_use]
    pub fn console(mut self, console: Rc<dyn ConsoleSink>) -> Self {
        self.console = Some(console);
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: EngineRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Runtime for background fetches and dev-server polling. Defaults to the
    /// ambient tokio runtime.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn globals(mut self, globals: Globals) -> Self {
        self.globals = globals;
        self
    }

    /// # Errors
    /// Returns an error if no tokio runtime is available, the HTTP client
    /// cannot be built or the storage file is unreadable.
    pub fn build<H: Host>(self, host: H) -> Result<RuntimeController<H>> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| Error::Config(format!("no tokio runtime available: {e}")))?,
        };
        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(&self.config.fetch())?),
        };
        let resources = self
            .resources
            .unwrap_or_else(|| ResourceStore::new(self.config.resources_dir.clone()));
        let storage = match &self.config.storage_path {
            Some(path) => LocalStorage::open(path)?,
            None => LocalStorage::in_memory(),
        };
        let console = self
            .console
            .unwrap_or_else(|| Rc::new(TracingConsole) as Rc<dyn ConsoleSink>);

        let resolver = Arc::new(SourceResolver::new(fetcher, resources));
        let watcher = ChangeWatcher::new(
            Arc::clone(&resolver),
            runtime.clone(),
            self.config.dev_server_poll(),
        );
        let (dispatcher, queue) = DispatchQueue::new();
        let bootstrapper = EngineBootstrapper::new(
            &self.config,
            self.registry,
            console,
            Rc::new(RefCell::new(storage)),
            dispatcher.generations().clone(),
        );
        let generation = dispatcher.generations().current();

        Ok(RuntimeController {
            debounce: Debounce::new(self.config.debounce()),
            config: self.config,
            host,
            resolver,
            watcher,
            bootstrapper,
            dispatcher,
            queue,
            runtime,
            globals: self.globals,
            state: RuntimeState::Idle,
            session: None,
            generation,
            engine: None,
            watch: None,
            last_error: None,
        })
    }
}

/// Top-level orchestrator. Lives on the host main thread.
pub struct RuntimeController<H: Host> {
    config: RuntimeConfig,
    host: H,
    resolver: Arc<SourceResolver>,
    watcher: ChangeWatcher,
    bootstrapper: EngineBootstrapper,
    dispatcher: Dispatcher,
    queue: DispatchQueue,
    runtime: Handle,
    globals: Globals,
    state: RuntimeState,
    session: Option<Session>,
    generation: Generation,
    engine: Option<GuestEngine>,
    watch: Option<WatchHandle>,
    debounce: Debounce<ResolvedSource>,
    last_error: Option<Failure>,
}

impl RuntimeController<crate::bridge::HeadlessHost> {
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }
}

impl<H: Host> RuntimeController<H> {
    /// Starts a new session for `descriptor`, replacing whatever ran before.
    ///
    /// Returns once the source is resolved and executed, or, for network
    /// sources, once the fetch is underway; [`tick`](Self::tick) completes
    /// those.
    ///
    /// # Errors
    /// Only host bridging failures are returned. Missing sources abort
    /// silently; script errors are logged and leave the state `Failed`.
    pub fn start(
        &mut self,
        descriptor: SourceDescriptor,
        preload: Vec<Preload>,
        ready: Option<ReadyHook>,
    ) -> Result<()> {
        info!(
            kind = descriptor.kind.as_str(),
            location = %resolved_location(&descriptor),
            preload = preload.len(),
            "Starting script runtime"
        );
        self.session = Some(Session {
            descriptor,
            preload: preload.into(),
            ready,
            prefer_dev_server: true,
        });
        self.begin(None)
    }

    /// Restarts the current session, resolving the source again with the
    /// dev server preferred.
    ///
    /// # Errors
    /// See [`start`](Self::start).
    pub fn reload(&mut self) -> Result<()> {
        let Some(session) = &mut self.session else {
            debug!("Reload requested without a session");
            return Ok(());
        };
        session.prefer_dev_server = true;
        info!(generation = %self.generation, "Reloading script runtime");
        self.state = RuntimeState::Reloading;
        self.begin(None)
    }

    /// Tears everything down. Pending background work is discarded.
    pub fn stop(&mut self) {
        self.teardown();
        self.generation = self.dispatcher.generations().advance();
        self.session = None;
        self.state = RuntimeState::Stopped;
        info!(generation = %self.generation, "Script runtime stopped");
    }

    /// One host frame: drains main-thread events, fires a due debounced
    /// reload, then runs timers, animation frames and promise jobs.
    ///
    /// # Errors
    /// Only host bridging failures of a restart triggered here are returned.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        for (generation, event) in self.queue.drain() {
            if !self.dispatcher.generations().is_current(generation) {
                continue;
            }
            match event {
                HostEvent::Resolved(result) => self.on_resolved(result)?,
                HostEvent::Changed(source) => {
                    debug!(generation = %self.generation, "Script source changed");
                    self.debounce.schedule(now, source);
                }
                HostEvent::Reload => self.reload()?,
            }
        }

        if let Some(source) = self.debounce.take_due(now) {
            info!(generation = %self.generation, "Restarting after source change");
            self.state = RuntimeState::Reloading;
            self.begin(Some(source))?;
        }

        if let Some(engine) = &self.engine {
            engine.run_frame(now);
        }
        Ok(())
    }

    /// Runs extra code in the current engine.
    ///
    /// Returns `Ok(false)` when no engine is running.
    ///
    /// # Errors
    /// Returns the guest parse or runtime error.
    pub fn execute(&self, code: &str) -> Result<bool> {
        let Some(engine) = &self.engine else {
            return Ok(false);
        };
        engine.execute(code, "<execute>")?;
        engine.run_jobs();
        Ok(true)
    }

    pub const fn state(&self) -> RuntimeState {
        self.state
    }

    pub const fn generation(&self) -> Generation {
        self.generation
    }

    pub const fn last_error(&self) -> Option<&Failure> {
        self.last_error.as_ref()
    }

    pub const fn watch_handle(&self) -> Option<&WatchHandle> {
        self.watch.as_ref()
    }

    pub fn active_timer_count(&self) -> usize {
        self.engine.as_ref().map_or(0, GuestEngine::active_timers)
    }

    /// Scheduler of the current engine.
    pub fn scheduler(&self) -> Option<SharedScheduler> {
        self.engine.as_ref().map(|engine| Rc::clone(engine.scheduler()))
    }

    pub const fn engine(&self) -> Option<&GuestEngine> {
        self.engine.as_ref()
    }

    /// Sending half of the main-thread queue, for embedder-side producers.
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub const fn host(&self) -> &H {
        &self.host
    }

    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Whether the session still tries the dev server first.
    pub fn prefers_dev_server(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.prefer_dev_server)
    }

    fn teardown(&mut self) {
        watch::dispose(&mut self.watch);
        if let Some(engine) = self.engine.take() {
            engine.scheduler().borrow_mut().clear_all();
            self.host.clear_tree();
            debug!(generation = %engine.generation(), "Discarded guest engine");
        }
        self.debounce.cancel();
    }

    fn begin(&mut self, delivered: Option<ResolvedSource>) -> Result<()> {
        self.teardown();
        self.generation = self.dispatcher.generations().advance();
        self.state = RuntimeState::Starting;

        if let Some(source) = delivered {
            // debounced changes carry their text; only the watch is renewed
            self.attach_watch(Some(&source));
            if source.is_blank() {
                debug!(generation = %self.generation, "Changed script is blank");
                self.state = RuntimeState::Idle;
                return Ok(());
            }
            return self.launch(source);
        }

        let Some(session) = &self.session else {
            return Ok(());
        };
        let prefer_dev_server = session.prefer_dev_server;
        if SourceResolver::needs_network(&session.descriptor, prefer_dev_server) {
            let resolver = Arc::clone(&self.resolver);
            let descriptor = session.descriptor.clone();
            let dispatcher = self.dispatcher.clone();
            let generation = self.generation;
            self.runtime.spawn(async move {
                let result = resolver.resolve(&descriptor, prefer_dev_server).await;
                dispatcher.post(generation, HostEvent::Resolved(result));
            });
            debug!(generation = %self.generation, "Resolving script source in the background");
            return Ok(());
        }

        let result = self.resolver.resolve_local(&session.descriptor);
        self.on_resolved(result)
    }

    fn on_resolved(&mut self, result: Result<Option<ResolvedSource>>) -> Result<()> {
        let Some(session) = &mut self.session else {
            return Ok(());
        };
        let from_dev_server = matches!(&result, Ok(Some(source)) if source.is_from_dev_server);
        if session.prefer_dev_server
            && session.descriptor.dev_server_url().is_some()
            && !from_dev_server
        {
            info!("Dev server unavailable; using the original script until the next reload");
            session.prefer_dev_server = false;
        }

        match result {
            Ok(source) => {
                self.attach_watch(source.as_ref());
                match source {
                    Some(source) if !source.is_blank() => self.launch(source),
                    _ => {
                        debug!(generation = %self.generation, "No script to run");
                        self.state = RuntimeState::Idle;
                        Ok(())
                    }
                }
            }
            Err(err) => {
                self.record_failure(&err, "Failed to resolve script source");
                Ok(())
            }
        }
    }

    fn attach_watch(&mut self, source: Option<&ResolvedSource>) {
        let Some(session) = &self.session else {
            return;
        };
        let generation = self.generation;
        let dispatcher = self.dispatcher.clone();

        if let Some(source) = source.filter(|s| s.is_from_dev_server) {
            if let Some(url) = session.descriptor.dev_server_url() {
                let handle = self.watcher.watch_dev_server(url, source.text.clone(), move |text| {
                    dispatcher.post(
                        generation,
                        HostEvent::Changed(ResolvedSource {
                            text,
                            is_from_dev_server: true,
                        }),
                    );
                });
                self.watch = Some(handle);
            }
            return;
        }

        if !(session.descriptor.watch && self.config.watch) {
            return;
        }
        match self.watcher.watch(&session.descriptor, move |text| {
            dispatcher.post(generation, HostEvent::Changed(ResolvedSource::local(text)));
        }) {
            Ok(handle) => self.watch = handle,
            Err(err) => warn!(error = %err, "Failed to watch script source; live reload disabled"),
        }
    }

    fn launch(&mut self, source: ResolvedSource) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let generation = self.generation;
        let href = if source.is_from_dev_server {
            session.descriptor.dev_server_url().unwrap_or_default()
        } else {
            resolved_location(&session.descriptor)
        };
        let script_name = if href.is_empty() {
            "main.js".to_string()
        } else {
            href.clone()
        };
        let preload = Rc::clone(&session.preload);
        let ready = session.ready.clone();

        let engine = match self.create_engine(generation, &href, source.is_from_dev_server) {
            Ok(engine) => engine,
            Err(err) => {
                self.record_failure(&err, "Failed to bootstrap guest engine");
                return Err(err);
            }
        };
        if let Some(ready) = ready {
            engine
                .ready_callbacks()
                .borrow_mut()
                .insert(0, ReadyCallback::Host(ready));
        }

        let outcome = preload
            .iter()
            .try_for_each(|script| {
                engine.execute(&script.text, &script.name)?;
                engine.run_jobs();
                Ok::<_, Error>(())
            })
            .and_then(|()| engine.execute(&source.text, &script_name));
        engine.run_jobs();

        match outcome {
            Ok(()) => {
                engine.run_ready_callbacks();
                self.state = RuntimeState::Running;
                self.last_error = None;
                info!(
                    %generation,
                    script = %script_name,
                    dev_server = source.is_from_dev_server,
                    "Script runtime running"
                );
            }
            Err(err) => self.record_failure(&err, "Guest script failed"),
        }
        self.engine = Some(engine);
        Ok(())
    }

    fn create_engine(
        &self,
        generation: Generation,
        href: &str,
        is_from_dev_server: bool,
    ) -> Result<GuestEngine> {
        let engine = self.bootstrapper.create_engine(generation, Instant::now())?;
        let location = Location::parse(href);
        let surface = HostSurface {
            generation,
            origin: location.origin.clone(),
            is_from_dev_server,
        };

        embed(&engine, "location", |ctx| {
            location::install(ctx, &location, &self.dispatcher, generation)
        })?;
        let ready = Rc::clone(engine.ready_callbacks());
        embed(&engine, "events", |ctx| {
            install_event_listener(ctx, &ready, generation)
        })?;
        embed(&engine, "host", |ctx| self.host.install(ctx, &surface))?;
        embed(&engine, "globals", |ctx| install_globals(ctx, &self.globals))?;
        Ok(engine)
    }

    fn record_failure(&mut self, err: &Error, context: &'static str) {
        match err {
            Error::Parse {
                position: Some(position),
                ..
            } => error!(
                kind = %err.kind(),
                line = position.line,
                column = position.column,
                error = %err,
                "{context}"
            ),
            Error::GuestRuntime {
                stack: Some(stack), ..
            } => error!(kind = %err.kind(), error = %err, %stack, "{context}"),
            _ => error!(kind = %err.kind(), error = %err, "{context}"),
        }
        self.state = RuntimeState::Failed;
        self.last_error = Some(Failure {
            generation: self.generation,
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

impl<H: Host> Drop for RuntimeController<H> {
    fn drop(&mut self) {
        self.teardown();
        self.dispatcher.generations().advance();
    }
}

impl<H: Host> fmt::Debug for RuntimeController<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeController")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("engine", &self.engine)
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}
