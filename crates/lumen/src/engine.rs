use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::Rc,
    time::Instant,
};

use rquickjs::{Context, Ctx, Function, Persistent, Runtime, context::EvalOptions};
use tracing::{debug, warn};

use crate::{
    TRACE_TARGET_SCRIPT,
    dispatch::Generation,
    error::{Error, Result},
    scheduler::Scheduler,
};

/// Resource limits applied to a freshly created engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_stack_size: usize,
    pub memory_limit: Option<usize>,
}

pub type EngineFactory = fn(&EngineLimits) -> rquickjs::Result<(Runtime, Context)>;

/// Named engine backends. The runtime only ever asks for one by name.
#[derive(Clone)]
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("quickjs", quickjs);
        registry
    }
}

impl EngineRegistry {
    pub fn register(&mut self, name: impl Into<String>, factory: EngineFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// # Errors
    /// [`Error::UnknownEngine`] for unregistered names and
    /// [`Error::HostBridge`] if the backend fails to initialise.
    pub fn create(&self, name: &str, limits: &EngineLimits) -> Result<(Runtime, Context)> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownEngine(name.to_string()))?;
        factory(limits).map_err(|e| Error::bridge("engine", e))
    }
}

fn quickjs(limits: &EngineLimits) -> rquickjs::Result<(Runtime, Context)> {
    let runtime = Runtime::new()?;
    runtime.set_max_stack_size(limits.max_stack_size);
    if let Some(limit) = limits.memory_limit {
        runtime.set_memory_limit(limit);
    }
    let context = Context::full(&runtime)?;
    Ok((runtime, context))
}

/// Guest scripts are classic sloppy-mode scripts evaluated in global scope.
pub(crate) fn script_options() -> EvalOptions {
    let mut options = EvalOptions::default();
    options.global = true;
    options.strict = false;
    options
}

/// Guest function kept alive outside the engine, stamped with the generation
/// that created it.
#[derive(Clone)]
pub struct Callback {
    generation: Generation,
    func: Persistent<Function<'static>>,
}

impl Callback {
    pub fn new<'js>(ctx: &Ctx<'js>, func: Function<'js>, generation: Generation) -> Self {
        Self {
            generation,
            func: Persistent::save(ctx, func),
        }
    }

    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Calls the guest function. A capsule from another generation is a no-op.
    ///
    /// # Errors
    /// Returns the guest exception thrown by the callback.
    pub fn invoke(&self, ctx: &Ctx<'_>, current: Generation) -> Result<()> {
        if self.generation != current {
            debug!(
                capsule = %self.generation,
                %current,
                "Ignoring callback from a superseded generation"
            );
            return Ok(());
        }
        let func = self
            .func
            .clone()
            .restore(ctx)
            .map_err(|e| Error::from_js(ctx, e))?;
        func.call::<_, ()>(()).map_err(|e| Error::from_js(ctx, e))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Entry of the `DOMContentLoaded` collector.
#[derive(Clone)]
pub enum ReadyCallback {
    Host(Rc<dyn Fn()>),
    Guest(Callback),
}

pub type SharedScheduler = Rc<RefCell<Scheduler<Callback>>>;

/// One guest execution context plus everything embedded into it.
pub struct GuestEngine {
    generation: Generation,
    scheduler: SharedScheduler,
    ready: Rc<RefCell<Vec<ReadyCallback>>>,
    context: Context,
    runtime: Runtime,
}

impl GuestEngine {
    pub(crate) fn new(
        generation: Generation,
        runtime: Runtime,
        context: Context,
        now: Instant,
    ) -> Self {
        Self {
            generation,
            scheduler: Rc::new(RefCell::new(Scheduler::new(now))),
            ready: Rc::new(RefCell::new(Vec::new())),
            context,
            runtime,
        }
    }

    pub const fn generation(&self) -> Generation {
        self.generation
    }

    pub const fn context(&self) -> &Context {
        &self.context
    }

    pub const fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub(crate) const fn ready_callbacks(&self) -> &Rc<RefCell<Vec<ReadyCallback>>> {
        &self.ready
    }

    pub fn active_timers(&self) -> usize {
        self.scheduler.borrow().active_count()
    }

    /// Evaluates `code` as a global script.
    ///
    /// # Errors
    /// [`Error::Parse`] for syntax errors, [`Error::GuestRuntime`] for
    /// uncaught exceptions.
    pub fn execute(&self, code: &str, name: &str) -> Result<()> {
        debug!(generation = %self.generation, script = name, bytes = code.len(), "Executing script");
        self.context.with(|ctx| {
            ctx.eval_with_options::<(), _>(code, script_options())
                .map_err(|e| Error::from_js(&ctx, e))
        })
    }

    /// Drains the promise job queue. Job exceptions are logged, not propagated.
    pub fn run_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    let err = self.context.with(|ctx| Error::from_js_catch(&ctx));
                    warn!(
                        target: TRACE_TARGET_SCRIPT,
                        kind = %err.kind(),
                        error = %err,
                        "Unhandled exception in promise job"
                    );
                }
            }
        }
    }

    fn invoke(&self, callback: &Callback) {
        let result = self
            .context
            .with(|ctx| callback.invoke(&ctx, self.generation));
        if let Err(err) = result {
            warn!(
                target: TRACE_TARGET_SCRIPT,
                kind = %err.kind(),
                error = %err,
                "Uncaught exception in scheduled callback"
            );
        }
    }

    /// Runs every timer and animation frame due at `now`, then pending jobs.
    pub fn run_frame(&self, now: Instant) {
        let due = {
            let mut scheduler = self.scheduler.borrow_mut();
            scheduler.advance(now);
            scheduler.due()
        };
        for id in due {
            // the borrow must end before the guest runs; callbacks schedule timers
            let callback = self.scheduler.borrow_mut().take(id);
            if let Some(callback) = callback {
                self.invoke(&callback);
            }
        }
        self.run_jobs();
    }

    /// Invokes the collected ready callbacks in registration order.
    pub fn run_ready_callbacks(&self) {
        let callbacks: Vec<ReadyCallback> = self.ready.borrow().clone();
        for callback in callbacks {
            match callback {
                ReadyCallback::Host(f) => f(),
                ReadyCallback::Guest(callback) => self.invoke(&callback),
            }
        }
        self.run_jobs();
    }
}

impl Drop for GuestEngine {
    fn drop(&mut self) {
        // persisted guest values must be released before the runtime is freed
        self.scheduler.borrow_mut().clear_all();
        self.ready.borrow_mut().clear();
    }
}

impl fmt::Debug for GuestEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestEngine")
            .field("generation", &self.generation)
            .field("active_timers", &self.active_timers())
            .finish_non_exhaustive()
    }
}
