//! Construction of a fully wired guest engine.

use std::{
    path::PathBuf,
    rc::Rc,
    time::{Duration, Instant},
};

use rquickjs::{
    Ctx, Function,
    convert::Coerced, function::Opt,
};
use tracing::{debug, info};

use crate::{
    bridge::{ConsoleSink, SharedStorage, callback, console, storage, types},
    config::RuntimeConfig,
    dispatch::{Generation, GenerationCounter},
    engine::{Callback, EngineLimits, EngineRegistry, GuestEngine, SharedScheduler},
    error::{Error, Result},
    scheduler::TimerId,
};

const SHIMS: &str = r"
__dirname = '';
if (typeof WeakMap === 'undefined') { WeakMap = Map; }
globalThis = global = window = parent = this;
setTimeout = setInterval = clearTimeout = clearInterval = null;
btoa = atob = null;
process = { env: { NODE_ENV: 'production' }, argv: [], on: function () {} };
";

const PROMISE_POLYFILL: &str = include_str!("polyfills/promise.js");
const BASE64_POLYFILL: &str = include_str!("polyfills/base64.js");

/// Browsers clamp larger delays the same way.
const MAX_DELAY_MS: f64 = 2_147_483_647.0;

pub struct EngineBootstrapper {
    registry: EngineRegistry,
    engine_name: String,
    limits: EngineLimits,
    console: Rc<dyn ConsoleSink>,
    storage: SharedStorage,
    generations: GenerationCounter,
    polyfills: Vec<PathBuf>,
}

impl EngineBootstrapper {
    pub fn new(
        config: &RuntimeConfig,
        registry: EngineRegistry,
        console: Rc<dyn ConsoleSink>,
        storage: SharedStorage,
        generations: GenerationCounter,
    ) -> Self {
        Self {
            registry,
            engine_name: config.engine.clone(),
            limits: EngineLimits {
                max_stack_size: config.max_stack_size,
                memory_limit: config.memory_limit,
            },
            console,
            storage,
            generations,
            polyfills: config.polyfills.clone(),
        }
    }

    /// Creates a fresh engine for `generation` with shims, the `Callback`
    /// factory, bridges, value types and polyfills installed, in that order.
    ///
    /// # Errors
    /// Every failure is reported as [`Error::HostBridge`] (or
    /// [`Error::UnknownEngine`]); the half-built engine is dropped.
    pub fn create_engine(&self, generation: Generation, now: Instant) -> Result<GuestEngine> {
        let (runtime, context) = self.registry.create(&self.engine_name, &self.limits)?;
        let engine = GuestEngine::new(generation, runtime, context, now);

        embed(&engine, "log", |ctx| console::install_log(ctx, &self.console))?;
        run(&engine, "shims", SHIMS, "shims.js")?;
        embed(&engine, "callback", |ctx| {
            callback::install(ctx, &self.generations, generation)
        })?;

        embed(&engine, "console", |ctx| console::install(ctx, &self.console))?;
        embed(&engine, "storage", |ctx| storage::install(ctx, &self.storage))?;
        let scheduler = Rc::clone(engine.scheduler());
        embed(&engine, "scheduler", |ctx| {
            install_scheduler(ctx, &scheduler, generation)
        })?;
        embed(&engine, "types", types::install)?;

        run(&engine, "polyfill", PROMISE_POLYFILL, "promise.js")?;
        run(&engine, "polyfill", BASE64_POLYFILL, "base64.js")?;
        for path in &self.polyfills {
            let code = std::fs::read_to_string(path)
                .map_err(|e| Error::bridge("polyfill", format!("{}: {e}", path.display())))?;
            run(&engine, "polyfill", &code, &path.display().to_string())?;
        }
        engine.run_jobs();

        info!(
            %generation,
            engine = %self.engine_name,
            extra_polyfills = self.polyfills.len(),
            "Guest engine ready"
        );
        Ok(engine)
    }
}

pub(crate) fn embed<F>(engine: &GuestEngine, stage: &'static str, install: F) -> Result<()>
where
    F: FnOnce(&Ctx<'_>) -> rquickjs::Result<()>,
{
    debug!(stage, "Embedding host bridge");
    engine.context().with(|ctx| {
        install(&ctx).map_err(|e| Error::bridge(stage, Error::from_js(&ctx, e)))
    })
}

fn run(engine: &GuestEngine, stage: &'static str, code: &str, name: &str) -> Result<()> {
    engine
        .execute(code, name)
        .map_err(|e| Error::bridge(stage, format!("{name}: {e}")))
}

fn delay_of(delay: Opt<Coerced<f64>>) -> Duration {
    let ms = delay.0.map_or(0.0, |d| d.0);
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms.min(MAX_DELAY_MS) / 1000.0)
    } else {
        Duration::ZERO
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn timer_id(id: Opt<Coerced<f64>>) -> Option<TimerId> {
    let raw = id.0?.0;
    (raw.is_finite() && raw >= 1.0 && raw <= f64::from(TimerId::MAX)).then(|| raw as TimerId)
}

/// Installs the timer globals. Every guest function is captured as a
/// [`Callback`] stamped with `generation`.
fn install_scheduler<'js>(
    ctx: &Ctx<'js>,
    scheduler: &SharedScheduler,
    generation: Generation,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let timers = Rc::clone(scheduler);
    globals.set(
        "setTimeout",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, f: Function<'js>, delay: Opt<Coerced<f64>>| {
                let callback = Callback::new(&ctx, f, generation);
                timers.borrow_mut().set_timeout(callback, delay_of(delay))
            },
        )?,
    )?;

    let timers = Rc::clone(scheduler);
    globals.set(
        "setInterval",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, f: Function<'js>, period: Opt<Coerced<f64>>| {
                let callback = Callback::new(&ctx, f, generation);
                timers.borrow_mut().set_interval(callback, delay_of(period))
            },
        )?,
    )?;

    let timers = Rc::clone(scheduler);
    globals.set(
        "setImmediate",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, f: Function<'js>| {
            let callback = Callback::new(&ctx, f, generation);
            timers.borrow_mut().set_immediate(callback)
        })?,
    )?;

    let timers = Rc::clone(scheduler);
    globals.set(
        "requestAnimationFrame",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, f: Function<'js>| {
            let callback = Callback::new(&ctx, f, generation);
            timers.borrow_mut().request_animation_frame(callback)
        })?,
    )?;

    let timers = Rc::clone(scheduler);
    globals.set(
        "clearTimeout",
        Function::new(ctx.clone(), move |id: Opt<Coerced<f64>>| {
            if let Some(id) = timer_id(id) {
                timers.borrow_mut().clear_timeout(id);
            }
        })?,
    )?;

    let timers = Rc::clone(scheduler);
    globals.set(
        "clearInterval",
        Function::new(ctx.clone(), move |id: Opt<Coerced<f64>>| {
            if let Some(id) = timer_id(id) {
                timers.borrow_mut().clear_interval(id);
            }
        })?,
    )?;

    let timers = Rc::clone(scheduler);
    globals.set(
        "clearImmediate",
        Function::new(ctx.clone(), move |id: Opt<Coerced<f64>>| {
            if let Some(id) = timer_id(id) {
                timers.borrow_mut().clear_immediate(id);
            }
        })?,
    )?;

    let timers = Rc::clone(scheduler);
    globals.set(
        "cancelAnimationFrame",
        Function::new(ctx.clone(), move |id: Opt<Coerced<f64>>| {
            if let Some(id) = timer_id(id) {
                timers.borrow_mut().cancel_animation_frame(id);
            }
        })?,
    )?;

    Ok(())
}
