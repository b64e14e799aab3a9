//! Host capabilities exposed to guest code.

pub mod callback;
pub mod console;
pub mod location;
pub mod storage;
pub mod types;

use std::{cell::RefCell, rc::Rc};

use rquickjs::{Ctx, Function, Object, convert::Coerced};
use serde_json::{Map, Value as JsonValue};
use tracing::trace;

pub use self::{
    callback::GuestCallback,
    console::{ConsoleLevel, ConsoleSink, TracingConsole},
    location::Location,
    storage::{LocalStorage, SharedStorage},
};
use crate::{
    dispatch::Generation,
    engine::{Callback, ReadyCallback},
};

/// What a [`Host`] gets to know about the generation it is installing into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSurface {
    pub generation: Generation,
    pub origin: String,
    pub is_from_dev_server: bool,
}

/// The embedding application: owner of the UI tree and of the guest-facing
/// host API.
pub trait Host {
    /// Tears down everything the previous generation rendered.
    fn clear_tree(&self);

    /// Installs the document/root objects and the host API namespace.
    ///
    /// # Errors
    /// Any error aborts the generation as a bridging failure.
    fn install(&self, ctx: &Ctx<'_>, surface: &HostSurface) -> rquickjs::Result<()>;
}

/// Host without a UI: a bare `document` and `RootContainer`, plus a `Lumen`
/// namespace describing the runtime.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    cleared: RefCell<usize>,
}

impl HeadlessHost {
    /// Number of times the tree has been cleared.
    pub fn clear_count(&self) -> usize {
        *self.cleared.borrow()
    }
}

impl Host for HeadlessHost {
    fn clear_tree(&self) {
        *self.cleared.borrow_mut() += 1;
    }

    fn install(&self, ctx: &Ctx<'_>, surface: &HostSurface) -> rquickjs::Result<()> {
        let globals = ctx.globals();

        let root = Object::new(ctx.clone())?;
        root.set("children", rquickjs::Array::new(ctx.clone())?)?;
        globals.set("RootContainer", root.clone())?;

        let document = Object::new(ctx.clone())?;
        document.set("origin", surface.origin.as_str())?;
        document.set("body", root)?;
        globals.set("document", document)?;

        let namespace = Object::new(ctx.clone())?;
        namespace.set("version", env!("CARGO_PKG_VERSION"))?;
        namespace.set("generation", surface.generation.get())?;
        namespace.set("isDevServer", surface.is_from_dev_server)?;
        globals.set("Lumen", namespace)
    }
}

/// Values the embedder passes through to guest code as the `Globals` object.
pub type Globals = Map<String, JsonValue>;

pub fn install_globals(ctx: &Ctx<'_>, globals: &Globals) -> rquickjs::Result<()> {
    let json = serde_json::to_string(globals)
        .map_err(|e| rquickjs::Error::new_from_js_message("Globals", "object", e.to_string()))?;
    let value = ctx.json_parse(json)?;
    ctx.globals().set("Globals", value)
}

/// Installs `addEventListener`. Only `DOMContentLoaded` is collected; other
/// events are accepted and ignored.
pub fn install_event_listener<'js>(
    ctx: &Ctx<'js>,
    ready: &Rc<RefCell<Vec<ReadyCallback>>>,
    generation: Generation,
) -> rquickjs::Result<()> {
    let ready = Rc::clone(ready);
    ctx.globals().set(
        "addEventListener",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, event: Coerced<String>, listener: Function<'js>| {
                if event.0 == "DOMContentLoaded" {
                    ready
                        .borrow_mut()
                        .push(ReadyCallback::Guest(Callback::new(&ctx, listener, generation)));
                } else {
                    trace!(event = %event.0, "Ignoring listener for unsupported event");
                }
            },
        )?,
    )
}

#[cfg(test)]
mod tests {
    use rquickjs::{Context, Runtime};

    use super::*;
    use crate::dispatch::GenerationCounter;

    #[test]
    fn globals_are_passed_through_as_plain_values() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let mut globals = Globals::new();
        globals.insert("theme".into(), JsonValue::from("dark"));
        globals.insert("scale".into(), JsonValue::from(2));

        let text: String = context.with(|ctx| {
            install_globals(&ctx, &globals).unwrap();
            ctx.eval("Globals.theme + ':' + Globals.scale").unwrap()
        });
        assert_eq!(text, "dark:2");
    }

    #[test]
    fn only_dom_content_loaded_is_collected() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let ready = Rc::new(RefCell::new(Vec::new()));
        let generation = GenerationCounter::default().advance();

        context.with(|ctx| {
            install_event_listener(&ctx, &ready, generation).unwrap();
            ctx.eval::<(), _>(
                "addEventListener('DOMContentLoaded', function () {});\
                 addEventListener('resize', function () {});",
            )
            .unwrap();
        });
        assert_eq!(ready.borrow().len(), 1);
        ready.borrow_mut().clear();
    }

    #[test]
    fn headless_host_installs_document() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let host = HeadlessHost::default();
        let surface = HostSurface {
            generation: GenerationCounter::default().advance(),
            origin: "http://localhost:3000".into(),
            is_from_dev_server: true,
        };

        let origin: String = context.with(|ctx| {
            host.install(&ctx, &surface).unwrap();
            ctx.eval("Lumen.isDevServer && document.body === RootContainer ? document.origin : ''")
                .unwrap()
        });
        assert_eq!(origin, "http://localhost:3000");
        host.clear_tree();
        assert_eq!(host.clear_count(), 1);
    }
}
