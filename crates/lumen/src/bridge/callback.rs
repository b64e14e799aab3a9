//! Guest-side `Callback(fn)` wrapper for host-triggered events.

use rquickjs::{
    Class, Ctx, Function, JsLifetime, Value,
    class::{Trace, Tracer},
    function::Rest,
};
use tracing::debug;

use crate::dispatch::{Generation, GenerationCounter};

/// Guest function stamped with the generation that wrapped it. Calls made
/// after that generation was replaced do nothing and return `undefined`.
#[derive(JsLifetime)]
#[rquickjs::class]
pub struct GuestCallback<'js> {
    func: Function<'js>,
    generation: Generation,
    generations: GenerationCounter,
}

impl<'js> Trace<'js> for GuestCallback<'js> {
    fn trace<'a>(&self, tracer: Tracer<'a, 'js>) {
        self.func.trace(tracer);
    }
}

#[rquickjs::methods]
impl<'js> GuestCallback<'js> {
    #[qjs(get)]
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub fn call(&self, args: Rest<Value<'js>>) -> rquickjs::Result<Option<Value<'js>>> {
        if !self.generations.is_current(self.generation) {
            debug!(
                capsule = %self.generation,
                current = %self.generations.current(),
                "Ignoring guest callback from a superseded generation"
            );
            return Ok(None);
        }
        self.func.call((args,)).map(Some)
    }
}

/// Installs the global `Callback(fn)` factory bound to `generation`.
pub fn install<'js>(
    ctx: &Ctx<'js>,
    generations: &GenerationCounter,
    generation: Generation,
) -> rquickjs::Result<()> {
    let generations = generations.clone();
    ctx.globals().set(
        "Callback",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, func: Function<'js>| {
            Class::instance(
                ctx,
                GuestCallback {
                    func,
                    generation,
                    generations: generations.clone(),
                },
            )
        })?,
    )
}
