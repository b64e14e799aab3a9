use std::rc::Rc;

use rquickjs::{
    Ctx, FromJs, Function, Object, Value,
    convert::Coerced, function::Rest,
};
use tracing::{debug, error, info, warn};

use crate::TRACE_TARGET_SCRIPT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Info,
    Debug,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub const ALL: [Self; 5] = [Self::Log, Self::Info, Self::Debug, Self::Warn, Self::Error];

    pub const fn method(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Destination of guest `console.*` output.
pub trait ConsoleSink {
    fn write(&self, level: ConsoleLevel, message: &str);
}

/// Forwards guest output to `tracing` under [`TRACE_TARGET_SCRIPT`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl ConsoleSink for TracingConsole {
    fn write(&self, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::Log | ConsoleLevel::Info => {
                info!(target: TRACE_TARGET_SCRIPT, "{message}");
            }
            ConsoleLevel::Debug => debug!(target: TRACE_TARGET_SCRIPT, "{message}"),
            ConsoleLevel::Warn => warn!(target: TRACE_TARGET_SCRIPT, "{message}"),
            ConsoleLevel::Error => error!(target: TRACE_TARGET_SCRIPT, "{message}"),
        }
    }
}

/// Installs the global `console` object.
pub fn install<'js>(ctx: &Ctx<'js>, sink: &Rc<dyn ConsoleSink>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    for level in ConsoleLevel::ALL {
        let sink = Rc::clone(sink);
        console.set(
            level.method(),
            Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
                let message = args
                    .0
                    .into_iter()
                    .map(|arg| arg.0)
                    .collect::<Vec<_>>()
                    .join(" ");
                sink.write(level, &message);
            })?,
        )?;
    }
    ctx.globals().set("console", console)
}

/// Installs `log(x)`, which logs its argument and hands it back.
pub fn install_log<'js>(ctx: &Ctx<'js>, sink: &Rc<dyn ConsoleSink>) -> rquickjs::Result<()> {
    let sink = Rc::clone(sink);
    ctx.globals().set(
        "log",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, value: Value<'js>| {
            let text = Coerced::<String>::from_js(&ctx, value.clone())
                .map_or_else(|_| format!("{value:?}"), |text| text.0);
            sink.write(ConsoleLevel::Log, &text);
            value
        })?,
    )
}
