pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod scheduler;
pub mod source;
pub mod watch;

pub const TRACE_TARGET_SCRIPT: &str = "lumen::script";

pub use self::{
    bridge::{ConsoleLevel, ConsoleSink, Globals, HeadlessHost, Host, HostSurface},
    config::RuntimeConfig,
    controller::{Failure, Preload, ReadyHook, RuntimeBuilder, RuntimeController, RuntimeState},
    error::{Error, ErrorKind, Result},
    source::{DevServer, ResolvedSource, SourceDescriptor, SourceKind},
};
