use std::fmt;

use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Coarse category used for diagnostics and propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Parse,
    GuestRuntime,
    HostBridge,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parse => "parse",
            Self::GuestRuntime => "guest_runtime",
            Self::HostBridge => "host_bridge",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line/column pair reported by the guest engine, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} column {}", self.line, self.column)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Dev-server or URL fetch failed.
    #[error("network error: {url}: {message}")]
    Network { url: String, message: String },

    /// Guest syntax error.
    #[error("parse error{}: {message}", position.map(|p| format!(" at {p}")).unwrap_or_default())]
    Parse {
        message: String,
        position: Option<SourcePosition>,
    },

    /// Uncaught guest exception.
    #[error("JS error: {message}")]
    GuestRuntime {
        message: String,
        stack: Option<String>,
    },

    /// Embedding a host object/type or running a shim/polyfill failed.
    #[error("host bridge error during {stage}: {message}")]
    HostBridge {
        stage: &'static str,
        message: String,
    },

    #[error("unknown engine backend: {0}")]
    UnknownEngine(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[cfg(feature = "watch")]
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::GuestRuntime { .. } => ErrorKind::GuestRuntime,
            Self::HostBridge { .. } | Self::UnknownEngine(_) => ErrorKind::HostBridge,
            Self::Config(_) | Self::Io(_) => ErrorKind::Internal,
            #[cfg(feature = "watch")]
            Self::Watch(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error must escape the script-execution boundary.
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::HostBridge)
    }

    pub(crate) fn network(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn bridge(stage: &'static str, err: impl fmt::Display) -> Self {
        Self::HostBridge {
            stage,
            message: err.to_string(),
        }
    }

    /// Converts the pending guest exception into an error.
    ///
    /// Must be called right after an `rquickjs::Error::Exception` surfaced,
    /// while the exception is still pending on the context.
    pub fn from_js_catch(ctx: &rquickjs::Ctx<'_>) -> Self {
        let caught = ctx.catch();
        let Some(exc) = caught.as_exception() else {
            return Self::GuestRuntime {
                message: format!("uncaught value: {caught:?}"),
                stack: None,
            };
        };

        let message = exc.message().unwrap_or_default();
        let stack = exc.stack();
        let name: Option<String> = exc.get("name").ok().flatten();
        if name.as_deref() == Some("SyntaxError") {
            let line: Option<u32> = exc.get("lineNumber").ok().flatten();
            let column: Option<u32> = exc.get("columnNumber").ok().flatten();
            let position = match (line, column) {
                (Some(line), Some(column)) => Some(SourcePosition { line, column }),
                _ => stack.as_deref().and_then(position_from_stack),
            };
            return Self::Parse { message, position };
        }

        Self::GuestRuntime { message, stack }
    }

    /// Maps any `rquickjs` failure, pulling the pending exception when there is one.
    pub fn from_js(ctx: &rquickjs::Ctx<'_>, err: rquickjs::Error) -> Self {
        if err.is_exception() {
            Self::from_js_catch(ctx)
        } else {
            Self::GuestRuntime {
                message: err.to_string(),
                stack: None,
            }
        }
    }
}

/// Extracts the first `file:line:column` frame of a QuickJS stack trace.
fn position_from_stack(stack: &str) -> Option<SourcePosition> {
    stack.lines().find_map(|frame| {
        let frame = frame.trim().strip_prefix("at ")?;
        let location = frame
            .rsplit_once('(')
            .map_or(frame, |(_, rest)| rest.trim_end_matches(')'));
        let mut parts = location.rsplitn(3, ':');
        let column = parts.next()?.parse().ok()?;
        let line = parts.next()?.parse().ok()?;
        Some(SourcePosition { line, column })
    })
}
