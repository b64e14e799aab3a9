use rquickjs::{Ctx, Function, Object};
use url::Url;

use crate::dispatch::{Dispatcher, Generation, HostEvent};

/// Browser-style view of the script's source location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub href: String,
    pub protocol: String,
    pub hostname: String,
    pub origin: String,
    pub host: String,
    pub port: String,
    pub search: String,
    pub pathname: String,
}

impl Location {
    /// Absolute URLs are split into their components. Anything else (a file
    /// path, a resource name) is reported as a bare pathname.
    pub fn parse(href: &str) -> Self {
        let Ok(url) = Url::parse(href) else {
            return Self {
                href: href.to_string(),
                pathname: href.to_string(),
                ..Self::default()
            };
        };
        if url.cannot_be_a_base() {
            return Self {
                href: href.to_string(),
                protocol: format!("{}:", url.scheme()),
                pathname: url.path().to_string(),
                ..Self::default()
            };
        }

        let hostname = url.host_str().unwrap_or_default().to_string();
        let port = url.port().map(|p| p.to_string()).unwrap_or_default();
        let host = if port.is_empty() {
            hostname.clone()
        } else {
            format!("{hostname}:{port}")
        };
        let origin = match url.origin() {
            origin @ url::Origin::Tuple(..) => origin.ascii_serialization(),
            url::Origin::Opaque(_) => String::new(),
        };
        Self {
            href: href.to_string(),
            protocol: format!("{}:", url.scheme()),
            hostname,
            origin,
            host,
            port,
            search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
            pathname: url.path().to_string(),
        }
    }
}

/// Installs the global `location`. `reload()` queues a reload of `generation`
/// for the next tick.
pub fn install<'js>(
    ctx: &Ctx<'js>,
    location: &Location,
    dispatcher: &Dispatcher,
    generation: Generation,
) -> rquickjs::Result<()> {
    let object = Object::new(ctx.clone())?;
    object.set("href", location.href.as_str())?;
    object.set("protocol", location.protocol.as_str())?;
    object.set("hostname", location.hostname.as_str())?;
    object.set("origin", location.origin.as_str())?;
    object.set("host", location.host.as_str())?;
    object.set("port", location.port.as_str())?;
    object.set("search", location.search.as_str())?;
    object.set("pathname", location.pathname.as_str())?;

    let dispatcher = dispatcher.clone();
    object.set(
        "reload",
        Function::new(ctx.clone(), move || {
            dispatcher.post(generation, HostEvent::Reload);
        })?,
    )?;
    object.set(
        "toString",
        Function::new(ctx.clone(), {
            let href = location.href.clone();
            move || href.clone()
        })?,
    )?;

    ctx.globals().set("location", object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_server_url_is_split() {
        let location = Location::parse("http://localhost:3000/app/index.js?mode=dev");
        assert_eq!(location.protocol, "http:");
        assert_eq!(location.hostname, "localhost");
        assert_eq!(location.port, "3000");
        assert_eq!(location.host, "localhost:3000");
        assert_eq!(location.origin, "http://localhost:3000");
        assert_eq!(location.pathname, "/app/index.js");
        assert_eq!(location.search, "?mode=dev");
    }

    #[test]
    fn default_port_is_omitted() {
        let location = Location::parse("https://cdn.example.com/bundle.js");
        assert_eq!(location.port, "");
        assert_eq!(location.host, "cdn.example.com");
        assert_eq!(location.origin, "https://cdn.example.com");
    }

    #[test]
    fn relative_paths_become_pathname() {
        let location = Location::parse("assets/index.js");
        assert_eq!(location.href, "assets/index.js");
        assert_eq!(location.pathname, "assets/index.js");
        assert_eq!(location.origin, "");
        assert_eq!(location.protocol, "");
    }
}
