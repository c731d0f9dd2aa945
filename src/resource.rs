//! What the engine needs to know about the target of a request.
//!
//! A [`Resource`] is the thing a route dispatches to. It answers two
//! questions: which registered handler serves a given HTTP method, and what
//! namespace its counters live under when a rule declares no scope.

use http::request::Parts;
use http::Method;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::registry::HandlerId;

/// Derives a string from a request and its resource (keys, scopes, rate strings).
pub type RequestFn = Arc<dyn Fn(&Parts, &dyn Resource) -> String + Send + Sync>;

/// Target of a request, as seen by the limiter.
pub trait Resource: Send + Sync {
    /// Namespace used when a rule has no explicit scope.
    ///
    /// Defaults to the implementing type's path, lowercased, with `::`
    /// replaced by `.` (`my_app::api::Books` becomes `my_app.api.books`).
    fn scope_name(&self) -> String {
        default_scope(std::any::type_name::<Self>())
    }

    /// Handler serving `method`, or `None` when the resource does not answer it.
    fn responder(&self, method: &Method) -> Option<HandlerId>;
}

/// Lowercased, dot-separated form of a Rust type path.
pub fn default_scope(type_path: &str) -> String {
    type_path.replace("::", ".").to_lowercase()
}

/// Method table for resources that are not their own Rust type.
#[derive(Debug, Clone)]
pub struct Routes {
    name: String,
    handlers: HashMap<Method, HandlerId>,
}

impl Routes {
    /// `name` becomes the default scope (lowercased).
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into().to_lowercase(), handlers: HashMap::new() }
    }

    /// Bind `handler` to `method`, replacing any previous binding.
    pub fn on(mut self, method: Method, handler: HandlerId) -> Self {
        self.handlers.insert(method, handler);
        self
    }
}

impl Resource for Routes {
    fn scope_name(&self) -> String {
        self.name.clone()
    }

    fn responder(&self, method: &Method) -> Option<HandlerId> {
        self.handlers.get(method).copied()
    }
}

/// Default key: the client address.
///
/// First `for=` node of an RFC 7239 `Forwarded` header, else the first hop of
/// `X-Forwarded-For`, else `X-Real-IP`, else a [`SocketAddr`] request
/// extension, else `"unknown"`.
pub fn remote_address(parts: &Parts, _resource: &dyn Resource) -> String {
    let header = |name: &str| {
        parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
    };
    if let Some(node) = header("forwarded").and_then(forwarded_for) {
        return node.to_string();
    }
    if let Some(first) = header("x-forwarded-for").and_then(|v| v.split(',').next()) {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    parts
        .extensions
        .get::<SocketAddr>()
        .map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

/// Client node of the first element of a `Forwarded` header, port and brackets removed.
fn forwarded_for(value: &str) -> Option<&str> {
    let first = value.split(',').next()?;
    let node = first.split(';').find_map(|pair| {
        let (name, node) = pair.trim().split_once('=')?;
        name.trim().eq_ignore_ascii_case("for").then_some(node.trim().trim_matches('"'))
    })?;
    let host = match node.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or(v6),
        None => match node.split_once(':') {
            Some((host, port)) if !port.contains(':') => host,
            _ => node,
        },
    };
    Some(host).filter(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    struct Books;

    impl Resource for Books {
        fn responder(&self, _method: &Method) -> Option<HandlerId> {
            None
        }
    }

    fn parts(builder: http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn default_scope_uses_type_path() {
        let scope = Books.scope_name();
        assert!(scope.ends_with("resource.tests.books"), "got {scope}");
        assert_eq!(scope, scope.to_lowercase());
        assert_eq!(default_scope("My::Api::Books"), "my.api.books");
    }

    #[test]
    fn routes_resolve_methods() {
        let mut registry = crate::Registry::new();
        let get = registry.handler();
        let routes = Routes::new("Api.Books").on(Method::GET, get);
        assert_eq!(routes.responder(&Method::GET), Some(get));
        assert_eq!(routes.responder(&Method::POST), None);
        assert_eq!(routes.scope_name(), "api.books");
    }

    #[test]
    fn remote_address_prefers_forwarded_chain() {
        let p = parts(Request::get("/").header("x-forwarded-for", " 203.0.113.9, 10.0.0.1"));
        assert_eq!(remote_address(&p, &Books), "203.0.113.9");

        let p = parts(
            Request::get("/")
                .header("forwarded", "for=\"192.0.2.60:4711\";proto=http, for=198.51.100.17")
                .header("x-forwarded-for", "203.0.113.9"),
        );
        assert_eq!(remote_address(&p, &Books), "192.0.2.60");

        let p = parts(Request::get("/").header("forwarded", "proto=https;For=\"[2001:db8:cafe::17]:4711\""));
        assert_eq!(remote_address(&p, &Books), "2001:db8:cafe::17");

        let p = parts(Request::get("/").header("forwarded", "proto=https").header("x-forwarded-for", "203.0.113.9"));
        assert_eq!(remote_address(&p, &Books), "203.0.113.9", "no for= node falls through");

        let p = parts(Request::get("/").header("x-real-ip", "198.51.100.4"));
        assert_eq!(remote_address(&p, &Books), "198.51.100.4");

        let mut p = parts(Request::get("/"));
        p.extensions.insert("192.0.2.7:4242".parse::<SocketAddr>().unwrap());
        assert_eq!(remote_address(&p, &Books), "192.0.2.7");

        assert_eq!(remote_address(&parts(Request::get("/")), &Books), "unknown");
    }
}
