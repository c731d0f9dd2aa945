//! Rules: limits bound to a key function, a scope and the per-method flag.

use http::request::Parts;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::limit::{parse_many, Limit, ParseError};
use crate::resource::{RequestFn, Resource};

/// Separator between a scope and the lowercase method name.
pub const METHOD_SEPARATOR: char = ':';

/// Where a rule's limits come from.
#[derive(Clone)]
pub enum LimitSource {
    /// Parsed once at construction, shared by every request.
    Static(Arc<[Limit]>),
    /// Rate string produced per request and parsed on every evaluation.
    Dynamic(RequestFn),
}

/// Where a rule's scope comes from.
#[derive(Clone)]
pub enum ScopeSource {
    /// [`Resource::scope_name`] of the request's resource.
    Resource,
    /// Fixed namespace.
    Literal(String),
    /// Namespace computed per request.
    Dynamic(RequestFn),
}

/// A set of limits evaluated together under one scope and key.
#[derive(Clone)]
pub struct Rule {
    limits: LimitSource,
    scope: ScopeSource,
    key_fn: Option<RequestFn>,
    per_method: bool,
}

impl Rule {
    /// Rule over a rate string such as `"100/minute;1000/day"`.
    ///
    /// Parsing happens here, so a malformed string fails at registration.
    pub fn new(expr: &str) -> Result<Self, ParseError> {
        Ok(Self::from_limits(parse_many(expr)?))
    }

    /// Rule over already-parsed limits, evaluated in the given order.
    pub fn from_limits(limits: Vec<Limit>) -> Self {
        Self::with_source(LimitSource::Static(limits.into()))
    }

    /// Rule whose rate string is computed per request.
    pub fn dynamic<F>(limits: F) -> Self
    where
        F: Fn(&Parts, &dyn Resource) -> String + Send + Sync + 'static,
    {
        Self::with_source(LimitSource::Dynamic(Arc::new(limits)))
    }

    fn with_source(limits: LimitSource) -> Self {
        Self { limits, scope: ScopeSource::Resource, key_fn: None, per_method: true }
    }

    /// Count against a fixed namespace instead of the resource's.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = ScopeSource::Literal(scope.into());
        self
    }

    /// Count against a namespace computed per request.
    pub fn scope_fn<F>(mut self, scope: F) -> Self
    where
        F: Fn(&Parts, &dyn Resource) -> String + Send + Sync + 'static,
    {
        self.scope = ScopeSource::Dynamic(Arc::new(scope));
        self
    }

    /// Identify callers with `key` instead of the limiter's default key function.
    pub fn key_fn<F>(mut self, key: F) -> Self
    where
        F: Fn(&Parts, &dyn Resource) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key));
        self
    }

    /// Append the request method to the scope (default `true`).
    pub fn per_method(mut self, per_method: bool) -> Self {
        self.per_method = per_method;
        self
    }

    pub fn is_per_method(&self) -> bool {
        self.per_method
    }

    pub fn limit_source(&self) -> &LimitSource {
        &self.limits
    }

    pub fn scope_source(&self) -> &ScopeSource {
        &self.scope
    }

    /// Limits to evaluate for this request, in declaration order.
    pub fn resolve_limits(
        &self,
        parts: &Parts,
        resource: &dyn Resource,
    ) -> Result<Cow<'_, [Limit]>, ParseError> {
        match &self.limits {
            LimitSource::Static(limits) => Ok(Cow::Borrowed(&limits[..])),
            LimitSource::Dynamic(f) => parse_many(&f(parts, resource)).map(Cow::Owned),
        }
    }

    /// Namespace the limits count against for this request.
    pub fn resolve_scope(&self, parts: &Parts, resource: &dyn Resource) -> String {
        let mut scope = match &self.scope {
            ScopeSource::Resource => resource.scope_name(),
            ScopeSource::Literal(scope) => scope.clone(),
            ScopeSource::Dynamic(f) => f(parts, resource),
        };
        if self.per_method {
            scope.push(METHOD_SEPARATOR);
            scope.push_str(&parts.method.as_str().to_lowercase());
        }
        scope
    }

    /// Caller key: this rule's key function, else `fallback`.
    pub fn resolve_key(&self, parts: &Parts, resource: &dyn Resource, fallback: &RequestFn) -> String {
        match &self.key_fn {
            Some(key) => key(parts, resource),
            None => fallback(parts, resource),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let limits: &dyn fmt::Debug = match &self.limits {
            LimitSource::Static(limits) => limits,
            LimitSource::Dynamic(_) => &"<dynamic>",
        };
        let scope: &dyn fmt::Debug = match &self.scope {
            ScopeSource::Resource => &"<resource>",
            ScopeSource::Literal(scope) => scope,
            ScopeSource::Dynamic(_) => &"<dynamic>",
        };
        f.debug_struct("Rule")
            .field("limits", limits)
            .field("scope", scope)
            .field("key_fn", &self.key_fn.is_some())
            .field("per_method", &self.per_method)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerId;
    use http::{Method, Request};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Books;

    impl Resource for Books {
        fn scope_name(&self) -> String {
            "api.books".into()
        }

        fn responder(&self, _method: &Method) -> Option<HandlerId> {
            None
        }
    }

    fn parts(method: Method) -> Parts {
        Request::builder().method(method).uri("/books").body(()).unwrap().into_parts().0
    }

    #[test]
    fn default_scope_is_resource_plus_method() {
        let rule = Rule::new("1/day").unwrap();
        assert_eq!(rule.resolve_scope(&parts(Method::GET), &Books), "api.books:get");
        assert_eq!(rule.resolve_scope(&parts(Method::POST), &Books), "api.books:post");

        assert!(rule.is_per_method());
        assert!(matches!(rule.scope_source(), ScopeSource::Resource));

        let shared = rule.per_method(false);
        assert!(!shared.is_per_method());
        assert_eq!(shared.resolve_scope(&parts(Method::GET), &Books), "api.books");
    }

    #[test]
    fn literal_and_dynamic_scopes() {
        let rule = Rule::new("1/day").unwrap().scope("login").per_method(false);
        assert!(matches!(rule.scope_source(), ScopeSource::Literal(s) if s == "login"));
        assert_eq!(rule.resolve_scope(&parts(Method::POST), &Books), "login");

        let rule = Rule::new("1/day")
            .unwrap()
            .scope_fn(|parts, resource| format!("{}{}", resource.scope_name(), parts.uri.path()));
        let p = parts(Method::DELETE);
        let first = rule.resolve_scope(&p, &Books);
        assert_eq!(first, "api.books/books:delete");
        assert_eq!(rule.resolve_scope(&p, &Books), first, "scope must be stable for equal input");
    }

    #[test]
    fn static_limits_are_shared_dynamic_are_reparsed() {
        let rule = Rule::new("2/minute;10/hour").unwrap();
        let limits = rule.resolve_limits(&parts(Method::GET), &Books).unwrap();
        assert!(matches!(limits, Cow::Borrowed(_)));
        assert_eq!(limits.len(), 2);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let rule = Rule::dynamic(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            "5/second".to_string()
        });
        for _ in 0..3 {
            let limits = rule.resolve_limits(&parts(Method::GET), &Books).unwrap();
            assert_eq!(limits[0].amount(), 5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn malformed_limits_fail() {
        assert!(Rule::new("lots/minute").is_err());
        let rule = Rule::dynamic(|_, _| "oops".into());
        assert!(rule.resolve_limits(&parts(Method::GET), &Books).is_err());
    }

    #[test]
    fn key_function_overrides_fallback() {
        let fallback: RequestFn = Arc::new(|_: &Parts, _: &dyn Resource| "fallback".to_string());
        let plain = Rule::new("1/day").unwrap();
        assert_eq!(plain.resolve_key(&parts(Method::GET), &Books, &fallback), "fallback");

        let keyed = plain.key_fn(|parts, _| parts.uri.path().to_string());
        assert_eq!(keyed.resolve_key(&parts(Method::GET), &Books, &fallback), "/books");
    }
}
