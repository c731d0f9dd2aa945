//! Registry of per-handler rules and exemptions.
//!
//! Handlers are identified by explicit [`HandlerId`] handles issued at route
//! setup, never by function identity. The registry is filled once before
//! serving and then shared read-only (behind an `Arc`) with the limiter.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::rule::Rule;
use tracing::{debug, warn};

/// Opaque handle for a registered handler, issued by [`Registry::handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Per-handler rule lists plus the exemption set.
///
/// Exemption always wins: an exempt handler is never checked, whatever rules
/// are registered for it.
///
/// Handler ids come from the registry's own counter, so it is shared through
/// an `Arc` rather than cloned.
#[derive(Debug, Default)]
pub struct Registry {
    next_id: u64,
    rules: HashMap<HandlerId, Vec<Arc<Rule>>>,
    exempt: HashSet<HandlerId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh handle.
    pub fn handler(&mut self) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Append `rule` to the handler's list. Insertion order is evaluation order.
    pub fn register(&mut self, id: HandlerId, rule: Rule) {
        if self.exempt.contains(&id) {
            warn!(target: "quotagate::registry", handler = ?id, "rule registered on an exempt handler; it will never be evaluated");
        }
        self.rules.entry(id).or_default().push(Arc::new(rule));
    }

    /// Move everything registered under `from` to `to`.
    ///
    /// Used when a handler is wrapped again and gets a new handle: the old
    /// rules are placed ahead of any rules already on `to`, so stacked
    /// declarations accumulate. Exemption moves along.
    pub fn rebind(&mut self, from: HandlerId, to: HandlerId) {
        if from == to {
            return;
        }
        if let Some(mut moved) = self.rules.remove(&from) {
            debug!(target: "quotagate::registry", from = ?from, to = ?to, rules = moved.len(), "rebinding handler rules");
            if let Some(existing) = self.rules.remove(&to) {
                moved.extend(existing);
            }
            self.rules.insert(to, moved);
        }
        if self.exempt.remove(&from) {
            self.exempt.insert(to);
        }
    }

    /// Never check this handler.
    pub fn exempt(&mut self, id: HandlerId) {
        self.exempt.insert(id);
    }

    pub fn is_exempt(&self, id: HandlerId) -> bool {
        self.exempt.contains(&id)
    }

    /// Rules registered for the handler; empty when none.
    pub fn lookup(&self, id: HandlerId) -> &[Arc<Rule>] {
        self.rules.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Start a registration record for `handler`; see [`HandlerRegistration`].
    pub fn declare<H>(&mut self, handler: H) -> HandlerRegistration<'_, H> {
        let id = self.handler();
        HandlerRegistration { registry: self, id, handler }
    }
}

/// Builder attaching rules to one handler.
///
/// ```
/// use quotagate::{Registry, Rule};
///
/// let mut registry = Registry::new();
/// let list_books = registry
///     .declare("list_books")
///     .limit(Rule::new("100/minute").unwrap())
///     .limit(Rule::new("1000/day").unwrap().scope("books-daily"))
///     .finish();
/// assert_eq!(registry.lookup(list_books.id).len(), 2);
/// ```
#[must_use = "call finish() to obtain the handler's id"]
pub struct HandlerRegistration<'a, H> {
    registry: &'a mut Registry,
    id: HandlerId,
    handler: H,
}

impl<'a, H> HandlerRegistration<'a, H> {
    /// Stack another rule; rules evaluate in the order they were added.
    pub fn limit(self, rule: Rule) -> Self {
        self.registry.register(self.id, rule);
        self
    }

    /// Exclude the handler from rate limiting.
    pub fn exempt(self) -> Self {
        self.registry.exempt(self.id);
        self
    }

    /// Hand back the handler together with its id.
    pub fn finish(self) -> Registered<H> {
        Registered { id: self.id, handler: self.handler }
    }
}

/// A handler paired with the id its rules are registered under.
#[derive(Debug, Clone)]
pub struct Registered<H> {
    pub id: HandlerId,
    pub handler: H,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn rule(expr: &str) -> Rule {
        Rule::new(expr).unwrap()
    }

    fn amounts(registry: &Registry, id: HandlerId) -> Vec<u64> {
        registry
            .lookup(id)
            .iter()
            .map(|r| match r.limit_source() {
                crate::rule::LimitSource::Static(limits) => limits[0].amount(),
                crate::rule::LimitSource::Dynamic(_) => 0,
            })
            .collect()
    }

    #[test]
    fn register_appends_in_order() {
        let mut registry = Registry::new();
        let id = registry.handler();
        let other = registry.handler();
        assert_ne!(id, other);

        registry.register(id, rule("1/day"));
        registry.register(id, rule("5/day"));
        assert_eq!(amounts(&registry, id), vec![1, 5]);
        assert!(registry.lookup(other).is_empty());
    }

    #[test]
    fn rebind_accumulates_stacked_declarations() {
        let mut registry = Registry::new();
        let inner = registry.handler();
        let outer = registry.handler();
        registry.register(inner, rule("1/second"));
        registry.register(outer, rule("2/second"));

        registry.rebind(inner, outer);
        assert!(registry.lookup(inner).is_empty());
        assert_eq!(amounts(&registry, outer), vec![1, 2]);

        let third = registry.handler();
        registry.exempt(outer);
        registry.rebind(outer, third);
        assert!(registry.is_exempt(third));
        assert!(!registry.is_exempt(outer));
    }

    #[test]
    fn declare_builds_registration_record() {
        let mut registry = Registry::new();
        let health = registry.declare(|| "ok").exempt().finish();
        let books = registry.declare("books").limit(rule("3/minute")).finish();

        assert!(registry.is_exempt(health.id));
        assert_eq!((health.handler)(), "ok");
        assert_eq!(books.handler, "books");
        assert_eq!(amounts(&registry, books.id), vec![3]);
    }

    #[test]
    fn register_on_exempt_handler_warns() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut registry = Registry::new();
        let id = registry.handler();
        registry.exempt(id);
        registry.register(id, rule("1/day"));

        assert!(registry.is_exempt(id), "exemption still wins");
        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("rule registered on an exempt handler"), "logs: {logs}");
    }
}
