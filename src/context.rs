use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::cookies::CookieManager;

/// Identity token of a [`RequestContext`].
///
/// Identities are compared by value. The process-wide default context owns a
/// reserved identity; every explicitly created context gets a fresh one from
/// a process-wide counter, so no two contexts created independently ever
/// share an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// The reserved identity of the process-wide default context.
    pub const GLOBAL: ContextId = ContextId(0);

    pub fn is_global(self) -> bool {
        self == Self::GLOBAL
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Identity source for explicitly created contexts. `fetch_add` linearizes
/// allocation, so concurrent `create` calls never observe the same id.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Registry slot for the default context. Populated on first access under the
/// lock and cleared again when the embedder shuts down; proxies handed out
/// earlier keep their identity.
static GLOBAL_CONTEXT: Lazy<Mutex<Option<RequestContext>>> = Lazy::new(|| Mutex::new(None));

/// Caller-supplied per-context services.
///
/// A handler is bound to a context at creation time and consulted by the
/// IO-role loop whenever that context needs a cookie store. Implementations
/// that keep a back-reference to embedder state should make that reference
/// severable (e.g. a `Mutex<Option<..>>`) and return `None` once detached;
/// the engine treats `None` as "use the context's default store", never as an
/// error.
pub trait RequestContextHandler: Send + Sync {
    /// Supply the cookie store backing this context.
    ///
    /// Invoked lazily on the IO-role loop, once per request that needs a
    /// store. `None` selects the context's own default store.
    fn cookie_manager(&self) -> Option<CookieManager> {
        None
    }
}

struct ContextInner {
    id: ContextId,
    handler: Option<Arc<dyn RequestContextHandler>>,
}

/// An isolated set of browsing state (cookies, cache, storage) shared by the
/// browser sessions created with it.
///
/// `RequestContext` is a cheap proxy: cloning it, or obtaining another proxy
/// for the same underlying context from a [`Browser`](crate::Browser), yields
/// an object that compares identity-equal via [`is_same`](Self::is_same).
/// Identity and handler binding are immutable after creation.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    /// The process-wide default context.
    ///
    /// Created lazily under the registry lock on first access; every call
    /// afterwards returns a proxy with the same identity.
    pub fn global() -> RequestContext {
        let mut slot = GLOBAL_CONTEXT.lock().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert_with(|| RequestContext {
            inner: Arc::new(ContextInner {
                id: ContextId::GLOBAL,
                handler: None,
            }),
        })
        .clone()
    }

    /// Create a new context with its own identity and storage.
    ///
    /// Every call allocates a fresh identity, distinct from the global
    /// context and from every previously created context, even when
    /// `handler` is `None` or shared across calls.
    pub fn create(handler: Option<Arc<dyn RequestContextHandler>>) -> RequestContext {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        RequestContext {
            inner: Arc::new(ContextInner { id, handler }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Whether this proxy refers to the process-wide default context.
    pub fn is_global(&self) -> bool {
        self.inner.id.is_global()
    }

    /// Identity comparison.
    ///
    /// True iff both proxies refer to the same underlying context. This is a
    /// token comparison, not a pointer comparison: distinct proxy objects for
    /// the same context compare equal, unrelated contexts compare `false` in
    /// both directions.
    pub fn is_same(&self, other: &RequestContext) -> bool {
        self.inner.id == other.inner.id
    }

    /// The handler supplied at creation, `None` for the global context and
    /// for contexts created without one. Pure accessor.
    pub fn handler(&self) -> Option<Arc<dyn RequestContextHandler>> {
        self.inner.handler.clone()
    }

    /// Clears the registry slot during embedder shutdown. Contexts still
    /// referenced elsewhere stay alive and keep their identity; releasing
    /// them before process teardown is the embedder's responsibility.
    pub(crate) fn release_global() {
        GLOBAL_CONTEXT
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

impl PartialEq for RequestContext {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other)
    }
}

impl Eq for RequestContext {}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.inner.id)
            .field("global", &self.is_global())
            .field("has_handler", &self.inner.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    impl RequestContextHandler for NoopHandler {}

    #[test]
    fn global_context_is_idempotent() {
        let ctx1 = RequestContext::global();
        assert!(ctx1.is_global());
        assert!(ctx1.is_same(&ctx1));

        let ctx2 = RequestContext::global();
        assert!(ctx2.is_global());
        assert!(ctx1.is_same(&ctx2));
        assert!(ctx2.is_same(&ctx1));
    }

    #[test]
    fn created_contexts_are_distinct() {
        let handler: Arc<dyn RequestContextHandler> = Arc::new(NoopHandler);

        let ctx1 = RequestContext::create(Some(handler.clone()));
        assert!(!ctx1.is_global());
        assert!(ctx1.is_same(&ctx1));

        // Same handler, new identity.
        let ctx2 = RequestContext::create(Some(handler.clone()));
        assert!(!ctx2.is_global());
        assert!(!ctx1.is_same(&ctx2));
        assert!(!ctx2.is_same(&ctx1));

        let global = RequestContext::global();
        assert!(!global.is_same(&ctx1));
        assert!(!global.is_same(&ctx2));
        assert!(!ctx1.is_same(&global));
        assert!(!ctx2.is_same(&global));
    }

    #[test]
    fn handler_accessor_returns_creation_handler() {
        let handler: Arc<dyn RequestContextHandler> = Arc::new(NoopHandler);
        let ctx = RequestContext::create(Some(handler.clone()));

        let got = ctx.handler().expect("handler bound at creation");
        assert!(Arc::ptr_eq(&got, &handler));
        // Reading twice yields the same reference, no state mutation.
        let again = ctx.handler().expect("handler bound at creation");
        assert!(Arc::ptr_eq(&again, &handler));
    }

    #[test]
    fn context_without_handler_is_fully_functional() {
        let ctx1 = RequestContext::create(None);
        assert!(!ctx1.is_global());
        assert!(ctx1.is_same(&ctx1));
        assert!(ctx1.handler().is_none());

        let ctx2 = RequestContext::create(None);
        assert!(ctx2.handler().is_none());
        assert!(!ctx1.is_same(&ctx2));
        assert!(!ctx2.is_same(&ctx1));
    }

    #[test]
    fn proxies_compare_by_identity_not_pointer() {
        let ctx = RequestContext::create(None);
        let proxy = ctx.clone();
        assert!(ctx.is_same(&proxy));
        assert_eq!(ctx, proxy);

        let global1 = RequestContext::global();
        let global2 = RequestContext::global();
        assert_eq!(global1, global2);
    }
}
