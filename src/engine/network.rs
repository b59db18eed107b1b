//! The IO-role loop.
//!
//! [`NetworkService`] owns every cookie backing store and is the only place
//! context handlers are consulted. The UI-role loop and the public
//! [`CookieManager`](crate::cookies::CookieManager) handles talk to it
//! exclusively through [`NetworkMessage`]s, so each store has a single owner
//! thread.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot::Sender as OneshotSender;
use futures::stream::{Fuse, Stream, StreamExt};
use futures::task::{Context, Poll};
use tracing::{debug, trace, warn};
use url::Url;

use crate::browser::EmbedderConfig;
use crate::context::{ContextId, RequestContext};
use crate::cookies::{Cookie, CookieJar, StoreId};
use crate::engine::{EngineMessage, NavigationId, NetworkReply};

/// Messages consumed by the IO-role loop.
pub(crate) enum NetworkMessage {
    /// A navigation needs its document and its cookie store.
    BeginRequest {
        nav: NavigationId,
        context: RequestContext,
        url: Url,
    },
    /// Apply the cookie writes of a loading document to its resolved store.
    StoreCookies {
        nav: NavigationId,
        store: StoreKey,
        url: Url,
        cookies: Vec<Cookie>,
    },
    /// Apply `document.cookie` writes from executed script. A fresh need, so
    /// the context's store is resolved again.
    WriteCookies {
        context: RequestContext,
        url: Url,
        cookies: Vec<Cookie>,
    },
    SetCookie {
        store: StoreId,
        url: Url,
        cookie: Cookie,
        tx: OneshotSender<()>,
    },
    /// Enumerate a store into `tx`; dropping `tx` afterwards is the
    /// completion signal.
    VisitCookies {
        store: StoreId,
        tx: UnboundedSender<Cookie>,
    },
    ClearCookies {
        store: StoreId,
        tx: OneshotSender<()>,
    },
}

/// Key of a backing store: a caller-created manager, or a context's own
/// default store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum StoreKey {
    Manager(StoreId),
    ContextDefault(ContextId),
}

/// Events the IO-role loop reports while it runs.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A context handler's cookie-manager supplier was consulted.
    SupplierInvoked {
        context: ContextId,
        url: Url,
        supplied: bool,
    },
    /// A document was resolved for a navigation.
    ResourceResolved { url: Url, found: bool },
    /// Cookies were written to a store.
    CookiesWritten { url: Url, count: usize },
}

/// The IO-role event loop. Owns the cookie backing stores.
#[must_use = "streams do nothing unless polled"]
pub struct NetworkService {
    config: EmbedderConfig,
    from_engine: Fuse<UnboundedReceiver<NetworkMessage>>,
    to_engine: UnboundedSender<EngineMessage>,
    stores: HashMap<StoreKey, CookieJar>,
    pending_events: VecDeque<NetworkEvent>,
}

impl NetworkService {
    pub(crate) fn new(
        config: EmbedderConfig,
        rx: UnboundedReceiver<NetworkMessage>,
        to_engine: UnboundedSender<EngineMessage>,
    ) -> Self {
        Self {
            config,
            from_engine: rx.fuse(),
            to_engine,
            stores: Default::default(),
            pending_events: Default::default(),
        }
    }

    fn on_message(&mut self, msg: NetworkMessage) {
        match msg {
            NetworkMessage::BeginRequest { nav, context, url } => {
                let store = self.resolve_store(&context, &url);
                let resource = self.config.resources.get(&url);
                debug!(%url, found = resource.is_some(), "document resolved");
                self.pending_events.push_back(NetworkEvent::ResourceResolved {
                    url: url.clone(),
                    found: resource.is_some(),
                });
                let _ = self
                    .to_engine
                    .unbounded_send(EngineMessage::Network(NetworkReply::ResponseReady {
                        nav,
                        resource,
                        store,
                    }));
            }
            NetworkMessage::StoreCookies {
                nav,
                store,
                url,
                cookies,
            } => {
                self.write_cookies(store, &url, cookies);
                let _ = self
                    .to_engine
                    .unbounded_send(EngineMessage::Network(NetworkReply::CookiesStored { nav }));
            }
            NetworkMessage::WriteCookies {
                context,
                url,
                cookies,
            } => {
                let store = self.resolve_store(&context, &url);
                self.write_cookies(store, &url, cookies);
            }
            NetworkMessage::SetCookie {
                store,
                url,
                cookie,
                tx,
            } => {
                self.write_cookies(StoreKey::Manager(store), &url, vec![cookie]);
                let _ = tx.send(());
            }
            NetworkMessage::VisitCookies { store, tx } => {
                if let Some(jar) = self.stores.get(&StoreKey::Manager(store)) {
                    for cookie in jar.iter() {
                        if tx.unbounded_send(cookie.clone()).is_err() {
                            break;
                        }
                    }
                }
                // dropping `tx` here ends the visitation stream
            }
            NetworkMessage::ClearCookies { store, tx } => {
                if let Some(jar) = self.stores.get_mut(&StoreKey::Manager(store)) {
                    jar.clear();
                }
                let _ = tx.send(());
            }
        }
    }

    /// Resolve the store backing one request.
    ///
    /// The context's handler, when bound, is consulted exactly once per
    /// call. A handler that yields no manager (including one whose owner
    /// detached) falls back to the context's default store.
    fn resolve_store(&mut self, context: &RequestContext, url: &Url) -> StoreKey {
        if let Some(handler) = context.handler() {
            let manager = handler.cookie_manager();
            trace!(
                context = %context.id(),
                %url,
                supplied = manager.is_some(),
                "cookie-manager supplier invoked"
            );
            self.pending_events.push_back(NetworkEvent::SupplierInvoked {
                context: context.id(),
                url: url.clone(),
                supplied: manager.is_some(),
            });
            if let Some(manager) = manager {
                return StoreKey::Manager(manager.store_id());
            }
        }
        StoreKey::ContextDefault(context.id())
    }

    fn write_cookies(&mut self, store: StoreKey, url: &Url, cookies: Vec<Cookie>) {
        let count = cookies.len();
        let jar = self.store_mut(store);
        for cookie in cookies {
            jar.set(cookie);
        }
        debug!(?store, count, total = jar.len(), "cookies written");
        self.persist(store);
        self.pending_events.push_back(NetworkEvent::CookiesWritten {
            url: url.clone(),
            count,
        });
    }

    /// The jar behind `key`, created on first touch. Default per-context
    /// stores load from the cache directory when one is configured.
    fn store_mut(&mut self, key: StoreKey) -> &mut CookieJar {
        let config = &self.config;
        self.stores
            .entry(key)
            .or_insert_with(|| load_jar(config, key).unwrap_or_default())
    }

    fn persist(&self, key: StoreKey) {
        let (Some(dir), StoreKey::ContextDefault(id)) = (&self.config.cache_dir, key) else {
            return;
        };
        let Some(jar) = self.stores.get(&key) else {
            return;
        };
        if let Err(err) = write_jar(dir, id, jar) {
            warn!(context = %id, %err, "failed to persist cookie store");
        }
    }
}

fn jar_path(dir: &Path, id: ContextId) -> PathBuf {
    dir.join(format!("cookies-{id}.json"))
}

fn load_jar(config: &EmbedderConfig, key: StoreKey) -> Option<CookieJar> {
    let (Some(dir), StoreKey::ContextDefault(id)) = (&config.cache_dir, key) else {
        return None;
    };
    let bytes = fs::read(jar_path(dir, id)).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(jar) => Some(jar),
        Err(err) => {
            warn!(context = %id, %err, "discarding unreadable cookie store");
            None
        }
    }
}

fn write_jar(dir: &Path, id: ContextId, jar: &CookieJar) -> crate::error::Result<()> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_vec(jar)?;
    fs::write(jar_path(dir, id), json)?;
    Ok(())
}

impl Stream for NetworkService {
    type Item = NetworkEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        loop {
            if let Some(ev) = pin.pending_events.pop_front() {
                return Poll::Ready(Some(ev));
            }
            match Pin::new(&mut pin.from_engine).poll_next(cx) {
                Poll::Ready(Some(msg)) => pin.on_message(msg),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
