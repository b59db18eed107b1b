//! The UI-role loop.
//!
//! [`Engine`] owns browser-session lifecycle: creation, the navigation state
//! machine, popup spawning and client-callback dispatch. Everything that
//! touches networking state is handed to the IO-role loop
//! ([`NetworkService`]) as a message; the reply arrives as another message,
//! never as a blocking wait.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot::Sender as OneshotSender;
use futures::stream::{Fuse, Stream, StreamExt};
use futures::task::{Context, Poll};
use tracing::{debug, trace, warn};
use url::Url;

use crate::browser::{Browser, BrowserId, EmbedderConfig, Point, PopupContextPolicy, ProcessId};
use crate::client::{EmbedderClient, Frame, PopupDecision, PopupFeatures};
use crate::context::{ContextId, RequestContext};
use crate::cookies::Cookie;
use crate::engine::job::PeriodicJob;
use crate::engine::network::{NetworkMessage, StoreKey};
use crate::engine::page::PageModel;
use crate::engine::session::{Session, SessionState};
use crate::error::{EmbedError, Result};
use crate::resources::Resource;

mod job;
pub mod network;
mod page;
mod session;

pub use network::{NetworkEvent, NetworkService};

/// How often timed-out navigations are evicted.
const EVICT_INTERVAL: Duration = Duration::from_millis(500);

/// Identifier of one navigation in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NavigationId(usize);

/// Messages sent to the UI-role loop by handles and by the IO-role loop.
pub(crate) enum EngineMessage {
    CreateBrowser {
        url: Url,
        context: RequestContext,
        client: Arc<dyn EmbedderClient>,
        tx: OneshotSender<Result<Browser>>,
    },
    Navigate {
        browser: BrowserId,
        url: Url,
    },
    ExecuteScript {
        browser: BrowserId,
        js: String,
    },
    Click {
        browser: BrowserId,
        point: Point,
    },
    CloseBrowser {
        browser: BrowserId,
    },
    QueryUrl {
        browser: BrowserId,
        tx: OneshotSender<Result<Url>>,
    },
    Shutdown {
        tx: OneshotSender<()>,
    },
    Network(NetworkReply),
}

/// Replies posted back by the IO-role loop.
pub(crate) enum NetworkReply {
    ResponseReady {
        nav: NavigationId,
        resource: Option<Resource>,
        store: StoreKey,
    },
    CookiesStored {
        nav: NavigationId,
    },
}

/// Observability events yielded by the [`Engine`] stream.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    BrowserCreated {
        browser: BrowserId,
        context: ContextId,
    },
    LoadEnd {
        browser: BrowserId,
        url: Url,
        status_code: u16,
    },
    PopupCreated {
        opener: BrowserId,
        popup: BrowserId,
        context: ContextId,
    },
    PopupCanceled {
        opener: BrowserId,
        url: Url,
    },
    BrowserDestroyed {
        browser: BrowserId,
    },
    NavigationTimedOut {
        browser: BrowserId,
        url: Url,
    },
}

/// How a popup came to be. Only noreferrer navigations force a fresh render
/// process; context inheritance is the same in every mode.
#[derive(Debug, Clone)]
enum PopupMode {
    WindowOpen,
    TargetedLink(String),
    NoReferrerLink(Option<String>),
}

impl PopupMode {
    fn target_name(&self) -> Option<&str> {
        match self {
            PopupMode::WindowOpen => None,
            PopupMode::TargetedLink(name) => Some(name),
            PopupMode::NoReferrerLink(name) => name.as_deref(),
        }
    }

    fn forces_new_process(&self) -> bool {
        matches!(self, PopupMode::NoReferrerLink(_))
    }
}

/// Bookkeeping for a navigation between its request and its load end.
struct NavigationInProgress {
    browser: BrowserId,
    url: Url,
    started: Instant,
    status: u16,
}

/// The UI-role event loop that drives every browser session.
#[must_use = "streams do nothing unless polled"]
pub struct Engine {
    config: EmbedderConfig,
    from_handles: Fuse<UnboundedReceiver<EngineMessage>>,
    /// Cloned into every `Browser` handle this loop creates.
    loopback: UnboundedSender<EngineMessage>,
    net: UnboundedSender<NetworkMessage>,
    sessions: FnvHashMap<BrowserId, Session>,
    navigations: FnvHashMap<NavigationId, NavigationInProgress>,
    pending_events: VecDeque<EngineEvent>,
    /// Evicts navigations that outlived the request timeout.
    evict_navigations: PeriodicJob,
    next_browser_id: u64,
    next_process_id: u64,
    next_navigation_id: usize,
    done: bool,
}

impl Engine {
    pub(crate) fn new(
        config: EmbedderConfig,
        rx: UnboundedReceiver<EngineMessage>,
        loopback: UnboundedSender<EngineMessage>,
        net: UnboundedSender<NetworkMessage>,
    ) -> Self {
        Self {
            config,
            from_handles: rx.fuse(),
            loopback,
            net,
            sessions: Default::default(),
            navigations: Default::default(),
            pending_events: Default::default(),
            evict_navigations: PeriodicJob::new(EVICT_INTERVAL),
            next_browser_id: 0,
            next_process_id: 0,
            next_navigation_id: 0,
            done: false,
        }
    }

    fn next_browser_id(&mut self) -> BrowserId {
        let id = BrowserId(self.next_browser_id);
        self.next_browser_id = self.next_browser_id.wrapping_add(1);
        id
    }

    fn next_process_id(&mut self) -> ProcessId {
        let id = ProcessId(self.next_process_id);
        self.next_process_id = self.next_process_id.wrapping_add(1);
        id
    }

    fn next_navigation_id(&mut self) -> NavigationId {
        let id = NavigationId(self.next_navigation_id);
        self.next_navigation_id = self.next_navigation_id.wrapping_add(1);
        id
    }

    fn on_message(&mut self, msg: EngineMessage) {
        match msg {
            EngineMessage::CreateBrowser {
                url,
                context,
                client,
                tx,
            } => {
                let browser = self.create_browser(url, context, client);
                let _ = tx.send(Ok(browser));
            }
            EngineMessage::Navigate { browser, url } => self.start_navigation(browser, url),
            EngineMessage::ExecuteScript { browser, js } => self.execute_script(browser, &js),
            EngineMessage::Click { browser, point } => self.click(browser, point),
            EngineMessage::CloseBrowser { browser } => self.close_browser(browser),
            EngineMessage::QueryUrl { browser, tx } => {
                let res = self
                    .sessions
                    .get(&browser)
                    .map(|s| s.url().clone())
                    .ok_or(EmbedError::BrowserNotFound(browser));
                let _ = tx.send(res);
            }
            EngineMessage::Shutdown { tx } => self.shutdown(tx),
            EngineMessage::Network(reply) => self.on_network_reply(reply),
        }
    }

    /// Create a session bound to `context` and start loading `url`.
    ///
    /// The session keeps the context reference until it is destroyed; popups
    /// spawned from it later inherit the same context.
    fn create_browser(
        &mut self,
        url: Url,
        context: RequestContext,
        client: Arc<dyn EmbedderClient>,
    ) -> Browser {
        let id = self.next_browser_id();
        let process = self.next_process_id();
        let handle = Browser::new(id, context.clone(), false, process, self.loopback.clone());
        debug!(%id, context = %context.id(), %url, "browser created");
        self.pending_events.push_back(EngineEvent::BrowserCreated {
            browser: id,
            context: context.id(),
        });
        self.sessions
            .insert(id, Session::new(handle.clone(), client, url.clone()));
        self.start_navigation(id, url);
        handle
    }

    fn start_navigation(&mut self, browser: BrowserId, url: Url) {
        let nav = self.next_navigation_id();
        let Some(session) = self.sessions.get_mut(&browser) else {
            return;
        };
        if session.is_closing() {
            return;
        }
        session.begin_navigation(nav, url.clone());
        let context = session.context();
        self.navigations.insert(
            nav,
            NavigationInProgress {
                browser,
                url: url.clone(),
                started: Instant::now(),
                status: 0,
            },
        );
        trace!(%browser, %url, "navigation started");
        let _ = self
            .net
            .unbounded_send(NetworkMessage::BeginRequest { nav, context, url });
    }

    fn on_network_reply(&mut self, reply: NetworkReply) {
        match reply {
            NetworkReply::ResponseReady {
                nav,
                resource,
                store,
            } => self.on_response_ready(nav, resource, store),
            NetworkReply::CookiesStored { nav } => self.complete_navigation(nav),
        }
    }

    /// The IO-role loop resolved the document and the cookie store for a
    /// navigation. Cookie writes the document performs while loading go back
    /// to the IO loop against the already-resolved store; the load only
    /// completes once they landed.
    fn on_response_ready(&mut self, nav: NavigationId, resource: Option<Resource>, store: StoreKey) {
        let Some(record) = self.navigations.get_mut(&nav) else {
            // evicted, or the session was closed mid-flight
            return;
        };
        let browser = record.browser;
        record.status = if resource.is_some() { 200 } else { 404 };
        let url = record.url.clone();

        let Some(session) = self.sessions.get_mut(&browser) else {
            self.navigations.remove(&nav);
            return;
        };
        if session.current_navigation() != Some(nav) {
            // stale reply for a superseded navigation
            self.navigations.remove(&nav);
            return;
        }

        let page = match &resource {
            Some(res) => PageModel::parse(url.clone(), &res.body),
            None => PageModel::empty(url.clone()),
        };
        let cookies = page.load_cookies();
        let opens: Vec<String> = page.load_opens().to_vec();
        session.set_page(page);

        if cookies.is_empty() {
            self.complete_navigation(nav);
        } else {
            session.set_state(SessionState::Storing(nav));
            let _ = self.net.unbounded_send(NetworkMessage::StoreCookies {
                nav,
                store,
                url: url.clone(),
                cookies,
            });
        }

        for target in opens {
            self.open_from(browser, &url, &target, PopupMode::WindowOpen);
        }
    }

    fn complete_navigation(&mut self, nav: NavigationId) {
        let Some(record) = self.navigations.remove(&nav) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&record.browser) else {
            return;
        };
        session.set_state(SessionState::Loaded);
        let client = session.client();
        let handle = session.handle().clone();
        debug!(
            browser = %record.browser,
            url = %record.url,
            status = record.status,
            "load finished"
        );
        client.on_load_end(&handle, &Frame::main(record.url.clone()), record.status);
        self.pending_events.push_back(EngineEvent::LoadEnd {
            browser: record.browser,
            url: record.url,
            status_code: record.status,
        });
    }

    fn execute_script(&mut self, browser: BrowserId, js: &str) {
        let Some(session) = self.sessions.get(&browser) else {
            warn!(%browser, "script for unknown browser");
            return;
        };
        let Some(page) = session.page() else {
            warn!(%browser, "script before the document loaded");
            return;
        };
        let effects = page.invoke(js);
        let url = session.url().clone();
        let context = session.context();

        if !effects.cookies.is_empty() {
            let cookies = effects
                .cookies
                .iter()
                .map(|(name, value)| Cookie::for_url(name, value, &url))
                .collect();
            let _ = self.net.unbounded_send(NetworkMessage::WriteCookies {
                context,
                url: url.clone(),
                cookies,
            });
        }
        for target in effects.opens {
            self.open_from(browser, &url, &target, PopupMode::WindowOpen);
        }
    }

    fn click(&mut self, browser: BrowserId, point: Point) {
        let Some(session) = self.sessions.get(&browser) else {
            return;
        };
        let Some(page) = session.page() else {
            return;
        };
        let Some(link) = page.primary_link() else {
            trace!(%browser, ?point, "click hit no link");
            return;
        };
        let href = link.href.clone();
        let target = link.target.clone();
        let noreferrer = link.noreferrer;
        let base = session.url().clone();

        match target {
            Some(name) if name != "_self" => {
                let mode = if noreferrer {
                    PopupMode::NoReferrerLink(Some(name))
                } else {
                    PopupMode::TargetedLink(name)
                };
                self.open_from(browser, &base, &href, mode);
            }
            _ => {
                match base.join(&href) {
                    Ok(url) => self.start_navigation(browser, url),
                    Err(err) => warn!(%href, %err, "unresolvable link href"),
                };
            }
        }
    }

    /// Resolve `target` against `base` and spawn a popup from `opener`.
    fn open_from(&mut self, opener: BrowserId, base: &Url, target: &str, mode: PopupMode) {
        match base.join(target) {
            Ok(url) => self.spawn_popup(opener, url, mode),
            Err(err) => warn!(%target, %err, "unresolvable popup target"),
        }
    }

    /// Create a popup session from `opener`.
    ///
    /// The popup's context is inherited per the configured policy, for every
    /// popup mode and regardless of the client's popup decision semantics;
    /// only process placement varies (noreferrer forces a fresh process).
    fn spawn_popup(&mut self, opener: BrowserId, url: Url, mode: PopupMode) {
        let Some(op) = self.sessions.get(&opener) else {
            return;
        };
        if op.is_closing() {
            return;
        }
        let features = PopupFeatures {
            target_name: mode.target_name().map(ToString::to_string),
            forces_new_process: mode.forces_new_process(),
        };
        let client = op.client();
        let opener_handle = op.handle().clone();
        let opener_process = opener_handle.render_process_id();

        if client.on_before_popup(&opener_handle, &url, &features) == PopupDecision::Cancel {
            debug!(%opener, %url, "popup canceled by client");
            self.pending_events
                .push_back(EngineEvent::PopupCanceled { opener, url });
            return;
        }

        let context = match self.config.popup_policy {
            PopupContextPolicy::InheritOpener => opener_handle.request_context(),
        };
        let process = if features.forces_new_process {
            self.next_process_id()
        } else {
            opener_process
        };
        let id = self.next_browser_id();
        let handle = Browser::new(id, context.clone(), true, process, self.loopback.clone());
        debug!(
            %opener,
            popup = %id,
            context = %context.id(),
            %process,
            %url,
            "popup created"
        );
        self.sessions
            .insert(id, Session::new(handle, client, url.clone()));
        self.pending_events.push_back(EngineEvent::PopupCreated {
            opener,
            popup: id,
            context: context.id(),
        });
        self.start_navigation(id, url);
    }

    /// Drive a session through `Closing` into destruction. The context
    /// reference is released exactly once, when the session leaves the map.
    fn close_browser(&mut self, browser: BrowserId) {
        let Some(session) = self.sessions.get_mut(&browser) else {
            return;
        };
        session.set_state(SessionState::Closing);
        let client = session.client();
        let handle = session.handle().clone();
        client.on_before_close(&handle);
        self.sessions.remove(&browser);
        self.navigations.retain(|_, nav| nav.browser != browser);
        debug!(%browser, "browser destroyed");
        self.pending_events
            .push_back(EngineEvent::BrowserDestroyed { browser });
    }

    fn shutdown(&mut self, tx: OneshotSender<()>) {
        debug!("engine shutting down");
        let ids: Vec<_> = self.sessions.keys().copied().collect();
        for id in ids {
            self.close_browser(id);
        }
        RequestContext::release_global();
        self.done = true;
        let _ = tx.send(());
    }

    /// Fail navigations that outlived the request timeout; the session
    /// settles on an empty document with status 0.
    fn evict_timed_out(&mut self, now: Instant) {
        let timeout = self.config.request_timeout;
        let expired: Vec<NavigationId> = self
            .navigations
            .iter()
            .filter(|(_, nav)| now.duration_since(nav.started) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for nav in expired {
            let Some(record) = self.navigations.remove(&nav) else {
                continue;
            };
            warn!(browser = %record.browser, url = %record.url, "navigation timed out");
            self.pending_events.push_back(EngineEvent::NavigationTimedOut {
                browser: record.browser,
                url: record.url.clone(),
            });
            let Some(session) = self.sessions.get_mut(&record.browser) else {
                continue;
            };
            if session.current_navigation() != Some(nav) {
                continue;
            }
            session.set_page(PageModel::empty(record.url.clone()));
            session.set_state(SessionState::Loaded);
            let client = session.client();
            let handle = session.handle().clone();
            client.on_load_end(&handle, &Frame::main(record.url), 0);
        }
    }
}

impl Stream for Engine {
    type Item = EngineEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        loop {
            if let Some(ev) = pin.pending_events.pop_front() {
                return Poll::Ready(Some(ev));
            }
            if pin.done {
                return Poll::Ready(None);
            }

            let mut progress = false;

            // temporary pinning of the receiver is safe as we are pinning
            // through the already pinned self, and the receiver is fused
            while let Poll::Ready(Some(msg)) = Pin::new(&mut pin.from_handles).poll_next(cx) {
                pin.on_message(msg);
                progress = true;
            }

            if pin.evict_navigations.is_ready(cx) {
                pin.evict_timed_out(Instant::now());
                progress = true;
            }

            if !progress {
                return Poll::Pending;
            }
        }
    }
}
