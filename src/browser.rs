use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::channel::oneshot::channel as oneshot_channel;
use url::Url;

use crate::client::EmbedderClient;
use crate::context::RequestContext;
use crate::cookies::{CookieManager, StoreId};
use crate::engine::network::{NetworkMessage, NetworkService};
use crate::engine::{Engine, EngineMessage};
use crate::error::{EmbedError, Result};
use crate::resources::{ResourceMap, ResourceSource};

/// Identifier of a browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BrowserId(pub(crate) u64);

impl fmt::Display for BrowserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "browser{}", self.0)
    }
}

/// Identifier of the render process a session is assigned to.
///
/// Independent from request-context identity: sessions with the same context
/// may live in different processes and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub(crate) u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process{}", self.0)
    }
}

/// A point in view coordinates, used for click dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Entry handle of the embedding SDK.
///
/// [`Embedder::launch`] yields this handle plus the two event loops that
/// drive it; the loops do nothing unless polled, so the caller spawns them on
/// its executor of choice.
pub struct Embedder {
    ui: UnboundedSender<EngineMessage>,
    net: UnboundedSender<NetworkMessage>,
    next_store_id: AtomicU64,
}

impl Embedder {
    /// Launch the engine.
    ///
    /// Returns the embedder handle, the UI-role loop ([`Engine`]) and the
    /// IO-role loop ([`NetworkService`]). Spawning each loop on its own task
    /// gives every role a designated executor thread.
    pub fn launch(config: EmbedderConfig) -> (Embedder, Engine, NetworkService) {
        let (ui_tx, ui_rx) = unbounded();
        let (net_tx, net_rx) = unbounded();

        let engine = Engine::new(config.clone(), ui_rx, ui_tx.clone(), net_tx.clone());
        let network = NetworkService::new(config, net_rx, ui_tx.clone());

        let embedder = Embedder {
            ui: ui_tx,
            net: net_tx,
            next_store_id: AtomicU64::new(1),
        };
        (embedder, engine, network)
    }

    /// Create a browser session bound to `context` and start loading `url`.
    ///
    /// `None` binds the session to the global context. The session keeps its
    /// context for its entire lifetime; the reference is released when the
    /// session is destroyed.
    pub async fn create_browser(
        &self,
        url: impl AsRef<str>,
        context: Option<RequestContext>,
        client: Arc<dyn EmbedderClient>,
    ) -> Result<Browser> {
        let url = Url::parse(url.as_ref())?;
        let context = context.unwrap_or_else(RequestContext::global);
        let (tx, rx) = oneshot_channel();
        self.ui
            .unbounded_send(EngineMessage::CreateBrowser {
                url,
                context,
                client,
                tx,
            })
            .map_err(|_| EmbedError::EngineGone)?;
        rx.await?
    }

    /// Create a standalone cookie store, typically handed out from a
    /// [`RequestContextHandler`](crate::context::RequestContextHandler).
    pub fn create_cookie_manager(&self) -> CookieManager {
        let id = StoreId::new(self.next_store_id.fetch_add(1, Ordering::Relaxed));
        CookieManager::new(id, self.net.clone())
    }

    /// Tear the engine down.
    ///
    /// Closes every remaining session (running their close callbacks) and
    /// releases the global context registry slot. Request contexts still held
    /// by the embedder stay alive; releasing them before process teardown is
    /// the embedder's responsibility.
    pub async fn shutdown(self) -> Result<()> {
        let (tx, rx) = oneshot_channel();
        self.ui
            .unbounded_send(EngineMessage::Shutdown { tx })
            .map_err(|_| EmbedError::EngineGone)?;
        Ok(rx.await?)
    }
}

/// Handle onto one browser session.
///
/// Mutating methods only enqueue work on the UI-role loop and return
/// immediately, which makes them safe to call from
/// [`EmbedderClient`](crate::client::EmbedderClient) callbacks.
#[derive(Clone)]
pub struct Browser {
    id: BrowserId,
    context: RequestContext,
    is_popup: bool,
    process: ProcessId,
    ui: UnboundedSender<EngineMessage>,
}

impl Browser {
    pub(crate) fn new(
        id: BrowserId,
        context: RequestContext,
        is_popup: bool,
        process: ProcessId,
        ui: UnboundedSender<EngineMessage>,
    ) -> Self {
        Self {
            id,
            context,
            is_popup,
            process,
            ui,
        }
    }

    pub fn id(&self) -> BrowserId {
        self.id
    }

    /// The request context this session was created with.
    ///
    /// Returns a proxy that compares identity-equal to the creation context
    /// for the whole session lifetime, popups included.
    pub fn request_context(&self) -> RequestContext {
        self.context.clone()
    }

    /// Whether this session was opened as a popup from another session.
    pub fn is_popup(&self) -> bool {
        self.is_popup
    }

    pub fn render_process_id(&self) -> ProcessId {
        self.process
    }

    /// Start loading `url` in the session's main frame.
    ///
    /// The session's request context is unaffected; it is bound for the
    /// session's lifetime.
    pub fn navigate(&self, url: impl AsRef<str>) -> Result<()> {
        let url = Url::parse(url.as_ref())?;
        self.ui
            .unbounded_send(EngineMessage::Navigate {
                browser: self.id,
                url,
            })
            .map_err(|_| EmbedError::EngineGone)
    }

    /// Run `js` in the page.
    ///
    /// The embedded engine interprets the fixture subset: calls to functions
    /// the page defines, `window.open('..')` and `document.cookie='k=v'`
    /// statements.
    pub fn execute_script(&self, js: impl Into<String>) -> Result<()> {
        self.ui
            .unbounded_send(EngineMessage::ExecuteScript {
                browser: self.id,
                js: js.into(),
            })
            .map_err(|_| EmbedError::EngineGone)
    }

    /// Dispatch a click at `point`, activating the link under it.
    pub fn click(&self, point: Point) -> Result<()> {
        self.ui
            .unbounded_send(EngineMessage::Click {
                browser: self.id,
                point,
            })
            .map_err(|_| EmbedError::EngineGone)
    }

    /// Ask the session to close.
    ///
    /// Closing is asynchronous: the session enters its `Closing` state, the
    /// client's `on_before_close` runs, and only then is the session
    /// destroyed and its context reference released.
    pub fn close(&self) -> Result<()> {
        self.ui
            .unbounded_send(EngineMessage::CloseBrowser { browser: self.id })
            .map_err(|_| EmbedError::EngineGone)
    }

    /// The session's current main-frame URL.
    pub async fn url(&self) -> Result<Url> {
        let (tx, rx) = oneshot_channel();
        self.ui
            .unbounded_send(EngineMessage::QueryUrl {
                browser: self.id,
                tx,
            })
            .map_err(|_| EmbedError::EngineGone)?;
        rx.await?
    }
}

impl fmt::Debug for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Browser")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("is_popup", &self.is_popup)
            .field("process", &self.process)
            .finish()
    }
}

/// How a popup chooses its request context.
///
/// Today popups always share their opener's context; the enum is the
/// extension point for isolating policies.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PopupContextPolicy {
    /// The popup shares its opener's context.
    #[default]
    InheritOpener,
}

/// Configuration for [`Embedder::launch`].
#[derive(Clone)]
pub struct EmbedderConfig {
    pub(crate) resources: Arc<dyn ResourceSource>,
    /// Directory for per-context default cookie stores. `None` keeps every
    /// store in memory.
    pub(crate) cache_dir: Option<PathBuf>,
    pub(crate) request_timeout: Duration,
    pub(crate) popup_policy: PopupContextPolicy,
}

/// Navigations not completed within this window are evicted and fail the
/// load.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl EmbedderConfig {
    pub fn builder() -> EmbedderConfigBuilder {
        EmbedderConfigBuilder::default()
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Default)]
pub struct EmbedderConfigBuilder {
    resources: Option<Arc<dyn ResourceSource>>,
    cache_dir: Option<PathBuf>,
    request_timeout: Option<Duration>,
    popup_policy: PopupContextPolicy,
}

impl EmbedderConfigBuilder {
    /// Where navigations load their documents from.
    pub fn resource_source(mut self, resources: impl ResourceSource + 'static) -> Self {
        self.resources = Some(Arc::new(resources));
        self
    }

    /// Persist per-context default cookie stores under `dir`.
    pub fn cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn popup_policy(mut self, policy: PopupContextPolicy) -> Self {
        self.popup_policy = policy;
        self
    }

    pub fn build(self) -> EmbedderConfig {
        EmbedderConfig {
            resources: self
                .resources
                .unwrap_or_else(|| Arc::new(ResourceMap::new())),
            cache_dir: self.cache_dir,
            request_timeout: self.request_timeout.unwrap_or(REQUEST_TIMEOUT),
            popup_policy: self.popup_policy,
        }
    }
}
