use std::sync::Arc;

use url::Url;

use crate::browser::Browser;
use crate::client::EmbedderClient;
use crate::context::RequestContext;
use crate::engine::page::PageModel;
use crate::engine::NavigationId;

/// Lifecycle of a browser session.
///
/// `Destroyed` is reached by removal from the session map, which is also the
/// one place the session's request-context reference is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Created,
    /// Waiting for the IO-role loop to resolve the URL's store and document.
    Navigating(NavigationId),
    /// Document received; waiting for its cookie writes to land.
    Storing(NavigationId),
    Loaded,
    Closing,
}

/// One browser session as tracked by the UI-role loop.
pub(crate) struct Session {
    /// Prototype of the handles passed to client callbacks. Holds the
    /// session's context reference for its whole lifetime.
    handle: Browser,
    client: Arc<dyn EmbedderClient>,
    state: SessionState,
    /// Target of the current navigation, or the loaded document's url.
    url: Url,
    page: Option<PageModel>,
}

impl Session {
    pub(crate) fn new(handle: Browser, client: Arc<dyn EmbedderClient>, url: Url) -> Self {
        Self {
            handle,
            client,
            state: SessionState::Created,
            url,
            page: None,
        }
    }

    pub(crate) fn context(&self) -> RequestContext {
        self.handle.request_context()
    }

    pub(crate) fn client(&self) -> Arc<dyn EmbedderClient> {
        self.client.clone()
    }

    pub(crate) fn handle(&self) -> &Browser {
        &self.handle
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn page(&self) -> Option<&PageModel> {
        self.page.as_ref()
    }

    pub(crate) fn set_page(&mut self, page: PageModel) {
        self.page = Some(page);
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.state == SessionState::Closing
    }

    /// The navigation this session is currently waiting on.
    pub(crate) fn current_navigation(&self) -> Option<NavigationId> {
        match self.state {
            SessionState::Navigating(nav) | SessionState::Storing(nav) => Some(nav),
            _ => None,
        }
    }

    pub(crate) fn begin_navigation(&mut self, nav: NavigationId, url: Url) {
        self.state = SessionState::Navigating(nav);
        self.url = url;
    }
}
