use url::Url;

use crate::browser::Browser;

/// The top-level frame of a browser session.
///
/// The embedded engine keeps a single main frame per session; subframe trees
/// belong to the rendering layer.
#[derive(Debug, Clone)]
pub struct Frame {
    url: Url,
    is_main: bool,
}

impl Frame {
    pub(crate) fn main(url: Url) -> Self {
        Self { url, is_main: true }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_main(&self) -> bool {
        self.is_main
    }
}

/// Window features requested for a popup.
#[derive(Debug, Clone, Default)]
pub struct PopupFeatures {
    /// The `target` name of the link or `window.open` call, if any.
    pub target_name: Option<String>,
    /// Whether the popup will be placed in a fresh render process
    /// (`rel="noreferrer"` navigations). Process placement is independent
    /// from request-context inheritance.
    pub forces_new_process: bool,
}

/// Returned from [`EmbedderClient::on_before_popup`].
///
/// The popup inherits its opener's request context either way; the decision
/// only controls whether the window is created at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopupDecision {
    #[default]
    Allow,
    Cancel,
}

/// Callbacks invoked by the UI-role loop as browser sessions progress.
///
/// Callbacks run on the loop itself and must not block. Handle methods like
/// [`Browser::execute_script`] and [`Browser::close`] only enqueue work, so
/// they are safe to call from inside a callback.
pub trait EmbedderClient: Send + Sync {
    /// A main-frame document finished loading.
    fn on_load_end(&self, browser: &Browser, frame: &Frame, status_code: u16) {
        let _ = (browser, frame, status_code);
    }

    /// A popup is about to be created from `opener`.
    fn on_before_popup(
        &self,
        opener: &Browser,
        target_url: &Url,
        features: &PopupFeatures,
    ) -> PopupDecision {
        let _ = (opener, target_url, features);
        PopupDecision::Allow
    }

    /// The session passed its `Closing` state and is about to be destroyed.
    /// The session's request-context reference is released right after this
    /// returns.
    fn on_before_close(&self, browser: &Browser) {
        let _ = browser;
    }
}
