//! Shared harness for the integration tests: an event-forwarding client, a
//! detachable context handler that tracks supplier invocations, and fixture
//! helpers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use url::Url;

use embedium::{
    Browser, CookieManager, Embedder, EmbedderClient, EmbedderConfig, Frame, PopupDecision,
    PopupFeatures, RequestContextHandler, Resource, ResourceMap,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A launched engine with its fixture registry.
pub struct Harness {
    pub embedder: Embedder,
    pub resources: ResourceMap,
}

/// Launch the engine and spawn both event loops on the test runtime.
pub fn launch() -> Harness {
    launch_with(|builder| builder)
}

pub fn launch_with(
    configure: impl FnOnce(embedium::EmbedderConfigBuilder) -> embedium::EmbedderConfigBuilder,
) -> Harness {
    let resources = ResourceMap::new();
    let builder = EmbedderConfig::builder().resource_source(resources.clone());
    let (embedder, mut engine, mut network) = Embedder::launch(configure(builder).build());
    tokio::spawn(async move { while engine.next().await.is_some() {} });
    tokio::spawn(async move { while network.next().await.is_some() {} });
    Harness { embedder, resources }
}

impl Harness {
    /// Register an HTML fixture under `url`.
    pub fn add_page(&self, url: &str, body: &str) {
        self.resources
            .insert(Url::parse(url).expect("fixture url"), Resource::html(body));
    }
}

/// Client callbacks forwarded into a channel the test body drives.
#[derive(Debug)]
pub enum TestEvent {
    LoadEnd {
        browser: Browser,
        url: Url,
        status: u16,
    },
    BeforePopup {
        url: Url,
        target: Option<String>,
        forces_new_process: bool,
    },
    BeforeClose {
        browser: Browser,
    },
}

pub struct TestClient {
    events: UnboundedSender<TestEvent>,
}

impl TestClient {
    pub fn channel() -> (Arc<TestClient>, UnboundedReceiver<TestEvent>) {
        let (tx, rx) = unbounded();
        (Arc::new(TestClient { events: tx }), rx)
    }
}

impl EmbedderClient for TestClient {
    fn on_load_end(&self, browser: &Browser, frame: &Frame, status_code: u16) {
        assert!(frame.is_main());
        let _ = self.events.unbounded_send(TestEvent::LoadEnd {
            browser: browser.clone(),
            url: frame.url().clone(),
            status: status_code,
        });
    }

    fn on_before_popup(
        &self,
        _opener: &Browser,
        target_url: &Url,
        features: &PopupFeatures,
    ) -> PopupDecision {
        let _ = self.events.unbounded_send(TestEvent::BeforePopup {
            url: target_url.clone(),
            target: features.target_name.clone(),
            forces_new_process: features.forces_new_process,
        });
        PopupDecision::Allow
    }

    fn on_before_close(&self, browser: &Browser) {
        let _ = self.events.unbounded_send(TestEvent::BeforeClose {
            browser: browser.clone(),
        });
    }
}

pub async fn next_event(rx: &mut UnboundedReceiver<TestEvent>) -> TestEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.next())
        .await
        .expect("timed out waiting for a client event")
        .expect("client event channel closed")
}

pub async fn expect_load_end(rx: &mut UnboundedReceiver<TestEvent>) -> (Browser, Url, u16) {
    match next_event(rx).await {
        TestEvent::LoadEnd {
            browser,
            url,
            status,
        } => (browser, url, status),
        other => panic!("expected LoadEnd, got {other:?}"),
    }
}

pub async fn expect_before_popup(
    rx: &mut UnboundedReceiver<TestEvent>,
) -> (Url, Option<String>, bool) {
    match next_event(rx).await {
        TestEvent::BeforePopup {
            url,
            target,
            forces_new_process,
        } => (url, target, forces_new_process),
        other => panic!("expected BeforePopup, got {other:?}"),
    }
}

pub async fn expect_before_close(rx: &mut UnboundedReceiver<TestEvent>) -> Browser {
    match next_event(rx).await {
        TestEvent::BeforeClose { browser } => browser,
        other => panic!("expected BeforeClose, got {other:?}"),
    }
}

/// Shared state behind a [`TrackingHandler`]; the handler's severable
/// back-reference target.
pub struct TrackingState {
    manager: CookieManager,
    /// Tag set by the test before each navigation, so supplier calls can be
    /// attributed to the URL they served.
    expected: Mutex<String>,
    calls: Mutex<Vec<String>>,
}

impl TrackingState {
    pub fn set_expected(&self, url: &str) {
        *self.expected.lock().unwrap() = url.to_string();
    }

    /// The expected-url tags recorded at each supplier invocation, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// Context handler that hands out one cookie manager and records every
/// supplier invocation. `detach` severs the back-reference; a detached
/// handler yields no manager and records nothing.
pub struct TrackingHandler {
    state: Mutex<Option<Arc<TrackingState>>>,
}

impl TrackingHandler {
    pub fn new(manager: CookieManager, expected: &str) -> (Arc<TrackingHandler>, Arc<TrackingState>) {
        let state = Arc::new(TrackingState {
            manager,
            expected: Mutex::new(expected.to_string()),
            calls: Mutex::new(Vec::new()),
        });
        let handler = Arc::new(TrackingHandler {
            state: Mutex::new(Some(state.clone())),
        });
        (handler, state)
    }

    pub fn detach(&self) {
        self.state.lock().unwrap().take();
    }
}

impl RequestContextHandler for TrackingHandler {
    fn cookie_manager(&self) -> Option<CookieManager> {
        let state = self.state.lock().unwrap().clone()?;
        let expected = state.expected.lock().unwrap().clone();
        state.calls.lock().unwrap().push(expected);
        Some(state.manager.clone())
    }
}

/// Pointer equality between the handler a context reports and the one the
/// test registered.
pub fn same_handler(bound: &Arc<dyn RequestContextHandler>, ours: &Arc<TrackingHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(bound) as *const (),
        Arc::as_ptr(ours) as *const (),
    )
}
