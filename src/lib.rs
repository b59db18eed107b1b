//! Embedding SDK core built around isolated request contexts.
//!
//! A [`RequestContext`] is an isolated set of browsing state (cookies, cache,
//! storage) identified by an opaque token. Browser sessions are bound to a
//! context at creation and keep it for their whole lifetime; popups inherit
//! their opener's context. A caller-supplied [`RequestContextHandler`] can
//! swap in its own [`CookieManager`] per context, and is consulted on the
//! IO-role loop whenever a navigation needs a store.
//!
//! [`Embedder::launch`] returns the embedder handle together with the two
//! event loops that drive it, the UI-role [`Engine`] and the IO-role
//! [`NetworkService`]. Both are plain `Stream`s and do nothing unless
//! polled:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use embedium::{Embedder, EmbedderConfig, EmbedderClient, RequestContext};
//! use futures::StreamExt;
//!
//! struct Client;
//! impl EmbedderClient for Client {}
//!
//! #[tokio::main]
//! async fn main() -> embedium::Result<()> {
//!     let (embedder, mut engine, mut network) = Embedder::launch(EmbedderConfig::default());
//!     tokio::spawn(async move { while engine.next().await.is_some() {} });
//!     tokio::spawn(async move { while network.next().await.is_some() {} });
//!
//!     let context = RequestContext::create(None);
//!     let browser = embedder
//!         .create_browser("http://example.com/", Some(context.clone()), Arc::new(Client))
//!         .await?;
//!     assert!(browser.request_context().is_same(&context));
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod client;
pub mod context;
pub mod cookies;
pub mod engine;
pub mod error;
pub mod resources;

pub use crate::browser::{
    Browser, BrowserId, Embedder, EmbedderConfig, EmbedderConfigBuilder, Point,
    PopupContextPolicy, ProcessId, REQUEST_TIMEOUT,
};
pub use crate::client::{EmbedderClient, Frame, PopupDecision, PopupFeatures};
pub use crate::context::{ContextId, RequestContext, RequestContextHandler};
pub use crate::cookies::{Cookie, CookieManager};
pub use crate::engine::{Engine, EngineEvent, NetworkEvent, NetworkService};
pub use crate::error::{EmbedError, Result};
pub use crate::resources::{Resource, ResourceMap, ResourceSource};
