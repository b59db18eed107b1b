use std::fmt;

use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::channel::oneshot::channel as oneshot_channel;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::engine::network::NetworkMessage;
use crate::error::{EmbedError, Result};

/// A single cookie as kept in a context's backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: "/".to_string(),
        }
    }

    /// A cookie scoped to the host of `url`, the way a `document.cookie`
    /// write without an explicit domain lands.
    pub(crate) fn for_url(name: impl Into<String>, value: impl Into<String>, url: &Url) -> Self {
        let mut cookie = Self::new(name, value);
        cookie.domain = url.host_str().unwrap_or_default().to_string();
        cookie
    }
}

/// Identifier of a caller-created cookie store on the IO-role loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn new(id: u64) -> Self {
        StoreId(id)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store{}", self.0)
    }
}

/// Handle onto a cookie store owned by the IO-role loop.
///
/// Cheap to clone; every operation is a message to the loop, so the handle is
/// safe to use from any thread and from [`RequestContextHandler`]
/// implementations.
///
/// [`RequestContextHandler`]: crate::context::RequestContextHandler
#[derive(Clone)]
pub struct CookieManager {
    id: StoreId,
    net: UnboundedSender<NetworkMessage>,
}

impl fmt::Debug for CookieManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CookieManager").field(&self.id).finish()
    }
}

impl CookieManager {
    pub(crate) fn new(id: StoreId, net: UnboundedSender<NetworkMessage>) -> Self {
        Self { id, net }
    }

    pub(crate) fn store_id(&self) -> StoreId {
        self.id
    }

    /// Store `cookie` for `url`. Resolves once the IO-role loop has applied
    /// the write.
    pub async fn set_cookie(&self, url: impl AsRef<str>, cookie: Cookie) -> Result<()> {
        let url = Url::parse(url.as_ref())?;
        let (tx, rx) = oneshot_channel();
        self.net
            .unbounded_send(NetworkMessage::SetCookie {
                store: self.id,
                url,
                cookie,
                tx,
            })
            .map_err(|_| EmbedError::EngineGone)?;
        Ok(rx.await?)
    }

    /// Enumerate every cookie in the store.
    ///
    /// The returned stream is a finite sequence; the stream ending is the
    /// completion signal for this visitation. Order is stable within a single
    /// visitation.
    pub fn visit_all(&self) -> Result<impl Stream<Item = Cookie>> {
        let (tx, rx) = unbounded();
        self.net
            .unbounded_send(NetworkMessage::VisitCookies {
                store: self.id,
                tx,
            })
            .map_err(|_| EmbedError::EngineGone)?;
        Ok(rx)
    }

    /// Collect the whole store into a `Vec`.
    pub async fn all_cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.visit_all()?.collect().await)
    }

    /// Remove every cookie from the store.
    pub async fn clear(&self) -> Result<()> {
        let (tx, rx) = oneshot_channel();
        self.net
            .unbounded_send(NetworkMessage::ClearCookies {
                store: self.id,
                tx,
            })
            .map_err(|_| EmbedError::EngineGone)?;
        Ok(rx.await?)
    }
}

/// In-memory cookie jar, the backing representation of every store.
///
/// Insertion order is preserved, which is what makes visitation order stable.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    /// Insert `cookie`, replacing an existing cookie with the same name,
    /// domain and path in place.
    pub(crate) fn set(&mut self, cookie: Cookie) {
        if let Some(existing) = self.cookies.iter_mut().find(|c| {
            c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
        }) {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.cookies.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.cookies.len()
    }
}
