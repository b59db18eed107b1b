use std::io;

use futures::channel::oneshot::Canceled;
use thiserror::Error;

use crate::browser::BrowserId;

#[derive(Debug, Error)]
pub enum EmbedError {
    /// The event loops are no longer being driven; the handle is stale.
    #[error("engine event loop has terminated")]
    EngineGone,
    #[error("{0}")]
    Canceled(#[from] Canceled),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Url(#[from] url::ParseError),
    #[error("no browser with id {0}")]
    BrowserNotFound(BrowserId),
}

pub type Result<T> = std::result::Result<T, EmbedError>;
