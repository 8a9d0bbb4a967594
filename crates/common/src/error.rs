//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Every publisher is gone, no more events will arrive
    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
