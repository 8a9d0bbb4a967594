//! Common utilities for usbdrive
//!
//! This crate provides shared functionality between the engine and the CLI,
//! including error handling, logging setup, the device event channel and
//! test helpers.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{EVENT_CHANNEL_CAPACITY, EventPublisher, EventSubscriber, create_event_channel};
pub use error::{Error, Result};
pub use logging::setup_logging;
