//! USB storage device lifecycle engine
//!
//! Enumerates attached USB mass-storage devices through a [`Platform`]
//! backend, gives each a stable identifier, keeps a registry of what is
//! attached and where it is mounted, and mounts or unmounts on request.
//!
//! # Example
//!
//! ```
//! use engine::{DriveEngine, MockPlatform};
//! use common::test_utils::foobar_descriptor;
//! use std::sync::Arc;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let platform = Arc::new(MockPlatform::with_devices(vec![foobar_descriptor()]));
//!     let engine = DriveEngine::new(platform);
//!
//!     let devices = engine.poll_devices().await.unwrap();
//!     assert_eq!(devices[0].id.as_str(), "0x0a-0x12-IDQFB0023AB");
//!
//!     engine.unmount("0x0a-0x12-IDQFB0023AB").await.unwrap();
//!     assert!(engine.get("0x0a-0x12-IDQFB0023AB").unwrap().mount.is_none());
//! });
//! ```

pub mod engine;
pub mod filter;
pub mod identity;
pub mod mount;
pub mod platform;
pub mod registry;

pub use engine::{DriveEngine, EngineOptions};
pub use filter::{DeviceFilter, FilterError};
pub use identity::{Identity, resolve, resolve_all};
pub use mount::MountOptions;
pub use platform::{
    BackendKind, EnumerationGate, LibusbPlatform, MockPlatform, Platform, PlatformError,
    PlatformPaths, open_platform,
};
#[cfg(target_os = "linux")]
pub use platform::SysfsPlatform;
