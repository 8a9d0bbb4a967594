//! Device management error types

use crate::types::DeviceId;
use thiserror::Error;

/// Errors returned by engine operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriveError {
    /// The OS enumeration subsystem could not be queried
    #[error("Platform query failed: {0}")]
    PlatformQuery(String),

    /// No device with this id is known
    #[error("Device not found: {id}")]
    DeviceNotFound { id: DeviceId },

    /// Unmount requested on a device without a mount point
    #[error("Device {id} is not mounted")]
    AlreadyUnmounted { id: DeviceId },

    /// Mount requested on a device that already has a mount point
    #[error("Device {id} is already mounted at {mount}")]
    AlreadyMounted { id: DeviceId, mount: String },

    /// The OS refused the unmount
    #[error("Failed to unmount {id}: {reason}")]
    UnmountFailed { id: DeviceId, reason: String },

    /// The OS refused the mount
    #[error("Failed to mount {id}: {reason}")]
    MountFailed { id: DeviceId, reason: String },
}

impl DriveError {
    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriveError::PlatformQuery(_)
                | DriveError::UnmountFailed { .. }
                | DriveError::MountFailed { .. }
        )
    }
}

/// Type alias for engine results
pub type Result<T> = std::result::Result<T, DriveError>;
