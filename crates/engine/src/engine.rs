//! Drive engine
//!
//! Entry point for callers. Owns the registry, polls the platform and routes
//! mount operations through the [`MountController`]. Cloning is cheap and all
//! clones share the same state.

use crate::filter::DeviceFilter;
use crate::identity;
use crate::mount::{MountController, MountOptions};
use crate::platform::Platform;
use crate::registry::DeviceRegistry;
use common::{EventPublisher, EventSubscriber};
use records::{DeviceRecord, DriveError, RawDeviceDescriptor, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Engine settings
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Devices that pass this filter are tracked, everything else is ignored
    pub filter: DeviceFilter,
    pub mount: MountOptions,
}

struct Inner {
    platform: Arc<dyn Platform>,
    registry: Arc<DeviceRegistry>,
    filter: DeviceFilter,
    events: EventPublisher,
    mounts: MountController,
}

/// USB drive lifecycle engine
#[derive(Clone)]
pub struct DriveEngine {
    inner: Arc<Inner>,
}

impl DriveEngine {
    /// Create an engine with default options
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self::with_options(platform, EngineOptions::default())
    }

    pub fn with_options(platform: Arc<dyn Platform>, options: EngineOptions) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let events = EventPublisher::new();
        let mounts = MountController::new(
            platform.clone(),
            registry.clone(),
            events.clone(),
            options.mount,
        );

        Self {
            inner: Arc::new(Inner {
                platform,
                registry,
                filter: options.filter,
                events,
                mounts,
            }),
        }
    }

    /// Name of the platform backend in use
    pub fn platform_name(&self) -> &'static str {
        self.inner.platform.name()
    }

    /// Enumerate attached devices and reconcile the registry
    ///
    /// Returns every tracked device, sorted by id. If the platform query
    /// fails the registry is left untouched.
    pub async fn poll_devices(&self) -> Result<Vec<DeviceRecord>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.poll_blocking())
            .await
            .map_err(|e| DriveError::PlatformQuery(format!("poll task failed: {}", e)))?
    }

    /// Registry entry for `id`, as of the last poll or mount operation
    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.inner.registry.get(id)
    }

    /// Every tracked device, sorted by id
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.inner.registry.snapshot()
    }

    pub async fn unmount(&self, id: &str) -> Result<()> {
        self.inner.mounts.unmount(id).await
    }

    /// Mount a device at `target`, or below the mount root if `None`
    pub async fn mount(&self, id: &str, target: Option<PathBuf>) -> Result<String> {
        self.inner.mounts.mount(id, target).await
    }

    /// New subscription to attach, detach and mount events
    ///
    /// Receives only events published after this call. Events are dropped
    /// for a subscription whose queue is full.
    pub fn subscribe(&self) -> EventSubscriber {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn poll_blocking(&self) -> Result<Vec<DeviceRecord>> {
        let observed_at = self.registry.tick();

        let descriptors = self.platform.list_attached_devices().map_err(|e| {
            warn!("Device enumeration failed: {}", e);
            DriveError::PlatformQuery(e.to_string())
        })?;

        let (allowed, ignored): (Vec<RawDeviceDescriptor>, Vec<RawDeviceDescriptor>) =
            descriptors
                .into_iter()
                .partition(|d| self.filter.allows(d.vendor_code, d.product_code));
        for device in &ignored {
            debug!(
                "Device ignored by filter: slot={}, vid={:#06x}, pid={:#06x}",
                device.slot, device.vendor_code, device.product_code
            );
        }

        let records = identity::resolve_all(allowed);
        let reconciliation = self.registry.reconcile(records, observed_at);

        for event in reconciliation.events {
            self.events.publish(event);
        }

        debug!(
            "Poll {} done: {} devices tracked{}",
            observed_at,
            reconciliation.snapshot.len(),
            if reconciliation.stale { " (stale)" } else { "" }
        );
        Ok(reconciliation.snapshot)
    }
}
