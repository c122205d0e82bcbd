//! Device discovery.
//!
//! A [`DeviceRegistry`] is created once at startup and passed by reference
//! to every [`Program`](crate::program::Program) built on it. Discovery runs
//! lazily on first use and exactly once per registry: it picks a platform,
//! enumerates devices (GPUs first, CPUs as fallback), creates one shared
//! context and one queue per device, and caches each device's capability
//! record. The resulting device list never changes afterwards.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{ComputeBackend, DeviceKind, DeviceProperties};
use crate::config::DiscoveryConfig;
use crate::error::{ComputeError, Result};
use crate::resource::StatusExt;
use crate::status::Status;

/// A discovered device with its queue.
pub struct Device<B: ComputeBackend> {
    id: usize,
    properties: DeviceProperties,
    raw: B::DeviceId,
    context: Arc<B::Context>,
    queue: Arc<B::Queue>,
}

impl<B: ComputeBackend> Device<B> {
    /// Registry-local device id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Full capability record.
    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.properties.name
    }

    /// Vendor name.
    pub fn vendor(&self) -> &str {
        &self.properties.vendor
    }

    /// Device version string.
    pub fn version(&self) -> &str {
        &self.properties.version
    }

    /// Driver version string.
    pub fn driver_version(&self) -> &str {
        &self.properties.driver_version
    }

    /// Device class.
    pub fn kind(&self) -> DeviceKind {
        self.properties.kind
    }

    /// Number of compute units.
    pub fn max_compute_units(&self) -> u32 {
        self.properties.max_compute_units
    }

    /// Global memory in bytes.
    pub fn global_mem_size(&self) -> u64 {
        self.properties.global_mem_size
    }

    /// Local memory in bytes.
    pub fn local_mem_size(&self) -> u64 {
        self.properties.local_mem_size
    }

    /// Largest single allocation in bytes.
    pub fn max_mem_alloc_size(&self) -> u64 {
        self.properties.max_mem_alloc_size
    }

    /// Maximum work-items per work-group.
    pub fn max_work_group_size(&self) -> usize {
        self.properties.max_work_group_size
    }

    /// Maximum number of work dimensions.
    pub fn max_work_item_dimensions(&self) -> u32 {
        self.properties.max_work_item_dimensions
    }

    /// Maximum work-items per dimension.
    pub fn max_work_item_sizes(&self) -> &[usize] {
        &self.properties.max_work_item_sizes
    }

    /// Largest work-group extent usable along `dim`, capped at `cap`.
    ///
    /// Returns 0 if the device has no such dimension.
    pub fn max_local_size(&self, dim: usize, cap: usize) -> usize {
        self.properties
            .max_work_item_sizes
            .get(dim)
            .map_or(0, |&size| size.min(cap).min(self.properties.max_work_group_size))
    }

    /// Check a work-group geometry against the device limits.
    pub fn fits_local_dimensions(&self, local: &[usize]) -> bool {
        let props = &self.properties;
        local.len() <= props.max_work_item_dimensions as usize
            && local.len() <= props.max_work_item_sizes.len()
            && local
                .iter()
                .zip(&props.max_work_item_sizes)
                .all(|(size, max)| size <= max)
            && local.iter().product::<usize>() <= props.max_work_group_size
    }

    /// Backend device id.
    pub fn raw(&self) -> &B::DeviceId {
        &self.raw
    }

    /// Context the device belongs to.
    pub fn context(&self) -> &Arc<B::Context> {
        &self.context
    }

    /// The device's command queue.
    pub fn queue(&self) -> &Arc<B::Queue> {
        &self.queue
    }
}

impl<B: ComputeBackend> fmt::Debug for Device<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Result of one discovery run.
struct Discovery<B: ComputeBackend> {
    kind: DeviceKind,
    devices: Vec<Arc<Device<B>>>,
}

/// Registry of the devices of one backend.
pub struct DeviceRegistry<B: ComputeBackend> {
    backend: Arc<B>,
    config: DiscoveryConfig,
    state: OnceLock<Discovery<B>>,
    init: Mutex<()>,
}

impl<B: ComputeBackend> DeviceRegistry<B> {
    /// Create a registry; discovery runs on first use.
    pub fn new(backend: B, config: DiscoveryConfig) -> Self {
        Self::from_shared(Arc::new(backend), config)
    }

    /// Create a registry with the default discovery configuration.
    pub fn with_defaults(backend: B) -> Self {
        Self::new(backend, DiscoveryConfig::default())
    }

    /// Create a registry over an already shared backend.
    pub fn from_shared(backend: Arc<B>, config: DiscoveryConfig) -> Self {
        Self {
            backend,
            config,
            state: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Discovery configuration.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Run discovery if it has not run yet and return the devices.
    ///
    /// A failed discovery is not cached; the next call retries.
    pub fn discover(&self) -> Result<&[Arc<Device<B>>]> {
        Ok(&self.discovery()?.devices)
    }

    /// All discovered devices.
    pub fn devices(&self) -> Result<&[Arc<Device<B>>]> {
        self.discover()
    }

    /// Number of discovered devices.
    pub fn device_count(&self) -> Result<usize> {
        Ok(self.discover()?.len())
    }

    /// Device class that discovery settled on.
    pub fn device_kind(&self) -> Result<DeviceKind> {
        Ok(self.discovery()?.kind)
    }

    /// Device by registry id.
    pub fn device(&self, id: usize) -> Result<Arc<Device<B>>> {
        self.discover()?
            .get(id)
            .cloned()
            .ok_or(ComputeError::DeviceNotFound(id))
    }

    fn discovery(&self) -> Result<&Discovery<B>> {
        if let Some(state) = self.state.get() {
            return Ok(state);
        }

        let _guard = self.init.lock();
        if let Some(state) = self.state.get() {
            return Ok(state);
        }

        let discovered = self.run_discovery()?;
        Ok(self.state.get_or_init(|| discovered))
    }

    fn run_discovery(&self) -> Result<Discovery<B>> {
        let backend = &self.backend;
        info!("Discovering compute devices on {} backend", backend.name());

        let platforms = backend.platforms().raise("clGetPlatformIDs")?;
        let platform = platforms.get(self.config.platform_index).ok_or_else(|| {
            ComputeError::no_devices(format!(
                "platform {} not found ({} available)",
                self.config.platform_index,
                platforms.len()
            ))
        })?;

        let (kind, ids) = self.enumerate(platform)?;
        debug!("Found {} {} device(s)", ids.len(), kind);

        let context = Arc::new(backend.create_context(&ids).raise("clCreateContext")?);

        let mut devices = Vec::with_capacity(ids.len());
        for (index, raw) in ids.into_iter().enumerate() {
            let queue = match backend.create_queue(&context, &raw, self.config.profiling) {
                Ok(queue) => queue,
                Err(status) => {
                    warn!(
                        "Could not create command queue for device {}: {}; skipping",
                        index, status
                    );
                    continue;
                }
            };

            let properties = backend
                .device_properties(&raw)
                .raise("clGetDeviceInfo")?;
            info!(
                "Device {}: {} ({}), {} compute units, max work-group size {}",
                devices.len(),
                properties.name,
                properties.vendor,
                properties.max_compute_units,
                properties.max_work_group_size
            );

            devices.push(Arc::new(Device {
                id: devices.len(),
                properties,
                raw,
                context: Arc::clone(&context),
                queue: Arc::new(queue),
            }));
        }

        if devices.is_empty() {
            return Err(ComputeError::no_devices(
                "could not create a command queue for any present device",
            ));
        }

        Ok(Discovery { kind, devices })
    }

    fn enumerate(&self, platform: &B::Platform) -> Result<(DeviceKind, Vec<B::DeviceId>)> {
        let preferred = self.config.preferred_device;
        match self.backend.devices(platform, preferred) {
            Ok(ids) if !ids.is_empty() => return Ok((preferred, ids)),
            Ok(_) | Err(Status::DEVICE_NOT_FOUND) => {}
            Err(status) => return Err(ComputeError::resource("clGetDeviceIDs", status)),
        }

        if !self.config.fallback_to_cpu || preferred == DeviceKind::Cpu {
            return Err(ComputeError::no_devices(format!(
                "no {} devices found",
                preferred
            )));
        }

        info!("No {} devices found, looking for CPU devices", preferred);
        match self.backend.devices(platform, DeviceKind::Cpu) {
            Ok(ids) if !ids.is_empty() => Ok((DeviceKind::Cpu, ids)),
            Ok(_) | Err(Status::DEVICE_NOT_FOUND) => Err(ComputeError::no_devices(format!(
                "no {} or CPU devices found",
                preferred
            ))),
            Err(status) => Err(ComputeError::resource("clGetDeviceIDs", status)),
        }
    }
}

impl<B: ComputeBackend> fmt::Debug for DeviceRegistry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("backend", &self.backend.name())
            .field("discovered", &self.state.get().map(|d| d.devices.len()))
            .finish()
    }
}
