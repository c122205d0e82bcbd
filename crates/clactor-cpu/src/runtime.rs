//! CPU backend implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use clactor_core::backend::{
    BackendResult, BuildFailure, CompletionCallback, ComputeBackend, DeviceKind, DeviceProperties,
    HostBytes, MemAccess, NdRange,
};
use clactor_core::status::Status;

use crate::event::CpuEvent;
use crate::kernel::{CpuKernelFn, KernelFault, KernelInvocation, KernelLaunch};
use crate::memory::{CpuBuffer, CpuMemory};
use crate::queue::{Action, CpuQueue, ReadSlot};
use crate::source::{self, BuildOptions, KernelTable};

/// Capability record and behaviour of one emulated device.
#[derive(Debug, Clone)]
pub struct CpuDeviceSpec {
    properties: DeviceProperties,
    fail_queue_creation: bool,
}

impl CpuDeviceSpec {
    /// A CPU device with host-like limits.
    pub fn cpu(name: impl Into<String>) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4);
        Self::with_kind(name.into(), DeviceKind::Cpu, cores, 1 << 30)
    }

    /// A GPU-class device.
    pub fn gpu(name: impl Into<String>) -> Self {
        Self::with_kind(name.into(), DeviceKind::Gpu, 16, 2 << 30)
    }

    /// A dedicated accelerator.
    pub fn accelerator(name: impl Into<String>) -> Self {
        Self::with_kind(name.into(), DeviceKind::Accelerator, 8, 1 << 30)
    }

    fn with_kind(name: String, kind: DeviceKind, compute_units: u32, global_mem: u64) -> Self {
        Self {
            properties: DeviceProperties {
                name,
                vendor: "clactor".to_string(),
                version: "OpenCL 1.2 clactor-cpu".to_string(),
                driver_version: env!("CARGO_PKG_VERSION").to_string(),
                kind,
                max_compute_units: compute_units,
                max_clock_frequency: 1000,
                global_mem_size: global_mem,
                local_mem_size: 32 * 1024,
                max_mem_alloc_size: global_mem / 4,
                max_work_group_size: 256,
                max_work_item_dimensions: 3,
                max_work_item_sizes: vec![256, 256, 64],
            },
            fail_queue_creation: false,
        }
    }

    /// Set the vendor name.
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.properties.vendor = vendor.into();
        self
    }

    /// Set the number of compute units.
    pub fn with_compute_units(mut self, units: u32) -> Self {
        self.properties.max_compute_units = units;
        self
    }

    /// Set the work-group size limit.
    pub fn with_max_work_group_size(mut self, size: usize) -> Self {
        self.properties.max_work_group_size = size;
        self
    }

    /// Set the per-dimension work-item limits; also sets the dimension limit.
    pub fn with_max_work_item_sizes(mut self, sizes: impl Into<Vec<usize>>) -> Self {
        self.properties.max_work_item_sizes = sizes.into();
        self.properties.max_work_item_dimensions = self.properties.max_work_item_sizes.len() as u32;
        self
    }

    /// Set the global memory size.
    pub fn with_global_mem_size(mut self, bytes: u64) -> Self {
        self.properties.global_mem_size = bytes;
        self
    }

    /// Set the largest single allocation.
    pub fn with_max_mem_alloc_size(mut self, bytes: u64) -> Self {
        self.properties.max_mem_alloc_size = bytes;
        self
    }

    /// Make command queue creation fail for this device.
    pub fn failing_queue_creation(mut self) -> Self {
        self.fail_queue_creation = true;
        self
    }

    /// Capability record of the device.
    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }
}

/// One emulated platform and its devices.
#[derive(Debug, Clone)]
pub struct CpuPlatformSpec {
    name: String,
    devices: Vec<CpuDeviceSpec>,
}

impl CpuPlatformSpec {
    /// An empty platform.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            devices: Vec::new(),
        }
    }

    /// Add a device.
    pub fn device(mut self, device: CpuDeviceSpec) -> Self {
        self.devices.push(device);
        self
    }

    /// Platform name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Backend call that can be made to fail once with [`CpuBackend::inject_fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Platform enumeration.
    Platforms,
    /// Context creation.
    CreateContext,
    /// Buffer allocation.
    CreateBuffer,
    /// Host-to-device write.
    EnqueueWrite,
    /// Kernel argument binding.
    SetKernelArg,
    /// Kernel launch.
    EnqueueKernel,
    /// Device-to-host read.
    EnqueueRead,
    /// Marker enqueue.
    EnqueueMarker,
    /// Completion callback registration.
    SetEventCallback,
    /// Execution of the next launched kernel; its event fails.
    KernelExecution,
}

/// Counters of backend activity.
#[derive(Debug, Default)]
struct CpuStats {
    platform_queries: AtomicU64,
    programs_built: AtomicU64,
    build_failures: AtomicU64,
    buffers_created: AtomicU64,
    kernels_enqueued: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

/// Snapshot of backend counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStatsSnapshot {
    /// Platform enumerations.
    pub platform_queries: u64,
    /// Successful program builds.
    pub programs_built: u64,
    /// Failed program builds.
    pub build_failures: u64,
    /// Buffers allocated.
    pub buffers_created: u64,
    /// Kernel launches enqueued.
    pub kernels_enqueued: u64,
    /// Bytes enqueued for host-to-device copies.
    pub bytes_written: u64,
    /// Bytes enqueued for device-to-host copies.
    pub bytes_read: u64,
}

/// Platform handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuPlatformId(usize);

/// Device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDeviceId {
    platform: usize,
    index: usize,
}

impl CpuDeviceId {
    pub(crate) fn new(platform: usize, index: usize) -> Self {
        Self { platform, index }
    }

    /// Platform index.
    pub fn platform(&self) -> usize {
        self.platform
    }

    /// Index on the platform.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for CpuDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.platform, self.index)
    }
}

/// Context over devices of one platform.
#[derive(Debug)]
pub struct CpuContext {
    devices: Vec<CpuDeviceId>,
    max_alloc: u64,
}

/// A scanned program.
#[derive(Debug)]
pub struct CpuProgram {
    device: CpuDeviceId,
    kernels: KernelTable,
    options: BuildOptions,
    defines: Arc<HashMap<String, String>>,
}

impl CpuProgram {
    /// Kernels the source declares.
    pub fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    /// Parsed build options.
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Device the program was built for.
    pub fn device(&self) -> CpuDeviceId {
        self.device
    }
}

/// Kernel with its argument bindings.
pub struct CpuKernel {
    name: Arc<str>,
    func: CpuKernelFn,
    defines: Arc<HashMap<String, String>>,
    args: Mutex<Vec<Option<Arc<CpuMemory>>>>,
}

impl CpuKernel {
    /// Kernel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of parameters.
    pub fn arity(&self) -> usize {
        self.args.lock().len()
    }
}

impl fmt::Debug for CpuKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuKernel")
            .field("name", &self.name)
            .field("arity", &self.arity())
            .finish()
    }
}

/// Pending result of a device-to-host read.
#[derive(Debug)]
pub struct CpuReadback(ReadSlot);

/// Emulated compute backend.
///
/// Kernels are host closures registered by name. A program build scans the
/// source for errors and `__kernel` declarations; a kernel can be created
/// when the source declares it and a host implementation is registered.
pub struct CpuBackend {
    platforms: Vec<CpuPlatformSpec>,
    kernels: RwLock<HashMap<String, CpuKernelFn>>,
    faults: Mutex<HashMap<FaultPoint, Status>>,
    stats: CpuStats,
}

impl CpuBackend {
    /// Backend with one platform holding one CPU device and no kernels.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a backend.
    pub fn builder() -> CpuBackendBuilder {
        CpuBackendBuilder::default()
    }

    /// Register the host implementation of kernel `name`.
    pub fn register_kernel<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&mut KernelInvocation<'_>) -> Result<(), KernelFault> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registered host kernel '{}'", name);
        self.kernels.write().insert(name, Arc::new(func));
    }

    /// Make the next call at `point` fail with `status`.
    pub fn inject_fault(&self, point: FaultPoint, status: Status) {
        debug!("Injecting {} at {:?}", status, point);
        self.faults.lock().insert(point, status);
    }

    /// Counters of backend activity.
    pub fn stats(&self) -> CpuStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CpuStatsSnapshot {
            platform_queries: load(&self.stats.platform_queries),
            programs_built: load(&self.stats.programs_built),
            build_failures: load(&self.stats.build_failures),
            buffers_created: load(&self.stats.buffers_created),
            kernels_enqueued: load(&self.stats.kernels_enqueued),
            bytes_written: load(&self.stats.bytes_written),
            bytes_read: load(&self.stats.bytes_read),
        }
    }

    fn fault(&self, point: FaultPoint) -> BackendResult<()> {
        match self.faults.lock().remove(&point) {
            Some(status) => {
                trace!("Injected fault {} at {:?}", status, point);
                Err(status)
            }
            None => Ok(()),
        }
    }

    fn device_spec(&self, id: &CpuDeviceId) -> BackendResult<&CpuDeviceSpec> {
        self.platforms
            .get(id.platform)
            .and_then(|p| p.devices.get(id.index))
            .ok_or(Status::INVALID_DEVICE)
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuBackend")
            .field("platforms", &self.platforms)
            .field("kernels", &self.kernels.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`CpuBackend`].
#[derive(Default)]
pub struct CpuBackendBuilder {
    platforms: Vec<CpuPlatformSpec>,
    kernels: HashMap<String, CpuKernelFn>,
}

impl CpuBackendBuilder {
    /// Add a platform.
    pub fn platform(mut self, platform: CpuPlatformSpec) -> Self {
        self.platforms.push(platform);
        self
    }

    /// Add a device to the last platform, creating one if needed.
    pub fn device(mut self, device: CpuDeviceSpec) -> Self {
        if self.platforms.is_empty() {
            self.platforms.push(CpuPlatformSpec::new("clactor emulated platform"));
        }
        if let Some(platform) = self.platforms.last_mut() {
            platform.devices.push(device);
        }
        self
    }

    /// Register the host implementation of kernel `name`.
    pub fn kernel<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut KernelInvocation<'_>) -> Result<(), KernelFault> + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(func));
        self
    }

    /// Build the backend. Without platforms, one platform with a single CPU
    /// device is created.
    pub fn build(self) -> CpuBackend {
        let platforms = if self.platforms.is_empty() {
            vec![CpuPlatformSpec::new("clactor emulated platform")
                .device(CpuDeviceSpec::cpu("clactor emulated CPU"))]
        } else {
            self.platforms
        };

        info!(
            "Initializing CPU backend ({} platform(s), {} kernel(s))",
            platforms.len(),
            self.kernels.len()
        );

        CpuBackend {
            platforms,
            kernels: RwLock::new(self.kernels),
            faults: Mutex::new(HashMap::new()),
            stats: CpuStats::default(),
        }
    }
}

fn validate_range(range: &NdRange<'_>, properties: &DeviceProperties) -> BackendResult<()> {
    let dims = range.work_dim();
    if dims == 0 || dims > properties.max_work_item_dimensions as usize {
        return Err(Status::INVALID_WORK_DIMENSION);
    }
    if range.global.iter().any(|&g| g == 0) {
        return Err(Status::INVALID_GLOBAL_WORK_SIZE);
    }
    if let Some(offsets) = range.offsets {
        if offsets.len() != dims {
            return Err(Status::INVALID_GLOBAL_OFFSET);
        }
    }
    if let Some(local) = range.local {
        if local.len() != dims {
            return Err(Status::INVALID_WORK_GROUP_SIZE);
        }
        for (dim, (&l, &g)) in local.iter().zip(range.global).enumerate() {
            if l == 0 || g % l != 0 {
                return Err(Status::INVALID_WORK_GROUP_SIZE);
            }
            if properties
                .max_work_item_sizes
                .get(dim)
                .is_some_and(|&max| l > max)
            {
                return Err(Status::INVALID_WORK_ITEM_SIZE);
            }
        }
        if local.iter().product::<usize>() > properties.max_work_group_size {
            return Err(Status::INVALID_WORK_GROUP_SIZE);
        }
    }
    Ok(())
}

impl ComputeBackend for CpuBackend {
    type Platform = CpuPlatformId;
    type DeviceId = CpuDeviceId;
    type Context = CpuContext;
    type Queue = CpuQueue;
    type Program = CpuProgram;
    type Kernel = CpuKernel;
    type Buffer = CpuBuffer;
    type Event = CpuEvent;
    type Readback = CpuReadback;

    fn name(&self) -> &str {
        "CPU"
    }

    fn platforms(&self) -> BackendResult<Vec<CpuPlatformId>> {
        self.stats.platform_queries.fetch_add(1, Ordering::Relaxed);
        self.fault(FaultPoint::Platforms)?;
        Ok((0..self.platforms.len()).map(CpuPlatformId).collect())
    }

    fn devices(&self, platform: &CpuPlatformId, kind: DeviceKind) -> BackendResult<Vec<CpuDeviceId>> {
        let spec = self.platforms.get(platform.0).ok_or(Status::INVALID_PLATFORM)?;
        let ids: Vec<_> = spec
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.properties.kind == kind)
            .map(|(index, _)| CpuDeviceId::new(platform.0, index))
            .collect();
        if ids.is_empty() {
            return Err(Status::DEVICE_NOT_FOUND);
        }
        Ok(ids)
    }

    fn device_properties(&self, device: &CpuDeviceId) -> BackendResult<DeviceProperties> {
        Ok(self.device_spec(device)?.properties.clone())
    }

    fn create_context(&self, devices: &[CpuDeviceId]) -> BackendResult<CpuContext> {
        self.fault(FaultPoint::CreateContext)?;
        let first = devices.first().ok_or(Status::INVALID_VALUE)?;
        let mut max_alloc = u64::MAX;
        for device in devices {
            if device.platform != first.platform {
                return Err(Status::INVALID_DEVICE);
            }
            max_alloc = max_alloc.min(self.device_spec(device)?.properties.max_mem_alloc_size);
        }
        Ok(CpuContext {
            devices: devices.to_vec(),
            max_alloc,
        })
    }

    fn create_queue(
        &self,
        context: &CpuContext,
        device: &CpuDeviceId,
        profiling: bool,
    ) -> BackendResult<CpuQueue> {
        if !context.devices.contains(device) {
            return Err(Status::INVALID_DEVICE);
        }
        if self.device_spec(device)?.fail_queue_creation {
            return Err(Status::OUT_OF_RESOURCES);
        }
        CpuQueue::new(*device, profiling)
    }

    fn build_program(
        &self,
        context: &CpuContext,
        device: &CpuDeviceId,
        source: &str,
        options: Option<&str>,
    ) -> Result<CpuProgram, BuildFailure> {
        if !context.devices.contains(device) {
            return Err(Status::INVALID_DEVICE.into());
        }
        let options = BuildOptions::parse(options.unwrap_or_default()).map_err(|status| {
            self.stats.build_failures.fetch_add(1, Ordering::Relaxed);
            BuildFailure::from(status)
        })?;
        let kernels = source::scan(source).map_err(|log| {
            self.stats.build_failures.fetch_add(1, Ordering::Relaxed);
            BuildFailure::new(Status::BUILD_PROGRAM_FAILURE, log)
        })?;

        self.stats.programs_built.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Built program for device {} with {} kernel(s)",
            device,
            kernels.len()
        );
        let defines = Arc::new(options.defines.clone());
        Ok(CpuProgram {
            device: *device,
            kernels,
            options,
            defines,
        })
    }

    fn create_kernel(&self, program: &CpuProgram, name: &str) -> BackendResult<CpuKernel> {
        let arity = program.kernels.arity(name).ok_or(Status::INVALID_KERNEL_NAME)?;
        let func = match self.kernels.read().get(name) {
            Some(func) => Arc::clone(func),
            None => {
                warn!("Kernel '{}' is declared but has no host implementation", name);
                return Err(Status::INVALID_KERNEL);
            }
        };
        Ok(CpuKernel {
            name: Arc::from(name),
            func,
            defines: Arc::clone(&program.defines),
            args: Mutex::new(vec![None; arity]),
        })
    }

    fn create_buffer(
        &self,
        context: &CpuContext,
        access: MemAccess,
        size: usize,
    ) -> BackendResult<CpuBuffer> {
        self.fault(FaultPoint::CreateBuffer)?;
        if size == 0 || size as u64 > context.max_alloc {
            return Err(Status::INVALID_BUFFER_SIZE);
        }
        self.stats.buffers_created.fetch_add(1, Ordering::Relaxed);
        Ok(CpuBuffer::new(size, access))
    }

    fn enqueue_write(
        &self,
        queue: &CpuQueue,
        buffer: &CpuBuffer,
        data: HostBytes,
        wait: &[&CpuEvent],
    ) -> BackendResult<CpuEvent> {
        self.fault(FaultPoint::EnqueueWrite)?;
        if data.len() > buffer.size() {
            return Err(Status::INVALID_VALUE);
        }
        self.stats
            .bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        queue.submit(
            Action::Write {
                memory: Arc::clone(buffer.memory()),
                data,
            },
            wait,
        )
    }

    fn set_kernel_arg(&self, kernel: &CpuKernel, index: u32, buffer: &CpuBuffer) -> BackendResult<()> {
        self.fault(FaultPoint::SetKernelArg)?;
        let mut args = kernel.args.lock();
        let slot = args
            .get_mut(index as usize)
            .ok_or(Status::INVALID_ARG_INDEX)?;
        *slot = Some(Arc::clone(buffer.memory()));
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &CpuQueue,
        kernel: &CpuKernel,
        range: &NdRange<'_>,
        wait: &[&CpuEvent],
    ) -> BackendResult<CpuEvent> {
        self.fault(FaultPoint::EnqueueKernel)?;
        validate_range(range, &self.device_spec(&queue.device())?.properties)?;

        let args = kernel
            .args
            .lock()
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(Status::INVALID_KERNEL_ARGS)?;

        self.stats.kernels_enqueued.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Enqueue kernel '{}' on device {} (global={:?}, local={:?})",
            kernel.name,
            queue.device(),
            range.global,
            range.local
        );

        let action = match self.fault(FaultPoint::KernelExecution) {
            Err(status) => Action::Fail {
                label: "kernel",
                status,
            },
            Ok(()) => Action::Kernel(KernelLaunch {
                name: Arc::clone(&kernel.name),
                func: Arc::clone(&kernel.func),
                defines: Arc::clone(&kernel.defines),
                args,
                global: range.global.to_vec(),
                offsets: range.offsets.map(<[usize]>::to_vec).unwrap_or_default(),
                local: range.local.map(<[usize]>::to_vec).unwrap_or_default(),
            }),
        };
        queue.submit(action, wait)
    }

    fn enqueue_read(
        &self,
        queue: &CpuQueue,
        buffer: &CpuBuffer,
        size: usize,
        wait: &[&CpuEvent],
    ) -> BackendResult<(CpuEvent, CpuReadback)> {
        self.fault(FaultPoint::EnqueueRead)?;
        if size > buffer.size() {
            return Err(Status::INVALID_VALUE);
        }
        self.stats
            .bytes_read
            .fetch_add(size as u64, Ordering::Relaxed);
        let slot = ReadSlot::default();
        let event = queue.submit(
            Action::Read {
                memory: Arc::clone(buffer.memory()),
                size,
                slot: Arc::clone(&slot),
            },
            wait,
        )?;
        Ok((event, CpuReadback(slot)))
    }

    fn enqueue_marker(&self, queue: &CpuQueue, wait: &[&CpuEvent]) -> BackendResult<CpuEvent> {
        self.fault(FaultPoint::EnqueueMarker)?;
        queue.submit(Action::Marker, wait)
    }

    fn on_complete(&self, event: &CpuEvent, callback: CompletionCallback) -> BackendResult<()> {
        self.fault(FaultPoint::SetEventCallback)?;
        event.on_complete(callback);
        Ok(())
    }

    fn flush(&self, _queue: &CpuQueue) -> BackendResult<()> {
        Ok(())
    }

    fn take_readback(&self, readback: CpuReadback) -> BackendResult<Vec<u8>> {
        readback.0.lock().take().ok_or(Status::INVALID_OPERATION)
    }
}
