//! Compute backend abstraction.
//!
//! [`ComputeBackend`] is the SDK seam: platform and device enumeration,
//! contexts, in-order command queues, program builds, kernels, buffers and
//! events with completion callbacks. It is shaped after the OpenCL host API.
//! Every call that the driver could reject returns a raw [`Status`]; callers
//! turn that into a [`ComputeError`](crate::error::ComputeError) through
//! [`StatusExt::raise`](crate::resource::StatusExt::raise).
//!
//! Two implementations exist: the emulated device in `clactor-cpu`, and the
//! OpenCL binding in `clactor-opencl`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::status::Status;

/// Result of a raw backend call.
pub type BackendResult<T> = std::result::Result<T, Status>;

/// Class of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Discrete or integrated GPU.
    Gpu,
    /// Host CPU exposed as a compute device.
    Cpu,
    /// Dedicated accelerator.
    Accelerator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Gpu => write!(f, "GPU"),
            DeviceKind::Cpu => write!(f, "CPU"),
            DeviceKind::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Device-side access mode of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccess {
    /// Kernels only read the buffer.
    ReadOnly,
    /// Kernels only write the buffer.
    WriteOnly,
    /// Kernels read and write the buffer.
    ReadWrite,
}

impl MemAccess {
    /// Check if kernels may read the buffer.
    pub fn kernel_readable(self) -> bool {
        !matches!(self, MemAccess::WriteOnly)
    }

    /// Check if kernels may write the buffer.
    pub fn kernel_writable(self) -> bool {
        !matches!(self, MemAccess::ReadOnly)
    }
}

/// Launch geometry of one kernel execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange<'a> {
    /// Global work size per dimension.
    pub global: &'a [usize],
    /// Global offsets, one per dimension.
    pub offsets: Option<&'a [usize]>,
    /// Work-group size per dimension; the backend chooses when absent.
    pub local: Option<&'a [usize]>,
}

impl<'a> NdRange<'a> {
    /// Geometry with only global sizes.
    pub fn new(global: &'a [usize]) -> Self {
        Self {
            global,
            offsets: None,
            local: None,
        }
    }

    /// Number of dimensions.
    pub fn work_dim(&self) -> usize {
        self.global.len()
    }

    /// Total number of work-items.
    pub fn total_work_items(&self) -> usize {
        self.global.iter().product()
    }
}

/// Capability record reported by the backend for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Device name.
    pub name: String,
    /// Vendor name.
    pub vendor: String,
    /// Device version string.
    pub version: String,
    /// Driver version string.
    pub driver_version: String,
    /// Device class.
    pub kind: DeviceKind,
    /// Number of parallel compute units.
    pub max_compute_units: u32,
    /// Maximum clock frequency in MHz.
    pub max_clock_frequency: u32,
    /// Global memory size in bytes.
    pub global_mem_size: u64,
    /// Local (work-group shared) memory size in bytes.
    pub local_mem_size: u64,
    /// Largest single allocation in bytes.
    pub max_mem_alloc_size: u64,
    /// Maximum number of work-items in one work-group.
    pub max_work_group_size: usize,
    /// Maximum number of work dimensions.
    pub max_work_item_dimensions: u32,
    /// Maximum work-items per dimension in one work-group.
    pub max_work_item_sizes: Vec<usize>,
}

/// Final state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// The command finished.
    Complete,
    /// The command was abnormally terminated.
    Failed(Status),
}

impl EventStatus {
    /// Check if the command finished successfully.
    pub fn is_complete(self) -> bool {
        matches!(self, EventStatus::Complete)
    }
}

/// Callback fired once when an event reaches its final state.
pub type CompletionCallback = Box<dyn FnOnce(EventStatus) + Send + 'static>;

/// A failed program build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    /// Status of the build call.
    pub status: Status,
    /// Build log; may be empty if the backend provides none.
    pub log: String,
}

impl BuildFailure {
    /// Create a build failure.
    pub fn new(status: Status, log: impl Into<String>) -> Self {
        Self {
            status,
            log: log.into(),
        }
    }
}

impl From<Status> for BuildFailure {
    fn from(status: Status) -> Self {
        Self::new(status, String::new())
    }
}

/// Host bytes that a write command copies from.
///
/// The handle shares ownership of the message element that owns the bytes,
/// so a backend can hold on to it until the copy has actually happened.
#[derive(Clone)]
pub struct HostBytes {
    owner: Arc<dyn Any + Send + Sync>,
    view: fn(&(dyn Any + Send + Sync)) -> Option<&[u8]>,
}

impl HostBytes {
    /// Wrap an owner and the function that views it as bytes.
    ///
    /// Returns `None` when `view` cannot interpret `owner`.
    pub fn new(
        owner: Arc<dyn Any + Send + Sync>,
        view: fn(&(dyn Any + Send + Sync)) -> Option<&[u8]>,
    ) -> Option<Self> {
        view(owner.as_ref())?;
        Some(Self { owner, view })
    }

    /// Wrap an owned byte vector.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        fn view_vec(owner: &(dyn Any + Send + Sync)) -> Option<&[u8]> {
            owner.downcast_ref::<Vec<u8>>().map(Vec::as_slice)
        }
        Self {
            owner: Arc::new(bytes),
            view: view_vec,
        }
    }

    /// The bytes.
    pub fn as_slice(&self) -> &[u8] {
        (self.view)(self.owner.as_ref()).unwrap_or(&[])
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Check if there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HostBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBytes").field("len", &self.len()).finish()
    }
}

/// A compute SDK.
///
/// Enqueue calls never wait for device work. Ordering between commands is
/// expressed with wait lists of events; a command starts only after every
/// event in its wait list completed, and fails with
/// [`Status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST`] if one of them failed.
///
/// Handles release their backend object when dropped. The backend keeps an
/// object alive for as long as enqueued work still refers to it.
pub trait ComputeBackend: Send + Sync + 'static {
    /// Platform handle.
    type Platform: Send + Sync + 'static;
    /// Device identifier.
    type DeviceId: Clone + Send + Sync + 'static;
    /// Context shared by the devices of one platform.
    type Context: Send + Sync + 'static;
    /// In-order command queue bound to one device.
    type Queue: Send + Sync + 'static;
    /// Built program.
    type Program: Send + Sync + 'static;
    /// Kernel entry point with its argument bindings.
    type Kernel: Send + Sync + 'static;
    /// Device buffer.
    type Buffer: Send + Sync + 'static;
    /// Completion handle of an enqueued command.
    type Event: Send + Sync + 'static;
    /// Host container a device-to-host read lands in.
    type Readback: Send + 'static;

    /// Human readable backend name.
    fn name(&self) -> &str;

    /// Available platforms.
    fn platforms(&self) -> BackendResult<Vec<Self::Platform>>;

    /// Devices of `kind` on `platform`.
    ///
    /// Reports [`Status::DEVICE_NOT_FOUND`] when there are none.
    fn devices(
        &self,
        platform: &Self::Platform,
        kind: DeviceKind,
    ) -> BackendResult<Vec<Self::DeviceId>>;

    /// Query the capability record of a device.
    fn device_properties(&self, device: &Self::DeviceId) -> BackendResult<DeviceProperties>;

    /// Create a context over `devices`.
    fn create_context(&self, devices: &[Self::DeviceId]) -> BackendResult<Self::Context>;

    /// Create an in-order queue for `device`.
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::DeviceId,
        profiling: bool,
    ) -> BackendResult<Self::Queue>;

    /// Build `source` for `device`.
    fn build_program(
        &self,
        context: &Self::Context,
        device: &Self::DeviceId,
        source: &str,
        options: Option<&str>,
    ) -> std::result::Result<Self::Program, BuildFailure>;

    /// Look up a kernel entry point by name.
    ///
    /// Reports [`Status::INVALID_KERNEL_NAME`] when `program` does not define it.
    fn create_kernel(&self, program: &Self::Program, name: &str) -> BackendResult<Self::Kernel>;

    /// Allocate a buffer of `size` bytes.
    fn create_buffer(
        &self,
        context: &Self::Context,
        access: MemAccess,
        size: usize,
    ) -> BackendResult<Self::Buffer>;

    /// Enqueue a non-blocking host-to-device copy of `data` into `buffer`.
    fn enqueue_write(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        data: HostBytes,
        wait: &[&Self::Event],
    ) -> BackendResult<Self::Event>;

    /// Bind `buffer` as argument `index` of `kernel`.
    fn set_kernel_arg(
        &self,
        kernel: &Self::Kernel,
        index: u32,
        buffer: &Self::Buffer,
    ) -> BackendResult<()>;

    /// Enqueue one execution of `kernel` over `range`.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        range: &NdRange<'_>,
        wait: &[&Self::Event],
    ) -> BackendResult<Self::Event>;

    /// Enqueue a non-blocking read of the first `size` bytes of `buffer`.
    ///
    /// The returned readback holds the data once the event completed.
    fn enqueue_read(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        size: usize,
        wait: &[&Self::Event],
    ) -> BackendResult<(Self::Event, Self::Readback)>;

    /// Enqueue a marker that completes once every event in `wait` completed.
    fn enqueue_marker(&self, queue: &Self::Queue, wait: &[&Self::Event])
        -> BackendResult<Self::Event>;

    /// Register `callback` to fire once `event` reaches its final state.
    ///
    /// The callback may run on a backend thread, or inline when the event
    /// already finished.
    fn on_complete(&self, event: &Self::Event, callback: CompletionCallback)
        -> BackendResult<()>;

    /// Submit queued commands to the device.
    fn flush(&self, queue: &Self::Queue) -> BackendResult<()>;

    /// Take the bytes of a finished read.
    fn take_readback(&self, readback: Self::Readback) -> BackendResult<Vec<u8>>;
}
