//! OpenCL implementation of the compute backend.

use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::sync::Arc;

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
};
use opencl3::error_codes::ClError;
use opencl3::event::Event;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, ClMem, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_id, cl_device_type, cl_event, cl_int, CL_NON_BLOCKING};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use clactor_core::backend::{
    BackendResult, BuildFailure, CompletionCallback, ComputeBackend, DeviceKind, DeviceProperties,
    EventStatus, HostBytes, MemAccess, NdRange,
};
use clactor_core::error::Result;
use clactor_core::status::Status;

const CL_COMPLETE: cl_int = 0;

fn status(err: ClError) -> Status {
    Status(err.0)
}

fn device_type(kind: DeviceKind) -> cl_device_type {
    match kind {
        DeviceKind::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceKind::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceKind::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
    }
}

fn device_kind(bits: cl_device_type) -> DeviceKind {
    if bits & CL_DEVICE_TYPE_GPU != 0 {
        DeviceKind::Gpu
    } else if bits & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceKind::Accelerator
    } else {
        DeviceKind::Cpu
    }
}

// OpenCL objects may be used from any host thread. The one exception,
// clSetKernelArg, is serialised by the mutex in `OpenClKernel`.
macro_rules! thread_safe_handle {
    ($($name:ident),* $(,)?) => {
        $(
            unsafe impl Send for $name {}
            unsafe impl Sync for $name {}
        )*
    };
}

/// OpenCL platform.
pub struct OpenClPlatform(Platform);

/// OpenCL device id.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OpenClDeviceId(cl_device_id);

/// OpenCL context.
pub struct OpenClContext(Context);

/// In-order OpenCL command queue.
pub struct OpenClQueue(CommandQueue);

/// Built OpenCL program.
pub struct OpenClProgram(Program);

/// OpenCL kernel.
pub struct OpenClKernel(Mutex<Kernel>);

/// OpenCL device buffer.
pub struct OpenClBuffer(Mutex<Buffer<u8>>);

/// OpenCL event.
pub struct OpenClEvent(Event);

thread_safe_handle!(
    OpenClPlatform,
    OpenClDeviceId,
    OpenClContext,
    OpenClQueue,
    OpenClProgram,
    OpenClKernel,
    OpenClBuffer,
    OpenClEvent,
);

impl fmt::Debug for OpenClDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpenClDeviceId({:p})", self.0)
    }
}

/// Host memory a non-blocking read lands in.
///
/// The completion callback of the read shares the allocation, so it stays
/// valid until the device finished writing even if the readback is dropped
/// early.
pub struct OpenClReadback(Arc<Mutex<Vec<u8>>>);

fn raw_events(wait: &[&OpenClEvent]) -> Vec<cl_event> {
    wait.iter().map(|e| e.0.get()).collect()
}

extern "C" fn completion_trampoline(_event: cl_event, status: cl_int, user_data: *mut c_void) {
    // SAFETY: `user_data` is the box leaked by `register_callback`; the
    // runtime calls the notification exactly once.
    let callback = unsafe { Box::from_raw(user_data as *mut CompletionCallback) };
    let status = if status == CL_COMPLETE {
        EventStatus::Complete
    } else {
        EventStatus::Failed(Status(status))
    };
    callback(status);
}

fn register_callback(event: &Event, callback: CompletionCallback) -> BackendResult<()> {
    let user_data = Box::into_raw(Box::new(callback));
    match event.set_callback(CL_COMPLETE, completion_trampoline, user_data as *mut c_void) {
        Ok(()) => Ok(()),
        Err(err) => {
            // SAFETY: registration failed, so the runtime never saw the pointer.
            drop(unsafe { Box::from_raw(user_data) });
            Err(status(err))
        }
    }
}

/// Keep `owner` alive until `event` reached its final state.
fn retain_until_complete<T: Send + 'static>(event: &Event, owner: T) {
    let slot = Arc::new(Mutex::new(Some(owner)));
    let held = Arc::clone(&slot);
    if let Err(err) = register_callback(event, Box::new(move |_| drop(held.lock().take()))) {
        // The driver may still be copying from the owner; leak it.
        warn!("clSetEventCallback failed: {}; leaking command data", err);
        std::mem::forget(slot.lock().take());
    }
}

/// OpenCL compute backend.
pub struct OpenClBackend {
    _private: (),
}

impl OpenClBackend {
    /// Create the backend.
    pub fn new() -> Result<Self> {
        info!("Initializing OpenCL backend");
        Ok(Self { _private: () })
    }

    /// Check if at least one OpenCL platform is installed.
    pub fn is_available() -> bool {
        get_platforms().map(|p| !p.is_empty()).unwrap_or(false)
    }
}

impl fmt::Debug for OpenClBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpenClBackend")
    }
}

impl ComputeBackend for OpenClBackend {
    type Platform = OpenClPlatform;
    type DeviceId = OpenClDeviceId;
    type Context = OpenClContext;
    type Queue = OpenClQueue;
    type Program = OpenClProgram;
    type Kernel = OpenClKernel;
    type Buffer = OpenClBuffer;
    type Event = OpenClEvent;
    type Readback = OpenClReadback;

    fn name(&self) -> &str {
        "OpenCL"
    }

    fn platforms(&self) -> BackendResult<Vec<OpenClPlatform>> {
        let platforms = get_platforms().map_err(status)?;
        Ok(platforms.into_iter().map(OpenClPlatform).collect())
    }

    fn devices(&self, platform: &OpenClPlatform, kind: DeviceKind) -> BackendResult<Vec<OpenClDeviceId>> {
        let ids = platform.0.get_devices(device_type(kind)).map_err(status)?;
        if ids.is_empty() {
            return Err(Status::DEVICE_NOT_FOUND);
        }
        Ok(ids.into_iter().map(OpenClDeviceId).collect())
    }

    fn device_properties(&self, device: &OpenClDeviceId) -> BackendResult<DeviceProperties> {
        let dev = Device::new(device.0);
        let text = |s: String| s.trim_end_matches('\0').trim().to_string();
        Ok(DeviceProperties {
            name: text(dev.name().map_err(status)?),
            vendor: text(dev.vendor().map_err(status)?),
            version: text(dev.version().map_err(status)?),
            driver_version: text(dev.driver_version().map_err(status)?),
            kind: device_kind(dev.dev_type().map_err(status)?),
            max_compute_units: dev.max_compute_units().map_err(status)?,
            max_clock_frequency: dev.max_clock_frequency().map_err(status)?,
            global_mem_size: dev.global_mem_size().map_err(status)?,
            local_mem_size: dev.local_mem_size().map_err(status)?,
            max_mem_alloc_size: dev.max_mem_alloc_size().map_err(status)?,
            max_work_group_size: dev.max_work_group_size().map_err(status)?,
            max_work_item_dimensions: dev.max_work_item_dimensions().map_err(status)?,
            max_work_item_sizes: dev.max_work_item_sizes().map_err(status)?,
        })
    }

    fn create_context(&self, devices: &[OpenClDeviceId]) -> BackendResult<OpenClContext> {
        let ids: Vec<cl_device_id> = devices.iter().map(|d| d.0).collect();
        let context = Context::from_devices(&ids, &[], None, ptr::null_mut()).map_err(status)?;
        Ok(OpenClContext(context))
    }

    fn create_queue(
        &self,
        context: &OpenClContext,
        device: &OpenClDeviceId,
        profiling: bool,
    ) -> BackendResult<OpenClQueue> {
        let properties = if profiling {
            CL_QUEUE_PROFILING_ENABLE
        } else {
            0
        };
        // clCreateCommandQueue is the 1.2 entry point and the one macOS supports.
        #[allow(deprecated)]
        let queue = unsafe { CommandQueue::create(&context.0, device.0, properties) }
            .map_err(status)?;
        Ok(OpenClQueue(queue))
    }

    fn build_program(
        &self,
        context: &OpenClContext,
        device: &OpenClDeviceId,
        source: &str,
        options: Option<&str>,
    ) -> std::result::Result<OpenClProgram, BuildFailure> {
        let mut program = Program::create_from_source(&context.0, source)
            .map_err(|err| BuildFailure::from(status(err)))?;

        if let Err(err) = program.build(&[device.0], options.unwrap_or_default()) {
            let log = program.get_build_log(device.0).unwrap_or_default();
            return Err(BuildFailure::new(status(err), log));
        }

        debug!("Built OpenCL program ({} bytes of source)", source.len());
        Ok(OpenClProgram(program))
    }

    fn create_kernel(&self, program: &OpenClProgram, name: &str) -> BackendResult<OpenClKernel> {
        let kernel = Kernel::create(&program.0, name).map_err(status)?;
        Ok(OpenClKernel(Mutex::new(kernel)))
    }

    fn create_buffer(
        &self,
        context: &OpenClContext,
        access: MemAccess,
        size: usize,
    ) -> BackendResult<OpenClBuffer> {
        let flags = match access {
            MemAccess::ReadOnly => CL_MEM_READ_ONLY,
            MemAccess::WriteOnly => CL_MEM_WRITE_ONLY,
            MemAccess::ReadWrite => CL_MEM_READ_WRITE,
        };
        let buffer = unsafe { Buffer::<u8>::create(&context.0, flags, size, ptr::null_mut()) }
            .map_err(status)?;
        Ok(OpenClBuffer(Mutex::new(buffer)))
    }

    fn enqueue_write(
        &self,
        queue: &OpenClQueue,
        buffer: &OpenClBuffer,
        data: HostBytes,
        wait: &[&OpenClEvent],
    ) -> BackendResult<OpenClEvent> {
        let events = raw_events(wait);
        // SAFETY: `data` shares ownership of the source bytes and is kept
        // alive until the copy completed.
        let event = unsafe {
            queue.0.enqueue_write_buffer(
                &mut buffer.0.lock(),
                CL_NON_BLOCKING,
                0,
                data.as_slice(),
                &events,
            )
        }
        .map_err(status)?;
        retain_until_complete(&event, data);
        Ok(OpenClEvent(event))
    }

    fn set_kernel_arg(
        &self,
        kernel: &OpenClKernel,
        index: u32,
        buffer: &OpenClBuffer,
    ) -> BackendResult<()> {
        let mem = buffer.0.lock().get();
        unsafe { kernel.0.lock().set_arg(index, &mem) }.map_err(status)
    }

    fn enqueue_kernel(
        &self,
        queue: &OpenClQueue,
        kernel: &OpenClKernel,
        range: &NdRange<'_>,
        wait: &[&OpenClEvent],
    ) -> BackendResult<OpenClEvent> {
        let events = raw_events(wait);
        let offsets = range.offsets.map_or(ptr::null(), <[usize]>::as_ptr);
        let local = range.local.map_or(ptr::null(), <[usize]>::as_ptr);
        let kernel = kernel.0.lock();
        let event = unsafe {
            queue.0.enqueue_nd_range_kernel(
                kernel.get(),
                range.work_dim() as u32,
                offsets,
                range.global.as_ptr(),
                local,
                &events,
            )
        }
        .map_err(status)?;
        Ok(OpenClEvent(event))
    }

    fn enqueue_read(
        &self,
        queue: &OpenClQueue,
        buffer: &OpenClBuffer,
        size: usize,
        wait: &[&OpenClEvent],
    ) -> BackendResult<(OpenClEvent, OpenClReadback)> {
        let events = raw_events(wait);
        let host = Arc::new(Mutex::new(vec![0u8; size]));
        // SAFETY: the allocation is shared with the completion callback
        // below and never resized.
        let event = unsafe {
            let mut bytes = host.lock();
            queue.0.enqueue_read_buffer(
                &buffer.0.lock(),
                CL_NON_BLOCKING,
                0,
                bytes.as_mut_slice(),
                &events,
            )
        }
        .map_err(status)?;
        retain_until_complete(&event, Arc::clone(&host));
        Ok((OpenClEvent(event), OpenClReadback(host)))
    }

    fn enqueue_marker(&self, queue: &OpenClQueue, wait: &[&OpenClEvent]) -> BackendResult<OpenClEvent> {
        let events = raw_events(wait);
        let event = unsafe { queue.0.enqueue_marker_with_wait_list(&events) }.map_err(status)?;
        Ok(OpenClEvent(event))
    }

    fn on_complete(&self, event: &OpenClEvent, callback: CompletionCallback) -> BackendResult<()> {
        register_callback(&event.0, callback)
    }

    fn flush(&self, queue: &OpenClQueue) -> BackendResult<()> {
        queue.0.flush().map_err(status)
    }

    fn take_readback(&self, readback: OpenClReadback) -> BackendResult<Vec<u8>> {
        Ok(std::mem::take(&mut *readback.0.lock()))
    }
}
