//! Compiled kernel programs.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::backend::ComputeBackend;
use crate::device::{Device, DeviceRegistry};
use crate::error::{ComputeError, Result};
use crate::status::Status;

/// A kernel module built for one device.
///
/// Programs are shared read-only through `Arc` by every compute actor
/// spawned from them, and are released with the last actor.
pub struct Program<B: ComputeBackend> {
    backend: Arc<B>,
    device: Arc<Device<B>>,
    module: B::Program,
    options: Option<String>,
}

impl<B: ComputeBackend> Program<B> {
    /// Build `source` for device `device_id` of `registry`.
    ///
    /// When `options` is `None` the registry's default build options apply.
    /// A failed build returns [`ComputeError::Compile`] with the compiler
    /// log.
    pub fn create(
        registry: &DeviceRegistry<B>,
        source: &str,
        options: Option<&str>,
        device_id: usize,
    ) -> Result<Arc<Self>> {
        let device = registry.device(device_id)?;
        let options = options
            .map(str::to_owned)
            .or_else(|| registry.config().default_build_options.clone());
        let backend = Arc::clone(registry.backend());

        debug!(
            "Building program for device {} ({}) with options {:?}",
            device.id(),
            device.name(),
            options
        );

        let module = backend
            .build_program(device.context(), device.raw(), source, options.as_deref())
            .map_err(|failure| {
                let diagnostic = if failure.log.trim().is_empty() {
                    failure.status.to_string()
                } else {
                    failure.log
                };
                error!("clBuildProgram: {}\n{}", failure.status, diagnostic);
                ComputeError::compile(failure.status, diagnostic)
            })?;

        Ok(Arc::new(Self {
            backend,
            device,
            module,
            options,
        }))
    }

    /// Resolve a kernel entry point.
    pub fn kernel(&self, name: &str) -> Result<B::Kernel> {
        self.backend
            .create_kernel(&self.module, name)
            .map_err(|status| match status {
                Status::INVALID_KERNEL_NAME => ComputeError::kernel_not_found(name),
                status => ComputeError::resource("clCreateKernel", status),
            })
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Device the program was built for.
    pub fn device(&self) -> &Arc<Device<B>> {
        &self.device
    }

    /// Context of the device.
    pub fn context(&self) -> &Arc<B::Context> {
        self.device.context()
    }

    /// Queue of the device.
    pub fn queue(&self) -> &Arc<B::Queue> {
        self.device.queue()
    }

    /// The compiled module.
    pub fn module(&self) -> &B::Program {
        &self.module
    }

    /// Build options that were used.
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }
}

impl<B: ComputeBackend> fmt::Debug for Program<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("device", &self.device.id())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
