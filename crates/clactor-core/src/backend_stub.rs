//! Macro for generating unavailable backend stubs.
//!
//! When a backend feature (e.g. `opencl`) is disabled, the backend crate
//! still exports a type of the same name so downstream code compiles either
//! way. The stub cannot be constructed: `new()` returns
//! [`ComputeError::BackendUnavailable`](crate::error::ComputeError::BackendUnavailable).

/// Generate an uninhabited stub backend.
///
/// # Example
///
/// ```ignore
/// clactor_core::unavailable_backend!(OpenClBackend, "OpenCL");
/// ```
#[macro_export]
macro_rules! unavailable_backend {
    ($backend:ident, $name:literal) => {
        /// Stub backend when the backend feature is disabled.
        pub struct $backend {
            never: ::std::convert::Infallible,
        }

        impl $backend {
            /// Create fails when the backend is not available.
            pub fn new() -> $crate::error::Result<Self> {
                Err($crate::error::ComputeError::BackendUnavailable(
                    concat!($name, " feature not enabled").to_string(),
                ))
            }

            /// Check if the backend can be used on this host.
            pub fn is_available() -> bool {
                false
            }
        }

        impl $crate::backend::ComputeBackend for $backend {
            type Platform = ::std::convert::Infallible;
            type DeviceId = ::std::convert::Infallible;
            type Context = ::std::convert::Infallible;
            type Queue = ::std::convert::Infallible;
            type Program = ::std::convert::Infallible;
            type Kernel = ::std::convert::Infallible;
            type Buffer = ::std::convert::Infallible;
            type Event = ::std::convert::Infallible;
            type Readback = ::std::convert::Infallible;

            fn name(&self) -> &str {
                match self.never {}
            }

            fn platforms(&self) -> $crate::backend::BackendResult<Vec<Self::Platform>> {
                match self.never {}
            }

            fn devices(
                &self,
                _platform: &Self::Platform,
                _kind: $crate::backend::DeviceKind,
            ) -> $crate::backend::BackendResult<Vec<Self::DeviceId>> {
                match self.never {}
            }

            fn device_properties(
                &self,
                _device: &Self::DeviceId,
            ) -> $crate::backend::BackendResult<$crate::backend::DeviceProperties> {
                match self.never {}
            }

            fn create_context(
                &self,
                _devices: &[Self::DeviceId],
            ) -> $crate::backend::BackendResult<Self::Context> {
                match self.never {}
            }

            fn create_queue(
                &self,
                _context: &Self::Context,
                _device: &Self::DeviceId,
                _profiling: bool,
            ) -> $crate::backend::BackendResult<Self::Queue> {
                match self.never {}
            }

            fn build_program(
                &self,
                _context: &Self::Context,
                _device: &Self::DeviceId,
                _source: &str,
                _options: Option<&str>,
            ) -> ::std::result::Result<Self::Program, $crate::backend::BuildFailure> {
                match self.never {}
            }

            fn create_kernel(
                &self,
                _program: &Self::Program,
                _name: &str,
            ) -> $crate::backend::BackendResult<Self::Kernel> {
                match self.never {}
            }

            fn create_buffer(
                &self,
                _context: &Self::Context,
                _access: $crate::backend::MemAccess,
                _size: usize,
            ) -> $crate::backend::BackendResult<Self::Buffer> {
                match self.never {}
            }

            fn enqueue_write(
                &self,
                _queue: &Self::Queue,
                _buffer: &Self::Buffer,
                _data: $crate::backend::HostBytes,
                _wait: &[&Self::Event],
            ) -> $crate::backend::BackendResult<Self::Event> {
                match self.never {}
            }

            fn set_kernel_arg(
                &self,
                _kernel: &Self::Kernel,
                _index: u32,
                _buffer: &Self::Buffer,
            ) -> $crate::backend::BackendResult<()> {
                match self.never {}
            }

            fn enqueue_kernel(
                &self,
                _queue: &Self::Queue,
                _kernel: &Self::Kernel,
                _range: &$crate::backend::NdRange<'_>,
                _wait: &[&Self::Event],
            ) -> $crate::backend::BackendResult<Self::Event> {
                match self.never {}
            }

            fn enqueue_read(
                &self,
                _queue: &Self::Queue,
                _buffer: &Self::Buffer,
                _size: usize,
                _wait: &[&Self::Event],
            ) -> $crate::backend::BackendResult<(Self::Event, Self::Readback)> {
                match self.never {}
            }

            fn enqueue_marker(
                &self,
                _queue: &Self::Queue,
                _wait: &[&Self::Event],
            ) -> $crate::backend::BackendResult<Self::Event> {
                match self.never {}
            }

            fn on_complete(
                &self,
                _event: &Self::Event,
                _callback: $crate::backend::CompletionCallback,
            ) -> $crate::backend::BackendResult<()> {
                match self.never {}
            }

            fn flush(&self, _queue: &Self::Queue) -> $crate::backend::BackendResult<()> {
                match self.never {}
            }

            fn take_readback(
                &self,
                _readback: Self::Readback,
            ) -> $crate::backend::BackendResult<Vec<u8>> {
                match self.never {}
            }
        }
    };
}
