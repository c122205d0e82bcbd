//! OpenCL Backend for clactor
//!
//! This crate implements [`ComputeBackend`](clactor_core::backend::ComputeBackend)
//! on top of the system OpenCL runtime using opencl3.
//!
//! # Features
//!
//! - `opencl`: link against the OpenCL ICD loader. Without it the crate
//!   exports a stub [`OpenClBackend`] whose constructor fails.
//!
//! # Example
//!
//! ```ignore
//! use clactor_core::prelude::*;
//! use clactor_opencl::OpenClBackend;
//!
//! let registry = DeviceRegistry::with_defaults(OpenClBackend::new()?);
//! let program = Program::create(&registry, SOURCE, None, 0)?;
//! ```

#![warn(missing_docs)]

#[cfg(feature = "opencl")]
mod backend;

#[cfg(feature = "opencl")]
pub use backend::{
    OpenClBackend, OpenClBuffer, OpenClContext, OpenClDeviceId, OpenClEvent, OpenClKernel,
    OpenClPlatform, OpenClProgram, OpenClQueue, OpenClReadback,
};

#[cfg(not(feature = "opencl"))]
mod stub {
    clactor_core::unavailable_backend!(OpenClBackend, "OpenCL");
}

#[cfg(not(feature = "opencl"))]
pub use stub::OpenClBackend;

/// Check if an OpenCL platform is present at runtime.
///
/// Returns false when the `opencl` feature is disabled or no platform is
/// installed.
pub fn is_opencl_available() -> bool {
    OpenClBackend::is_available()
}
