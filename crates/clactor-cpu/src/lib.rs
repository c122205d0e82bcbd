//! # clactor CPU Backend
//!
//! Emulated compute device for testing and as a fallback when no OpenCL
//! runtime is installed.
//!
//! Kernels are host closures registered by name. Everything around them
//! follows OpenCL semantics: program builds reject malformed source with a
//! compiler-style log, queues are in-order and run on their own worker
//! thread, commands honour wait lists, and events fire completion callbacks.
//!
//! ## Example
//!
//! ```ignore
//! use clactor_cpu::{CpuBackend, CpuDeviceSpec};
//!
//! let backend = CpuBackend::builder()
//!     .device(CpuDeviceSpec::gpu("emulated gpu"))
//!     .kernel("times_two", |inv| {
//!         for x in inv.write::<i32>(0)? {
//!             *x *= 2;
//!         }
//!         Ok(())
//!     })
//!     .build();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod event;
mod kernel;
mod memory;
mod queue;
mod runtime;
pub mod source;

pub use event::CpuEvent;
pub use kernel::{CpuKernelFn, KernelFault, KernelInvocation};
pub use memory::CpuBuffer;
pub use queue::CpuQueue;
pub use runtime::{
    CpuBackend, CpuBackendBuilder, CpuContext, CpuDeviceId, CpuDeviceSpec, CpuKernel,
    CpuPlatformId, CpuPlatformSpec, CpuProgram, CpuReadback, CpuStatsSnapshot, FaultPoint,
};
