//! # clactor
//!
//! Run OpenCL kernels as message-driven actors.
//!
//! A compute actor owns one kernel. Send it a message whose fields match
//! the kernel's input arguments and it copies them to the device, launches
//! the kernel, reads the outputs back and replies, all without blocking a
//! thread on device work.
//!
//! ## Quick Start
//!
//! ```ignore
//! use clactor::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let backend = CpuBackend::builder()
//!         .kernel("times_two", |inv| {
//!             for x in inv.write::<i32>(0)? {
//!                 *x *= 2;
//!             }
//!             Ok(())
//!         })
//!         .build();
//!     let registry = DeviceRegistry::with_defaults(backend);
//!
//!     let actor = spawn_from_source(
//!         &registry,
//!         "__kernel void times_two(__global int* data) { data[get_global_id(0)] *= 2; }",
//!         "times_two",
//!         SpawnConfig::new([4]),
//!         [Arg::in_out::<i32>()],
//!     )?;
//!
//!     let reply = actor.ask((vec![1, 2, 3, 4],), Duration::from_secs(1)).await?;
//!     assert_eq!(reply.get::<Vec<i32>>(0), Some(&vec![2, 4, 6, 8]));
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! - **CPU** - Emulated device for testing and fallback (always available)
//! - **OpenCL** - System OpenCL drivers (requires `opencl` feature)
//!
//! ```toml
//! [dependencies]
//! clactor = { version = "0.1", features = ["opencl"] }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  Message   ┌───────────────┐  Command   ┌──────────────┐
//! │  Requester   │───────────▶│ ComputeActor  │───────────▶│ Device queue │
//! │ (ActorRef)   │            │ accept/prepare│            │ write→kernel │
//! └──────▲───────┘            └───────────────┘            │ →read→marker │
//!        │            Reply (InFlight::complete)           └──────┬───────┘
//!        └────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

pub mod logging;

pub use clactor_core::*;

pub use clactor_cpu as cpu;
pub use clactor_cpu::CpuBackend;
pub use clactor_opencl::OpenClBackend;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::logging::init_tracing;
    pub use clactor_core::prelude::*;
    pub use clactor_cpu::{CpuBackend, CpuDeviceSpec, CpuPlatformSpec, KernelFault, KernelInvocation};
    pub use clactor_opencl::OpenClBackend;
}

/// Check availability of backends at runtime.
pub mod availability {
    /// Check if an OpenCL platform can be used.
    pub fn opencl() -> bool {
        clactor_opencl::is_opencl_available()
    }

    /// Names of the usable backends.
    pub fn available_backends() -> Vec<&'static str> {
        let mut backends = vec!["CPU"];
        if opencl() {
            backends.push("OpenCL");
        }
        backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_backend_always_available() {
        let backends = availability::available_backends();
        assert_eq!(backends[0], "CPU");
        #[cfg(not(feature = "opencl"))]
        assert_eq!(backends.len(), 1);
    }
}
