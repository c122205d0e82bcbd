//! # clactor Core
//!
//! Core traits and types for running compute kernels as actors.
//!
//! A compute actor owns one kernel of a compiled program. Every message it
//! accepts is turned into device buffers, a kernel launch and read-backs,
//! all chained through backend events; the reply is delivered once the
//! device signals completion. No thread ever blocks on device work.
//!
//! ## Core Abstractions
//!
//! - [`ComputeBackend`] - The compute SDK seam (OpenCL-shaped)
//! - [`DeviceRegistry`] - One-time device discovery and capability records
//! - [`Program`] - A kernel module built for one device
//! - [`Arg`] - Input, input-output and output argument descriptors
//! - [`ComputeActor`] - The actor endpoint turning messages into commands
//! - [`Command`] / [`InFlight`] - One kernel invocation, before and after launch
//!
//! ## Example
//!
//! ```ignore
//! use clactor_core::prelude::*;
//!
//! let registry = DeviceRegistry::with_defaults(backend);
//! let program = Program::create(&registry, SOURCE, None, 0)?;
//! let actor = spawn(&program, "times_two", SpawnConfig::new([1024]), [Arg::in_out::<i32>()])?;
//! let reply = actor.ask((input,), Duration::from_secs(1)).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actor;
pub mod arguments;
pub mod backend;
pub mod backend_stub;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod facade;
pub mod message;
pub mod program;
pub mod resource;
pub mod spawn_config;
pub mod status;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::actor::{
        ActorId, ActorRef, ActorStatsSnapshot, CorrelationId, Envelope, Inbox, Reply, ReplyTo,
    };
    pub use crate::arguments::{Arg, ArgKind, ArgList, OutputSize, Scalar};
    pub use crate::backend::{
        ComputeBackend, DeviceKind, DeviceProperties, EventStatus, MemAccess, NdRange,
    };
    pub use crate::command::{Command, CommandStage, InFlight};
    pub use crate::config::{ComputeConfig, DiscoveryConfig};
    pub use crate::device::{Device, DeviceRegistry};
    pub use crate::error::{ComputeError, Result};
    pub use crate::facade::{spawn, spawn_from_source, ComputeActor, ComputeActorBuilder};
    pub use crate::message::{Element, IntoMessage, Message};
    pub use crate::program::Program;
    pub use crate::spawn_config::SpawnConfig;
    pub use crate::status::Status;
}

pub use actor::{ActorRef, Inbox};
pub use arguments::Arg;
pub use backend::ComputeBackend;
pub use command::{Command, InFlight};
pub use device::DeviceRegistry;
pub use error::{ComputeError, Result};
pub use facade::ComputeActor;
pub use message::Message;
pub use program::Program;
pub use spawn_config::SpawnConfig;
