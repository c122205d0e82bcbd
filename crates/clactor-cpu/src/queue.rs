//! In-order command queue of the emulated device.
//!
//! Each queue owns a worker thread fed through a crossbeam channel.
//! Commands run one after another in submission order; a command first waits
//! for its wait list and fails without running when a dependency failed.

use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use clactor_core::backend::{EventStatus, HostBytes};
use clactor_core::status::Status;

use crate::event::CpuEvent;
use crate::kernel::KernelLaunch;
use crate::memory::CpuMemory;
use crate::runtime::CpuDeviceId;

/// Landing slot of a device-to-host read.
pub(crate) type ReadSlot = Arc<Mutex<Option<Vec<u8>>>>;

pub(crate) enum Action {
    Write {
        memory: Arc<CpuMemory>,
        data: HostBytes,
    },
    Read {
        memory: Arc<CpuMemory>,
        size: usize,
        slot: ReadSlot,
    },
    Kernel(KernelLaunch),
    Marker,
    Fail {
        label: &'static str,
        status: Status,
    },
}

impl Action {
    fn label(&self) -> &'static str {
        match self {
            Action::Write { .. } => "write",
            Action::Read { .. } => "read",
            Action::Kernel(_) => "kernel",
            Action::Marker => "marker",
            Action::Fail { label, .. } => *label,
        }
    }

    fn execute(self) -> EventStatus {
        let result = match self {
            Action::Write { memory, data } => memory.write(data.as_slice()),
            Action::Read { memory, size, slot } => memory.read(size).map(|bytes| {
                *slot.lock() = Some(bytes);
            }),
            Action::Kernel(launch) => return launch.run(),
            Action::Marker => Ok(()),
            Action::Fail { status, .. } => Err(status),
        };
        match result {
            Ok(()) => EventStatus::Complete,
            Err(status) => EventStatus::Failed(status),
        }
    }
}

struct QueueOp {
    action: Action,
    wait: Vec<CpuEvent>,
    event: CpuEvent,
}

/// In-order queue bound to one emulated device.
///
/// Dropping the queue closes its channel; the worker drains the commands
/// already submitted and exits.
pub struct CpuQueue {
    device: CpuDeviceId,
    profiling: bool,
    sender: Sender<QueueOp>,
}

impl CpuQueue {
    pub(crate) fn new(device: CpuDeviceId, profiling: bool) -> Result<Self, Status> {
        let (sender, receiver) = channel::unbounded::<QueueOp>();

        thread::Builder::new()
            .name(format!("clactor-cpu-queue-{device}"))
            .spawn(move || {
                for op in receiver {
                    run_op(device, op);
                }
                trace!("Queue worker for device {} stopped", device);
            })
            .map_err(|_| Status::OUT_OF_HOST_MEMORY)?;

        debug!("Created command queue for emulated device {}", device);
        Ok(Self {
            device,
            profiling,
            sender,
        })
    }

    /// Index of the device the queue belongs to.
    pub fn device(&self) -> CpuDeviceId {
        self.device
    }

    /// Check if the queue was created with profiling enabled.
    pub fn profiling_enabled(&self) -> bool {
        self.profiling
    }

    /// Submit `action` after every event in `wait`.
    pub(crate) fn submit(&self, action: Action, wait: &[&CpuEvent]) -> Result<CpuEvent, Status> {
        let event = CpuEvent::new(action.label());
        let op = QueueOp {
            action,
            wait: wait.iter().map(|e| (*e).clone()).collect(),
            event: event.clone(),
        };
        self.sender
            .send(op)
            .map_err(|_| Status::INVALID_COMMAND_QUEUE)?;
        Ok(event)
    }
}

fn run_op(device: CpuDeviceId, op: QueueOp) {
    let QueueOp {
        action,
        wait,
        event,
    } = op;

    let blocked = wait.iter().any(|dep| !dep.wait().is_complete());
    let status = if blocked {
        trace!(
            "Device {}: {} skipped, a dependency failed",
            device,
            event.label()
        );
        EventStatus::Failed(Status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
    } else {
        action.execute()
    };

    event.complete(status);
}

impl fmt::Debug for CpuQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuQueue")
            .field("device", &self.device)
            .field("profiling", &self.profiling)
            .finish()
    }
}
