//! The lifecycle of one kernel invocation.
//!
//! ```text
//! Command ──enqueue──▶ InFlight ──complete().await──▶ reply delivered
//!  created     │        launched /       │             completed
//!              │        reading_results  │
//!              └──────── failed ◀────────┘
//! ```
//!
//! [`Command::enqueue`] binds the buffers, launches the kernel after the
//! input writes, reads every output back after the kernel, and puts a marker
//! behind the reads. The marker's completion callback only signals a oneshot
//! channel. The returned [`InFlight`] is the sole owner of the buffers,
//! events and request message until [`InFlight::complete`] has observed that
//! signal; it then packs the read-back data and replies.
//!
//! A failure at any step abandons the invocation: it is logged and counted,
//! its device objects are released, and no reply is sent.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, trace};

use crate::actor::{ActorId, ActorStats, CorrelationId, ReplyTo};
use crate::arguments::ElementCodec;
use crate::backend::{ComputeBackend, EventStatus, NdRange};
use crate::error::Result;
use crate::facade::OutputMapper;
use crate::message::Message;
use crate::resource::{wait_list, StatusExt};

/// Stage of a command, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStage {
    /// Buffers prepared, nothing launched.
    Created,
    /// Kernel enqueued.
    Launched,
    /// Read-backs and completion marker enqueued.
    ReadingResults,
    /// Reply produced.
    Completed,
    /// Abandoned after an error.
    Failed,
}

impl fmt::Display for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandStage::Created => "created",
            CommandStage::Launched => "launched",
            CommandStage::ReadingResults => "reading_results",
            CommandStage::Completed => "completed",
            CommandStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One output of a command: which buffer, how many elements, what type.
#[derive(Debug, Clone, Copy)]
pub struct OutputSlot {
    /// Kernel argument index of the buffer.
    pub buffer: usize,
    /// Element count, fixed before launch.
    pub len: usize,
    /// Element codec.
    pub codec: ElementCodec,
}

impl OutputSlot {
    /// Size of the read-back in bytes.
    pub fn byte_len(&self) -> usize {
        self.len * self.codec.element_size()
    }
}

/// Where a finished command sends its result.
pub(crate) struct ReplyRoute {
    pub origin: ActorId,
    pub reply_to: Option<ReplyTo>,
    pub map_output: Option<OutputMapper>,
    pub stats: Arc<ActorStats>,
}

/// A kernel invocation whose buffers are prepared but not yet launched.
pub struct Command<B: ComputeBackend> {
    backend: Arc<B>,
    queue: Arc<B::Queue>,
    buffers: Vec<B::Buffer>,
    write_events: Vec<B::Event>,
    outputs: Vec<OutputSlot>,
    message: Message,
    route: ReplyRoute,
}

impl<B: ComputeBackend> Command<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        queue: Arc<B::Queue>,
        buffers: Vec<B::Buffer>,
        write_events: Vec<B::Event>,
        outputs: Vec<OutputSlot>,
        message: Message,
        route: ReplyRoute,
    ) -> Self {
        Self {
            backend,
            queue,
            buffers,
            write_events,
            outputs,
            message,
            route,
        }
    }

    /// Output slots in reply order.
    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    /// Correlation id of the request, if it expects a reply.
    pub fn correlation(&self) -> Option<CorrelationId> {
        self.route.reply_to.as_ref().map(ReplyTo::correlation)
    }

    /// Launch the kernel and queue the read-backs.
    ///
    /// Buffer `i` becomes kernel argument `i`. On error nothing more is
    /// enqueued and the command is dropped without a reply.
    pub fn enqueue(self, kernel: &B::Kernel, range: &NdRange<'_>) -> Result<InFlight<B>> {
        let Command {
            backend,
            queue,
            buffers,
            write_events,
            outputs,
            message,
            route,
        } = self;

        for (index, buffer) in buffers.iter().enumerate() {
            backend
                .set_kernel_arg(kernel, index as u32, buffer)
                .raise("clSetKernelArg")?;
        }

        let kernel_event = backend
            .enqueue_kernel(&queue, kernel, range, &wait_list(&write_events))
            .raise("clEnqueueNDRangeKernel")?;
        trace!(stage = %CommandStage::Launched, "kernel enqueued");

        let mut read_events = Vec::with_capacity(outputs.len());
        let mut readbacks = Vec::with_capacity(outputs.len());
        for slot in outputs {
            let (event, readback) = backend
                .enqueue_read(&queue, &buffers[slot.buffer], slot.byte_len(), &[&kernel_event])
                .raise("clEnqueueReadBuffer")?;
            read_events.push(event);
            readbacks.push((slot, readback));
        }

        let marker = backend
            .enqueue_marker(&queue, &wait_list(&read_events))
            .raise("clEnqueueMarkerWithWaitList")?;

        let (signal, completion) = oneshot::channel();
        backend
            .on_complete(
                &marker,
                Box::new(move |status| {
                    let _ = signal.send(status);
                }),
            )
            .raise("clSetEventCallback")?;

        if let Err(status) = backend.flush(&queue) {
            error!("clFlush: {}", status);
        }
        trace!(stage = %CommandStage::ReadingResults, "read-backs enqueued");

        let mut events = write_events;
        events.push(kernel_event);
        events.extend(read_events);
        events.push(marker);

        Ok(InFlight {
            backend,
            buffers,
            events,
            readbacks,
            message,
            route,
            completion,
        })
    }
}

impl<B: ComputeBackend> fmt::Debug for Command<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("stage", &CommandStage::Created)
            .field("buffers", &self.buffers.len())
            .field("outputs", &self.outputs)
            .field("message", &self.message)
            .finish()
    }
}

/// A launched kernel invocation waiting for its completion marker.
#[must_use = "an in-flight command does nothing unless completed"]
pub struct InFlight<B: ComputeBackend> {
    backend: Arc<B>,
    buffers: Vec<B::Buffer>,
    events: Vec<B::Event>,
    readbacks: Vec<(OutputSlot, B::Readback)>,
    message: Message,
    route: ReplyRoute,
    completion: oneshot::Receiver<EventStatus>,
}

impl<B: ComputeBackend> InFlight<B> {
    /// Correlation id of the request, if it expects a reply.
    pub fn correlation(&self) -> Option<CorrelationId> {
        self.route.reply_to.as_ref().map(ReplyTo::correlation)
    }

    /// Wait for the device, then pack the outputs and deliver the reply.
    ///
    /// Outputs keep their declared order, both in the default reply and in
    /// the message handed to an output mapper.
    pub async fn complete(self) {
        let correlation = self.correlation();
        let InFlight {
            backend,
            buffers,
            events,
            readbacks,
            message,
            route,
            completion,
        } = self;

        let status = match completion.await {
            Ok(status) => status,
            Err(_) => {
                error!(
                    stage = %CommandStage::Failed,
                    ?correlation,
                    "completion callback dropped without firing"
                );
                route.stats.record_failed();
                return;
            }
        };

        if let EventStatus::Failed(status) = status {
            error!(
                stage = %CommandStage::Failed,
                ?correlation,
                "command failed on device: {}",
                status
            );
            route.stats.record_failed();
            return;
        }

        let mut elements = Vec::with_capacity(readbacks.len());
        for (slot, readback) in readbacks {
            match backend.take_readback(readback) {
                Ok(bytes) => elements.push(slot.codec.decode(bytes)),
                Err(status) => {
                    error!(
                        stage = %CommandStage::Failed,
                        ?correlation,
                        "reading back argument {} failed: {}",
                        slot.buffer,
                        status
                    );
                    route.stats.record_failed();
                    return;
                }
            }
        }

        // Device work is done; release device objects before replying.
        drop(events);
        drop(buffers);
        drop(message);
        route.stats.record_completed();

        let content = Message::from_elements(elements);
        let content = match &route.map_output {
            Some(map_output) => map_output(content),
            None => content,
        };

        match route.reply_to {
            Some(reply_to) => {
                if reply_to.deliver(route.origin, content) {
                    trace!(stage = %CommandStage::Completed, ?correlation, "reply delivered");
                } else {
                    debug!(?correlation, "requester is gone; reply dropped");
                }
            }
            None => trace!(stage = %CommandStage::Completed, "no reply address; result dropped"),
        }
    }
}

impl<B: ComputeBackend> fmt::Debug for InFlight<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("stage", &CommandStage::ReadingResults)
            .field("events", &self.events.len())
            .field("outputs", &self.readbacks.len())
            .field("correlation", &self.correlation())
            .finish()
    }
}
