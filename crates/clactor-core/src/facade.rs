//! Compute actors.
//!
//! A [`ComputeActor`] binds one kernel of a [`Program`] to a fixed launch
//! geometry and argument list. Each message it accepts becomes one
//! [`Command`]: input fields are copied into fresh device buffers, output
//! buffers are sized, and the command is launched. The reply arrives later,
//! once the device finished; the actor itself never waits for the device.
//!
//! # Example
//!
//! ```ignore
//! let program = Program::create(&registry, SOURCE, None, 0)?;
//! let actor = ComputeActor::builder(program, "matrix_square", SpawnConfig::new([4, 4]))
//!     .arg(Arg::input::<i32>())
//!     .arg(Arg::output::<i32>())
//!     .spawn()?;
//!
//! let reply = actor.ask((matrix,), Duration::from_secs(1)).await?;
//! let squared: &Vec<i32> = reply.get(0).unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::actor::{ActorId, ActorRef, ActorStats, ActorStatsSnapshot, Envelope, ReplyTo};
use crate::arguments::{Arg, ArgKind, ArgList};
use crate::backend::{ComputeBackend, MemAccess};
use crate::command::{Command, OutputSlot, ReplyRoute};
use crate::config::ActorConfig;
use crate::device::DeviceRegistry;
use crate::error::{ComputeError, Result};
use crate::message::Message;
use crate::program::Program;
use crate::resource::StatusExt;
use crate::spawn_config::SpawnConfig;
use crate::status::Status;

/// Rewrites or rejects a request before it is matched against the
/// argument descriptors.
pub type InputMapper = Arc<dyn Fn(&Message) -> Option<Message> + Send + Sync>;

/// Rewrites the packed outputs into the reply.
pub type OutputMapper = Arc<dyn Fn(Message) -> Message + Send + Sync>;

/// A kernel bound to a launch geometry and an argument list.
pub struct ComputeActor<B: ComputeBackend> {
    id: ActorId,
    program: Arc<Program<B>>,
    kernel_name: String,
    kernel: B::Kernel,
    config: SpawnConfig,
    args: ArgList,
    map_input: Option<InputMapper>,
    map_output: Option<OutputMapper>,
    default_output_size: usize,
    mailbox_capacity: usize,
    stats: Arc<ActorStats>,
    runtime: Handle,
}

impl<B: ComputeBackend> ComputeActor<B> {
    /// Start building an actor for `kernel_name`.
    pub fn builder(
        program: Arc<Program<B>>,
        kernel_name: impl Into<String>,
        config: SpawnConfig,
    ) -> ComputeActorBuilder<B> {
        ComputeActorBuilder::new(program, kernel_name, config)
    }

    /// Actor id.
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Name of the bound kernel.
    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    /// Launch geometry.
    pub fn spawn_config(&self) -> &SpawnConfig {
        &self.config
    }

    /// Argument descriptors.
    pub fn args(&self) -> &ArgList {
        &self.args
    }

    /// Program the kernel belongs to.
    pub fn program(&self) -> &Arc<Program<B>> {
        &self.program
    }

    /// Current counters.
    pub fn stats(&self) -> ActorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Decide whether `message` is for this actor.
    ///
    /// Applies the input mapper, if any, then checks that the element types
    /// are exactly the input argument types in order. `None` means the
    /// message is not handled here; it is not an error.
    pub fn accept(&self, message: Message) -> Option<Message> {
        let message = match &self.map_input {
            Some(map_input) => map_input(&message)?,
            None => message,
        };
        self.args.accepts(&message).then_some(message)
    }

    /// Handle one mailbox envelope.
    pub fn handle(&self, envelope: Envelope) {
        self.stats.record_received();
        let Envelope { content, reply_to } = envelope;

        let Some(message) = self.accept(content) else {
            self.stats.record_unmatched();
            trace!(actor = %self.id, kernel = %self.kernel_name, "message not handled; dropped");
            return;
        };

        let correlation = reply_to.as_ref().map(ReplyTo::correlation);
        let launched = self
            .prepare(message, reply_to)
            .and_then(|command| command.enqueue(&self.kernel, &self.config.nd_range()));

        match launched {
            Ok(in_flight) => {
                self.stats.record_dispatched();
                self.runtime.spawn(in_flight.complete());
            }
            Err(e) => {
                error!(
                    actor = %self.id,
                    kernel = %self.kernel_name,
                    ?correlation,
                    "abandoning command: {}",
                    e
                );
                self.stats.record_failed();
            }
        }
    }

    /// Allocate buffers and enqueue the input writes for `message`.
    fn prepare(&self, message: Message, reply_to: Option<ReplyTo>) -> Result<Command<B>> {
        let backend = self.program.backend();
        let context = self.program.context();
        let queue = self.program.queue();

        let mut buffers = Vec::with_capacity(self.args.len());
        let mut write_events = Vec::new();
        let mut outputs = Vec::with_capacity(self.args.output_count());
        let mut fields = message.elements().iter();

        for (index, arg) in self.args.iter().enumerate() {
            let codec = *arg.codec();
            match arg.kind() {
                ArgKind::Input | ArgKind::InputOutput => {
                    let data = fields
                        .next()
                        .and_then(|element| codec.host_bytes(element))
                        .ok_or_else(|| {
                            ComputeError::resource("clEnqueueWriteBuffer", Status::INVALID_VALUE)
                        })?;
                    let len = data.len().checked_div(codec.element_size()).unwrap_or(0);

                    let buffer = backend
                        .create_buffer(context, arg.mem_access(), data.len())
                        .raise("clCreateBuffer")?;
                    let event = backend
                        .enqueue_write(queue, &buffer, data, &[])
                        .raise("clEnqueueWriteBuffer")?;
                    write_events.push(event);

                    if arg.is_output() {
                        outputs.push(OutputSlot {
                            buffer: index,
                            len,
                            codec,
                        });
                    }
                    buffers.push(buffer);
                }
                ArgKind::Output(size) => {
                    let len = size.resolve(&message, self.default_output_size);
                    let bytes = len.checked_mul(codec.element_size()).ok_or_else(|| {
                        ComputeError::resource("clCreateBuffer", Status::INVALID_BUFFER_SIZE)
                    })?;

                    let buffer = backend
                        .create_buffer(context, MemAccess::WriteOnly, bytes)
                        .raise("clCreateBuffer")?;
                    outputs.push(OutputSlot {
                        buffer: index,
                        len,
                        codec,
                    });
                    buffers.push(buffer);
                }
            }
        }

        Ok(Command::new(
            Arc::clone(backend),
            Arc::clone(queue),
            buffers,
            write_events,
            outputs,
            message,
            ReplyRoute {
                origin: self.id,
                reply_to,
                map_output: self.map_output.clone(),
                stats: Arc::clone(&self.stats),
            },
        ))
    }

    /// Start the mailbox loop and return a handle to it.
    pub fn start(self) -> ActorRef {
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let actor_ref = ActorRef::new(self.id, tx, Arc::clone(&self.stats));
        let runtime = self.runtime.clone();
        runtime.spawn(self.run(rx));
        actor_ref
    }

    async fn run(self, mut mailbox: mpsc::Receiver<Envelope>) {
        info!(
            "Compute actor {} started for kernel '{}' on device {}",
            self.id,
            self.kernel_name,
            self.program.device().id()
        );

        while let Some(envelope) = mailbox.recv().await {
            self.handle(envelope);
        }

        debug!(
            "Compute actor {} stopped ({:?})",
            self.id,
            self.stats.snapshot()
        );
    }
}

impl<B: ComputeBackend> fmt::Debug for ComputeActor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeActor")
            .field("id", &self.id)
            .field("kernel", &self.kernel_name)
            .field("config", &self.config)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ComputeActor`].
pub struct ComputeActorBuilder<B: ComputeBackend> {
    program: Arc<Program<B>>,
    kernel_name: String,
    config: SpawnConfig,
    args: Vec<Arg>,
    map_input: Option<InputMapper>,
    map_output: Option<OutputMapper>,
    mailbox_capacity: usize,
}

impl<B: ComputeBackend> ComputeActorBuilder<B> {
    /// Create a builder.
    pub fn new(program: Arc<Program<B>>, kernel_name: impl Into<String>, config: SpawnConfig) -> Self {
        Self {
            program,
            kernel_name: kernel_name.into(),
            config,
            args: Vec::new(),
            map_input: None,
            map_output: None,
            mailbox_capacity: ActorConfig::default().mailbox_capacity,
        }
    }

    /// Append an argument descriptor.
    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    /// Append several argument descriptors.
    pub fn args(mut self, args: impl IntoIterator<Item = Arg>) -> Self {
        self.args.extend(args);
        self
    }

    /// Set the input mapper.
    pub fn map_input<F>(mut self, map_input: F) -> Self
    where
        F: Fn(&Message) -> Option<Message> + Send + Sync + 'static,
    {
        self.map_input = Some(Arc::new(map_input));
        self
    }

    /// Set the output mapper.
    pub fn map_output<F>(mut self, map_output: F) -> Self
    where
        F: Fn(Message) -> Message + Send + Sync + 'static,
    {
        self.map_output = Some(Arc::new(map_output));
        self
    }

    /// Set the mailbox capacity.
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Apply actor defaults from configuration.
    pub fn actor_config(mut self, config: &ActorConfig) -> Self {
        self.mailbox_capacity = config.mailbox_capacity;
        self
    }

    /// Validate, resolve the kernel and create the actor without starting it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<ComputeActor<B>> {
        self.config.validate()?;
        if self.args.is_empty() {
            return Err(ComputeError::config(
                "kernel needs at least one argument descriptor",
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(ComputeError::config(
                "Mailbox capacity must be greater than 0",
            ));
        }

        let kernel = self.program.kernel(&self.kernel_name)?;
        let runtime = Handle::try_current().map_err(|e| ComputeError::NoRuntime(e.to_string()))?;

        Ok(ComputeActor {
            id: ActorId::next(),
            default_output_size: self.config.default_output_size(),
            program: self.program,
            kernel_name: self.kernel_name,
            kernel,
            config: self.config,
            args: ArgList::new(self.args),
            map_input: self.map_input,
            map_output: self.map_output,
            mailbox_capacity: self.mailbox_capacity,
            stats: Arc::default(),
            runtime,
        })
    }

    /// Build and start the actor.
    pub fn spawn(self) -> Result<ActorRef> {
        Ok(self.build()?.start())
    }
}

/// Spawn a compute actor for `kernel_name` of `program`.
pub fn spawn<B: ComputeBackend>(
    program: &Arc<Program<B>>,
    kernel_name: &str,
    config: SpawnConfig,
    args: impl IntoIterator<Item = Arg>,
) -> Result<ActorRef> {
    ComputeActor::builder(Arc::clone(program), kernel_name, config)
        .args(args)
        .spawn()
}

/// Build `source` for the first device of `registry` and spawn a compute
/// actor for `kernel_name`.
pub fn spawn_from_source<B: ComputeBackend>(
    registry: &DeviceRegistry<B>,
    source: &str,
    kernel_name: &str,
    config: SpawnConfig,
    args: impl IntoIterator<Item = Arg>,
) -> Result<ActorRef> {
    let program = Program::create(registry, source, None, 0)?;
    spawn(&program, kernel_name, config, args)
}
