//! The command queue.
use crate::{
    command::{BlitCommand, ComputeDispatch, NativeCommand, Operation},
    config::QueueConfig,
    device::{
        CommandBuffer, Device, RenderEncoder, BLIT_FRAGMENT_FUNCTION, BLIT_VERTEX_FUNCTION,
    },
    event::SharedEvent,
    log::{BlitRecord, PendingLog, Record, RenderRecord},
    marker::{Marker, MarkerCounter},
    pass::{ColorAttachment, RenderPassDescriptor},
    render::{RenderDrawState, Viewport},
    resource::{BufferId, DrawableId, PipelineId, RenderPipelineDesc, TextureId},
    staging::Staging,
    stats::{QueueStats, StatCounters},
    submission::SubmissionEngine,
    sync::{InFlightLimiter, Latch},
    Error,
};
use ash::vk;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    mem,
    panic::{self, AssertUnwindSafe},
    process,
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};
use tracing::{debug, error, trace};

enum Request {
    Append(Vec<Record>),
    Flush,
    /// Flushes, then submits a dedicated command buffer.
    CommandBuffer(NativeCommand),
    Shutdown,
}

struct Envelope {
    request: Request,
    /// Set once the request has been processed by the execution thread.
    processed: Option<Arc<Latch>>,
}

enum Submission {
    Log(PendingLog),
    CommandBuffer(NativeCommand),
}

/// Batches operations from any thread into command buffers.
///
/// Operations are appended to a pending log owned by the queue's execution thread. The log is
/// handed to the submission thread when it reaches `max_pending_commands` operations, or on
/// [`flush`](CommandQueue::flush) and [`finish`](CommandQueue::finish). The submission thread
/// splits it into command buffers of at most `max_pending_commands / num_command_buffers`
/// operations and commits them in enqueue order.
///
/// Operations enqueued from the same thread are executed in the order they were enqueued.
/// Operations enqueued concurrently from several threads are executed in some total order.
///
/// Dropping the queue flushes the pending log and joins the queue's threads. It does not wait
/// for the device.
pub struct CommandQueue {
    device: Arc<dyn Device>,
    config: QueueConfig,
    requests: Mutex<mpsc::Sender<Envelope>>,
    event: Arc<SharedEvent>,
    markers: Arc<MarkerCounter>,
    staging: Arc<Staging>,
    stats: Arc<StatCounters>,
    blit_pipelines: Mutex<HashMap<vk::Format, PipelineId>>,
    execution_thread: Option<JoinHandle<()>>,
    submission_thread: Option<JoinHandle<()>>,
}

impl CommandQueue {
    pub fn new(device: Arc<dyn Device>, config: QueueConfig) -> Result<CommandQueue, Error> {
        config.validate()?;
        let staging = Arc::new(Staging::new(device.clone(), config.staging_heap_size)?);
        let event = SharedEvent::new("kiln queue event")?;
        let markers = Arc::new(MarkerCounter::new());
        let stats = Arc::new(StatCounters::default());

        let engine = SubmissionEngine {
            device: device.clone(),
            caps: device.capabilities(),
            event: event.clone(),
            markers: markers.clone(),
            staging: staging.clone(),
            in_flight: Arc::new(InFlightLimiter::new(config.max_command_buffers_in_flight)),
            stats: stats.clone(),
            window_size: config.window_size(),
        };

        let (submission_sender, submission_receiver) = mpsc::channel();
        let submission_thread = thread::Builder::new()
            .name("kiln submission".into())
            .spawn(move || run_submission_thread(engine, submission_receiver))?;

        let (request_sender, request_receiver) = mpsc::channel();
        let execution_thread = {
            let stats = stats.clone();
            let max_pending_commands = config.max_pending_commands;
            thread::Builder::new()
                .name("kiln execution".into())
                .spawn(move || {
                    run_execution_thread(
                        request_receiver,
                        submission_sender,
                        max_pending_commands,
                        &stats,
                    )
                })?
        };

        debug!(
            device = device.name(),
            window_size = config.window_size(),
            "created command queue"
        );

        Ok(CommandQueue {
            device,
            config,
            requests: Mutex::new(request_sender),
            event,
            markers,
            staging,
            stats,
            blit_pipelines: Mutex::new(HashMap::new()),
            execution_thread: Some(execution_thread),
            submission_thread: Some(submission_thread),
        })
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The event that event records are signaled on.
    pub fn shared_event(&self) -> &Arc<SharedEvent> {
        &self.event
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.snapshot()
    }

    /// Bytes of the staging heap not reclaimed yet, or `None` if the device has no heaps.
    pub fn staging_used(&self) -> Option<u64> {
        self.staging.used()
    }

    fn send(&self, request: Request, wait: bool) {
        let processed = if wait { Some(Arc::new(Latch::new())) } else { None };
        let envelope = Envelope {
            request,
            processed: processed.clone(),
        };
        if self.requests.lock().send(envelope).is_err() {
            panic!("command queue execution thread has stopped");
        }
        if let Some(processed) = processed {
            processed.wait();
        }
    }

    fn append(&self, records: Vec<Record>, wait: bool) {
        if !records.is_empty() {
            self.send(Request::Append(records), wait);
        }
    }

    /// Appends an operation and waits until it is in the pending log.
    pub fn enqueue(&self, op: Operation) {
        self.append(vec![op.into()], true);
    }

    /// Appends an operation without waiting.
    pub fn enqueue_async(&self, op: Operation) {
        self.append(vec![op.into()], false);
    }

    pub fn enqueue_blit(&self, command: BlitCommand) {
        self.enqueue(Operation::Blit(command));
    }

    pub fn enqueue_compute(&self, dispatch: ComputeDispatch) {
        self.enqueue_async(Operation::Compute(dispatch));
    }

    /// Runs `command` against the command buffer the operation ends up in.
    pub fn enqueue_native_command(
        &self,
        command: impl FnOnce(&mut dyn CommandBuffer) + Send + 'static,
    ) {
        self.enqueue(Operation::Native(Box::new(command)));
    }

    pub fn enqueue_native_commands(&self, commands: Vec<NativeCommand>) {
        self.append(commands.into_iter().map(Record::Native).collect(), true);
    }

    /// Runs `callback` once the device has executed every operation enqueued before it.
    pub fn enqueue_native_event(&self, callback: impl FnOnce() + Send + 'static) {
        self.enqueue(Operation::Event(Box::new(callback)));
    }

    /// Opens a render encoder on `pass` and lets `callback` encode into it.
    pub fn enqueue_native_render_command(
        &self,
        pass: Arc<RenderPassDescriptor>,
        callback: impl FnOnce(&mut dyn RenderEncoder) + Send + 'static,
    ) {
        self.enqueue_native_command(move |command_buffer| {
            let mut encoder = command_buffer.render_encoder(&pass);
            callback(&mut *encoder);
            encoder.end_encoding();
        });
    }

    /// Submits everything pending, then a command buffer filled by `command`.
    ///
    /// Returns once the command buffer has been handed to the submission thread.
    pub fn enqueue_native_command_buffer(
        &self,
        command: impl FnOnce(&mut dyn CommandBuffer) + Send + 'static,
    ) {
        self.send(Request::CommandBuffer(Box::new(command)), true);
    }

    /// Enqueues a render pass, with an optional draw.
    pub fn enqueue_render_pass(
        &self,
        pass: Arc<RenderPassDescriptor>,
        state: Option<Arc<RenderDrawState>>,
    ) {
        self.enqueue(Operation::Render { pass, state });
    }

    pub fn enqueue_render_passes(
        &self,
        passes: Vec<(Arc<RenderPassDescriptor>, Option<Arc<RenderDrawState>>)>,
    ) {
        self.append(
            passes
                .into_iter()
                .map(|(pass, state)| Record::Render(RenderRecord { pass, state }))
                .collect(),
            true,
        );
    }

    pub fn enqueue_present(&self, drawable: DrawableId) {
        self.enqueue(Operation::Present(drawable));
    }

    /// Copies `data` to `buffer` at `offset` through staging memory.
    ///
    /// With `blocking`, returns once the copy has executed.
    ///
    /// # Panics
    ///
    /// If staging memory is exhausted.
    pub fn enqueue_write(&self, buffer: BufferId, offset: u64, data: &[u8], blocking: bool) {
        if data.is_empty() {
            return;
        }
        let allocation = match self.staging.stage(data) {
            Ok(allocation) => allocation,
            Err(err) => {
                error!(%err, ?buffer, "enqueue_write failed");
                panic!("enqueue_write: {}", err);
            }
        };
        trace!(?buffer, offset, len = data.len(), "enqueue_write");
        let record = Record::Blit(BlitRecord {
            command: BlitCommand::CopyBuffer {
                src: allocation.buffer,
                src_offset: allocation.offset,
                dst: buffer,
                dst_offset: offset,
                size: allocation.size,
            },
            staging: Some(allocation),
        });
        self.append(vec![record], true);
        if blocking {
            self.finish();
        }
    }

    /// Draws `source` over the whole of `destination`.
    pub fn enqueue_copy_texture(
        &self,
        destination: TextureId,
        source: TextureId,
    ) -> Result<(), Error> {
        let desc = self
            .device
            .texture_desc(destination)
            .ok_or(Error::UnknownResource)?;
        let pipeline = self.blit_pipeline(desc.format)?;

        let pass = Arc::new(
            RenderPassDescriptor::new()
                .with_color_attachment(ColorAttachment::clear(destination, [0.0; 4])),
        );
        let mut state = RenderDrawState::new(
            pipeline,
            Viewport::new(desc.width as f32, desc.height as f32),
            vk::PrimitiveTopology::TRIANGLE_STRIP,
        );
        state.fragment_textures = vec![Some(source)];
        state.fragment_samplers = vec![None];
        state.count = 4;
        self.enqueue_render_pass(pass, Some(Arc::new(state)));
        Ok(())
    }

    fn blit_pipeline(&self, format: vk::Format) -> Result<PipelineId, Error> {
        let mut pipelines = self.blit_pipelines.lock();
        if let Some(&pipeline) = pipelines.get(&format) {
            return Ok(pipeline);
        }
        let desc = RenderPipelineDesc {
            vertex_function: BLIT_VERTEX_FUNCTION.to_string(),
            fragment_function: BLIT_FRAGMENT_FUNCTION.to_string(),
            color_format: format,
        };
        let pipeline = self
            .device
            .create_render_pipeline("blit pipeline", &desc)
            .ok_or_else(|| Error::ProgramCreation(format!("blit pipeline ({:?})", format)))?;
        pipelines.insert(format, pipeline);
        Ok(pipeline)
    }

    /// Allocates a marker for a native command that signals the shared event itself.
    pub fn reserve_marker(&self) -> Marker {
        self.markers.next()
    }

    /// Submits everything pending and blocks until the device has executed it.
    ///
    /// Must not be called from an event callback.
    pub fn finish(&self) {
        let done = Arc::new(Latch::new());
        let signal = done.clone();
        self.append(vec![Record::Event(Box::new(move || signal.set()))], false);
        self.flush_async();
        done.wait();
    }

    /// Submits everything pending. Returns once the pending log has been handed off.
    pub fn flush(&self) {
        self.send(Request::Flush, true);
    }

    pub fn flush_async(&self) {
        self.send(Request::Flush, false);
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        let _ = self.requests.lock().send(Envelope {
            request: Request::Shutdown,
            processed: None,
        });
        if let Some(thread) = self.execution_thread.take() {
            let _ = thread.join();
        }
        // the execution thread owned the last sender of the submission channel
        if let Some(thread) = self.submission_thread.take() {
            let _ = thread.join();
        }
        debug!("command queue stopped");
    }
}

fn hand_off(log: &mut PendingLog, submissions: &mpsc::Sender<Submission>) {
    if log.is_empty() {
        return;
    }
    let log = mem::take(log);
    if submissions.send(Submission::Log(log)).is_err() {
        error!("submission thread has stopped, pending operations dropped");
    }
}

fn run_execution_thread(
    requests: mpsc::Receiver<Envelope>,
    submissions: mpsc::Sender<Submission>,
    max_pending_commands: usize,
    stats: &StatCounters,
) {
    debug!("execution thread started");
    let mut log = PendingLog::new();
    for Envelope { request, processed } in requests.iter() {
        let shutdown = match request {
            Request::Append(records) => {
                StatCounters::add(&stats.operations, records.len() as u64);
                for record in records {
                    log.push(record);
                }
                if log.len() >= max_pending_commands {
                    trace!(len = log.len(), "pending log full");
                    hand_off(&mut log, &submissions);
                }
                false
            }
            Request::Flush => {
                hand_off(&mut log, &submissions);
                false
            }
            Request::CommandBuffer(command) => {
                hand_off(&mut log, &submissions);
                if submissions.send(Submission::CommandBuffer(command)).is_err() {
                    error!("submission thread has stopped, command buffer dropped");
                }
                false
            }
            Request::Shutdown => {
                hand_off(&mut log, &submissions);
                true
            }
        };
        if let Some(processed) = processed {
            processed.set();
        }
        if shutdown {
            break;
        }
    }
    debug!("execution thread stopped");
}

fn run_submission_thread(engine: SubmissionEngine, submissions: mpsc::Receiver<Submission>) {
    debug!("submission thread started");
    for submission in submissions.iter() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| match submission {
            Submission::Log(log) => engine.submit(log),
            Submission::CommandBuffer(command) => engine.submit_command_buffer(command),
        }));
        if result.is_err() {
            // the queue cannot make progress past a failed submission
            error!("submission failed, aborting");
            process::abort();
        }
    }
    debug!("submission thread stopped");
}
