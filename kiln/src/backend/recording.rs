use crate::{
    backend::Swapchain,
    command::{BlitCommand, ComputeCommand},
    config::SurfaceConfig,
    device::{
        BlitEncoder, CommandBuffer, CompletionHandler, ComputeEncoder, Device, DeviceCaps,
        Drawable, RenderEncoder, ShaderLibrary,
    },
    event::SharedEvent,
    marker::Marker,
    pass::RenderPassDescriptor,
    render::{RenderCommand, RenderCommandSink},
    resource::{BufferDesc, BufferId, DrawableId, ResourceId, ResourceKind, ResourceRegistry},
    Error,
};
use parking_lot::Mutex;
use serde_json::json;
use slotmap::SecondaryMap;
use std::{
    fs::File,
    io,
    ops::Range,
    path::Path,
    sync::{mpsc, Arc},
    thread,
};
use tracing::{debug, error, warn};

/// Default amount of buffer memory a recording device can allocate.
pub const DEFAULT_MEMORY_LIMIT: u64 = 1 << 30;

/// Something encoded into a recorded command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedItem {
    /// Commands of one blit encoder.
    Blit(Vec<BlitCommand>),
    /// Commands of one compute encoder.
    Compute(Vec<ComputeCommand>),
    /// Commands of one render encoder.
    Render {
        pass: Arc<RenderPassDescriptor>,
        commands: Vec<RenderCommand>,
    },
    SignalEvent(Marker),
    Present(DrawableId),
}

/// A command buffer as executed by a `RecordingDevice`.
#[derive(Clone, Debug, Default)]
pub struct RecordedCommandBuffer {
    /// Position in the device timeline, starting at 1.
    pub serial: u64,
    pub enqueued: bool,
    pub items: Vec<RecordedItem>,
}

impl RecordedCommandBuffer {
    /// Render encoders of this command buffer, in encoding order.
    pub fn render_encoders(&self) -> impl Iterator<Item = (&Arc<RenderPassDescriptor>, &[RenderCommand])> {
        self.items.iter().filter_map(|item| match item {
            RecordedItem::Render { pass, commands } => Some((pass, &commands[..])),
            _ => None,
        })
    }

    pub fn signaled_markers(&self) -> Vec<Marker> {
        self.items
            .iter()
            .filter_map(|item| match item {
                RecordedItem::SignalEvent(marker) => Some(*marker),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
struct HostMemory {
    buffers: SecondaryMap<ResourceId, Vec<u8>>,
    allocated: u64,
    limit: u64,
}

fn byte_range(offset: u64, size: u64, len: usize) -> Option<Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    (end <= len).then(|| start..end)
}

impl HostMemory {
    fn bytes(&self, buffer: BufferId, offset: u64, size: u64) -> Option<&[u8]> {
        let memory = self.buffers.get(buffer.resource())?;
        Some(&memory[byte_range(offset, size, memory.len())?])
    }

    fn bytes_mut(&mut self, buffer: BufferId, offset: u64, size: u64) -> Option<&mut [u8]> {
        let memory = self.buffers.get_mut(buffer.resource())?;
        let range = byte_range(offset, size, memory.len())?;
        Some(&mut memory[range])
    }

    fn execute(&mut self, command: &BlitCommand) {
        match *command {
            BlitCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let data = match self.bytes(src, src_offset, size) {
                    Some(data) => data.to_vec(),
                    None => {
                        warn!(?src, src_offset, size, "copy source out of bounds");
                        return;
                    }
                };
                match self.bytes_mut(dst, dst_offset, size) {
                    Some(target) => target.copy_from_slice(&data),
                    None => warn!(?dst, dst_offset, size, "copy destination out of bounds"),
                }
            }
            BlitCommand::FillBuffer {
                buffer,
                offset,
                size,
                value,
            } => match self.bytes_mut(buffer, offset, size) {
                Some(target) => target.fill(value),
                None => warn!(?buffer, offset, size, "fill out of bounds"),
            },
            // textures have no host storage
            BlitCommand::CopyTexture { .. } => {}
        }
    }
}

struct Submitted {
    record: RecordedCommandBuffer,
    signals: Vec<(Arc<SharedEvent>, Marker)>,
    handlers: Vec<CompletionHandler>,
}

/// A device that records every command buffer it executes.
///
/// Committed command buffers execute in commit order on a timeline thread: buffer copies and
/// fills are applied to host memory, then the command buffer is appended to the trace, events are
/// signaled and completion handlers run.
pub struct RecordingDevice {
    resources: ResourceRegistry,
    library: ShaderLibrary,
    memory: Arc<Mutex<HostMemory>>,
    trace: Arc<Mutex<Vec<RecordedCommandBuffer>>>,
    timeline: Mutex<mpsc::Sender<Submitted>>,
    swapchain: Mutex<Option<Swapchain>>,
}

impl RecordingDevice {
    pub fn new() -> io::Result<RecordingDevice> {
        let memory = Arc::new(Mutex::new(HostMemory {
            buffers: SecondaryMap::new(),
            allocated: 0,
            limit: DEFAULT_MEMORY_LIMIT,
        }));
        let trace = Arc::new(Mutex::new(Vec::new()));
        let (sender, receiver) = mpsc::channel();

        {
            let memory = memory.clone();
            let trace = trace.clone();
            thread::Builder::new()
                .name("recording device timeline".into())
                .spawn(move || run_timeline(receiver, memory, trace))?;
        }

        Ok(RecordingDevice {
            resources: ResourceRegistry::new(),
            library: ShaderLibrary::with_builtins(),
            memory,
            trace,
            timeline: Mutex::new(sender),
            swapchain: Mutex::new(None),
        })
    }

    /// Limits the total size of the buffers the device can create.
    pub fn with_memory_limit(self, limit: u64) -> RecordingDevice {
        self.memory.lock().limit = limit;
        self
    }

    pub fn with_library(mut self, library: ShaderLibrary) -> RecordingDevice {
        self.library = library;
        self
    }

    pub fn with_surface(self, config: &SurfaceConfig) -> RecordingDevice {
        *self.swapchain.lock() = Some(Swapchain::new(&self.resources, config));
        self
    }

    /// Command buffers executed so far, in execution order.
    pub fn trace(&self) -> Vec<RecordedCommandBuffer> {
        self.trace.lock().clone()
    }

    pub fn clear_trace(&self) {
        self.trace.lock().clear();
    }

    /// Bytes of buffer memory currently allocated.
    pub fn allocated_memory(&self) -> u64 {
        self.memory.lock().allocated
    }

    /// Writes the trace to a JSON file.
    pub fn dump_trace(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let trace = self.trace.lock();
        let command_buffers: Vec<_> = trace
            .iter()
            .map(|command_buffer| {
                let items: Vec<_> = command_buffer.items.iter().map(item_json).collect();
                json!({
                    "serial": command_buffer.serial,
                    "enqueued": command_buffer.enqueued,
                    "items": items,
                })
            })
            .collect();
        let trace_json = json!({
            "device": self.name(),
            "commandBuffers": command_buffers,
        });
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &trace_json)?;
        Ok(())
    }
}

fn item_json(item: &RecordedItem) -> serde_json::Value {
    fn debug_list<T: std::fmt::Debug>(list: &[T]) -> Vec<String> {
        list.iter().map(|x| format!("{:?}", x)).collect()
    }

    match item {
        RecordedItem::Blit(commands) => json!({
            "type": "blit",
            "commands": debug_list(commands),
        }),
        RecordedItem::Compute(commands) => json!({
            "type": "compute",
            "commands": debug_list(commands),
        }),
        RecordedItem::Render { pass, commands } => json!({
            "type": "render",
            "colorAttachments": debug_list(&pass.color_attachments),
            "depthAttachment": pass.depth_attachment.as_ref().map(|a| format!("{:?}", a)),
            "commands": debug_list(commands),
        }),
        RecordedItem::SignalEvent(marker) => json!({
            "type": "signalEvent",
            "marker": marker.value(),
        }),
        RecordedItem::Present(drawable) => json!({
            "type": "present",
            "drawable": format!("{:?}", drawable),
        }),
    }
}

fn run_timeline(
    receiver: mpsc::Receiver<Submitted>,
    memory: Arc<Mutex<HostMemory>>,
    trace: Arc<Mutex<Vec<RecordedCommandBuffer>>>,
) {
    debug!("device timeline started");
    for submitted in receiver.iter() {
        let Submitted {
            mut record,
            signals,
            handlers,
        } = submitted;

        {
            let mut memory = memory.lock();
            for item in &record.items {
                if let RecordedItem::Blit(commands) = item {
                    for command in commands {
                        memory.execute(command);
                    }
                }
            }
        }

        {
            let mut trace = trace.lock();
            record.serial = trace.len() as u64 + 1;
            trace.push(record);
        }

        for (event, marker) in signals {
            event.signal(marker);
        }
        for handler in handlers {
            handler();
        }
    }
    debug!("device timeline stopped");
}

impl Device for RecordingDevice {
    fn name(&self) -> &str {
        "recording"
    }

    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::HEAPS | DeviceCaps::DISPATCH_THREADS
    }

    fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    fn library(&self) -> &ShaderLibrary {
        &self.library
    }

    fn create_command_buffer(&self) -> Box<dyn CommandBuffer> {
        Box::new(RecordingCommandBuffer {
            record: RecordedCommandBuffer::default(),
            signals: Vec::new(),
            handlers: Vec::new(),
            timeline: self.timeline.lock().clone(),
        })
    }

    fn create_buffer(&self, name: &str, desc: &BufferDesc) -> Option<BufferId> {
        let mut memory = self.memory.lock();
        let len = usize::try_from(desc.size).ok()?;
        if memory.allocated + desc.size > memory.limit {
            warn!(
                buffer = name,
                size = desc.size,
                allocated = memory.allocated,
                limit = memory.limit,
                "out of device memory"
            );
            return None;
        }
        let id = self.resources.register(name, ResourceKind::Buffer(*desc));
        memory.buffers.insert(id, vec![0; len]);
        memory.allocated += desc.size;
        Some(BufferId(id))
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) {
        let mut memory = self.memory.lock();
        match memory.bytes_mut(buffer, offset, data.len() as u64) {
            Some(target) => target.copy_from_slice(data),
            None => error!(?buffer, offset, len = data.len(), "buffer write out of bounds"),
        }
    }

    fn read_buffer(&self, buffer: BufferId, offset: u64, len: usize) -> Option<Vec<u8>> {
        self.memory
            .lock()
            .bytes(buffer, offset, len as u64)
            .map(|bytes| bytes.to_vec())
    }

    fn next_drawable(&self) -> Option<Drawable> {
        self.swapchain.lock().as_mut()?.acquire()
    }

    fn retire(&self, id: ResourceId) {
        self.resources.retire(id);
        let mut memory = self.memory.lock();
        if let Some(bytes) = memory.buffers.remove(id) {
            memory.allocated -= bytes.len() as u64;
        }
    }
}

struct RecordingCommandBuffer {
    record: RecordedCommandBuffer,
    signals: Vec<(Arc<SharedEvent>, Marker)>,
    handlers: Vec<CompletionHandler>,
    timeline: mpsc::Sender<Submitted>,
}

struct RecordingBlitEncoder<'a> {
    items: &'a mut Vec<RecordedItem>,
    commands: Vec<BlitCommand>,
}

impl BlitEncoder for RecordingBlitEncoder<'_> {
    fn record(&mut self, command: &BlitCommand) {
        self.commands.push(command.clone());
    }

    fn end_encoding(self: Box<Self>) {
        let this = *self;
        this.items.push(RecordedItem::Blit(this.commands));
    }
}

struct RecordingComputeEncoder<'a> {
    items: &'a mut Vec<RecordedItem>,
    commands: Vec<ComputeCommand>,
}

impl ComputeEncoder for RecordingComputeEncoder<'_> {
    fn record(&mut self, command: ComputeCommand) {
        self.commands.push(command);
    }

    fn end_encoding(self: Box<Self>) {
        let this = *self;
        this.items.push(RecordedItem::Compute(this.commands));
    }
}

struct RecordingRenderEncoder<'a> {
    items: &'a mut Vec<RecordedItem>,
    pass: Arc<RenderPassDescriptor>,
    commands: Vec<RenderCommand>,
}

impl RenderCommandSink for RecordingRenderEncoder<'_> {
    fn record(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }
}

impl RenderEncoder for RecordingRenderEncoder<'_> {
    fn end_encoding(self: Box<Self>) {
        let this = *self;
        this.items.push(RecordedItem::Render {
            pass: this.pass,
            commands: this.commands,
        });
    }
}

impl CommandBuffer for RecordingCommandBuffer {
    fn enqueue(&mut self) {
        self.record.enqueued = true;
    }

    fn blit_encoder(&mut self) -> Box<dyn BlitEncoder + '_> {
        Box::new(RecordingBlitEncoder {
            items: &mut self.record.items,
            commands: Vec::new(),
        })
    }

    fn compute_encoder(&mut self) -> Box<dyn ComputeEncoder + '_> {
        Box::new(RecordingComputeEncoder {
            items: &mut self.record.items,
            commands: Vec::new(),
        })
    }

    fn render_encoder(&mut self, pass: &Arc<RenderPassDescriptor>) -> Box<dyn RenderEncoder + '_> {
        Box::new(RecordingRenderEncoder {
            items: &mut self.record.items,
            pass: pass.clone(),
            commands: Vec::new(),
        })
    }

    fn encode_signal_event(&mut self, event: &Arc<SharedEvent>, marker: Marker) {
        self.record.items.push(RecordedItem::SignalEvent(marker));
        self.signals.push((event.clone(), marker));
    }

    fn present(&mut self, drawable: DrawableId) {
        self.record.items.push(RecordedItem::Present(drawable));
    }

    fn add_completed_handler(&mut self, handler: CompletionHandler) {
        self.handlers.push(handler);
    }

    fn commit(self: Box<Self>) {
        let RecordingCommandBuffer {
            record,
            signals,
            handlers,
            timeline,
        } = *self;
        let submitted = Submitted {
            record,
            signals,
            handlers,
        };
        if timeline.send(submitted).is_err() {
            error!("device timeline has stopped, command buffer dropped");
        }
    }
}
