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
    resource::{BufferDesc, BufferId, DrawableId, ResourceKind, ResourceRegistry},
};
use parking_lot::Mutex;
use std::sync::Arc;

/// A device that executes nothing.
///
/// Command buffers complete as soon as they are committed, on the committing thread.
/// The device has no optional capabilities.
#[derive(Debug)]
pub struct NullDevice {
    resources: ResourceRegistry,
    library: ShaderLibrary,
    swapchain: Mutex<Option<Swapchain>>,
}

impl NullDevice {
    pub fn new() -> NullDevice {
        NullDevice {
            resources: ResourceRegistry::new(),
            library: ShaderLibrary::with_builtins(),
            swapchain: Mutex::new(None),
        }
    }

    pub fn with_surface(self, config: &SurfaceConfig) -> NullDevice {
        *self.swapchain.lock() = Some(Swapchain::new(&self.resources, config));
        self
    }
}

impl Device for NullDevice {
    fn name(&self) -> &str {
        "null"
    }

    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::empty()
    }

    fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    fn library(&self) -> &ShaderLibrary {
        &self.library
    }

    fn create_command_buffer(&self) -> Box<dyn CommandBuffer> {
        Box::new(NullCommandBuffer::default())
    }

    fn create_buffer(&self, name: &str, desc: &BufferDesc) -> Option<BufferId> {
        Some(BufferId(self.resources.register(name, ResourceKind::Buffer(*desc))))
    }

    fn write_buffer(&self, _buffer: BufferId, _offset: u64, _data: &[u8]) {}

    fn read_buffer(&self, _buffer: BufferId, _offset: u64, _len: usize) -> Option<Vec<u8>> {
        None
    }

    fn next_drawable(&self) -> Option<Drawable> {
        self.swapchain.lock().as_mut()?.acquire()
    }
}

#[derive(Default)]
struct NullCommandBuffer {
    signals: Vec<(Arc<SharedEvent>, Marker)>,
    handlers: Vec<CompletionHandler>,
}

struct NullEncoder;

impl BlitEncoder for NullEncoder {
    fn record(&mut self, _command: &BlitCommand) {}
    fn end_encoding(self: Box<Self>) {}
}

impl ComputeEncoder for NullEncoder {
    fn record(&mut self, _command: ComputeCommand) {}
    fn end_encoding(self: Box<Self>) {}
}

impl RenderCommandSink for NullEncoder {
    fn record(&mut self, _command: RenderCommand) {}
}

impl RenderEncoder for NullEncoder {
    fn end_encoding(self: Box<Self>) {}
}

impl CommandBuffer for NullCommandBuffer {
    fn enqueue(&mut self) {}

    fn blit_encoder(&mut self) -> Box<dyn BlitEncoder + '_> {
        Box::new(NullEncoder)
    }

    fn compute_encoder(&mut self) -> Box<dyn ComputeEncoder + '_> {
        Box::new(NullEncoder)
    }

    fn render_encoder(&mut self, _pass: &Arc<RenderPassDescriptor>) -> Box<dyn RenderEncoder + '_> {
        Box::new(NullEncoder)
    }

    fn encode_signal_event(&mut self, event: &Arc<SharedEvent>, marker: Marker) {
        self.signals.push((event.clone(), marker));
    }

    fn present(&mut self, _drawable: DrawableId) {}

    fn add_completed_handler(&mut self, handler: CompletionHandler) {
        self.handlers.push(handler);
    }

    fn commit(self: Box<Self>) {
        let NullCommandBuffer { signals, handlers } = *self;
        for (event, marker) in signals {
            event.signal(marker);
        }
        for handler in handlers {
            handler();
        }
    }
}
