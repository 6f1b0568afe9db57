//! Interface to the native device.
use crate::{
    backend::{NullDevice, RecordingDevice},
    command::{BlitCommand, ComputeCommand},
    config::{BackendKind, SurfaceConfig},
    event::SharedEvent,
    marker::Marker,
    pass::RenderPassDescriptor,
    render::RenderCommandSink,
    resource::{
        BufferDesc, BufferId, ComputePipelineDesc, DepthStencilDesc, DepthStencilStateId,
        DrawableId, PipelineId, RenderPipelineDesc, ResourceId, ResourceKind, ResourceRegistry,
        SamplerDesc, SamplerId, TextureDesc, TextureId,
    },
    Error,
};
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};
use tracing::debug;

bitflags::bitflags! {
    /// Optional device features.
    pub struct DeviceCaps: u32 {
        /// Buffers can be sub-allocated from a fixed-size heap.
        const HEAPS = 1 << 0;
        /// Compute dispatches can cover a thread grid that is not a multiple of the threadgroup size.
        const DISPATCH_THREADS = 1 << 1;
    }
}

/// Vertex function of the full-screen copy pipeline.
pub const BLIT_VERTEX_FUNCTION: &str = "blit_vertex";
/// Fragment function of the full-screen copy pipeline.
pub const BLIT_FRAGMENT_FUNCTION: &str = "blit_fragment";

/// Names of the shader functions pipelines can be created from.
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    functions: Mutex<HashSet<String>>,
}

impl ShaderLibrary {
    /// An empty library.
    pub fn new() -> ShaderLibrary {
        ShaderLibrary::default()
    }

    /// A library with the functions of the full-screen copy pipeline.
    pub fn with_builtins() -> ShaderLibrary {
        let library = ShaderLibrary::new();
        library.add(BLIT_VERTEX_FUNCTION);
        library.add(BLIT_FRAGMENT_FUNCTION);
        library
    }

    pub fn add(&self, function: &str) {
        self.functions.lock().insert(function.to_string());
    }

    pub fn contains(&self, function: &str) -> bool {
        self.functions.lock().contains(function)
    }
}

/// A presentable surface image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Drawable {
    pub id: DrawableId,
    pub texture: TextureId,
}

/// Called on the device's completion context once a command buffer has finished executing.
pub type CompletionHandler = Box<dyn FnOnce() + Send>;

/// A device the command queue submits to.
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> DeviceCaps;

    /// Registry of the objects created by this device.
    fn resources(&self) -> &ResourceRegistry;

    fn library(&self) -> &ShaderLibrary;

    fn create_command_buffer(&self) -> Box<dyn CommandBuffer>;

    /// Creates a buffer, or returns `None` if device memory is exhausted.
    fn create_buffer(&self, name: &str, desc: &BufferDesc) -> Option<BufferId>;

    /// Writes to a host-visible buffer.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]);

    /// Reads back the contents of a buffer, if the device keeps them on the host.
    fn read_buffer(&self, buffer: BufferId, offset: u64, len: usize) -> Option<Vec<u8>>;

    /// Acquires the next image of the device's surface.
    fn next_drawable(&self) -> Option<Drawable>;

    fn create_texture(&self, name: &str, desc: &TextureDesc) -> TextureId {
        TextureId(self.resources().register(name, ResourceKind::Texture(*desc)))
    }

    fn create_sampler(&self, name: &str, desc: &SamplerDesc) -> SamplerId {
        SamplerId(self.resources().register(name, ResourceKind::Sampler(*desc)))
    }

    fn create_depth_stencil_state(&self, name: &str, desc: &DepthStencilDesc) -> DepthStencilStateId {
        DepthStencilStateId(
            self.resources()
                .register(name, ResourceKind::DepthStencilState(*desc)),
        )
    }

    /// Creates a render pipeline. Returns `None` if a function is missing from the library.
    fn create_render_pipeline(&self, name: &str, desc: &RenderPipelineDesc) -> Option<PipelineId> {
        for function in [&desc.vertex_function, &desc.fragment_function] {
            if !self.library().contains(function) {
                debug!(pipeline = name, function = function.as_str(), "missing shader function");
                return None;
            }
        }
        Some(PipelineId(self.resources().register(
            name,
            ResourceKind::RenderPipeline(desc.clone()),
        )))
    }

    fn create_compute_pipeline(&self, name: &str, desc: &ComputePipelineDesc) -> Option<PipelineId> {
        if !self.library().contains(&desc.function) {
            debug!(pipeline = name, function = desc.function.as_str(), "missing shader function");
            return None;
        }
        Some(PipelineId(self.resources().register(
            name,
            ResourceKind::ComputePipeline(desc.clone()),
        )))
    }

    fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        match self.resources().kind(texture.resource()) {
            Some(ResourceKind::Texture(desc)) => Some(desc),
            _ => None,
        }
    }

    /// Destroys a device object.
    ///
    /// # Panics
    ///
    /// If the object was already retired.
    fn retire(&self, id: ResourceId) {
        self.resources().retire(id);
    }
}

/// Creates the device selected by `kind`.
pub fn create_device(
    kind: BackendKind,
    surface: Option<SurfaceConfig>,
) -> Result<Arc<dyn Device>, Error> {
    let device: Arc<dyn Device> = match kind {
        BackendKind::Recording => {
            let device = RecordingDevice::new()?;
            Arc::new(match surface {
                Some(surface) => device.with_surface(&surface),
                None => device,
            })
        }
        BackendKind::Null => {
            let device = NullDevice::new();
            Arc::new(match surface {
                Some(surface) => device.with_surface(&surface),
                None => device,
            })
        }
    };
    Ok(device)
}

/// A native command buffer.
pub trait CommandBuffer: Send {
    /// Reserves the position of this command buffer in the device queue.
    fn enqueue(&mut self);

    fn blit_encoder(&mut self) -> Box<dyn BlitEncoder + '_>;

    fn compute_encoder(&mut self) -> Box<dyn ComputeEncoder + '_>;

    fn render_encoder(&mut self, pass: &Arc<RenderPassDescriptor>) -> Box<dyn RenderEncoder + '_>;

    /// Signals `event` at `marker` once the device reaches this point.
    fn encode_signal_event(&mut self, event: &Arc<SharedEvent>, marker: Marker);

    fn present(&mut self, drawable: DrawableId);

    fn add_completed_handler(&mut self, handler: CompletionHandler);

    /// Submits the command buffer. Completion handlers run once it has executed.
    fn commit(self: Box<Self>);
}

pub trait BlitEncoder {
    fn record(&mut self, command: &BlitCommand);
    fn end_encoding(self: Box<Self>);
}

pub trait ComputeEncoder {
    fn record(&mut self, command: ComputeCommand);
    fn end_encoding(self: Box<Self>);
}

pub trait RenderEncoder: RenderCommandSink {
    fn end_encoding(self: Box<Self>);
}
