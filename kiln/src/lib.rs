//! Command batching and submission for GPU devices.
//!
//! Operations (copies, compute dispatches, draws, presents, events and native commands) are
//! enqueued on a [`CommandQueue`] from any thread. The queue records them in a pending log and
//! periodically turns the log into a small number of command buffers: consecutive operations of
//! the same kind share an encoder, and consecutive draws only re-emit the state that changed.
pub mod backend;
mod command;
pub mod config;
pub mod device;
mod error;
mod event;
mod log;
mod marker;
mod pass;
pub mod plan;
mod present;
mod queue;
mod render;
mod resource;
mod staging;
mod stats;
mod submission;
mod sync;

pub use ash;
pub use ash::vk;

pub use backend::{NullDevice, RecordedCommandBuffer, RecordedItem, RecordingDevice};
pub use command::{
    BlitCommand, BufferBinding, ComputeCommand, ComputeDispatch, EventCallback, NativeCommand,
    Operation, OperationKind,
};
pub use config::{BackendKind, Config, QueueConfig, SurfaceConfig};
pub use device::{
    create_device, BlitEncoder, CommandBuffer, CompletionHandler, ComputeEncoder, Device,
    DeviceCaps, Drawable, RenderEncoder, ShaderLibrary, BLIT_FRAGMENT_FUNCTION, BLIT_VERTEX_FUNCTION,
};
pub use error::Error;
pub use event::SharedEvent;
pub use marker::Marker;
pub use pass::{ColorAttachment, DepthAttachment, RenderPassDescriptor};
pub use present::{PresentationDelegate, Presenter};
pub use queue::CommandQueue;
pub use render::{encode_draw, RenderCommand, RenderCommandSink, RenderDrawState, Stage, Viewport};
pub use resource::{
    BufferDesc, BufferId, ComputePipelineDesc, DepthStencilDesc, DepthStencilStateId, DrawableId,
    PipelineId, RenderPipelineDesc, Resource, ResourceId, ResourceKind, ResourceRegistry,
    SamplerDesc, SamplerId, TextureDesc, TextureId,
};
pub use staging::{StagingAllocation, StagingHeap, STAGING_ALIGNMENT};
pub use stats::QueueStats;
pub use sync::Latch;
