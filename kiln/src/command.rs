//! Operations accepted by the command queue.
use crate::{
    device::CommandBuffer,
    pass::RenderPassDescriptor,
    render::RenderDrawState,
    resource::{BufferId, DrawableId, PipelineId, TextureId},
};
use std::{fmt, sync::Arc};

/// Kind of a pending operation. Each kind has its own side table in the pending log.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OperationKind {
    Blit,
    Compute,
    Event,
    Native,
    Present,
    Render,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Blit,
        OperationKind::Compute,
        OperationKind::Event,
        OperationKind::Native,
        OperationKind::Present,
        OperationKind::Render,
    ];

    pub(crate) const fn index(self) -> usize {
        match self {
            OperationKind::Blit => 0,
            OperationKind::Compute => 1,
            OperationKind::Event => 2,
            OperationKind::Native => 3,
            OperationKind::Present => 4,
            OperationKind::Render => 5,
        }
    }
}

/// A buffer bound at an offset.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BufferBinding {
    pub buffer: BufferId,
    pub offset: u64,
}

impl BufferBinding {
    pub const fn new(buffer: BufferId, offset: u64) -> BufferBinding {
        BufferBinding { buffer, offset }
    }
}

/// Transfer commands. Consecutive blits share one blit encoder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BlitCommand {
    CopyBuffer {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    FillBuffer {
        buffer: BufferId,
        offset: u64,
        size: u64,
        value: u8,
    },
    CopyTexture {
        src: TextureId,
        dst: TextureId,
    },
}

/// A compute dispatch with its bindings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeDispatch {
    pub pipeline: PipelineId,
    pub buffers: Vec<Option<BufferBinding>>,
    pub textures: Vec<Option<TextureId>>,
    /// Number of threads in each dimension.
    pub grid: [u32; 3],
    pub threads_per_group: [u32; 3],
}

/// Commands replayed into a compute encoder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ComputeCommand {
    SetPipeline(PipelineId),
    SetBuffer {
        index: u32,
        buffer: Option<BufferId>,
        offset: u64,
    },
    SetTexture {
        index: u32,
        texture: Option<TextureId>,
    },
    /// Non-uniform dispatch over exactly `threads` threads.
    DispatchThreads {
        threads: [u32; 3],
        threads_per_group: [u32; 3],
    },
    DispatchThreadgroups {
        groups: [u32; 3],
        threads_per_group: [u32; 3],
    },
}

/// Callback run once the device has reached an event.
pub type EventCallback = Box<dyn FnOnce() + Send>;

/// Closure run against the command buffer being encoded.
pub type NativeCommand = Box<dyn FnOnce(&mut dyn CommandBuffer) + Send>;

/// A pending operation.
pub enum Operation {
    Blit(BlitCommand),
    Compute(ComputeDispatch),
    Event(EventCallback),
    Native(NativeCommand),
    Present(DrawableId),
    /// A render pass, with an optional draw. Without a draw, the record only opens (or keeps)
    /// the pass, which is enough to run its load actions.
    Render {
        pass: Arc<RenderPassDescriptor>,
        state: Option<Arc<RenderDrawState>>,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Blit(_) => OperationKind::Blit,
            Operation::Compute(_) => OperationKind::Compute,
            Operation::Event(_) => OperationKind::Event,
            Operation::Native(_) => OperationKind::Native,
            Operation::Present(_) => OperationKind::Present,
            Operation::Render { .. } => OperationKind::Render,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Blit(command) => f.debug_tuple("Blit").field(command).finish(),
            Operation::Compute(dispatch) => f.debug_tuple("Compute").field(dispatch).finish(),
            Operation::Event(_) => f.write_str("Event"),
            Operation::Native(_) => f.write_str("Native"),
            Operation::Present(drawable) => f.debug_tuple("Present").field(drawable).finish(),
            Operation::Render { pass, state } => f
                .debug_struct("Render")
                .field("pass", &Arc::as_ptr(pass))
                .field("draw", &state.is_some())
                .finish(),
        }
    }
}
