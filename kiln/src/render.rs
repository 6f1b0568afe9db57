//! Draw snapshots and redundant state elimination.
//!
//! Each render record carries an immutable [`RenderDrawState`] describing everything a draw needs.
//! When consecutive draws are encoded into the same render encoder, [`encode_draw`] compares the
//! snapshot with the one of the previous draw and only emits the state that changed.
//! Resource handles are compared by identity, scalar state by value.
use crate::{
    command::BufferBinding,
    resource::{BufferId, DepthStencilStateId, PipelineId, SamplerId, TextureId},
};
use ash::vk;

/// Viewport transform of a draw.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// A viewport covering `width` x `height` pixels from the origin, with the full depth range.
    pub fn new(width: f32, height: f32) -> Viewport {
        Viewport {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Shader stage of a binding.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

/// Snapshot of the state of a single draw.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderDrawState {
    pub pipeline: PipelineId,
    pub depth_stencil: Option<DepthStencilStateId>,
    pub stencil_reference: u32,
    pub viewport: Viewport,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub blend_enabled: bool,
    pub blend_color: [f32; 4],
    pub vertex_buffers: Vec<Option<BufferBinding>>,
    pub fragment_buffers: Vec<Option<BufferBinding>>,
    pub vertex_textures: Vec<Option<TextureId>>,
    pub fragment_textures: Vec<Option<TextureId>>,
    pub vertex_samplers: Vec<Option<SamplerId>>,
    pub fragment_samplers: Vec<Option<SamplerId>>,
    pub topology: vk::PrimitiveTopology,
    /// Vertex count, or index count for indexed draws.
    pub count: u32,
    /// First vertex, or byte offset into the index buffer for indexed draws.
    pub start: u64,
    pub index_buffer: Option<BufferId>,
    pub index_type: vk::IndexType,
}

impl RenderDrawState {
    pub fn new(
        pipeline: PipelineId,
        viewport: Viewport,
        topology: vk::PrimitiveTopology,
    ) -> RenderDrawState {
        RenderDrawState {
            pipeline,
            depth_stencil: None,
            stencil_reference: 0,
            viewport,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend_enabled: false,
            blend_color: [0.0; 4],
            vertex_buffers: Vec::new(),
            fragment_buffers: Vec::new(),
            vertex_textures: Vec::new(),
            fragment_textures: Vec::new(),
            vertex_samplers: Vec::new(),
            fragment_samplers: Vec::new(),
            topology,
            count: 0,
            start: 0,
            index_buffer: None,
            index_type: vk::IndexType::UINT16,
        }
    }
}

/// Commands of a render encoder.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderCommand {
    SetPipeline(PipelineId),
    SetDepthStencilState(DepthStencilStateId),
    SetStencilReference(u32),
    SetViewport(Viewport),
    SetCullMode(vk::CullModeFlags),
    SetFrontFace(vk::FrontFace),
    SetBlendColor([f32; 4]),
    /// Binds a buffer, or unbinds the slot if `buffer` is `None`.
    SetBuffer {
        stage: Stage,
        index: u32,
        buffer: Option<BufferId>,
        offset: u64,
    },
    /// Changes the offset of the buffer already bound at `index`.
    SetBufferOffset {
        stage: Stage,
        index: u32,
        offset: u64,
    },
    SetTexture {
        stage: Stage,
        index: u32,
        texture: Option<TextureId>,
    },
    SetSampler {
        stage: Stage,
        index: u32,
        sampler: Option<SamplerId>,
    },
    Draw {
        topology: vk::PrimitiveTopology,
        vertex_start: u64,
        vertex_count: u32,
    },
    DrawIndexed {
        topology: vk::PrimitiveTopology,
        index_count: u32,
        index_type: vk::IndexType,
        index_buffer: BufferId,
        index_buffer_offset: u64,
    },
}

/// Destination of render commands.
pub trait RenderCommandSink {
    fn record(&mut self, command: RenderCommand);
}

impl RenderCommandSink for Vec<RenderCommand> {
    fn record(&mut self, command: RenderCommand) {
        self.push(command)
    }
}

/// Emits the commands needed to go from the `previous` draw state to `current`, followed by the draw.
///
/// `previous` is the state of the last draw in the same render encoder; with `None`, all the
/// state of `current` is emitted.
pub fn encode_draw<S: RenderCommandSink + ?Sized>(
    sink: &mut S,
    current: &RenderDrawState,
    previous: Option<&RenderDrawState>,
) {
    if previous.map(|p| p.pipeline) != Some(current.pipeline) {
        sink.record(RenderCommand::SetPipeline(current.pipeline));
    }

    if let Some(depth_stencil) = current.depth_stencil {
        if previous.and_then(|p| p.depth_stencil) != Some(depth_stencil) {
            sink.record(RenderCommand::SetDepthStencilState(depth_stencil));
        }
        // the reference of a draw without depth/stencil state was never set on the encoder
        let previous_reference = previous
            .filter(|p| p.depth_stencil.is_some())
            .map(|p| p.stencil_reference);
        if previous_reference != Some(current.stencil_reference) {
            sink.record(RenderCommand::SetStencilReference(current.stencil_reference));
        }
    }

    if previous.map(|p| p.viewport) != Some(current.viewport) {
        sink.record(RenderCommand::SetViewport(current.viewport));
    }
    if previous.map(|p| p.cull_mode) != Some(current.cull_mode) {
        sink.record(RenderCommand::SetCullMode(current.cull_mode));
    }
    if previous.map(|p| p.front_face) != Some(current.front_face) {
        sink.record(RenderCommand::SetFrontFace(current.front_face));
    }

    if current.blend_enabled
        && previous.map_or(true, |p| {
            !p.blend_enabled || p.blend_color != current.blend_color
        })
    {
        sink.record(RenderCommand::SetBlendColor(current.blend_color));
    }

    encode_buffers(
        sink,
        Stage::Vertex,
        &current.vertex_buffers,
        previous.map(|p| &p.vertex_buffers[..]),
    );
    encode_buffers(
        sink,
        Stage::Fragment,
        &current.fragment_buffers,
        previous.map(|p| &p.fragment_buffers[..]),
    );

    encode_slots(
        &current.vertex_textures,
        previous.map(|p| &p.vertex_textures[..]),
        |index, texture| {
            sink.record(RenderCommand::SetTexture {
                stage: Stage::Vertex,
                index,
                texture,
            })
        },
    );
    encode_slots(
        &current.vertex_samplers,
        previous.map(|p| &p.vertex_samplers[..]),
        |index, sampler| {
            sink.record(RenderCommand::SetSampler {
                stage: Stage::Vertex,
                index,
                sampler,
            })
        },
    );
    encode_slots(
        &current.fragment_textures,
        previous.map(|p| &p.fragment_textures[..]),
        |index, texture| {
            sink.record(RenderCommand::SetTexture {
                stage: Stage::Fragment,
                index,
                texture,
            })
        },
    );
    encode_slots(
        &current.fragment_samplers,
        previous.map(|p| &p.fragment_samplers[..]),
        |index, sampler| {
            sink.record(RenderCommand::SetSampler {
                stage: Stage::Fragment,
                index,
                sampler,
            })
        },
    );

    match current.index_buffer {
        Some(index_buffer) => sink.record(RenderCommand::DrawIndexed {
            topology: current.topology,
            index_count: current.count,
            index_type: current.index_type,
            index_buffer,
            index_buffer_offset: current.start,
        }),
        None => sink.record(RenderCommand::Draw {
            topology: current.topology,
            vertex_start: current.start,
            vertex_count: current.count,
        }),
    }
}

fn encode_buffers<S: RenderCommandSink + ?Sized>(
    sink: &mut S,
    stage: Stage,
    buffers: &[Option<BufferBinding>],
    previous: Option<&[Option<BufferBinding>]>,
) {
    for (index, binding) in buffers.iter().enumerate() {
        // slots past the end of the previous list have no binding
        let bound = previous.and_then(|p| p.get(index).copied().flatten());
        let index = index as u32;
        match (binding, bound) {
            (None, Some(_)) => sink.record(RenderCommand::SetBuffer {
                stage,
                index,
                buffer: None,
                offset: 0,
            }),
            (None, None) => {}
            (Some(binding), Some(bound)) if binding.buffer == bound.buffer => {
                if binding.offset != bound.offset {
                    sink.record(RenderCommand::SetBufferOffset {
                        stage,
                        index,
                        offset: binding.offset,
                    });
                }
            }
            (Some(binding), _) => sink.record(RenderCommand::SetBuffer {
                stage,
                index,
                buffer: Some(binding.buffer),
                offset: binding.offset,
            }),
        }
    }
}

fn encode_slots<T: Copy + PartialEq>(
    slots: &[Option<T>],
    previous: Option<&[Option<T>]>,
    mut bind: impl FnMut(u32, Option<T>),
) {
    for (index, slot) in slots.iter().enumerate() {
        let changed = match previous.and_then(|p| p.get(index)) {
            Some(bound) => bound != slot,
            None => true,
        };
        if changed {
            bind(index as u32, *slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{
        BufferDesc, ComputePipelineDesc, DepthStencilDesc, ResourceKind, ResourceRegistry,
        SamplerDesc, TextureDesc,
    };

    struct Objects {
        registry: ResourceRegistry,
    }

    impl Objects {
        fn new() -> Objects {
            Objects {
                registry: ResourceRegistry::new(),
            }
        }

        fn pipeline(&self) -> PipelineId {
            PipelineId(self.registry.register(
                "pipeline",
                ResourceKind::ComputePipeline(ComputePipelineDesc {
                    function: "main".into(),
                }),
            ))
        }

        fn buffer(&self) -> BufferId {
            BufferId(
                self.registry
                    .register("buffer", ResourceKind::Buffer(BufferDesc::device_local(256))),
            )
        }

        fn texture(&self) -> TextureId {
            TextureId(self.registry.register(
                "texture",
                ResourceKind::Texture(TextureDesc {
                    width: 4,
                    height: 4,
                    format: vk::Format::R8G8B8A8_UNORM,
                }),
            ))
        }

        fn sampler(&self) -> SamplerId {
            SamplerId(self.registry.register(
                "sampler",
                ResourceKind::Sampler(SamplerDesc {
                    filter: vk::Filter::LINEAR,
                    address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                }),
            ))
        }

        fn depth_stencil(&self) -> DepthStencilStateId {
            DepthStencilStateId(self.registry.register(
                "depth stencil",
                ResourceKind::DepthStencilState(DepthStencilDesc {
                    depth_test: true,
                    depth_write: true,
                    compare_op: vk::CompareOp::LESS,
                    stencil_test: true,
                }),
            ))
        }
    }

    fn draw(pipeline: PipelineId) -> RenderDrawState {
        let mut state = RenderDrawState::new(
            pipeline,
            Viewport::new(640.0, 480.0),
            vk::PrimitiveTopology::TRIANGLE_LIST,
        );
        state.count = 3;
        state
    }

    fn diff(current: &RenderDrawState, previous: Option<&RenderDrawState>) -> Vec<RenderCommand> {
        let mut commands = Vec::new();
        encode_draw(&mut commands, current, previous);
        commands
    }

    fn is_draw(command: &RenderCommand) -> bool {
        matches!(
            command,
            RenderCommand::Draw { .. } | RenderCommand::DrawIndexed { .. }
        )
    }

    #[test]
    fn first_draw_emits_everything() {
        let objects = Objects::new();
        let pipeline = objects.pipeline();
        let state = draw(pipeline);
        let commands = diff(&state, None);
        assert_eq!(
            commands,
            vec![
                RenderCommand::SetPipeline(pipeline),
                RenderCommand::SetViewport(Viewport::new(640.0, 480.0)),
                RenderCommand::SetCullMode(vk::CullModeFlags::NONE),
                RenderCommand::SetFrontFace(vk::FrontFace::COUNTER_CLOCKWISE),
                RenderCommand::Draw {
                    topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                    vertex_start: 0,
                    vertex_count: 3
                },
            ]
        );
    }

    #[test]
    fn identical_draws_only_draw() {
        let objects = Objects::new();
        let mut state = draw(objects.pipeline());
        state.depth_stencil = Some(objects.depth_stencil());
        state.blend_enabled = true;
        state.vertex_buffers = vec![Some(BufferBinding::new(objects.buffer(), 0))];
        state.fragment_textures = vec![Some(objects.texture())];
        state.fragment_samplers = vec![Some(objects.sampler())];
        let commands = diff(&state, Some(&state));
        assert_eq!(commands.len(), 1);
        assert!(is_draw(&commands[0]));
    }

    #[test]
    fn fixed_function_changes_are_emitted_alone() {
        let objects = Objects::new();
        let previous = draw(objects.pipeline());
        let draw_command = RenderCommand::Draw {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            vertex_start: 0,
            vertex_count: 3,
        };

        let mut resized = previous.clone();
        resized.viewport.height = 240.0;
        assert_eq!(
            diff(&resized, Some(&previous)),
            vec![RenderCommand::SetViewport(resized.viewport), draw_command.clone()]
        );

        let mut culled = previous.clone();
        culled.cull_mode = vk::CullModeFlags::BACK;
        assert_eq!(
            diff(&culled, Some(&previous)),
            vec![
                RenderCommand::SetCullMode(vk::CullModeFlags::BACK),
                draw_command.clone()
            ]
        );

        let mut flipped = previous.clone();
        flipped.front_face = vk::FrontFace::CLOCKWISE;
        assert_eq!(
            diff(&flipped, Some(&previous)),
            vec![
                RenderCommand::SetFrontFace(vk::FrontFace::CLOCKWISE),
                draw_command
            ]
        );
    }

    #[test]
    fn buffer_offset_change_only_updates_offset() {
        let objects = Objects::new();
        let pipeline = objects.pipeline();
        let buffer = objects.buffer();
        let mut a = draw(pipeline);
        a.vertex_buffers = vec![None, Some(BufferBinding::new(buffer, 0))];
        let mut b = a.clone();
        b.vertex_buffers[1] = Some(BufferBinding::new(buffer, 64));

        let commands = diff(&b, Some(&a));
        assert_eq!(
            commands[0],
            RenderCommand::SetBufferOffset {
                stage: Stage::Vertex,
                index: 1,
                offset: 64
            }
        );
        assert!(!commands
            .iter()
            .any(|c| matches!(c, RenderCommand::SetBuffer { .. })));
    }

    #[test]
    fn buffer_unbind_and_rebind() {
        let objects = Objects::new();
        let pipeline = objects.pipeline();
        let (x, y) = (objects.buffer(), objects.buffer());
        let mut a = draw(pipeline);
        a.fragment_buffers = vec![Some(BufferBinding::new(x, 0)), None];
        let mut b = draw(pipeline);
        b.fragment_buffers = vec![None, Some(BufferBinding::new(y, 16))];

        let commands = diff(&b, Some(&a));
        assert_eq!(
            &commands[..2],
            &[
                RenderCommand::SetBuffer {
                    stage: Stage::Fragment,
                    index: 0,
                    buffer: None,
                    offset: 0
                },
                RenderCommand::SetBuffer {
                    stage: Stage::Fragment,
                    index: 1,
                    buffer: Some(y),
                    offset: 16
                },
            ]
        );
    }

    #[test]
    fn buffer_slot_beyond_previous_list_is_bound() {
        let objects = Objects::new();
        let pipeline = objects.pipeline();
        let buffer = objects.buffer();
        let a = draw(pipeline);
        let mut b = draw(pipeline);
        b.vertex_buffers = vec![Some(BufferBinding::new(buffer, 32))];

        let commands = diff(&b, Some(&a));
        assert_eq!(
            commands,
            vec![
                RenderCommand::SetBuffer {
                    stage: Stage::Vertex,
                    index: 0,
                    buffer: Some(buffer),
                    offset: 32
                },
                RenderCommand::Draw {
                    topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                    vertex_start: 0,
                    vertex_count: 3
                },
            ]
        );
    }

    #[test]
    fn empty_slot_without_previous_binding_is_skipped() {
        let objects = Objects::new();
        let mut state = draw(objects.pipeline());
        state.vertex_buffers = vec![None, None];
        let commands = diff(&state, None);
        assert!(!commands
            .iter()
            .any(|c| matches!(c, RenderCommand::SetBuffer { .. })));
    }

    #[test]
    fn blend_color_rules() {
        let objects = Objects::new();
        let pipeline = objects.pipeline();
        let opaque = draw(pipeline);
        let mut blended = draw(pipeline);
        blended.blend_enabled = true;
        blended.blend_color = [1.0, 0.0, 0.0, 1.0];
        let mut tinted = blended.clone();
        tinted.blend_color = [0.0, 1.0, 0.0, 1.0];

        let set_blend = |c: &RenderCommand| matches!(c, RenderCommand::SetBlendColor(_));
        assert!(diff(&blended, Some(&opaque)).iter().any(set_blend));
        assert!(diff(&blended, None).iter().any(set_blend));
        assert!(diff(&tinted, Some(&blended)).iter().any(set_blend));
        assert!(!diff(&blended, Some(&blended)).iter().any(set_blend));
        assert!(!diff(&opaque, Some(&blended)).iter().any(set_blend));
    }

    #[test]
    fn stencil_reference_follows_depth_stencil_state() {
        let objects = Objects::new();
        let pipeline = objects.pipeline();
        let depth_stencil = objects.depth_stencil();
        let mut a = draw(pipeline);
        a.depth_stencil = Some(depth_stencil);
        a.stencil_reference = 1;
        let mut b = a.clone();
        b.stencil_reference = 2;

        let commands = diff(&b, Some(&a));
        assert_eq!(commands[0], RenderCommand::SetStencilReference(2));
        assert_eq!(commands.len(), 2);

        // the previous draw never set a reference
        let mut plain = draw(pipeline);
        plain.stencil_reference = 2;
        let commands = diff(&b, Some(&plain));
        assert_eq!(
            &commands[..2],
            &[
                RenderCommand::SetDepthStencilState(depth_stencil),
                RenderCommand::SetStencilReference(2)
            ]
        );
    }

    #[test]
    fn textures_and_samplers_are_compared_independently() {
        let objects = Objects::new();
        let pipeline = objects.pipeline();
        let (t0, t1) = (objects.texture(), objects.texture());
        let sampler = objects.sampler();
        let mut a = draw(pipeline);
        a.fragment_textures = vec![Some(t0)];
        a.fragment_samplers = vec![Some(sampler)];
        let mut b = a.clone();
        b.fragment_textures = vec![Some(t1)];
        b.vertex_textures = vec![Some(t0)];

        let commands = diff(&b, Some(&a));
        assert_eq!(
            &commands[..2],
            &[
                RenderCommand::SetTexture {
                    stage: Stage::Vertex,
                    index: 0,
                    texture: Some(t0)
                },
                RenderCommand::SetTexture {
                    stage: Stage::Fragment,
                    index: 0,
                    texture: Some(t1)
                },
            ]
        );
        assert!(!commands
            .iter()
            .any(|c| matches!(c, RenderCommand::SetSampler { .. })));
    }

    #[test]
    fn indexed_draw() {
        let objects = Objects::new();
        let index_buffer = objects.buffer();
        let mut state = draw(objects.pipeline());
        state.index_buffer = Some(index_buffer);
        state.index_type = vk::IndexType::UINT32;
        state.count = 36;
        state.start = 128;
        let commands = diff(&state, Some(&state));
        assert_eq!(
            commands,
            vec![RenderCommand::DrawIndexed {
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                index_count: 36,
                index_type: vk::IndexType::UINT32,
                index_buffer,
                index_buffer_offset: 128
            }]
        );
    }
}
