use anyhow::{anyhow, Result};
use kiln::{
    vk, BufferBinding, BufferDesc, BufferId, ColorAttachment, CommandQueue, ComputeDispatch,
    ComputePipelineDesc, PipelineId, PresentationDelegate, RenderDrawState, RenderPassDescriptor,
    RenderPipelineDesc, SurfaceConfig, TextureDesc, TextureId, Viewport,
};
use std::sync::Arc;
use tracing::{error, trace};

const QUAD_COUNT: usize = 64;
const UNIFORM_STRIDE: usize = 256;
const PARTICLE_COUNT: u32 = 10_000;
const PARTICLE_SIZE: u64 = 32;

// --- Shader functions ----------------------------------------------------------------------------
const QUAD_VERTEX: &str = "quad_vertex";
const QUAD_FRAGMENT: &str = "quad_fragment";
const UPDATE_PARTICLES: &str = "update_particles";

/// Spinning quads drawn into an offscreen texture, then copied to the drawable.
pub struct QuadScene {
    frame: u64,
    viewport: Viewport,
    pipeline: PipelineId,
    particles_pipeline: PipelineId,
    vertices: BufferId,
    uniforms: BufferId,
    particles: BufferId,
    offscreen: TextureId,
    offscreen_pass: Arc<RenderPassDescriptor>,
}

impl QuadScene {
    pub fn new(queue: &CommandQueue, surface: &SurfaceConfig) -> Result<QuadScene> {
        let device = queue.device();
        for function in [QUAD_VERTEX, QUAD_FRAGMENT, UPDATE_PARTICLES] {
            device.library().add(function);
        }

        let pipeline = device
            .create_render_pipeline(
                "quads",
                &RenderPipelineDesc {
                    vertex_function: QUAD_VERTEX.into(),
                    fragment_function: QUAD_FRAGMENT.into(),
                    color_format: vk::Format::R8G8B8A8_UNORM,
                },
            )
            .ok_or_else(|| anyhow!("could not create the quad pipeline"))?;
        let particles_pipeline = device
            .create_compute_pipeline(
                "particles",
                &ComputePipelineDesc {
                    function: UPDATE_PARTICLES.into(),
                },
            )
            .ok_or_else(|| anyhow!("could not create the particle pipeline"))?;

        let vertices = device
            .create_buffer("quad vertices", &BufferDesc::device_local(4 * 16))
            .ok_or_else(|| anyhow!("out of device memory"))?;
        let uniforms = device
            .create_buffer(
                "quad uniforms",
                &BufferDesc::device_local((QUAD_COUNT * UNIFORM_STRIDE) as u64),
            )
            .ok_or_else(|| anyhow!("out of device memory"))?;
        let particles = device
            .create_buffer(
                "particles",
                &BufferDesc::device_local(PARTICLE_COUNT as u64 * PARTICLE_SIZE),
            )
            .ok_or_else(|| anyhow!("out of device memory"))?;

        let corners: [[f32; 4]; 4] = [
            [-0.5, -0.5, 0.0, 1.0],
            [0.5, -0.5, 0.0, 1.0],
            [-0.5, 0.5, 0.0, 1.0],
            [0.5, 0.5, 0.0, 1.0],
        ];
        let vertex_data: Vec<u8> = corners
            .iter()
            .flatten()
            .flat_map(|x| x.to_le_bytes())
            .collect();
        queue.enqueue_write(vertices, 0, &vertex_data, true);

        let offscreen = device.create_texture(
            "offscreen color",
            &TextureDesc {
                width: surface.width,
                height: surface.height,
                format: vk::Format::R8G8B8A8_UNORM,
            },
        );
        let offscreen_pass = Arc::new(
            RenderPassDescriptor::new()
                .with_color_attachment(ColorAttachment::clear(offscreen, [0.1, 0.1, 0.1, 1.0])),
        );

        Ok(QuadScene {
            frame: 0,
            viewport: Viewport::new(surface.width as f32, surface.height as f32),
            pipeline,
            particles_pipeline,
            vertices,
            uniforms,
            particles,
            offscreen,
            offscreen_pass,
        })
    }

    fn uniform_data(&self) -> Vec<u8> {
        let mut data = vec![0u8; QUAD_COUNT * UNIFORM_STRIDE];
        for (i, block) in data.chunks_mut(UNIFORM_STRIDE).enumerate() {
            let angle = self.frame as f32 * 0.01 + i as f32;
            let values = [angle.cos(), angle.sin(), i as f32 / QUAD_COUNT as f32, 1.0];
            for (dst, value) in block.chunks_mut(4).zip(values.iter()) {
                dst.copy_from_slice(&value.to_le_bytes());
            }
        }
        data
    }

    fn quad(&self, index: usize) -> RenderDrawState {
        let mut state = RenderDrawState::new(
            self.pipeline,
            self.viewport,
            vk::PrimitiveTopology::TRIANGLE_STRIP,
        );
        state.vertex_buffers = vec![
            Some(BufferBinding::new(self.vertices, 0)),
            Some(BufferBinding::new(self.uniforms, (index * UNIFORM_STRIDE) as u64)),
        ];
        state.count = 4;
        if index % 8 == 0 {
            state.blend_enabled = true;
            state.blend_color = [1.0, 1.0, 1.0, 0.5];
        }
        state
    }
}

impl PresentationDelegate for QuadScene {
    fn draw_frame(&mut self, queue: &CommandQueue, target: TextureId) -> bool {
        self.frame += 1;
        trace!(frame = self.frame, "draw_frame");

        queue.enqueue_write(self.uniforms, 0, &self.uniform_data(), false);
        queue.enqueue_compute(ComputeDispatch {
            pipeline: self.particles_pipeline,
            buffers: vec![Some(BufferBinding::new(self.particles, 0))],
            textures: vec![],
            grid: [PARTICLE_COUNT, 1, 1],
            threads_per_group: [64, 1, 1],
        });

        let draws = (0..QUAD_COUNT)
            .map(|i| (self.offscreen_pass.clone(), Some(Arc::new(self.quad(i)))))
            .collect();
        queue.enqueue_render_passes(draws);

        if let Err(err) = queue.enqueue_copy_texture(target, self.offscreen) {
            error!(%err, "could not copy the offscreen image");
            return false;
        }
        true
    }
}
