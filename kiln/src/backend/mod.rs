//! Device implementations.
mod null;
mod recording;

pub use null::NullDevice;
pub use recording::{RecordedCommandBuffer, RecordedItem, RecordingDevice};

use crate::{
    config::SurfaceConfig,
    device::Drawable,
    resource::{DrawableId, ResourceKind, ResourceRegistry, TextureDesc, TextureId},
};
use ash::vk;

/// Format of the images of simulated surfaces.
pub const SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Simulated swapchain: a fixed set of drawables handed out round-robin.
#[derive(Debug)]
pub(crate) struct Swapchain {
    drawables: Vec<Drawable>,
    next: usize,
}

impl Swapchain {
    pub(crate) fn new(resources: &ResourceRegistry, config: &SurfaceConfig) -> Swapchain {
        let desc = TextureDesc {
            width: config.width,
            height: config.height,
            format: SURFACE_FORMAT,
        };
        let drawables = (0..config.image_count)
            .map(|i| {
                let texture = TextureId(
                    resources.register(&format!("surface image #{}", i), ResourceKind::Texture(desc)),
                );
                let id = DrawableId(
                    resources.register(&format!("drawable #{}", i), ResourceKind::Drawable { texture }),
                );
                Drawable { id, texture }
            })
            .collect();
        Swapchain { drawables, next: 0 }
    }

    pub(crate) fn acquire(&mut self) -> Option<Drawable> {
        if self.drawables.is_empty() {
            return None;
        }
        let drawable = self.drawables[self.next];
        self.next = (self.next + 1) % self.drawables.len();
        Some(drawable)
    }
}
