//! Render pass descriptors.
use crate::resource::TextureId;
use ash::vk;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ColorAttachment {
    pub texture: TextureId,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_color: [f32; 4],
}

impl ColorAttachment {
    /// Clears the attachment to `clear_color` and stores the result.
    pub fn clear(texture: TextureId, clear_color: [f32; 4]) -> ColorAttachment {
        ColorAttachment {
            texture,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_color,
        }
    }

    /// Keeps the current contents of the attachment.
    pub fn load(texture: TextureId) -> ColorAttachment {
        ColorAttachment {
            texture,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_color: [0.0; 4],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DepthAttachment {
    pub texture: TextureId,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

/// Attachments of a render pass.
///
/// Render records are grouped into the same render encoder as long as they share the same
/// `Arc<RenderPassDescriptor>`: two descriptors with equal contents but different allocations
/// start two encoders.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderPassDescriptor {
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
}

impl RenderPassDescriptor {
    pub fn new() -> RenderPassDescriptor {
        RenderPassDescriptor::default()
    }

    pub fn with_color_attachment(mut self, attachment: ColorAttachment) -> RenderPassDescriptor {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth_attachment(mut self, attachment: DepthAttachment) -> RenderPassDescriptor {
        self.depth_attachment = Some(attachment);
        self
    }
}
