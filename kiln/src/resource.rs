//! Device objects and their registry.
use ash::vk;
use parking_lot::Mutex;
use slotmap::SlotMap;
use tracing::trace;

slotmap::new_key_type! {
    pub struct ResourceId;
}

macro_rules! typed_resource_id {
    ($(#[$m:meta])* $name:ident) => {
        $(#[$m])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub(crate) ResourceId);

        impl $name {
            /// The untyped registry key of this object.
            pub fn resource(&self) -> ResourceId {
                self.0
            }
        }

        impl From<$name> for ResourceId {
            fn from(id: $name) -> ResourceId {
                id.0
            }
        }
    };
}

typed_resource_id!(
    /// A device buffer.
    BufferId
);
typed_resource_id!(
    /// A device texture.
    TextureId
);
typed_resource_id!(SamplerId);
typed_resource_id!(
    /// A render or compute pipeline.
    PipelineId
);
typed_resource_id!(DepthStencilStateId);
typed_resource_id!(
    /// A presentable image of the device's surface.
    DrawableId
);

/// Parameters of a new buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BufferDesc {
    pub size: u64,
    /// Whether the host can write to the buffer directly.
    pub host_visible: bool,
}

impl BufferDesc {
    pub const fn host_visible(size: u64) -> BufferDesc {
        BufferDesc {
            size,
            host_visible: true,
        }
    }

    pub const fn device_local(size: u64) -> BufferDesc {
        BufferDesc {
            size,
            host_visible: false,
        }
    }
}

/// Parameters of a new 2D texture.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare_op: vk::CompareOp,
    pub stencil_test: bool,
}

/// Parameters of a render pipeline. Functions are looked up by name in the device's shader library.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderPipelineDesc {
    pub vertex_function: String,
    pub fragment_function: String,
    pub color_format: vk::Format,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputePipelineDesc {
    pub function: String,
}

/// What kind of object a registry entry describes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    Buffer(BufferDesc),
    Texture(TextureDesc),
    Sampler(SamplerDesc),
    DepthStencilState(DepthStencilDesc),
    RenderPipeline(RenderPipelineDesc),
    ComputePipeline(ComputePipelineDesc),
    Drawable { texture: TextureId },
}

#[derive(Clone, Debug)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
}

/// Registry of live device objects.
///
/// Objects are registered when the device creates them and stay alive until explicitly retired.
/// Ids are versioned keys: a retired id never aliases a newer object.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: Mutex<SlotMap<ResourceId, Resource>>,
}

impl ResourceRegistry {
    pub fn new() -> ResourceRegistry {
        ResourceRegistry {
            resources: Mutex::new(SlotMap::with_key()),
        }
    }

    pub fn register(&self, name: &str, kind: ResourceKind) -> ResourceId {
        let id = self.resources.lock().insert(Resource {
            name: name.to_string(),
            kind,
        });
        trace!(?id, resource_name = name, "register_resource");
        id
    }

    /// Removes an object from the registry.
    ///
    /// # Panics
    ///
    /// If the object was already retired or never registered.
    pub fn retire(&self, id: ResourceId) -> Resource {
        match self.resources.lock().remove(id) {
            Some(resource) => {
                trace!(?id, resource_name = resource.name.as_str(), "retire_resource");
                resource
            }
            None => panic!("retired an unknown or already retired resource {:?}", id),
        }
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.lock().contains_key(id)
    }

    pub fn kind(&self, id: ResourceId) -> Option<ResourceKind> {
        self.resources.lock().get(id).map(|r| r.kind.clone())
    }

    pub fn name(&self, id: ResourceId) -> Option<String> {
        self.resources.lock().get(id).map(|r| r.name.clone())
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
