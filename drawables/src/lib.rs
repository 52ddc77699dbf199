//! Draw submission core: packets of draw records, a pool that recycles them, and the loop that
//! turns them into encoder commands.
#[macro_use]
extern crate tracing;

mod accelerator;
mod arena;
mod conduit;
mod config;
mod context;
mod delegate;
mod device;
mod draw;
mod error;
mod geo;
mod marker;
mod packet;
mod pool;
mod prepare;
pub mod readiness;
mod uniforms;

pub use crate::accelerator::{
    ActualizedDescriptorSet, CompiledPipeline, DeformAcceleratorId, DeformAcceleratorPool, DeformBinding,
    DescriptorSetAcceleratorId, FrameBufferDesc, PipelineAcceleratorId, PipelineAcceleratorPool, SequencerConfig,
};
pub use crate::arena::{ByteArena, FreeformStorage, HeapIndex, ObjectHeap, StorageKind};
pub use crate::conduit::{GeoStream, RepositionEvent, RepositionListener, RepositionStep, RepositionableGeometryConduit};
pub use crate::config::{ConduitCreateInfo, DrawOptions, PacketPoolCreateInfo, PrepareOptions, DEFAULT_MAX_STORAGE_SIZE};
pub use crate::context::ParsingContext;
pub use crate::delegate::{
    ShaderResourceDelegate, SharedDelegateGroup, UniformBufferDelegate, UniformDelegateGroup, UniformDelegateManager,
};
pub use crate::device::{
    BindFlags, DescriptorSet, DescriptorWrite, Device, GraphicsEncoder, GraphicsPipeline, IndexBufferView,
    PipelineLayout, Resource, ResourceDesc, ResourceView, Sampler, VertexBufferView,
};
pub use crate::draw::{draw, draw_fn, DrawResult, ExecuteDrawableContext};
pub use crate::error::{AssetError, DeviceError, DrawError};
pub use crate::geo::{
    DrawableGeo, DrawableInputAssembly, Format, GeoFlags, IndexStream, InputElementDesc, PrimitiveTopology,
    SharedGeo, StreamSource, VertexStream, MAX_VERTEX_STREAMS,
};
pub use crate::marker::{PacketMarker, VisibilityMarker};
pub use crate::packet::{
    AllocateStorageResult, DrawParams, Drawable, DrawablesPacket, ExecuteDrawableFn, GeoRef, LocalGeoId, StorageRange,
};
pub use crate::pool::{DrawablesPacketPool, PacketPoolStats};
pub use crate::prepare::{prepare_resources, PendingResources, PreparedResources};
pub use crate::readiness::{PendingPoll, PollStatus, Readiness, ReadinessPromise};
pub use crate::uniforms::{
    hash_name, BoundUniforms, DescriptorSetLayout, DescriptorSlot, DescriptorType, LooseUniform, LooseUniformKind,
    PipelineSignature, SignatureBinding, UniformsStream, UniformsStreamInterface, UNIFORM_GROUP_COUNT,
    UNIFORM_GROUP_DRAW, UNIFORM_GROUP_MATERIAL, UNIFORM_GROUP_PER_DRAW, UNIFORM_GROUP_SEQUENCER,
};
