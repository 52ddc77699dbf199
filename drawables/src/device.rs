//! Abstraction over the graphics device and command encoder.
use std::ops::Range;
use std::sync::Arc;

use crate::error::DeviceError;
use crate::geo::Format;
use crate::uniforms::{DescriptorSetLayout, LooseUniform};

bitflags::bitflags! {
    #[derive(Default)]
    pub struct BindFlags: u32 {
        const VERTEX_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const CONSTANT_BUFFER = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
    }
}

/// Describes a linear buffer resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceDesc {
    pub name: String,
    pub bind_flags: BindFlags,
    pub size: u64,
}

/// A device resource.
///
/// Resources are shared with `Arc`: holding an `Arc<Resource>` keeps the resource alive.
#[derive(Debug)]
pub struct Resource {
    /// Device-specific handle.
    pub handle: u64,
    pub desc: ResourceDesc,
}

/// A view over a range of a resource.
#[derive(Clone, Debug)]
pub struct ResourceView {
    pub resource: Arc<Resource>,
    pub usage: BindFlags,
    pub range: Range<u64>,
}

#[derive(Debug)]
pub struct Sampler {
    pub handle: u64,
}

#[derive(Debug)]
pub struct PipelineLayout {
    pub handle: u64,
    pub name: String,
}

#[derive(Debug)]
pub struct GraphicsPipeline {
    pub handle: u64,
    pub layout: Arc<PipelineLayout>,
}

#[derive(Debug)]
pub struct DescriptorSet {
    pub handle: u64,
}

/// Contents of one slot of a descriptor set being created.
#[derive(Clone, Debug)]
pub enum DescriptorWrite {
    ResourceView { slot: u32, view: ResourceView },
    Sampler { slot: u32, sampler: Arc<Sampler> },
}

pub trait Device: Send + Sync {
    /// Creates a buffer, optionally filled with `initial_data`.
    fn create_resource(&self, desc: &ResourceDesc, initial_data: Option<&[u8]>) -> Result<Arc<Resource>, DeviceError>;

    /// Creates a view of a range of `resource`. `None` means the whole resource.
    fn create_view(
        &self,
        resource: &Arc<Resource>,
        usage: BindFlags,
        range: Option<Range<u64>>,
    ) -> Result<ResourceView, DeviceError>;

    fn create_descriptor_set(
        &self,
        layout: &DescriptorSetLayout,
        writes: &[DescriptorWrite],
    ) -> Result<Arc<DescriptorSet>, DeviceError>;
}

#[derive(Clone, Debug)]
pub struct VertexBufferView {
    pub resource: Arc<Resource>,
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct IndexBufferView {
    pub resource: Arc<Resource>,
    pub format: Format,
    pub offset: u64,
}

/// Records graphics commands.
pub trait GraphicsEncoder {
    fn bind_pipeline_layout(&mut self, layout: &Arc<PipelineLayout>);
    fn bind_vertex_buffers(&mut self, vertex_buffers: &[VertexBufferView], index_buffer: Option<&IndexBufferView>);
    fn bind_descriptor_set(&mut self, slot: u32, set: &Arc<DescriptorSet>, dynamic_offsets: &[u32]);
    fn apply_loose_uniforms(&mut self, uniforms: &[LooseUniform]);

    fn draw(&mut self, pipeline: &GraphicsPipeline, vertex_count: u32, start_vertex: u32);
    fn draw_indexed(&mut self, pipeline: &GraphicsPipeline, index_count: u32, start_index: u32, base_vertex: i32);
    fn draw_instances(&mut self, pipeline: &GraphicsPipeline, vertex_count: u32, instance_count: u32, start_vertex: u32);
    fn draw_indexed_instances(
        &mut self,
        pipeline: &GraphicsPipeline,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
    );
    fn draw_auto(&mut self, pipeline: &GraphicsPipeline);
    fn draw_indirect(&mut self, pipeline: &GraphicsPipeline, args: &Arc<Resource>, offset: u64);

    fn set_stencil_ref(&mut self, front: u32, back: u32);

    /// Starts recording state changes so that they can be reverted by `end_state_capture`.
    fn begin_state_capture(&mut self);
    fn end_state_capture(&mut self);
}
