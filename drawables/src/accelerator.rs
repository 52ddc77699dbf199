//! Interfaces to the pipeline and deform accelerator pools.
//!
//! Accelerators are long-lived objects owned by external pools. Packets refer to them by
//! identity only and resolve them to compiled objects at draw time.
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fnv::{FnvHashMap, FnvHasher};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::device::{DescriptorSet, GraphicsPipeline, PipelineLayout, VertexBufferView};
use crate::geo::Format;
use crate::marker::VisibilityMarker;
use crate::readiness::Readiness;
use crate::uniforms::{BoundUniforms, PipelineSignature, UniformsStreamInterface, UNIFORM_GROUP_COUNT};

slotmap::new_key_type! {
    /// Identifies a pipeline accelerator.
    pub struct PipelineAcceleratorId;
    /// Identifies a descriptor set accelerator.
    pub struct DescriptorSetAcceleratorId;
    /// Identifies a deform accelerator.
    pub struct DeformAcceleratorId;
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FrameBufferDesc {
    pub color_formats: SmallVec<[Format; 4]>,
    pub depth_format: Option<Format>,
    pub samples: u32,
}

/// Render target configuration for which pipelines are compiled.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SequencerConfig {
    pub name: String,
    pub fb_desc: FrameBufferDesc,
    pub subpass: u32,
}

impl SequencerConfig {
    pub fn new(name: impl Into<String>, fb_desc: FrameBufferDesc, subpass: u32) -> SequencerConfig {
        SequencerConfig {
            name: name.into(),
            fb_desc,
            subpass,
        }
    }

    pub fn hash_value(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        self.fb_desc.hash(&mut hasher);
        self.subpass.hash(&mut hasher);
        hasher.finish()
    }
}

/// A pipeline accelerator compiled for a sequencer configuration.
pub struct CompiledPipeline {
    pub pipeline: Arc<GraphicsPipeline>,
    pub signature: Arc<PipelineSignature>,
    bound_uniforms: Mutex<FnvHashMap<[u64; UNIFORM_GROUP_COUNT], Arc<BoundUniforms>>>,
}

impl CompiledPipeline {
    pub fn new(pipeline: Arc<GraphicsPipeline>, signature: Arc<PipelineSignature>) -> CompiledPipeline {
        CompiledPipeline {
            pipeline,
            signature,
            bound_uniforms: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.pipeline.layout
    }

    /// Returns the binding of `interfaces` to this pipeline, creating it on first use.
    pub fn bound_uniforms(&self, interfaces: [&UniformsStreamInterface; UNIFORM_GROUP_COUNT]) -> Arc<BoundUniforms> {
        let key = interfaces.map(UniformsStreamInterface::hash_value);
        self.bound_uniforms
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(BoundUniforms::new(&self.signature, interfaces)))
            .clone()
    }

    pub fn cached_bound_uniforms_count(&self) -> usize {
        self.bound_uniforms.lock().len()
    }
}

impl std::fmt::Debug for CompiledPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPipeline").field("pipeline", &self.pipeline).finish()
    }
}

/// Binding of a deform accelerator's per-instance data through a dynamic offset.
#[derive(Copy, Clone, Debug)]
pub struct DeformBinding {
    pub accelerator: DeformAcceleratorId,
}

/// A descriptor set accelerator whose contents are available on the device.
#[derive(Debug)]
pub struct ActualizedDescriptorSet {
    pub descriptor_set: Arc<DescriptorSet>,
    /// Buffer-upload counter value after which the contents are valid.
    pub completion_upload_marker: u64,
    pub deform_binding: Option<DeformBinding>,
}

pub trait PipelineAcceleratorPool: Send + Sync {
    /// Returns the pipeline if it is visible at `visibility`.
    fn try_get_pipeline(
        &self,
        id: PipelineAcceleratorId,
        sequencer: &SequencerConfig,
        visibility: VisibilityMarker,
    ) -> Option<Arc<CompiledPipeline>>;

    /// Returns the descriptor set if it is visible at `visibility`.
    fn try_get_descriptor_set(
        &self,
        id: DescriptorSetAcceleratorId,
        visibility: VisibilityMarker,
    ) -> Option<Arc<ActualizedDescriptorSet>>;

    fn try_get_pipeline_layout(&self, sequencer: &SequencerConfig) -> Option<Arc<PipelineLayout>>;

    /// Readiness of a pipeline; resolves to the pipeline-compile counter at which it becomes visible.
    fn pipeline_readiness(&self, id: PipelineAcceleratorId, sequencer: &SequencerConfig) -> Readiness<u64>;

    /// Readiness of a descriptor set; resolves to the visibility marker at which it becomes visible.
    fn descriptor_set_readiness(&self, id: DescriptorSetAcceleratorId) -> Readiness<VisibilityMarker>;
}

pub trait DeformAcceleratorPool: Send + Sync {
    /// The output vertex buffer of a deform accelerator.
    fn output_stream(&self, id: DeformAcceleratorId) -> Option<VertexBufferView>;

    /// Dynamic offset of an instance's data in the deform accelerator's uniform buffer.
    fn dynamic_offset(&self, id: DeformAcceleratorId, instance: u32) -> u32;
}
