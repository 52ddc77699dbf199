//! The draw loop.
//!
//! `draw` walks the records of a packet in order and only emits state changes when the state
//! differs from the previous record: pipeline layout, bound uniforms, geometry and sequencer
//! uniforms are cached across records. Records whose pipeline or descriptor set is not visible yet
//! are skipped and reported through `DrawResult::pending`.
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use smallvec::SmallVec;

use crate::accelerator::{
    ActualizedDescriptorSet, CompiledPipeline, DeformAcceleratorPool, DescriptorSetAcceleratorId,
    PipelineAcceleratorId, PipelineAcceleratorPool, SequencerConfig,
};
use crate::arena::StorageKind;
use crate::config::DrawOptions;
use crate::context::ParsingContext;
use crate::device::{
    BindFlags, DescriptorSet, Device, GraphicsEncoder, GraphicsPipeline, IndexBufferView, PipelineLayout, Resource, ResourceDesc,
    VertexBufferView,
};
use crate::error::{DeviceError, DrawError};
use crate::geo::{DrawableGeo, StreamSource, MAX_VERTEX_STREAMS};
use crate::marker::VisibilityMarker;
use crate::packet::{Drawable, DrawablesPacket, GeoRef, LocalGeoId};
use crate::uniforms::{
    hash_name, BoundUniforms, UniformsStream, UniformsStreamInterface, UNIFORM_GROUP_DRAW, UNIFORM_GROUP_MATERIAL,
    UNIFORM_GROUP_PER_DRAW, UNIFORM_GROUP_SEQUENCER,
};

/// Statistics of a draw call.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DrawResult {
    /// Records whose execute function ran.
    pub executed: usize,
    /// Records skipped because a resource was not visible or failed.
    pub skipped: usize,
    /// Some records were skipped because a resource is still pending.
    pub pending: bool,
    pub pipeline_lookups: usize,
    pub bound_uniform_lookups: usize,
    pub geo_binds: usize,
    pub sequencer_applies: usize,
    pub descriptor_set_applies: usize,
    /// Buffer-upload marker the command list must wait for.
    pub required_upload_marker: u64,
}

/// Passed to the execute function of a drawable once its state is bound.
pub struct ExecuteDrawableContext<'a> {
    encoder: &'a mut dyn GraphicsEncoder,
    pipeline: &'a GraphicsPipeline,
    bound_uniforms: &'a BoundUniforms,
    packet: &'a DrawablesPacket,
    uniform_storage: Option<&'a Arc<Resource>>,
}

impl<'a> ExecuteDrawableContext<'a> {
    pub fn encoder(&mut self) -> &mut dyn GraphicsEncoder {
        &mut *self.encoder
    }

    pub fn pipeline(&self) -> &'a GraphicsPipeline {
        self.pipeline
    }

    pub fn packet(&self) -> &'a DrawablesPacket {
        self.packet
    }

    /// The packet's uniform storage, uploaded for this draw call.
    pub fn uniform_storage(&self) -> Option<&'a Arc<Resource>> {
        self.uniform_storage
    }

    pub fn at_least_one_bound_loose_uniform(&self) -> bool {
        self.bound_uniforms.has_loose_uniforms(UNIFORM_GROUP_DRAW)
    }

    pub fn bound_loose_immediate_data(&self) -> &FixedBitSet {
        self.bound_uniforms.bound_loose_immediate_data(UNIFORM_GROUP_DRAW)
    }

    pub fn bound_loose_resources(&self) -> &FixedBitSet {
        self.bound_uniforms.bound_loose_resources(UNIFORM_GROUP_DRAW)
    }

    pub fn bound_loose_samplers(&self) -> &FixedBitSet {
        self.bound_uniforms.bound_loose_samplers(UNIFORM_GROUP_DRAW)
    }

    /// Binds descriptor sets declared by the drawable's loose interface. `sets` is indexed by interface slot.
    pub fn apply_descriptor_sets(&mut self, sets: &[Option<&Arc<DescriptorSet>>]) -> usize {
        self.bound_uniforms
            .apply_descriptor_sets(&mut *self.encoder, UNIFORM_GROUP_DRAW, sets, &[])
    }

    /// Applies the drawable's loose uniforms (uniform group 2).
    pub fn apply_loose_uniforms(&mut self, stream: &UniformsStream) {
        self.bound_uniforms
            .apply_loose_uniforms(&mut *self.encoder, UNIFORM_GROUP_DRAW, stream);
    }

    /// Applies values for the parsing context's per-draw interface (uniform group 3).
    pub fn apply_per_draw_uniforms(&mut self, stream: &UniformsStream) {
        self.bound_uniforms
            .apply_loose_uniforms(&mut *self.encoder, UNIFORM_GROUP_PER_DRAW, stream);
    }

    pub fn draw(&mut self, vertex_count: u32, start_vertex: u32) {
        self.encoder.draw(self.pipeline, vertex_count, start_vertex);
    }

    pub fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        self.encoder
            .draw_indexed(self.pipeline, index_count, start_index, base_vertex);
    }

    pub fn draw_instances(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32) {
        self.encoder
            .draw_instances(self.pipeline, vertex_count, instance_count, start_vertex);
    }

    pub fn draw_indexed_instances(&mut self, index_count: u32, instance_count: u32, start_index: u32) {
        self.encoder
            .draw_indexed_instances(self.pipeline, index_count, instance_count, start_index);
    }

    pub fn draw_auto(&mut self) {
        self.encoder.draw_auto(self.pipeline);
    }

    pub fn draw_indirect(&mut self, args: &Arc<Resource>, offset: u64) {
        self.encoder.draw_indirect(self.pipeline, args, offset);
    }

    pub fn set_stencil_ref(&mut self, front: u32, back: u32) {
        self.encoder.set_stencil_ref(front, back);
    }
}

/// Common execute functions.
pub mod draw_fn {
    use super::ExecuteDrawableContext;
    use crate::error::DrawError;
    use crate::packet::{DrawParams, Drawable};
    use crate::uniforms::UniformsStream;

    fn issue(ctx: &mut ExecuteDrawableContext, p: &DrawParams) {
        match (p.index_count, p.instance_count) {
            (0, 0 | 1) => ctx.draw(p.vertex_count, p.first_vertex),
            (0, n) => ctx.draw_instances(p.vertex_count, n, p.first_vertex),
            (i, 0 | 1) => ctx.draw_indexed(i, p.first_index, p.first_vertex as i32),
            (i, n) => ctx.draw_indexed_instances(i, n, p.first_index),
        }
    }

    pub fn draw(ctx: &mut ExecuteDrawableContext, drawable: &Drawable) -> Result<(), DrawError> {
        ctx.draw(drawable.params.vertex_count, drawable.params.first_vertex);
        Ok(())
    }

    pub fn draw_indexed(ctx: &mut ExecuteDrawableContext, drawable: &Drawable) -> Result<(), DrawError> {
        let p = &drawable.params;
        ctx.draw_indexed(p.index_count, p.first_index, p.first_vertex as i32);
        Ok(())
    }

    /// Indexed if `index_count` is non-zero, instanced if `instance_count` is greater than one.
    pub fn draw_instanced(ctx: &mut ExecuteDrawableContext, drawable: &Drawable) -> Result<(), DrawError> {
        issue(ctx, &drawable.params);
        Ok(())
    }

    /// Applies the drawable's loose uniforms from packet storage, then draws like `draw_instanced`.
    pub fn draw_with_loose_uniforms(ctx: &mut ExecuteDrawableContext, drawable: &Drawable) -> Result<(), DrawError> {
        if let Some(range) = drawable.loose_uniforms {
            if ctx.at_least_one_bound_loose_uniform() {
                let immediate_data = [ctx.packet().storage_range(range)];
                ctx.apply_loose_uniforms(&UniformsStream {
                    immediate_data: &immediate_data,
                    ..Default::default()
                });
            }
        }
        issue(ctx, &drawable.params);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Device buffers holding the contents of the packet storage arenas.
#[derive(Default)]
struct PacketStorageBuffers {
    vertex: Option<Arc<Resource>>,
    index: Option<Arc<Resource>>,
    uniform: Option<Arc<Resource>>,
}

fn upload_packet_storage(device: &dyn Device, packet: &DrawablesPacket) -> Result<PacketStorageBuffers, DeviceError> {
    let upload = |kind: StorageKind, bind_flags: BindFlags| -> Result<Option<Arc<Resource>>, DeviceError> {
        let data = packet.storage(kind);
        if data.is_empty() {
            return Ok(None);
        }
        let desc = ResourceDesc {
            name: format!("packet {:?} {:?} storage", packet.marker(), kind),
            bind_flags,
            size: data.len() as u64,
        };
        device.create_resource(&desc, Some(data)).map(Some)
    };
    Ok(PacketStorageBuffers {
        vertex: upload(StorageKind::Vertex, BindFlags::VERTEX_BUFFER)?,
        index: upload(StorageKind::Index, BindFlags::INDEX_BUFFER)?,
        uniform: upload(StorageKind::Uniform, BindFlags::CONSTANT_BUFFER)?,
    })
}

/// Restores the encoder when the draw loop exits, including on error or panic.
struct StateCapture<'e> {
    encoder: &'e mut dyn GraphicsEncoder,
    failed: bool,
}

impl<'e> StateCapture<'e> {
    fn begin(encoder: &'e mut dyn GraphicsEncoder) -> StateCapture<'e> {
        encoder.begin_state_capture();
        StateCapture { encoder, failed: false }
    }
}

impl<'e> Drop for StateCapture<'e> {
    fn drop(&mut self) {
        if self.failed || std::thread::panicking() {
            self.encoder.set_stencil_ref(0, 0);
        }
        self.encoder.end_state_capture();
    }
}

/// Material state last applied by the draw loop.
struct BoundMaterial {
    set: Option<Arc<DescriptorSet>>,
    dynamic_offsets: SmallVec<[u32; 2]>,
    rules: u64,
}

impl BoundMaterial {
    fn matches(&self, set: Option<&Arc<DescriptorSet>>, dynamic_offsets: &[u32], rules: u64) -> bool {
        let same_set = match (&self.set, set) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_set && self.rules == rules && self.dynamic_offsets[..] == *dynamic_offsets
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum GeoIdentity {
    None,
    Shared(usize),
    Local(LocalGeoId),
}

struct DrawLoop<'a> {
    parsing_context: &'a mut ParsingContext,
    pipeline_accelerators: &'a dyn PipelineAcceleratorPool,
    sequencer: &'a SequencerConfig,
    packet: &'a DrawablesPacket,
    visibility: VisibilityMarker,
    options: &'a DrawOptions,
    storage: PacketStorageBuffers,
    deform_accelerators: Option<Arc<dyn DeformAcceleratorPool>>,
    sequencer_interface: UniformsStreamInterface,
    material_interface: UniformsStreamInterface,
    per_draw_interface: Option<Arc<UniformsStreamInterface>>,
    empty_interface: UniformsStreamInterface,
    result: DrawResult,
}

impl<'a> DrawLoop<'a> {
    fn resolve_pipeline(&mut self, id: PipelineAcceleratorId) -> Option<Arc<CompiledPipeline>> {
        let pool = self.pipeline_accelerators;
        if let Some(pipeline) = pool.try_get_pipeline(id, self.sequencer, self.visibility) {
            return Some(pipeline);
        }
        if !self.options.stall_for_resources {
            self.result.pending = true;
            return None;
        }
        match pool.pipeline_readiness(id, self.sequencer).wait() {
            Ok(value) => {
                let mut visibility = self.visibility;
                visibility.join_pipeline(value);
                pool.try_get_pipeline(id, self.sequencer, visibility)
            }
            Err(err) => {
                warn!(?id, %err, "pipeline accelerator failed");
                None
            }
        }
    }

    fn resolve_descriptor_set(&mut self, id: DescriptorSetAcceleratorId) -> Option<Arc<ActualizedDescriptorSet>> {
        let pool = self.pipeline_accelerators;
        if let Some(set) = pool.try_get_descriptor_set(id, self.visibility) {
            return Some(set);
        }
        if !self.options.stall_for_resources {
            self.result.pending = true;
            return None;
        }
        match pool.descriptor_set_readiness(id).wait() {
            Ok(marker) => pool.try_get_descriptor_set(id, self.visibility.join(marker)),
            Err(err) => {
                warn!(?id, %err, "descriptor set accelerator failed");
                None
            }
        }
    }

    fn bind_uniforms(&mut self, pipeline: &CompiledPipeline, drawable: &Drawable) -> Arc<BoundUniforms> {
        self.result.bound_uniform_lookups += 1;
        let loose = drawable
            .loose_uniforms_interface
            .as_deref()
            .unwrap_or(&self.empty_interface);
        let per_draw = self.per_draw_interface.as_deref().unwrap_or(&self.empty_interface);
        pipeline.bound_uniforms([&self.sequencer_interface, &self.material_interface, loose, per_draw])
    }

    fn resolve_stream(&self, source: &StreamSource, offset: u32, packet_buffer: Option<&Arc<Resource>>) -> Option<(Arc<Resource>, u64)> {
        match source {
            StreamSource::Resource(resource) => Some((resource.clone(), offset as u64)),
            StreamSource::Packet => match packet_buffer {
                Some(resource) => Some((resource.clone(), offset as u64)),
                None => {
                    warn!("geometry references empty packet storage");
                    None
                }
            },
            StreamSource::Deform(id) => {
                let view = self.deform_accelerators.as_ref()?.output_stream(*id)?;
                Some((view.resource, view.offset + offset as u64))
            }
        }
    }

    /// Binds the streams of `geo`. Returns false if a stream source is unavailable.
    fn bind_geo(&self, encoder: &mut dyn GraphicsEncoder, geo: &DrawableGeo) -> bool {
        let mut vertex_buffers: SmallVec<[VertexBufferView; MAX_VERTEX_STREAMS]> = SmallVec::new();
        for s in geo.vertex_streams() {
            match self.resolve_stream(&s.source, s.offset, self.storage.vertex.as_ref()) {
                Some((resource, offset)) => vertex_buffers.push(VertexBufferView { resource, offset }),
                None => return false,
            }
        }
        let index_buffer = match geo.index_stream() {
            Some(s) => match self.resolve_stream(&s.source, s.offset, self.storage.index.as_ref()) {
                Some((resource, offset)) => Some(IndexBufferView {
                    resource,
                    format: s.format,
                    offset,
                }),
                None => return false,
            },
            None => None,
        };
        encoder.bind_vertex_buffers(&vertex_buffers, index_buffer.as_ref());
        true
    }

    fn run(&mut self, encoder: &mut dyn GraphicsEncoder, layout: Arc<PipelineLayout>) -> Result<(), DrawError> {
        let packet = self.packet;
        let extra_set = self
            .parsing_context
            .extra_sequencer_descriptor_set()
            .map(|(_, set)| set.clone());

        let mut current_layout = layout;
        encoder.bind_pipeline_layout(&current_layout);

        let mut current_pipeline_id: Option<PipelineAcceleratorId> = None;
        let mut current_pipeline: Option<Arc<CompiledPipeline>> = None;
        let mut current_bound: Option<Arc<BoundUniforms>> = None;
        let mut current_loose_interface: Option<usize> = None;
        let mut current_sequencer_rules = 0u64;
        let mut current_geo = GeoIdentity::None;
        let mut current_material: Option<BoundMaterial> = None;

        for drawable in packet.drawables() {
            let loose_interface = drawable
                .loose_uniforms_interface
                .as_ref()
                .map(|i| Arc::as_ptr(i) as usize);

            if current_pipeline_id != Some(drawable.pipeline) {
                let pipeline = match self.resolve_pipeline(drawable.pipeline) {
                    Some(pipeline) => pipeline,
                    None => {
                        trace!(id = ?drawable.pipeline, "pipeline not visible, skipping");
                        self.result.skipped += 1;
                        continue;
                    }
                };
                self.result.pipeline_lookups += 1;
                if !Arc::ptr_eq(pipeline.layout(), &current_layout) {
                    current_layout = pipeline.layout().clone();
                    encoder.bind_pipeline_layout(&current_layout);
                    // sets bound to the previous layout are gone
                    current_material = None;
                }
                current_bound = Some(self.bind_uniforms(&pipeline, drawable));
                current_pipeline_id = Some(drawable.pipeline);
                current_pipeline = Some(pipeline);
                current_loose_interface = loose_interface;
            } else if current_loose_interface != loose_interface {
                if let Some(pipeline) = current_pipeline.clone() {
                    current_bound = Some(self.bind_uniforms(&pipeline, drawable));
                }
                current_loose_interface = loose_interface;
            }

            let (pipeline, bound) = match (current_pipeline.as_ref(), current_bound.as_ref()) {
                (Some(pipeline), Some(bound)) => (pipeline, bound),
                _ => continue,
            };

            let mut material_set = None;
            let mut dynamic_offsets: SmallVec<[u32; 2]> = SmallVec::new();
            if let Some(id) = drawable.descriptor_set {
                let set = match self.resolve_descriptor_set(id) {
                    Some(set) => set,
                    None => {
                        trace!(?id, "descriptor set not visible, skipping");
                        self.result.skipped += 1;
                        continue;
                    }
                };
                self.result.required_upload_marker = self.result.required_upload_marker.max(set.completion_upload_marker);
                if let Some(deform) = set.deform_binding {
                    match &self.deform_accelerators {
                        Some(pool) => dynamic_offsets.push(pool.dynamic_offset(deform.accelerator, drawable.deform_instance)),
                        None => {
                            warn!(?id, "descriptor set uses a deform accelerator but no deform pool is set");
                            self.result.skipped += 1;
                            continue;
                        }
                    }
                }
                material_set = Some(set);
            }

            let geo_identity = match &drawable.geo {
                None => GeoIdentity::None,
                Some(GeoRef::Shared(geo)) => GeoIdentity::Shared(geo.address()),
                Some(GeoRef::Local(id)) => GeoIdentity::Local(*id),
            };
            if geo_identity != current_geo {
                let bound_geo = match &drawable.geo {
                    None => true,
                    Some(GeoRef::Shared(geo)) => self.bind_geo(encoder, &geo.read()),
                    Some(GeoRef::Local(id)) => self.bind_geo(encoder, packet.geo(*id)),
                };
                if !bound_geo {
                    self.result.skipped += 1;
                    current_geo = GeoIdentity::None;
                    continue;
                }
                if geo_identity != GeoIdentity::None {
                    self.result.geo_binds += 1;
                }
                current_geo = geo_identity;
            }

            let sequencer_rules = bound.group_rules_hash(UNIFORM_GROUP_SEQUENCER);
            if sequencer_rules != current_sequencer_rules {
                self.parsing_context
                    .uniform_delegates_mut()
                    .apply_uniforms(encoder, bound, UNIFORM_GROUP_SEQUENCER);
                current_sequencer_rules = sequencer_rules;
                self.result.sequencer_applies += 1;
            }

            let material_descriptor_set = material_set.as_ref().map(|s| &s.descriptor_set);
            let material_rules = bound.group_rules_hash(UNIFORM_GROUP_MATERIAL);
            let material_changed = !current_material
                .as_ref()
                .map_or(false, |m| m.matches(material_descriptor_set, &dynamic_offsets, material_rules));
            if material_changed {
                let sets = [material_descriptor_set, extra_set.as_ref()];
                if bound.apply_descriptor_sets(encoder, UNIFORM_GROUP_MATERIAL, &sets, &dynamic_offsets) != 0 {
                    self.result.descriptor_set_applies += 1;
                }
                current_material = Some(BoundMaterial {
                    set: material_descriptor_set.cloned(),
                    dynamic_offsets: dynamic_offsets.clone(),
                    rules: material_rules,
                });
            }

            let mut ctx = ExecuteDrawableContext {
                encoder: &mut *encoder,
                pipeline: &*pipeline.pipeline,
                bound_uniforms: &**bound,
                packet,
                uniform_storage: self.storage.uniform.as_ref(),
            };
            (drawable.draw_fn)(&mut ctx, drawable)?;
            self.result.executed += 1;
        }

        Ok(())
    }
}

/// Draws the records of `packet` whose resources are visible at `visibility`.
///
/// The encoder state is captured for the duration of the call, and restored (stencil reference
/// included) if an execute function fails.
pub fn draw(
    parsing_context: &mut ParsingContext,
    encoder: &mut dyn GraphicsEncoder,
    pipeline_accelerators: &dyn PipelineAcceleratorPool,
    sequencer: &SequencerConfig,
    packet: &DrawablesPacket,
    visibility: VisibilityMarker,
    options: &DrawOptions,
) -> Result<DrawResult, DrawError> {
    let _span = trace_span!("draw", sequencer = sequencer.name.as_str(), drawables = packet.len()).entered();

    if packet.is_empty() {
        return Ok(DrawResult::default());
    }

    let layout = match pipeline_accelerators.try_get_pipeline_layout(sequencer) {
        Some(layout) => layout,
        None => {
            debug!("pipeline layout not available");
            return Ok(DrawResult {
                skipped: packet.len(),
                pending: true,
                ..Default::default()
            });
        }
    };

    let device = parsing_context.device().clone();
    let storage = upload_packet_storage(device.as_ref(), packet)?;
    parsing_context.uniform_delegates_mut().bring_up_to_date(device.as_ref())?;

    let sequencer_interface = parsing_context.uniform_delegates().interface().clone();
    let mut material_interface = UniformsStreamInterface::new();
    material_interface.bind_fixed_descriptor_set(0, hash_name("Material"));
    if let Some((name, _)) = parsing_context.extra_sequencer_descriptor_set() {
        material_interface.bind_fixed_descriptor_set(1, *name);
    }

    let mut draw_loop = DrawLoop {
        deform_accelerators: parsing_context.deform_accelerators().cloned(),
        per_draw_interface: parsing_context.per_draw_interface().cloned(),
        parsing_context,
        pipeline_accelerators,
        sequencer,
        packet,
        visibility,
        options,
        storage,
        sequencer_interface,
        material_interface,
        empty_interface: UniformsStreamInterface::new(),
        result: DrawResult::default(),
    };

    let outcome = {
        let mut capture = StateCapture::begin(encoder);
        let outcome = draw_loop.run(&mut *capture.encoder, layout);
        capture.failed = outcome.is_err();
        outcome
    };
    let mut result = draw_loop.result;
    let parsing_context = draw_loop.parsing_context;
    if let Err(err) = outcome {
        warn!(%err, "draw failed");
        return Err(err);
    }

    result.required_upload_marker = result
        .required_upload_marker
        .max(parsing_context.uniform_delegates().required_upload_marker());
    parsing_context.require_upload_marker(result.required_upload_marker);

    debug!(
        executed = result.executed,
        skipped = result.skipped,
        pending = result.pending,
        pipeline_lookups = result.pipeline_lookups,
        bound_uniform_lookups = result.bound_uniform_lookups,
        sequencer_applies = result.sequencer_applies,
        "draw done"
    );
    Ok(result)
}
