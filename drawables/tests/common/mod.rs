#![allow(dead_code, unused_macros)]
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use drawables::readiness::channel;
use drawables::*;
use parking_lot::Mutex;
use slotmap::SlotMap;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Device that creates plain handles and remembers what it was asked for.
#[derive(Default)]
pub struct MockDevice {
    next_handle: AtomicU64,
    pub resources: Mutex<Vec<(Arc<Resource>, Vec<u8>)>>,
    pub descriptor_sets: Mutex<Vec<(String, Vec<DescriptorWrite>)>>,
}

impl MockDevice {
    pub fn new() -> Arc<MockDevice> {
        Arc::new(MockDevice {
            next_handle: AtomicU64::new(1000),
            ..Default::default()
        })
    }

    pub fn handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    pub fn buffer(&self, name: &str, size: u64) -> Arc<Resource> {
        Arc::new(Resource {
            handle: self.handle(),
            desc: ResourceDesc {
                name: name.to_string(),
                bind_flags: BindFlags::VERTEX_BUFFER | BindFlags::INDEX_BUFFER,
                size,
            },
        })
    }

    /// Contents of a resource created with initial data.
    pub fn contents(&self, handle: u64) -> Option<Vec<u8>> {
        self.resources
            .lock()
            .iter()
            .find(|(r, _)| r.handle == handle)
            .map(|(_, data)| data.clone())
    }
}

impl Device for MockDevice {
    fn create_resource(&self, desc: &ResourceDesc, initial_data: Option<&[u8]>) -> Result<Arc<Resource>, DeviceError> {
        if let Some(data) = initial_data {
            if data.len() as u64 > desc.size {
                return Err(DeviceError::InvalidDescription(desc.name.clone()));
            }
        }
        let resource = Arc::new(Resource {
            handle: self.handle(),
            desc: desc.clone(),
        });
        self.resources
            .lock()
            .push((resource.clone(), initial_data.map(<[u8]>::to_vec).unwrap_or_default()));
        Ok(resource)
    }

    fn create_view(
        &self,
        resource: &Arc<Resource>,
        usage: BindFlags,
        range: Option<Range<u64>>,
    ) -> Result<ResourceView, DeviceError> {
        Ok(ResourceView {
            resource: resource.clone(),
            usage,
            range: range.unwrap_or(0..resource.desc.size),
        })
    }

    fn create_descriptor_set(
        &self,
        layout: &DescriptorSetLayout,
        writes: &[DescriptorWrite],
    ) -> Result<Arc<DescriptorSet>, DeviceError> {
        self.descriptor_sets.lock().push((layout.name.clone(), writes.to_vec()));
        Ok(Arc::new(DescriptorSet { handle: self.handle() }))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Loose {
    ResourceView { slot: u32, resource: u64, range: Range<u64> },
    Sampler { slot: u32, sampler: u64 },
    ImmediateData { slot: u32, data: Vec<u8> },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    BindPipelineLayout(u64),
    BindVertexBuffers {
        vertex: Vec<(u64, u64)>,
        index: Option<(u64, Format, u64)>,
    },
    BindDescriptorSet {
        slot: u32,
        set: u64,
        dynamic_offsets: Vec<u32>,
    },
    ApplyLooseUniforms(Vec<Loose>),
    Draw {
        pipeline: u64,
        vertex_count: u32,
        start_vertex: u32,
    },
    DrawIndexed {
        pipeline: u64,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    },
    DrawInstances {
        pipeline: u64,
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexedInstances {
        pipeline: u64,
        index_count: u32,
        instance_count: u32,
    },
    DrawAuto,
    DrawIndirect,
    SetStencilRef(u32, u32),
    BeginStateCapture,
    EndStateCapture,
}

/// Encoder that records every command.
#[derive(Default)]
pub struct RecordingEncoder {
    pub commands: Vec<Command>,
}

impl RecordingEncoder {
    pub fn count(&self, f: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| f(c)).count()
    }

    pub fn draws(&self) -> usize {
        self.count(|c| {
            matches!(
                c,
                Command::Draw { .. }
                    | Command::DrawIndexed { .. }
                    | Command::DrawInstances { .. }
                    | Command::DrawIndexedInstances { .. }
                    | Command::DrawAuto
                    | Command::DrawIndirect
            )
        })
    }

    pub fn loose_uniforms(&self) -> Vec<Loose> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::ApplyLooseUniforms(u) => Some(u.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl GraphicsEncoder for RecordingEncoder {
    fn bind_pipeline_layout(&mut self, layout: &Arc<PipelineLayout>) {
        self.commands.push(Command::BindPipelineLayout(layout.handle));
    }

    fn bind_vertex_buffers(&mut self, vertex_buffers: &[VertexBufferView], index_buffer: Option<&IndexBufferView>) {
        self.commands.push(Command::BindVertexBuffers {
            vertex: vertex_buffers.iter().map(|v| (v.resource.handle, v.offset)).collect(),
            index: index_buffer.map(|i| (i.resource.handle, i.format, i.offset)),
        });
    }

    fn bind_descriptor_set(&mut self, slot: u32, set: &Arc<DescriptorSet>, dynamic_offsets: &[u32]) {
        self.commands.push(Command::BindDescriptorSet {
            slot,
            set: set.handle,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn apply_loose_uniforms(&mut self, uniforms: &[LooseUniform]) {
        self.commands.push(Command::ApplyLooseUniforms(
            uniforms
                .iter()
                .map(|u| match *u {
                    LooseUniform::ResourceView { slot, view } => Loose::ResourceView {
                        slot,
                        resource: view.resource.handle,
                        range: view.range.clone(),
                    },
                    LooseUniform::Sampler { slot, sampler } => Loose::Sampler {
                        slot,
                        sampler: sampler.handle,
                    },
                    LooseUniform::ImmediateData { slot, data } => Loose::ImmediateData {
                        slot,
                        data: data.to_vec(),
                    },
                })
                .collect(),
        ));
    }

    fn draw(&mut self, pipeline: &GraphicsPipeline, vertex_count: u32, start_vertex: u32) {
        self.commands.push(Command::Draw {
            pipeline: pipeline.handle,
            vertex_count,
            start_vertex,
        });
    }

    fn draw_indexed(&mut self, pipeline: &GraphicsPipeline, index_count: u32, start_index: u32, base_vertex: i32) {
        self.commands.push(Command::DrawIndexed {
            pipeline: pipeline.handle,
            index_count,
            start_index,
            base_vertex,
        });
    }

    fn draw_instances(&mut self, pipeline: &GraphicsPipeline, vertex_count: u32, instance_count: u32, _start_vertex: u32) {
        self.commands.push(Command::DrawInstances {
            pipeline: pipeline.handle,
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed_instances(
        &mut self,
        pipeline: &GraphicsPipeline,
        index_count: u32,
        instance_count: u32,
        _start_index: u32,
    ) {
        self.commands.push(Command::DrawIndexedInstances {
            pipeline: pipeline.handle,
            index_count,
            instance_count,
        });
    }

    fn draw_auto(&mut self, _pipeline: &GraphicsPipeline) {
        self.commands.push(Command::DrawAuto);
    }

    fn draw_indirect(&mut self, _pipeline: &GraphicsPipeline, _args: &Arc<Resource>, _offset: u64) {
        self.commands.push(Command::DrawIndirect);
    }

    fn set_stencil_ref(&mut self, front: u32, back: u32) {
        self.commands.push(Command::SetStencilRef(front, back));
    }

    fn begin_state_capture(&mut self) {
        self.commands.push(Command::BeginStateCapture);
    }

    fn end_state_capture(&mut self) {
        self.commands.push(Command::EndStateCapture);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

struct MockPipeline {
    compiled: Arc<CompiledPipeline>,
    visible_at: u64,
    readiness: Option<Readiness<u64>>,
}

struct MockDescriptorSet {
    set: Arc<ActualizedDescriptorSet>,
    visible_at: VisibilityMarker,
    readiness: Option<Readiness<VisibilityMarker>>,
}

/// Accelerator pool whose accelerators become visible at fixed markers.
pub struct MockAcceleratorPool {
    next_handle: AtomicU64,
    pub layout: Mutex<Option<Arc<PipelineLayout>>>,
    pipelines: Mutex<SlotMap<PipelineAcceleratorId, MockPipeline>>,
    descriptor_sets: Mutex<SlotMap<DescriptorSetAcceleratorId, MockDescriptorSet>>,
    pub readiness_requests: AtomicUsize,
}

impl MockAcceleratorPool {
    pub fn new() -> MockAcceleratorPool {
        MockAcceleratorPool {
            next_handle: AtomicU64::new(1),
            layout: Mutex::new(Some(Arc::new(PipelineLayout {
                handle: 1,
                name: "main layout".to_string(),
            }))),
            pipelines: Mutex::new(SlotMap::with_key()),
            descriptor_sets: Mutex::new(SlotMap::with_key()),
            readiness_requests: AtomicUsize::new(0),
        }
    }

    fn handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 100
    }

    fn compile(&self, signature: PipelineSignature, layout: Option<Arc<PipelineLayout>>) -> Arc<CompiledPipeline> {
        let layout = layout
            .or_else(|| self.layout.lock().clone())
            .expect("no pipeline layout");
        Arc::new(CompiledPipeline::new(
            Arc::new(GraphicsPipeline {
                handle: self.handle(),
                layout,
            }),
            Arc::new(signature),
        ))
    }

    pub fn add_pipeline(&self, signature: PipelineSignature, visible_at: u64) -> PipelineAcceleratorId {
        let compiled = self.compile(signature, None);
        self.pipelines.lock().insert(MockPipeline {
            compiled,
            visible_at,
            readiness: None,
        })
    }

    pub fn add_pipeline_with_layout(&self, signature: PipelineSignature, layout: Arc<PipelineLayout>) -> PipelineAcceleratorId {
        let compiled = self.compile(signature, Some(layout));
        self.pipelines.lock().insert(MockPipeline {
            compiled,
            visible_at: 0,
            readiness: None,
        })
    }

    /// A pipeline visible at `visible_at`, whose readiness handle resolves through the returned promise.
    pub fn add_pending_pipeline(
        &self,
        signature: PipelineSignature,
        visible_at: u64,
    ) -> (PipelineAcceleratorId, ReadinessPromise<u64>) {
        let compiled = self.compile(signature, None);
        let (promise, readiness) = channel();
        let id = self.pipelines.lock().insert(MockPipeline {
            compiled,
            visible_at,
            readiness: Some(readiness),
        });
        (id, promise)
    }

    pub fn failed_pipeline(&self, signature: PipelineSignature) -> PipelineAcceleratorId {
        let compiled = self.compile(signature, None);
        self.pipelines.lock().insert(MockPipeline {
            compiled,
            visible_at: u64::MAX,
            readiness: Some(Readiness::failed(AssetError::Invalid {
                name: "broken".to_string(),
                reason: "shader compilation failed".to_string(),
            })),
        })
    }

    pub fn pipeline_handle(&self, id: PipelineAcceleratorId) -> u64 {
        self.pipelines.lock()[id].compiled.pipeline.handle
    }

    pub fn add_descriptor_set(
        &self,
        visible_at: VisibilityMarker,
        completion_upload_marker: u64,
        deform_binding: Option<DeformBinding>,
    ) -> DescriptorSetAcceleratorId {
        let set = Arc::new(ActualizedDescriptorSet {
            descriptor_set: Arc::new(DescriptorSet { handle: self.handle() }),
            completion_upload_marker,
            deform_binding,
        });
        self.descriptor_sets.lock().insert(MockDescriptorSet {
            set,
            visible_at,
            readiness: None,
        })
    }

    pub fn add_pending_descriptor_set(
        &self,
        visible_at: VisibilityMarker,
    ) -> (DescriptorSetAcceleratorId, ReadinessPromise<VisibilityMarker>) {
        let set = Arc::new(ActualizedDescriptorSet {
            descriptor_set: Arc::new(DescriptorSet { handle: self.handle() }),
            completion_upload_marker: 0,
            deform_binding: None,
        });
        let (promise, readiness) = channel();
        let id = self.descriptor_sets.lock().insert(MockDescriptorSet {
            set,
            visible_at,
            readiness: Some(readiness),
        });
        (id, promise)
    }

    pub fn descriptor_set_handle(&self, id: DescriptorSetAcceleratorId) -> u64 {
        self.descriptor_sets.lock()[id].set.descriptor_set.handle
    }
}

impl PipelineAcceleratorPool for MockAcceleratorPool {
    fn try_get_pipeline(
        &self,
        id: PipelineAcceleratorId,
        _sequencer: &SequencerConfig,
        visibility: VisibilityMarker,
    ) -> Option<Arc<CompiledPipeline>> {
        let pipelines = self.pipelines.lock();
        let p = pipelines.get(id)?;
        (visibility.pipeline >= p.visible_at).then(|| p.compiled.clone())
    }

    fn try_get_descriptor_set(
        &self,
        id: DescriptorSetAcceleratorId,
        visibility: VisibilityMarker,
    ) -> Option<Arc<ActualizedDescriptorSet>> {
        let sets = self.descriptor_sets.lock();
        let s = sets.get(id)?;
        visibility.sees(s.visible_at).then(|| s.set.clone())
    }

    fn try_get_pipeline_layout(&self, _sequencer: &SequencerConfig) -> Option<Arc<PipelineLayout>> {
        self.layout.lock().clone()
    }

    fn pipeline_readiness(&self, id: PipelineAcceleratorId, _sequencer: &SequencerConfig) -> Readiness<u64> {
        self.readiness_requests.fetch_add(1, Ordering::Relaxed);
        let mut pipelines = self.pipelines.lock();
        match pipelines.get_mut(id) {
            Some(p) => p.readiness.take().unwrap_or(Readiness::ready(p.visible_at)),
            None => Readiness::failed(AssetError::Abandoned),
        }
    }

    fn descriptor_set_readiness(&self, id: DescriptorSetAcceleratorId) -> Readiness<VisibilityMarker> {
        self.readiness_requests.fetch_add(1, Ordering::Relaxed);
        let mut sets = self.descriptor_sets.lock();
        match sets.get_mut(id) {
            Some(s) => s.readiness.take().unwrap_or(Readiness::ready(s.visible_at)),
            None => Readiness::failed(AssetError::Abandoned),
        }
    }
}

/// Deform pool with one output buffer per accelerator and 256-byte instance strides.
#[derive(Default)]
pub struct MockDeformPool {
    pub outputs: Mutex<SlotMap<DeformAcceleratorId, VertexBufferView>>,
}

impl DeformAcceleratorPool for MockDeformPool {
    fn output_stream(&self, id: DeformAcceleratorId) -> Option<VertexBufferView> {
        self.outputs.lock().get(id).cloned()
    }

    fn dynamic_offset(&self, _id: DeformAcceleratorId, instance: u32) -> u32 {
        instance * 256
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn sequencer() -> SequencerConfig {
    SequencerConfig::new(
        "main",
        FrameBufferDesc {
            color_formats: smallvec::smallvec![Format::R8G8B8A8Unorm],
            depth_format: None,
            samples: 1,
        },
        0,
    )
}

/// Signature consuming the material set, a sequencer-provided `ViewTransform` and a per-draw `LocalTransform`.
pub fn default_signature() -> PipelineSignature {
    PipelineSignature::new()
        .with_descriptor_set("Material", 1)
        .with_loose("ViewTransform", LooseUniformKind::ImmediateData, 0)
        .with_loose("LocalTransform", LooseUniformKind::ImmediateData, 1)
}

pub struct Fixture {
    pub device: Arc<MockDevice>,
    pub accelerators: MockAcceleratorPool,
    pub parsing_context: ParsingContext,
    pub encoder: RecordingEncoder,
    pub packets: DrawablesPacketPool,
    pub sequencer: SequencerConfig,
}

impl Fixture {
    pub fn new() -> Fixture {
        init_tracing();
        let device = MockDevice::new();
        Fixture {
            parsing_context: ParsingContext::new(device.clone()),
            device,
            accelerators: MockAcceleratorPool::new(),
            encoder: RecordingEncoder::default(),
            packets: DrawablesPacketPool::new(PacketPoolCreateInfo::default()),
            sequencer: sequencer(),
        }
    }

    pub fn draw(&mut self, packet: &DrawablesPacket, visibility: VisibilityMarker) -> Result<DrawResult, DrawError> {
        self.draw_with_options(packet, visibility, &DrawOptions::default())
    }

    pub fn draw_with_options(
        &mut self,
        packet: &DrawablesPacket,
        visibility: VisibilityMarker,
        options: &DrawOptions,
    ) -> Result<DrawResult, DrawError> {
        drawables::draw(
            &mut self.parsing_context,
            &mut self.encoder,
            &self.accelerators,
            &self.sequencer,
            packet,
            visibility,
            options,
        )
    }
}

/// Pushes `$n` copies of `$drawable` into `$packet`.
macro_rules! push_records {
    ($packet:expr, $n:expr, $drawable:expr) => {
        for _ in 0..$n {
            $packet.push($drawable.clone());
        }
    };
}
