//! Uniform delegates and their reconciliation into a single binding interface.
//!
//! Delegates provide uniforms on behalf of the sequencer (camera transforms, lighting resources...).
//! The `UniformDelegateManager` flattens the delegates of a group (and of its bases) into one
//! `UniformsStreamInterface`. On name collisions the first delegate visited wins; within a group,
//! the most recently bound delegate is visited first, then bases.
//!
//! Delegates are queried lazily: only the slots actually consumed by a pipeline are requested, and
//! each slot at most once between two calls to `invalidate_uniforms`.
use std::ops::Range;
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use fnv::FnvHashSet;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::arena::align_up;
use crate::device::{
    BindFlags, DescriptorSet, DescriptorWrite, Device, GraphicsEncoder, Resource, ResourceDesc, ResourceView, Sampler,
};
use crate::error::DeviceError;
use crate::uniforms::{
    hash_name, BoundUniforms, DescriptorSetLayout, DescriptorType, LooseUniformKind, UniformsStream,
    UniformsStreamInterface,
};

/// Alignment of immediate data in the query scratch buffer.
const IMMEDIATE_DATA_ALIGNMENT: usize = 8;
/// Alignment of immediate data uploaded for semi-constant descriptor sets.
const SCRATCH_BUFFER_ALIGNMENT: usize = 256;

/// Provides resource views, samplers and immediate data for the bindings of its interface.
///
/// Slot indices passed to the `write_*` methods are positions in `interface()`.
pub trait ShaderResourceDelegate: Send + Sync {
    fn interface(&self) -> &UniformsStreamInterface;

    /// Writes the views for the slots set in `mask`. `dst` is indexed by interface slot.
    fn write_resource_views(&self, _mask: &FixedBitSet, _dst: &mut [Option<ResourceView>]) {}

    fn write_samplers(&self, _mask: &FixedBitSet, _dst: &mut [Option<Arc<Sampler>>]) {}

    fn immediate_data_size(&self, _slot: usize) -> usize {
        0
    }

    fn write_immediate_data(&self, _slot: usize, _dst: &mut [u8]) {}

    /// Buffer-upload counter value after which the written resources are valid.
    fn completion_upload_marker(&self) -> u64 {
        0
    }
}

/// Provides a single block of immediate data.
pub trait UniformBufferDelegate: Send + Sync {
    fn size(&self) -> usize;
    fn write_immediate_data(&self, dst: &mut [u8]);
}

fn same_object<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

////////////////////////////////////////////////////////////////////////////////////////////////////

pub type SharedDelegateGroup = Arc<RwLock<UniformDelegateGroup>>;

/// A set of delegates, with optional base groups that fill the bindings it leaves free.
#[derive(Default)]
pub struct UniformDelegateGroup {
    shader_resource_delegates: Vec<Arc<dyn ShaderResourceDelegate>>,
    uniform_delegates: Vec<(u64, Arc<dyn UniformBufferDelegate>)>,
    bases: Vec<SharedDelegateGroup>,
    change_index: u32,
}

impl UniformDelegateGroup {
    pub fn change_index(&self) -> u32 {
        self.change_index
    }
}

/// Whether `target` is `group` itself or one of its transitive bases.
fn reaches(group: &SharedDelegateGroup, target: &SharedDelegateGroup) -> bool {
    let mut visited = FnvHashSet::default();
    let mut stack = vec![group.clone()];
    while let Some(g) = stack.pop() {
        if Arc::ptr_eq(&g, target) {
            return true;
        }
        if visited.insert(Arc::as_ptr(&g) as usize) {
            stack.extend(g.read().bases.iter().cloned());
        }
    }
    false
}

/// Change indices of the groups visited by the last reconciliation, in visiting order.
type GroupSnapshot = Vec<(SharedDelegateGroup, u32)>;

////////////////////////////////////////////////////////////////////////////////////////////////////

struct ShaderResourceDelegateBinding {
    delegate: Arc<dyn ShaderResourceDelegate>,
    resource_to_usi: Vec<Option<usize>>,
    sampler_to_usi: Vec<Option<usize>>,
    immediate_data_to_usi: Vec<Option<usize>>,
    filled_resources: FixedBitSet,
    filled_samplers: FixedBitSet,
    filled_immediate_data: FixedBitSet,
}

struct UniformBufferDelegateBinding {
    delegate: Arc<dyn UniformBufferDelegate>,
    usi_slot: usize,
}

/// Local slots of `map` whose final slot is in `selected`.
fn local_mask(map: &[Option<usize>], selected: &FixedBitSet) -> FixedBitSet {
    map.iter()
        .enumerate()
        .filter_map(|(local, usi)| usi.filter(|s| selected.contains(*s)).map(|_| local))
        .collect()
}

fn has_any(set: &FixedBitSet) -> bool {
    set.count_ones(..) != 0
}

/// Flattened view of a delegate group, with per-slot query tracking.
#[derive(Default)]
struct DelegateQueryHelper {
    interface: UniformsStreamInterface,
    claimed: FnvHashSet<(LooseUniformKind, u64)>,
    shader_resource_delegates: Vec<ShaderResourceDelegateBinding>,
    uniform_delegates: Vec<UniformBufferDelegateBinding>,

    immediate_data_ranges: Vec<Range<usize>>,
    temp_data: Vec<u8>,

    queried_resources: Vec<Option<ResourceView>>,
    queried_samplers: Vec<Option<Arc<Sampler>>>,
    slots_queried_resources: FixedBitSet,
    slots_queried_samplers: FixedBitSet,
    slots_queried_immediate_data: FixedBitSet,

    required_upload_marker: u64,
}

impl DelegateQueryHelper {
    fn claim(&mut self, kind: LooseUniformKind, name: u64) -> Option<usize> {
        if name == 0 || !self.claimed.insert((kind, name)) {
            return None;
        }
        let slot = self.interface.bindings(kind).len();
        match kind {
            LooseUniformKind::ResourceView => self.interface.bind_resource_view(slot, name),
            LooseUniformKind::Sampler => self.interface.bind_sampler(slot, name),
            LooseUniformKind::ImmediateData => self.interface.bind_immediate_data(slot, name),
        };
        Some(slot)
    }

    fn reserve_immediate_data(&mut self, usi_slot: usize, size: usize) {
        let begin = align_up(self.temp_data.len(), IMMEDIATE_DATA_ALIGNMENT);
        self.temp_data.resize(begin + size, 0);
        debug_assert_eq!(self.immediate_data_ranges.len(), usi_slot);
        self.immediate_data_ranges.push(begin..begin + size);
    }

    fn add_shader_resource_delegate(&mut self, delegate: &Arc<dyn ShaderResourceDelegate>) {
        let usi = delegate.interface();
        let mut resource_to_usi = Vec::with_capacity(usi.resource_view_bindings().len());
        let mut sampler_to_usi = Vec::with_capacity(usi.sampler_bindings().len());
        let mut immediate_data_to_usi = Vec::with_capacity(usi.immediate_data_bindings().len());
        let mut filled_resources = FixedBitSet::new();
        let mut filled_samplers = FixedBitSet::new();
        let mut filled_immediate_data = FixedBitSet::new();

        for &name in usi.resource_view_bindings() {
            let slot = self.claim(LooseUniformKind::ResourceView, name);
            filled_resources.extend(slot);
            resource_to_usi.push(slot);
        }
        for &name in usi.sampler_bindings() {
            let slot = self.claim(LooseUniformKind::Sampler, name);
            filled_samplers.extend(slot);
            sampler_to_usi.push(slot);
        }
        for (local, &name) in usi.immediate_data_bindings().iter().enumerate() {
            let slot = self.claim(LooseUniformKind::ImmediateData, name);
            if let Some(slot) = slot {
                self.reserve_immediate_data(slot, delegate.immediate_data_size(local));
            }
            filled_immediate_data.extend(slot);
            immediate_data_to_usi.push(slot);
        }

        self.shader_resource_delegates.push(ShaderResourceDelegateBinding {
            delegate: delegate.clone(),
            resource_to_usi,
            sampler_to_usi,
            immediate_data_to_usi,
            filled_resources,
            filled_samplers,
            filled_immediate_data,
        });
    }

    fn add_uniform_delegate(&mut self, binding: u64, delegate: &Arc<dyn UniformBufferDelegate>) {
        if let Some(usi_slot) = self.claim(LooseUniformKind::ImmediateData, binding) {
            self.reserve_immediate_data(usi_slot, delegate.size());
            self.uniform_delegates.push(UniformBufferDelegateBinding {
                delegate: delegate.clone(),
                usi_slot,
            });
        }
    }

    /// Flattens `group` and its bases. A base reachable through several paths is visited once.
    fn prepare(&mut self, group: &SharedDelegateGroup) -> GroupSnapshot {
        let _span = trace_span!("prepare_delegates").entered();
        *self = DelegateQueryHelper::default();

        let mut snapshot = GroupSnapshot::new();
        let mut visited = FnvHashSet::default();
        let mut stack = vec![group.clone()];
        while let Some(shared) = stack.pop() {
            if !visited.insert(Arc::as_ptr(&shared) as usize) {
                continue;
            }
            let g = shared.read();
            for d in g.shader_resource_delegates.iter().rev() {
                self.add_shader_resource_delegate(d);
            }
            for (binding, d) in g.uniform_delegates.iter().rev() {
                self.add_uniform_delegate(*binding, d);
            }
            // the most recently added base is visited first
            stack.extend(g.bases.iter().cloned());
            snapshot.push((shared.clone(), g.change_index));
        }

        self.queried_resources = vec![None; self.interface.resource_view_bindings().len()];
        self.queried_samplers = vec![None; self.interface.sampler_bindings().len()];
        trace!(
            resources = self.queried_resources.len(),
            samplers = self.queried_samplers.len(),
            immediate_data = self.immediate_data_ranges.len(),
            "delegates flattened"
        );
        snapshot
    }

    fn invalidate(&mut self) {
        self.slots_queried_resources.clear();
        self.slots_queried_samplers.clear();
        self.slots_queried_immediate_data.clear();
        self.required_upload_marker = 0;
    }

    fn query_resources(&mut self, wanted: &FixedBitSet) {
        let to_query: FixedBitSet = wanted.difference(&self.slots_queried_resources).collect();
        if !has_any(&to_query) {
            return;
        }
        for b in self.shader_resource_delegates.iter() {
            let to_load: FixedBitSet = to_query.intersection(&b.filled_resources).collect();
            if !has_any(&to_load) {
                continue;
            }
            let mask = local_mask(&b.resource_to_usi, &to_load);
            let mut dst = vec![None; b.resource_to_usi.len()];
            b.delegate.write_resource_views(&mask, &mut dst);
            for local in mask.ones() {
                if let Some(usi) = b.resource_to_usi[local] {
                    self.queried_resources[usi] = dst[local].take();
                }
            }
            self.required_upload_marker = self.required_upload_marker.max(b.delegate.completion_upload_marker());
        }
        self.slots_queried_resources.union_with(&to_query);
    }

    fn query_samplers(&mut self, wanted: &FixedBitSet) {
        let to_query: FixedBitSet = wanted.difference(&self.slots_queried_samplers).collect();
        if !has_any(&to_query) {
            return;
        }
        for b in self.shader_resource_delegates.iter() {
            let to_load: FixedBitSet = to_query.intersection(&b.filled_samplers).collect();
            if !has_any(&to_load) {
                continue;
            }
            let mask = local_mask(&b.sampler_to_usi, &to_load);
            let mut dst = vec![None; b.sampler_to_usi.len()];
            b.delegate.write_samplers(&mask, &mut dst);
            for local in mask.ones() {
                if let Some(usi) = b.sampler_to_usi[local] {
                    self.queried_samplers[usi] = dst[local].take();
                }
            }
        }
        self.slots_queried_samplers.union_with(&to_query);
    }

    fn query_immediate_data(&mut self, wanted: &FixedBitSet) {
        let to_query: FixedBitSet = wanted.difference(&self.slots_queried_immediate_data).collect();
        if !has_any(&to_query) {
            return;
        }
        for b in self.shader_resource_delegates.iter() {
            let to_load: FixedBitSet = to_query.intersection(&b.filled_immediate_data).collect();
            if !has_any(&to_load) {
                continue;
            }
            for local in local_mask(&b.immediate_data_to_usi, &to_load).ones() {
                if let Some(usi) = b.immediate_data_to_usi[local] {
                    let range = self.immediate_data_ranges[usi].clone();
                    b.delegate.write_immediate_data(local, &mut self.temp_data[range]);
                }
            }
        }
        for u in self.uniform_delegates.iter() {
            if to_query.contains(u.usi_slot) {
                let range = self.immediate_data_ranges[u.usi_slot].clone();
                u.delegate.write_immediate_data(&mut self.temp_data[range]);
            }
        }
        self.slots_queried_immediate_data.union_with(&to_query);
    }

    fn immediate_data(&self, usi_slot: usize) -> &[u8] {
        &self.temp_data[self.immediate_data_ranges[usi_slot].clone()]
    }

    fn immediate_data_slices(&self) -> SmallVec<[&[u8]; 8]> {
        self.immediate_data_ranges.iter().map(|r| &self.temp_data[r.clone()]).collect()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// A descriptor set assembled from delegate outputs, rebuilt once per invalidation.
struct SemiConstantDescriptorSet {
    binding: u64,
    layout: DescriptorSetLayout,
    current: Option<Arc<DescriptorSet>>,
    scratch: Option<Arc<Resource>>,
    unresolved: Vec<String>,
}

enum SlotSource {
    ResourceView(usize),
    Sampler(usize),
    ImmediateData(usize),
}

impl SemiConstantDescriptorSet {
    fn rebuild(&mut self, device: &dyn Device, helper: &mut DelegateQueryHelper) -> Result<(), DeviceError> {
        let _span = trace_span!("rebuild_semi_constant_descriptor_set", layout = self.layout.name.as_str()).entered();
        self.unresolved.clear();

        let find = |bindings: &[u64], name: u64| bindings.iter().position(|n| *n == name);
        let mut sources = Vec::with_capacity(self.layout.slots.len());
        let mut wanted_resources = FixedBitSet::new();
        let mut wanted_samplers = FixedBitSet::new();
        let mut wanted_immediate_data = FixedBitSet::new();

        for (layout_slot, slot) in self.layout.slots.iter().enumerate() {
            let name = hash_name(&slot.name);
            let usi = &helper.interface;
            let source = if slot.ty == DescriptorType::Sampler {
                find(usi.sampler_bindings(), name).map(SlotSource::Sampler)
            } else if let Some(s) = find(usi.resource_view_bindings(), name) {
                Some(SlotSource::ResourceView(s))
            } else {
                find(usi.immediate_data_bindings(), name).map(SlotSource::ImmediateData)
            };

            match &source {
                Some(SlotSource::ResourceView(s)) => wanted_resources.extend(Some(*s)),
                Some(SlotSource::Sampler(s)) => wanted_samplers.extend(Some(*s)),
                Some(SlotSource::ImmediateData(s)) => {
                    if cfg!(debug_assertions) && slot.ty != DescriptorType::UniformBuffer {
                        warn!(
                            slot = slot.name.as_str(),
                            ty = ?slot.ty,
                            "immediate data bound to a non uniform-buffer descriptor slot"
                        );
                    }
                    wanted_immediate_data.extend(Some(*s))
                }
                None => {
                    if cfg!(debug_assertions) {
                        warn!(
                            layout = self.layout.name.as_str(),
                            slot = slot.name.as_str(),
                            "descriptor slot not provided by any uniform delegate"
                        );
                    }
                    self.unresolved.push(slot.name.clone());
                }
            }
            sources.push((layout_slot as u32, source));
        }

        helper.query_resources(&wanted_resources);
        helper.query_samplers(&wanted_samplers);
        helper.query_immediate_data(&wanted_immediate_data);

        // immediate data goes through a scratch constant buffer
        let mut scratch_data = Vec::new();
        let mut scratch_ranges = Vec::new();
        for (_, source) in sources.iter() {
            if let Some(SlotSource::ImmediateData(s)) = source {
                let data = helper.immediate_data(*s);
                let begin = align_up(scratch_data.len(), SCRATCH_BUFFER_ALIGNMENT);
                scratch_data.resize(begin, 0);
                scratch_data.extend_from_slice(data);
                scratch_ranges.push(begin as u64..(begin + data.len()) as u64);
            }
        }
        self.scratch = if scratch_data.is_empty() {
            None
        } else {
            let desc = ResourceDesc {
                name: format!("{} (semi-constant uniforms)", self.layout.name),
                bind_flags: BindFlags::CONSTANT_BUFFER,
                size: scratch_data.len() as u64,
            };
            Some(device.create_resource(&desc, Some(&scratch_data))?)
        };

        let mut writes = Vec::with_capacity(sources.len());
        let mut scratch_ranges = scratch_ranges.into_iter();
        for (slot, source) in sources {
            match source {
                Some(SlotSource::ResourceView(s)) => {
                    if let Some(view) = &helper.queried_resources[s] {
                        writes.push(DescriptorWrite::ResourceView { slot, view: view.clone() });
                    }
                }
                Some(SlotSource::Sampler(s)) => {
                    if let Some(sampler) = &helper.queried_samplers[s] {
                        writes.push(DescriptorWrite::Sampler {
                            slot,
                            sampler: sampler.clone(),
                        });
                    }
                }
                Some(SlotSource::ImmediateData(_)) => {
                    if let (Some(scratch), Some(range)) = (&self.scratch, scratch_ranges.next()) {
                        let view = device.create_view(scratch, BindFlags::CONSTANT_BUFFER, Some(range))?;
                        writes.push(DescriptorWrite::ResourceView { slot, view });
                    }
                }
                None => {}
            }
        }

        self.current = Some(device.create_descriptor_set(&self.layout, &writes)?);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Reconciles the uniform delegates bound for a sequencer into one binding interface.
pub struct UniformDelegateManager {
    group: SharedDelegateGroup,
    helper: DelegateQueryHelper,
    prepared_groups: Option<GroupSnapshot>,
    semi_constant_sets: Vec<SemiConstantDescriptorSet>,
    pending_rebuild: bool,
    interface: UniformsStreamInterface,
}

impl Default for UniformDelegateManager {
    fn default() -> Self {
        UniformDelegateManager::new()
    }
}

impl UniformDelegateManager {
    pub fn new() -> UniformDelegateManager {
        UniformDelegateManager {
            group: Arc::new(RwLock::new(UniformDelegateGroup::default())),
            helper: DelegateQueryHelper::default(),
            prepared_groups: None,
            semi_constant_sets: vec![],
            pending_rebuild: true,
            interface: UniformsStreamInterface::new(),
        }
    }

    /// The delegate group of this manager, usable as a base of other managers.
    pub fn group(&self) -> &SharedDelegateGroup {
        &self.group
    }

    pub fn change_index(&self) -> u32 {
        self.group.read().change_index
    }

    pub fn bind_shader_resource_delegate(&mut self, delegate: Arc<dyn ShaderResourceDelegate>) {
        let mut group = self.group.write();
        group.shader_resource_delegates.push(delegate);
        group.change_index += 1;
    }

    pub fn unbind_shader_resource_delegate(&mut self, delegate: &Arc<dyn ShaderResourceDelegate>) {
        let mut group = self.group.write();
        let len = group.shader_resource_delegates.len();
        group.shader_resource_delegates.retain(|d| !same_object(d, delegate));
        if group.shader_resource_delegates.len() != len {
            group.change_index += 1;
        }
    }

    /// Binds a block of immediate data under `binding`, replacing any delegate with the same binding.
    pub fn bind_uniform_delegate(&mut self, binding: u64, delegate: Arc<dyn UniformBufferDelegate>) {
        let mut group = self.group.write();
        if let Some(i) = group.uniform_delegates.iter().position(|(b, _)| *b == binding) {
            group.uniform_delegates[i].1 = delegate;
        } else {
            group.uniform_delegates.push((binding, delegate));
        }
        group.change_index += 1;
    }

    pub fn unbind_uniform_delegate(&mut self, delegate: &Arc<dyn UniformBufferDelegate>) {
        let mut group = self.group.write();
        let len = group.uniform_delegates.len();
        group.uniform_delegates.retain(|(_, d)| !same_object(d, delegate));
        if group.uniform_delegates.len() != len {
            group.change_index += 1;
        }
    }

    /// Assembles a descriptor set with `layout` from delegate outputs, bound under `binding`.
    pub fn bind_semi_constant_descriptor_set(&mut self, binding: u64, layout: DescriptorSetLayout) {
        let set = SemiConstantDescriptorSet {
            binding,
            layout,
            current: None,
            scratch: None,
            unresolved: vec![],
        };
        if let Some(i) = self.semi_constant_sets.iter().position(|s| s.binding == binding) {
            self.semi_constant_sets[i] = set;
        } else {
            self.semi_constant_sets.push(set);
        }
        self.prepared_groups = None;
    }

    pub fn unbind_semi_constant_descriptor_set(&mut self, binding: u64) {
        self.semi_constant_sets.retain(|s| s.binding != binding);
        self.prepared_groups = None;
    }

    /// Uses the delegates of `base` for the bindings left free by this manager.
    ///
    /// # Panics
    ///
    /// If `base` is this manager's group or already uses it as a (transitive) base.
    pub fn add_base(&mut self, base: &UniformDelegateManager) {
        assert!(
            !reaches(&base.group, &self.group),
            "adding this base would create a cycle of delegate groups"
        );
        let mut group = self.group.write();
        group.bases.push(base.group.clone());
        group.change_index += 1;
    }

    pub fn remove_base(&mut self, base: &UniformDelegateManager) {
        let mut group = self.group.write();
        let len = group.bases.len();
        group.bases.retain(|g| !Arc::ptr_eq(g, &base.group));
        if group.bases.len() != len {
            group.change_index += 1;
        }
    }

    /// Flattens the delegates again if this group or one of its bases changed, then rebuilds
    /// the semi-constant descriptor sets if they were invalidated.
    ///
    /// Returns whether the delegates were flattened again.
    pub fn bring_up_to_date(&mut self, device: &dyn Device) -> Result<bool, DeviceError> {
        let _span = trace_span!("bring_up_to_date").entered();
        // a change anywhere bumps the index of a group visited last time: adding or removing
        // a base bumps the group that owns it
        let up_to_date = self.prepared_groups.as_ref().map_or(false, |groups| {
            groups.iter().all(|(g, change_index)| g.read().change_index == *change_index)
        });
        let mut reconciled = false;
        if !up_to_date {
            let snapshot = self.helper.prepare(&self.group);
            self.interface = self.helper.interface.clone();
            for (slot, set) in self.semi_constant_sets.iter().enumerate() {
                self.interface.bind_fixed_descriptor_set(slot, set.binding);
            }
            self.prepared_groups = Some(snapshot);
            self.pending_rebuild = true;
            reconciled = true;
        }
        if self.pending_rebuild {
            for set in self.semi_constant_sets.iter_mut() {
                set.rebuild(device, &mut self.helper)?;
            }
            self.pending_rebuild = false;
        }
        Ok(reconciled)
    }

    /// The flattened interface. Semi-constant descriptor sets appear as fixed descriptor sets.
    pub fn interface(&self) -> &UniformsStreamInterface {
        &self.interface
    }

    /// Forgets what was queried from the delegates, typically once per frame.
    pub fn invalidate_uniforms(&mut self) {
        self.helper.invalidate();
        self.pending_rebuild = true;
    }

    /// Highest completion upload marker reported by the delegates queried since the last invalidation.
    pub fn required_upload_marker(&self) -> u64 {
        self.helper.required_upload_marker
    }

    /// Names of descriptor slots that no delegate provides, per semi-constant descriptor set binding.
    pub fn unresolved_slots(&self, binding: u64) -> &[String] {
        self.semi_constant_sets
            .iter()
            .find(|s| s.binding == binding)
            .map_or(&[][..], |s| s.unresolved.as_slice())
    }

    /// Binds the semi-constant descriptor sets and the loose uniforms that `bound` consumes in `group`.
    pub fn apply_uniforms(&mut self, encoder: &mut dyn GraphicsEncoder, bound: &BoundUniforms, group: usize) {
        let sets: SmallVec<[Option<&Arc<DescriptorSet>>; 4]> =
            self.semi_constant_sets.iter().map(|s| s.current.as_ref()).collect();
        bound.apply_descriptor_sets(encoder, group, &sets, &[]);

        if bound.has_loose_uniforms(group) {
            self.helper.query_resources(bound.bound_loose_resources(group));
            self.helper.query_samplers(bound.bound_loose_samplers(group));
            self.helper.query_immediate_data(bound.bound_loose_immediate_data(group));
            let immediate_data = self.helper.immediate_data_slices();
            let stream = UniformsStream {
                resource_views: &self.helper.queried_resources,
                immediate_data: &immediate_data,
                samplers: &self.helper.queried_samplers,
            };
            bound.apply_loose_uniforms(encoder, group, &stream);
        }
    }
}
