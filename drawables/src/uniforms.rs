//! Uniform binding interfaces and their binding to pipeline signatures.
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use fnv::{FnvHashSet, FnvHasher};
use smallvec::SmallVec;

use crate::device::{DescriptorSet, GraphicsEncoder, ResourceView, Sampler};

/// Number of uniform groups a pipeline binds from.
pub const UNIFORM_GROUP_COUNT: usize = 4;
/// Uniforms provided by the sequencer (uniform delegates).
pub const UNIFORM_GROUP_SEQUENCER: usize = 0;
/// Material descriptor set.
pub const UNIFORM_GROUP_MATERIAL: usize = 1;
/// Loose uniforms applied by a drawable's execute function.
pub const UNIFORM_GROUP_DRAW: usize = 2;
/// Per-draw interface provided by the parsing context.
pub const UNIFORM_GROUP_PER_DRAW: usize = 3;

/// Hashes a binding name. 0 is reserved for "no binding".
pub fn hash_name(name: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.finish().max(1)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LooseUniformKind {
    ResourceView,
    Sampler,
    ImmediateData,
}

/// Declares, by hashed name, the uniforms a provider binds.
///
/// Bindings are identified by their position in each list ("interface slot").
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct UniformsStreamInterface {
    resource_views: Vec<u64>,
    samplers: Vec<u64>,
    immediate_data: Vec<u64>,
    fixed_descriptor_sets: Vec<u64>,
}

fn bind_at(list: &mut Vec<u64>, slot: usize, name: u64) {
    if list.len() <= slot {
        list.resize(slot + 1, 0);
    }
    list[slot] = name;
}

impl UniformsStreamInterface {
    pub fn new() -> UniformsStreamInterface {
        UniformsStreamInterface::default()
    }

    pub fn bind_resource_view(&mut self, slot: usize, name: u64) -> &mut Self {
        bind_at(&mut self.resource_views, slot, name);
        self
    }

    pub fn bind_sampler(&mut self, slot: usize, name: u64) -> &mut Self {
        bind_at(&mut self.samplers, slot, name);
        self
    }

    pub fn bind_immediate_data(&mut self, slot: usize, name: u64) -> &mut Self {
        bind_at(&mut self.immediate_data, slot, name);
        self
    }

    pub fn bind_fixed_descriptor_set(&mut self, slot: usize, name: u64) -> &mut Self {
        bind_at(&mut self.fixed_descriptor_sets, slot, name);
        self
    }

    pub fn resource_view_bindings(&self) -> &[u64] {
        &self.resource_views
    }

    pub fn sampler_bindings(&self) -> &[u64] {
        &self.samplers
    }

    pub fn immediate_data_bindings(&self) -> &[u64] {
        &self.immediate_data
    }

    pub fn fixed_descriptor_set_bindings(&self) -> &[u64] {
        &self.fixed_descriptor_sets
    }

    pub fn bindings(&self, kind: LooseUniformKind) -> &[u64] {
        match kind {
            LooseUniformKind::ResourceView => &self.resource_views,
            LooseUniformKind::Sampler => &self.samplers,
            LooseUniformKind::ImmediateData => &self.immediate_data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resource_views.is_empty()
            && self.samplers.is_empty()
            && self.immediate_data.is_empty()
            && self.fixed_descriptor_sets.is_empty()
    }

    pub fn reset(&mut self) {
        self.resource_views.clear();
        self.samplers.clear();
        self.immediate_data.clear();
        self.fixed_descriptor_sets.clear();
    }

    /// Content hash. Empty interfaces hash to 0.
    pub fn hash_value(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let mut hasher = FnvHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Values for the bindings of a `UniformsStreamInterface`, indexed by interface slot.
#[derive(Copy, Clone, Debug, Default)]
pub struct UniformsStream<'a> {
    pub resource_views: &'a [Option<ResourceView>],
    pub immediate_data: &'a [&'a [u8]],
    pub samplers: &'a [Option<Arc<Sampler>>],
}

/// A loose uniform as handed to the encoder, addressed by pipeline slot.
#[derive(Copy, Clone, Debug)]
pub enum LooseUniform<'a> {
    ResourceView { slot: u32, view: &'a ResourceView },
    Sampler { slot: u32, sampler: &'a Arc<Sampler> },
    ImmediateData { slot: u32, data: &'a [u8] },
}

////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorType {
    Sampler,
    SampledTexture,
    UniformBuffer,
    UnorderedAccessBuffer,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DescriptorSlot {
    pub name: String,
    pub ty: DescriptorType,
}

/// Layout of a descriptor set, as declared by a pipeline layout.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DescriptorSetLayout {
    pub name: String,
    pub slots: Vec<DescriptorSlot>,
}

impl DescriptorSetLayout {
    pub fn new(name: impl Into<String>) -> DescriptorSetLayout {
        DescriptorSetLayout {
            name: name.into(),
            slots: vec![],
        }
    }

    pub fn with_slot(mut self, name: impl Into<String>, ty: DescriptorType) -> DescriptorSetLayout {
        self.slots.push(DescriptorSlot { name: name.into(), ty });
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SignatureBinding {
    pub name: u64,
    pub kind: LooseUniformKind,
    pub slot: u32,
}

/// The uniforms a compiled pipeline consumes.
#[derive(Clone, Debug, Default)]
pub struct PipelineSignature {
    /// `(name, pipeline slot)` of each descriptor set.
    pub descriptor_sets: Vec<(u64, u32)>,
    pub loose: Vec<SignatureBinding>,
}

impl PipelineSignature {
    pub fn new() -> PipelineSignature {
        PipelineSignature::default()
    }

    pub fn with_descriptor_set(mut self, name: &str, slot: u32) -> Self {
        self.descriptor_sets.push((hash_name(name), slot));
        self
    }

    pub fn with_loose(mut self, name: &str, kind: LooseUniformKind, slot: u32) -> Self {
        self.loose.push(SignatureBinding {
            name: hash_name(name),
            kind,
            slot,
        });
        self
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug, Hash)]
struct LooseBinding {
    kind: LooseUniformKind,
    interface_slot: usize,
    shader_slot: u32,
}

#[derive(Copy, Clone, Debug, Hash)]
struct DescriptorSetBinding {
    interface_slot: usize,
    pipeline_slot: u32,
}

#[derive(Clone, Debug, Default)]
struct GroupRules {
    loose: Vec<LooseBinding>,
    descriptor_sets: Vec<DescriptorSetBinding>,
    bound_resources: FixedBitSet,
    bound_samplers: FixedBitSet,
    bound_immediate_data: FixedBitSet,
    hash: u64,
}

/// Binding of up to four uniform interfaces to a pipeline signature.
///
/// Each pipeline binding is satisfied by the first group that declares its name.
#[derive(Clone, Debug)]
pub struct BoundUniforms {
    groups: [GroupRules; UNIFORM_GROUP_COUNT],
}

impl BoundUniforms {
    pub fn new(signature: &PipelineSignature, interfaces: [&UniformsStreamInterface; UNIFORM_GROUP_COUNT]) -> BoundUniforms {
        let mut groups: [GroupRules; UNIFORM_GROUP_COUNT] = Default::default();
        let mut claimed_loose = FnvHashSet::default();
        let mut claimed_sets = FnvHashSet::default();

        for (group_index, (rules, usi)) in groups.iter_mut().zip(interfaces.iter()).enumerate() {
            for kind in [
                LooseUniformKind::ResourceView,
                LooseUniformKind::Sampler,
                LooseUniformKind::ImmediateData,
            ] {
                let names = usi.bindings(kind);
                let mut bound = FixedBitSet::with_capacity(names.len());
                for (interface_slot, &name) in names.iter().enumerate() {
                    if name == 0 {
                        continue;
                    }
                    let Some((signature_index, binding)) = signature
                        .loose
                        .iter()
                        .enumerate()
                        .find(|(_, b)| b.kind == kind && b.name == name)
                    else {
                        continue;
                    };
                    if !claimed_loose.insert(signature_index) {
                        continue;
                    }
                    bound.insert(interface_slot);
                    rules.loose.push(LooseBinding {
                        kind,
                        interface_slot,
                        shader_slot: binding.slot,
                    });
                }
                match kind {
                    LooseUniformKind::ResourceView => rules.bound_resources = bound,
                    LooseUniformKind::Sampler => rules.bound_samplers = bound,
                    LooseUniformKind::ImmediateData => rules.bound_immediate_data = bound,
                }
            }

            for (interface_slot, &name) in usi.fixed_descriptor_set_bindings().iter().enumerate() {
                if name == 0 {
                    continue;
                }
                if let Some(&(_, pipeline_slot)) = signature.descriptor_sets.iter().find(|(n, _)| *n == name) {
                    if claimed_sets.insert(pipeline_slot) {
                        rules.descriptor_sets.push(DescriptorSetBinding {
                            interface_slot,
                            pipeline_slot,
                        });
                    }
                }
            }

            rules.hash = if rules.loose.is_empty() && rules.descriptor_sets.is_empty() {
                0
            } else {
                let mut hasher = FnvHasher::default();
                group_index.hash(&mut hasher);
                rules.loose.hash(&mut hasher);
                rules.descriptor_sets.hash(&mut hasher);
                hasher.finish().max(1)
            };
        }

        BoundUniforms { groups }
    }

    /// Hash of the binding rules of a group. 0 if the group binds nothing.
    pub fn group_rules_hash(&self, group: usize) -> u64 {
        self.groups[group].hash
    }

    pub fn bound_loose_resources(&self, group: usize) -> &FixedBitSet {
        &self.groups[group].bound_resources
    }

    pub fn bound_loose_samplers(&self, group: usize) -> &FixedBitSet {
        &self.groups[group].bound_samplers
    }

    pub fn bound_loose_immediate_data(&self, group: usize) -> &FixedBitSet {
        &self.groups[group].bound_immediate_data
    }

    pub fn has_loose_uniforms(&self, group: usize) -> bool {
        !self.groups[group].loose.is_empty()
    }

    pub fn has_descriptor_sets(&self, group: usize) -> bool {
        !self.groups[group].descriptor_sets.is_empty()
    }

    /// Binds the descriptor sets of `group`. `sets` is indexed by interface slot.
    ///
    /// Returns the number of sets bound.
    pub fn apply_descriptor_sets(
        &self,
        encoder: &mut dyn GraphicsEncoder,
        group: usize,
        sets: &[Option<&Arc<DescriptorSet>>],
        dynamic_offsets: &[u32],
    ) -> usize {
        let mut count = 0;
        for b in self.groups[group].descriptor_sets.iter() {
            if let Some(Some(set)) = sets.get(b.interface_slot) {
                encoder.bind_descriptor_set(b.pipeline_slot, set, dynamic_offsets);
                count += 1;
            }
        }
        count
    }

    /// Translates the values of `stream` into pipeline slots and hands them to the encoder.
    pub fn apply_loose_uniforms(&self, encoder: &mut dyn GraphicsEncoder, group: usize, stream: &UniformsStream) {
        let mut uniforms: SmallVec<[LooseUniform; 16]> = SmallVec::new();
        for b in self.groups[group].loose.iter() {
            let slot = b.shader_slot;
            match b.kind {
                LooseUniformKind::ResourceView => {
                    if let Some(Some(view)) = stream.resource_views.get(b.interface_slot) {
                        uniforms.push(LooseUniform::ResourceView { slot, view });
                    }
                }
                LooseUniformKind::Sampler => {
                    if let Some(Some(sampler)) = stream.samplers.get(b.interface_slot) {
                        uniforms.push(LooseUniform::Sampler { slot, sampler });
                    }
                }
                LooseUniformKind::ImmediateData => {
                    if let Some(data) = stream.immediate_data.get(b.interface_slot) {
                        uniforms.push(LooseUniform::ImmediateData { slot, data });
                    }
                }
            }
        }
        if !uniforms.is_empty() {
            encoder.apply_loose_uniforms(&uniforms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_group_claims_binding() {
        let signature = PipelineSignature::new()
            .with_loose("LocalTransform", LooseUniformKind::ImmediateData, 3)
            .with_loose("Diffuse", LooseUniformKind::ResourceView, 0)
            .with_descriptor_set("Material", 1);

        let mut seq = UniformsStreamInterface::new();
        seq.bind_immediate_data(0, hash_name("LocalTransform"));
        let mut material = UniformsStreamInterface::new();
        material.bind_fixed_descriptor_set(0, hash_name("Material"));
        let mut draw = UniformsStreamInterface::new();
        draw.bind_immediate_data(0, hash_name("LocalTransform"));
        draw.bind_resource_view(1, hash_name("Diffuse"));
        let empty = UniformsStreamInterface::new();

        let bound = BoundUniforms::new(&signature, [&seq, &material, &draw, &empty]);
        assert!(bound.bound_loose_immediate_data(UNIFORM_GROUP_SEQUENCER).contains(0));
        assert!(!bound.bound_loose_immediate_data(UNIFORM_GROUP_DRAW).contains(0));
        assert!(bound.bound_loose_resources(UNIFORM_GROUP_DRAW).contains(1));
        assert!(bound.has_descriptor_sets(UNIFORM_GROUP_MATERIAL));
        assert_ne!(bound.group_rules_hash(UNIFORM_GROUP_SEQUENCER), 0);
        assert_eq!(bound.group_rules_hash(UNIFORM_GROUP_PER_DRAW), 0);
    }

    #[test]
    fn interface_hash() {
        let mut a = UniformsStreamInterface::new();
        assert_eq!(a.hash_value(), 0);
        a.bind_resource_view(0, hash_name("A"));
        let mut b = UniformsStreamInterface::new();
        b.bind_sampler(0, hash_name("A"));
        assert_ne!(a.hash_value(), b.hash_value());
        assert_ne!(a.hash_value(), 0);
    }
}
