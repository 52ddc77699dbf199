use std::sync::Arc;

use crate::accelerator::DeformAcceleratorPool;
use crate::conduit::RepositionListener;
use crate::delegate::UniformDelegateManager;
use crate::device::{DescriptorSet, Device};
use crate::uniforms::UniformsStreamInterface;

/// State shared by all the packets drawn during a frame.
pub struct ParsingContext {
    device: Arc<dyn Device>,
    uniform_delegates: UniformDelegateManager,
    deform_accelerators: Option<Arc<dyn DeformAcceleratorPool>>,
    /// Interface of uniform group 3.
    per_draw_interface: Option<Arc<UniformsStreamInterface>>,
    /// Descriptor set bound next to the material set, under its name hash.
    extra_sequencer_descriptor_set: Option<(u64, Arc<DescriptorSet>)>,
    required_upload_marker: u64,
    frame_index: u64,
    reposition_listeners: Vec<Arc<dyn RepositionListener>>,
}

impl ParsingContext {
    pub fn new(device: Arc<dyn Device>) -> ParsingContext {
        ParsingContext {
            device,
            uniform_delegates: UniformDelegateManager::new(),
            deform_accelerators: None,
            per_draw_interface: None,
            extra_sequencer_descriptor_set: None,
            required_upload_marker: 0,
            frame_index: 0,
            reposition_listeners: vec![],
        }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn uniform_delegates(&self) -> &UniformDelegateManager {
        &self.uniform_delegates
    }

    pub fn uniform_delegates_mut(&mut self) -> &mut UniformDelegateManager {
        &mut self.uniform_delegates
    }

    pub fn set_deform_accelerators(&mut self, pool: Option<Arc<dyn DeformAcceleratorPool>>) {
        self.deform_accelerators = pool;
    }

    pub fn deform_accelerators(&self) -> Option<&Arc<dyn DeformAcceleratorPool>> {
        self.deform_accelerators.as_ref()
    }

    pub fn set_per_draw_interface(&mut self, interface: Option<Arc<UniformsStreamInterface>>) {
        self.per_draw_interface = interface;
    }

    pub fn per_draw_interface(&self) -> Option<&Arc<UniformsStreamInterface>> {
        self.per_draw_interface.as_ref()
    }

    pub fn set_extra_sequencer_descriptor_set(&mut self, set: Option<(u64, Arc<DescriptorSet>)>) {
        self.extra_sequencer_descriptor_set = set;
    }

    pub fn extra_sequencer_descriptor_set(&self) -> Option<&(u64, Arc<DescriptorSet>)> {
        self.extra_sequencer_descriptor_set.as_ref()
    }

    /// Raises the buffer-upload marker the frame must wait for before submission.
    pub fn require_upload_marker(&mut self, marker: u64) {
        self.required_upload_marker = self.required_upload_marker.max(marker);
    }

    pub fn required_upload_marker(&self) -> u64 {
        self.required_upload_marker
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Registers a listener notified at every frame barrier (e.g. a geometry conduit).
    pub fn add_reposition_listener(&mut self, listener: Arc<dyn RepositionListener>) {
        self.reposition_listeners.push(listener);
    }

    /// Ends the current frame: applies queued repositions and invalidates delegate uniforms.
    pub fn on_frame_barrier(&mut self) {
        let _span = trace_span!("frame_barrier", frame = self.frame_index).entered();
        for listener in self.reposition_listeners.iter() {
            listener.on_frame_barrier();
        }
        self.uniform_delegates.invalidate_uniforms();
        self.required_upload_marker = 0;
        self.frame_index += 1;
    }
}
