//! Aggregation of the readiness of every resource referenced by a packet.
use std::time::{Duration, Instant};

use fnv::FnvHashSet;

use crate::accelerator::{DescriptorSetAcceleratorId, PipelineAcceleratorId, PipelineAcceleratorPool, SequencerConfig};
use crate::config::PrepareOptions;
use crate::error::AssetError;
use crate::marker::VisibilityMarker;
use crate::packet::DrawablesPacket;
use crate::readiness::{PollStatus, Readiness};

/// Outcome of `prepare_resources`.
#[derive(Debug)]
pub enum PreparedResources {
    /// Everything resolved on the first pass. The marker is the one to draw with.
    Ready(VisibilityMarker),
    /// Some handles are pending. Poll until `PollStatus::Finished`, then read `visibility`.
    Pending(PendingResources),
}

impl PreparedResources {
    pub fn is_ready(&self) -> bool {
        matches!(self, PreparedResources::Ready(_))
    }

    /// Runs one polling step. Collapses to `Ready` once every handle resolved.
    pub fn poll(&mut self, budget: Duration) -> PollStatus {
        match self {
            PreparedResources::Ready(_) => PollStatus::Finished,
            PreparedResources::Pending(pending) => {
                let status = pending.poll(budget);
                if status == PollStatus::Finished {
                    let visibility = pending.visibility;
                    *self = PreparedResources::Ready(visibility);
                }
                status
            }
        }
    }

    /// The combined visibility marker, once every handle resolved.
    pub fn visibility(&self) -> Option<VisibilityMarker> {
        match self {
            PreparedResources::Ready(marker) => Some(*marker),
            PreparedResources::Pending(_) => None,
        }
    }

    /// Polls until every handle resolved, one budget at a time.
    pub fn wait(mut self, options: &PrepareOptions) -> VisibilityMarker {
        loop {
            if let PreparedResources::Ready(marker) = self {
                return marker;
            }
            self.poll(options.poll_budget);
        }
    }
}

/// Readiness handles that did not resolve on the first pass.
pub struct PendingResources {
    pipelines: Vec<(PipelineAcceleratorId, Readiness<u64>)>,
    descriptor_sets: Vec<(DescriptorSetAcceleratorId, Readiness<VisibilityMarker>)>,
    visibility: VisibilityMarker,
}

fn fold_pipeline(visibility: &mut VisibilityMarker, id: PipelineAcceleratorId, result: Result<u64, AssetError>) {
    match result {
        Ok(pipeline) => visibility.join_pipeline(pipeline),
        Err(err) => warn!(?id, %err, "pipeline accelerator failed to become ready"),
    }
}

fn fold_descriptor_set(
    visibility: &mut VisibilityMarker,
    id: DescriptorSetAcceleratorId,
    result: Result<VisibilityMarker, AssetError>,
) {
    match result {
        Ok(marker) => visibility.join_assign(marker),
        Err(err) => warn!(?id, %err, "descriptor set accelerator failed to become ready"),
    }
}

impl PendingResources {
    /// Polls every pending handle within a shared time budget.
    pub fn poll(&mut self, budget: Duration) -> PollStatus {
        let _span = trace_span!("poll_pending_resources").entered();
        let deadline = Instant::now() + budget;
        let visibility = &mut self.visibility;

        self.pipelines.retain_mut(|(id, readiness)| {
            let timeout = deadline.saturating_duration_since(Instant::now());
            if readiness.poll(timeout) == PollStatus::Continue {
                return true;
            }
            if let Some(Ok(value)) = readiness.result() {
                trace!(?id, value, "pipeline ready");
            }
            if let Readiness::Ready(result) = std::mem::replace(readiness, Readiness::failed(AssetError::Abandoned)) {
                fold_pipeline(visibility, *id, result);
            }
            false
        });

        self.descriptor_sets.retain_mut(|(id, readiness)| {
            let timeout = deadline.saturating_duration_since(Instant::now());
            if readiness.poll(timeout) == PollStatus::Continue {
                return true;
            }
            if let Readiness::Ready(result) = std::mem::replace(readiness, Readiness::failed(AssetError::Abandoned)) {
                fold_descriptor_set(visibility, *id, result);
            }
            false
        });

        if self.pipelines.is_empty() && self.descriptor_sets.is_empty() {
            PollStatus::Finished
        } else {
            PollStatus::Continue
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pipelines.len() + self.descriptor_sets.len()
    }

    /// The marker combined from the handles resolved so far.
    pub fn visibility_so_far(&self) -> VisibilityMarker {
        self.visibility
    }
}

impl std::fmt::Debug for PendingResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResources")
            .field("pipelines", &self.pipelines.len())
            .field("descriptor_sets", &self.descriptor_sets.len())
            .field("visibility", &self.visibility)
            .finish()
    }
}

/// Collects the readiness of every distinct pipeline and descriptor set accelerator used by `packet`.
///
/// Handles that are already resolved are folded into the result immediately. Failed handles are
/// logged and contribute nothing.
pub fn prepare_resources(
    pipeline_accelerators: &dyn PipelineAcceleratorPool,
    sequencer: &SequencerConfig,
    packet: &DrawablesPacket,
) -> PreparedResources {
    let _span = trace_span!("prepare_resources", drawables = packet.len()).entered();

    let mut pipeline_ids = FnvHashSet::default();
    let mut descriptor_set_ids = FnvHashSet::default();
    for d in packet.drawables() {
        pipeline_ids.insert(d.pipeline);
        descriptor_set_ids.extend(d.descriptor_set);
    }

    let mut visibility = VisibilityMarker::new();
    let mut pipelines = Vec::new();
    let mut descriptor_sets = Vec::new();

    for id in pipeline_ids {
        let mut readiness = pipeline_accelerators.pipeline_readiness(id, sequencer);
        if readiness.poll(Duration::ZERO) == PollStatus::Continue {
            pipelines.push((id, readiness));
        } else if let Some(result) = readiness.into_result() {
            fold_pipeline(&mut visibility, id, result);
        }
    }

    for id in descriptor_set_ids {
        let mut readiness = pipeline_accelerators.descriptor_set_readiness(id);
        if readiness.poll(Duration::ZERO) == PollStatus::Continue {
            descriptor_sets.push((id, readiness));
        } else if let Some(result) = readiness.into_result() {
            fold_descriptor_set(&mut visibility, id, result);
        }
    }

    if pipelines.is_empty() && descriptor_sets.is_empty() {
        trace!(?visibility, "resources ready");
        PreparedResources::Ready(visibility)
    } else {
        trace!(
            pipelines = pipelines.len(),
            descriptor_sets = descriptor_sets.len(),
            "resources pending"
        );
        PreparedResources::Pending(PendingResources {
            pipelines,
            descriptor_sets,
            visibility,
        })
    }
}
