//! Creation parameters and per-call options.
use std::time::Duration;

use crate::arena::StorageKind;

/// Default cap on the size of any single storage arena of a packet.
pub const DEFAULT_MAX_STORAGE_SIZE: usize = 10 * 1024 * 1024;

/// Parameters of a `DrawablesPacketPool`.
#[derive(Clone, Debug)]
pub struct PacketPoolCreateInfo {
    /// Alignment of allocations for each storage kind, indexed by `StorageKind::index`.
    ///
    /// 0 and 1 both mean "no alignment".
    pub storage_alignment: [u32; StorageKind::COUNT],
    /// Initial page size of the freeform CPU storage.
    pub freeform_page_size: usize,
    /// Maximum size of each contiguous storage arena. Exceeding it is a programming error.
    pub max_storage_size: usize,
    /// Number of packets allocated up-front in the free list.
    pub initial_free_packets: usize,
}

impl Default for PacketPoolCreateInfo {
    fn default() -> Self {
        PacketPoolCreateInfo {
            storage_alignment: [16, 4, 256, 16],
            freeform_page_size: 64 * 1024,
            max_storage_size: DEFAULT_MAX_STORAGE_SIZE,
            initial_free_packets: 0,
        }
    }
}

impl PacketPoolCreateInfo {
    pub fn alignment(&self, kind: StorageKind) -> usize {
        self.storage_alignment[kind.index()].max(1) as usize
    }
}

/// Options of a single draw call.
#[derive(Copy, Clone, Debug, Default)]
pub struct DrawOptions {
    /// Block on readiness handles of pipelines and descriptor sets that are not yet visible,
    /// instead of skipping their records.
    pub stall_for_resources: bool,
}

/// Options of `PendingResources::poll`.
#[derive(Copy, Clone, Debug)]
pub struct PrepareOptions {
    /// Time budget shared by all handles polled in one step.
    pub poll_budget: Duration,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        PrepareOptions {
            poll_budget: Duration::from_millis(2),
        }
    }
}

/// Parameters of a `RepositionableGeometryConduit`.
#[derive(Clone, Debug, Default)]
pub struct ConduitCreateInfo {
    /// Debug name used in log output.
    pub name: String,
}
