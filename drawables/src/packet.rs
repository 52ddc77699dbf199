//! Drawable packets: per-frame batches of draw records and their transient storage.
use std::sync::Arc;

use crate::accelerator::{DescriptorSetAcceleratorId, PipelineAcceleratorId};
use crate::arena::{ByteArena, FreeformStorage, HeapIndex, ObjectHeap, StorageKind};
use crate::config::PacketPoolCreateInfo;
use crate::draw::ExecuteDrawableContext;
use crate::error::DrawError;
use crate::geo::{DrawableGeo, GeoFlags, SharedGeo};
use crate::marker::PacketMarker;
use crate::pool::PoolShared;
use crate::uniforms::UniformsStreamInterface;

/// Emits the draw commands of a drawable once the draw loop has bound its state.
pub type ExecuteDrawableFn = fn(&mut ExecuteDrawableContext, &Drawable) -> Result<(), DrawError>;

/// Parameters forwarded to the execute function.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DrawParams {
    pub vertex_count: u32,
    pub index_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_index: u32,
}

/// A range of a packet storage arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StorageRange {
    pub kind: StorageKind,
    pub offset: u32,
    pub size: u32,
}

/// Geometry with a lifetime of its own (`Shared`) or owned by the packet (`Local`).
#[derive(Clone, Debug)]
pub enum GeoRef {
    Shared(SharedGeo),
    Local(LocalGeoId),
}

/// Index of a temporary geometry in the packet that created it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LocalGeoId(HeapIndex);

/// A draw record.
#[derive(Clone)]
pub struct Drawable {
    pub pipeline: PipelineAcceleratorId,
    pub descriptor_set: Option<DescriptorSetAcceleratorId>,
    pub geo: Option<GeoRef>,
    /// Loose uniforms applied by the execute function (uniform group 2).
    pub loose_uniforms_interface: Option<Arc<UniformsStreamInterface>>,
    /// Immediate data for the loose uniforms, usually in `StorageKind::Uniform` storage.
    pub loose_uniforms: Option<StorageRange>,
    /// Instance index passed to the deform accelerator bound by the descriptor set.
    pub deform_instance: u32,
    pub params: DrawParams,
    pub draw_fn: ExecuteDrawableFn,
}

impl Drawable {
    pub fn new(pipeline: PipelineAcceleratorId, draw_fn: ExecuteDrawableFn) -> Drawable {
        Drawable {
            pipeline,
            descriptor_set: None,
            geo: None,
            loose_uniforms_interface: None,
            loose_uniforms: None,
            deform_instance: 0,
            params: DrawParams::default(),
            draw_fn,
        }
    }

    pub fn with_descriptor_set(mut self, descriptor_set: DescriptorSetAcceleratorId) -> Self {
        self.descriptor_set = Some(descriptor_set);
        self
    }

    pub fn with_geo(mut self, geo: GeoRef) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_loose_uniforms(mut self, interface: Arc<UniformsStreamInterface>, data: Option<StorageRange>) -> Self {
        self.loose_uniforms_interface = Some(interface);
        self.loose_uniforms = data;
        self
    }

    pub fn with_params(mut self, params: DrawParams) -> Self {
        self.params = params;
        self
    }
}

impl std::fmt::Debug for Drawable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drawable")
            .field("pipeline", &self.pipeline)
            .field("descriptor_set", &self.descriptor_set)
            .field("geo", &self.geo)
            .field("loose_uniforms", &self.loose_uniforms)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Storage of a packet, kept in the pool's free list between uses.
pub(crate) struct PacketStorage {
    drawables: Vec<Drawable>,
    arenas: [ByteArena; 3],
    freeform: FreeformStorage,
    freeform_alignment: usize,
    geos: ObjectHeap<DrawableGeo>,
}

const GEO_PAGE_LEN: usize = 64;

impl PacketStorage {
    pub(crate) fn new(create_info: &PacketPoolCreateInfo) -> PacketStorage {
        let arena = |kind| ByteArena::new(create_info.alignment(kind), create_info.max_storage_size);
        PacketStorage {
            drawables: Vec::new(),
            arenas: [
                arena(StorageKind::Vertex),
                arena(StorageKind::Index),
                arena(StorageKind::Uniform),
            ],
            freeform: FreeformStorage::new(create_info.freeform_page_size, create_info.max_storage_size),
            freeform_alignment: create_info.alignment(StorageKind::FreeformCpu),
            geos: ObjectHeap::new(GEO_PAGE_LEN),
        }
    }

    fn empty() -> PacketStorage {
        PacketStorage {
            drawables: Vec::new(),
            arenas: [ByteArena::new(1, 0), ByteArena::new(1, 0), ByteArena::new(1, 0)],
            freeform: FreeformStorage::new(0, 0),
            freeform_alignment: 1,
            geos: ObjectHeap::new(1),
        }
    }

    pub(crate) fn reset(&mut self) {
        // drawables first: they may reference geometry
        self.drawables.clear();
        self.geos.reset();
        for arena in self.arenas.iter_mut() {
            arena.reset();
        }
        self.freeform.reset();
    }
}

/// Result of `DrawablesPacket::allocate_storage`.
#[derive(Debug)]
pub struct AllocateStorageResult<'a> {
    pub data: &'a mut [u8],
    pub start_offset: u32,
}

/// A batch of draw records for one frame, with the transient storage they reference.
///
/// Packets acquired from a `DrawablesPacketPool` go back to the pool when dropped, which
/// retires their marker.
pub struct DrawablesPacket {
    storage: PacketStorage,
    marker: PacketMarker,
    pool: Option<Arc<PoolShared>>,
}

impl DrawablesPacket {
    /// Creates a packet that does not belong to any pool.
    pub fn new(create_info: &PacketPoolCreateInfo) -> DrawablesPacket {
        DrawablesPacket {
            storage: PacketStorage::new(create_info),
            marker: PacketMarker::INVALID,
            pool: None,
        }
    }

    pub(crate) fn from_pool(storage: PacketStorage, marker: PacketMarker, pool: Arc<PoolShared>) -> DrawablesPacket {
        DrawablesPacket {
            storage,
            marker,
            pool: Some(pool),
        }
    }

    pub fn marker(&self) -> PacketMarker {
        self.marker
    }

    pub fn push(&mut self, drawable: Drawable) {
        self.storage.drawables.push(drawable);
    }

    pub fn drawables(&self) -> &[Drawable] {
        &self.storage.drawables
    }

    pub fn len(&self) -> usize {
        self.storage.drawables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.drawables.is_empty()
    }

    /// Appends `size` zeroed bytes to the storage of the given kind.
    ///
    /// `start_offset` is aligned to the pool's alignment for `kind`. For `FreeformCpu` the offset is
    /// only informative; use `allocate_freeform` to keep the slice around.
    pub fn allocate_storage(&mut self, kind: StorageKind, size: usize) -> AllocateStorageResult {
        let (data, start_offset) = match kind {
            StorageKind::FreeformCpu => self.storage.freeform.allocate(size, self.storage.freeform_alignment),
            _ => self.storage.arenas[kind.index()].allocate(size),
        };
        AllocateStorageResult {
            data,
            start_offset: start_offset as u32,
        }
    }

    /// Allocates CPU memory that stays at the same address until the packet is reset.
    pub fn allocate_freeform(&self, size: usize, alignment: usize) -> &mut [u8] {
        self.storage.freeform.allocate(size, alignment).0
    }

    /// Copies `data` into the storage of the given kind.
    pub fn write_storage<T: bytemuck::Pod>(&mut self, kind: StorageKind, data: &[T]) -> StorageRange {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let r = self.allocate_storage(kind, bytes.len());
        r.data.copy_from_slice(bytes);
        StorageRange {
            kind,
            offset: r.start_offset,
            size: bytes.len() as u32,
        }
    }

    /// Contents of a contiguous storage arena.
    ///
    /// # Panics
    ///
    /// If `kind` is `FreeformCpu`, which is not contiguous.
    pub fn storage(&self, kind: StorageKind) -> &[u8] {
        assert_ne!(kind, StorageKind::FreeformCpu, "freeform storage is not contiguous");
        self.storage.arenas[kind.index()].as_bytes()
    }

    pub fn storage_range(&self, range: StorageRange) -> &[u8] {
        let start = range.offset as usize;
        &self.storage(range.kind)[start..start + range.size as usize]
    }

    pub fn storage_len(&self, kind: StorageKind) -> usize {
        match kind {
            StorageKind::FreeformCpu => self.storage.freeform.len(),
            _ => self.storage.arenas[kind.index()].len(),
        }
    }

    /// Creates a geometry that lives as long as the packet contents.
    pub fn create_temporary_geo(&mut self) -> (LocalGeoId, &mut DrawableGeo) {
        let mut geo = DrawableGeo::new();
        geo.flags |= GeoFlags::TEMPORARY;
        let index = self.storage.geos.push(geo);
        (LocalGeoId(index), self.storage.geos.get_mut(index))
    }

    pub fn geo(&self, id: LocalGeoId) -> &DrawableGeo {
        self.storage.geos.get(id.0)
    }

    /// Drops every record and empties every storage, keeping allocations for reuse.
    pub fn reset(&mut self) {
        self.storage.reset();
    }
}

impl Drop for DrawablesPacket {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let mut storage = std::mem::replace(&mut self.storage, PacketStorage::empty());
            storage.reset();
            pool.retire(self.marker, Some(storage));
        }
    }
}

impl std::fmt::Debug for DrawablesPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawablesPacket")
            .field("marker", &self.marker)
            .field("drawables", &self.storage.drawables.len())
            .finish()
    }
}
