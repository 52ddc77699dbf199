//! Geometry descriptions referenced by drawables.
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fnv::FnvHasher;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;

use crate::accelerator::DeformAcceleratorId;
use crate::device::Resource;

/// Maximum number of vertex streams of a geometry.
pub const MAX_VERTEX_STREAMS: usize = 4;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    Unknown,
    R8G8B8A8Unorm,
    R16G16Float,
    R16G16B16A16Float,
    R32Float,
    R32G32Float,
    R32G32B32Float,
    R32G32B32A32Float,
    R16Uint,
    R32Uint,
}

impl Format {
    pub const fn size_bytes(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8G8B8A8Unorm => 4,
            Format::R16G16Float => 4,
            Format::R16G16B16A16Float => 8,
            Format::R32Float => 4,
            Format::R32G32Float => 8,
            Format::R32G32B32Float => 12,
            Format::R32G32B32A32Float => 16,
            Format::R16Uint => 2,
            Format::R32Uint => 4,
        }
    }

    pub const fn is_index_format(self) -> bool {
        matches!(self, Format::R16Uint | Format::R32Uint)
    }
}

/// Where the data of a stream comes from.
#[derive(Clone, Debug)]
pub enum StreamSource {
    /// A persistent buffer.
    Resource(Arc<Resource>),
    /// The packet's vertex (or index) storage, uploaded before drawing.
    Packet,
    /// The output of a deform accelerator.
    Deform(DeformAcceleratorId),
}

#[derive(Clone, Debug)]
pub struct VertexStream {
    pub source: StreamSource,
    /// Byte offset into the source.
    pub offset: u32,
}

#[derive(Clone, Debug)]
pub struct IndexStream {
    pub source: StreamSource,
    pub format: Format,
    pub offset: u32,
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct GeoFlags: u32 {
        /// Lives in a packet and dies with it.
        const TEMPORARY = 1 << 0;
    }
}

/// Vertex streams and optional index stream used by a drawable.
#[derive(Clone, Debug, Default)]
pub struct DrawableGeo {
    vertex_streams: SmallVec<[VertexStream; MAX_VERTEX_STREAMS]>,
    index_stream: Option<IndexStream>,
    pub flags: GeoFlags,
}

impl DrawableGeo {
    pub fn new() -> DrawableGeo {
        DrawableGeo::default()
    }

    pub fn add_vertex_stream(&mut self, source: StreamSource, offset: u32) -> &mut Self {
        assert!(
            self.vertex_streams.len() < MAX_VERTEX_STREAMS,
            "too many vertex streams (max {})",
            MAX_VERTEX_STREAMS
        );
        self.vertex_streams.push(VertexStream { source, offset });
        self
    }

    pub fn set_index_stream(&mut self, source: StreamSource, format: Format, offset: u32) -> &mut Self {
        assert!(format.is_index_format(), "invalid index format {:?}", format);
        assert!(
            !matches!(source, StreamSource::Deform(_)),
            "index streams cannot come from a deform accelerator"
        );
        self.index_stream = Some(IndexStream { source, format, offset });
        self
    }

    pub fn vertex_streams(&self) -> &[VertexStream] {
        &self.vertex_streams
    }

    pub fn vertex_stream_mut(&mut self, index: usize) -> &mut VertexStream {
        &mut self.vertex_streams[index]
    }

    pub fn index_stream(&self) -> Option<&IndexStream> {
        self.index_stream.as_ref()
    }

    pub fn index_stream_mut(&mut self) -> Option<&mut IndexStream> {
        self.index_stream.as_mut()
    }
}

/// Geometry shared between packets and kept alive by reference counting.
///
/// The streams sit behind a lock because a `RepositionableGeometryConduit` may rewrite
/// their buffers and offsets between frames.
#[derive(Clone, Debug)]
pub struct SharedGeo(Arc<RwLock<DrawableGeo>>);

impl SharedGeo {
    pub fn new(geo: DrawableGeo) -> SharedGeo {
        SharedGeo(Arc::new(RwLock::new(geo)))
    }

    pub fn read(&self) -> RwLockReadGuard<DrawableGeo> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<DrawableGeo> {
        self.0.write()
    }

    pub fn ptr_eq(&self, other: &SharedGeo) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    TriangleList,
    TriangleStrip,
}

/// One vertex attribute.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct InputElementDesc {
    pub semantic: String,
    pub semantic_index: u32,
    pub format: Format,
    pub input_slot: u32,
    /// `None` places the element right after the previous one in the same slot.
    pub aligned_byte_offset: Option<u32>,
}

/// Vertex layout and topology of a drawable, hashed for pipeline lookups.
#[derive(Clone, Debug)]
pub struct DrawableInputAssembly {
    elements: Vec<InputElementDesc>,
    strides: SmallVec<[u32; MAX_VERTEX_STREAMS]>,
    topology: PrimitiveTopology,
    hash: u64,
}

impl DrawableInputAssembly {
    pub fn new(mut elements: Vec<InputElementDesc>, topology: PrimitiveTopology) -> DrawableInputAssembly {
        let mut strides: SmallVec<[u32; MAX_VERTEX_STREAMS]> = SmallVec::new();
        for e in elements.iter_mut() {
            let slot = e.input_slot as usize;
            assert!(slot < MAX_VERTEX_STREAMS, "input slot {} out of range", slot);
            if strides.len() <= slot {
                strides.resize(slot + 1, 0);
            }
            let offset = e.aligned_byte_offset.unwrap_or(strides[slot]);
            e.aligned_byte_offset = Some(offset);
            strides[slot] = strides[slot].max(offset + e.format.size_bytes());
        }

        let mut hasher = FnvHasher::default();
        elements.hash(&mut hasher);
        topology.hash(&mut hasher);

        DrawableInputAssembly {
            elements,
            strides,
            topology,
            hash: hasher.finish(),
        }
    }

    pub fn elements(&self) -> &[InputElementDesc] {
        &self.elements
    }

    pub fn strides(&self) -> &[u32] {
        &self.strides
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}
