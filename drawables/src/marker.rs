//! Packet markers and visibility markers.
//!
//! # Packet markers
//!
//! Every packet acquired from a pool is stamped with a **packet marker**, a monotonically increasing
//! counter. Marker 0 is invalid, so the first packet gets marker 1. When packets are released, the pool
//! tracks the highest marker `R` such that every packet with a marker `<= R` has been released.
//! Objects scheduled for deferred destruction are tagged with the highest marker issued at the time,
//! and destroyed once `R` reaches that tag.
//!
//! # Visibility markers
//!
//! A **visibility marker** pairs two monotonic values: a pipeline-compile counter and a buffer-upload
//! counter. An accelerator result is usable only if the visibility marker passed to the lookup is
//! at least the one the result was published with. Visibility markers are partially ordered:
//! `a <= b` if both components of `a` are lower than or equal to those of `b`.
use std::cmp::Ordering;
use std::fmt;

/// Identifies a packet acquired from a pool.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct PacketMarker(u64);

impl PacketMarker {
    pub const INVALID: PacketMarker = PacketMarker(0);

    pub const fn new(value: u64) -> PacketMarker {
        PacketMarker(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Whether this marker was issued by a pool.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for PacketMarker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pipeline and upload progress required for an accelerator result to be visible.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct VisibilityMarker {
    pub pipeline: u64,
    pub upload: u64,
}

impl VisibilityMarker {
    pub const fn new() -> VisibilityMarker {
        VisibilityMarker { pipeline: 0, upload: 0 }
    }

    pub const fn from_parts(pipeline: u64, upload: u64) -> VisibilityMarker {
        VisibilityMarker { pipeline, upload }
    }

    pub fn join(&self, other: VisibilityMarker) -> VisibilityMarker {
        let mut r = *self;
        r.join_assign(other);
        r
    }

    pub fn join_assign(&mut self, other: VisibilityMarker) {
        self.pipeline = self.pipeline.max(other.pipeline);
        self.upload = self.upload.max(other.upload);
    }

    pub fn join_pipeline(&mut self, pipeline: u64) {
        self.pipeline = self.pipeline.max(pipeline);
    }

    pub fn join_upload(&mut self, upload: u64) {
        self.upload = self.upload.max(upload);
    }

    /// Whether a result published at `required` can be seen with this marker.
    pub fn sees(&self, required: VisibilityMarker) -> bool {
        *self >= required
    }
}

impl fmt::Debug for VisibilityMarker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{pipeline:{}, upload:{}}}", self.pipeline, self.upload)
    }
}

impl PartialOrd for VisibilityMarker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.pipeline.cmp(&other.pipeline), self.upload.cmp(&other.upload)) {
            (Ordering::Equal, o) | (o, Ordering::Equal) => Some(o),
            (a, b) if a == b => Some(a),
            _ => None,
        }
    }
}
