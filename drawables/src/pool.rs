//! Pool of drawable packets, with deferred destruction of shared objects.
//!
//! # Markers and retirement
//!
//! `acquire` stamps each packet with the next packet marker. Packets can be released in any order;
//! the pool keeps the *retired* marker, the highest marker `R` such that all packets `<= R` have been
//! released, plus the set of markers released ahead of it.
//!
//! # Deferred destruction
//!
//! Objects referenced by packets (shared geometry, binding interfaces...) must outlive every packet
//! that might still point to them. `protected_destroy` tags an object with the highest marker issued
//! so far and destroys it when the retired marker reaches that tag. If no packet is outstanding,
//! the object is destroyed immediately.
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::PacketPoolCreateInfo;
use crate::marker::PacketMarker;
use crate::packet::{DrawablesPacket, PacketStorage};

type Destructor = Box<dyn FnOnce() + Send>;

struct PendingDestroy {
    marker: u64,
    destructor: Destructor,
}

struct PoolState {
    free_list: Vec<PacketStorage>,
    issued: u64,
    retired: u64,
    /// Markers released before all lower markers were.
    released_ahead: BTreeSet<u64>,
    /// Ordered by marker since markers only grow.
    pending_destroy: VecDeque<PendingDestroy>,
}

pub(crate) struct PoolShared {
    create_info: PacketPoolCreateInfo,
    state: Mutex<PoolState>,
}

/// Snapshot of the state of a pool.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PacketPoolStats {
    pub highest_issued: PacketMarker,
    pub retired: PacketMarker,
    pub outstanding: usize,
    pub free_packets: usize,
    pub pending_destroy: usize,
}

impl PoolShared {
    /// Releases `marker`. Destructors that became eligible run after the lock is released.
    pub(crate) fn retire(&self, marker: PacketMarker, storage: Option<PacketStorage>) {
        let _span = trace_span!("retire_packet").entered();
        let marker = marker.value();

        let expired: Vec<Destructor> = {
            let mut state = self.state.lock();
            assert!(
                marker > state.retired && marker <= state.issued,
                "packet marker #{} released twice or never issued (issued #{}, retired #{})",
                marker,
                state.issued,
                state.retired
            );
            if let Some(storage) = storage {
                state.free_list.push(storage);
            }

            if marker == state.retired + 1 {
                state.retired = marker;
                loop {
                    let next = state.retired + 1;
                    if !state.released_ahead.remove(&next) {
                        break;
                    }
                    state.retired = next;
                }
            } else {
                let inserted = state.released_ahead.insert(marker);
                assert!(inserted, "packet marker #{} released twice", marker);
            }
            trace!(marker, retired = state.retired, "packet released");

            let retired = state.retired;
            let mut expired = Vec::new();
            while state.pending_destroy.front().map_or(false, |p| p.marker <= retired) {
                if let Some(p) = state.pending_destroy.pop_front() {
                    expired.push(p.destructor);
                }
            }
            expired
        };

        if !expired.is_empty() {
            trace!(count = expired.len(), "running deferred destructors");
        }
        for destructor in expired {
            destructor();
        }
    }
}

/// Pool of drawable packets.
///
/// Cloning the pool returns another handle to the same pool.
#[derive(Clone)]
pub struct DrawablesPacketPool {
    shared: Arc<PoolShared>,
}

impl DrawablesPacketPool {
    pub fn new(create_info: PacketPoolCreateInfo) -> DrawablesPacketPool {
        let free_list = (0..create_info.initial_free_packets)
            .map(|_| PacketStorage::new(&create_info))
            .collect();
        DrawablesPacketPool {
            shared: Arc::new(PoolShared {
                create_info,
                state: Mutex::new(PoolState {
                    free_list,
                    issued: 0,
                    retired: 0,
                    released_ahead: BTreeSet::new(),
                    pending_destroy: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn create_info(&self) -> &PacketPoolCreateInfo {
        &self.shared.create_info
    }

    /// Returns an empty packet stamped with a new marker.
    pub fn acquire(&self) -> DrawablesPacket {
        let _span = trace_span!("acquire_packet").entered();
        let (storage, marker) = {
            let mut state = self.shared.state.lock();
            state.issued += 1;
            (state.free_list.pop(), PacketMarker::new(state.issued))
        };
        let storage = storage.unwrap_or_else(|| PacketStorage::new(&self.shared.create_info));
        trace!(?marker, "packet acquired");
        DrawablesPacket::from_pool(storage, marker, self.shared.clone())
    }

    /// Returns a packet to the pool. Equivalent to dropping it.
    pub fn release(&self, packet: DrawablesPacket) {
        drop(packet)
    }

    /// Destroys `object` once every packet acquired so far has been released.
    pub fn protected_destroy<T: Send + 'static>(&self, object: T) {
        self.protected_destroy_with(object, drop)
    }

    /// Like `protected_destroy`, but calls `destructor` on the object instead of dropping it.
    pub fn protected_destroy_with<T, F>(&self, object: T, destructor: F)
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.retired == state.issued {
            drop(state);
            destructor(object);
        } else {
            let marker = state.issued;
            trace!(marker, "deferred destruction");
            state.pending_destroy.push_back(PendingDestroy {
                marker,
                destructor: Box::new(move || destructor(object)),
            });
        }
    }

    pub fn highest_issued(&self) -> PacketMarker {
        PacketMarker::new(self.shared.state.lock().issued)
    }

    pub fn retired(&self) -> PacketMarker {
        PacketMarker::new(self.shared.state.lock().retired)
    }

    pub fn stats(&self) -> PacketPoolStats {
        let state = self.shared.state.lock();
        PacketPoolStats {
            highest_issued: PacketMarker::new(state.issued),
            retired: PacketMarker::new(state.retired),
            outstanding: (state.issued - state.retired) as usize - state.released_ahead.len(),
            free_packets: state.free_list.len(),
            pending_destroy: state.pending_destroy.len(),
        }
    }
}

impl std::fmt::Debug for DrawablesPacketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DrawablesPacketPool").field(&self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_release() {
        let pool = DrawablesPacketPool::new(PacketPoolCreateInfo::default());
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        drop(b);
        assert_eq!(pool.retired(), PacketMarker::new(0));
        drop(a);
        assert_eq!(pool.retired(), PacketMarker::new(2));
        drop(c);
        assert_eq!(pool.retired(), PacketMarker::new(3));
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free_packets, 3);
    }
}
