//! Keeps shared geometry pointing at the right buffer ranges while a buffer-upload subsystem
//! defragments its vertex and index heaps.
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ConduitCreateInfo;
use crate::device::Resource;
use crate::geo::{SharedGeo, StreamSource};

/// Moves the bytes `[source_start, source_end)` of a buffer to `destination` in another (or the same) buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RepositionStep {
    pub source_start: u64,
    pub source_end: u64,
    pub destination: u64,
}

/// A batch of moves from `source` to `destination`.
#[derive(Clone, Debug)]
pub struct RepositionEvent {
    pub source: Arc<Resource>,
    pub destination: Arc<Resource>,
    pub steps: Vec<RepositionStep>,
}

/// Which stream of a geometry a range belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum GeoStream {
    Vertex(usize),
    Index,
}

/// Receives reposition events from a buffer-upload subsystem.
pub trait RepositionListener: Send + Sync {
    /// Called on the defragmentation tick, possibly from a background thread.
    fn on_reposition(&self, events: Vec<RepositionEvent>);
    /// Called at the frame barrier, before any packet of the next frame is drawn.
    fn on_frame_barrier(&self);
}

fn resource_key(resource: &Arc<Resource>) -> usize {
    Arc::as_ptr(resource) as usize
}

struct AttachedRange {
    resource: usize,
    begin: u64,
    end: u64,
    geo: SharedGeo,
    stream: GeoStream,
}

#[derive(Default)]
struct ConduitState {
    /// Sorted by `(resource, begin)`.
    attached: Vec<AttachedRange>,
    queued: Vec<RepositionEvent>,
}

impl ConduitState {
    fn insert(&mut self, range: AttachedRange) {
        let at = self
            .attached
            .partition_point(|r| (r.resource, r.begin) < (range.resource, range.begin));
        self.attached.insert(at, range);
    }
}

/// Tracks the buffer ranges used by shared geometry and rewrites the geometry when those ranges move.
pub struct RepositionableGeometryConduit {
    name: String,
    state: Mutex<ConduitState>,
}

impl RepositionableGeometryConduit {
    pub fn new(create_info: ConduitCreateInfo) -> RepositionableGeometryConduit {
        RepositionableGeometryConduit {
            name: create_info.name,
            state: Mutex::new(ConduitState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `size` bytes of a stream of `geo` for repositioning.
    ///
    /// # Panics
    ///
    /// If the stream doesn't exist or is not backed by a persistent resource.
    pub fn attach(&self, geo: &SharedGeo, stream: GeoStream, size: u64) {
        let (resource, begin) = {
            let g = geo.read();
            let (source, offset) = match stream {
                GeoStream::Vertex(i) => {
                    let s = &g.vertex_streams()[i];
                    (&s.source, s.offset)
                }
                GeoStream::Index => match g.index_stream() {
                    Some(s) => (&s.source, s.offset),
                    None => panic!("geometry has no index stream"),
                },
            };
            match source {
                StreamSource::Resource(r) => (resource_key(r), offset as u64),
                _ => panic!("only streams backed by a resource can be repositioned"),
            }
        };
        trace!(conduit = self.name.as_str(), ?stream, begin, size, "attach");
        self.state.lock().insert(AttachedRange {
            resource,
            begin,
            end: begin + size,
            geo: geo.clone(),
            stream,
        });
    }

    /// Forgets every range of `geo`.
    pub fn detach(&self, geo: &SharedGeo) {
        self.state.lock().attached.retain(|r| !r.geo.ptr_eq(geo));
    }

    pub fn attached_count(&self) -> usize {
        self.state.lock().attached.len()
    }

    /// Queues events to be applied at the next frame barrier.
    pub fn queue_repositions(&self, events: Vec<RepositionEvent>) {
        self.state.lock().queued.extend(events);
    }

    /// Applies the queued events. Returns the number of ranges moved.
    pub fn apply_repositions(&self) -> usize {
        let _span = trace_span!("apply_repositions", conduit = self.name.as_str()).entered();
        let mut state = self.state.lock();
        let events = std::mem::take(&mut state.queued);
        events.iter().map(|e| Self::apply_event(&mut state, e)).sum()
    }

    /// Applies an event right away. Returns the number of ranges moved.
    pub fn apply_reposition_event(&self, event: &RepositionEvent) -> usize {
        let mut state = self.state.lock();
        Self::apply_event(&mut state, event)
    }

    fn apply_event(state: &mut ConduitState, event: &RepositionEvent) -> usize {
        let source = resource_key(&event.source);
        let destination = resource_key(&event.destination);
        let mut moved = Vec::new();

        for step in event.steps.iter() {
            let start = state
                .attached
                .partition_point(|r| (r.resource, r.begin) < (source, step.source_start));
            if let Some(prev) = start.checked_sub(1).map(|i| &state.attached[i]) {
                assert!(
                    prev.resource != source || prev.end <= step.source_start,
                    "attached range [{}, {}) straddles the start of moved range [{}, {})",
                    prev.begin,
                    prev.end,
                    step.source_start,
                    step.source_end
                );
            }
            let mut end = start;
            while end < state.attached.len()
                && state.attached[end].resource == source
                && state.attached[end].begin < step.source_end
            {
                let r = &state.attached[end];
                assert!(
                    r.end <= step.source_end,
                    "attached range [{}, {}) straddles the end of moved range [{}, {})",
                    r.begin,
                    r.end,
                    step.source_start,
                    step.source_end
                );
                end += 1;
            }

            for mut r in state.attached.drain(start..end) {
                let new_begin = r.begin - step.source_start + step.destination;
                let new_offset = match u32::try_from(new_begin) {
                    Ok(offset) => offset,
                    Err(_) => panic!("repositioned stream offset {} does not fit in 32 bits", new_begin),
                };
                {
                    let mut geo = r.geo.write();
                    let (stream_source, stream_offset) = match r.stream {
                        GeoStream::Vertex(i) => {
                            let s = geo.vertex_stream_mut(i);
                            (&mut s.source, &mut s.offset)
                        }
                        GeoStream::Index => match geo.index_stream_mut() {
                            Some(s) => (&mut s.source, &mut s.offset),
                            None => panic!("attached index stream was removed"),
                        },
                    };
                    // replacing the Arc moves the reference from the old buffer to the new one
                    *stream_source = StreamSource::Resource(event.destination.clone());
                    *stream_offset = new_offset;
                }
                r.end = new_begin + (r.end - r.begin);
                r.begin = new_begin;
                r.resource = destination;
                moved.push(r);
            }
        }

        let count = moved.len();
        for r in moved {
            state.insert(r);
        }
        trace!(count, "ranges repositioned");
        count
    }
}

impl RepositionListener for RepositionableGeometryConduit {
    fn on_reposition(&self, events: Vec<RepositionEvent>) {
        self.queue_repositions(events);
    }

    fn on_frame_barrier(&self) {
        self.apply_repositions();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BindFlags, ResourceDesc};
    use crate::geo::DrawableGeo;

    fn buffer(handle: u64) -> Arc<Resource> {
        Arc::new(Resource {
            handle,
            desc: ResourceDesc {
                name: format!("buffer {}", handle),
                bind_flags: BindFlags::VERTEX_BUFFER,
                size: 4096,
            },
        })
    }

    #[test]
    fn ranges_are_sorted() {
        let conduit = RepositionableGeometryConduit::new(ConduitCreateInfo::default());
        let buf = buffer(1);
        for offset in [300u32, 100, 200] {
            let mut geo = DrawableGeo::new();
            geo.add_vertex_stream(StreamSource::Resource(buf.clone()), offset);
            conduit.attach(&SharedGeo::new(geo), GeoStream::Vertex(0), 50);
        }
        let state = conduit.state.lock();
        let begins: Vec<_> = state.attached.iter().map(|r| r.begin).collect();
        assert_eq!(begins, vec![100, 200, 300]);
    }
}
