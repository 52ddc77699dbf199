//! Per-packet storage arenas.
use std::alloc::Layout;
use std::cell::Cell;

use bumpalo::Bump;

/// Kinds of per-packet storage.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StorageKind {
    /// Vertex data, uploaded to a temporary vertex buffer before drawing.
    Vertex,
    /// Index data, uploaded to a temporary index buffer before drawing.
    Index,
    /// Uniform data, uploaded to a temporary constant buffer before drawing.
    Uniform,
    /// CPU-only storage with stable addresses. Never uploaded.
    FreeformCpu,
}

impl StorageKind {
    pub const COUNT: usize = 4;
    pub const ALL: [StorageKind; StorageKind::COUNT] = [
        StorageKind::Vertex,
        StorageKind::Index,
        StorageKind::Uniform,
        StorageKind::FreeformCpu,
    ];

    pub const fn index(self) -> usize {
        match self {
            StorageKind::Vertex => 0,
            StorageKind::Index => 1,
            StorageKind::Uniform => 2,
            StorageKind::FreeformCpu => 3,
        }
    }
}

pub(crate) fn align_up(offset: usize, alignment: usize) -> usize {
    let alignment = alignment.max(1);
    (offset + alignment - 1) / alignment * alignment
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Contiguous growable byte buffer with aligned append.
///
/// Offsets returned by `allocate` are relative to the start of the arena, so that the whole
/// arena can be uploaded as a single buffer and addressed with those offsets.
#[derive(Debug)]
pub struct ByteArena {
    data: Vec<u8>,
    alignment: usize,
    max_size: usize,
}

impl ByteArena {
    pub fn new(alignment: usize, max_size: usize) -> ByteArena {
        ByteArena {
            data: Vec::new(),
            alignment: alignment.max(1),
            max_size,
        }
    }

    /// Appends `size` zeroed bytes, preceded by padding so that the returned offset is aligned.
    ///
    /// # Panics
    ///
    /// If the arena would grow beyond its maximum size.
    pub fn allocate(&mut self, size: usize) -> (&mut [u8], usize) {
        let start = align_up(self.data.len(), self.alignment);
        let end = start + size;
        assert!(
            end <= self.max_size,
            "storage arena overflow: {} bytes requested, {} already used, limit is {}",
            size,
            self.data.len(),
            self.max_size
        );
        self.data.resize(end, 0);
        (&mut self.data[start..end], start)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Empties the arena, keeping its allocation.
    pub fn reset(&mut self) {
        self.data.clear();
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// CPU-only storage whose allocations never move.
///
/// Backed by a bump allocator: memory is obtained in pages and never relocated, so references
/// handed out stay valid until the next `reset`.
pub struct FreeformStorage {
    bump: Bump,
    used: Cell<usize>,
    max_size: usize,
}

impl FreeformStorage {
    pub fn new(page_size: usize, max_size: usize) -> FreeformStorage {
        FreeformStorage {
            bump: Bump::with_capacity(page_size),
            used: Cell::new(0),
            max_size,
        }
    }

    /// Allocates `size` zeroed bytes aligned to `alignment`.
    ///
    /// Returns the slice and the logical start offset, which is the number of bytes
    /// allocated before this one (padding included).
    pub fn allocate(&self, size: usize, alignment: usize) -> (&mut [u8], usize) {
        let alignment = alignment.max(1).next_power_of_two();
        let start = align_up(self.used.get(), alignment);
        assert!(
            start + size <= self.max_size,
            "freeform storage overflow: {} bytes requested, limit is {}",
            size,
            self.max_size
        );
        self.used.set(start + size);
        let layout = match Layout::from_size_align(size, alignment) {
            Ok(layout) => layout,
            Err(err) => panic!("invalid freeform allocation layout: {}", err),
        };
        let ptr = self.bump.alloc_layout(layout);
        // SAFETY: `alloc_layout` returned `size` writable bytes that are exclusively ours
        // until the bump allocator is reset, which requires `&mut self`.
        let data = unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, size);
            std::slice::from_raw_parts_mut(ptr.as_ptr(), size)
        };
        (data, start)
    }

    pub fn len(&self) -> usize {
        self.used.get()
    }

    pub fn is_empty(&self) -> bool {
        self.used.get() == 0
    }

    /// Releases all allocations. The largest page is kept for reuse.
    pub fn reset(&mut self) {
        self.bump.reset();
        self.used.set(0);
    }
}

impl std::fmt::Debug for FreeformStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeformStorage")
            .field("used", &self.used.get())
            .field("allocated", &self.bump.allocated_bytes())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Index of an object in an `ObjectHeap`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct HeapIndex {
    page: u32,
    slot: u32,
}

/// Paged, append-only heap of objects with bulk reset.
///
/// Pages have a fixed number of slots and are never reallocated. `reset` runs the destructor of every
/// object but keeps the pages for the next round.
#[derive(Debug)]
pub struct ObjectHeap<T> {
    pages: Vec<Vec<T>>,
    current: usize,
    page_len: usize,
}

impl<T> ObjectHeap<T> {
    pub fn new(page_len: usize) -> ObjectHeap<T> {
        ObjectHeap {
            pages: Vec::new(),
            current: 0,
            page_len: page_len.max(1),
        }
    }

    pub fn push(&mut self, object: T) -> HeapIndex {
        if self.current < self.pages.len() && self.pages[self.current].len() == self.page_len {
            self.current += 1;
        }
        if self.current == self.pages.len() {
            self.pages.push(Vec::with_capacity(self.page_len));
        }
        let page = &mut self.pages[self.current];
        let slot = page.len();
        page.push(object);
        HeapIndex {
            page: self.current as u32,
            slot: slot as u32,
        }
    }

    pub fn get(&self, index: HeapIndex) -> &T {
        &self.pages[index.page as usize][index.slot as usize]
    }

    pub fn get_mut(&mut self, index: HeapIndex) -> &mut T {
        &mut self.pages[index.page as usize][index.slot as usize]
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every object, keeping the pages.
    pub fn reset(&mut self) {
        for page in self.pages.iter_mut() {
            page.clear();
        }
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_append() {
        let mut arena = ByteArena::new(16, 1024);
        let (data, offset) = arena.allocate(3);
        data.copy_from_slice(&[1, 2, 3]);
        assert_eq!(offset, 0);
        let (_, offset) = arena.allocate(8);
        assert_eq!(offset, 16);
        assert_eq!(arena.len(), 24);
        assert_eq!(&arena.as_bytes()[0..4], &[1, 2, 3, 0]);
    }

    #[test]
    #[should_panic]
    fn arena_overflow() {
        let mut arena = ByteArena::new(1, 16);
        arena.allocate(17);
    }

    #[test]
    fn freeform_allocations_are_stable() {
        let storage = FreeformStorage::new(64, 1 << 20);
        let (a, _) = storage.allocate(16, 8);
        a[0] = 42;
        let a_ptr = a.as_ptr();
        // force several new pages
        for _ in 0..100 {
            storage.allocate(64, 8);
        }
        let a_again = unsafe { std::slice::from_raw_parts(a_ptr, 16) };
        assert_eq!(a_again[0], 42);
        assert_eq!(a_ptr as usize % 8, 0);
    }

    #[test]
    fn object_heap_reset_drops_objects() {
        use std::rc::Rc;
        let tracker = Rc::new(());
        let mut heap = ObjectHeap::new(2);
        let indices: Vec<_> = (0..5).map(|_| heap.push(tracker.clone())).collect();
        assert_eq!(heap.len(), 5);
        assert_eq!(Rc::strong_count(&tracker), 6);
        assert!(Rc::ptr_eq(heap.get(indices[3]), &tracker));
        heap.reset();
        assert_eq!(Rc::strong_count(&tracker), 1);
        assert!(heap.is_empty());
        let index = heap.push(tracker.clone());
        assert_eq!(index, indices[0]);
    }
}
