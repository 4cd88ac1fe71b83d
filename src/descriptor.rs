// Descriptor heap sub-allocation.
//
// Grounded on `D3D12DescriptorAllocator` (d3d12_descriptor_allocator.hpp) for
// the cursor + free-list contract, and on `DescPool` (descpool.rs) for the
// "grow by adding a new backing pool instead of failing outright" idiom -
// adapted here to a single fixed-size heap per kind, since the pre-sized
// shader-visible heap (§4.2) is meant to refuse growth past its initial
// size rather than add more pools.
//
// Austin Shafer - 2024

use crate::error::{BackendError, Result};
use ash::vk;

/// Which descriptor heap a range was (or should be) allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    /// Shader-visible CBV/SRV/UAV heap, bound once per frame and referenced
    /// by root descriptor tables.
    CbvSrvUav,
    RenderTargetView,
    DepthStencilView,
}

/// A contiguous slice of descriptors handed out by a `DescriptorAllocator`.
///
/// Owned by the allocator that produced it - returning the range (`free`)
/// marks every slot in it free again. Per invariant I4 a live range's slots
/// are never handed out to a second owner while it is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRange {
    pub heap: DescriptorHeapKind,
    pub start: u32,
    pub count: u32,
}

impl DescriptorRange {
    pub fn cpu_handle_offset(&self, slot: u32) -> u32 {
        debug_assert!(slot < self.count);
        self.start + slot
    }
}

struct FreeRange {
    start: u32,
    count: u32,
}

/// One fixed-size descriptor heap with a bump-allocation cursor and a
/// free-list of returned ranges.
///
/// Allocation is O(1) amortised: a first-fit scan of the (usually short)
/// free list, falling back to bumping the cursor. Frees never invalidate
/// other live ranges - a freed range is only ever reused by a later
/// `allocate` call, never merged eagerly with its neighbours (the source
/// does not coalesce free ranges either; fragmentation is bounded because
/// every bind-group allocates the same handful of range sizes).
pub struct DescriptorAllocator {
    kind: DescriptorHeapKind,
    capacity: u32,
    cursor: u32,
    free_list: Vec<FreeRange>,
    /// SRV format used when writing a descriptor for a byte-addressed
    /// (raw) buffer. The source hard-codes this to `R8_UINT` with a
    /// "TODO: figure out if that's correct" marker; this crate resolves
    /// that by making it a parameter of the write call instead, defaulting
    /// to the source's observed value (see DESIGN.md).
    pub raw_buffer_srv_format: vk::Format,
}

impl DescriptorAllocator {
    pub fn new(kind: DescriptorHeapKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            cursor: 0,
            free_list: Vec::new(),
            raw_buffer_srv_format: vk::Format::R8_UINT,
        }
    }

    /// The shader-visible CBV/SRV/UAV heap is sized for `MAX_NUM_TEXTURES`
    /// plus overhead - 65 536 in the reference.
    pub const DEFAULT_CBV_SRV_UAV_CAPACITY: u32 = 65_536;

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn find_free_range(&mut self, count: u32) -> Option<DescriptorRange> {
        let idx = self.free_list.iter().position(|r| r.count >= count)?;
        let range = self.free_list.remove(idx);
        let start = range.start;

        // If the free range is larger than requested, push the remainder
        // back as a new (smaller) free range.
        if range.count > count {
            self.free_list.push(FreeRange {
                start: start + count,
                count: range.count - count,
            });
        }

        Some(DescriptorRange {
            heap: self.kind,
            start,
            count,
        })
    }

    /// Allocate `count` contiguous descriptors. Fails with
    /// `OUT_OF_DESCRIPTORS` if no free range fits and the heap's remaining
    /// bump-cursor space would cross the heap boundary.
    pub fn allocate(&mut self, count: u32) -> Result<DescriptorRange> {
        if count == 0 {
            return Ok(DescriptorRange {
                heap: self.kind,
                start: self.cursor,
                count: 0,
            });
        }

        if let Some(range) = self.find_free_range(count) {
            return Ok(range);
        }

        if self.cursor + count > self.capacity {
            return Err(BackendError::OUT_OF_DESCRIPTORS);
        }

        let range = DescriptorRange {
            heap: self.kind,
            start: self.cursor,
            count,
        };
        self.cursor += count;
        Ok(range)
    }

    /// Return every slot in `range` to the free list.
    pub fn free(&mut self, range: DescriptorRange) {
        debug_assert_eq!(range.heap, self.kind);
        if range.count == 0 {
            return;
        }
        self.free_list.push(FreeRange {
            start: range.start,
            count: range.count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p6_free_list_reuse_yields_same_range() {
        let mut alloc = DescriptorAllocator::new(DescriptorHeapKind::CbvSrvUav, 1024);
        let a = alloc.allocate(4).unwrap();
        alloc.free(a);
        let b = alloc.allocate(4).unwrap();
        assert_eq!(a.start, b.start);
        assert_eq!(a.count, b.count);
    }

    #[test]
    fn scenario_3_descriptor_exhaustion() {
        let capacity = DescriptorAllocator::DEFAULT_CBV_SRV_UAV_CAPACITY;
        let mut alloc = DescriptorAllocator::new(DescriptorHeapKind::CbvSrvUav, capacity);

        for _ in 0..capacity {
            alloc.allocate(1).unwrap();
        }

        assert_eq!(alloc.allocate(1), Err(BackendError::OUT_OF_DESCRIPTORS));
    }

    #[test]
    fn allocation_never_crosses_heap_boundary() {
        let mut alloc = DescriptorAllocator::new(DescriptorHeapKind::RenderTargetView, 8);
        assert!(alloc.allocate(8).is_ok());
        assert_eq!(alloc.allocate(1), Err(BackendError::OUT_OF_DESCRIPTORS));
    }

    #[test]
    fn free_does_not_invalidate_other_live_ranges() {
        let mut alloc = DescriptorAllocator::new(DescriptorHeapKind::CbvSrvUav, 16);
        let a = alloc.allocate(4).unwrap();
        let b = alloc.allocate(4).unwrap();
        alloc.free(a);
        // b is untouched and still describes the same slots.
        assert_eq!(b.start, 4);
        assert_eq!(b.count, 4);
    }
}
