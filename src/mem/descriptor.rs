use crate::types::{BucketId, HeapPtr};
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use zwohash::ZwoHasher;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Prev {
    /// First node of the bucket's list
    Head(BucketId),
    Node(HeapPtr),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct FreeLinks {
    pub prev: Prev,
    pub succ: Option<HeapPtr>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum BlockDescriptor {
    Free(FreeLinks),
    Allocated { requested: usize },
}

/// Out-of-band metadata for every live block, keyed by block start.
///
/// Free-list links are kept here instead of inside the free block's payload, so a block that was
/// handed to a caller can never be reached through a bucket list.
#[derive(Default)]
pub(crate) struct DescriptorArena {
    descriptors: HashMap<HeapPtr, BlockDescriptor, BuildHasherDefault<ZwoHasher>>,
}

impl DescriptorArena {
    pub fn clear(&mut self) {
        self.descriptors.clear();
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn get(&self, block: HeapPtr) -> Option<BlockDescriptor> {
        self.descriptors.get(&block).copied()
    }

    pub fn set(&mut self, block: HeapPtr, descriptor: BlockDescriptor) {
        self.descriptors.insert(block, descriptor);
    }

    pub fn take(&mut self, block: HeapPtr) -> Option<BlockDescriptor> {
        self.descriptors.remove(&block)
    }

    pub fn free_links(&self, block: HeapPtr) -> FreeLinks {
        match self.descriptors.get(&block) {
            Some(BlockDescriptor::Free(links)) => *links,
            _ => unreachable!("Block {} is not free", block),
        }
    }

    pub fn free_links_mut(&mut self, block: HeapPtr) -> &mut FreeLinks {
        match self.descriptors.get_mut(&block) {
            Some(BlockDescriptor::Free(links)) => links,
            _ => unreachable!("Block {} is not free", block),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::mem::descriptor::{BlockDescriptor, DescriptorArena, FreeLinks, Prev};

    #[test]
    fn tagged_descriptors_work_fine() {
        let mut arena = DescriptorArena::default();

        arena.set(
            0,
            BlockDescriptor::Free(FreeLinks {
                prev: Prev::Head(2),
                succ: None,
            }),
        );
        arena.set(32, BlockDescriptor::Allocated { requested: 10 });
        assert_eq!(arena.len(), 2);

        arena.free_links_mut(0).succ = Some(64);
        assert_eq!(arena.free_links(0).succ, Some(64));
        assert_eq!(arena.free_links(0).prev, Prev::Head(2));

        assert_eq!(
            arena.take(32),
            Some(BlockDescriptor::Allocated { requested: 10 })
        );
        assert_eq!(arena.get(32), None);

        arena.clear();
        assert_eq!(arena.len(), 0);
    }

    #[test]
    #[should_panic]
    fn allocated_blocks_have_no_links() {
        let mut arena = DescriptorArena::default();
        arena.set(32, BlockDescriptor::Allocated { requested: 10 });

        arena.free_links(32);
    }
}
