use crate::mem::descriptor::{BlockDescriptor, DescriptorArena, FreeLinks, Prev};
use crate::types::{BucketId, HeapPtr, ALIGNMENT, NUM_BUCKETS};
use crate::utils::math::fast_log2;

pub(crate) fn bucket_index(size: usize) -> BucketId {
    let units = size / ALIGNMENT;
    if units == 0 {
        return 0;
    }

    (fast_log2(units) as BucketId).min(NUM_BUCKETS - 1)
}

/// Heads of the per-bucket doubly-linked lists of free blocks. Lists are unordered, new blocks
/// are pushed to the front.
#[derive(Default)]
pub(crate) struct SegregatedFreeList {
    heads: [Option<HeapPtr>; NUM_BUCKETS],
}

impl SegregatedFreeList {
    pub fn reset(&mut self) {
        self.heads = [None; NUM_BUCKETS];
    }

    #[inline]
    pub fn head(&self, bucket: BucketId) -> Option<HeapPtr> {
        self.heads[bucket]
    }

    pub fn insert(&mut self, block: HeapPtr, size: usize, arena: &mut DescriptorArena) {
        let bucket = bucket_index(size);
        let old_head = self.heads[bucket];

        arena.set(
            block,
            BlockDescriptor::Free(FreeLinks {
                prev: Prev::Head(bucket),
                succ: old_head,
            }),
        );

        if let Some(old_head) = old_head {
            arena.free_links_mut(old_head).prev = Prev::Node(block);
        }

        self.heads[bucket] = Some(block);
    }

    /// Unlinks the block in O(1) and drops its free descriptor.
    pub fn remove(&mut self, block: HeapPtr, bucket: BucketId, arena: &mut DescriptorArena) {
        let links = arena.free_links(block);

        match links.prev {
            Prev::Head(head_bucket) => {
                debug_assert_eq!(head_bucket, bucket);
                debug_assert_eq!(self.heads[bucket], Some(block));

                self.heads[bucket] = links.succ;
            }
            Prev::Node(prev) => {
                arena.free_links_mut(prev).succ = links.succ;
            }
        }

        if let Some(succ) = links.succ {
            arena.free_links_mut(succ).prev = links.prev;
        }

        arena.take(block);
    }

    pub fn iter<'a>(&self, bucket: BucketId, arena: &'a DescriptorArena) -> BucketIter<'a> {
        BucketIter {
            next: self.heads[bucket],
            arena,
        }
    }
}

pub(crate) struct BucketIter<'a> {
    next: Option<HeapPtr>,
    arena: &'a DescriptorArena,
}

impl<'a> Iterator for BucketIter<'a> {
    type Item = HeapPtr;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next?;
        self.next = match self.arena.get(cur) {
            Some(BlockDescriptor::Free(links)) => links.succ,
            _ => None,
        };

        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use crate::mem::descriptor::{DescriptorArena, Prev};
    use crate::mem::free_list::{bucket_index, SegregatedFreeList};
    use crate::types::{MIN_BLOCK_SIZE, NUM_BUCKETS, PAGE_SIZE_BYTES};

    #[test]
    fn bucket_index_works_fine() {
        assert_eq!(bucket_index(8), 0);
        assert_eq!(bucket_index(MIN_BLOCK_SIZE), 1);
        assert_eq!(bucket_index(32), 2);
        assert_eq!(bucket_index(56), 2);
        assert_eq!(bucket_index(64), 3);
        assert_eq!(bucket_index(8 * 4095), 11);
        assert_eq!(bucket_index(8 * 4096), NUM_BUCKETS - 1);
        assert_eq!(bucket_index(PAGE_SIZE_BYTES * 100), NUM_BUCKETS - 1);
    }

    #[test]
    fn insert_remove_work_fine() {
        let mut arena = DescriptorArena::default();
        let mut list = SegregatedFreeList::default();

        list.insert(0, 32, &mut arena);
        list.insert(100, 40, &mut arena);
        list.insert(200, 48, &mut arena);
        list.insert(300, 1024, &mut arena);

        assert_eq!(list.iter(2, &arena).collect::<Vec<_>>(), vec![200, 100, 0]);
        assert_eq!(list.iter(7, &arena).collect::<Vec<_>>(), vec![300]);
        assert_eq!(arena.free_links(200).prev, Prev::Head(2));
        assert_eq!(arena.free_links(100).prev, Prev::Node(200));

        // middle
        list.remove(100, 2, &mut arena);
        assert_eq!(list.iter(2, &arena).collect::<Vec<_>>(), vec![200, 0]);
        assert_eq!(arena.free_links(0).prev, Prev::Node(200));
        assert_eq!(arena.get(100), None);

        // last
        list.remove(0, 2, &mut arena);
        assert_eq!(list.iter(2, &arena).collect::<Vec<_>>(), vec![200]);
        assert_eq!(arena.free_links(200).succ, None);

        list.insert(0, 32, &mut arena);

        // first
        list.remove(0, 2, &mut arena);
        assert_eq!(list.head(2), Some(200));
        assert_eq!(arena.free_links(200).prev, Prev::Head(2));

        // only
        list.remove(200, 2, &mut arena);
        list.remove(300, 7, &mut arena);
        assert!((0..NUM_BUCKETS).all(|it| list.head(it).is_none()));
        assert_eq!(arena.len(), 0);
    }
}
